use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use jahid_core::{LoadingSnapshot, Message, Mode, Quality, Role};
use crate::app::{App, InputMode, LineInput, SUGGESTIONS};

const ACCENT: Color = Color::Cyan;
const ULTRA: Color = Color::Yellow;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("**") else {
            break;
        };
        if end == 0 {
            // "****" is not bold text
            spans.push(Span::raw(rest[..start + 4].to_string()));
            rest = &after_open[2..];
            continue;
        }
        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(
            after_open[..end].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn text_width(text: &str) -> usize {
    Span::raw(text).width()
}

/// Split into alternating runs of whitespace and non-whitespace
fn split_words(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = None;
    for (i, c) in text.char_indices() {
        let space = c.is_whitespace();
        if in_space.is_some_and(|prev| prev != space) {
            tokens.push(&text[start..i]);
            start = i;
        }
        in_space = Some(space);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Word-wrap a styled line into rows no wider than `width`, keeping span
/// styles. Words longer than a row are broken; whitespace at a break is
/// dropped. The chat pane renders these rows as-is so its row count is exact.
fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 {
        return vec![line];
    }

    let line_style = line.style;
    let mut rows: Vec<Line<'static>> = Vec::new();
    let mut row: Vec<Span<'static>> = Vec::new();
    let mut row_len = 0;
    let mut continued = false;

    for span in line.spans {
        let style = span.style;
        for token in split_words(&span.content) {
            let token_len = text_width(token);

            if token.starts_with(char::is_whitespace) {
                if continued && row_len == 0 {
                    continue;
                }
                if row_len + token_len > width {
                    rows.push(Line::from(std::mem::take(&mut row)).style(line_style));
                    row_len = 0;
                    continued = true;
                } else {
                    row.push(Span::styled(token.to_string(), style));
                    row_len += token_len;
                }
                continue;
            }

            if row_len > 0 && row_len + token_len > width && token_len <= width {
                rows.push(Line::from(std::mem::take(&mut row)).style(line_style));
                row_len = 0;
                continued = true;
            }

            let mut rest = token;
            while row_len + text_width(rest) > width {
                let mut take = 0;
                let mut taken = 0;
                for (i, c) in rest.char_indices() {
                    let w = text_width(&rest[i..i + c.len_utf8()]);
                    if row_len + taken + w > width {
                        break;
                    }
                    taken += w;
                    take = i + c.len_utf8();
                }
                if take == 0 && row_len == 0 {
                    // A single glyph wider than the row
                    take = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
                }
                if take > 0 {
                    row.push(Span::styled(rest[..take].to_string(), style));
                }
                rows.push(Line::from(std::mem::take(&mut row)).style(line_style));
                row_len = 0;
                continued = true;
                rest = &rest[take..];
            }
            if !rest.is_empty() {
                row.push(Span::styled(rest.to_string(), style));
                row_len += text_width(rest);
            }
        }
    }

    if !row.is_empty() || rows.is_empty() {
        rows.push(Line::from(row).style(line_style));
    }
    rows
}

fn human_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{} KB", (bytes / 1024).max(1))
    }
}

fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (percent as usize * width) / 100;
    format!("{}{}", "█".repeat(filled), "░".repeat(width.saturating_sub(filled)))
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, options bar, input, footer
    let [header_area, chat_area, options_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_options(app, frame, options_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    } else if app.show_attach_input {
        render_attach_input(app, frame, area);
    } else if app.chat.is_live_open() {
        render_live_overlay(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let search = if app.chat.use_search() {
        Span::styled(" Search On ", Style::default().fg(Color::Black).bg(ACCENT))
    } else {
        Span::styled(" Standard ", Style::default().fg(Color::White).bg(Color::Magenta))
    };

    let title = Line::from(vec![
        Span::styled(" JAHID ", Style::default().fg(ACCENT).bold()),
        search,
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_welcome(lines: &mut Vec<Line<'static>>) {
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "NEURAL CORE ACTIVE",
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(Span::styled(
        "Advanced Intelligence Interface. Awaiting Input...",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));
    lines.push(Line::default());

    let colors = [ACCENT, Color::Magenta, ULTRA, Color::Green];
    for (i, (suggestion, color)) in SUGGESTIONS.iter().zip(colors).enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!(" {} ", i + 1), Style::default().fg(Color::Black).bg(color)),
            Span::styled(
                format!(" {}", suggestion.title.to_uppercase()),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
        ]));
        lines.push(Line::from(Span::styled(
            format!("    \"{}\"", suggestion.prompt),
            Style::default().fg(Color::Gray),
        )));
    }
}

fn message_lines(msg: &Message, lines: &mut Vec<Line<'static>>) {
    let (label, color) = match msg.role {
        Role::User => ("You", ACCENT),
        Role::Model => ("Jahid", Color::Magenta),
        Role::System => ("System", Color::DarkGray),
    };

    lines.push(Line::from(vec![
        Span::styled(
            format!("{}:", label),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {}", msg.timestamp.format("%H:%M")),
            Style::default().fg(Color::DarkGray),
        ),
    ]));

    if let Some(image) = &msg.image {
        let ultra = msg.image_quality == Some(Quality::Ultra);
        let mut spans = vec![Span::styled(
            format!("[image {} · {}]", image.mime_type(), human_size(image.approx_size())),
            Style::default().fg(if ultra { ULTRA } else { ACCENT }),
        )];
        if ultra {
            spans.push(Span::raw(" "));
            spans.push(Span::styled(
                " ULTRA 4K ",
                Style::default().fg(Color::Black).bg(ULTRA).add_modifier(Modifier::BOLD),
            ));
        }
        lines.push(Line::from(spans));
    }

    for line in msg.text.lines() {
        match msg.role {
            Role::Model => lines.push(parse_markdown_line(line)),
            _ => lines.push(Line::from(line.to_string())),
        }
    }

    if !msg.source_urls.is_empty() {
        lines.push(Line::from(Span::styled(
            "SOURCES",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::BOLD),
        )));
        for (i, url) in msg.source_urls.iter().enumerate() {
            lines.push(Line::from(vec![
                Span::styled(format!("  Source {} ", i + 1), Style::default().fg(Color::DarkGray)),
                Span::styled(url.clone(), Style::default().fg(ACCENT).add_modifier(Modifier::UNDERLINED)),
            ]));
        }
    }

    lines.push(Line::default());
}

fn loading_lines(app: &App, snapshot: &LoadingSnapshot, width: u16, lines: &mut Vec<Line<'static>>) {
    match snapshot.percent() {
        Some(percent) => {
            lines.push(Line::from(vec![
                Span::styled(
                    "NEURAL RECONSTRUCTION ",
                    Style::default().fg(ULTRA).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("{}%", percent), Style::default().fg(ULTRA)),
            ]));
            let bar_width = (width as usize).clamp(10, 40);
            lines.push(Line::from(Span::styled(
                progress_bar(percent, bar_width),
                Style::default().fg(ULTRA),
            )));
            lines.push(Line::from(Span::styled(
                snapshot.phrase,
                Style::default().fg(ULTRA).add_modifier(Modifier::ITALIC),
            )));
            lines.push(Line::from(Span::styled(
                "ULTRA MODE: HIGH FIDELITY 4K GENERATION",
                Style::default().fg(Color::DarkGray),
            )));
        }
        None => {
            // Animated dots: cycles through ".", "..", "..."
            let dots = "•".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(vec![
                Span::styled(format!("{:<3} ", dots), Style::default().fg(ACCENT)),
                Span::styled(
                    snapshot.phrase,
                    Style::default().fg(ACCENT).add_modifier(Modifier::ITALIC),
                ),
            ]));
        }
    }
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let mut lines: Vec<Line<'static>> = Vec::new();
    let loading = app.chat.loading_snapshot();

    if app.chat.conversation().is_empty() && loading.is_none() {
        render_welcome(&mut lines);
    } else {
        for msg in app.chat.conversation().iter() {
            message_lines(msg, &mut lines);
        }
        if let Some(snapshot) = &loading {
            loading_lines(app, snapshot, app.chat_width, &mut lines);
        }
    }

    let rows: Vec<Line<'static>> = lines
        .into_iter()
        .flat_map(|line| wrap_line(line, app.chat_width as usize))
        .collect();
    let total = u16::try_from(rows.len()).unwrap_or(u16::MAX);
    let max_scroll = total.saturating_sub(app.chat_height);
    if app.follow_bottom || app.chat_scroll > max_scroll {
        app.chat_scroll = max_scroll;
    }
    if app.chat_scroll == max_scroll {
        app.follow_bottom = true;
    }

    let border_color = if loading.as_ref().and_then(|s| s.progress).is_some() {
        ULTRA
    } else {
        Color::DarkGray
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", app.config.text_model));

    let chat = Paragraph::new(Text::from(rows))
        .block(block)
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_options(app: &App, frame: &mut Frame, area: Rect) {
    let selected = Style::default().fg(Color::Black).bg(ACCENT).add_modifier(Modifier::BOLD);
    let idle = Style::default().fg(Color::Gray).bg(Color::DarkGray);

    let mut spans = vec![match app.chat.mode() {
        Mode::ImageGenerate => Span::styled(" Image Engine ", selected),
        _ => Span::styled(" Text Engine ", idle),
    }];

    if app.chat.mode() == Mode::ImageGenerate {
        spans.push(Span::raw(" "));
        let ultra_selected = Style::default().fg(Color::Black).bg(ULTRA).add_modifier(Modifier::BOLD);
        match app.chat.quality() {
            Quality::Basic => {
                spans.push(Span::styled(" Basic ", selected));
                spans.push(Span::styled(" Ultra 4K ", idle));
            }
            Quality::Ultra => {
                spans.push(Span::styled(" Basic ", idle));
                spans.push(Span::styled(" Ultra 4K ", ultra_selected));
            }
        }
    }

    if let Some(attachment) = app.chat.attachment() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            format!(" [img] {} ", attachment.file_name),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ));
    }

    if let Some(status) = &app.status {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::DarkGray)));
    } else if app.is_ultra_image_mode() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            "Ultra Mode active: Higher quality requires a few more seconds.",
            Style::default().fg(ULTRA),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Visible slice of a single-line input plus the cursor column within it.
/// The column is always inside `0..width` (0 when there is no room).
fn visible_input(input: &LineInput, width: u16) -> (String, u16) {
    let width = width as usize;
    if width == 0 {
        return (String::new(), 0);
    }
    let cursor = input.cursor();
    // Calculate scroll offset to keep cursor visible
    let offset = if cursor < width { 0 } else { cursor - width + 1 };
    let text = input.text().chars().skip(offset).take(width).collect();
    (text, u16::try_from(cursor - offset).unwrap_or(u16::MAX))
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let accent = if app.is_ultra_image_mode() { ULTRA } else { ACCENT };
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { accent } else { Color::DarkGray };

    let title = if app.chat.is_loading() {
        " Waiting for Jahid... ".to_string()
    } else if app.can_send() {
        " Enter to send ".to_string()
    } else {
        " Message ".to_string()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = area.width.saturating_sub(2);
    let (visible, cursor_x) = visible_input(&app.input, inner_width);

    let input = if app.input.text().is_empty() {
        Paragraph::new(Span::styled(app.placeholder(), Style::default().fg(Color::DarkGray)))
    } else {
        Paragraph::new(visible).style(Style::default().fg(accent))
    };

    frame.render_widget(input.block(block), area);

    let popup_open = app.show_api_key_input || app.show_attach_input || app.chat.is_live_open();
    if editing && !popup_open {
        let x = area.x.saturating_add(1).saturating_add(cursor_x);
        frame.set_cursor_position((x, area.y.saturating_add(1)));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: Vec<(&str, &str)> = match app.input_mode {
        InputMode::Editing => vec![("Enter", "send"), ("Esc", "options")],
        InputMode::Normal => {
            let mut hints = vec![("i", "type"), ("m", "engine")];
            if app.chat.mode() == Mode::ImageGenerate {
                hints.push(("b/u", "quality"));
            }
            hints.extend([("s", "search"), ("a", "attach")]);
            if app.chat.attachment().is_some() {
                hints.push(("x", "detach"));
            }
            if app.chat.conversation().latest_image().is_some() {
                hints.push(("w", "save image"));
            }
            if app.chat.conversation().is_empty() {
                hints.push(("1-4", "suggest"));
            }
            hints.extend([("l", "live"), ("q", "quit")]);
            hints
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Centered popup area, cleared
fn popup_area(frame: &mut Frame, area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height);

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup);
    popup
}

fn render_attach_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(frame, area, 70, 6);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .title(" Attach Image ");

    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    let instructions = Paragraph::new("Path to a png, jpg, webp, gif or heic file. Enter to attach, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray))
        .wrap(Wrap { trim: true });
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 2));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let (visible, cursor_x) = visible_input(&app.attach_input, input_area.width);
    frame.render_widget(Paragraph::new(visible).style(Style::default().fg(ACCENT)), input_area);
    frame.set_cursor_position((input_area.x.saturating_add(cursor_x), input_area.y));
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(frame, area, 60, 7);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Enter Gemini API Key ");

    let inner = block.inner(popup);
    frame.render_widget(block, popup);

    // Instructions
    let instructions = Paragraph::new("Paste your API key below. Press Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));

    let instructions_area = Rect::new(inner.x, inner.y, inner.width, 1);
    frame.render_widget(instructions, instructions_area);

    // Input field
    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);

    // Mask the key with asterisks (show last 4 chars)
    let key = app.api_key_input.text();
    let char_count = app.api_key_input.char_count();
    let display_text = if char_count <= 4 {
        "*".repeat(char_count)
    } else {
        let masked_len = char_count - 4;
        let last_four: String = key.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    };

    let input = Paragraph::new(display_text)
        .style(Style::default().fg(ACCENT));

    frame.render_widget(input, input_area);

    // Show cursor
    let max_x = input_area.width.saturating_sub(1);
    let cursor_x = u16::try_from(app.api_key_input.cursor()).map_or(max_x, |c| c.min(max_x));
    frame.set_cursor_position((input_area.x.saturating_add(cursor_x), input_area.y));

    // Status line
    let status = Paragraph::new(format!("{} characters", char_count))
        .style(Style::default().fg(Color::DarkGray));

    let status_area = Rect::new(inner.x, inner.y + 4, inner.width, 1);
    frame.render_widget(status, status_area);
}

fn render_live_overlay(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(frame, area, 50, 9);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" LIVE ");

    let pulse = ["(  •  )", "( ••• )", "(•••••)"][app.animation_frame as usize % 3];
    let text = Text::from(vec![
        Line::default(),
        Line::from(Span::styled(pulse, Style::default().fg(Color::Magenta).bold())).centered(),
        Line::default(),
        Line::from(Span::styled(
            "Voice session",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ))
        .centered(),
        Line::from(Span::styled(
            "Esc to end the session",
            Style::default().fg(Color::DarkGray),
        ))
        .centered(),
    ]);

    frame.render_widget(Paragraph::new(text).block(block), popup);
}

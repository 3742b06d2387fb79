use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use jahid_core::Quality;
use crate::app::{App, InputMode, LineInput, SUGGESTIONS};
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Tick => app.tick_animation(),
    }

    // Pick up a finished request on every event, ticks included
    app.poll_request().await;
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // Popups take the keyboard while open
    if app.show_api_key_input {
        match key.code {
            KeyCode::Esc => app.close_api_key_input(),
            KeyCode::Enter => app.confirm_api_key(),
            _ => {
                edit_line(&mut app.api_key_input, key);
            }
        }
        return;
    }

    if app.show_attach_input {
        match key.code {
            KeyCode::Esc => app.close_attach_input(),
            KeyCode::Enter => app.confirm_attach(),
            _ => {
                edit_line(&mut app.attach_input, key);
            }
        }
        return;
    }

    if app.chat.is_live_open() {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('l') | KeyCode::Char('q')) {
            app.close_live();
        }
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.chat_height / 2);
        }

        KeyCode::Char('q') => app.should_quit = true,

        // Back to the input line
        KeyCode::Char('i') | KeyCode::Enter | KeyCode::Tab => {
            app.input_mode = InputMode::Editing;
        }

        // Engine and options
        KeyCode::Char('m') => app.toggle_engine(),
        KeyCode::Char('b') => app.select_quality(Quality::Basic),
        KeyCode::Char('u') => app.select_quality(Quality::Ultra),
        KeyCode::Char('s') => app.toggle_search(),

        // Images
        KeyCode::Char('a') => app.open_attach_input(),
        KeyCode::Char('x') => app.remove_attachment(),
        KeyCode::Char('w') => app.save_latest_image(),

        KeyCode::Char('l') => app.open_live(),
        KeyCode::Char('K') => app.open_api_key_input(),

        // Scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('g') => app.scroll_up(u16::MAX),
        KeyCode::Char('G') => app.follow_bottom = true,

        // Quick-start prompts on an empty conversation
        KeyCode::Char(c @ '1'..='4') if app.chat.conversation().is_empty() => {
            if let Some(index) = c.to_digit(10) {
                let index = index as usize - 1;
                if index < SUGGESTIONS.len() {
                    app.apply_suggestion(index);
                }
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            // Disabled while a request is pending or there is nothing to send
            if app.can_send() {
                app.submit();
            }
        }
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        _ => {
            edit_line(&mut app.input, key);
        }
    }
}

/// Shared cursor editing for single-line inputs. Returns whether the key was used.
fn edit_line(input: &mut LineInput, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.move_left(),
        KeyCode::Right => input.move_right(),
        KeyCode::Home => input.move_home(),
        KeyCode::End => input.move_end(),
        KeyCode::Char('a') if key.modifiers.contains(KeyModifiers::CONTROL) => input.move_home(),
        KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => input.move_end(),
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => input.clear(),
        KeyCode::Char(c) => input.insert(c),
        _ => return false,
    }
    true
}

fn handle_paste(app: &mut App, text: &str) {
    if app.show_api_key_input {
        app.api_key_input.insert_str(text.trim());
    } else if app.show_attach_input {
        app.attach_input.insert_str(text.trim());
    } else if !app.chat.is_live_open() {
        app.input_mode = InputMode::Editing;
        app.input.insert_str(text);
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

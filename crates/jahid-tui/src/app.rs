use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use ratatui::layout::Rect;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jahid_core::orchestrator::{self, Reply, SendRejected};
use jahid_core::{Attachment, ChatState, Config, GeminiClient, GenerativeBackend, Mode, Quality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line text field with a character-based cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineInput {
    text: String,
    cursor: usize,
}

impl LineInput {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn set(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.char_count();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    /// Pasted text; line breaks become spaces since the field is one line
    pub fn insert_str(&mut self, s: &str) {
        for c in s.chars() {
            self.insert(if c == '\n' || c == '\r' { ' ' } else { c });
        }
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.char_count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_count());
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.char_count();
    }
}

/// Quick-start prompts shown on an empty conversation
pub struct Suggestion {
    pub title: &'static str,
    pub prompt: &'static str,
    /// Switches to the image engine at ultra quality before filling the prompt
    pub ultra_image: bool,
}

pub const SUGGESTIONS: [Suggestion; 4] = [
    Suggestion {
        title: "System Info",
        prompt: "What is your architectural foundation?",
        ultra_image: false,
    },
    Suggestion {
        title: "Creative Engine",
        prompt: "Generate a digital art piece: Cybernetic Samurai, neon city, 8k",
        ultra_image: false,
    },
    Suggestion {
        title: "Ultra Mode",
        prompt: "Photorealistic interior of a luxury starship, cinematic lighting, 8k",
        ultra_image: true,
    },
    Suggestion {
        title: "Research Link",
        prompt: "Analyze the future of quantum computing trends.",
        ultra_image: false,
    },
];

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation and mode flags
    pub chat: ChatState,
    pub input: LineInput,

    // In-flight request (at most one)
    pub request_task: Option<JoinHandle<anyhow::Result<Reply>>>,
    pub backend: Option<Arc<dyn GenerativeBackend>>,
    pub config: Config,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub follow_bottom: bool,
    pub chat_area: Option<Rect>,

    // One-line feedback under the input (attach errors, saved paths, ...)
    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for the thinking dots and live pulse

    // Attach-image popup
    pub show_attach_input: bool,
    pub attach_input: LineInput,

    // API key popup
    pub show_api_key_input: bool,
    pub api_key_input: LineInput,
}

impl App {
    pub fn new(config: Config, backend: Option<Arc<dyn GenerativeBackend>>) -> Self {
        let chat = ChatState::with_preferences(config.default_quality, config.use_search);
        let needs_key = backend.is_none();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            chat,
            input: LineInput::default(),

            request_task: None,
            backend,
            config,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_bottom: true,
            chat_area: None,

            status: None,

            animation_frame: 0,

            show_attach_input: false,
            attach_input: LineInput::default(),

            show_api_key_input: needs_key,
            api_key_input: LineInput::default(),
        }
    }

    /// The send affordance: enabled only when idle and there is something to send
    pub fn can_send(&self) -> bool {
        !self.chat.is_loading()
            && !self.chat.is_live_open()
            && (!self.input.is_blank() || self.chat.attachment().is_some())
    }

    pub fn submit(&mut self) {
        let Some(backend) = self.backend.clone() else {
            self.status = Some("Set a Gemini API key first".to_string());
            self.open_api_key_input();
            return;
        };

        let text = self.input.text().to_string();
        match orchestrator::begin(&mut self.chat, &text) {
            Ok(request) => {
                self.input.clear();
                self.status = None;
                self.follow_bottom = true;
                self.request_task = Some(tokio::spawn(async move {
                    orchestrator::execute(backend.as_ref(), request).await
                }));
            }
            Err(SendRejected::Empty) => {}
            Err(rejected) => {
                debug!(reason = %rejected, "send ignored");
            }
        }
    }

    /// Collect the in-flight request once its task is done
    pub async fn poll_request(&mut self) {
        let finished = self
            .request_task
            .as_ref()
            .is_some_and(|task| task.is_finished());
        if !finished {
            return;
        }

        if let Some(task) = self.request_task.take() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(err) => Err(anyhow!("request task did not complete: {}", err)),
            };
            orchestrator::finish(&mut self.chat, outcome);
            self.follow_bottom = true;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.chat.is_loading() || self.chat.is_live_open() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn toggle_engine(&mut self) {
        self.chat.toggle_engine();
    }

    /// Quality is only offered while the image engine is selected
    pub fn select_quality(&mut self, quality: Quality) {
        if self.chat.mode() == Mode::ImageGenerate {
            self.chat.set_quality(quality);
        }
    }

    pub fn toggle_search(&mut self) {
        self.chat.toggle_search();
    }

    pub fn apply_suggestion(&mut self, index: usize) {
        let Some(suggestion) = SUGGESTIONS.get(index) else {
            return;
        };
        if suggestion.ultra_image {
            self.chat.set_mode(Mode::ImageGenerate);
            self.chat.set_quality(Quality::Ultra);
        }
        self.input.set(suggestion.prompt);
        self.input_mode = InputMode::Editing;
    }

    pub fn open_attach_input(&mut self) {
        self.show_attach_input = true;
        self.attach_input.clear();
    }

    pub fn close_attach_input(&mut self) {
        self.show_attach_input = false;
        self.attach_input.clear();
    }

    pub fn confirm_attach(&mut self) {
        let path = expand_home(self.attach_input.text().trim());
        self.close_attach_input();
        if path.as_os_str().is_empty() {
            return;
        }

        match Attachment::from_path(&path) {
            Ok(attachment) => {
                info!(file = %attachment.file_name, mime = %attachment.mime_type, "image attached");
                self.status = Some(format!("Attached {}", attachment.file_name));
                self.chat.attach(attachment);
            }
            Err(err) => {
                warn!(error = %format!("{:#}", err), "attach failed");
                self.status = Some(format!("{:#}", err));
            }
        }
    }

    pub fn remove_attachment(&mut self) {
        if let Some(attachment) = self.chat.detach_image() {
            self.status = Some(format!("Removed {}", attachment.file_name));
        }
    }

    pub fn open_live(&mut self) {
        info!("live session opened");
        self.chat.open_live();
    }

    pub fn close_live(&mut self) {
        info!("live session closed");
        self.chat.close_live();
    }

    pub fn save_latest_image(&mut self) {
        let Some(message) = self.chat.conversation().latest_image() else {
            self.status = Some("No image to save yet".to_string());
            return;
        };
        let Some(image) = message.image.as_ref() else {
            return;
        };

        let dir = self.config.output_dir();
        self.status = Some(match image.save_to(&dir, &format!("jahid-{}", message.id)) {
            Ok(path) => {
                info!(path = %path.display(), "image saved");
                format!("Saved {}", path.display())
            }
            Err(err) => {
                warn!(error = %format!("{:#}", err), "image save failed");
                format!("Could not save image: {:#}", err)
            }
        });
    }

    pub fn open_api_key_input(&mut self) {
        self.show_api_key_input = true;
        self.api_key_input.clear();
    }

    pub fn close_api_key_input(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
    }

    pub fn confirm_api_key(&mut self) {
        let key = self.api_key_input.text().trim().to_string();
        self.close_api_key_input();
        if key.is_empty() {
            return;
        }

        if let Err(err) = Config::save_api_key(&key) {
            warn!(error = %format!("{:#}", err), "could not save api key");
        }
        self.config.api_key = Some(key.clone());

        match GeminiClient::from_config(&self.config, &key) {
            Ok(client) => {
                self.backend = Some(Arc::new(client));
                self.status = Some("API key saved".to_string());
            }
            Err(err) => {
                self.status = Some(format!("Could not create Gemini client: {:#}", err));
            }
        }
    }

    /// Placeholder for the empty input line
    pub fn placeholder(&self) -> &'static str {
        match self.chat.mode() {
            Mode::ImageGenerate => match self.chat.quality() {
                Quality::Ultra => "Describe an ultra-realistic 4K scene...",
                Quality::Basic => "Describe a basic image to generate...",
            },
            _ if self.chat.attachment().is_some() => "What should I do with this image?",
            _ => "Message Jahid AI...",
        }
    }

    pub fn is_ultra_image_mode(&self) -> bool {
        self.chat.mode() == Mode::ImageGenerate && self.chat.quality() == Quality::Ultra
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use jahid_core::{ImageRef, Message, Role, TextReply};
    use std::time::Duration;

    struct EchoBackend;

    #[async_trait::async_trait]
    impl GenerativeBackend for EchoBackend {
        async fn generate_text(&self, prompt: &str, _: &[Message], _: bool) -> Result<TextReply> {
            Ok(TextReply {
                text: format!("echo: {}", prompt),
                source_urls: Vec::new(),
            })
        }

        async fn generate_image(&self, _: &str, _: Quality) -> Result<ImageRef> {
            Ok(ImageRef::from_data_uri("data:image/png;base64,aGVsbG8=")?)
        }

        async fn edit_image(&self, image: &ImageRef, _: &str, _: &str) -> Result<ImageRef> {
            Ok(image.clone())
        }
    }

    fn test_app() -> App {
        App::new(Config::new(), Some(Arc::new(EchoBackend)))
    }

    async fn wait_for_reply(app: &mut App) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while app.request_task.is_some() {
                tokio::task::yield_now().await;
                app.poll_request().await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_line_input_utf8_editing() {
        let mut input = LineInput::default();
        input.insert_str("héllo");
        input.move_left();
        input.move_left();
        input.backspace();
        assert_eq!(input.text(), "hélo");
        input.move_home();
        input.delete();
        assert_eq!(input.text(), "élo");
        input.move_end();
        input.insert('!');
        assert_eq!(input.text(), "élo!");
        assert_eq!(input.cursor(), 4);
    }

    #[test]
    fn test_pasted_newlines_become_spaces() {
        let mut input = LineInput::default();
        input.insert_str("a\nb");
        assert_eq!(input.text(), "a b");
    }

    #[test]
    fn test_placeholder_follows_mode() {
        let mut app = test_app();
        assert_eq!(app.placeholder(), "Message Jahid AI...");

        app.chat.attach(Attachment {
            image: ImageRef::from_data_uri("data:image/png;base64,AAAA").unwrap(),
            mime_type: "image/png".to_string(),
            file_name: "a.png".to_string(),
        });
        assert_eq!(app.placeholder(), "What should I do with this image?");

        app.toggle_engine();
        assert_eq!(app.placeholder(), "Describe a basic image to generate...");
        app.select_quality(Quality::Ultra);
        assert_eq!(app.placeholder(), "Describe an ultra-realistic 4K scene...");
        assert!(app.is_ultra_image_mode());
    }

    #[test]
    fn test_quality_only_selectable_in_image_mode() {
        let mut app = test_app();
        app.select_quality(Quality::Ultra);
        assert_eq!(app.chat.quality(), Quality::Basic);
    }

    #[test]
    fn test_ultra_suggestion_switches_engine() {
        let mut app = test_app();
        app.apply_suggestion(2);
        assert_eq!(app.chat.mode(), Mode::ImageGenerate);
        assert_eq!(app.chat.quality(), Quality::Ultra);
        assert!(app.input.text().starts_with("Photorealistic interior"));

        app.apply_suggestion(99);
        assert!(app.input.text().starts_with("Photorealistic interior"));
    }

    #[test]
    fn test_submit_without_backend_asks_for_key() {
        let mut app = App::new(Config::new(), None);
        assert!(app.show_api_key_input);
        app.close_api_key_input();

        app.input.set("hello");
        app.submit();
        assert!(app.show_api_key_input);
        assert!(app.chat.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_submit_and_collect_reply() {
        let mut app = test_app();
        app.input.set("ping");
        assert!(app.can_send());

        app.submit();
        assert!(app.chat.is_loading());
        assert!(!app.can_send());
        assert!(app.input.text().is_empty());

        // A second send while pending changes nothing
        app.input.set("again");
        app.submit();
        assert_eq!(app.chat.conversation().len(), 1);

        wait_for_reply(&mut app).await;

        let messages = app.chat.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Model);
        assert_eq!(messages[1].text, "echo: ping");
        assert!(!app.chat.is_loading());
    }

    #[tokio::test]
    async fn test_attach_then_send_edits_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"png-bytes").unwrap();

        let mut app = test_app();
        app.open_attach_input();
        app.attach_input.set(&path.display().to_string());
        app.confirm_attach();
        assert_eq!(app.chat.attachment().unwrap().file_name, "shot.png");

        app.submit();
        wait_for_reply(&mut app).await;

        let reply = app.chat.conversation().last().unwrap();
        assert_eq!(reply.text, "Edited your image.");
        assert!(app.chat.attachment().is_none());
    }

    #[test]
    fn test_attach_bad_path_reports_status() {
        let mut app = test_app();
        app.open_attach_input();
        app.attach_input.set("/definitely/not/here.png");
        app.confirm_attach();
        assert!(app.chat.attachment().is_none());
        assert!(app.status.is_some());
        assert!(app.chat.conversation().is_empty());
    }

    #[test]
    fn test_save_latest_image_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new();
        config.output_dir = Some(dir.path().to_path_buf());
        let mut app = App::new(config, Some(Arc::new(EchoBackend)));

        app.save_latest_image();
        assert_eq!(app.status.as_deref(), Some("No image to save yet"));

        app.chat.toggle_engine();
        let request = orchestrator::begin(&mut app.chat, "cube").unwrap();
        assert!(matches!(request, jahid_core::RequestKind::GenerateImage { .. }));
        orchestrator::finish(
            &mut app.chat,
            Ok(Reply::Generated {
                prompt: "cube".to_string(),
                image: ImageRef::from_data_uri("data:image/png;base64,aGVsbG8=").unwrap(),
                quality: Quality::Basic,
            }),
        );

        app.save_latest_image();
        let saved = dir.path().join("jahid-2.png");
        assert_eq!(std::fs::read(saved).unwrap(), b"hello");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/a.png"), PathBuf::from("/tmp/a.png"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/a.png"), home.join("a.png"));
        }
    }
}

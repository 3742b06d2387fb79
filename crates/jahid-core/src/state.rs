//! UI-agnostic conversation state
//!
//! `ChatState` is the single owner of the message history and the mode flags
//! that decide what the next send does. Frontends read it and change it only
//! through the transition methods below; the request orchestrator is the only
//! code that appends messages.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::image::{Attachment, ImageRef};
use crate::progress::{LoadingSnapshot, ProgressReporter};

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
    System,
}

/// Which capability the next send invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Text,
    ImageGenerate,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Basic,
    Ultra,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Basic => "basic",
            Quality::Ultra => "ultra",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Quality::Basic => "Basic",
            Quality::Ultra => "Ultra 4K",
        }
    }
}

/// Everything about a message except its identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContent {
    pub text: String,
    pub image: Option<ImageRef>,
    pub is_image_generation: bool,
    pub image_quality: Option<Quality>,
    pub source_urls: Vec<String>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A message in the conversation. Only `Conversation` creates these and it
/// never hands out mutable access.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub timestamp: DateTime<Local>,
    pub text: String,
    pub image: Option<ImageRef>,
    pub is_image_generation: bool,
    pub image_quality: Option<Quality>,
    pub source_urls: Vec<String>,
}

/// Append-only message history for one session
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: MessageContent) -> &Message {
        self.next_id += 1;
        self.messages.push(Message {
            id: self.next_id,
            role,
            timestamp: Local::now(),
            text: content.text,
            image: content.image,
            is_image_generation: content.is_image_generation,
            image_quality: content.image_quality,
            source_urls: content.source_urls,
        });
        let message = &self.messages[self.messages.len() - 1];
        debug!(id = message.id, role = ?message.role, "message appended");
        message
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent message that carries an image
    pub fn latest_image(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.image.is_some())
    }
}

/// The in-flight request marker. Holding the progress reporter here ties the
/// loading animation to the lifetime of the request.
#[derive(Debug)]
struct Loading {
    reporter: ProgressReporter,
}

#[derive(Debug, Default)]
pub struct ChatState {
    conversation: Conversation,
    mode: Mode,
    mode_before_live: Mode,
    quality: Quality,
    use_search: bool,
    attachment: Option<Attachment>,
    loading: Option<Loading>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(quality: Quality, use_search: bool) -> Self {
        Self {
            quality,
            use_search,
            ..Self::default()
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn use_search(&self) -> bool {
        self.use_search
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    pub fn is_live_open(&self) -> bool {
        self.mode == Mode::Live
    }

    /// Current loading indicator, `None` when idle
    pub fn loading_snapshot(&self) -> Option<LoadingSnapshot> {
        self.loading.as_ref().map(|l| l.reporter.snapshot())
    }

    /// Flip between the text and image engines. Ignored while live is open.
    pub fn toggle_engine(&mut self) {
        self.mode = match self.mode {
            Mode::Text => Mode::ImageGenerate,
            Mode::ImageGenerate => Mode::Text,
            Mode::Live => return,
        };
    }

    pub fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Live => self.open_live(),
            _ if self.mode == Mode::Live => self.mode_before_live = mode,
            _ => self.mode = mode,
        }
    }

    /// Change quality. A pending request swaps its loading indicator for the
    /// one matching the new quality; the old timers stop with the old reporter.
    pub fn set_quality(&mut self, quality: Quality) {
        if self.quality == quality {
            return;
        }
        self.quality = quality;
        if let Some(loading) = self.loading.as_mut() {
            loading.reporter = ProgressReporter::start(quality);
        }
    }

    pub fn toggle_search(&mut self) {
        self.use_search = !self.use_search;
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn detach_image(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    pub fn open_live(&mut self) {
        if self.mode != Mode::Live {
            self.mode_before_live = self.mode;
            self.mode = Mode::Live;
        }
    }

    pub fn close_live(&mut self) {
        if self.mode == Mode::Live {
            self.mode = self.mode_before_live;
        }
    }

    pub(crate) fn append(&mut self, role: Role, content: MessageContent) -> &Message {
        self.conversation.append(role, content)
    }

    pub(crate) fn start_loading(&mut self) {
        self.loading = Some(Loading {
            reporter: ProgressReporter::start(self.quality),
        });
    }

    pub(crate) fn stop_loading(&mut self) {
        self.loading = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_ids_follow_append_order() {
        let mut conversation = Conversation::new();
        let first = conversation.append(Role::User, MessageContent::text("hi")).id;
        let second = conversation.append(Role::Model, MessageContent::text("hello")).id;
        assert!(second > first);
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().role, Role::Model);
    }

    #[test]
    fn test_latest_image_skips_text_messages() {
        let mut conversation = Conversation::new();
        let image = ImageRef::from_data_uri("data:image/png;base64,AAAA").unwrap();
        conversation.append(
            Role::Model,
            MessageContent {
                image: Some(image.clone()),
                ..MessageContent::text("pic")
            },
        );
        conversation.append(Role::User, MessageContent::text("nice"));

        let latest = conversation.latest_image().unwrap();
        assert_eq!(latest.image.as_ref(), Some(&image));
        assert_eq!(latest.text, "pic");
    }

    #[test]
    fn test_toggle_engine() {
        let mut state = ChatState::new();
        assert_eq!(state.mode(), Mode::Text);
        state.toggle_engine();
        assert_eq!(state.mode(), Mode::ImageGenerate);
        state.toggle_engine();
        assert_eq!(state.mode(), Mode::Text);
    }

    #[test]
    fn test_live_overlay_restores_previous_mode() {
        let mut state = ChatState::new();
        state.toggle_engine();
        state.open_live();
        assert!(state.is_live_open());

        // Engine toggles are ignored while the overlay owns the input
        state.toggle_engine();
        assert_eq!(state.mode(), Mode::Live);

        state.close_live();
        assert_eq!(state.mode(), Mode::ImageGenerate);
    }

    #[test]
    fn test_set_mode_while_live_applies_on_close() {
        let mut state = ChatState::new();
        state.set_mode(Mode::Live);
        state.set_mode(Mode::ImageGenerate);
        assert_eq!(state.mode(), Mode::Live);
        state.close_live();
        assert_eq!(state.mode(), Mode::ImageGenerate);
    }

    #[test]
    fn test_quality_change_while_loading_swaps_indicator() {
        let mut state = ChatState::new();
        state.start_loading();
        assert_eq!(state.loading_snapshot().unwrap().progress, None);

        state.set_quality(Quality::Ultra);
        let snapshot = state.loading_snapshot().unwrap();
        assert_eq!(snapshot.progress, Some(5.0));

        state.stop_loading();
        assert!(state.loading_snapshot().is_none());
    }

    #[test]
    fn test_quality_names() {
        assert_eq!(Quality::Ultra.display_name(), "Ultra 4K");
        assert_eq!(Quality::Basic.as_str(), "basic");
    }
}

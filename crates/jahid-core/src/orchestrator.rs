//! Turns a user send into exactly one backend call.
//!
//! A send goes through three steps so a UI can run the call on a background
//! task while it keeps drawing:
//!
//! 1. [`begin`] checks admission, records the user message, raises the
//!    loading flag and resolves which capability to call.
//! 2. [`execute`] performs that single call.
//! 3. [`finish`] records the reply (or a generic error message) and lowers
//!    the loading flag.
//!
//! [`send`] runs all three inline.

use anyhow::Result;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ai::GenerativeBackend;
use crate::image::ImageRef;
use crate::state::{ChatState, Message, MessageContent, Mode, Quality, Role};

pub const DEFAULT_EDIT_INSTRUCTION: &str = "Enhance this image";
pub const REQUEST_FAILED_TEXT: &str = "Error: Something went wrong while processing your request.";

/// Why a send was not admitted. Nothing is appended in any of these cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("nothing to send")]
    Empty,
    #[error("a request is already in flight")]
    Busy,
    #[error("the live session has the input")]
    LiveSessionOpen,
}

/// The capability a send resolves to, decided once from mode and attachment
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    GenerateImage {
        prompt: String,
        quality: Quality,
    },
    EditImage {
        image: ImageRef,
        mime_type: String,
        instruction: String,
    },
    GenerateText {
        prompt: String,
        history: Vec<Message>,
        use_search: bool,
    },
}

impl RequestKind {
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::GenerateImage { .. } => "generate-image",
            RequestKind::EditImage { .. } => "edit-image",
            RequestKind::GenerateText { .. } => "generate-text",
        }
    }
}

/// A successful backend result, before it becomes a message
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        source_urls: Vec<String>,
    },
    Generated {
        prompt: String,
        image: ImageRef,
        quality: Quality,
    },
    Edited {
        image: ImageRef,
    },
}

impl Reply {
    fn into_content(self) -> MessageContent {
        match self {
            Reply::Text { text, source_urls } => MessageContent {
                text,
                source_urls,
                ..MessageContent::default()
            },
            Reply::Generated {
                prompt,
                image,
                quality,
            } => MessageContent {
                text: format!(
                    "Generated {} image for: \"{}\"",
                    quality.display_name(),
                    prompt
                ),
                image: Some(image),
                is_image_generation: true,
                image_quality: Some(quality),
                source_urls: Vec::new(),
            },
            Reply::Edited { image } => MessageContent {
                text: "Edited your image.".to_string(),
                image: Some(image),
                ..MessageContent::default()
            },
        }
    }
}

/// Admit a send: record the user message, raise the loading flag and pick
/// the capability. Rejections leave the state untouched.
pub fn begin(state: &mut ChatState, text: &str) -> Result<RequestKind, SendRejected> {
    if text.trim().is_empty() && state.attachment().is_none() {
        return Err(SendRejected::Empty);
    }
    if state.is_loading() {
        return Err(SendRejected::Busy);
    }
    if state.mode() == Mode::Live {
        return Err(SendRejected::LiveSessionOpen);
    }

    let request = match (state.mode(), state.attachment()) {
        (Mode::ImageGenerate, _) => RequestKind::GenerateImage {
            prompt: text.to_string(),
            quality: state.quality(),
        },
        (_, Some(attachment)) => RequestKind::EditImage {
            image: attachment.image.clone(),
            mime_type: attachment.mime_type.clone(),
            instruction: if text.trim().is_empty() {
                DEFAULT_EDIT_INSTRUCTION.to_string()
            } else {
                text.to_string()
            },
        },
        _ => RequestKind::GenerateText {
            prompt: text.to_string(),
            history: state.conversation().messages().to_vec(),
            use_search: state.use_search(),
        },
    };

    let user_content = MessageContent {
        image: state.attachment().map(|a| a.image.clone()),
        ..MessageContent::text(text)
    };
    state.append(Role::User, user_content);
    state.start_loading();

    info!(kind = request.label(), "request started");
    Ok(request)
}

/// Perform the one backend call for `request`
pub async fn execute(backend: &dyn GenerativeBackend, request: RequestKind) -> Result<Reply> {
    match request {
        RequestKind::GenerateImage { prompt, quality } => {
            let image = backend.generate_image(&prompt, quality).await?;
            Ok(Reply::Generated {
                prompt,
                image,
                quality,
            })
        }
        RequestKind::EditImage {
            image,
            mime_type,
            instruction,
        } => {
            let image = backend.edit_image(&image, &mime_type, &instruction).await?;
            Ok(Reply::Edited { image })
        }
        RequestKind::GenerateText {
            prompt,
            history,
            use_search,
        } => {
            let reply = backend.generate_text(&prompt, &history, use_search).await?;
            Ok(Reply::Text {
                text: reply.text,
                source_urls: reply.source_urls,
            })
        }
    }
}

/// Record the outcome of an admitted send. Always lowers the loading flag
/// and always appends exactly one model message.
pub fn finish(state: &mut ChatState, outcome: Result<Reply>) -> &Message {
    state.stop_loading();

    let content = match outcome {
        Ok(reply) => {
            if matches!(reply, Reply::Edited { .. }) {
                state.detach_image();
            }
            reply.into_content()
        }
        Err(err) => {
            error!(error = %format!("{:#}", err), "request failed");
            MessageContent::text(REQUEST_FAILED_TEXT)
        }
    };

    state.append(Role::Model, content)
}

/// Lowers the loading flag if the send future is dropped before `finish`
struct LoadingGuard<'a> {
    state: &'a mut ChatState,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.state.is_loading() {
            warn!("send abandoned before completion");
            self.state.stop_loading();
        }
    }
}

/// Admit, execute and finish a send in one go
pub async fn send(
    state: &mut ChatState,
    backend: &dyn GenerativeBackend,
    text: &str,
) -> Result<Message, SendRejected> {
    let request = begin(state, text)?;
    let guard = LoadingGuard { state };
    let outcome = execute(backend, request).await;
    let message = finish(guard.state, outcome).clone();
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::TextReply;
    use crate::image::Attachment;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend that records every call and answers from a script
    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        fail: bool,
        text_reply: TextReply,
        seen_history: Mutex<Vec<usize>>,
        seen_instruction: Mutex<Option<String>>,
    }

    impl ScriptedBackend {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn image() -> ImageRef {
            ImageRef::from_data_uri("data:image/png;base64,aGVsbG8=").unwrap()
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate_text(
            &self,
            prompt: &str,
            history: &[Message],
            _use_search: bool,
        ) -> Result<TextReply> {
            self.calls.lock().unwrap().push(format!("text:{}", prompt));
            self.seen_history.lock().unwrap().push(history.len());
            if self.fail {
                return Err(anyhow!("quota exceeded"));
            }
            Ok(self.text_reply.clone())
        }

        async fn generate_image(&self, prompt: &str, quality: Quality) -> Result<ImageRef> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("image:{}:{}", quality.as_str(), prompt));
            if self.fail {
                return Err(anyhow!("network down"));
            }
            Ok(Self::image())
        }

        async fn edit_image(
            &self,
            _image: &ImageRef,
            mime_type: &str,
            instruction: &str,
        ) -> Result<ImageRef> {
            self.calls.lock().unwrap().push(format!("edit:{}", mime_type));
            *self.seen_instruction.lock().unwrap() = Some(instruction.to_string());
            if self.fail {
                return Err(anyhow!("invalid input"));
            }
            Ok(Self::image())
        }
    }

    fn attachment() -> Attachment {
        Attachment {
            image: ImageRef::from_data_uri("data:image/jpeg;base64,/9j/").unwrap(),
            mime_type: "image/jpeg".to_string(),
            file_name: "photo.jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_send_issues_nothing() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();

        assert_eq!(send(&mut state, &backend, "").await, Err(SendRejected::Empty));
        assert_eq!(send(&mut state, &backend, "   \n").await, Err(SendRejected::Empty));
        assert!(state.conversation().is_empty());
        assert!(backend.calls().is_empty());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_successful_text_send_appends_user_then_model() {
        let backend = ScriptedBackend {
            text_reply: TextReply {
                text: "Qubits are getting better.".to_string(),
                source_urls: vec!["https://news.example".to_string()],
            },
            ..ScriptedBackend::default()
        };
        let mut state = ChatState::new();

        let reply = send(&mut state, &backend, "Analyze quantum trends").await.unwrap();

        let messages = state.conversation().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "Analyze quantum trends");
        assert_eq!(messages[1].role, Role::Model);
        assert_eq!(messages[1], reply);
        assert_eq!(reply.source_urls, vec!["https://news.example"]);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_text_history_excludes_new_user_message() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();

        let _ = send(&mut state, &backend, "first").await;
        let _ = send(&mut state, &backend, "second").await;

        assert_eq!(*backend.seen_history.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_failed_send_appends_error_and_clears_loading() {
        let backend = ScriptedBackend::failing();
        let mut state = ChatState::new();

        let reply = send(&mut state, &backend, "hello").await.unwrap();

        assert_eq!(state.conversation().len(), 2);
        assert_eq!(reply.role, Role::Model);
        assert_eq!(reply.text, REQUEST_FAILED_TEXT);
        assert!(reply.image.is_none());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_ultra_image_generation_is_tagged() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();
        state.toggle_engine();
        state.set_quality(Quality::Ultra);

        let reply = send(&mut state, &backend, "a red cube").await.unwrap();

        assert!(reply.is_image_generation);
        assert_eq!(reply.image_quality, Some(Quality::Ultra));
        assert_eq!(reply.text, "Generated Ultra 4K image for: \"a red cube\"");
        assert!(reply.image.is_some());
        assert_eq!(backend.calls(), vec!["image:ultra:a red cube"]);
    }

    #[tokio::test]
    async fn test_image_mode_wins_over_attachment() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();
        state.toggle_engine();
        state.attach(attachment());

        let reply = send(&mut state, &backend, "a cat").await.unwrap();

        assert_eq!(backend.calls(), vec!["image:basic:a cat"]);
        assert_eq!(reply.text, "Generated Basic image for: \"a cat\"");
        // Only the edit path consumes the attachment
        assert!(state.attachment().is_some());
    }

    #[tokio::test]
    async fn test_attachment_without_text_uses_default_edit() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();
        state.attach(attachment());

        let reply = send(&mut state, &backend, "").await.unwrap();

        assert_eq!(backend.calls(), vec!["edit:image/jpeg"]);
        assert_eq!(
            backend.seen_instruction.lock().unwrap().as_deref(),
            Some(DEFAULT_EDIT_INSTRUCTION)
        );
        assert_eq!(reply.text, "Edited your image.");
        assert!(!reply.is_image_generation);
        assert!(state.attachment().is_none());

        // The user message carries the attached image
        let user = &state.conversation().messages()[0];
        assert_eq!(user.image.as_ref().unwrap().mime_type(), "image/jpeg");
    }

    #[tokio::test]
    async fn test_whitespace_instruction_uses_default_edit() {
        let backend = ScriptedBackend::default();
        let mut state = ChatState::new();
        state.attach(attachment());

        send(&mut state, &backend, "  \t ").await.unwrap();

        assert_eq!(
            backend.seen_instruction.lock().unwrap().as_deref(),
            Some(DEFAULT_EDIT_INSTRUCTION)
        );
    }

    #[tokio::test]
    async fn test_failed_edit_keeps_attachment() {
        let backend = ScriptedBackend::failing();
        let mut state = ChatState::new();
        state.attach(attachment());

        let reply = send(&mut state, &backend, "make it blue").await.unwrap();

        assert_eq!(reply.text, REQUEST_FAILED_TEXT);
        assert_eq!(
            backend.seen_instruction.lock().unwrap().as_deref(),
            Some("make it blue")
        );
        assert!(state.attachment().is_some());
    }

    #[test]
    fn test_second_send_while_pending_is_rejected() {
        let mut state = ChatState::new();

        let first = begin(&mut state, "one").unwrap();
        assert!(matches!(first, RequestKind::GenerateText { .. }));
        assert!(state.is_loading());

        assert_eq!(begin(&mut state, "two"), Err(SendRejected::Busy));
        assert_eq!(state.conversation().len(), 1);

        finish(
            &mut state,
            Ok(Reply::Text {
                text: "done".to_string(),
                source_urls: Vec::new(),
            }),
        );
        assert!(!state.is_loading());
        assert!(begin(&mut state, "two").is_ok());
    }

    #[test]
    fn test_live_overlay_blocks_send() {
        let mut state = ChatState::new();
        state.open_live();
        assert_eq!(begin(&mut state, "hello"), Err(SendRejected::LiveSessionOpen));
        assert!(state.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_send_clears_loading() {
        struct Never;

        #[async_trait]
        impl GenerativeBackend for Never {
            async fn generate_text(&self, _: &str, _: &[Message], _: bool) -> Result<TextReply> {
                std::future::pending().await
            }
            async fn generate_image(&self, _: &str, _: Quality) -> Result<ImageRef> {
                std::future::pending().await
            }
            async fn edit_image(&self, _: &ImageRef, _: &str, _: &str) -> Result<ImageRef> {
                std::future::pending().await
            }
        }

        let mut state = ChatState::new();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            send(&mut state, &Never, "hang"),
        )
        .await;

        assert!(result.is_err());
        assert!(!state.is_loading());
        // The user message stays; the model reply never arrived
        assert_eq!(state.conversation().len(), 1);
    }
}

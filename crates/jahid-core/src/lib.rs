pub mod ai;
pub mod config;
pub mod image;
pub mod orchestrator;
pub mod progress;
pub mod state;

// Re-export main types for convenience
pub use ai::{GeminiClient, GenerativeBackend, TextReply};
pub use config::Config;
pub use image::{Attachment, ImageRef};
pub use orchestrator::{RequestKind, Reply, SendRejected};
pub use progress::{LoadingSnapshot, ProgressReporter};
pub use state::{ChatState, Conversation, Message, MessageContent, Mode, Quality, Role};

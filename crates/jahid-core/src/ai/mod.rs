pub mod gemini;

use anyhow::Result;
use async_trait::async_trait;

use crate::image::ImageRef;
use crate::state::{Message, Quality};

pub use gemini::GeminiClient;

/// Text answer plus the web sources it was grounded on (if any)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextReply {
    pub text: String,
    pub source_urls: Vec<String>,
}

/// The hosted capabilities a send can invoke
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        history: &[Message],
        use_search: bool,
    ) -> Result<TextReply>;

    async fn generate_image(&self, prompt: &str, quality: Quality) -> Result<ImageRef>;

    async fn edit_image(
        &self,
        image: &ImageRef,
        mime_type: &str,
        instruction: &str,
    ) -> Result<ImageRef>;
}

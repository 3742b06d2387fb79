use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{GenerativeBackend, TextReply};
use crate::config::Config;
use crate::image::ImageRef;
use crate::state::{Message, Quality, Role};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    image_size: &'static str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Deserialize, Debug, Default)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
}

/// Model names used for each capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiModels {
    pub text: String,
    pub basic_image: String,
    pub ultra_image: String,
}

impl GeminiModels {
    fn image_model(&self, quality: Quality) -> &str {
        match quality {
            Quality::Basic => &self.basic_image,
            Quality::Ultra => &self.ultra_image,
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_base: String,
    models: GeminiModels,
}

impl GeminiClient {
    pub fn from_config(config: &Config, api_key: &str) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            api_key: api_key.to_string(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            models: config.models(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        debug!(model, turns = request.contents.len(), "gemini request");

        let response = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", &self.api_key)])
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error {}: {}", status, text));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_text(
        &self,
        prompt: &str,
        history: &[Message],
        use_search: bool,
    ) -> Result<TextReply> {
        let mut contents = history_contents(history);
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(prompt)],
        });

        let request = GenerateContentRequest {
            contents,
            tools: if use_search {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            } else {
                Vec::new()
            },
            generation_config: None,
        };

        let response = self.generate_content(&self.models.text, &request).await?;
        let reply = extract_text_reply(response)?;
        info!(
            chars = reply.text.len(),
            sources = reply.source_urls.len(),
            "text response received"
        );
        Ok(reply)
    }

    async fn generate_image(&self, prompt: &str, quality: Quality) -> Result<ImageRef> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(prompt)],
            }],
            tools: Vec::new(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["IMAGE"],
                image_config: match quality {
                    Quality::Ultra => Some(ImageConfig { image_size: "4K" }),
                    Quality::Basic => None,
                },
            }),
        };

        let model = self.models.image_model(quality);
        let image = extract_image(self.generate_content(model, &request).await?)?;
        info!(quality = quality.as_str(), bytes = image.approx_size(), "image generated");
        Ok(image)
    }

    async fn edit_image(
        &self,
        image: &ImageRef,
        mime_type: &str,
        instruction: &str,
    ) -> Result<ImageRef> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: image.payload().to_string(),
                        }),
                    },
                    Part::text(instruction),
                ],
            }],
            tools: Vec::new(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
                image_config: None,
            }),
        };

        let edited = extract_image(
            self.generate_content(&self.models.basic_image, &request)
                .await?,
        )?;
        info!(bytes = edited.approx_size(), "image edited");
        Ok(edited)
    }
}

/// Prior turns as API contents. System notes and empty turns are not sent.
fn history_contents(history: &[Message]) -> Vec<Content> {
    history
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .filter_map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Model => "model",
                Role::System => return None,
            };
            Some(Content {
                role: Some(role.to_string()),
                parts: vec![Part::text(&m.text)],
            })
        })
        .collect()
}

fn extract_text_reply(response: GenerateContentResponse) -> Result<TextReply> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        bail!("Gemini returned no candidates");
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let mut source_urls: Vec<String> = Vec::new();
    let chunks = candidate
        .grounding_metadata
        .map(|metadata| metadata.grounding_chunks)
        .unwrap_or_default();
    for uri in chunks.into_iter().filter_map(|c| c.web.and_then(|w| w.uri)) {
        if !source_urls.contains(&uri) {
            source_urls.push(uri);
        }
    }

    if text.is_empty() && source_urls.is_empty() {
        bail!("Gemini returned an empty response");
    }

    Ok(TextReply { text, source_urls })
}

fn extract_image(response: GenerateContentResponse) -> Result<ImageRef> {
    if response.candidates.is_empty() {
        bail!("Gemini returned no candidates");
    }

    let inline = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.inline_data.filter(|data| !data.data.is_empty()))
        .ok_or_else(|| anyhow!("Gemini response contained no image"))?;

    Ok(ImageRef::from_base64(&inline.mime_type, &inline.data)?)
}

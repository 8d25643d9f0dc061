//! Google Gemini provider.
//!
//! Authentication: explicit API key, then `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.

use crate::provider::{GeneratedImage, Provider, ProviderError};
use async_trait::async_trait;
use base64::Engine;
use relay_history::{Role, Turn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    image_model: String,
    temperature: f64,
    base_url: String,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "responseModalities", skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    pub fn new(api_key: Option<&str>, model: impl Into<String>) -> Self {
        let resolved_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok());

        Self {
            api_key: resolved_key,
            model: model.into(),
            image_model: "gemini-2.0-flash-preview-image-generation".into(),
            temperature: 0.7,
            base_url: DEFAULT_BASE_URL.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Point the client at a different host (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn error(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::new("gemini", message)
    }

    /// Build the request body for a conversation.
    ///
    /// System turns go to `system_instruction`; `assistant` becomes `model`.
    fn build_request(&self, turns: &[Turn], modalities: Option<Vec<String>>) -> GenerateContentRequest {
        let system_text: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
            .collect();

        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: system_text.join("\n"),
            }],
        });

        let contents = turns
            .iter()
            .filter(|t| t.role != Role::System)
            .map(|t| Content {
                role: Some(match t.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                }),
                parts: vec![Part {
                    text: t.content.clone(),
                }],
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_modalities: modalities,
            },
        }
    }

    /// POST a request and return the first candidate's parts.
    async fn call(&self, model: &str, request: &GenerateContentRequest) -> Result<Vec<ResponsePart>, ProviderError> {
        let start = Instant::now();

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| self.error("Gemini API key not found. Set GEMINI_API_KEY."))?;

        let model_name = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        let url = format!("{}/v1beta/{model_name}:generateContent", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| self.error(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self
                .error(format!("API error: {error_text}"))
                .with_status(status.as_u16()));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {e}")))?;

        if let Some(err) = result.error {
            return Err(self.error(format!("API error: {}", err.message)));
        }

        if let Some(reason) = result.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(self.error(format!("Prompt blocked: {reason}")));
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| self.error("No response from Gemini"))?;

        tracing::debug!(
            model,
            finish_reason = candidate.finish_reason.as_deref(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Gemini call completed"
        );

        match candidate.content {
            Some(content) => Ok(content.parts),
            None => Err(self.error(format!(
                "Empty candidate (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ))),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        let request = self.build_request(turns, None);
        let parts = self.call(&self.model, &request).await?;

        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            return Err(self.error("Gemini returned an empty response"));
        }
        Ok(text)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<GeneratedImage>, ProviderError> {
        let request = self.build_request(
            &[Turn::user(prompt)],
            Some(vec!["TEXT".into(), "IMAGE".into()]),
        );
        let parts = self.call(&self.image_model, &request).await?;

        let mut images = Vec::new();
        for inline in parts.into_iter().filter_map(|p| p.inline_data) {
            let data = base64::engine::general_purpose::STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| self.error(format!("Invalid image payload: {e}")))?;
            images.push(GeneratedImage {
                mime_type: inline.mime_type,
                data,
            });
        }

        if images.is_empty() {
            return Err(self.error("Gemini returned no images"));
        }
        Ok(images)
    }
}

//! Provider trait for generative-content backends.
//!
//! Defines the interface every text/image service must implement.

use async_trait::async_trait;
use relay_history::Turn;

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "[{}] ({}) {}", self.provider, code, self.message),
            None => write!(f, "[{}] {}", self.provider, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for relay_common::Error {
    fn from(e: ProviderError) -> Self {
        Self::External(e.to_string())
    }
}

/// One generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl GeneratedImage {
    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Generative-content provider.
///
/// Implementations handle authentication, request formatting,
/// and response parsing for a specific API.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "gemini").
    fn name(&self) -> &str;

    /// Generate the next assistant message for a conversation.
    async fn generate(&self, turns: &[Turn]) -> Result<String, ProviderError>;

    /// Generate images for a prompt.
    async fn generate_image(&self, _prompt: &str) -> Result<Vec<GeneratedImage>, ProviderError> {
        Err(ProviderError::new(
            self.name(),
            "image generation is not supported by this provider",
        ))
    }
}

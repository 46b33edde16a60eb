use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A single chat message sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Sampling hints for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// A content-generation backend that answers with a JSON document.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// False when credentials are missing; callers skip work instead of failing.
    fn is_configured(&self) -> bool;

    /// Send the conversation and return the model's reply parsed as JSON.
    async fn complete_json(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// `complete_json` followed by deserialization into `T`.
pub async fn complete_as<T: DeserializeOwned>(
    provider: &dyn ContentProvider,
    messages: &[Message],
    options: &CompletionOptions,
) -> Result<T, ProviderError> {
    let value = provider.complete_json(messages, options).await?;
    serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider not configured")]
    NotConfigured,
}

impl ProviderError {
    /// Structured transient/terminal classification.
    ///
    /// `None` means the variant alone does not tell; callers fall back to
    /// inspecting the message text.
    pub fn is_transient(&self) -> Option<bool> {
        match self {
            ProviderError::RateLimited { .. } => Some(true),
            ProviderError::Http(e) if e.is_timeout() || e.is_connect() => Some(true),
            ProviderError::Http(_) => None,
            ProviderError::Api { status, .. } => match *status {
                429 | 502 | 503 | 504 => Some(true),
                400 | 401 | 403 | 404 | 422 => Some(false),
                _ => None,
            },
            ProviderError::Parse(_) | ProviderError::NotConfigured => Some(false),
            ProviderError::Unavailable(_) => None,
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use partyhub_core::config::ProviderConfig;

use crate::provider::{CompletionOptions, ContentProvider, Message, ProviderError};

/// OpenAI-compatible chat completions client running in JSON mode.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.api_key.clone().unwrap_or_default(),
            Some(config.base_url.trim_end_matches('/').to_string()),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ContentProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete_json(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<serde_json::Value, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }

        let body = build_request_body(&self.model, messages, options);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %self.model, messages = messages.len(), "sending JSON completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_json_content(api_resp)
    }
}

fn build_request_body(
    model: &str,
    messages: &[Message],
    options: &CompletionOptions,
) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": options.temperature,
        "max_tokens": options.max_tokens,
        "response_format": { "type": "json_object" },
    })
}

/// Extract the first choice and parse its text as JSON.
///
/// Models occasionally wrap JSON in a markdown fence even in JSON mode;
/// the fence is stripped before parsing.
fn parse_json_content(resp: ApiResponse) -> Result<serde_json::Value, ProviderError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        warn!("completion truncated by max_tokens");
    }

    let content = choice
        .message
        .content
        .ok_or_else(|| ProviderError::Parse("response message has no content".to_string()))?;

    serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| ProviderError::Parse(format!("invalid JSON content: {e}")))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// --- API response types ---

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> ApiResponse {
        serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn request_body_uses_json_mode_and_hints() {
        let messages = vec![Message::system("rules"), Message::user("go")];
        let opts = CompletionOptions {
            temperature: 0.5,
            max_tokens: 123,
        };
        let body = build_request_body("gpt-test", &messages, &opts);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 123);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "go");
    }

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain = parse_json_content(response(r#"{"truths":["a"],"dares":[]}"#)).unwrap();
        assert_eq!(plain["truths"][0], "a");

        let fenced =
            parse_json_content(response("```json\n{\"truths\":[],\"dares\":[\"b\"]}\n```")).unwrap();
        assert_eq!(fenced["dares"][0], "b");
    }

    #[test]
    fn non_json_content_is_a_parse_error() {
        let err = parse_json_content(response("sorry, I can't help")).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn empty_key_is_unconfigured() {
        let provider = OpenAiProvider::new(
            "  ".to_string(),
            None,
            "gpt-test".to_string(),
            Duration::from_secs(5),
        );
        assert!(!provider.is_configured());
    }
}

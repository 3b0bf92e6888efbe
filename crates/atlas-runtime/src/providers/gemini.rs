//! Google Gemini provider implementation.
//!
//! Uses `generateContent` for whole answers and
//! `streamGenerateContent?alt=sse` for streamed ones.
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! `x-goog-api-key` header is set.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::ProviderFactory, sse::SseDataStream, ChatMessage, CompletionConfig,
    CompletionResponse, FragmentStream, LlmProvider, ProviderError, TokenUsage,
};
use crate::secrets::{ApiCredential, CredentialSource};

/// Environment variable name for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini provider.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Create a provider with an explicit key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_credential(
            ApiCredential::new(api_key, CredentialSource::Programmatic, "Gemini API key"),
            DEFAULT_BASE_URL,
        )
    }

    /// Create from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(GEMINI_API_KEY_ENV, "Gemini API key")?;
        Self::with_credential(credential, DEFAULT_BASE_URL)
    }

    /// Create from JSON configuration with environment fallback.
    ///
    /// Reads `api_key` (falling back to `GEMINI_API_KEY`) and an optional
    /// `base_url`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
        )?;
        let base_url = config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL);
        Self::with_credential(credential, base_url)
    }

    fn with_credential(credential: ApiCredential, base_url: &str) -> Result<Self, ProviderError> {
        if credential.is_empty() {
            return Err(ProviderError::AuthError);
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    fn request_body(messages: Vec<ChatMessage>, config: &CompletionConfig) -> GeminiRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system_parts.push(Part { text: msg.content }),
                "assistant" => contents.push(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part { text: msg.content }],
                }),
                _ => contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: msg.content }],
                }),
            }
        }

        GeminiRequest {
            system_instruction: (!system_parts.is_empty()).then(|| Content {
                role: None,
                parts: system_parts,
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_tokens,
                response_mime_type: config.response_format.mime_type(),
            },
        }
    }

    async fn send(
        &self,
        url: String,
        request: &GeminiRequest,
        timeout: Duration,
        whole_body: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(url)
            .header("x-goog-api-key", self.credential.expose())
            .json(request);
        // Streams may outlive the timeout; only the headers are bounded then
        if whole_body {
            builder = builder.timeout(timeout);
        }

        let response = tokio::time::timeout(timeout, builder.send())
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

/// Gemini request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

/// Gemini response format; each streamed event has the same shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = Self::request_body(messages, config);
        let response = self
            .send(
                self.endpoint(&config.model, "generateContent"),
                &request,
                config.timeout,
                true,
            )
            .await?;

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body.text();
        let usage = body
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage,
            model: body.model_version.unwrap_or_else(|| config.model.clone()),
            stop_reason: body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.finish_reason),
        })
    }

    async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<FragmentStream, ProviderError> {
        let request = Self::request_body(messages, config);
        let response = self
            .send(
                self.endpoint(&config.model, "streamGenerateContent?alt=sse"),
                &request,
                config.timeout,
                false,
            )
            .await?;

        let fragments = SseDataStream::new(response.bytes_stream()).filter_map(|event| async move {
            match event {
                Ok(data) => match serde_json::from_str::<GeminiResponse>(&data) {
                    Ok(parsed) => {
                        let text = parsed.text();
                        (!text.is_empty()).then_some(Ok(text))
                    }
                    Err(e) => Some(Err(ProviderError::ParseError(e.to_string()))),
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(fragments))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Factory for [`GeminiProvider`].
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if let Some(base_url) = config.get("base_url") {
            let base_url = base_url.as_str().ok_or_else(|| {
                ProviderError::NotConfigured("base_url must be a string".to_string())
            })?;
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ProviderError::NotConfigured(format!(
                    "base_url must be http(s): {}",
                    base_url
                )));
            }
        }
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' or {}",
                GEMINI_API_KEY_ENV
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ResponseFormat;

    #[test]
    fn test_debug_redacts_key() {
        let provider = GeminiProvider::new("AIza-secret-value").unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("AIza-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            GeminiProvider::new(""),
            Err(ProviderError::AuthError)
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let config = CompletionConfig {
            response_format: ResponseFormat::Json,
            ..CompletionConfig::default()
        };
        let request = GeminiProvider::request_body(
            vec![
                ChatMessage::system("compare"),
                ChatMessage::user("answer"),
                ChatMessage::assistant("earlier"),
            ],
            &config,
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "compare");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["topK"], 64);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "capital "}, {"text": "of France"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), "capital of France");
        assert_eq!(parsed.usage_metadata.unwrap().candidates_token_count, 3);
    }

    #[test]
    fn test_response_without_candidates() {
        let parsed: GeminiResponse = serde_json::from_str(r#"{"promptFeedback": {}}"#).unwrap();
        assert_eq!(parsed.text(), "");
    }

    #[test]
    fn test_factory_base_url_override() {
        let config = serde_json::json!({
            "api_key": "k",
            "base_url": "http://localhost:8080/v1beta/"
        });
        let provider = GeminiProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080/v1beta");
        assert_eq!(
            provider.endpoint("gemini-1.5-flash", "generateContent"),
            "http://localhost:8080/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_factory_validate() {
        let factory = GeminiProviderFactory;
        assert!(factory
            .validate_config(&serde_json::json!({"api_key": "k"}))
            .is_ok());
        assert!(factory
            .validate_config(&serde_json::json!({"api_key": "k", "base_url": "ftp://x"}))
            .is_err());
    }
}

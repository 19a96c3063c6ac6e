//! AI completion provider
//!
//! Callers reserve a quota use before calling [`AiProvider::complete`] and give
//! it back when the call fails. Failed calls are never retried here; a
//! malformed answer is surfaced so the user can try again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use vendeai_shared::Capability;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AiError {
    /// The model answered, but not in the declared shape
    #[error("malformed AI response: {0}")]
    MalformedResponse(String),

    #[error("AI provider unavailable: {0}")]
    Unavailable(String),

    #[error("AI provider rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiRequest {
    /// Feature the prompt belongs to; gated by plan
    pub feature: Capability,
    pub prompt: String,
    /// JSON schema the answer must follow; plain text when absent
    #[serde(default, rename = "schema")]
    pub response_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum AiResponse {
    Text(String),
    Json(Value),
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse, AiError>;
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Google Gemini `generateContent` client
#[derive(Clone)]
pub struct GeminiProvider {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AiError> {
        Self::with_base_url(api_key, model, GEMINI_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AiError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn body(request: &AiRequest) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        if let Some(schema) = &request.response_schema {
            body["generationConfig"] = json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            });
        }
        body
    }
}

/// Drop a ```json fence some models wrap around JSON answers
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl AiProvider for GeminiProvider {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse, AiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| AiError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(AiError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AiError::Rejected(format!("status {status}: {detail}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .ok_or_else(|| AiError::MalformedResponse("no candidates".to_string()))?;

        tracing::debug!(
            feature = ?request.feature,
            chars = text.len(),
            "AI completion received"
        );

        if request.response_schema.is_none() {
            return Ok(AiResponse::Text(text));
        }
        serde_json::from_str(strip_code_fence(&text))
            .map(AiResponse::Json)
            .map_err(|e| AiError::MalformedResponse(format!("answer is not JSON: {e}")))
    }
}

//! Thin client for OpenAI-compatible `/embeddings` and `/chat/completions`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Request timeout for every LLM call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for LLM calls. Collaborators convert it to `None` or an empty
/// result before returning.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Empty response")]
    Empty,
}

/// One chat turn sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatTurn<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object",
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Shared HTTP client for one OpenAI-compatible endpoint.
pub struct LlmClient {
    api_key: Zeroizing<String>,
    base_url: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            api_key: Zeroizing::new(api_key.unwrap_or_default().to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}{path}", self.base_url));
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key.as_str()));
        }
        req
    }

    async fn send<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .post(path)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }
        Ok(resp)
    }

    /// Run a chat completion and return the first choice's trimmed text.
    pub async fn chat(&self, request: &ChatCompletion<'_>) -> Result<String, LlmError> {
        let resp = self.send("/chat/completions", request).await?;
        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(content)
    }

    /// Embed `inputs` in one request.
    ///
    /// The output has one slot per input, in input order. Slots the provider
    /// left out or returned empty are `None`.
    pub async fn embeddings(
        &self,
        model: &str,
        inputs: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .send(
                "/embeddings",
                &EmbedRequest {
                    model,
                    input: inputs,
                },
            )
            .await?;
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut out = vec![None; inputs.len()];
        for (position, data) in body.data.into_iter().enumerate() {
            let slot = data.index.unwrap_or(position);
            if slot < out.len() && !data.embedding.is_empty() {
                out[slot] = Some(data.embedding);
            }
        }
        debug!(
            inputs = inputs.len(),
            embedded = out.iter().filter(|e| e.is_some()).count(),
            "Embedding request finished"
        );
        Ok(out)
    }
}

/// First `max` chars of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max` chars of `text`.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

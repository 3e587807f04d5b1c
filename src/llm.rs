//! Chat-completion client for OpenAI-compatible endpoints (Perplexity, Lovable AI gateway).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Authentication error")]
    Auth,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Invalid JSON in model output: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole { System, User, Assistant }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self { Self { role: ChatRole::System, content: content.into() } }
    pub fn user(content: impl Into<String>) -> Self { Self { role: ChatRole::User, content: content.into() } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<LlmResponse, LlmError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice { message: ChatMessage }

#[derive(Deserialize)]
struct CompletionUsage { total_tokens: u32 }

pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatCompletionsProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
        }
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest { model: &self.model, messages: &messages, temperature: self.temperature };
        tracing::debug!(model = %self.model, messages = messages.len(), "sending chat completion");

        let response = self.client.post(&url).bearer_auth(&self.api_key).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Auth,
                429 => LlmError::RateLimited,
                code => LlmError::Api { status: code, body },
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed.choices.into_iter().next().map(|c| c.message.content).filter(|c| !c.trim().is_empty()).ok_or(LlmError::EmptyResponse)?;
        Ok(LlmResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

/// Returns the outermost JSON object or array in `text`, tolerating prose and code fences around it.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(&['{', '['][..])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parses the JSON payload of a model answer into `T`.
pub fn parse_json_answer<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let json = extract_json(text).ok_or_else(|| LlmError::InvalidJson("no JSON found".to_string()))?;
    serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::Mutex;

    /// Provider that replays canned answers, or fails when none is left.
    pub(crate) struct ScriptedProvider { pub answers: Mutex<Vec<String>>, pub calls: Mutex<u32> }

    impl ScriptedProvider {
        pub(crate) fn new(answers: &[&str]) -> Self {
            Self { answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()), calls: Mutex::new(0) }
        }
        pub(crate) fn calls(&self) -> u32 { *self.calls.lock().unwrap() }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_completion(&self, _messages: Vec<ChatMessage>) -> Result<LlmResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            match self.answers.lock().unwrap().pop() {
                Some(content) => Ok(LlmResponse { content, model: "scripted".into(), tokens_used: None }),
                None => Err(LlmError::RateLimited),
            }
        }
    }

    #[test]
    fn test_extract_json_from_fenced_answer() {
        let text = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nThanks";
        assert_eq!(extract_json(text), Some("{\"a\": [1, 2]}"));
        assert_eq!(extract_json("[{\"x\":1}]"), Some("[{\"x\":1}]"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_json_answer_reports_bad_json() {
        let err = parse_json_answer::<serde_json::Value>("{not json}").unwrap_err();
        assert!(matches!(err, LlmError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_chat_completion_against_local_endpoint() {
        let app = Router::new().route("/v1/chat/completions", post(|Json(body): Json<serde_json::Value>| async move {
            assert_eq!(body["model"], "sonar");
            assert_eq!(body["messages"][0]["role"], "system");
            Json(serde_json::json!({
                "model": "sonar",
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}],
                "usage": {"total_tokens": 42}
            }))
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider = ChatCompletionsProvider::new(reqwest::Client::new(), format!("http://{}/v1/", addr), "key", "sonar");
        let answer = provider.chat_completion(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(answer.content, "{\"ok\": true}");
        assert_eq!(answer.tokens_used, Some(42));
    }

    #[tokio::test]
    async fn test_chat_completion_maps_auth_failure() {
        let app = Router::new().route("/chat/completions", post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider = ChatCompletionsProvider::new(reqwest::Client::new(), format!("http://{}", addr), "key", "m");
        let err = provider.chat_completion(vec![ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth));
    }
}

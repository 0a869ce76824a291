//! Chat model abstraction.
//!
//! The pipeline makes at most two kinds of generation calls: the intent
//! extraction fallback and the final grounded answer. Both go through the
//! [`ChatModel`] trait so tests can substitute scripted models.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat turn. Also the shape of transcript turns supplied by the
/// chat-history collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the messages and return the assistant's reply text.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;
}

/// Chat client for Ollama's `POST /api/chat` (non-streaming).
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OllamaChat::new(config)?))
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ModelOptions>,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    message: ChatMessage,
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let body = ChatRequestBody {
            model: &options.model,
            messages,
            stream: false,
            options: options.temperature.map(|temperature| ModelOptions { temperature }),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::Upstream(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama chat error {}: {}", status, body_text);
        }

        let parsed: ChatResponseBody = response.json().await?;
        Ok(parsed.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("aturan"), ChatMessage::user("halo")];
        let body = ChatRequestBody {
            model: "qwen3:1.7b",
            messages: &messages,
            stream: false,
            options: Some(ModelOptions { temperature: 0.1 }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "halo");
        assert_eq!(json["stream"], false);
        assert!(json["options"]["temperature"].is_number());
    }

    #[test]
    fn test_request_body_omits_options() {
        let body = ChatRequestBody {
            model: "m",
            messages: &[],
            stream: false,
            options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_response_body_parses() {
        let raw = r#"{"model":"m","message":{"role":"assistant","content":"Halo!"},"done":true}"#;
        let parsed: ChatResponseBody = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content, "Halo!");
        assert_eq!(parsed.message.role, ChatRole::Assistant);
    }
}

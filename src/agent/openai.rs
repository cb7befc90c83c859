//! Chat-completion dialogue backend

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::history::{ConversationHistory, Role};
use crate::voice::OPENAI_API_BASE;
use crate::{Error, Result};

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Atlas, a helpful voice assistant. Keep responses concise and conversational.";

/// Produces a reply to the latest user text
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Reply to `user_text` given prior turns
    ///
    /// # Errors
    ///
    /// Returns `Error::Dialogue` if the backend call fails
    async fn reply(&self, history: &ConversationHistory, user_text: &str) -> Result<String>;
}

/// Sampling parameters for chat completions
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Talks to an `OpenAI`-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: SecretString,
    api_base: String,
    options: ChatOptions,
}

impl OpenAiChat {
    /// Create a chat backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, options: ChatOptions, api_base: Option<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            api_base: api_base.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            options,
        })
    }

    fn build_request<'a>(
        &'a self,
        history: &'a ConversationHistory,
        user_text: &'a str,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.options.system_prompt,
        });
        messages.extend(history.turns().map(|t| ChatMessage {
            role: t.role.as_str(),
            content: &t.text,
        }));
        messages.push(ChatMessage {
            role: Role::User.as_str(),
            content: user_text,
        });

        ChatRequest {
            model: &self.options.model,
            messages,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        }
    }
}

#[async_trait]
impl DialogueBackend for OpenAiChat {
    async fn reply(&self, history: &ConversationHistory, user_text: &str) -> Result<String> {
        let request = self.build_request(history, user_text);

        tracing::debug!(
            model = %self.options.model,
            messages = request.messages.len(),
            "requesting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Dialogue(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion error");
            return Err(Error::Dialogue(format!("chat API error {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Dialogue(e.to_string()))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Dialogue("empty completion".to_string()))?;

        tracing::info!(reply = %reply, "assistant reply");
        Ok(reply)
    }
}

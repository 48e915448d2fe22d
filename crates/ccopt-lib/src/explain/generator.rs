//! Text-generation collaborator
//!
//! The cache only needs `generate(prompt, timeout)`. The reference client
//! talks to an OpenAI-compatible chat-completions endpoint.

use crate::error::OptimizerError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Failures reported by a text generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// Not configured, not authorised, or not reachable in time
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    /// Any other failure; worth retrying
    #[error("generation failed: {0}")]
    Failed(String),
}

impl From<GenerateError> for OptimizerError {
    fn from(e: GenerateError) -> Self {
        match e {
            GenerateError::Unavailable(msg) => OptimizerError::Unavailable(msg),
            GenerateError::Failed(msg) => OptimizerError::Generation(msg),
        }
    }
}

/// Produces text for a prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerateError>;
}

/// Settings for [`OpenAiGenerator`]
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Instructions sent as the system message with every prompt
    pub system_prompt: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 200,
            temperature: 0.7,
            system_prompt: super::prompt::SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
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

/// Chat-completions client
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: Url,
    config: GeneratorConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GenerateError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .map_err(|e| GenerateError::Failed(format!("invalid base URL {}: {}", config.base_url, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| GenerateError::Failed(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerateError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GenerateError::Unavailable("API key not configured".to_string()))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GenerateError::Unavailable(e.to_string())
                } else {
                    GenerateError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GenerateError::Unavailable(format!("generator rejected credentials ({})", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerateError::Failed(format!("API error ({}): {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Failed(format!("failed to parse response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GenerateError::Failed("empty completion".to_string()))?;

        debug!(model = %self.config.model, chars = text.len(), "Generated explanation");
        Ok(text)
    }
}

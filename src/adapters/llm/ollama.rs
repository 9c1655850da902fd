//! Local Ollama chat-completion enhancer. No API key; talks to a
//! user-configured local endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::OllamaConfig;
use crate::error::{CoreError, Result};
use crate::ports::enhancer::EnhancerPort;

const ENHANCE_PROMPT: &str =
    "Clean up this dictated text: fix punctuation and obvious mis-transcriptions, \
     but preserve the speaker's words and meaning. Return only the corrected text.";

pub struct OllamaEnhancer {
    client: Client,
    config: OllamaConfig,
}

impl OllamaEnhancer {
    pub fn new(config: OllamaConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build Ollama HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl EnhancerPort for OllamaEnhancer {
    async fn enhance(&self, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ENHANCE_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::EnhancerFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::EnhancerFailure(format!(
                "Ollama enhance failed ({status}): {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EnhancerFailure(e.to_string()))?;
        Ok(parsed.message.content)
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

//! OpenAI chat-completion enhancer, grounded directly on the teacher's
//! `adapters/services/llm/openai.rs`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::OpenAiLlmConfig;
use crate::error::{CoreError, Result};
use crate::ports::enhancer::EnhancerPort;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const ENHANCE_PROMPT: &str =
    "Clean up this dictated text: fix punctuation and obvious mis-transcriptions, \
     but preserve the speaker's words and meaning. Return only the corrected text.";

pub struct OpenAiEnhancer {
    client: Client,
    config: OpenAiLlmConfig,
}

impl OpenAiEnhancer {
    pub fn new(config: OpenAiLlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build OpenAI HTTP client");
        Self { client, config }
    }
}

#[async_trait]
impl EnhancerPort for OpenAiEnhancer {
    async fn enhance(&self, text: &str) -> Result<String> {
        let request = ChatCompletionRequest {
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
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{OPENAI_API_BASE}/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::EnhancerFailure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::EnhancerFailure(format!(
                "OpenAI enhance failed ({status}): {body}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EnhancerFailure(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::EnhancerFailure("empty choices".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

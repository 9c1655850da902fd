//! OpenAI-compatible Whisper one-shot recognizer.
//!
//! Grounded on the teacher's `assemblyai.rs` upload-then-poll shape,
//! simplified: Whisper's single `POST /audio/transcriptions` multipart
//! request returns the transcript synchronously, so there is no polling
//! loop. Implements only `transcribe_once`; `connect` is unreachable in a
//! correctly configured Pipeline (see `RecognizerPort::supports_streaming`).

use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::domain::WhisperConfig;
use crate::error::{CoreError, Result};
use crate::ports::recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

pub struct WhisperRecognizer {
    client: Client,
    config: WhisperConfig,
}

impl WhisperRecognizer {
    pub fn new(config: WhisperConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build Whisper HTTP client");
        Self { client, config }
    }

    fn encode_wav(pcm: &[i16]) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| CoreError::Internal(format!("wav encode failed: {e}")))?;
            for sample in pcm {
                writer
                    .write_sample(*sample)
                    .map_err(|e| CoreError::Internal(format!("wav encode failed: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| CoreError::Internal(format!("wav encode failed: {e}")))?;
        }
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl RecognizerPort for WhisperRecognizer {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)> {
        Err(CoreError::ProtocolError(
            "Whisper does not support streaming connect; use transcribe_once".to_string(),
        ))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn transcribe_once(&self, pcm: &[i16]) -> Result<String> {
        log::info!(
            "submitting {} ms of audio to Whisper at {}",
            pcm.len() / 16,
            self.config.endpoint
        );

        let wav_bytes = Self::encode_wav(pcm)?;
        let part = Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut form = Form::new().part("file", part).text("model", self.config.model.clone());
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(CoreError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::NetworkError(format!(
                "Whisper request failed ({status}): {body}"
            )));
        }

        let parsed: WhisperResponse = response.json().await.map_err(CoreError::from)?;
        Ok(parsed.text)
    }

    fn provider_name(&self) -> &'static str {
        "openai-whisper"
    }
}

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

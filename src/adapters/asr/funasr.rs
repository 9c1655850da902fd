//! Self-hosted FunASR streaming WebSocket recognizer.
//!
//! FunASR's reference WebSocket server expects one JSON control frame to
//! open the stream (`is_speaking: true`), binary PCM frames for audio, a
//! JSON control frame to signal end-of-utterance (`is_speaking: false`),
//! and returns incremental `{"mode": "2pass-online"|"2pass-offline", ...}`
//! result frames. No authentication handshake — it is typically reached
//! over a private network. Same connect/split/receiver-task shape as
//! `qwen.rs`/`paraformer.rs`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::domain::{AudioFrame, FunAsrConfig};
use crate::error::{CoreError, Result};
use crate::ports::recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

pub struct FunAsrRecognizer {
    config: FunAsrConfig,
}

impl FunAsrRecognizer {
    pub fn new(config: FunAsrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecognizerPort for FunAsrRecognizer {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)> {
        log::info!("connecting to FunASR server: {}", self.config.endpoint);

        let (ws_stream, _) = connect_async(&self.config.endpoint)
            .await
            .map_err(|e| CoreError::NetworkError(format!("FunASR connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(
                serde_json::to_string(&ControlFrame {
                    is_speaking: true,
                    chunk_size: [5, 10, 5],
                    wav_format: "pcm",
                    wav_name: "vhisper",
                    audio_fs: 16_000,
                    itn: true,
                    mode: "2pass",
                    hotwords: None,
                })
                .map_err(CoreError::from)?,
            ))
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let frame: ResultFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(e) => {
                                log::debug!("unparseable FunASR frame: {e}");
                                continue;
                            }
                        };
                        let event = match frame.mode.as_str() {
                            "2pass-online" => RecognizerEvent::Partial {
                                confirmed: String::new(),
                                stash: frame.text,
                            },
                            "2pass-offline" | "offline" => RecognizerEvent::Final { text: frame.text },
                            _ => continue,
                        };
                        let is_final = matches!(event, RecognizerEvent::Final { .. });
                        if event_tx.send(event).await.is_err() || is_final {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        let session = FunAsrSession {
            write: Arc::new(Mutex::new(write)),
        };
        Ok((Box::new(session), event_rx))
    }

    fn provider_name(&self) -> &'static str {
        "funasr"
    }
}

struct FunAsrSession {
    write: Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>,
}

#[async_trait]
impl RecognizerSession for FunAsrSession {
    async fn send_audio(&self, chunk: &AudioFrame) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(chunk.to_bytes()))
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))
    }

    async fn send_eos(&self) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(
                serde_json::to_string(&EosFrame { is_speaking: false }).map_err(CoreError::from)?,
            ))
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))
    }

    async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
    }
}

#[derive(Serialize)]
struct ControlFrame {
    is_speaking: bool,
    chunk_size: [u32; 3],
    wav_format: &'static str,
    wav_name: &'static str,
    audio_fs: u32,
    itn: bool,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hotwords: Option<String>,
}

#[derive(Serialize)]
struct EosFrame {
    is_speaking: bool,
}

#[derive(Deserialize)]
struct ResultFrame {
    mode: String,
    text: String,
}

//! DashScope Paraformer-realtime streaming recognizer.
//!
//! Same run-task/result-generated/task-finished envelope as `qwen.rs`
//! (both are DashScope WebSocket services), but Paraformer's
//! `sentence.sentence_end` flag marks a confirmed segment boundary mid
//! stream, which Qwen's protocol does not expose — so unlike Qwen,
//! Paraformer frames can themselves promote `stash` into `confirmed`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::domain::{AudioFrame, ParaformerConfig};
use crate::error::{CoreError, Result};
use crate::ports::recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

const PARAFORMER_REALTIME_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";

pub struct ParaformerRecognizer {
    config: ParaformerConfig,
}

impl ParaformerRecognizer {
    pub fn new(config: ParaformerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecognizerPort for ParaformerRecognizer {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)> {
        log::info!("connecting to Paraformer-realtime: {PARAFORMER_REALTIME_URL}");

        let mut request = PARAFORMER_REALTIME_URL
            .into_client_request()
            .map_err(|e| CoreError::ProtocolError(e.to_string()))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("bearer {}", self.config.api_key)
                .parse()
                .map_err(|_| CoreError::AuthError("invalid api key header".to_string()))?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| CoreError::NetworkError(format!("Paraformer connect failed: {e}")))?;

        let (write, mut read) = ws_stream.split();
        let task_id = format!("vhisper-{}", monotonic_id());

        let mut write = write;
        write
            .send(Message::Text(
                serde_json::to_string(&RunTaskFrame {
                    header: Header {
                        action: "run-task",
                        task_id: task_id.clone(),
                        streaming: "duplex",
                    },
                    payload: RunTaskPayload {
                        model: self.config.model.clone(),
                        parameters: RunTaskParameters {
                            sample_rate: 16_000,
                            format: "pcm",
                            language_hints: self.config.language.clone().into_iter().collect(),
                        },
                    },
                })
                .map_err(CoreError::from)?,
            ))
            .await
            .map_err(CoreError::from)?;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) {
                        match frame.header.event.as_str() {
                            "task-started" => break,
                            "task-failed" => {
                                return Err(CoreError::AuthError(
                                    frame
                                        .header
                                        .error_message
                                        .unwrap_or_else(|| "task-failed".to_string()),
                                ))
                            }
                            _ => continue,
                        }
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(CoreError::NetworkError(e.to_string())),
                None => {
                    return Err(CoreError::NetworkError(
                        "connection closed before ack".to_string(),
                    ))
                }
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let frame: ServerFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(e) => {
                                log::debug!("unparseable Paraformer frame: {e}");
                                continue;
                            }
                        };
                        match frame.header.event.as_str() {
                            "result-generated" => {
                                if let Some(output) = frame.payload.and_then(|p| p.output) {
                                    let event = if output.sentence.sentence_end {
                                        RecognizerEvent::Partial {
                                            confirmed: output.sentence.text,
                                            stash: String::new(),
                                        }
                                    } else {
                                        RecognizerEvent::Partial {
                                            confirmed: String::new(),
                                            stash: output.sentence.text,
                                        }
                                    };
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            "task-finished" => {
                                let text = frame
                                    .payload
                                    .and_then(|p| p.output)
                                    .map(|o| o.sentence.text)
                                    .unwrap_or_default();
                                let _ = event_tx.send(RecognizerEvent::Final { text }).await;
                                break;
                            }
                            "task-failed" => {
                                log::warn!(
                                    "Paraformer task failed: {:?}",
                                    frame.header.error_message
                                );
                                break;
                            }
                            _ => {}
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        let session = ParaformerSession {
            write: Arc::new(Mutex::new(write)),
            task_id,
        };
        Ok((Box::new(session), event_rx))
    }

    fn provider_name(&self) -> &'static str {
        "dashscope-paraformer"
    }
}

struct ParaformerSession {
    write: Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>,
    task_id: String,
}

#[async_trait]
impl RecognizerSession for ParaformerSession {
    async fn send_audio(&self, chunk: &AudioFrame) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(chunk.to_bytes()))
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))
    }

    async fn send_eos(&self) -> Result<()> {
        let frame = FinishTaskFrame {
            header: Header {
                action: "finish-task",
                task_id: self.task_id.clone(),
                streaming: "duplex",
            },
            payload: FinishTaskPayload {
                input: serde_json::Value::Object(Default::default()),
            },
        };
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(
                serde_json::to_string(&frame).map_err(CoreError::from)?,
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

fn monotonic_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[derive(Serialize)]
struct RunTaskFrame {
    header: Header,
    payload: RunTaskPayload,
}

#[derive(Serialize)]
struct Header {
    action: &'static str,
    task_id: String,
    streaming: &'static str,
}

#[derive(Serialize)]
struct RunTaskPayload {
    model: String,
    parameters: RunTaskParameters,
}

#[derive(Serialize)]
struct RunTaskParameters {
    sample_rate: u32,
    format: &'static str,
    language_hints: Vec<String>,
}

#[derive(Serialize)]
struct FinishTaskFrame {
    header: Header,
    payload: FinishTaskPayload,
}

#[derive(Serialize)]
struct FinishTaskPayload {
    input: serde_json::Value,
}

#[derive(Deserialize)]
struct ServerHeader {
    event: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct ServerFrame {
    header: ServerHeader,
    #[serde(default)]
    payload: Option<ServerPayload>,
}

#[derive(Deserialize)]
struct ServerPayload {
    output: Option<ServerOutput>,
}

#[derive(Deserialize)]
struct ServerOutput {
    sentence: ServerSentence,
}

#[derive(Deserialize)]
struct ServerSentence {
    text: String,
    #[serde(default)]
    sentence_end: bool,
}

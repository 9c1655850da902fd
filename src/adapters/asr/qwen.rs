//! DashScope Qwen3-ASR realtime streaming recognizer.
//!
//! Connects over WebSocket, authenticates via the `Authorization` header, and
//! exchanges DashScope's run-task / result-generated / task-finished event
//! envelope. Shape grounded on the teacher's `deepgram_streaming.rs`
//! connect/split/receiver-task structure; wire framing follows DashScope's
//! own protocol rather than Deepgram's flat JSON.

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

use crate::domain::{AudioFrame, QwenConfig};
use crate::error::{CoreError, Result};
use crate::ports::recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

const QWEN_REALTIME_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";

pub struct QwenRecognizer {
    config: QwenConfig,
}

impl QwenRecognizer {
    pub fn new(config: QwenConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RecognizerPort for QwenRecognizer {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)> {
        log::info!("connecting to Qwen3-ASR realtime: {QWEN_REALTIME_URL}");

        let mut request = QWEN_REALTIME_URL
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
            .map_err(|e| CoreError::NetworkError(format!("Qwen3-ASR connect failed: {e}")))?;

        let (write, mut read) = ws_stream.split();
        let task_id = format!("vhisper-{}", uuid_like());

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
                            language: self.config.language.clone(),
                        },
                    },
                })
                .map_err(CoreError::from)?,
            ))
            .await
            .map_err(CoreError::from)?;

        // Wait for task-started before returning, per spec's "returns once
        // the server has acknowledged readiness".
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
                None => return Err(CoreError::NetworkError("connection closed before ack".to_string())),
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let recv_task_id = task_id.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let frame: ServerFrame = match serde_json::from_str(&text) {
                            Ok(f) => f,
                            Err(e) => {
                                log::debug!("unparseable Qwen3-ASR frame: {e}");
                                continue;
                            }
                        };
                        match frame.header.event.as_str() {
                            "result-generated" => {
                                if let Some(output) = frame.payload.and_then(|p| p.output) {
                                    // DashScope does not mark a confirmed/unconfirmed split
                                    // within one result-generated frame: the whole growing
                                    // hypothesis is unconfirmed until task-finished promotes
                                    // it to a Final.
                                    let event = RecognizerEvent::Partial {
                                        confirmed: String::new(),
                                        stash: output.sentence.text.clone(),
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
                                    "Qwen3-ASR task {recv_task_id} failed: {:?}",
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

        let session = QwenSession {
            write: Arc::new(Mutex::new(write)),
            task_id,
        };
        Ok((Box::new(session), event_rx))
    }

    fn provider_name(&self) -> &'static str {
        "qwen"
    }
}

struct QwenSession {
    write: Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>,
    task_id: String,
}

#[async_trait]
impl RecognizerSession for QwenSession {
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
            payload: FinishTaskPayload { input: serde_json::Value::Object(Default::default()) },
        };
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(serde_json::to_string(&frame).map_err(CoreError::from)?))
            .await
            .map_err(|e| CoreError::NetworkError(e.to_string()))
    }

    async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
        let _ = write.close().await;
    }
}

fn uuid_like() -> String {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
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
}

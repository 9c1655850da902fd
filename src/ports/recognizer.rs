use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::AudioFrame;
use crate::error::Result;

/// Normalized recognizer hypothesis, after per-provider wire parsing.
/// Heartbeats and other non-transcription frames never reach this type —
/// adapters consume them silently.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Partial { confirmed: String, stash: String },
    Final { text: String },
}

/// One live duplex connection to a streaming recognizer. Returned by
/// `RecognizerPort::connect`. The event stream handed back alongside it is a
/// lazy, finite, non-restartable sequence that ends when `close()` is called
/// or the server closes the socket.
#[async_trait]
pub trait RecognizerSession: Send + Sync {
    /// Non-blocking enqueue toward the server. Backpressure is handled by a
    /// bounded internal queue; overflow surfaces as `NetworkError`.
    async fn send_audio(&self, chunk: &AudioFrame) -> Result<()>;

    /// Signal end-of-utterance. The server is expected to emit one final
    /// hypothesis and close.
    async fn send_eos(&self) -> Result<()>;

    /// Tear down immediately, discarding unsent audio and unread events.
    /// Idempotent.
    async fn close(&self);
}

/// Provider-polymorphic streaming ASR client. Only the streaming providers
/// (Qwen, Paraformer, FunASR) implement `connect`; Whisper implements only
/// `transcribe_once` and returns `ProtocolError` from `connect` if ever
/// mistakenly driven through the streaming path.
#[async_trait]
pub trait RecognizerPort: Send + Sync {
    /// Opens a duplex channel, performs handshake/authentication, and
    /// returns once the server has acknowledged readiness. Fails with
    /// `AuthError`, `NetworkError`, or `ProtocolError`.
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)>;

    /// True for providers that implement `connect`/streaming. Whisper
    /// returns `false` here; the Pipeline routes it through
    /// `transcribe_once` instead.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// One-shot transcription of a buffered utterance. Only Whisper
    /// implements this for real; streaming providers return
    /// `ProtocolError` since they have no non-streaming mode.
    async fn transcribe_once(&self, _pcm: &[i16]) -> Result<String> {
        Err(crate::error::CoreError::ProtocolError(
            "provider does not support one-shot transcription".to_string(),
        ))
    }

    fn provider_name(&self) -> &'static str;
}

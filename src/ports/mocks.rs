//! Test doubles for `RecognizerPort`/`AudioSourcePort`, driven by scripted
//! event sequences rather than real I/O. Mirrors the teacher's
//! `ports::mocks::MockStorage` shape: `Arc<Mutex<..>>` interior state behind
//! a `Clone + Default`-able handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::domain::AudioFrame;
use crate::error::{CoreError, Result};
use crate::ports::audio::AudioSourcePort;
use crate::ports::recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

/// What one scripted `connect()` call should do: either fail outright, or
/// succeed and emit `immediate` events as soon as the Session is up (this is
/// how a real provider's server-side VAD final arrives, unprompted by any
/// client EOS), reserving `on_eos` — typically the terminal `Final` — for
/// delivery only once the pipeline calls `send_eos()`, mirroring how a real
/// streaming provider responds to the client's end-of-speech signal rather
/// than emitting its answer up front.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    pub immediate: Vec<RecognizerEvent>,
    pub on_eos: Option<RecognizerEvent>,
}

impl ScriptedSession {
    pub fn new(immediate: Vec<RecognizerEvent>, on_eos: Option<RecognizerEvent>) -> Self {
        Self { immediate, on_eos }
    }

    /// Convenience for scripts that only care about events delivered up
    /// front (no gating on EOS).
    pub fn immediate(events: Vec<RecognizerEvent>) -> Self {
        Self { immediate: events, on_eos: None }
    }
}

#[derive(Debug, Clone)]
pub enum ScriptedConnect {
    Fail(MockFailure),
    Succeed(ScriptedSession),
}

#[derive(Debug, Clone)]
pub enum MockFailure {
    Auth,
    Network,
}

impl From<MockFailure> for CoreError {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Auth => CoreError::AuthError("mock auth rejected".to_string()),
            MockFailure::Network => CoreError::NetworkError("mock connect refused".to_string()),
        }
    }
}

/// A `RecognizerPort` driven entirely by a pre-scripted sequence of connect
/// outcomes, one consumed per `connect()` call (so reconnect scenarios can
/// script a different outcome for each successive Session).
#[derive(Clone, Default)]
pub struct MockRecognizer {
    script: Arc<Mutex<VecDeque<ScriptedConnect>>>,
    connect_count: Arc<AtomicU64>,
}

impl MockRecognizer {
    pub fn new(script: Vec<ScriptedConnect>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            connect_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }
}

/// Holds the sending half of the event channel and whatever event is still
/// owed on EOS, so `send_eos`/`close` can be told apart: EOS flushes the
/// reserved event (if any) before the channel closes, `close` just drops
/// everything (cancellation discards unsent server output).
struct MockSession {
    tx: AsyncMutex<Option<mpsc::Sender<RecognizerEvent>>>,
    pending_final: AsyncMutex<Option<RecognizerEvent>>,
}

#[async_trait]
impl RecognizerSession for MockSession {
    async fn send_audio(&self, _chunk: &AudioFrame) -> Result<()> {
        Ok(())
    }

    async fn send_eos(&self) -> Result<()> {
        let reserved = self.pending_final.lock().await.take();
        if let Some(event) = reserved {
            if let Some(tx) = self.tx.lock().await.as_ref() {
                let _ = tx.send(event).await;
            }
        }
        // Dropping the sender lets the event pump's `recv()` observe the
        // channel closing once it has drained everything already queued.
        *self.tx.lock().await = None;
        Ok(())
    }

    async fn close(&self) {
        *self.pending_final.lock().await = None;
        *self.tx.lock().await = None;
    }
}

#[async_trait]
impl RecognizerPort for MockRecognizer {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognizerEvent>)> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("mock script mutex poisoned")
            .pop_front();
        match next {
            None => Err(CoreError::NetworkError(
                "mock recognizer script exhausted".to_string(),
            )),
            Some(ScriptedConnect::Fail(failure)) => Err(failure.into()),
            Some(ScriptedConnect::Succeed(scripted)) => {
                let capacity = scripted.immediate.len() + scripted.on_eos.is_some() as usize + 1;
                let (tx, rx) = mpsc::channel(capacity);
                for event in scripted.immediate {
                    let _ = tx.send(event).await;
                }
                let session = MockSession {
                    tx: AsyncMutex::new(Some(tx)),
                    pending_final: AsyncMutex::new(scripted.on_eos),
                };
                Ok((Box::new(session), rx))
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// An `AudioSourcePort` that yields silence chunks on a timer-free schedule:
/// the pipeline drives it purely by how many chunks it pulls, so tests don't
/// need to sleep in real time to exercise the audio forwarder.
#[derive(Clone)]
pub struct MockAudioSource {
    inner: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    dropped: Arc<AtomicU64>,
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one frame into the active chunk stream, if capture is running.
    pub async fn push(&self, frame: AudioFrame) {
        let sender = self.inner.lock().expect("mock audio mutex poisoned").clone();
        if let Some(sender) = sender {
            let _ = sender.send(frame).await;
        }
    }

    /// Advances the dropped-frame counter, as a real `AudioSourcePort` would
    /// on hand-off queue overflow, so tests can exercise the
    /// `Event::Warning` telemetry path without a real saturated queue.
    pub fn simulate_drop(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSourcePort for MockAudioSource {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    fn chunks(&self) -> mpsc::Receiver<AudioFrame> {
        let (tx, rx) = mpsc::channel(64);
        *self.inner.lock().expect("mock audio mutex poisoned") = Some(tx);
        rx
    }

    async fn stop(&self) {
        *self.inner.lock().expect("mock audio mutex poisoned") = None;
    }

    fn drain_preroll(&self, _max_ms: u32) -> Vec<i16> {
        Vec::new()
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

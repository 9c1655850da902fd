use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The Pipeline's state. Exactly one of these holds at any moment; transitions
/// are total (see the Pipeline's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Recording,
    Processing,
}

impl PipelineState {
    pub fn as_i32(self) -> i32 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Recording => 1,
            PipelineState::Processing => 2,
        }
    }
}

/// Lock-free mirror of the mutex-guarded pipeline state, so `get_state` never
/// blocks on whatever else the Pipeline's async tasks are doing.
#[derive(Debug)]
pub struct AtomicPipelineState(AtomicI32);

impl AtomicPipelineState {
    pub fn new(initial: PipelineState) -> Self {
        Self(AtomicI32::new(initial.as_i32()))
    }

    pub fn store(&self, state: PipelineState) {
        self.0.store(state.as_i32(), Ordering::SeqCst);
    }

    pub fn load(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lives for the duration of one recognizer connection. A Pipeline may span
/// multiple Sessions per user utterance via auto-reconnect. The coordinator
/// (`pipeline::run_streaming`) owns one of these per live `RecognizerSession`
/// and feeds it every `Partial` it receives, so the confirmed/stash/sequence
/// bookkeeping mandated by `spec.md` §3 lives here rather than being
/// recomputed ad hoc at each call site. The connection's actual send/receive
/// endpoints are the `RecognizerSession` trait object and its paired
/// `mpsc::Receiver<RecognizerEvent>` that the coordinator already tracks
/// alongside this `Session`; duplicating those handles on this struct as
/// well would just be two owners of the same socket.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    /// Provider-issued session id, filled in once the provider's handshake
    /// ack supplies one. Purely diagnostic; plays no role in invariants.
    pub provider_session_id: Option<String>,
    confirmed: Arc<Mutex<String>>,
    stash: Arc<Mutex<String>>,
    /// Count of `Partial`s observed so far in this Session.
    sequence: Arc<AtomicU64>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            provider_session_id: None,
            confirmed: Arc::new(Mutex::new(String::new())),
            stash: Arc::new(Mutex::new(String::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records one `Partial` observation, advancing the sequence counter and
    /// replacing the stored confirmed/stash text. Confirmed text is
    /// append-only within a Session (`spec.md` §3); a `confirmed` that does
    /// not extend the previous value is a protocol anomaly, logged rather
    /// than trusted to roll the stored text backward. Returns the 1-based
    /// sequence number of this Partial within the Session.
    pub fn record_partial(&self, confirmed: &str, stash: &str) -> u64 {
        {
            let mut guard = self.confirmed.lock().expect("session mutex poisoned");
            if !confirmed.starts_with(guard.as_str()) {
                log::warn!(
                    "session {}: confirmed text regressed ({:?} -> {:?}); confirmed must be append-only",
                    self.id,
                    *guard,
                    confirmed,
                );
            }
            *guard = confirmed.to_string();
        }
        *self.stash.lock().expect("session mutex poisoned") = stash.to_string();
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn confirmed_text(&self) -> String {
        self.confirmed.lock().expect("session mutex poisoned").clone()
    }

    pub fn stash_text(&self) -> String {
        self.stash.lock().expect("session mutex poisoned").clone()
    }

    /// Number of `Partial`s observed so far in this Session.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

//! The coordinator: owns the state machine, wires `AudioSource` to
//! `Recognizer`, performs auto-reconnect, buffers pending text for the
//! terminal `stop`, and dispatches events. This is the hard part of the
//! system (see the crate's top-level docs) — no functionality here is
//! optional or simplified relative to the spec.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;

use crate::domain::{AtomicPipelineState, Config, Event, PipelineState, Session};
use crate::error::{CoreError, Result};
use crate::factory::{build_enhancer, build_recognizer};
use crate::ports::{AudioSourcePort, EnhancerPort, RecognizerEvent, RecognizerPort, RecognizerSession};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_millis(500);
const STOP_WATCHDOG: Duration = Duration::from_secs(3);
const ENHANCER_TIMEOUT: Duration = Duration::from_secs(10);
const PREROLL_MS: u32 = 300;
const RECONNECT_MAX_FAILURES: u32 = 3;
const RECONNECT_WINDOW: Duration = Duration::from_secs(2);
const RECONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// `Fn(Event)` invoked from a core-owned worker task. Strings inside the
/// `Event` are owned, so there is nothing for the host to copy here; the
/// FFI shim is what deals with pointer lifetimes (see `ffi.rs`).
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

enum Command {
    Stop,
    Cancel,
}

/// Coordinates one Session's audio forwarding and event pump, and the
/// auto-reconnect loop across Sessions, for the duration of one
/// `start_streaming` call.
pub struct Pipeline {
    config: AsyncMutex<Config>,
    state: Arc<AtomicPipelineState>,
    transition_lock: AsyncMutex<()>,
    generation: Arc<AtomicU64>,
    active_cmd_tx: std::sync::Mutex<Option<mpsc::Sender<Command>>>,
    audio: Arc<dyn AudioSourcePort>,
    recognizer: AsyncMutex<Arc<dyn RecognizerPort>>,
    enhancer: AsyncMutex<Option<Arc<dyn EnhancerPort>>>,
    session_counter: AtomicU64,
}

impl Pipeline {
    pub fn new(config: Config, audio: Arc<dyn AudioSourcePort>) -> Self {
        let recognizer = build_recognizer(&config.asr);
        let enhancer = build_enhancer(&config.llm);
        Self {
            config: AsyncMutex::new(config),
            state: Arc::new(AtomicPipelineState::new(PipelineState::Idle)),
            transition_lock: AsyncMutex::new(()),
            generation: Arc::new(AtomicU64::new(0)),
            active_cmd_tx: std::sync::Mutex::new(None),
            audio,
            recognizer: AsyncMutex::new(recognizer),
            enhancer: AsyncMutex::new(enhancer),
            session_counter: AtomicU64::new(0),
        }
    }

    /// Test-only constructor that injects the `RecognizerPort`/
    /// `EnhancerPort` directly instead of building them from `config.asr`/
    /// `config.llm` via `factory`, so integration tests can drive the
    /// Pipeline against `ports::mocks::MockRecognizer`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn new_for_test(
        config: Config,
        audio: Arc<dyn AudioSourcePort>,
        recognizer: Arc<dyn RecognizerPort>,
        enhancer: Option<Arc<dyn EnhancerPort>>,
    ) -> Self {
        Self {
            config: AsyncMutex::new(config),
            state: Arc::new(AtomicPipelineState::new(PipelineState::Idle)),
            transition_lock: AsyncMutex::new(()),
            generation: Arc::new(AtomicU64::new(0)),
            active_cmd_tx: std::sync::Mutex::new(None),
            audio,
            recognizer: AsyncMutex::new(recognizer),
            enhancer: AsyncMutex::new(enhancer),
            session_counter: AtomicU64::new(0),
        }
    }

    pub fn get_state(&self) -> PipelineState {
        match self.state.load() {
            0 => PipelineState::Idle,
            1 => PipelineState::Recording,
            _ => PipelineState::Processing,
        }
    }

    pub async fn update_config(&self, config: Config) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        if self.get_state() != PipelineState::Idle {
            return Err(CoreError::Busy);
        }
        let recognizer = build_recognizer(&config.asr);
        let enhancer = build_enhancer(&config.llm);
        *self.recognizer.lock().await = recognizer;
        *self.enhancer.lock().await = enhancer;
        *self.config.lock().await = config;
        Ok(())
    }

    /// §4.4: state = Idle precondition; audio device failures are surfaced
    /// synchronously (the device is opened before this call returns),
    /// recognizer auth/network failures are surfaced asynchronously as an
    /// `Error` event (connecting can take up to `CONNECT_TIMEOUT`, and
    /// `start_streaming` must return immediately per spec). Documented as
    /// the resolution to the open question in `spec.md` §8 scenario 4.
    pub async fn start_streaming(self: &Arc<Self>, callback: EventCallback) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        if self.get_state() != PipelineState::Idle {
            return Err(CoreError::Busy);
        }

        self.audio.start().await?;

        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(PipelineState::Recording);

        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        *self.active_cmd_tx.lock().expect("active_cmd_tx poisoned") = Some(cmd_tx);

        let recognizer = self.recognizer.lock().await.clone();
        let enhancer = self.enhancer.lock().await.clone();
        let pipeline = Arc::clone(self);

        if recognizer.supports_streaming() {
            tokio::spawn(run_streaming(pipeline, recognizer, enhancer, callback, my_generation, cmd_rx));
        } else {
            tokio::spawn(run_buffered(pipeline, recognizer, enhancer, callback, my_generation, cmd_rx));
        }

        Ok(())
    }

    /// §4.4: no-op if not Recording. The `Recording → Processing`
    /// transition is observable before this returns; the terminal `Final`
    /// is dispatched later by the coordinator task.
    pub async fn stop_streaming(&self) {
        let _guard = self.transition_lock.lock().await;
        if self.get_state() != PipelineState::Recording {
            return;
        }
        self.state.store(PipelineState::Processing);
        if let Some(tx) = self.active_cmd_tx.lock().expect("active_cmd_tx poisoned").clone() {
            let _ = tx.try_send(Command::Stop);
        }
    }

    /// §4.4/§5: always safe, idempotent, never fails. The state transition
    /// to `Idle` and the invalidation of any in-flight coordinator
    /// (`generation` bump) both happen synchronously here; socket teardown
    /// and worker-task completion happen asynchronously afterward.
    pub fn cancel_streaming(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.store(PipelineState::Idle);
        if let Some(tx) = self
            .active_cmd_tx
            .lock()
            .expect("active_cmd_tx poisoned")
            .take()
        {
            let _ = tx.try_send(Command::Cancel);
        }
    }

    fn still_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn finish(&self, generation: u64) {
        if self.still_current(generation) {
            self.state.store(PipelineState::Idle);
        }
        let mut guard = self.active_cmd_tx.lock().expect("active_cmd_tx poisoned");
        *guard = None;
    }
}

/// Streaming coordinator: Qwen/Paraformer/FunASR. Spans potentially many
/// Sessions (auto-reconnect) for one `start_streaming` call.
async fn run_streaming(
    pipeline: Arc<Pipeline>,
    recognizer: Arc<dyn RecognizerPort>,
    enhancer: Option<Arc<dyn EnhancerPort>>,
    callback: EventCallback,
    generation: u64,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let current_session: Arc<AsyncMutex<Option<Arc<dyn RecognizerSession>>>> =
        Arc::new(AsyncMutex::new(None));
    let current_domain_session: Arc<AsyncMutex<Option<Session>>> = Arc::new(AsyncMutex::new(None));
    let (internal_tx, mut internal_rx) = mpsc::channel::<Internal>(32);

    // One audio forwarder for the whole Recording lifetime; it survives
    // across reconnects by always reading the *current* session out of a
    // shared cell rather than owning a session itself. `chunks()` is
    // non-restartable, so this must be the only place it is ever called
    // for this `start_streaming` invocation. It also owns the dropped-frame
    // watch: `spec.md` §4.1 requires overflow to surface as a `Warning`
    // Event, not an Error, so each pass checks `dropped_frames()` against
    // the last observed count and reports the delta.
    let audio_forwarder = {
        let audio = Arc::clone(&pipeline.audio);
        let current_session = Arc::clone(&current_session);
        let internal_tx = internal_tx.clone();
        let pipeline = Arc::clone(&pipeline);
        let callback = Arc::clone(&callback);
        tokio::spawn(async move {
            let mut rx = audio.chunks();
            let mut last_dropped = audio.dropped_frames();
            while let Some(frame) = rx.recv().await {
                let dropped = audio.dropped_frames();
                if dropped > last_dropped {
                    let delta = dropped - last_dropped;
                    last_dropped = dropped;
                    if pipeline.still_current(generation) {
                        callback(Event::Warning {
                            message: format!(
                                "audio queue overflow: dropped {delta} frame(s) ({dropped} total)"
                            ),
                        });
                    }
                }
                let maybe_session = current_session.lock().await.clone();
                let Some(session) = maybe_session else {
                    // No live Session (mid-reconnect gap): the audio
                    // stream is conceptually paused, so the frame is
                    // simply not forwarded.
                    continue;
                };
                match timeout(SEND_TIMEOUT, session.send_audio(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => {
                        let _ = internal_tx.send(Internal::Backpressure).await;
                    }
                }
            }
        })
    };

    let mut reconnects = ReconnectGuard::new();

    match connect_session(&pipeline, &recognizer, &current_session, &current_domain_session, &internal_tx, None).await {
        Ok(()) => {}
        Err(err) => {
            audio_forwarder.abort();
            pipeline.audio.stop().await;
            if pipeline.still_current(generation) {
                callback(Event::Error { message: err.to_string() });
            }
            pipeline.finish(generation);
            return;
        }
    }

    let mut pending_final: Option<String> = None;
    let mut stopping = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Cancel) => {
                        if let Some(session) = current_session.lock().await.take() {
                            session.close().await;
                        }
                        audio_forwarder.abort();
                        pipeline.audio.stop().await;
                        pipeline.finish(generation);
                        return;
                    }
                    Some(Command::Stop) => {
                        stopping = true;
                        if let Some(session) = current_session.lock().await.clone() {
                            if session.send_eos().await.is_err() {
                                // Treat an EOS that can't be sent as an
                                // immediate empty terminal Final rather
                                // than waiting out the full watchdog.
                                pending_final = Some(String::new());
                            }
                        } else {
                            // Reconnect was in progress with no live
                            // Session: nothing to flush, emit an empty
                            // Final immediately.
                            pending_final = Some(String::new());
                        }
                    }
                    None => {}
                }
                if let Some(text) = pending_final.take() {
                    finish_with_final(&pipeline, &enhancer, &callback, generation, text).await;
                    audio_forwarder.abort();
                    pipeline.audio.stop().await;
                    pipeline.finish(generation);
                    return;
                }
            }

            internal = timeout_if(stopping, &mut internal_rx) => {
                if !pipeline.still_current(generation) {
                    // Cancelled since this event was queued: tear down
                    // without dispatching anything further. The `Cancel`
                    // command itself may still be sitting in `cmd_rx` —
                    // that's fine, this task is exiting either way.
                    if let Some(session) = current_session.lock().await.take() {
                        session.close().await;
                    }
                    audio_forwarder.abort();
                    pipeline.audio.stop().await;
                    pipeline.finish(generation);
                    return;
                }
                match internal {
                    None => {
                        // Post-EOS watchdog elapsed with no terminal Final.
                        finish_with_final(&pipeline, &enhancer, &callback, generation, String::new()).await;
                        audio_forwarder.abort();
                        pipeline.audio.stop().await;
                        pipeline.finish(generation);
                        return;
                    }
                    Some(Internal::Partial { confirmed, stash }) => {
                        if let Some(session) = current_domain_session.lock().await.as_ref() {
                            let seq = session.record_partial(&confirmed, &stash);
                            log::debug!("session {}: partial #{seq}", session.id);
                        }
                        if pipeline.still_current(generation) {
                            callback(Event::Partial { confirmed, stash });
                        }
                    }
                    Some(Internal::Final { text }) => {
                        reconnects.record_success();
                        if stopping {
                            finish_with_final(&pipeline, &enhancer, &callback, generation, text).await;
                            audio_forwarder.abort();
                            pipeline.audio.stop().await;
                            pipeline.finish(generation);
                            return;
                        }
                        // Server-side VAD final while the hot-key is still
                        // held: emit it, then reconnect seamlessly.
                        if pipeline.still_current(generation) {
                            callback(Event::Final { text });
                        }
                        *current_session.lock().await = None;
                        *current_domain_session.lock().await = None;
                        let preroll = pipeline.audio.drain_preroll(PREROLL_MS);
                        if !reconnect_loop(
                            &pipeline, &recognizer, &current_session, &current_domain_session,
                            &internal_tx, preroll, &mut reconnects, generation, &callback,
                        ).await {
                            audio_forwarder.abort();
                            pipeline.audio.stop().await;
                            pipeline.finish(generation);
                            return;
                        }
                    }
                    Some(Internal::SessionClosed) => {
                        *current_session.lock().await = None;
                        *current_domain_session.lock().await = None;
                        if stopping {
                            finish_with_final(&pipeline, &enhancer, &callback, generation, String::new()).await;
                            audio_forwarder.abort();
                            pipeline.audio.stop().await;
                            pipeline.finish(generation);
                            return;
                        }
                        let preroll = pipeline.audio.drain_preroll(PREROLL_MS);
                        if !reconnect_loop(
                            &pipeline, &recognizer, &current_session, &current_domain_session,
                            &internal_tx, preroll, &mut reconnects, generation, &callback,
                        ).await {
                            audio_forwarder.abort();
                            pipeline.audio.stop().await;
                            pipeline.finish(generation);
                            return;
                        }
                    }
                    Some(Internal::Backpressure) => {
                        // The recognizer's send queue blocked for too
                        // long: close the Session and trigger reconnect.
                        // While stopping, EOS is already in flight and
                        // there is no reconnect path left to take — the
                        // post-EOS watchdog above is what bounds this.
                        if stopping {
                            continue;
                        }
                        if let Some(session) = current_session.lock().await.take() {
                            session.close().await;
                        }
                        *current_domain_session.lock().await = None;
                        let preroll = pipeline.audio.drain_preroll(PREROLL_MS);
                        if !reconnect_loop(
                            &pipeline, &recognizer, &current_session, &current_domain_session,
                            &internal_tx, preroll, &mut reconnects, generation, &callback,
                        ).await {
                            audio_forwarder.abort();
                            pipeline.audio.stop().await;
                            pipeline.finish(generation);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Returns the internal-event receiver's next item directly, unless
/// `stopping` is set, in which case it is raced against the post-EOS
/// watchdog and `None` stands in for the watchdog firing.
async fn timeout_if(stopping: bool, rx: &mut mpsc::Receiver<Internal>) -> Option<Internal> {
    if stopping {
        match timeout(STOP_WATCHDOG, rx.recv()).await {
            Ok(item) => item,
            Err(_) => None,
        }
    } else {
        rx.recv().await
    }
}

enum Internal {
    Partial { confirmed: String, stash: String },
    Final { text: String },
    SessionClosed,
    Backpressure,
}

/// Connects a new Session, installs it (and its paired `domain::Session`
/// bookkeeping) as the forwarder's current target, flushes any pre-roll
/// audio into it, and spawns its event pump.
async fn connect_session(
    pipeline: &Arc<Pipeline>,
    recognizer: &Arc<dyn RecognizerPort>,
    current_session: &Arc<AsyncMutex<Option<Arc<dyn RecognizerSession>>>>,
    current_domain_session: &Arc<AsyncMutex<Option<Session>>>,
    internal_tx: &mpsc::Sender<Internal>,
    preroll: Option<Vec<i16>>,
) -> Result<()> {
    let (session, mut event_rx) = timeout(CONNECT_TIMEOUT, recognizer.connect())
        .await
        .map_err(|_| CoreError::Timeout("recognizer connect".to_string()))??;
    let session: Arc<dyn RecognizerSession> = Arc::from(session);

    if let Some(samples) = preroll {
        if !samples.is_empty() {
            let frame = crate::domain::AudioFrame::new(samples, 0);
            let _ = session.send_audio(&frame).await;
        }
    }

    let session_id = pipeline.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
    *current_session.lock().await = Some(Arc::clone(&session));
    *current_domain_session.lock().await = Some(Session::new(session_id));

    let internal_tx = internal_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let internal = match event {
                RecognizerEvent::Partial { confirmed, stash } => Internal::Partial { confirmed, stash },
                RecognizerEvent::Final { text } => Internal::Final { text },
            };
            let is_final = matches!(internal, Internal::Final { .. });
            if internal_tx.send(internal).await.is_err() || is_final {
                return;
            }
        }
        let _ = internal_tx.send(Internal::SessionClosed).await;
    });

    Ok(())
}

/// Retries `connect_session` until it succeeds or `reconnect_storm` decides
/// enough consecutive failures have landed to give up. Returns `true` on a
/// live Session, `false` if the caller should unwind (storm threshold hit,
/// with the coalesced `Error` already dispatched by `reconnect_storm`).
async fn reconnect_loop(
    pipeline: &Arc<Pipeline>,
    recognizer: &Arc<dyn RecognizerPort>,
    current_session: &Arc<AsyncMutex<Option<Arc<dyn RecognizerSession>>>>,
    current_domain_session: &Arc<AsyncMutex<Option<Session>>>,
    internal_tx: &mpsc::Sender<Internal>,
    mut preroll: Vec<i16>,
    reconnects: &mut ReconnectGuard,
    generation: u64,
    callback: &EventCallback,
) -> bool {
    loop {
        if !pipeline.still_current(generation) {
            return false;
        }
        let this_preroll = std::mem::take(&mut preroll);
        match connect_session(
            pipeline, recognizer, current_session, current_domain_session,
            internal_tx, Some(this_preroll),
        ).await {
            Ok(()) => return true,
            Err(err) => {
                if reconnect_storm(reconnects, pipeline, generation, callback, err).await {
                    return false;
                }
                tokio::time::sleep(RECONNECT_RETRY_DELAY).await;
            }
        }
    }
}

struct ReconnectGuard {
    failures: Vec<Instant>,
}

impl ReconnectGuard {
    fn new() -> Self {
        Self { failures: Vec::new() }
    }

    fn record_success(&mut self) {
        self.failures.clear();
    }

    /// Returns `true` once 3 consecutive failures have landed within the
    /// 2 second reconnect window.
    fn record_failure(&mut self) -> bool {
        let now = Instant::now();
        self.failures.retain(|t| now.duration_since(*t) <= RECONNECT_WINDOW);
        self.failures.push(now);
        self.failures.len() >= RECONNECT_MAX_FAILURES as usize
    }
}

/// Records a reconnect failure and, if the storm threshold is crossed,
/// emits the single coalesced `Error` and returns `true` (caller should
/// unwind). Otherwise logs and returns `false` so the coordinator loop
/// keeps running (callers only reach this when a *subsequent* reconnect
/// attempt is still worth making — in practice the loop above immediately
/// re-enters `connect_session` on `false`, matching "up to 3 consecutive
/// failures").
async fn reconnect_storm(
    guard: &mut ReconnectGuard,
    pipeline: &Arc<Pipeline>,
    generation: u64,
    callback: &EventCallback,
    err: CoreError,
) -> bool {
    log::warn!("recognizer reconnect failed: {err}");
    if guard.record_failure() {
        if pipeline.still_current(generation) {
            callback(Event::Error {
                message: "reconnect failed".to_string(),
            });
        }
        true
    } else {
        false
    }
}

async fn finish_with_final(
    pipeline: &Arc<Pipeline>,
    enhancer: &Option<Arc<dyn EnhancerPort>>,
    callback: &EventCallback,
    generation: u64,
    text: String,
) {
    let final_text = match enhancer {
        Some(enhancer) if !text.is_empty() => match timeout(ENHANCER_TIMEOUT, enhancer.enhance(&text)).await {
            Ok(Ok(enhanced)) => enhanced,
            Ok(Err(err)) => {
                log::warn!("enhancer failed, using raw text: {err}");
                text
            }
            Err(_) => {
                log::warn!("enhancer timed out, using raw text");
                text
            }
        },
        _ => text,
    };
    if pipeline.still_current(generation) {
        callback(Event::Final { text: final_text });
    }
}

/// Buffered (Whisper) coordinator: no streaming, no Partials. Audio is
/// accumulated in memory for the duration of `Recording` and transcribed
/// in one shot on `stop_streaming`.
async fn run_buffered(
    pipeline: Arc<Pipeline>,
    recognizer: Arc<dyn RecognizerPort>,
    enhancer: Option<Arc<dyn EnhancerPort>>,
    callback: EventCallback,
    generation: u64,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let buffer: Arc<AsyncMutex<Vec<i16>>> = Arc::new(AsyncMutex::new(Vec::new()));
    let forwarder = {
        let audio = Arc::clone(&pipeline.audio);
        let buffer = Arc::clone(&buffer);
        let pipeline = Arc::clone(&pipeline);
        let callback = Arc::clone(&callback);
        tokio::spawn(async move {
            let mut rx = audio.chunks();
            let mut last_dropped = audio.dropped_frames();
            while let Some(frame) = rx.recv().await {
                let dropped = audio.dropped_frames();
                if dropped > last_dropped {
                    let delta = dropped - last_dropped;
                    last_dropped = dropped;
                    if pipeline.still_current(generation) {
                        callback(Event::Warning {
                            message: format!(
                                "audio queue overflow: dropped {delta} frame(s) ({dropped} total)"
                            ),
                        });
                    }
                }
                buffer.lock().await.extend_from_slice(&frame.samples);
            }
        })
    };

    loop {
        match cmd_rx.recv().await {
            Some(Command::Cancel) => {
                forwarder.abort();
                pipeline.audio.stop().await;
                pipeline.finish(generation);
                return;
            }
            Some(Command::Stop) => {
                pipeline.audio.stop().await;
                let pcm = buffer.lock().await.clone();
                let text = if pcm.is_empty() {
                    Ok(String::new())
                } else {
                    recognizer.transcribe_once(&pcm).await
                };
                forwarder.abort();
                match text {
                    Ok(text) => finish_with_final(&pipeline, &enhancer, &callback, generation, text).await,
                    Err(err) => {
                        if pipeline.still_current(generation) {
                            callback(Event::Error { message: err.to_string() });
                        }
                    }
                }
                pipeline.finish(generation);
                return;
            }
            None => return,
        }
    }
}

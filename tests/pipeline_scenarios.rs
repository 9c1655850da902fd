//! End-to-end scenarios against a scripted `MockRecognizer`, mirroring
//! `spec.md` §8 one-for-one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use vhisper_core::domain::{AsrConfig, AsrProvider, AudioFrame, Config, Event, PipelineState, QwenConfig};
use vhisper_core::pipeline::Pipeline;
use vhisper_core::ports::mocks::{
    MockAudioSource, MockFailure, MockRecognizer, ScriptedConnect, ScriptedSession,
};
use vhisper_core::ports::recognizer::RecognizerEvent;

fn dummy_config() -> Config {
    Config {
        asr: AsrConfig {
            provider: AsrProvider::Qwen(QwenConfig::default()),
        },
        llm: None,
        output: Value::Null,
    }
}

/// Collects events pushed by the pipeline's callback, in arrival order.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn callback(&self) -> vhisper_core::pipeline::EventCallback {
        let log = self.0.clone();
        Arc::new(move |event: Event| log.lock().expect("event log poisoned").push(event))
    }

    fn snapshot(&self) -> Vec<Event> {
        self.0.lock().expect("event log poisoned").clone()
    }
}

async fn wait_for(log: &EventLog, count: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while log.snapshot().len() < count && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_state(pipeline: &Pipeline, state: PipelineState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while pipeline.get_state() != state && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path() {
    // The two Partials arrive unprompted (the provider's running
    // hypothesis); the terminal Final is only released once stop_streaming
    // drives send_eos, matching a real provider's EOS response.
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::new(
        vec![
            RecognizerEvent::Partial { confirmed: "he".to_string(), stash: "llo".to_string() },
            RecognizerEvent::Partial { confirmed: "hello".to_string(), stash: String::new() },
        ],
        Some(RecognizerEvent::Final { text: "hello world".to_string() }),
    ))]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    wait_for(&log, 2, Duration::from_secs(1)).await;
    pipeline.stop_streaming().await;
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(4)).await;

    let events = log.snapshot();
    assert_eq!(
        events,
        vec![
            Event::Partial { confirmed: "he".to_string(), stash: "llo".to_string() },
            Event::Partial { confirmed: "hello".to_string(), stash: String::new() },
            Event::Final { text: "hello world".to_string() },
        ]
    );
    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn auto_reconnect_on_server_vad_final() {
    let recognizer = Arc::new(MockRecognizer::new(vec![
        ScriptedConnect::Succeed(ScriptedSession::immediate(vec![RecognizerEvent::Final {
            text: "first segment".to_string(),
        }])),
        ScriptedConnect::Succeed(ScriptedSession::new(
            vec![RecognizerEvent::Partial { confirmed: String::new(), stash: "more".to_string() }],
            Some(RecognizerEvent::Final { text: "more text".to_string() }),
        )),
    ]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer.clone(), None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");

    // First Session's server-side VAD final arrives with no client EOS;
    // the Pipeline should reconnect and stay in Recording.
    wait_for(&log, 1, Duration::from_secs(1)).await;
    assert_eq!(pipeline.get_state(), PipelineState::Recording);

    // Second Session's partial, then stop to drive its terminal Final.
    wait_for(&log, 2, Duration::from_secs(1)).await;
    pipeline.stop_streaming().await;
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(4)).await;

    let events = log.snapshot();
    assert_eq!(
        events,
        vec![
            Event::Final { text: "first segment".to_string() },
            Event::Partial { confirmed: String::new(), stash: "more".to_string() },
            Event::Final { text: "more text".to_string() },
        ]
    );
    assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
    assert_eq!(recognizer.connect_count(), 2);
}

#[tokio::test]
async fn cancel_mid_stream_fires_no_further_callbacks() {
    // A script with more events than the pipeline should ever observe:
    // cancellation must stop delivery after the first Partial.
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::new(
        vec![
            RecognizerEvent::Partial { confirmed: "he".to_string(), stash: "llo".to_string() },
            RecognizerEvent::Partial { confirmed: "hello".to_string(), stash: String::new() },
        ],
        Some(RecognizerEvent::Final { text: "hello world".to_string() }),
    ))]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    wait_for(&log, 1, Duration::from_secs(1)).await;

    pipeline.cancel_streaming();
    // Synchronous with respect to state transition.
    assert_eq!(pipeline.get_state(), PipelineState::Idle);

    let count_at_cancel = log.snapshot().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(log.snapshot().len(), count_at_cancel, "no callbacks after cancel_streaming");
    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn auth_failure_yields_single_error_event() {
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Fail(MockFailure::Auth)]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    let code = pipeline.start_streaming(log.callback()).await;
    assert!(code.is_ok(), "start_streaming itself returns Ok; the failure surfaces as an Error event");

    wait_for(&log, 1, Duration::from_secs(1)).await;
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(1)).await;

    let events = log.snapshot();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Event::Error { message } if message.contains("auth") || message.contains("Auth")));
    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn reconnect_storm_coalesces_to_one_error() {
    let recognizer = Arc::new(MockRecognizer::new(vec![
        ScriptedConnect::Succeed(ScriptedSession::immediate(vec![RecognizerEvent::Final {
            text: String::new(),
        }])),
        ScriptedConnect::Fail(MockFailure::Network),
        ScriptedConnect::Fail(MockFailure::Network),
        ScriptedConnect::Fail(MockFailure::Network),
    ]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(2)).await;

    let events = log.snapshot();
    let errors: Vec<_> = events.iter().filter(|e| matches!(e, Event::Error { .. })).collect();
    assert_eq!(errors.len(), 1, "exactly one coalesced Error, got {events:?}");
    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn stop_with_no_audio_yields_empty_final() {
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::new(
        vec![],
        Some(RecognizerEvent::Final { text: String::new() }),
    ))]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    pipeline.stop_streaming().await;
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(4)).await;

    let events = log.snapshot();
    assert_eq!(events, vec![Event::Final { text: String::new() }]);
}

#[tokio::test]
async fn audio_queue_overflow_surfaces_warning_event() {
    // §4.1: dropped frames must surface as a Warning, never an Error, and
    // must never interrupt the Partial/Final sequence.
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::new(
        vec![],
        Some(RecognizerEvent::Final { text: "ok".to_string() }),
    ))]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio.clone(), recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");

    audio.simulate_drop(3);
    audio.push(AudioFrame::new(vec![0; 160], 0)).await;

    wait_for(&log, 1, Duration::from_secs(1)).await;
    pipeline.stop_streaming().await;
    wait_for_state(&pipeline, PipelineState::Idle, Duration::from_secs(4)).await;

    let events = log.snapshot();
    assert!(
        events.iter().any(|e| matches!(e, Event::Warning { message } if message.contains("dropped 3"))),
        "expected a dropped-frame Warning, got {events:?}"
    );
    assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
    assert_eq!(events.last(), Some(&Event::Final { text: "ok".to_string() }));
}

#[tokio::test]
async fn stop_streaming_from_idle_is_a_no_op() {
    let recognizer = Arc::new(MockRecognizer::new(vec![]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));

    assert_eq!(pipeline.get_state(), PipelineState::Idle);
    pipeline.stop_streaming().await;
    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn cancel_streaming_is_idempotent() {
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::default())]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    pipeline.cancel_streaming();
    pipeline.cancel_streaming();
    pipeline.cancel_streaming();

    assert_eq!(pipeline.get_state(), PipelineState::Idle);
}

#[tokio::test]
async fn update_config_rejected_while_not_idle() {
    let recognizer = Arc::new(MockRecognizer::new(vec![ScriptedConnect::Succeed(ScriptedSession::default())]));
    let audio = Arc::new(MockAudioSource::new());
    let pipeline = Arc::new(Pipeline::new_for_test(dummy_config(), audio, recognizer, None));
    let log = EventLog::default();

    pipeline.start_streaming(log.callback()).await.expect("start_streaming should succeed");
    let result = pipeline.update_config(dummy_config()).await;
    assert!(matches!(result, Err(vhisper_core::CoreError::Busy)));
}

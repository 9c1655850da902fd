//! Port traits: the seams between the Pipeline coordinator and the adapters
//! that do real I/O (microphone capture, recognizer wire protocols, LLM
//! enhancer calls). Mirrors the teacher's `TranscriptionServicePort` /
//! `AudioCapturePort` / `LlmServicePort` split.

pub mod audio;
pub mod enhancer;
#[cfg(any(test, feature = "test-util"))]
pub mod mocks;
pub mod recognizer;

pub use audio::AudioSourcePort;
pub use enhancer::EnhancerPort;
pub use recognizer::{RecognizerEvent, RecognizerPort, RecognizerSession};

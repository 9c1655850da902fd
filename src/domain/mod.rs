//! Core data model: config tree, audio frames, sessions, pipeline state and events.

mod config;
mod event;
mod session;

pub use config::{
    AsrConfig, AsrProvider, Config, DashScopeLlmConfig, FunAsrConfig, LlmConfig, LlmProvider,
    OllamaConfig, OpenAiLlmConfig, ParaformerConfig, QwenConfig, WhisperConfig,
};
pub use event::Event;
pub use session::{AtomicPipelineState, PipelineState, Session};

/// A fixed-rate mono 16 kHz, 16-bit linear PCM chunk, timestamped with a
/// monotonically increasing sample offset from the start of the audio stream.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_offset: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_offset: u64) -> Self {
        Self {
            samples,
            sample_offset,
        }
    }

    /// Raw little-endian byte encoding, the wire form every recognizer expects.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

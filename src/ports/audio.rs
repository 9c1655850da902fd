use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::AudioFrame;
use crate::error::Result;

/// Microphone audio format. The core only ever runs the pipeline at one
/// fixed rate/channel count; this exists so adapters can assert what they
/// actually opened the device as before resampling/downmixing into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

/// Microphone capture, delivering mono 16 kHz PCM chunks and a pre-roll ring
/// buffer so speech captured before the recognizer socket opens is not lost.
#[async_trait]
pub trait AudioSourcePort: Send + Sync {
    /// Begin hardware capture; returns once the device callback is running.
    async fn start(&self) -> Result<()>;

    /// Hand off the receiving half of the bounded chunk queue. Calling this
    /// more than once per `start()` is a logic error in adapters — the
    /// stream is non-restartable, matching `spec.md`'s `chunks()` contract.
    fn chunks(&self) -> mpsc::Receiver<AudioFrame>;

    /// Halt capture. Idempotent.
    async fn stop(&self);

    /// Up to `max_ms` milliseconds of the most recently captured audio, as
    /// one block, for seeding a freshly (re)connected Session.
    fn drain_preroll(&self, max_ms: u32) -> Vec<i16>;

    /// Total chunks dropped so far because the hand-off queue overflowed.
    fn dropped_frames(&self) -> u64;

    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use crate::domain::AudioFrame;
use crate::error::{CoreError, Result};
use crate::ports::audio::{AudioFormat, AudioSourcePort};

const TARGET_SAMPLE_RATE: u32 = 16_000;
const TARGET_CHANNELS: u16 = 1;
const CHUNK_MS: u32 = 100;
const QUEUE_CAPACITY_CHUNKS: usize = 10;
const PREROLL_CAPACITY_MS: u32 = 1_000;

struct CaptureState {
    stream: Option<cpal::Stream>,
}

/// Cross-platform microphone capture via `cpal`'s default input device,
/// resampled and downmixed to mono 16 kHz 16-bit PCM. The hardware callback
/// thread never touches the network: it only pushes fixed-size chunks into
/// a bounded Tokio mpsc channel and extends a shared pre-roll ring buffer.
pub struct MicrophoneSource {
    state: Mutex<CaptureState>,
    receiver: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    preroll: Arc<Mutex<VecDeque<i16>>>,
    dropped_frames: Arc<AtomicU64>,
    sample_offset: Arc<AtomicU64>,
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState { stream: None }),
            receiver: Mutex::new(None),
            preroll: Arc::new(Mutex::new(VecDeque::new())),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            sample_offset: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl AudioSourcePort for MicrophoneSource {
    async fn start(&self) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CoreError::DeviceUnavailable)?;
        let supported_config = device
            .default_input_config()
            .map_err(|e| CoreError::FormatUnsupported(e.to_string()))?;
        let sample_format = supported_config.sample_format();
        let device_channels = supported_config.channels();
        let device_sample_rate = supported_config.sample_rate().0;
        let config: cpal::StreamConfig = supported_config.into();

        let chunk_samples = (TARGET_SAMPLE_RATE * CHUNK_MS / 1_000) as usize;
        let preroll_capacity = (PREROLL_CAPACITY_MS * TARGET_SAMPLE_RATE / 1_000) as usize;

        let (tx, rx) = mpsc::channel::<AudioFrame>(QUEUE_CAPACITY_CHUNKS);
        *self.receiver.lock().expect("receiver mutex poisoned") = Some(rx);

        let preroll = Arc::clone(&self.preroll);
        let dropped = Arc::clone(&self.dropped_frames);
        let sample_offset = Arc::clone(&self.sample_offset);
        let mut pending = Vec::<i16>::with_capacity(chunk_samples * 2);

        let err_fn = |err| log::error!("microphone stream error: {err}");

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_f32(data, device_channels);
                    let resampled = resample_linear(&mono, device_sample_rate, TARGET_SAMPLE_RATE);
                    let pcm: Vec<i16> = resampled.iter().map(|s| f32_to_i16(*s)).collect();
                    dispatch_chunks(
                        &pcm,
                        &mut pending,
                        chunk_samples,
                        &tx,
                        &preroll,
                        preroll_capacity,
                        &dropped,
                        &sample_offset,
                    );
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_i16(data, device_channels);
                    let floats: Vec<f32> =
                        mono.iter().map(|s| *s as f32 / i16::MAX as f32).collect();
                    let resampled = resample_linear(&floats, device_sample_rate, TARGET_SAMPLE_RATE);
                    let pcm: Vec<i16> = resampled.iter().map(|s| f32_to_i16(*s)).collect();
                    dispatch_chunks(
                        &pcm,
                        &mut pending,
                        chunk_samples,
                        &tx,
                        &preroll,
                        preroll_capacity,
                        &dropped,
                        &sample_offset,
                    );
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_u16(data, device_channels);
                    let floats: Vec<f32> = mono
                        .iter()
                        .map(|s| (*s as f32 - 32_768.0) / 32_768.0)
                        .collect();
                    let resampled = resample_linear(&floats, device_sample_rate, TARGET_SAMPLE_RATE);
                    let pcm: Vec<i16> = resampled.iter().map(|s| f32_to_i16(*s)).collect();
                    dispatch_chunks(
                        &pcm,
                        &mut pending,
                        chunk_samples,
                        &tx,
                        &preroll,
                        preroll_capacity,
                        &dropped,
                        &sample_offset,
                    );
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CoreError::FormatUnsupported(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| CoreError::Internal(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| CoreError::Internal(format!("failed to start input stream: {e}")))?;
        self.state.lock().expect("capture state mutex poisoned").stream = Some(stream);
        Ok(())
    }

    fn chunks(&self) -> mpsc::Receiver<AudioFrame> {
        self.receiver
            .lock()
            .expect("receiver mutex poisoned")
            .take()
            .expect("chunks() called before start() or more than once")
    }

    async fn stop(&self) {
        let mut state = self.state.lock().expect("capture state mutex poisoned");
        if let Some(stream) = state.stream.take() {
            let _ = stream.pause();
        }
    }

    fn drain_preroll(&self, max_ms: u32) -> Vec<i16> {
        let max_samples = (max_ms.max(1) * TARGET_SAMPLE_RATE / 1_000) as usize;
        let guard = self.preroll.lock().expect("preroll mutex poisoned");
        let len = guard.len();
        let skip = len.saturating_sub(max_samples);
        guard.iter().skip(skip).copied().collect()
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::SeqCst)
    }

    fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: TARGET_CHANNELS,
        }
    }
}

fn downmix_f32(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let channels = channels as usize;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn downmix_i16(data: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    let channels = channels as usize;
    data.chunks(channels)
        .map(|frame| (frame.iter().map(|s| *s as i32).sum::<i32>() / channels as i32) as i16)
        .collect()
}

fn downmix_u16(data: &[u16], channels: u16) -> Vec<u16> {
    if channels <= 1 {
        return data.to_vec();
    }
    let channels = channels as usize;
    data.chunks(channels)
        .map(|frame| (frame.iter().map(|s| *s as u32).sum::<u32>() / channels as u32) as u16)
        .collect()
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Simple linear resampler. Good enough for common device rates (44.1/48 kHz)
/// down to the recognizer's fixed 16 kHz; no anti-aliasing filter is applied.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        output.push(a + (b - a) * frac);
    }
    output
}

#[allow(clippy::too_many_arguments)]
fn dispatch_chunks(
    pcm: &[i16],
    pending: &mut Vec<i16>,
    chunk_samples: usize,
    tx: &mpsc::Sender<AudioFrame>,
    preroll: &Arc<Mutex<VecDeque<i16>>>,
    preroll_capacity: usize,
    dropped: &Arc<AtomicU64>,
    sample_offset: &Arc<AtomicU64>,
) {
    pending.extend_from_slice(pcm);
    {
        let mut guard = preroll.lock().expect("preroll mutex poisoned");
        guard.extend(pcm.iter().copied());
        while guard.len() > preroll_capacity {
            guard.pop_front();
        }
    }
    while pending.len() >= chunk_samples {
        let chunk: Vec<i16> = pending.drain(..chunk_samples).collect();
        let offset = sample_offset.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        let frame = AudioFrame::new(chunk, offset);
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

//! Microphone capture and speaker playback.
//!
//! Capture hands out fixed-size f32 frames over a channel; the shared
//! `active` flag is the only teardown mechanism, turning the device
//! callbacks into no-ops once a call releases its media.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{CallError, Result};

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Audio stream error: {0}")]
    StreamError(String),
}

impl From<AudioError> for CallError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::NoInputDevice | AudioError::NoOutputDevice => {
                CallError::MediaUnavailable(err.to_string())
            }
            AudioError::StreamError(msg) => CallError::MediaAccessDenied(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize) / 1000
    }
}

/// An acquired microphone: a stream of fixed-size capture frames plus the
/// shared flags controlling it.
///
/// Dropping the handle releases the device.
#[derive(Debug)]
pub struct LocalMedia {
    config: AudioConfig,
    active: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    frames: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
}

impl LocalMedia {
    /// Wraps an already running capture stream. The `active` flag must be
    /// set; clearing it stops the stream.
    pub fn new(
        config: AudioConfig,
        active: Arc<AtomicBool>,
        muted: Arc<AtomicBool>,
        frames: mpsc::Receiver<Vec<f32>>,
    ) -> Self {
        Self {
            config,
            active,
            muted,
            frames: Mutex::new(Some(frames)),
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Takes the capture frame stream. Yields `None` after the first call.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.frames.lock().ok().and_then(|mut frames| frames.take())
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "Mute state changed");
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Stops capture and resets the mute state.
    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.muted.store(false, Ordering::SeqCst);
        debug!("Local media released");
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

/// Where a call gets its microphone from. The production implementation
/// opens the default capture device; tests substitute a fake.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia>;
}

/// Captures from the default input device via cpal.
#[derive(Default)]
pub struct CpalSource {
    config: AudioConfig,
}

impl CpalSource {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaSource for CpalSource {
    async fn acquire(&self) -> Result<LocalMedia> {
        let active = Arc::new(AtomicBool::new(false));
        let muted = Arc::new(AtomicBool::new(false));
        let frames = start_capture(&self.config, active.clone(), muted.clone())?;
        Ok(LocalMedia::new(self.config.clone(), active, muted, frames))
    }
}

/// Opens the default input device and feeds fixed-size frames into the
/// returned channel until `active` is cleared.
fn start_capture(
    config: &AudioConfig,
    active: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
) -> std::result::Result<mpsc::Receiver<Vec<f32>>, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    info!(device = ?device.name(), "Using input device");

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_size = config.frame_size_samples();
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<f32>>(32);
    let mut buffer = Vec::with_capacity(frame_size);

    active.store(true, Ordering::SeqCst);
    let callback_active = active.clone();

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                if !callback_active.load(Ordering::Relaxed) {
                    return;
                }
                if muted.load(Ordering::Relaxed) {
                    // Send silence when muted so playback stays in sync
                    buffer.extend(std::iter::repeat(0.0f32).take(data.len()));
                } else {
                    buffer.extend_from_slice(data);
                }
                while buffer.len() >= frame_size {
                    let frame: Vec<f32> = buffer.drain(..frame_size).collect();
                    if frame_tx.try_send(frame).is_err() {
                        warn!("Audio frame channel full, dropping frame");
                    }
                }
            },
            move |err| {
                error!("Audio input error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    // Keep the stream alive; clearing the active flag turns the callback
    // into a no-op.
    std::mem::forget(stream);

    debug!("Audio capture started");
    Ok(frame_rx)
}

/// Opens the default output device and plays whatever lands on the
/// returned channel until `active` is cleared.
pub fn start_playback(
    config: &AudioConfig,
    active: Arc<AtomicBool>,
) -> std::result::Result<mpsc::Sender<Vec<f32>>, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    info!(device = ?device.name(), "Using output device");

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(32);
    let (playback_tx, playback_rx) = std::sync::mpsc::channel::<Vec<f32>>();

    // Bridge the async channel to a std channel for the audio callback
    let bridge_active = active.clone();
    tokio::spawn(async move {
        while bridge_active.load(Ordering::Relaxed) {
            match frame_rx.recv().await {
                Some(frame) => {
                    if playback_tx.send(frame).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    });

    let mut play_buffer: VecDeque<f32> = VecDeque::new();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                // Drain available frames into the play buffer
                while let Ok(frame) = playback_rx.try_recv() {
                    play_buffer.extend(frame.iter());
                }

                for sample in data.iter_mut() {
                    *sample = play_buffer.pop_front().unwrap_or(0.0);
                }
            },
            move |err| {
                error!("Audio output error: {err}");
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    std::mem::forget(stream);
    debug!("Audio playback started");
    Ok(frame_tx)
}

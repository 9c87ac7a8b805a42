//! Audio playback to speakers

use std::f32::consts::TAU;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::resample::resample;
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Decoded mono audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Something that can play a clip to completion
pub trait AudioSink: Send + Sync {
    /// Play `clip`, blocking until it ends or `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns error if the output device fails
    fn play(&self, clip: &Clip, cancel: &CancellationToken) -> Result<()>;
}

/// Plays audio to the default output device
///
/// The device is opened per clip and released when the clip ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioPlayback;

impl AudioPlayback {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn probe() -> Result<String> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        Ok(device.name().unwrap_or_default())
    }
}

/// Pick an f32 output config, ideally at the clip's own rate
fn output_config(device: &Device, rate: u32) -> Result<StreamConfig> {
    let exact = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() <= 2)
        .find(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate));

    if let Some(range) = exact {
        return Ok(range.with_sample_rate(SampleRate(rate)).config());
    }

    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(format!("no usable output config: {e}")))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported output sample format: {:?}",
            default.sample_format()
        )));
    }
    Ok(default.config())
}

impl AudioSink for AudioPlayback {
    fn play(&self, clip: &Clip, cancel: &CancellationToken) -> Result<()> {
        if clip.is_empty() || cancel.is_cancelled() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = output_config(&device, clip.sample_rate)?;
        let channels = usize::from(config.channels);
        let device_rate = config.sample_rate.0;

        let samples = Arc::new(resample(&clip.samples, clip.sample_rate, device_rate)?);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or(0.0);
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                        if pos >= samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let start = Instant::now();
        let timeout = clip.duration() + Duration::from_millis(500);

        while !finished.load(Ordering::Acquire) {
            if cancel.is_cancelled() {
                tracing::debug!("playback cancelled");
                break;
            }
            if start.elapsed() > timeout {
                tracing::warn!("playback did not finish in time");
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        if !cancel.is_cancelled() {
            // let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(
            samples = samples.len(),
            played = position.load(Ordering::Relaxed),
            "playback complete"
        );

        Ok(())
    }
}

/// Decode MP3 bytes to a mono clip
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Clip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Audio("MP3 contained no audio".to_string()));
    }

    Ok(Clip {
        samples,
        sample_rate,
    })
}

/// A sequence of sine notes with short fades, for built-in cues
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn tone(notes: &[(f32, Duration)], volume: f32) -> Clip {
    const RATE: u32 = 24_000;
    const FADE: usize = 240;

    let mut samples = Vec::new();
    for &(freq, length) in notes {
        let count = (length.as_secs_f32() * RATE as f32) as usize;
        let fade = FADE.min(count / 2);
        samples.extend((0..count).map(|i| {
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i + fade >= count {
                (count - i) as f32 / fade as f32
            } else {
                1.0
            };
            (TAU * freq * i as f32 / RATE as f32).sin() * volume * envelope
        }));
    }

    Clip {
        samples,
        sample_rate: RATE,
    }
}

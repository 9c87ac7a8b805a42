//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Target sample rate for speech (16kHz mono)
pub const SAMPLE_RATE: u32 = 16000;

/// A source of mono audio samples, polled by the recorder
pub trait AudioInput {
    /// Samples captured since the last call
    fn take_samples(&mut self) -> Vec<f32>;

    /// Sample rate of the returned samples
    fn sample_rate(&self) -> u32;
}

/// Captures audio from the default input device
///
/// The stream runs from construction until drop. Devices that cannot record
/// 16kHz mono are opened with their default config and downmixed to mono;
/// the recorder resamples afterwards.
pub struct AudioCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default microphone and start recording
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream fails
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let (config, format) = input_config(&device)?;
        let channels = usize::from(config.channels);
        let buffer = Arc::new(Mutex::new(Vec::new()));

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels,
            format = ?format,
            "audio capture initialized"
        );

        let stream = build_stream(&device, &config, format, channels, Arc::clone(&buffer))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            buffer,
            sample_rate: config.sample_rate.0,
            stream: Some(stream),
        })
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl AudioInput for AudioCapture {
    fn take_samples(&mut self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Prefer 16kHz mono, otherwise the device default
fn input_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(range) = preferred {
        let supported = range.with_sample_rate(SampleRate(SAMPLE_RATE));
        return Ok((supported.config(), supported.sample_format()));
    }

    let supported = device
        .default_input_config()
        .map_err(|e| Error::Audio(format!("no usable input config: {e}")))?;
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    channels: usize,
    buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<Stream> {
    let on_error = |err: cpal::StreamError| tracing::error!(error = %err, "audio capture error");

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_mono(&buffer, data.iter().copied(), channels);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_mono(
                    &buffer,
                    data.iter().map(|&s| f32::from(s) / 32768.0),
                    channels,
                );
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                push_mono(
                    &buffer,
                    data.iter().map(|&s| (f32::from(s) - 32768.0) / 32768.0),
                    channels,
                );
            },
            on_error,
            None,
        ),
        other => {
            return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
        }
    };

    stream.map_err(|e| Error::Audio(e.to_string()))
}

/// Append interleaved samples to the buffer, averaging channels
#[allow(clippy::cast_precision_loss)]
fn push_mono(buffer: &Mutex<Vec<f32>>, samples: impl Iterator<Item = f32>, channels: usize) {
    let Ok(mut buf) = buffer.lock() else {
        return;
    };

    if channels <= 1 {
        buf.extend(samples);
        return;
    }

    let samples: Vec<f32> = samples.collect();
    buf.extend(
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

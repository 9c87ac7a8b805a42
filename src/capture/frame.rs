//! Camera frame snapshots and JPEG encoding

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

use crate::{Error, Result};

/// MIME type of encoded frames sent upstream
pub const JPEG_MIME: &str = "image/jpeg";

/// Pixel data as delivered by a grabber, before it becomes a [`Frame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, row-major
    pub rgb: Vec<u8>,
}

/// An immutable camera snapshot
///
/// Frames are never modified after construction. The live slot swaps in a
/// new `Arc<Frame>` per capture, so a holder of an older frame keeps seeing
/// exactly the pixels it was handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u64,
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame from raw RGB8 pixels
    ///
    /// # Errors
    ///
    /// Returns error if the buffer length does not match the dimensions
    pub fn new(seq: u64, raw: RawFrame) -> Result<Self> {
        let expected = (raw.width as usize) * (raw.height as usize) * 3;
        if raw.width == 0 || raw.height == 0 || raw.rgb.len() != expected {
            return Err(Error::Camera(format!(
                "frame buffer is {} bytes, expected {expected} for {}x{}",
                raw.rgb.len(),
                raw.width,
                raw.height
            )));
        }

        Ok(Self {
            seq,
            width: raw.width,
            height: raw.height,
            rgb: raw.rgb,
            captured_at: Utc::now(),
        })
    }

    /// Capture sequence number, increasing per camera session
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Raw RGB8 pixels
    #[must_use]
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Pixel at (x, y), clamped to the frame bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let i = (y * self.width as usize + x) * 3;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }

    /// Encode the frame as JPEG, downscaling so the longest side is at most `max_dim`
    ///
    /// A `max_dim` of 0 keeps the original size.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn encode_jpeg(&self, quality: u8, max_dim: u32) -> Result<EncodedImage> {
        let view: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.rgb.as_slice())
                .ok_or_else(|| Error::Camera("frame buffer size mismatch".to_string()))?;

        let (width, height) = scaled_dimensions(self.width, self.height, max_dim);
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);

        if (width, height) == (self.width, self.height) {
            encoder.encode_image(&view)?;
        } else {
            let resized = image::imageops::resize(&view, width, height, FilterType::Triangle);
            encoder.encode_image(&resized)?;
        }

        tracing::trace!(
            frame = self.seq,
            width,
            height,
            bytes = bytes.len(),
            "frame encoded"
        );

        Ok(EncodedImage {
            frame_seq: self.seq,
            width,
            height,
            bytes,
        })
    }
}

/// A JPEG-encoded frame, owned by the request that carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Sequence number of the source frame
    pub frame_seq: u64,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Fit (width, height) inside a `max_dim` square, preserving aspect ratio
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scaled_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let longest = width.max(height);
    if max_dim == 0 || longest <= max_dim {
        return (width, height);
    }

    let scale = f64::from(max_dim) / f64::from(longest);
    let w = (f64::from(width) * scale).round().max(1.0) as u32;
    let h = (f64::from(height) * scale).round().max(1.0) as u32;
    (w, h)
}

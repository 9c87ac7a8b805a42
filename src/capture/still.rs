//! Still-image grabber for running without camera hardware

use std::path::PathBuf;
use std::time::Duration;

use super::{FrameGrabber, RawFrame};
use crate::{Error, Result};

/// Serves one image file as a steady stream of frames
#[derive(Debug)]
pub struct StillImage {
    path: PathBuf,
    interval: Duration,
    frame: Option<RawFrame>,
}

impl StillImage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: Duration::from_millis(100),
            frame: None,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl FrameGrabber for StillImage {
    fn open(&mut self) -> Result<()> {
        let rgb = image::open(&self.path)?.to_rgb8();
        tracing::debug!(
            path = %self.path.display(),
            width = rgb.width(),
            height = rgb.height(),
            "still image loaded"
        );
        self.frame = Some(RawFrame {
            width: rgb.width(),
            height: rgb.height(),
            rgb: rgb.into_raw(),
        });
        Ok(())
    }

    fn grab(&mut self) -> Result<RawFrame> {
        self.frame
            .clone()
            .ok_or_else(|| Error::Camera("still image is not loaded".to_string()))
    }

    fn close(&mut self) {
        self.frame = None;
    }

    fn name(&self) -> String {
        format!("still {}", self.path.display())
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }
}

//! Native camera grabber backed by `nokhwa`

use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};

use super::{FrameGrabber, RawFrame};
use crate::{Error, Result};

/// A local camera device, tried by index in order
pub struct NativeCamera {
    candidates: Vec<u32>,
    camera: Option<Camera>,
    active: Option<u32>,
}

impl NativeCamera {
    /// Camera at `index`, falling back to `fallback` when it cannot be opened
    #[must_use]
    pub fn new(index: u32, fallback: Option<u32>) -> Self {
        let mut candidates = vec![index];
        if let Some(f) = fallback
            && f != index
        {
            candidates.push(f);
        }

        Self {
            candidates,
            camera: None,
            active: None,
        }
    }

    fn open_index(index: u32) -> Result<Camera> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| Error::Camera(format!("failed to open camera {index}: {e}")))?;
        camera
            .open_stream()
            .map_err(|e| Error::Camera(format!("failed to start camera {index}: {e}")))?;
        Ok(camera)
    }
}

impl FrameGrabber for NativeCamera {
    fn open(&mut self) -> Result<()> {
        let mut last_error = None;

        for &index in &self.candidates {
            match Self::open_index(index) {
                Ok(camera) => {
                    tracing::debug!(index, format = ?camera.camera_format(), "camera opened");
                    self.camera = Some(camera);
                    self.active = Some(index);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(index, error = %e, "camera candidate failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Camera("no camera candidates".to_string())))
    }

    fn grab(&mut self) -> Result<RawFrame> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| Error::Camera("camera is not open".to_string()))?;

        let buffer = camera
            .frame()
            .map_err(|e| Error::Camera(format!("frame read failed: {e}")))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| Error::Camera(format!("frame decode failed: {e}")))?;

        Ok(RawFrame {
            width: decoded.width(),
            height: decoded.height(),
            rgb: decoded.into_raw(),
        })
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take()
            && let Err(e) = camera.stop_stream()
        {
            tracing::debug!(error = %e, "failed to stop camera stream");
        }
        self.active = None;
    }

    fn name(&self) -> String {
        self.active.map_or_else(
            || format!("camera {:?}", self.candidates),
            |index| format!("camera {index}"),
        )
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
    }
}

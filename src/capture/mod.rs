//! Capture source: keeps the latest camera frame available at all times
//!
//! A dedicated OS thread owns the [`FrameGrabber`] and publishes every frame
//! into a single-slot `watch` channel. Readers take an `Arc<Frame>` snapshot
//! and never block the writer. Device errors are reported as
//! [`CaptureEvent`]s while the thread keeps trying to reopen the device.

#[cfg(feature = "camera")]
mod camera;
mod frame;
mod still;

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

#[cfg(feature = "camera")]
pub use camera::NativeCamera;
pub use frame::{EncodedImage, Frame, JPEG_MIME, RawFrame};
pub use still::StillImage;

use crate::retry::{RetryPolicy, delay_for_attempt};
use crate::{Error, Result};

/// A source of raw camera frames
///
/// Implementations run on the capture thread only and need not be `Send`.
pub trait FrameGrabber {
    /// Acquire the device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&mut self) -> Result<()>;

    /// Read the next frame, blocking until one is available
    ///
    /// # Errors
    ///
    /// Returns error if the device fails or disappears
    fn grab(&mut self) -> Result<RawFrame>;

    /// Release the device; safe to call when already closed
    fn close(&mut self);

    /// Human readable device name
    fn name(&self) -> String;

    /// Minimum time between grabs, for sources that do not pace themselves
    fn frame_interval(&self) -> Duration {
        Duration::ZERO
    }
}

/// Camera health changes reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Unavailable(String),
    Restored,
}

/// Read side of the current-frame slot
#[derive(Debug, Clone)]
pub struct FrameSlot {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameSlot {
    /// Most recent frame, `None` before the first one arrives
    #[must_use]
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    /// Wait until a newer frame is published
    ///
    /// # Errors
    ///
    /// Returns error once the writer is gone
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| Error::Camera("capture stopped".to_string()))
    }
}

/// Write side of the current-frame slot
#[derive(Debug)]
pub struct FrameWriter {
    tx: watch::Sender<Option<Arc<Frame>>>,
    next_seq: u64,
}

impl FrameWriter {
    /// Replace the current frame
    ///
    /// # Errors
    ///
    /// Returns error if the raw frame is malformed
    pub fn publish(&mut self, raw: RawFrame) -> Result<Arc<Frame>> {
        let frame = Arc::new(Frame::new(self.next_seq, raw)?);
        self.next_seq += 1;
        self.tx.send_replace(Some(Arc::clone(&frame)));
        Ok(frame)
    }
}

/// Create an empty frame slot
#[must_use]
pub fn frame_slot() -> (FrameWriter, FrameSlot) {
    let (tx, rx) = watch::channel(None);
    (FrameWriter { tx, next_seq: 1 }, FrameSlot { rx })
}

/// Handle to the running capture thread
///
/// Dropping it stops the thread and releases the device.
pub struct CaptureSource {
    slot: FrameSlot,
    device: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Spawn the capture thread and open the device on it
    ///
    /// `factory` builds the grabber on the capture thread, so grabbers that
    /// are not `Send` work. Returns once the first open has succeeded.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened at startup
    pub async fn start<F, G>(
        factory: F,
        retry: RetryPolicy,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<Self>
    where
        F: FnOnce() -> G + Send + 'static,
        G: FrameGrabber,
    {
        let (writer, slot) = frame_slot();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut grabber = factory();
                match grabber.open() {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(grabber.name()));
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                }
                run_capture(&mut grabber, writer, &retry, &events, &stop_rx);
                grabber.close();
                tracing::debug!("capture thread exiting");
            })?;

        let device = match ready_rx.await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::Camera("capture thread exited during startup".to_string()));
            }
        };

        tracing::info!(device = %device, "camera capture started");

        Ok(Self {
            slot,
            device,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Most recent frame, `None` before the first one arrives
    #[must_use]
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.slot.current()
    }

    /// A reader for the frame slot
    #[must_use]
    pub fn slot(&self) -> FrameSlot {
        self.slot.clone()
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Stop the thread and wait for the device to be released
    pub fn stop(&mut self) {
        // dropping the sender wakes the thread
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("capture thread panicked");
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether a stop was requested, waiting up to `wait` for one
fn stop_requested(stop_rx: &std_mpsc::Receiver<()>, wait: Duration) -> bool {
    let outcome = if wait.is_zero() {
        stop_rx.try_recv().map_err(|e| matches!(e, std_mpsc::TryRecvError::Empty))
    } else {
        stop_rx
            .recv_timeout(wait)
            .map_err(|e| matches!(e, std_mpsc::RecvTimeoutError::Timeout))
    };
    // Err(true) means nothing arrived and the sender is still alive
    !matches!(outcome, Err(true))
}

fn run_capture<G: FrameGrabber>(
    grabber: &mut G,
    mut writer: FrameWriter,
    retry: &RetryPolicy,
    events: &mpsc::UnboundedSender<CaptureEvent>,
    stop_rx: &std_mpsc::Receiver<()>,
) {
    let interval = grabber.frame_interval();

    loop {
        if stop_requested(stop_rx, Duration::ZERO) {
            return;
        }

        match grabber.grab() {
            Ok(raw) => {
                if let Err(e) = writer.publish(raw) {
                    tracing::warn!(error = %e, "dropping malformed frame");
                }
            }
            Err(e) => {
                tracing::warn!(device = %grabber.name(), error = %e, "camera unavailable");
                grabber.close();
                let _ = events.send(CaptureEvent::Unavailable(e.to_string()));

                if !reacquire(grabber, retry, stop_rx) {
                    return;
                }

                tracing::info!(device = %grabber.name(), "camera restored");
                let _ = events.send(CaptureEvent::Restored);
            }
        }

        if stop_requested(stop_rx, interval) {
            return;
        }
    }
}

/// Reopen the device with backoff; false if stopped first
fn reacquire<G: FrameGrabber>(
    grabber: &mut G,
    retry: &RetryPolicy,
    stop_rx: &std_mpsc::Receiver<()>,
) -> bool {
    let mut attempt = 0u32;
    loop {
        let delay = delay_for_attempt(retry, attempt);
        if stop_requested(stop_rx, delay) {
            return false;
        }

        match grabber.open() {
            Ok(()) => return true,
            Err(e) => {
                tracing::debug!(attempt, error = %e, "camera reopen failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Grabber following a script of grab/open outcomes
    struct Scripted {
        grabs: VecDeque<bool>,
        opens: VecDeque<bool>,
    }

    impl FrameGrabber for Scripted {
        fn open(&mut self) -> Result<()> {
            if self.opens.pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(Error::Camera("no device".to_string()))
            }
        }

        fn grab(&mut self) -> Result<RawFrame> {
            if self.grabs.pop_front().unwrap_or(true) {
                Ok(RawFrame {
                    width: 2,
                    height: 1,
                    rgb: vec![10, 20, 30, 40, 50, 60],
                })
            } else {
                Err(Error::Camera("unplugged".to_string()))
            }
        }

        fn close(&mut self) {}

        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn frame_interval(&self) -> Duration {
            Duration::from_millis(2)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn slot_starts_empty_and_replaces() {
        let (mut writer, slot) = frame_slot();
        assert!(slot.current().is_none());

        let raw = RawFrame {
            width: 1,
            height: 1,
            rgb: vec![1, 2, 3],
        };
        let first = writer.publish(raw.clone()).unwrap();
        let second = writer.publish(raw).unwrap();

        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);
        assert_eq!(slot.current().unwrap().seq(), 2);
        // an older snapshot is unaffected by the replacement
        assert_eq!(first.seq(), 1);
    }

    #[tokio::test]
    async fn startup_failure_is_reported() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let result = CaptureSource::start(
            || Scripted {
                grabs: VecDeque::new(),
                opens: VecDeque::from([false]),
            },
            fast_retry(),
            events_tx,
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recovers_after_device_loss() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let source = CaptureSource::start(
            || Scripted {
                grabs: VecDeque::from([true, false]),
                // startup open, then two failed reopens
                opens: VecDeque::from([true, false, false]),
            },
            fast_retry(),
            events_tx,
        )
        .await
        .unwrap();

        assert_eq!(
            events_rx.recv().await,
            Some(CaptureEvent::Unavailable("camera error: unplugged".to_string()))
        );
        assert_eq!(events_rx.recv().await, Some(CaptureEvent::Restored));

        let mut slot = source.slot();
        slot.changed().await.unwrap();
        assert!(source.current_frame().is_some());
        assert_eq!(source.device(), "scripted");
    }
}

//! Shared camera with bounded, cancellable operations.
//!
//! The camera is one exclusively owned resource. Every operation runs on a
//! worker thread behind a mutex; the caller waits at most a fixed budget.
//! On timeout the operation is cancelled, reported as failed and the
//! camera is flagged as needing an explicit restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::capture::CaptureError;
use crate::hardware::{FrameSource, HardwareError};

/// Cooperative cancellation flag shared with a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled; for use with `?` between steps.
    pub fn check(&self) -> Result<(), CaptureError> {
        if self.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to an operation running on a worker thread.
pub struct BoundedTask<T> {
    rx: mpsc::Receiver<Result<T, CaptureError>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> BoundedTask<T> {
    fn spawn<F>(op: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T, CaptureError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        thread::spawn(move || {
            // The receiver may be gone after a timeout.
            let _ = tx.send(op(&token));
        });
        Self { rx, cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wait up to `timeout` for the result; cancels the task on timeout.
    pub fn wait(self, timeout: Duration) -> Result<T, CaptureError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.cancel.cancel();
                Err(CaptureError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(HardwareError::Capture("camera worker terminated".into()).into())
            }
        }
    }
}

/// Camera shared between the calibration engine and other callers.
#[derive(Clone)]
pub struct SharedCamera {
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    busy: Arc<AtomicBool>,
    needs_restore: Arc<AtomicBool>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SharedCamera {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            source: Arc::new(Mutex::new(Box::new(source))),
            busy: Arc::new(AtomicBool::new(false)),
            needs_restore: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True after an operation timed out or failed mid-reconfiguration.
    pub fn needs_restore(&self) -> bool {
        self.needs_restore.load(Ordering::SeqCst)
    }

    pub fn mark_needs_restore(&self) {
        self.needs_restore.store(true, Ordering::SeqCst);
    }

    pub fn mark_restored(&self) {
        self.needs_restore.store(false, Ordering::SeqCst);
    }

    /// Start `op` with exclusive camera access.
    ///
    /// # Errors
    ///
    /// [`CaptureError::Busy`] if another operation is in flight.
    pub fn start<T, F>(&self, op: F) -> Result<BoundedTask<T>, CaptureError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn FrameSource, &CancelToken) -> Result<T, CaptureError> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CaptureError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());
        let source = self.source.clone();
        Ok(BoundedTask::spawn(move |cancel| {
            let _guard = guard;
            let mut camera = source
                .lock()
                .map_err(|_| HardwareError::Capture("camera lock poisoned".into()))?;
            cancel.check()?;
            op(&mut **camera, cancel)
        }))
    }

    /// Run `op` and wait at most `timeout`. A timeout or hardware failure
    /// flags the camera as needing restore.
    ///
    /// # Errors
    ///
    /// [`CaptureError::Timeout`], [`CaptureError::Busy`] or whatever `op`
    /// returns.
    pub fn run_bounded<T, F>(&self, timeout: Duration, op: F) -> Result<T, CaptureError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn FrameSource, &CancelToken) -> Result<T, CaptureError> + Send + 'static,
    {
        let result = self.start(op)?.wait(timeout);
        if let Err(e) = &result {
            if matches!(e, CaptureError::Timeout(_) | CaptureError::Hardware(_) | CaptureError::Unverified(_)) {
                tracing::warn!(error = %e, "camera left in unknown configuration");
                self.mark_needs_restore();
            }
        }
        result
    }

    /// Grab one combined frame within `timeout`.
    pub fn capture(&self, timeout: Duration) -> Result<image::GrayImage, CaptureError> {
        self.run_bounded(timeout, |source, _| Ok(source.capture()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Settings;
    use image::GrayImage;
    use quadcal_core::ImageSize;

    struct SlowSource {
        delay: Duration,
    }

    impl FrameSource for SlowSource {
        fn capture(&mut self) -> Result<GrayImage, HardwareError> {
            thread::sleep(self.delay);
            Ok(GrayImage::new(8, 2))
        }

        fn reconfigure(&mut self, _: ImageSize, _: &Settings) -> Result<(), HardwareError> {
            Err(HardwareError::Capture("offline".into()))
        }

        fn applied_controls(&self) -> Settings {
            Settings::default()
        }

        fn resolution(&self) -> ImageSize {
            ImageSize::new(8, 2)
        }
    }

    #[test]
    fn fast_operation_completes() {
        let camera = SharedCamera::new(SlowSource {
            delay: Duration::ZERO,
        });
        let frame = camera.capture(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.dimensions(), (8, 2));
        assert!(!camera.needs_restore());
    }

    #[test]
    fn timeout_flags_restore() {
        let camera = SharedCamera::new(SlowSource {
            delay: Duration::from_millis(300),
        });
        let err = camera.capture(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CaptureError::Timeout(_)));
        assert!(camera.needs_restore());
    }

    #[test]
    fn concurrent_operations_are_rejected() {
        let camera = SharedCamera::new(SlowSource {
            delay: Duration::from_millis(200),
        });
        let first = camera
            .start(|source, _| Ok(source.capture()?))
            .unwrap();
        assert!(matches!(
            camera.start(|source, _| Ok(source.resolution())),
            Err(CaptureError::Busy)
        ));
        first.wait(Duration::from_secs(5)).unwrap();
        assert!(camera.start(|source, _| Ok(source.resolution())).is_ok());
    }

    #[test]
    fn hardware_failure_is_reported() {
        let camera = SharedCamera::new(SlowSource {
            delay: Duration::ZERO,
        });
        let err = camera
            .run_bounded(Duration::from_secs(1), |source, _| {
                Ok(source.reconfigure(ImageSize::new(8, 2), &Settings::default())?)
            })
            .unwrap_err();
        assert!(matches!(err, CaptureError::Hardware(_)));
        assert!(camera.needs_restore());
    }
}

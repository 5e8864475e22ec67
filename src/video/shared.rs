//! Reference-counted camera
//!
//! Several consumers may want frames at once (the session and a local
//! preview, for instance). The device is opened with the first lease and
//! released when the last lease is dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::VideoConfig;
use crate::error::VideoError;
use crate::video::camera::{CameraCapture, CameraSource, CapturedFrame};

const FRAME_CHANNEL_CAPACITY: usize = 8;

struct LeaseState {
    leases: usize,
    capture: Option<CameraCapture>,
}

/// Shared access to one camera
pub struct SharedCamera {
    source: Arc<dyn CameraSource>,
    config: VideoConfig,
    stop_timeout: Duration,
    frames: broadcast::Sender<CapturedFrame>,
    state: Mutex<LeaseState>,
}

impl SharedCamera {
    pub fn new(source: Arc<dyn CameraSource>, config: VideoConfig, stop_timeout: Duration) -> Arc<Self> {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Arc::new(Self {
            source,
            config,
            stop_timeout,
            frames,
            state: Mutex::new(LeaseState {
                leases: 0,
                capture: None,
            }),
        })
    }

    /// Take a lease, opening the device if this is the first one.
    /// Blocks while the device opens.
    pub fn acquire(self: &Arc<Self>) -> Result<CameraLease, VideoError> {
        let mut state = self.state.lock();
        if state.capture.is_none() {
            let capture = CameraCapture::start(self.source.clone(), &self.config, self.frames.clone())?;
            state.capture = Some(capture);
        }
        state.leases += 1;
        tracing::debug!("Camera lease acquired ({} active)", state.leases);

        Ok(CameraLease {
            camera: self.clone(),
        })
    }

    fn release(&self) {
        let capture = {
            let mut state = self.state.lock();
            state.leases = state.leases.saturating_sub(1);
            tracing::debug!("Camera lease released ({} active)", state.leases);
            if state.leases == 0 {
                state.capture.take()
            } else {
                None
            }
        };

        if let Some(mut capture) = capture {
            capture.stop(self.stop_timeout);
            tracing::info!("Camera {} released", self.source.name());
        }
    }

    /// Whether a camera device is present
    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().leases
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capture.is_some()
    }
}

/// Proof of camera use. Dropping it releases the camera.
pub struct CameraLease {
    camera: Arc<SharedCamera>,
}

impl CameraLease {
    /// Frames captured from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CapturedFrame> {
        self.camera.frames.subscribe()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.camera.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::camera::SyntheticCamera;

    fn shared(camera: Arc<SyntheticCamera>) -> Arc<SharedCamera> {
        let config = VideoConfig {
            fps: 30,
            width: 32,
            height: 24,
            jpeg_quality: 50,
        };
        SharedCamera::new(camera, config, Duration::from_secs(1))
    }

    #[test]
    fn test_device_opened_once_and_closed_with_last_lease() {
        let camera = Arc::new(SyntheticCamera::new());
        let shared = shared(camera.clone());

        let first = shared.acquire().unwrap();
        let second = shared.acquire().unwrap();
        assert_eq!(shared.lease_count(), 2);
        assert_eq!(camera.open_count(), 1);

        drop(first);
        assert!(shared.is_capturing());
        assert_eq!(camera.close_count(), 0);

        drop(second);
        assert!(!shared.is_capturing());
        assert_eq!(camera.close_count(), 1);

        // Reopens on demand
        let _again = shared.acquire().unwrap();
        assert_eq!(camera.open_count(), 2);
    }

    #[test]
    fn test_failed_open_takes_no_lease() {
        let shared = shared(Arc::new(SyntheticCamera::unavailable()));
        assert!(!shared.is_available());
        assert!(shared.acquire().is_err());
        assert_eq!(shared.lease_count(), 0);
    }
}

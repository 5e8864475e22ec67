//! Camera capture
//!
//! The camera is opened and read on a dedicated thread (device handles are
//! not `Send` on every platform). Each tick grabs one image, JPEG-encodes it
//! and publishes both forms on a broadcast channel.

use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::audio::capture::join_with_timeout;
use crate::codec::JpegEncoder;
use crate::config::VideoConfig;
use crate::error::VideoError;

/// One captured camera frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp_ms: i64,
    /// Encoded image for transmission
    pub jpeg: Bytes,
    /// Raw image for self-view
    pub preview: Arc<RgbImage>,
}

/// An open camera. Lives on the capture thread only; closed on drop.
pub trait CameraStream {
    fn grab(&mut self) -> Result<RgbImage, VideoError>;
}

/// Something that can open a camera
pub trait CameraSource: Send + Sync {
    fn name(&self) -> String;

    fn is_available(&self) -> bool;

    /// Open the device. Called on the capture thread.
    fn open(&self, config: &VideoConfig) -> Result<Box<dyn CameraStream>, VideoError>;
}

/// Camera description for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub is_default: bool,
}

/// Moving gradient standing in for a camera
pub struct SyntheticCamera {
    available: bool,
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            available: true,
            opened: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A camera that reports itself absent and refuses to open
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    frame_number: u64,
    closed: Arc<AtomicU64>,
}

impl CameraStream for SyntheticStream {
    fn grab(&mut self) -> Result<RgbImage, VideoError> {
        let base = (self.frame_number % 256) as u8;
        self.frame_number += 1;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb([
                base.wrapping_add((x % 256) as u8),
                base.wrapping_add((y % 256) as u8),
                base.wrapping_add(((x + y) % 256) as u8),
            ])
        }))
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl CameraSource for SyntheticCamera {
    fn name(&self) -> String {
        "synthetic-gradient".to_string()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn open(&self, config: &VideoConfig) -> Result<Box<dyn CameraStream>, VideoError> {
        if !self.available {
            return Err(VideoError::CameraUnavailable(self.name()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            width: config.width,
            height: config.height,
            frame_number: 0,
            closed: self.closed.clone(),
        }))
    }
}

/// Running camera capture
pub struct CameraCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    frames_captured: Arc<AtomicU64>,
}

impl CameraCapture {
    /// Open the camera on a capture thread and start publishing frames.
    /// Returns once the device is open, or with the error that prevented it.
    pub fn start(
        source: Arc<dyn CameraSource>,
        config: &VideoConfig,
        frames: broadcast::Sender<CapturedFrame>,
    ) -> Result<Self, VideoError> {
        let running = Arc::new(AtomicBool::new(true));
        let frames_captured = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), VideoError>>(1);

        let running_thread = running.clone();
        let captured = frames_captured.clone();
        let config = config.clone();

        let handle = thread::Builder::new()
            .name("capture-camera".to_string())
            .spawn(move || {
                let mut stream = match source.open(&config) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                tracing::info!(
                    "Camera {} open ({}x{} @ {} fps)",
                    source.name(),
                    config.width,
                    config.height,
                    config.fps
                );
                let _ = ready_tx.send(Ok(()));

                let mut encoder = JpegEncoder::new(config.jpeg_quality);
                let interval = config.frame_interval();
                let mut last_timestamp = 0i64;
                let mut next_tick = Instant::now();

                while running_thread.load(Ordering::Relaxed) {
                    let image = match stream.grab() {
                        Ok(image) => image,
                        Err(e) => {
                            tracing::error!("Camera grab failed: {}", e);
                            break;
                        }
                    };

                    match encoder.encode(&image) {
                        Ok(jpeg) => {
                            // Frame identity is (sender, timestamp): keep it unique
                            let timestamp_ms = crate::now_millis().max(last_timestamp + 1);
                            last_timestamp = timestamp_ms;
                            captured.fetch_add(1, Ordering::Relaxed);
                            // No subscribers is fine
                            let _ = frames.send(CapturedFrame {
                                timestamp_ms,
                                jpeg,
                                preview: Arc::new(image),
                            });
                        }
                        Err(e) => tracing::warn!("Dropping frame: {}", e),
                    }

                    next_tick += interval;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    } else {
                        next_tick = now;
                    }
                }

                running_thread.store(false, Ordering::SeqCst);
                drop(stream);
                tracing::info!("Camera capture thread exiting");
            })
            .map_err(|e| VideoError::CameraUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => return Err(VideoError::CameraUnavailable("capture thread died".into())),
        }

        Ok(Self {
            running,
            thread_handle: Some(handle),
            frames_captured,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Stop the capture thread with a bounded wait
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            join_with_timeout(handle, timeout, "capture-camera");
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Default camera: the first system camera with `devices`, a gradient otherwise
pub fn default_camera() -> Arc<dyn CameraSource> {
    #[cfg(feature = "devices")]
    {
        Arc::new(nokhwa_backend::NokhwaCamera::new(0))
    }
    #[cfg(not(feature = "devices"))]
    {
        Arc::new(SyntheticCamera::new())
    }
}

/// List available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    #[cfg(feature = "devices")]
    {
        nokhwa_backend::list_cameras()
    }
    #[cfg(not(feature = "devices"))]
    {
        Vec::new()
    }
}

#[cfg(feature = "devices")]
pub mod nokhwa_backend {
    //! nokhwa camera

    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    };
    use nokhwa::Camera;

    use super::{CameraInfo, CameraSource, CameraStream};
    use crate::config::VideoConfig;
    use crate::error::VideoError;

    /// System camera by index
    pub struct NokhwaCamera {
        index: u32,
    }

    impl NokhwaCamera {
        pub fn new(index: u32) -> Self {
            Self { index }
        }
    }

    struct NokhwaStream {
        camera: Camera,
    }

    impl CameraStream for NokhwaStream {
        fn grab(&mut self) -> Result<RgbImage, VideoError> {
            let frame = self
                .camera
                .frame()
                .map_err(|e| VideoError::GrabFailed(e.to_string()))?;
            frame
                .decode_image::<RgbFormat>()
                .map_err(|e| VideoError::GrabFailed(e.to_string()))
        }
    }

    impl Drop for NokhwaStream {
        fn drop(&mut self) {
            if let Err(e) = self.camera.stop_stream() {
                tracing::warn!("Failed to close camera stream: {}", e);
            }
        }
    }

    impl CameraSource for NokhwaCamera {
        fn name(&self) -> String {
            format!("camera-{}", self.index)
        }

        fn is_available(&self) -> bool {
            nokhwa::query(ApiBackend::Auto)
                .map(|devices| devices.iter().any(|d| d.index().as_index().ok() == Some(self.index)))
                .unwrap_or(false)
        }

        fn open(&self, config: &VideoConfig) -> Result<Box<dyn CameraStream>, VideoError> {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(
                    Resolution::new(config.width, config.height),
                    FrameFormat::MJPEG,
                    config.fps,
                ),
            ));

            let mut camera = Camera::new(CameraIndex::Index(self.index), requested)
                .map_err(|e| VideoError::CameraUnavailable(e.to_string()))?;
            camera
                .open_stream()
                .map_err(|e| VideoError::CameraUnavailable(e.to_string()))?;

            Ok(Box::new(NokhwaStream { camera }))
        }
    }

    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(devices) => devices
                .into_iter()
                .enumerate()
                .map(|(i, info)| CameraInfo {
                    index: info.index().as_index().unwrap_or(i as u32),
                    name: info.human_name().to_string(),
                    is_default: i == 0,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to query cameras: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VideoConfig {
        VideoConfig {
            fps: 30,
            width: 64,
            height: 48,
            jpeg_quality: 60,
        }
    }

    #[test]
    fn test_synthetic_frames_differ() {
        let camera = SyntheticCamera::new();
        let mut stream = camera.open(&small_config()).unwrap();
        let first = stream.grab().unwrap();
        let second = stream.grab().unwrap();
        assert_eq!(first.dimensions(), (64, 48));
        assert_ne!(first, second);
    }

    #[test]
    fn test_capture_publishes_jpeg_and_preview() {
        let camera = Arc::new(SyntheticCamera::new());
        let (tx, mut rx) = broadcast::channel(8);
        let mut capture = CameraCapture::start(camera.clone(), &small_config(), tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        let frame = loop {
            match rx.try_recv() {
                Ok(frame) => break frame,
                Err(_) => {
                    assert!(Instant::now() < deadline, "no frame captured");
                    thread::sleep(Duration::from_millis(5));
                }
            }
        };
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(frame.preview.dimensions(), (64, 48));

        capture.stop(Duration::from_secs(1));
        assert!(!capture.is_running());
        assert_eq!(camera.close_count(), 1);
    }

    #[test]
    fn test_unavailable_camera_fails_start() {
        let camera = Arc::new(SyntheticCamera::unavailable());
        let (tx, _rx) = broadcast::channel(8);
        let result = CameraCapture::start(camera, &small_config(), tx);
        assert!(matches!(result, Err(VideoError::CameraUnavailable(_))));
    }
}

//! Video subsystem module

pub mod camera;
pub mod shared;

pub use camera::{
    default_camera, list_cameras, CameraCapture, CameraInfo, CameraSource, CameraStream, CapturedFrame,
    SyntheticCamera,
};
pub use shared::{CameraLease, SharedCamera};

//! JPEG decoder wrapper

use image::{ImageFormat, RgbImage};

use crate::error::VideoError;

/// JPEG decoder producing displayable RGB images
#[derive(Default)]
pub struct JpegDecoder {
    frames_decoded: u64,
    frames_failed: u64,
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a complete JPEG frame
    pub fn decode(&mut self, data: &[u8]) -> Result<RgbImage, VideoError> {
        match image::load_from_memory_with_format(data, ImageFormat::Jpeg) {
            Ok(image) => {
                self.frames_decoded += 1;
                Ok(image.to_rgb8())
            }
            Err(e) => {
                self.frames_failed += 1;
                Err(VideoError::DecodingFailed(e.to_string()))
            }
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }
}

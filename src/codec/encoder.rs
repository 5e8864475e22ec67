//! JPEG encoder wrapper
//!
//! Turns raw RGB camera frames into the compressed bytes that are
//! fragmented onto the wire.

use bytes::Bytes;
use image::codecs::jpeg;
use image::RgbImage;

use crate::error::VideoError;

/// JPEG encoder with a fixed quality setting
pub struct JpegEncoder {
    quality: u8,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl JpegEncoder {
    /// Create an encoder. Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            encode_buffer: Vec::with_capacity(64 * 1024),
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode one RGB frame
    pub fn encode(&mut self, frame: &RgbImage) -> Result<Bytes, VideoError> {
        self.encode_buffer.clear();
        let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut self.encode_buffer, self.quality);
        encoder
            .encode_image(frame)
            .map_err(|e| VideoError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += self.encode_buffer.len() as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer))
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding() {
        let mut encoder = JpegEncoder::new(70);
        let frame = RgbImage::from_pixel(64, 48, image::Rgb([200, 30, 30]));

        let encoded = encoder.encode(&frame).unwrap();
        // SOI marker
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
        assert!(encoded.len() < 64 * 48 * 3);

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, encoded.len() as u64);
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(255).quality(), 100);
    }
}

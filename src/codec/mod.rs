//! JPEG frame codec
//!
//! Camera frames travel as JPEG images. The encoder runs on the capture
//! thread, the decoder on the video receive loop.

pub mod encoder;
pub mod decoder;

pub use encoder::JpegEncoder;
pub use decoder::JpegDecoder;

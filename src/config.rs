//! Configuration for the relay
//!
//! Every tunable named by the wire protocol and the pipelines lives here so
//! deployments can adjust them from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub protocol: ProtocolConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub directory: DirectoryConfig,
    pub reassembly: ReassemblyConfig,
    pub session: SessionTimingConfig,
}

/// Wire protocol sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Maximum payload bytes carried by one video fragment
    pub video_fragment_payload: usize,
    /// Largest datagram the transport will emit
    pub max_datagram_size: usize,
    /// Raw file bytes carried by one FILE_CHUNK message
    pub file_chunk_size: usize,
    /// Upper bound on `total` accepted from a fragment header
    pub max_fragments_per_frame: u32,
    /// Size of the receive buffer used by each receive loop
    pub recv_buffer_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            video_fragment_payload: DEFAULT_VIDEO_FRAGMENT_PAYLOAD,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            file_chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            max_fragments_per_frame: DEFAULT_MAX_FRAGMENTS_PER_FRAME,
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

/// Microphone and playback settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration of one captured buffer (one audio unit on the wire)
    pub buffer_ms: u32,
    /// Buffers queued per remote sender before new ones are dropped
    pub playback_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            buffer_ms: DEFAULT_AUDIO_BUFFER_MS,
            playback_queue_capacity: DEFAULT_PLAYBACK_QUEUE_CAPACITY,
        }
    }
}

impl AudioConfig {
    /// Samples (all channels) in one captured buffer
    pub fn samples_per_buffer(&self) -> usize {
        (self.sample_rate as usize * self.buffer_ms as usize / 1000) * self.channels as usize
    }

    /// Bytes in one captured buffer of 16-bit PCM
    pub fn bytes_per_buffer(&self) -> usize {
        self.samples_per_buffer() * 2
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(self.buffer_ms as u64)
    }
}

/// Camera capture settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_CAPTURE_FPS,
            width: DEFAULT_VIDEO_WIDTH,
            height: DEFAULT_VIDEO_HEIGHT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl VideoConfig {
    /// Interval between two grabs
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }
}

/// Peer directory refresh and circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub refresh_interval_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl DirectoryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Expiry of incomplete frames and file transfers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReassemblyConfig {
    pub timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_REASSEMBLY_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl ReassemblyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionTimingConfig {
    /// Bounded wait on each background loop during stop before it is aborted
    pub stop_timeout_ms: u64,
    /// Capacity of the event channel towards the consumer
    pub event_capacity: usize,
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionTimingConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Per-user default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "room-relay", "room-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject combinations the protocol cannot honour
    pub fn validate(&self) -> Result<()> {
        let p = &self.protocol;
        if p.video_fragment_payload == 0 || p.file_chunk_size == 0 {
            return Err(Error::Config("fragment and chunk sizes must be non-zero".into()));
        }
        // Headers carry a sender id as well; keep a margin for it
        if p.video_fragment_payload + VIDEO_HEADER_FIXED + MAX_SENDER_ID_BYTES > p.max_datagram_size {
            return Err(Error::Config(format!(
                "video_fragment_payload {} does not fit a {}-byte datagram",
                p.video_fragment_payload, p.max_datagram_size
            )));
        }
        if p.file_chunk_size + CHAT_HEADER_SIZE + FILE_CHUNK_HEADER_SIZE > p.max_datagram_size {
            return Err(Error::Config(format!(
                "file_chunk_size {} does not fit a {}-byte datagram",
                p.file_chunk_size, p.max_datagram_size
            )));
        }
        if p.recv_buffer_size < p.max_datagram_size {
            return Err(Error::Config("recv_buffer_size is smaller than max_datagram_size".into()));
        }
        if p.max_fragments_per_frame == 0 {
            return Err(Error::Config("max_fragments_per_frame must be non-zero".into()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 || self.audio.buffer_ms == 0 {
            return Err(Error::Config("audio format must be non-zero".into()));
        }
        if self.audio.bytes_per_buffer() + MAX_SENDER_ID_BYTES + AUDIO_HEADER_FIXED > p.max_datagram_size {
            return Err(Error::Config("audio buffer does not fit one datagram".into()));
        }
        if self.audio.playback_queue_capacity == 0 {
            return Err(Error::Config("playback_queue_capacity must be non-zero".into()));
        }
        if self.video.fps == 0 || self.video.fps > 120 {
            return Err(Error::Config(format!("unsupported fps: {}", self.video.fps)));
        }
        if self.video.jpeg_quality == 0 || self.video.jpeg_quality > 100 {
            return Err(Error::Config(format!("jpeg_quality out of range: {}", self.video.jpeg_quality)));
        }
        if self.directory.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be non-zero".into()));
        }
        if self.session.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.bytes_per_buffer(), 6400);
        assert_eq!(config.video.frame_interval(), Duration::from_millis(66));
    }

    #[test]
    fn test_oversized_fragment_rejected() {
        let mut config = AppConfig::default();
        config.protocol.video_fragment_payload = config.protocol.max_datagram_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.toml");

        let mut config = AppConfig::default();
        config.video.fps = 10;
        config.directory.failure_threshold = 5;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[video]\nfps = 5\n").unwrap();
        assert_eq!(config.video.fps, 5);
        assert_eq!(config.video.width, DEFAULT_VIDEO_WIDTH);
        assert_eq!(config.protocol, ProtocolConfig::default());
    }
}

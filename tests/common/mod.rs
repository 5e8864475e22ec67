//! Loopback room fixtures shared by the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use room_relay::audio::{AudioOutput, PcmSink};
use room_relay::config::{AppConfig, AudioConfig};
use room_relay::directory::{PeerEndpoint, StaticDirectory};
use room_relay::error::AudioError;
use room_relay::session::{RoomKind, SessionBuilder, SessionConfig, SessionEvent, StreamSession};

pub const ROOM: &str = "room-42";
pub const HUB: &str = "proctor";

pub fn endpoint(id: &str) -> PeerEndpoint {
    let sockets: Vec<_> = (0..3)
        .map(|_| std::net::UdpSocket::bind("127.0.0.1:0").unwrap())
        .collect();
    let ports: Vec<u16> = sockets.iter().map(|s| s.local_addr().unwrap().port()).collect();
    PeerEndpoint::new(id, IpAddr::V4(Ipv4Addr::LOCALHOST), ports[0], ports[1], ports[2])
}

/// Fast timings so tests do not wait on production intervals
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.buffer_ms = 20;
    config.directory.refresh_interval_ms = 50;
    config.directory.heartbeat_interval_ms = 100;
    config.reassembly.sweep_interval_ms = 100;
    config.session.stop_timeout_ms = 500;
    config.video.width = 64;
    config.video.height = 48;
    config.video.fps = 10;
    config
}

pub fn builder(directory: &Arc<StaticDirectory>, local_id: &str, app: AppConfig) -> SessionBuilder {
    StreamSession::builder(
        SessionConfig::new(local_id, ROOM, HUB, RoomKind::Meeting),
        directory.clone(),
    )
    .app_config(app)
    .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub struct Participant {
    pub session: StreamSession,
    pub events: mpsc::Receiver<SessionEvent>,
}

impl Participant {
    pub async fn start(builder: SessionBuilder) -> Self {
        Self::start_with_capacity(builder, 256).await
    }

    /// Start with an event channel of `capacity` slots
    pub async fn start_with_capacity(builder: SessionBuilder, capacity: usize) -> Self {
        let session = builder.build();
        let (tx, events) = mpsc::channel(capacity);
        session.start(None, tx).await.unwrap();
        Self { session, events }
    }

    /// Wait for the first event matching `predicate`, skipping others
    pub async fn expect<F>(&mut self, mut predicate: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event not received")
    }

    /// Collect events for `window`
    pub async fn drain_for(&mut self, window: Duration) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            seen.push(event);
        }
        seen
    }
}

/// Records every PCM buffer written, tagged with its sender
#[derive(Default, Clone)]
pub struct RecordingOutput {
    pub written: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl RecordingOutput {
    pub fn count_from(&self, sender_id: &str) -> usize {
        self.written.lock().iter().filter(|(s, _)| s == sender_id).count()
    }
}

struct RecordingSink {
    sender: String,
    written: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl PcmSink for RecordingSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.written
            .lock()
            .push((self.sender.clone(), Bytes::copy_from_slice(pcm)));
        Ok(())
    }
}

impl AudioOutput for RecordingOutput {
    fn name(&self) -> String {
        "recording".into()
    }

    fn open(&self, sender_id: &str, _config: &AudioConfig) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(RecordingSink {
            sender: sender_id.to_string(),
            written: self.written.clone(),
        }))
    }
}

pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

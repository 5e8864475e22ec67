//! Media sender
//!
//! Encodes outgoing media into datagrams and sends them to a list of
//! targets. Also forwards already-encoded datagrams on behalf of the relay.

use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::config::ProtocolConfig;
use crate::error::NetworkError;
use crate::protocol::{self, ChatMessageType, MediaKind};

/// Sockets of one session, one per media class
#[derive(Clone)]
pub struct MediaSockets {
    pub video: Arc<UdpSocket>,
    pub audio: Arc<UdpSocket>,
    pub chat: Arc<UdpSocket>,
}

impl MediaSockets {
    pub fn get(&self, kind: MediaKind) -> &Arc<UdpSocket> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
            MediaKind::Chat => &self.chat,
        }
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Every datagram sent, forwarded ones included
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// The share of `packets_sent` relayed for other senders
    pub packets_forwarded: u64,
    pub send_errors: u64,
}

#[derive(Default)]
struct SenderCounters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_forwarded: AtomicU64,
    send_errors: AtomicU64,
}

/// Outgoing side of a session
pub struct MediaSender {
    /// Written into every header this node originates
    sender_id: String,
    /// Fragment and chunk sizes
    config: ProtocolConfig,
    sockets: MediaSockets,
    counters: SenderCounters,
}

impl MediaSender {
    pub fn new(sender_id: impl Into<String>, config: ProtocolConfig, sockets: MediaSockets) -> Self {
        Self {
            sender_id: sender_id.into(),
            config,
            sockets,
            counters: SenderCounters::default(),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Send one datagram to every target; returns how many sends succeeded.
    /// Failures are logged and counted, never fatal.
    pub async fn send_datagram(&self, kind: MediaKind, datagram: &[u8], targets: &[SocketAddr]) -> usize {
        if datagram.len() > self.config.max_datagram_size {
            tracing::warn!("{} {}", kind, NetworkError::PacketTooLarge(datagram.len()));
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let socket = self.sockets.get(kind);
        let mut delivered = 0;
        for target in targets {
            match socket.send_to(datagram, target).await {
                Ok(sent) => {
                    delivered += 1;
                    self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("{} send to {} failed: {}", kind, target, e);
                }
            }
        }
        delivered
    }

    /// Fragment and send one encoded camera frame; returns the fragment count
    pub async fn send_video_frame(&self, timestamp_ms: i64, jpeg: &[u8], targets: &[SocketAddr]) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let fragments = protocol::fragment_frame(
            &self.sender_id,
            timestamp_ms,
            jpeg,
            self.config.video_fragment_payload,
        );
        for fragment in &fragments {
            self.send_datagram(MediaKind::Video, fragment, targets).await;
        }
        fragments.len()
    }

    /// Send one PCM buffer as a single audio unit
    pub async fn send_audio(&self, timestamp_ms: i64, pcm: &[u8], targets: &[SocketAddr]) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let unit = protocol::encode_audio_unit(&self.sender_id, timestamp_ms, pcm);
        self.send_datagram(MediaKind::Audio, &unit, targets).await
    }

    /// Send one chat or control message
    pub async fn send_chat(&self, message_type: ChatMessageType, payload: &[u8], targets: &[SocketAddr]) -> usize {
        let message = protocol::encode_chat_message(message_type, &self.sender_id, payload);
        self.send_datagram(MediaKind::Chat, &message, targets).await
    }

    /// Send a whole file as FILE_START, FILE_CHUNK..., FILE_END; returns the
    /// number of messages
    pub async fn send_file(&self, file_name: &str, data: &[u8], targets: &[SocketAddr]) -> usize {
        let messages = protocol::split_file(&self.sender_id, file_name, data, self.config.file_chunk_size);
        for message in &messages {
            self.send_datagram(MediaKind::Chat, message, targets).await;
            tokio::task::yield_now().await;
        }
        messages.len()
    }

    /// Relay a datagram received from another peer, unmodified
    pub async fn forward(&self, kind: MediaKind, datagram: &Bytes, targets: &[SocketAddr]) -> usize {
        let delivered = self.send_datagram(kind, datagram, targets).await;
        self.counters
            .packets_forwarded
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_forwarded: self.counters.packets_forwarded.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::udp::bind_udp;

    async fn loopback() -> Arc<UdpSocket> {
        Arc::new(bind_udp("127.0.0.1:0".parse().unwrap(), &ProtocolConfig::default()).unwrap())
    }

    async fn sender(id: &str) -> MediaSender {
        let sockets = MediaSockets {
            video: loopback().await,
            audio: loopback().await,
            chat: loopback().await,
        };
        MediaSender::new(id, ProtocolConfig::default(), sockets)
    }

    #[tokio::test]
    async fn test_video_frame_is_fragmented() {
        let sender = sender("alice").await;
        let receiver = loopback().await;
        let target = receiver.local_addr().unwrap();

        let frame = vec![7u8; 150_000];
        let sent = sender.send_video_frame(42, &frame, &[target]).await;
        assert_eq!(sent, 3);

        let mut buf = vec![0u8; 65_536];
        let mut total_payload = 0;
        for _ in 0..3 {
            let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
            let fragment = protocol::decode_video_fragment(Bytes::copy_from_slice(&buf[..len])).unwrap();
            assert_eq!(fragment.sender_id, "alice");
            assert_eq!(fragment.total, 3);
            total_payload += fragment.payload.len();
        }
        assert_eq!(total_payload, 150_000);
        assert_eq!(sender.stats().packets_sent, 3);
    }

    #[tokio::test]
    async fn test_forward_sends_bytes_unchanged() {
        let sender = sender("hub").await;
        let receiver = loopback().await;
        let target = receiver.local_addr().unwrap();

        let datagram = protocol::encode_audio_unit("bob", 9, b"pcm-data");
        assert_eq!(sender.forward(MediaKind::Audio, &datagram, &[target]).await, 1);

        let mut buf = vec![0u8; 1024];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &datagram[..]);
        assert_eq!(sender.stats().packets_forwarded, 1);
    }

    #[tokio::test]
    async fn test_oversized_datagram_refused() {
        let sender = sender("alice").await;
        let receiver = loopback().await;
        let target = receiver.local_addr().unwrap();

        let huge = vec![0u8; 70_000];
        assert_eq!(sender.send_datagram(MediaKind::Chat, &huge, &[target]).await, 0);
        assert_eq!(sender.stats().send_errors, 1);
    }
}

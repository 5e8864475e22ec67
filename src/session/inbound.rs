//! Inbound datagram handling
//!
//! Runs on the receive loops. Each datagram is decoded, relayed according
//! to the session role, then delivered locally. Forwarding happens inline
//! so packets of one sender leave the hub in the order they arrived.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::SessionEvent;
use crate::audio::PlaybackMixer;
use crate::codec::JpegDecoder;
use crate::error::ProtocolError;
use crate::network::{DatagramHandler, MediaSender};
use crate::protocol::{
    decode_audio_unit, decode_chat_message, decode_video_fragment, wire_sender_id, ChatMessageType,
    FileAssembler, FrameReassembler, MediaKind,
};
use crate::relay::Relay;

/// Sends events to the consumer without ever blocking a receive loop.
///
/// Frames are offered with `try_send` and counted when the consumer is
/// behind. Chat, files and hub departure are queued and handed over by a
/// forwarder task that waits for room, so they are never lost to frames.
#[derive(Clone)]
pub(crate) struct EventSink {
    frames: mpsc::Sender<SessionEvent>,
    control: mpsc::UnboundedSender<SessionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Create the sink and spawn its forwarder. The forwarder ends once
    /// every clone of the sink is dropped and its queue is drained.
    pub(crate) fn spawn(tx: mpsc::Sender<SessionEvent>, dropped: Arc<AtomicU64>) -> (Self, JoinHandle<()>) {
        let (control, mut pending) = mpsc::unbounded_channel::<SessionEvent>();
        let consumer = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                if consumer.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!("Event forwarder exiting");
        });
        (
            Self {
                frames: tx,
                control,
                dropped,
            },
            forwarder,
        )
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::VideoFrame { .. } | SessionEvent::LocalPreview { .. } => {
                if let Err(mpsc::error::TrySendError::Full(_)) = self.frames.try_send(event) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Event consumer behind, dropping frame");
                }
            }
            control => {
                if self.control.send(control).is_err() {
                    tracing::debug!("Event consumer gone");
                }
            }
        }
    }

    /// Whether anyone still listens for frames
    pub(crate) fn wants_frames(&self) -> bool {
        !self.frames.is_closed()
    }
}

pub(crate) struct InboundHandler {
    local_id: String,
    relay: Arc<Relay>,
    sender: Arc<MediaSender>,
    frames: Arc<FrameReassembler>,
    files: Arc<FileAssembler>,
    playback: Arc<PlaybackMixer>,
    /// Shared with the blocking pool, where decoding runs
    decoder: Arc<Mutex<JpegDecoder>>,
    events: EventSink,
}

impl InboundHandler {
    pub(crate) fn new(
        local_id: String,
        relay: Arc<Relay>,
        sender: Arc<MediaSender>,
        frames: Arc<FrameReassembler>,
        files: Arc<FileAssembler>,
        playback: Arc<PlaybackMixer>,
        events: EventSink,
    ) -> Self {
        Self {
            local_id,
            relay,
            sender,
            frames,
            files,
            playback,
            decoder: Arc::new(Mutex::new(JpegDecoder::new())),
            events,
        }
    }

    fn is_own(&self, kind: MediaKind, origin: &str) -> bool {
        match kind {
            MediaKind::Chat => wire_sender_id(&self.local_id) == origin,
            _ => self.local_id == origin,
        }
    }

    /// Forward per the relay decision; returns whether to deliver locally
    async fn relay(&self, kind: MediaKind, origin: &str, datagram: &Bytes) -> bool {
        let decision = self.relay.inbound(kind, origin);
        if !decision.forward_to.is_empty() {
            self.sender.forward(kind, datagram, &decision.forward_to).await;
        }
        decision.deliver_local
    }

    async fn on_video(&self, datagram: Bytes) -> Result<(), ProtocolError> {
        let fragment = decode_video_fragment(datagram.clone())?;
        if self.is_own(MediaKind::Video, &fragment.sender_id) {
            return Ok(());
        }
        if !self.relay(MediaKind::Video, &fragment.sender_id, &datagram).await {
            return Ok(());
        }

        let Some(frame) = self.frames.insert(fragment, Instant::now()) else {
            return Ok(());
        };
        if !self.events.wants_frames() {
            return Ok(());
        }

        let decoder = self.decoder.clone();
        let data = frame.data.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.lock().decode(&data)).await;
        match decoded {
            Ok(Ok(image)) => self.events.emit(SessionEvent::VideoFrame {
                sender_id: frame.sender_id,
                timestamp_ms: frame.timestamp_ms,
                image: Arc::new(image),
            }),
            Ok(Err(e)) => tracing::debug!("Undecodable frame from {}: {}", frame.sender_id, e),
            Err(e) => tracing::error!("Frame decode task failed: {}", e),
        }
        Ok(())
    }

    async fn on_audio(&self, datagram: Bytes) -> Result<(), ProtocolError> {
        let unit = decode_audio_unit(datagram.clone())?;
        if self.is_own(MediaKind::Audio, &unit.sender_id) {
            return Ok(());
        }
        if self.relay(MediaKind::Audio, &unit.sender_id, &datagram).await {
            self.playback.play(&unit.sender_id, unit.payload);
        }
        Ok(())
    }

    async fn on_chat(&self, datagram: Bytes) -> Result<(), ProtocolError> {
        let message = decode_chat_message(datagram.clone())?;
        if self.is_own(MediaKind::Chat, &message.sender_id) {
            return Ok(());
        }
        if !self.relay(MediaKind::Chat, &message.sender_id, &datagram).await {
            return Ok(());
        }

        if message.message_type == ChatMessageType::Text {
            let text = String::from_utf8_lossy(&message.payload).into_owned();
            self.events.emit(SessionEvent::ChatText {
                sender_id: message.sender_id,
                text,
            });
            return Ok(());
        }

        if let Some(file) = self.files.handle(&message, Instant::now())? {
            tracing::info!(
                "Received file {} ({} bytes) from {}",
                file.file_name,
                file.data.len(),
                file.sender_id
            );
            self.events.emit(SessionEvent::FileReceived {
                sender_id: file.sender_id,
                file_name: file.file_name,
                data: file.data,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DatagramHandler for InboundHandler {
    async fn handle(&self, kind: MediaKind, datagram: Bytes, _from: SocketAddr) -> Result<(), ProtocolError> {
        match kind {
            MediaKind::Video => self.on_video(datagram).await,
            MediaKind::Audio => self.on_audio(datagram).await,
            MediaKind::Chat => self.on_chat(datagram).await,
        }
    }
}

//! Receive loops
//!
//! One tokio task per socket. Each datagram is handed to a
//! [`DatagramHandler`]; a handler error means the packet was malformed, which
//! is logged and counted while the loop carries on.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ProtocolError;
use crate::protocol::MediaKind;

/// Processes datagrams received on one media socket
#[async_trait]
pub trait DatagramHandler: Send + Sync {
    async fn handle(&self, kind: MediaKind, datagram: Bytes, from: SocketAddr) -> Result<(), ProtocolError>;
}

/// Receive statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
}

/// Counters shared by all receive loops of a session
#[derive(Debug, Default)]
pub struct ReceiveCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    malformed_packets: AtomicU64,
}

impl ReceiveCounters {
    pub fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the receive loop of one socket.
///
/// The loop ends when `shutdown` flips to true or its sender is dropped.
/// Socket errors seen after shutdown was requested are not reported.
pub fn spawn_receive_loop(
    kind: MediaKind,
    socket: Arc<UdpSocket>,
    handler: Arc<dyn DatagramHandler>,
    buffer_size: usize,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<ReceiveCounters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        tracing::debug!("{} receive loop started", kind);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => {
                        counters.packets_received.fetch_add(1, Ordering::Relaxed);
                        counters.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

                        let datagram = Bytes::copy_from_slice(&buf[..len]);
                        if let Err(e) = handler.handle(kind, datagram, from).await {
                            counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!("Malformed {} packet from {}: {}", kind, from, e);
                        }
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        // ICMP port unreachable surfaces here on some platforms
                        tracing::warn!("{} receive error: {}", kind, e);
                    }
                },
            }
        }

        tracing::debug!("{} receive loop exiting", kind);
    })
}

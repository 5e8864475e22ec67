//! Reassembly of fragmented video frames and chunked file transfers
//!
//! Buffers are keyed by `(sender, timestamp)` for frames and by sender for
//! files. A buffer is removed the moment it completes. Incomplete buffers are
//! evicted by [`FrameReassembler::sweep`] / [`FileAssembler::sweep`] once
//! they are older than the configured timeout, so a sender that vanishes
//! mid-frame or mid-file does not leak memory.

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::chat::{ChatMessage, ChatMessageType, FileChunk, FileMetadata};
use super::video::VideoFragment;
use crate::error::ProtocolError;

/// Upper bound on chunks announced by a FILE_START
pub const MAX_FILE_CHUNKS: u32 = 1 << 16;

/// A complete encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    pub sender_id: String,
    pub timestamp_ms: i64,
    pub data: Bytes,
}

fn concat(parts: BTreeMap<u32, Bytes>) -> Bytes {
    let len = parts.values().map(Bytes::len).sum();
    let mut out = BytesMut::with_capacity(len);
    for part in parts.into_values() {
        out.extend_from_slice(&part);
    }
    out.freeze()
}

struct PartialFrame {
    /// First fragment arrival; expiry counts from here
    created: Instant,
    /// Fragment count announced by the first fragment seen
    total: u32,
    /// Payloads keyed by sequence number, duplicates ignored
    fragments: BTreeMap<u32, Bytes>,
}

/// Collects video fragments until every sequence number of a frame arrived
pub struct FrameReassembler {
    frames: DashMap<(String, i64), PartialFrame>,
    max_fragments: u32,
    timeout: Duration,
    completed: AtomicU64,
    evicted: AtomicU64,
}

impl FrameReassembler {
    pub fn new(max_fragments: u32, timeout: Duration) -> Self {
        Self {
            frames: DashMap::new(),
            max_fragments,
            timeout,
            completed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Add a fragment. Returns the frame once all `total` distinct
    /// fragments are present, regardless of arrival order.
    pub fn insert(&self, fragment: VideoFragment, now: Instant) -> Option<AssembledFrame> {
        let VideoFragment {
            sender_id,
            timestamp_ms,
            seq,
            total,
            payload,
        } = fragment;

        if total > self.max_fragments {
            tracing::debug!("Dropping fragment of {}: total {} exceeds limit", sender_id, total);
            return None;
        }

        if total == 1 {
            self.completed.fetch_add(1, Ordering::Relaxed);
            return Some(AssembledFrame {
                sender_id,
                timestamp_ms,
                data: payload,
            });
        }

        match self.frames.entry((sender_id.clone(), timestamp_ms)) {
            Entry::Occupied(mut occupied) => {
                let partial = occupied.get_mut();
                if partial.total != total {
                    tracing::debug!(
                        "Fragment total mismatch for {}@{}: {} vs {}",
                        sender_id,
                        timestamp_ms,
                        total,
                        partial.total
                    );
                    return None;
                }
                partial.fragments.entry(seq).or_insert(payload);
                if partial.fragments.len() < partial.total as usize {
                    return None;
                }

                let partial = occupied.remove();
                self.completed.fetch_add(1, Ordering::Relaxed);
                Some(AssembledFrame {
                    sender_id,
                    timestamp_ms,
                    data: concat(partial.fragments),
                })
            }
            Entry::Vacant(vacant) => {
                let mut fragments = BTreeMap::new();
                fragments.insert(seq, payload);
                vacant.insert(PartialFrame {
                    created: now,
                    total,
                    fragments,
                });
                None
            }
        }
    }

    /// Drop frames older than the timeout. Returns how many were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.frames.retain(|(sender, ts), partial| {
            let keep = now.duration_since(partial.created) < self.timeout;
            if !keep {
                tracing::debug!(
                    "Evicting incomplete frame {}@{} ({}/{} fragments)",
                    sender,
                    ts,
                    partial.fragments.len(),
                    partial.total
                );
                evicted += 1;
            }
            keep
        });
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Frames currently waiting for fragments
    pub fn pending(&self) -> usize {
        self.frames.len()
    }

    pub fn frames_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn frames_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.frames.clear();
    }
}

/// A file received in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub sender_id: String,
    pub file_name: String,
    pub data: Bytes,
}

struct PartialFile {
    /// Refreshed by every chunk; expiry counts from here
    last_activity: Instant,
    metadata: FileMetadata,
    chunks: BTreeMap<u32, Bytes>,
}

impl PartialFile {
    fn is_complete(&self) -> bool {
        self.chunks.len() == self.metadata.total_chunks as usize
    }
}

/// Rebuilds files from FILE_START / FILE_CHUNK / FILE_END messages
pub struct FileAssembler {
    transfers: DashMap<String, PartialFile>,
    timeout: Duration,
    completed: AtomicU64,
    evicted: AtomicU64,
}

impl FileAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            transfers: DashMap::new(),
            timeout,
            completed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Feed a file-transfer control message. TEXT messages are ignored.
    pub fn handle(&self, message: &ChatMessage, now: Instant) -> Result<Option<ReceivedFile>, ProtocolError> {
        match message.message_type {
            ChatMessageType::Text => Ok(None),
            ChatMessageType::FileStart => {
                let metadata = FileMetadata::parse(&message.payload)?;
                self.on_start(&message.sender_id, metadata, now);
                Ok(None)
            }
            ChatMessageType::FileChunk => {
                let chunk = FileChunk::decode(message.payload.clone())?;
                Ok(self.on_chunk(&message.sender_id, chunk, now))
            }
            ChatMessageType::FileEnd => {
                let file_name = String::from_utf8_lossy(&message.payload);
                Ok(self.on_end(&message.sender_id, &file_name))
            }
        }
    }

    /// Open a transfer. Replaces any transfer still in flight from the sender.
    pub fn on_start(&self, sender_id: &str, metadata: FileMetadata, now: Instant) {
        if metadata.total_chunks > MAX_FILE_CHUNKS {
            tracing::warn!(
                "Ignoring file {} from {}: {} chunks announced",
                metadata.file_name,
                sender_id,
                metadata.total_chunks
            );
            return;
        }

        tracing::debug!(
            "File transfer from {}: {} ({} bytes, {} chunks)",
            sender_id,
            metadata.file_name,
            metadata.file_size,
            metadata.total_chunks
        );
        let previous = self.transfers.insert(
            sender_id.to_string(),
            PartialFile {
                last_activity: now,
                metadata,
                chunks: BTreeMap::new(),
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(
                "File {} from {} superseded after {}/{} chunks",
                previous.metadata.file_name,
                sender_id,
                previous.chunks.len(),
                previous.metadata.total_chunks
            );
        }
    }

    pub fn on_chunk(&self, sender_id: &str, chunk: FileChunk, now: Instant) -> Option<ReceivedFile> {
        let Entry::Occupied(mut occupied) = self.transfers.entry(sender_id.to_string()) else {
            tracing::debug!("Chunk {} from {} without FILE_START", chunk.index, sender_id);
            return None;
        };

        let partial = occupied.get_mut();
        if chunk.total != partial.metadata.total_chunks {
            tracing::debug!(
                "Chunk total mismatch from {}: {} vs {}",
                sender_id,
                chunk.total,
                partial.metadata.total_chunks
            );
            return None;
        }
        partial.last_activity = now;
        partial.chunks.entry(chunk.index).or_insert(chunk.data);
        if !partial.is_complete() {
            return None;
        }

        let partial = occupied.remove();
        self.finish(sender_id, partial)
    }

    /// Trailer. Completes zero-chunk files and discards incomplete ones.
    pub fn on_end(&self, sender_id: &str, file_name: &str) -> Option<ReceivedFile> {
        let Entry::Occupied(occupied) = self.transfers.entry(sender_id.to_string()) else {
            // Already delivered on its last chunk
            return None;
        };

        if occupied.get().metadata.file_name != file_name {
            tracing::debug!(
                "FILE_END for {} from {} while {} is in flight",
                file_name,
                sender_id,
                occupied.get().metadata.file_name
            );
            return None;
        }

        let partial = occupied.remove();
        if partial.is_complete() {
            return self.finish(sender_id, partial);
        }

        tracing::warn!(
            "File {} from {} incomplete at FILE_END: {}/{} chunks",
            partial.metadata.file_name,
            sender_id,
            partial.chunks.len(),
            partial.metadata.total_chunks
        );
        None
    }

    fn finish(&self, sender_id: &str, partial: PartialFile) -> Option<ReceivedFile> {
        let data = concat(partial.chunks);
        if data.len() as u64 != partial.metadata.file_size {
            tracing::warn!(
                "File {} from {} has {} bytes, expected {}",
                partial.metadata.file_name,
                sender_id,
                data.len(),
                partial.metadata.file_size
            );
            return None;
        }

        self.completed.fetch_add(1, Ordering::Relaxed);
        Some(ReceivedFile {
            sender_id: sender_id.to_string(),
            file_name: partial.metadata.file_name,
            data,
        })
    }

    /// Drop transfers idle for longer than the timeout
    pub fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.transfers.retain(|sender, partial| {
            let keep = now.duration_since(partial.last_activity) < self.timeout;
            if !keep {
                tracing::warn!(
                    "Evicting stalled file {} from {} ({}/{} chunks)",
                    partial.metadata.file_name,
                    sender,
                    partial.chunks.len(),
                    partial.metadata.total_chunks
                );
                evicted += 1;
            }
            keep
        });
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub fn pending(&self) -> usize {
        self.transfers.len()
    }

    pub fn files_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn files_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.transfers.clear();
    }
}

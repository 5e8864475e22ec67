//! Per-sender audio playback
//!
//! Every remote sender gets its own [`AudioPlayback`]: a bounded queue and a
//! dedicated thread draining it into an output sink in submission order.
//! Voices are never interleaved into one device stream.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::PcmQueue;
use crate::audio::capture::join_with_timeout;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// An open output line. Lives on the playback thread only.
pub trait PcmSink {
    /// Write one buffer of 16-bit little-endian PCM; may block while the
    /// device catches up
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;
}

/// Something that can open output lines
pub trait AudioOutput: Send + Sync {
    fn name(&self) -> String;

    /// Open a line for one remote sender. Called on the playback thread.
    fn open(&self, sender_id: &str, config: &AudioConfig) -> Result<Box<dyn PcmSink>, AudioError>;
}

/// Output that discards everything (receive-only without speakers)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

struct NullSink;

impl PcmSink for NullSink {
    fn write(&mut self, _pcm: &[u8]) -> Result<(), AudioError> {
        Ok(())
    }
}

impl AudioOutput for NullOutput {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn open(&self, _sender_id: &str, _config: &AudioConfig) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(NullSink))
    }
}

/// Playback of one remote sender's audio
pub struct AudioPlayback {
    sender_id: String,
    /// Filled by the receive loop, drained by the playback thread
    queue: Arc<PcmQueue>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    buffers_played: Arc<AtomicU64>,
}

impl AudioPlayback {
    /// Spawn the drain thread. The sink is opened on that thread; if it
    /// cannot be opened the thread keeps draining and discarding.
    pub fn start(
        sender_id: &str,
        output: Arc<dyn AudioOutput>,
        config: &AudioConfig,
    ) -> Result<Self, AudioError> {
        let (queue, parker) = PcmQueue::new(config.playback_queue_capacity);
        let queue = Arc::new(queue);
        let running = Arc::new(AtomicBool::new(true));
        let buffers_played = Arc::new(AtomicU64::new(0));

        let queue_thread = queue.clone();
        let running_thread = running.clone();
        let played = buffers_played.clone();
        let config = config.clone();
        let sender = sender_id.to_string();

        let handle = thread::Builder::new()
            .name(format!("playback-{}", sender_id))
            .spawn(move || {
                let mut sink = match output.open(&sender, &config) {
                    Ok(sink) => Some(sink),
                    Err(e) => {
                        tracing::warn!("No audio output for {} on {}: {}", sender, output.name(), e);
                        None
                    }
                };

                while running_thread.load(Ordering::Relaxed) {
                    let Some(pcm) = queue_thread.pop_timeout(&parker, Duration::from_millis(100)) else {
                        continue;
                    };
                    let Some(line) = sink.as_mut() else {
                        continue;
                    };
                    if let Err(e) = line.write(&pcm) {
                        tracing::warn!("Playback write for {} failed: {}", sender, e);
                        sink = None;
                        continue;
                    }
                    played.fetch_add(1, Ordering::Relaxed);
                }

                drop(sink);
                tracing::debug!("Playback thread for {} exiting", sender);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            sender_id: sender_id.to_string(),
            queue,
            running,
            thread_handle: Some(handle),
            buffers_played,
        })
    }

    /// Queue a buffer. Never blocks; returns false if it was dropped.
    pub fn play(&self, pcm: Bytes) -> bool {
        self.queue.push(pcm)
    }

    /// Stop the drain thread with a bounded wait
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.wake();

        if let Some(handle) = self.thread_handle.take() {
            join_with_timeout(handle, timeout, &format!("playback-{}", self.sender_id));
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn buffers_played(&self) -> u64 {
        self.buffers_played.load(Ordering::Relaxed)
    }

    pub fn buffers_dropped(&self) -> usize {
        self.queue.overflow_count()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.wake();
    }
}

/// Lazily created playback instances, one per remote sender
pub struct PlaybackMixer {
    /// Opens one sink per sender
    output: Arc<dyn AudioOutput>,
    config: AudioConfig,
    /// Created on a sender's first buffer
    players: DashMap<String, AudioPlayback>,
}

impl PlaybackMixer {
    pub fn new(output: Arc<dyn AudioOutput>, config: AudioConfig) -> Self {
        Self {
            output,
            config,
            players: DashMap::new(),
        }
    }

    /// Queue audio from `sender_id`, creating its playback on first use
    pub fn play(&self, sender_id: &str, pcm: Bytes) -> bool {
        if let Some(player) = self.players.get(sender_id) {
            return player.play(pcm);
        }

        let player = self
            .players
            .entry(sender_id.to_string())
            .or_try_insert_with(|| {
                tracing::info!("Starting playback for {}", sender_id);
                AudioPlayback::start(sender_id, self.output.clone(), &self.config)
            });
        match player {
            Ok(player) => player.play(pcm),
            Err(e) => {
                tracing::warn!("Cannot start playback for {}: {}", sender_id, e);
                false
            }
        }
    }

    /// Number of senders with an active playback
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, sender_id: &str) -> bool {
        self.players.contains_key(sender_id)
    }

    /// Stop and discard every playback instance
    pub fn stop_all(&self, timeout: Duration) {
        let senders: Vec<String> = self.players.iter().map(|p| p.key().clone()).collect();
        for sender in senders {
            if let Some((_, mut player)) = self.players.remove(&sender) {
                player.stop(timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Default, Clone)]
    struct RecordingOutput {
        written: Arc<Mutex<Vec<(String, Bytes)>>>,
        delay: Duration,
    }

    struct RecordingSink {
        sender: String,
        written: Arc<Mutex<Vec<(String, Bytes)>>>,
        delay: Duration,
    }

    impl PcmSink for RecordingSink {
        fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
            thread::sleep(self.delay);
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
                delay: self.delay,
            }))
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_playback_preserves_order() {
        let output = RecordingOutput::default();
        let mixer = PlaybackMixer::new(Arc::new(output.clone()), AudioConfig::default());

        for i in 0..10u8 {
            assert!(mixer.play("alice", Bytes::from(vec![i; 4])));
        }
        wait_for(|| output.written.lock().len() == 10);

        let written = output.written.lock();
        for (i, (sender, pcm)) in written.iter().enumerate() {
            assert_eq!(sender, "alice");
            assert_eq!(pcm[0], i as u8);
        }
        drop(written);
        mixer.stop_all(Duration::from_secs(1));
        assert!(mixer.is_empty());
    }

    #[test]
    fn test_one_playback_per_sender() {
        let output = RecordingOutput::default();
        let mixer = PlaybackMixer::new(Arc::new(output.clone()), AudioConfig::default());

        mixer.play("alice", Bytes::from_static(b"aa"));
        mixer.play("bob", Bytes::from_static(b"bb"));
        mixer.play("alice", Bytes::from_static(b"aa"));

        assert_eq!(mixer.len(), 2);
        assert!(mixer.contains("alice") && mixer.contains("bob"));
        wait_for(|| output.written.lock().len() == 3);
        mixer.stop_all(Duration::from_secs(1));
    }

    #[test]
    fn test_play_never_blocks_on_slow_device() {
        let output = RecordingOutput {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let config = AudioConfig {
            playback_queue_capacity: 5,
            ..AudioConfig::default()
        };
        let mut playback = AudioPlayback::start("slow", Arc::new(output), &config).unwrap();

        let start = Instant::now();
        let accepted = (0..20).filter(|_| playback.play(Bytes::from_static(b"pcm"))).count();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(accepted <= 6);
        assert!(playback.buffers_dropped() >= 14);

        playback.stop(Duration::from_secs(1));
    }
}

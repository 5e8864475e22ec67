//! Microphone capture
//!
//! A dedicated thread reads fixed-size PCM buffers from the microphone and
//! hands each one to the session. Muting suppresses delivery but keeps the
//! device open, so unmuting is instantaneous.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::audio::buffer::samples_to_pcm;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// One captured buffer, ready to go on the wire
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub timestamp_ms: i64,
    /// 16-bit little-endian PCM
    pub pcm: Bytes,
}

/// An open microphone. Lives on the capture thread only.
pub trait MicrophoneStream {
    /// Block until `buf` is filled with the next samples
    fn read(&mut self, buf: &mut [i16]) -> Result<(), AudioError>;
}

/// Something that can open a microphone
pub trait MicrophoneSource: Send + Sync {
    fn name(&self) -> String;

    /// Whether a device is present. Capture is skipped when it is not.
    fn is_available(&self) -> bool;

    /// Open the device. Called on the capture thread.
    fn open(&self, config: &AudioConfig) -> Result<Box<dyn MicrophoneStream>, AudioError>;
}

/// Sine tone generator standing in for a microphone
pub struct SyntheticMicrophone {
    frequency: f32,
    paced: bool,
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
}

impl SyntheticMicrophone {
    /// A 440 Hz tone delivered in real time
    pub fn new() -> Self {
        Self {
            frequency: 440.0,
            paced: true,
            opened: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliver buffers as fast as they are read instead of in real time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Times the device was opened
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    /// Times the device was closed
    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

struct SyntheticStream {
    frequency: f32,
    sample_rate: u32,
    buffer_duration: Duration,
    paced: bool,
    position: u64,
    closed: Arc<AtomicU64>,
}

impl MicrophoneStream for SyntheticStream {
    fn read(&mut self, buf: &mut [i16]) -> Result<(), AudioError> {
        if self.paced {
            thread::sleep(self.buffer_duration);
        }
        for sample in buf.iter_mut() {
            let t = self.position as f32 / self.sample_rate as f32;
            *sample = ((2.0 * std::f32::consts::PI * self.frequency * t).sin() * 8000.0) as i16;
            self.position += 1;
        }
        Ok(())
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl MicrophoneSource for SyntheticMicrophone {
    fn name(&self) -> String {
        "synthetic-tone".to_string()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn open(&self, config: &AudioConfig) -> Result<Box<dyn MicrophoneStream>, AudioError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            frequency: self.frequency,
            sample_rate: config.sample_rate,
            buffer_duration: config.buffer_duration(),
            paced: self.paced,
            position: 0,
            closed: self.closed.clone(),
        }))
    }
}

/// Running microphone capture
pub struct AudioCapture {
    running: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    buffers_captured: Arc<AtomicU64>,
    buffers_suppressed: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Start capturing on a dedicated thread. Returns once the device is
    /// open, or with the error that prevented it. Each buffer is offered to
    /// `output` without blocking; it is dropped if the consumer lags.
    pub fn start(
        source: Arc<dyn MicrophoneSource>,
        config: &AudioConfig,
        output: mpsc::Sender<CapturedAudio>,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let muted = Arc::new(AtomicBool::new(false));
        let buffers_captured = Arc::new(AtomicU64::new(0));
        let buffers_suppressed = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

        let running_thread = running.clone();
        let muted_thread = muted.clone();
        let captured = buffers_captured.clone();
        let suppressed = buffers_suppressed.clone();
        let config = config.clone();

        let handle = thread::Builder::new()
            .name("capture-microphone".to_string())
            .spawn(move || {
                let mut stream = match source.open(&config) {
                    Ok(stream) => stream,
                    Err(e) => {
                        running_thread.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                tracing::info!(
                    "Microphone {} open ({} Hz, {} ch, {} ms buffers)",
                    source.name(),
                    config.sample_rate,
                    config.channels,
                    config.buffer_ms
                );
                let _ = ready_tx.send(Ok(()));

                let mut samples = vec![0i16; config.samples_per_buffer()];
                while running_thread.load(Ordering::Relaxed) {
                    if let Err(e) = stream.read(&mut samples) {
                        tracing::error!("Microphone read failed: {}", e);
                        break;
                    }
                    if !running_thread.load(Ordering::Relaxed) {
                        break;
                    }
                    if muted_thread.load(Ordering::Relaxed) {
                        suppressed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    captured.fetch_add(1, Ordering::Relaxed);
                    let buffer = CapturedAudio {
                        timestamp_ms: crate::now_millis(),
                        pcm: samples_to_pcm(&samples),
                    };
                    if let Err(mpsc::error::TrySendError::Closed(_)) = output.try_send(buffer) {
                        tracing::debug!("Audio consumer gone, stopping capture");
                        break;
                    }
                }

                running_thread.store(false, Ordering::SeqCst);
                drop(stream);
                tracing::info!("Microphone capture thread exiting");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => return Err(AudioError::StreamError("capture thread died".into())),
        }

        Ok(Self {
            running,
            muted,
            thread_handle: Some(handle),
            buffers_captured,
            buffers_suppressed,
        })
    }

    /// Suppress or resume delivery without touching the device
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the capture thread, waiting at most `timeout` for it to exit.
    /// A thread stuck in a device read is detached.
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            join_with_timeout(handle, timeout, "capture-microphone");
        }
    }

    pub fn buffers_captured(&self) -> u64 {
        self.buffers_captured.load(Ordering::Relaxed)
    }

    pub fn buffers_suppressed(&self) -> u64 {
        self.buffers_suppressed.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Join a worker thread with a bounded wait
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("Thread {} did not stop within {:?}, detaching", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        tracing::error!("Thread {} panicked", name);
    }
}

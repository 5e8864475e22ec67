//! Lock-free PCM queue for playback
//!
//! Single-producer single-consumer bounded queue between a receive loop and
//! a playback thread. When full, the newest buffer is dropped: stale audio
//! has no replay value, and the producer must never block.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Bounded queue of PCM buffers
pub struct PcmQueue {
    queue: ArrayQueue<Bytes>,
    unparker: Unparker,
    overflow_count: AtomicUsize,
    pushed_count: AtomicUsize,
}

impl PcmQueue {
    /// Create a queue and the parker its consumer waits on
    pub fn new(capacity: usize) -> (Self, Parker) {
        let parker = Parker::new();
        let queue = Self {
            queue: ArrayQueue::new(capacity.max(1)),
            unparker: parker.unparker().clone(),
            overflow_count: AtomicUsize::new(0),
            pushed_count: AtomicUsize::new(0),
        };
        (queue, parker)
    }

    /// Push a buffer. Returns false if the queue was full and it was dropped.
    pub fn push(&self, pcm: Bytes) -> bool {
        match self.queue.push(pcm) {
            Ok(()) => {
                self.pushed_count.fetch_add(1, Ordering::Relaxed);
                self.unparker.unpark();
                true
            }
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    /// Pop, waiting up to `timeout` for a buffer to arrive
    pub fn pop_timeout(&self, parker: &Parker, timeout: Duration) -> Option<Bytes> {
        if let Some(pcm) = self.queue.pop() {
            return Some(pcm);
        }
        parker.park_timeout(timeout);
        self.queue.pop()
    }

    /// Wake the consumer without pushing (used on shutdown)
    pub fn wake(&self) {
        self.unparker.unpark();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Buffers dropped because the queue was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn pushed_count(&self) -> usize {
        self.pushed_count.load(Ordering::Relaxed)
    }

    /// Fill level between 0 and 1
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Convert 16-bit little-endian PCM to f32 samples
pub fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Serialize samples as 16-bit little-endian PCM
pub fn samples_to_pcm(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

/// Downmixes interleaved f32 audio to mono and resamples it linearly to
/// 16-bit samples at the target rate. Phase carries across calls, so device
/// callbacks of any size produce a seamless stream.
pub struct MonoResampler {
    channels: usize,
    /// Input frames per output sample
    step: f64,
    /// Next output position, in input frames after `previous`
    position: f64,
    previous: f32,
}

impl MonoResampler {
    pub fn new(input_rate: u32, input_channels: u16, output_rate: u32) -> Self {
        Self {
            channels: input_channels.max(1) as usize,
            step: input_rate.max(1) as f64 / output_rate.max(1) as f64,
            position: 0.0,
            previous: 0.0,
        }
    }

    /// Append the converted samples for one chunk of input to `out`
    pub fn process(&mut self, interleaved: &[f32], out: &mut Vec<i16>) {
        let mono: Vec<f32> = interleaved
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        let len = mono.len();

        while self.position < len as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let a = if index == 0 { self.previous } else { mono[index - 1] };
            let b = mono[index];
            let sample = (a + (b - a) * frac).clamp(-1.0, 1.0);
            out.push((sample * i16::MAX as f32) as i16);
            self.position += self.step;
        }

        if let Some(&last) = mono.last() {
            self.previous = last;
        }
        self.position -= len as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_basic() {
        let (queue, _parker) = PcmQueue::new(4);

        assert!(queue.push(Bytes::from_static(b"one")));
        assert!(queue.push(Bytes::from_static(b"two")));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(queue.try_pop().unwrap(), Bytes::from_static(b"two"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let (queue, _parker) = PcmQueue::new(50);
        for i in 0..60u8 {
            queue.push(Bytes::from(vec![i]));
        }

        assert_eq!(queue.len(), 50);
        assert_eq!(queue.overflow_count(), 10);
        assert_eq!(queue.try_pop().unwrap()[0], 0);
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let (queue, parker) = PcmQueue::new(4);
        let queue = std::sync::Arc::new(queue);
        let producer = queue.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(Bytes::from_static(b"late"));
        });

        let mut got = None;
        for _ in 0..50 {
            got = queue.pop_timeout(&parker, Duration::from_millis(100));
            if got.is_some() {
                break;
            }
        }
        handle.join().unwrap();
        assert_eq!(got.unwrap(), Bytes::from_static(b"late"));
    }

    #[test]
    fn test_pcm_conversion() {
        let pcm = samples_to_pcm(&[0, i16::MAX, -1]);
        assert_eq!(&pcm[..], &[0, 0, 0xFF, 0x7F, 0xFF, 0xFF]);

        let samples = pcm_to_f32(&pcm);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 1.0);
        assert!(samples[2] < 0.0);
    }

    #[test]
    fn test_resampler_downmixes_48k_stereo_to_16k_mono() {
        let mut resampler = MonoResampler::new(48_000, 2, 16_000);
        // 20 ms of stereo, left and right at different levels
        let input: Vec<f32> = (0..960).flat_map(|_| [0.75, 0.25]).collect();

        let mut out = Vec::new();
        resampler.process(&input, &mut out);

        assert_eq!(out.len(), 320);
        let expected = (0.5 * i16::MAX as f32) as i16;
        assert!(out[1..].iter().all(|&s| (s - expected).abs() <= 1));
    }

    #[test]
    fn test_resampler_is_seamless_across_chunks() {
        let input: Vec<f32> = (0..4400).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = Vec::new();
        MonoResampler::new(44_100, 1, 16_000).process(&input, &mut whole);

        let mut chunked = Vec::new();
        let mut resampler = MonoResampler::new(44_100, 1, 16_000);
        for chunk in input.chunks(440) {
            resampler.process(chunk, &mut chunked);
        }

        assert_eq!(whole.len(), 1597);
        assert_eq!(chunked.len(), whole.len());
        for (a, b) in whole.iter().zip(&chunked) {
            assert!((a - b).abs() <= 1);
        }
    }
}

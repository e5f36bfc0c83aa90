//! Glue between the capture callback and the pull-based reader

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, warn};

use crate::capture::FrameBuffer;
use crate::error::BridgeError;
use crate::pipeline::{fullness_percent, DropPolicy, FrameQueue, Pop, Wait};

/// Result of a consumer read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(FrameBuffer),
    /// Nothing queued and the caller asked not to block
    NoDataAvailable,
    /// The bridge was stopped
    Stopped,
}

impl ReadOutcome {
    pub fn into_frame(self) -> Option<FrameBuffer> {
        match self {
            ReadOutcome::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Every `on_frame_arrived` call, dropped or not
    pub callbacks: u64,
    pub admitted: u64,
    pub dropped_policy: u64,
    pub dropped_alloc: u64,
    /// Callbacks whose reported size exceeded the buffer
    pub dropped_malformed: u64,
    pub delivered: u64,
    pub discarded_on_stop: u64,
    pub pending_bytes: u64,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    dropped_policy: AtomicU64,
    dropped_alloc: AtomicU64,
    dropped_malformed: AtomicU64,
    delivered: AtomicU64,
    discarded_on_stop: AtomicU64,
}

/// Owns the frame queue and drop policy for one capture session.
///
/// Share it as `Arc<CaptureBridge>`: the producer side calls
/// [`on_frame_arrived`](Self::on_frame_arrived), the consumer side calls
/// [`read_next_frame`](Self::read_next_frame).
pub struct CaptureBridge {
    queue: FrameQueue,
    policy: DropPolicy,
    budget_bytes: NonZeroU64,

    /// Advances on every callback; drives the drop schedule
    frame_index: AtomicU64,

    /// Bytes admitted but not yet handed to the reader
    pending_bytes: AtomicU64,

    stopped: AtomicBool,
    counters: CachePadded<Counters>,
}

impl CaptureBridge {
    pub fn new(budget_bytes: u64) -> Result<Self, BridgeError> {
        let budget_bytes =
            NonZeroU64::new(budget_bytes).ok_or(BridgeError::InvalidBudget(budget_bytes))?;
        Ok(Self {
            queue: FrameQueue::new(),
            policy: DropPolicy::new(),
            budget_bytes,
            frame_index: AtomicU64::new(0),
            pending_bytes: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            counters: CachePadded::new(Counters::default()),
        })
    }

    /// Producer entry point, called once per delivered frame.
    ///
    /// `raw_size` is the number of valid bytes at the start of `raw`. Never
    /// blocks beyond the queue's short critical section; the copy happens
    /// outside the lock. Returns whether the frame was admitted.
    pub fn on_frame_arrived(&self, raw: &[u8], raw_size: usize, timestamp: u64) -> bool {
        let frame_index = self.frame_index.fetch_add(1, Ordering::Relaxed);
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        let fullness = fullness_percent(self.queue.total_bytes(), self.budget_bytes);
        if self.policy.should_drop(frame_index, fullness) {
            self.counters.dropped_policy.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framebridge_frames_dropped_total", "reason" => "policy")
                .increment(1);
            return false;
        }

        let Some(payload) = raw.get(..raw_size) else {
            warn!(
                raw_size,
                buffer_len = raw.len(),
                "frame size exceeds driver buffer, frame dropped"
            );
            self.counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framebridge_frames_dropped_total", "reason" => "malformed")
                .increment(1);
            return false;
        };

        let frame = match FrameBuffer::copy_from_slice(payload, timestamp) {
            Ok(frame) => frame,
            Err(e) => {
                error!(raw_size, "could not allocate frame: {}", e);
                self.counters.dropped_alloc.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("framebridge_frames_dropped_total", "reason" => "alloc")
                    .increment(1);
                return false;
            }
        };

        let size = frame.size_bytes();
        // Count before publishing so the reader never subtracts first
        self.pending_bytes.fetch_add(size, Ordering::AcqRel);
        if !self.queue.push(frame) {
            self.pending_bytes.fetch_sub(size, Ordering::AcqRel);
            return false;
        }

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framebridge_frames_admitted_total").increment(1);
        metrics::gauge!("framebridge_queue_bytes").set(self.queue.total_bytes() as f64);
        true
    }

    /// Consumer entry point.
    ///
    /// With `nonblocking` an empty queue yields `NoDataAvailable`; otherwise
    /// the call waits until a frame arrives or the bridge is stopped.
    pub fn read_next_frame(&self, nonblocking: bool) -> ReadOutcome {
        let wait = if nonblocking {
            Wait::NonBlocking
        } else {
            Wait::Forever
        };
        self.read(wait)
    }

    /// Like a blocking read, but gives up with `NoDataAvailable` after `timeout`.
    pub fn read_next_frame_timeout(&self, timeout: Duration) -> ReadOutcome {
        self.read(Wait::Timeout(timeout))
    }

    fn read(&self, wait: Wait) -> ReadOutcome {
        match self.queue.pop_blocking(wait) {
            Pop::Frame(frame) => {
                self.pending_bytes
                    .fetch_sub(frame.size_bytes(), Ordering::AcqRel);
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                ReadOutcome::Frame(frame)
            }
            Pop::Empty => ReadOutcome::NoDataAvailable,
            Pop::Cancelled => ReadOutcome::Stopped,
        }
    }

    /// Stop accepting frames, free pending ones and release blocked readers.
    ///
    /// Only the first call has any effect.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("capture bridge already stopped");
            return;
        }
        let discarded = self.queue.close();
        self.pending_bytes
            .fetch_sub(discarded.bytes, Ordering::AcqRel);
        self.counters
            .discarded_on_stop
            .store(discarded.frames as u64, Ordering::Relaxed);
        metrics::gauge!("framebridge_queue_bytes").set(0.0);

        let stats = self.stats();
        info!(
            callbacks = stats.callbacks,
            admitted = stats.admitted,
            delivered = stats.delivered,
            dropped = stats.dropped_policy + stats.dropped_alloc + stats.dropped_malformed,
            discarded = discarded.frames,
            "capture bridge stopped"
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Bytes admitted but not yet read; zero after stop.
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes.load(Ordering::Acquire)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queue.total_bytes()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes.get()
    }

    pub fn fullness_percent(&self) -> u64 {
        fullness_percent(self.queue.total_bytes(), self.budget_bytes)
    }

    pub fn stats(&self) -> BridgeStats {
        let c = &self.counters;
        BridgeStats {
            callbacks: self.frame_index.load(Ordering::Relaxed),
            admitted: c.admitted.load(Ordering::Relaxed),
            dropped_policy: c.dropped_policy.load(Ordering::Relaxed),
            dropped_alloc: c.dropped_alloc.load(Ordering::Relaxed),
            dropped_malformed: c.dropped_malformed.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            discarded_on_stop: c.discarded_on_stop.load(Ordering::Relaxed),
            pending_bytes: self.pending_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn read_frame(bridge: &CaptureBridge) -> FrameBuffer {
        bridge
            .read_next_frame(true)
            .into_frame()
            .expect("frame queued")
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert_eq!(
            CaptureBridge::new(0).err(),
            Some(BridgeError::InvalidBudget(0))
        );
    }

    #[test]
    fn admitted_frames_come_out_in_order() {
        let bridge = CaptureBridge::new(1_000_000).unwrap();
        for ts in 0..10u64 {
            assert!(bridge.on_frame_arrived(&[ts as u8; 32], 32, ts * 33));
        }
        for ts in 0..10u64 {
            let frame = read_frame(&bridge);
            assert_eq!(frame.capture_timestamp(), ts * 33);
            assert_eq!(frame.data()[0], ts as u8);
        }
        assert_eq!(bridge.read_next_frame(true), ReadOutcome::NoDataAvailable);
    }

    #[test]
    fn copies_only_reported_bytes() {
        let bridge = CaptureBridge::new(1000).unwrap();
        let raw = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert!(bridge.on_frame_arrived(&raw, 3, 0));
        let frame = read_frame(&bridge);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.size_bytes(), 3);
    }

    #[test]
    fn oversized_report_is_dropped() {
        let bridge = CaptureBridge::new(1000).unwrap();
        assert!(!bridge.on_frame_arrived(&[0u8; 4], 5, 0));
        assert_eq!(bridge.queued_bytes(), 0);
        assert_eq!(bridge.stats().dropped_malformed, 1);
    }

    #[test]
    fn dropped_frames_never_reach_reader() {
        // budget 1000, 100-byte frames, no reads in between
        let bridge = CaptureBridge::new(1000).unwrap();
        let policy = DropPolicy::new();
        let mut expected = Vec::new();
        for i in 0..20u64 {
            let before = bridge.queued_bytes();
            let should_drop = u64::from(policy.threshold(i)) <= before * 100 / 1000;
            let admitted = bridge.on_frame_arrived(&[0u8; 100], 100, i);
            assert_eq!(admitted, !should_drop, "frame {i}");
            if admitted {
                expected.push(i);
                assert_eq!(bridge.queued_bytes(), before + 100);
            } else {
                assert_eq!(bridge.queued_bytes(), before);
            }
        }

        let stats = bridge.stats();
        assert_eq!(stats.callbacks, 20);
        assert_eq!(stats.admitted as usize, expected.len());
        assert_eq!(stats.dropped_policy as usize, 20 - expected.len());

        let mut delivered = Vec::new();
        while let ReadOutcome::Frame(frame) = bridge.read_next_frame(true) {
            delivered.push(frame.capture_timestamp());
        }
        assert_eq!(delivered, expected);
    }

    #[test]
    fn pending_bytes_follow_reads() {
        let bridge = CaptureBridge::new(10_000).unwrap();
        bridge.on_frame_arrived(&[0u8; 100], 100, 0);
        bridge.on_frame_arrived(&[0u8; 300], 300, 1);
        assert_eq!(bridge.pending_bytes(), 400);
        read_frame(&bridge);
        assert_eq!(bridge.pending_bytes(), 300);
        read_frame(&bridge);
        assert_eq!(bridge.pending_bytes(), 0);
    }

    #[test]
    fn nonblocking_read_on_empty_is_immediate() {
        let bridge = CaptureBridge::new(1000).unwrap();
        let start = Instant::now();
        assert_eq!(bridge.read_next_frame(true), ReadOutcome::NoDataAvailable);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn timed_read_expires() {
        let bridge = CaptureBridge::new(1000).unwrap();
        assert_eq!(
            bridge.read_next_frame_timeout(Duration::from_millis(10)),
            ReadOutcome::NoDataAvailable
        );
    }

    #[test]
    fn blocked_reader_gets_next_frame() {
        let bridge = Arc::new(CaptureBridge::new(1000).unwrap());
        let reader = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.read_next_frame(false))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(bridge.on_frame_arrived(&[9u8; 10], 10, 77));

        let frame = reader.join().unwrap().into_frame().unwrap();
        assert_eq!(frame.capture_timestamp(), 77);
        assert_eq!(bridge.pending_bytes(), 0);
    }

    #[test]
    fn stop_releases_blocked_reader() {
        let bridge = Arc::new(CaptureBridge::new(1000).unwrap());
        let reader = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.read_next_frame(false))
        };
        thread::sleep(Duration::from_millis(20));
        bridge.stop();
        assert_eq!(reader.join().unwrap(), ReadOutcome::Stopped);
    }

    #[test]
    fn stop_is_idempotent() {
        let bridge = CaptureBridge::new(1000).unwrap();
        bridge.on_frame_arrived(&[0u8; 10], 10, 0);
        bridge.on_frame_arrived(&[0u8; 10], 10, 1);
        bridge.stop();
        let after_first = bridge.stats();
        bridge.stop();
        assert_eq!(bridge.stats(), after_first);
        assert_eq!(after_first.discarded_on_stop, 2);
        assert_eq!(after_first.pending_bytes, 0);
        assert_eq!(bridge.read_next_frame(false), ReadOutcome::Stopped);
        assert_eq!(bridge.read_next_frame(true), ReadOutcome::Stopped);
    }

    #[test]
    fn frames_after_stop_are_refused() {
        let bridge = CaptureBridge::new(1000).unwrap();
        bridge.stop();
        assert!(!bridge.on_frame_arrived(&[0u8; 10], 10, 0));
        assert_eq!(bridge.queued_bytes(), 0);
        assert_eq!(bridge.stats().admitted, 0);
    }
}

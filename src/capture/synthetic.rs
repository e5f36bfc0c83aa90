//! Synthetic capture session that emits patterned frames at a fixed rate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::capture::session::{CaptureSession, FrameSink};
use crate::error::SessionError;
use crate::CaptureConfig;

/// Frame source backed by a dedicated producer thread.
///
/// Every byte of frame `n` is `n % 256`. Timestamps are milliseconds since
/// `start`.
pub struct SyntheticSession {
    frame_bytes: usize,
    interval: Duration,
    max_frames: Option<u64>,
    budget_bytes: u64,
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticSession {
    pub fn new(config: &CaptureConfig, budget_bytes: u64) -> Self {
        Self {
            frame_bytes: config.frame_size(),
            interval: config.frame_interval(),
            max_frames: config.max_frames,
            budget_bytes,
            stop_flag: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Override the pacing between frames. `Duration::ZERO` emits back to back.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }
}

impl CaptureSession for SyntheticSession {
    fn buffer_budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), SessionError> {
        if self.worker.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        self.stop_flag.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);

        let frame_bytes = self.frame_bytes;
        let interval = self.interval;
        let max_frames = self.max_frames;
        let stop_flag = Arc::clone(&self.stop_flag);
        let finished = Arc::clone(&self.finished);

        let worker = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                let start = Instant::now();
                let mut buf = vec![0u8; frame_bytes];
                let mut sequence = 0u64;
                let mut next_due = start;

                while !stop_flag.load(Ordering::Acquire) {
                    if max_frames.is_some_and(|max| sequence >= max) {
                        break;
                    }
                    buf.fill((sequence % 256) as u8);
                    let timestamp = start.elapsed().as_millis() as u64;
                    sink(&buf, buf.len(), timestamp);
                    sequence += 1;

                    next_due += interval;
                    // stop() unparks us, so pacing never delays shutdown
                    while let Some(remaining) = next_due.checked_duration_since(Instant::now()) {
                        if remaining.is_zero() || stop_flag.load(Ordering::Acquire) {
                            break;
                        }
                        thread::park_timeout(remaining);
                    }
                }

                finished.store(true, Ordering::Release);
                debug!(frames = sequence, "synthetic capture thread exiting");
            })
            .map_err(SessionError::Spawn)?;

        info!(
            frame_bytes = self.frame_bytes,
            interval_us = self.interval.as_micros() as u64,
            "synthetic capture started"
        );
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::Release);
        worker.thread().unpark();
        worker.join().map_err(|_| SessionError::ThreadPanicked)?;
        info!("synthetic capture stopped");
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

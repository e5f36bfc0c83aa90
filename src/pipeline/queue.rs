//! Lock-guarded FIFO hand-off between the capture callback and the reader

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::capture::FrameBuffer;

/// How a pop behaves when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return `Pop::Empty` immediately
    NonBlocking,
    /// Block until a frame arrives or the queue is closed
    Forever,
    /// Block for at most this long, then check once more
    Timeout(Duration),
}

/// Frames freed by a drain or close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Discarded {
    pub frames: usize,
    pub bytes: u64,
}

/// Outcome of [`FrameQueue::pop_blocking`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Frame(FrameBuffer),
    Empty,
    Cancelled,
}

#[derive(Default)]
struct State {
    entries: VecDeque<FrameBuffer>,
    total_bytes: u64,
    admitted_count: u64,
    closed: bool,
}

/// Unbounded frame FIFO with byte accounting.
///
/// `entries` and `total_bytes` change together under one lock, so readers
/// never see them disagree. The condvar predicate is `non-empty || closed`.
/// Bounding is left to the drop policy upstream.
#[derive(Default)]
pub struct FrameQueue {
    state: Mutex<State>,
    wake: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame and wake one waiting reader.
    ///
    /// Returns `false` if the queue was already closed; the frame is freed.
    pub fn push(&self, frame: FrameBuffer) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.total_bytes += frame.size_bytes();
            state.admitted_count += 1;
            state.entries.push_back(frame);
        }
        self.wake.notify_one();
        true
    }

    /// Remove the head frame, waiting according to `wait` while empty.
    pub fn pop_blocking(&self, wait: Wait) -> Pop {
        let deadline = match wait {
            Wait::Timeout(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };
        let mut timed_out = false;

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Pop::Cancelled;
            }
            if let Some(frame) = state.entries.pop_front() {
                state.total_bytes -= frame.size_bytes();
                return Pop::Frame(frame);
            }
            if timed_out {
                return Pop::Empty;
            }
            match (wait, deadline) {
                (Wait::NonBlocking, _) => return Pop::Empty,
                (Wait::Timeout(_), Some(deadline)) => {
                    timed_out = self.wake.wait_until(&mut state, deadline).timed_out();
                }
                _ => self.wake.wait(&mut state),
            }
        }
    }

    /// Free every queued frame without delivering it.
    pub fn drain_and_discard(&self) -> Discarded {
        let (drained, bytes) = {
            let mut state = self.state.lock();
            let bytes = std::mem::take(&mut state.total_bytes);
            (std::mem::take(&mut state.entries), bytes)
        };
        // Payloads are released outside the lock
        Discarded {
            frames: drained.len(),
            bytes,
        }
    }

    /// Mark the queue closed, discard pending frames and wake every reader.
    ///
    /// Closing twice is a no-op and discards nothing.
    pub fn close(&self) -> Discarded {
        let (drained, bytes) = {
            let mut state = self.state.lock();
            if state.closed {
                return Discarded::default();
            }
            state.closed = true;
            let bytes = std::mem::take(&mut state.total_bytes);
            (std::mem::take(&mut state.entries), bytes)
        };
        self.wake.notify_all();
        Discarded {
            frames: drained.len(),
            bytes,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Frames ever admitted by `push`
    pub fn admitted_count(&self) -> u64 {
        self.state.lock().admitted_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

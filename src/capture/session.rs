//! Capture session contract and the session + bridge lifecycle

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::capture::bridge::{BridgeStats, CaptureBridge, ReadOutcome};
use crate::error::{CaptureError, SessionError};

/// Callback a session invokes once per delivered frame:
/// `(buffer, bytes_used, capture_timestamp) -> admitted`.
pub type FrameSink = Arc<dyn Fn(&[u8], usize, u64) -> bool + Send + Sync>;

/// A frame source driven by its own thread.
///
/// Implementations must not invoke the sink after `stop` returns.
pub trait CaptureSession: Send {
    /// Queue size, in bytes, at which the strictest drop threshold applies
    fn buffer_budget_bytes(&self) -> u64;

    fn start(&mut self, sink: FrameSink) -> Result<(), SessionError>;

    /// Terminate delivery. Stopping an idle session is `Ok`.
    fn stop(&mut self) -> Result<(), SessionError>;

    /// `true` once the source has delivered its last frame on its own.
    fn is_finished(&self) -> bool {
        false
    }
}

/// A running capture: one session feeding one bridge.
///
/// Shareable across threads; one thread may block in `read_next_frame` while
/// another calls `stop`.
pub struct Capture {
    bridge: Arc<CaptureBridge>,
    session: Mutex<SessionSlot>,
}

struct SessionSlot {
    session: Box<dyn CaptureSession>,
    stopped: bool,
}

impl Capture {
    /// Validate the session's budget, then start it.
    ///
    /// A bad budget fails before the session is started.
    #[instrument(skip(session))]
    pub fn open(session: impl CaptureSession + 'static) -> Result<Self, CaptureError> {
        let mut session: Box<dyn CaptureSession> = Box::new(session);
        let bridge = Arc::new(CaptureBridge::new(session.buffer_budget_bytes())?);

        let sink: FrameSink = {
            let bridge = Arc::clone(&bridge);
            Arc::new(move |raw: &[u8], size: usize, timestamp: u64| {
                bridge.on_frame_arrived(raw, size, timestamp)
            })
        };
        session.start(sink)?;
        info!(budget_bytes = bridge.budget_bytes(), "capture started");

        Ok(Self {
            bridge,
            session: Mutex::new(SessionSlot {
                session,
                stopped: false,
            }),
        })
    }

    pub fn read_next_frame(&self, nonblocking: bool) -> ReadOutcome {
        self.bridge.read_next_frame(nonblocking)
    }

    pub fn read_next_frame_timeout(&self, timeout: Duration) -> ReadOutcome {
        self.bridge.read_next_frame_timeout(timeout)
    }

    /// Stop the session (no further callbacks), then the bridge.
    ///
    /// Safe to call more than once; later calls return `Ok` and do nothing.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut slot = self.session.lock();
        if slot.stopped {
            return Ok(());
        }
        slot.stopped = true;
        let result = slot.session.stop();
        self.bridge.stop();
        result
    }

    pub fn is_stopped(&self) -> bool {
        self.bridge.is_stopped()
    }

    /// The source ran out of frames; queued frames may still be read.
    pub fn source_finished(&self) -> bool {
        self.session.lock().session.is_finished()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.bridge.pending_bytes()
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn bridge(&self) -> &CaptureBridge {
        &self.bridge
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

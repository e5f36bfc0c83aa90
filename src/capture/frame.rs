use std::collections::TryReserveError;

use bytes::Bytes;

/// A single captured frame.
///
/// The payload is immutable once built. While queued the frame is owned by the
/// queue entry; `read_next_frame` hands ownership to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Bytes,

    /// Device-reported capture time, in the session's time base
    capture_timestamp: u64,

    /// Cached `data.len()` for budget accounting
    size_bytes: u64,
}

impl FrameBuffer {
    pub fn new(data: impl Into<Bytes>, capture_timestamp: u64) -> Self {
        let data = data.into();
        let size_bytes = data.len() as u64;
        Self {
            data,
            capture_timestamp,
            size_bytes,
        }
    }

    /// Copy a driver buffer into a freshly allocated frame.
    ///
    /// Fails instead of aborting when the allocator cannot satisfy the request.
    pub fn copy_from_slice(raw: &[u8], capture_timestamp: u64) -> Result<Self, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(raw.len())?;
        buf.extend_from_slice(raw);
        Ok(Self::new(buf, capture_timestamp))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn capture_timestamp(&self) -> u64 {
        self.capture_timestamp
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Take the payload, consuming the frame.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

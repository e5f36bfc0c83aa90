//! Adaptive frame-drop policy keyed to buffer fullness

use std::num::NonZeroU64;

use tracing::warn;

/// Fullness thresholds (percent), cycled per incoming frame.
pub const SEVERITY_SCHEDULE: [u8; 4] = [62, 75, 87, 100];

/// Queue occupancy as `floor(100 * total_bytes / budget_bytes)`.
///
/// May exceed 100 since the queue never rejects a push.
pub fn fullness_percent(total_bytes: u64, budget_bytes: NonZeroU64) -> u64 {
    let percent = u128::from(total_bytes) * 100 / u128::from(budget_bytes.get());
    u64::try_from(percent).unwrap_or(u64::MAX)
}

/// Decides whether an incoming frame is admitted or shed.
///
/// Each frame is checked against one entry of the schedule, chosen by
/// `(frame_index + 1) % 4`. The counter is bumped before indexing, so the
/// first frame of a session (index 0) is judged against 75%, not 62%.
#[derive(Debug, Clone, Copy)]
pub struct DropPolicy {
    schedule: [u8; 4],
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self {
            schedule: SEVERITY_SCHEDULE,
        }
    }
}

impl DropPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threshold that governs the frame with this index.
    pub fn threshold(&self, frame_index: u64) -> u8 {
        let slot = (frame_index.wrapping_add(1) % self.schedule.len() as u64) as usize;
        self.schedule[slot]
    }

    /// Returns `true` if the frame should be dropped. Logs a warning on drop.
    pub fn should_drop(&self, frame_index: u64, fullness_percent: u64) -> bool {
        let drop = u64::from(self.threshold(frame_index)) <= fullness_percent;
        if drop {
            warn!(
                fullness = fullness_percent,
                frame_index, "real-time buffer {}% full! frame dropped!", fullness_percent
            );
        }
        drop
    }
}

//! Reconnection policy.
//!
//! Pure functions deciding when and how long to wait before the next
//! connection attempt, kept free of side effects so they are easy to test.

use std::time::Duration;

use crate::transport::DisconnectReason;

/// Maximum number of connection attempts in one cycle
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
/// Backoff unit; attempt `n` failing waits `n * BACKOFF_BASE`
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Delay before recovering from an unexpected drop of a live channel
pub const RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// Retry and backoff settings for the presence controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub recovery_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            backoff_base: BACKOFF_BASE,
            recovery_delay: RECOVERY_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Wait after attempt `failed_attempt` (1-based) failed.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        self.backoff_base * failed_attempt
    }

    /// The attempt to make after `failed_attempt` failed, if any remain.
    pub fn next_attempt(&self, failed_attempt: u32) -> Option<u32> {
        (failed_attempt < self.max_attempts).then_some(failed_attempt + 1)
    }

    /// Whether losing a live channel for `reason` should start a new cycle.
    pub fn should_recover(&self, reason: &DisconnectReason) -> bool {
        matches!(
            reason,
            DisconnectReason::ServerInitiated | DisconnectReason::TransportClosed
        )
    }
}

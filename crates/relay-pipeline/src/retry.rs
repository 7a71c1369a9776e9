//! Retry policy for failed processing cycles.
//!
//! Retries use a fixed delay, matching the upstream scheduler contract:
//! every failed attempt is rescheduled `delay` later until the attempt
//! bound is reached, after which the record requires manual intervention.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum automatic retries per record.
    pub max_attempts: u32,

    /// Delay between a failure and its scheduled retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(5 * 60) }
    }
}

/// Outcome of the retry decision for one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another cycle at the given time.
    Retry {
        /// When the next attempt should run
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying; the record needs manual intervention.
    GiveUp {
        /// Why no further retry is scheduled
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether a failure with `retry_count` prior failed attempts
    /// gets another scheduled cycle.
    pub fn decide(&self, retry_count: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if retry_count >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("max retries ({}) reached", self.max_attempts),
            };
        }

        let delay = chrono::Duration::from_std(self.delay)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        RetryDecision::Retry { next_attempt_at: failed_at + delay }
    }
}

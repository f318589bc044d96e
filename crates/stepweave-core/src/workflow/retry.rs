//! Retry policy for failed step attempts.
//!
//! Critical steps are never retried. Non-critical steps get up to
//! `max_retries` extra attempts with linear backoff: retry `n` sleeps `n`
//! backoff units.

use std::time::Duration;

use stepweave_types::step::Step;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry handler for workflow step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether a failed step gets another attempt.
    ///
    /// `retry_count` is the number of retries already performed (0 after the
    /// first failed attempt).
    pub fn should_retry(step: &Step, retry_count: u32) -> bool {
        !step.critical && retry_count < step.max_retries
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn backoff_delay(unit: Duration, retry: u32) -> Duration {
        unit.saturating_mul(retry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

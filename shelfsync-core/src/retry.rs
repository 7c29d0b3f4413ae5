// SPDX-FileCopyrightText: 2026 ShelfSync Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Retry Policy
//!
//! One reusable retry policy shared by discovery, pairing, and transfer,
//! instead of per-site ad hoc loops. Backoff is pure doubling so that
//! consecutive delays are strictly increasing.

use std::future::Future;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// A bounded retry policy with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` total attempts with the
    /// given base backoff delay. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Returns the total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff delay after the given attempt (1-based).
    ///
    /// Doubles on every attempt: base, 2*base, 4*base, ... The exponent is
    /// clamped so the shift cannot overflow, which keeps the sequence
    /// strictly increasing over any realistic attempt bound.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay * (1u32 << exp)
    }

    /// Runs `op` until it succeeds, the error is not retryable, or the
    /// attempt bound is exhausted.
    ///
    /// `on_retry(attempt, delay)` is invoked before each backoff sleep so
    /// callers can accumulate retry counters or log.
    pub async fn run<T, F, Fut, R, O>(
        &self,
        mut op: F,
        is_retryable: R,
        mut on_retry: O,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
        R: Fn(&SyncError) -> bool,
        O: FnMut(u32, Duration),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "retrying after failure");
                    on_retry(attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

//! Retry pacing.
//!
//! Peer-side operations repeat until a superpeer gives a definitive answer.
//! [`Backoff`] spaces the attempts exponentially and enforces the optional
//! attempt limit and deadline; [`CancellationToken`] interrupts both the
//! waits here and the stabilization loop's sleep.

use crate::error::{OverlayError, Result};
use corelib::RetryConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shift cap for the exponential delay; larger shifts are clamped by `max` anyway.
const MAX_SHIFT: u32 = 16;

/// Cloneable flag that wakes every waiter once cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// # Returns
    /// `true` if the token was cancelled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cond.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Exponential backoff with optional attempt limit and deadline.
///
/// # Example
/// ```rust
/// use corelib::RetryConfig;
/// use overlay::backoff::Backoff;
/// use std::time::Duration;
///
/// let cfg = RetryConfig { base_delay_ms: 10, max_delay_ms: 40, ..RetryConfig::default() };
/// let backoff = Backoff::new(&cfg);
/// assert_eq!(backoff.delay_for(0), Duration::from_millis(10));
/// assert_eq!(backoff.delay_for(3), Duration::from_millis(40));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    deadline: Option<Duration>,
    attempts: u32,
    started: Instant,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay(),
            max_attempts: config.max_attempts,
            deadline: config.deadline(),
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay after the `attempt`-th failure (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_SHIFT);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Record a failed attempt and wait before the next one.
    ///
    /// # Errors
    /// `RetriesExhausted` once the attempt limit is hit, `DeadlineExceeded`
    /// once the deadline passed, `Cancelled` if `cancel` fires while waiting
    pub fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        if let Some(limit) = self.max_attempts {
            if self.attempts >= limit {
                return Err(OverlayError::RetriesExhausted(self.attempts));
            }
        }
        let delay = match self.deadline {
            Some(deadline) => {
                let elapsed = self.started.elapsed();
                if elapsed >= deadline {
                    return Err(OverlayError::DeadlineExceeded(deadline));
                }
                delay.min(deadline - elapsed)
            }
            None => delay,
        };
        if cancel.wait_timeout(delay) {
            return Err(OverlayError::Cancelled);
        }
        Ok(())
    }
}

use std::{
    collections::VecDeque,
    future::Future,
    sync::Mutex,
    time::{Duration, Instant},
};

use log::*;

use crate::traits::{LedgerError, StoreError};

/// Errors that may go away if the same call is made again a little later.
pub trait TransientError: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl TransientError for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl TransientError for LedgerError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

/// Bounded retries with exponential backoff for transient store and ledger errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// No retries at all. Useful in tests.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO }
    }

    /// The delay before retry number `attempt` (1-based): `base, 2*base, 4*base, ...`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1).min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the attempts run out.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: TransientError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!("🔁️ {what} failed on attempt {attempt}/{attempts} ({e}). Retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                result => return result,
            }
        }
    }
}

/// Limits how many forced overrides can happen in a rolling time window.
///
/// The forced override skips the status precondition, so a burst of them points at a store that is broken rather than
/// busy. Once the limit is hit, further overrides are refused until old ones age out of the window.
#[derive(Debug)]
pub struct OverrideGuard {
    max_per_window: usize,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl Default for OverrideGuard {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3600))
    }
}

impl OverrideGuard {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self { max_per_window, window, recent: Mutex::new(VecDeque::new()) }
    }

    /// Claims an override slot. Returns false if the limit for the current window has been reached.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) >= self.window {
                recent.pop_front();
            } else {
                break;
            }
        }
        if recent.len() >= self.max_per_window {
            return false;
        }
        recent.push_back(now);
        true
    }

    /// The number of overrides in the current window.
    pub fn recent_overrides(&self) -> usize {
        let recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        recent.iter().filter(|t| now.duration_since(**t) < self.window).count()
    }
}

use crate::RemoteError;
use bale_store::CancelToken;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `n + 1`, given `n` failed attempts so far.
    pub fn backoff(&self, failed: u32) -> Duration {
        let factor = 1u32 << failed.saturating_sub(1).min(16);
        self.delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Transient failures are retried; when the last attempt fails the error
    /// is wrapped in `RetriesExhausted`. Permanent failures return at once.
    pub fn run<T>(
        &self,
        what: &str,
        cancel: &CancelToken,
        mut op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let attempts = self.attempts.max(1);
        let mut failed = 0;
        loop {
            cancel.check()?;
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    failed += 1;
                    if failed >= attempts {
                        return Err(RemoteError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    let wait = self.backoff(failed);
                    warn!("{what} failed (attempt {failed}/{attempts}): {e}; retrying in {wait:?}");
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

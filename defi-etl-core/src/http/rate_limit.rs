//! Minimum spacing between requests to one source.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Enforces a minimum interval between consecutive calls to [`RateLimiter::wait`].
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// A limiter that never sleeps.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until at least `min_interval` has passed since the previous call.
    /// Returns how long it slept.
    pub fn wait(&self) -> Duration {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let slept = match *last {
            Some(prev) => {
                let elapsed = prev.elapsed();
                if elapsed < self.min_interval {
                    let pause = self.min_interval - elapsed;
                    std::thread::sleep(pause);
                    pause
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };
        *last = Some(Instant::now());
        slept
    }
}

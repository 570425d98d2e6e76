//! Request rate limiter - infrastructure layer
//!
//! Owns the only shared mutable state of a run: the in-flight slot count and
//! the start time of the last outbound request.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Polite request gate
///
/// `acquire()` resolves once fewer than `max_concurrent` requests are in
/// flight and a random delay in `[delay_min, delay_max]` has passed since the
/// previous request started.
pub struct RateLimiter {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    last_start: Mutex<Option<Instant>>,
    delay_min: Duration,
    delay_max: Duration,
}

/// Held for the duration of one request; dropping it frees the slot.
#[derive(Debug)]
pub struct RatePermit {
    _slot: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, delay_min: Duration, delay_max: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (delay_min, delay_max) = if delay_min <= delay_max {
            (delay_min, delay_max)
        } else {
            (delay_max, delay_min)
        };
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            last_start: Mutex::new(None),
            delay_min,
            delay_max,
        }
    }

    pub async fn acquire(&self) -> Result<RatePermit, AcquireError> {
        let slot = self.slots.clone().acquire_owned().await?;

        // Starts are serialized through this lock so consecutive starts are
        // always at least one drawn delay apart.
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            let delay = self.next_delay();
            let ready_at = previous + delay;
            if ready_at > Instant::now() {
                debug!("rate limiter: waiting {:.2}s", (ready_at - Instant::now()).as_secs_f64());
                sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());

        Ok(RatePermit { _slot: slot })
    }

    /// Requests currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    fn next_delay(&self) -> Duration {
        let min = self.delay_min.as_secs_f64();
        let max = self.delay_max.as_secs_f64();
        if max <= min {
            return self.delay_min;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max))
    }
}

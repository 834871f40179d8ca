//! Request rate limiting using a token bucket
//!
//! A [`RequestLimiter`] is shared by every clone of an archive client, so a
//! worker never sends more than the configured number of playback requests
//! per second no matter how many retries are in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tokens are tracked in thousandths of a request so slow rates refill smoothly
const MILLI: u64 = 1_000;

/// Token bucket limiting requests per second
///
/// - One token is one request
/// - Tokens refill at a constant rate up to a one-second burst
/// - [`acquire`](Self::acquire) waits until a token is available
///
/// State lives in atomics behind `Arc`, so clones share the same bucket.
#[derive(Clone, Debug)]
pub struct RequestLimiter {
    /// Requests per second (0 = unlimited)
    limit_rps: u64,
    /// Available tokens in thousandths of a request
    tokens: Arc<AtomicU64>,
    /// Last refill timestamp (nanoseconds since arbitrary epoch)
    last_refill: Arc<AtomicU64>,
}

impl RequestLimiter {
    /// Create a new limiter
    ///
    /// # Examples
    ///
    /// ```
    /// use memento_gather::rate_limiter::RequestLimiter;
    ///
    /// let limiter = RequestLimiter::new(Some(5));
    /// assert_eq!(limiter.limit(), Some(5));
    ///
    /// let unlimited = RequestLimiter::new(None);
    /// assert_eq!(unlimited.limit(), None);
    /// ```
    #[must_use]
    pub fn new(limit_rps: Option<u32>) -> Self {
        let limit = u64::from(limit_rps.unwrap_or(0));

        Self {
            limit_rps: limit,
            tokens: Arc::new(AtomicU64::new(limit * MILLI)),
            last_refill: Arc::new(AtomicU64::new(Self::now_nanos())),
        }
    }

    /// Configured limit, None if unlimited
    pub fn limit(&self) -> Option<u64> {
        if self.limit_rps == 0 {
            None
        } else {
            Some(self.limit_rps)
        }
    }

    /// Wait until one request may be sent
    pub async fn acquire(&self) {
        if self.limit_rps == 0 {
            return;
        }

        loop {
            self.refill_tokens();

            let current = self.tokens.load(Ordering::SeqCst);
            if current >= MILLI {
                if self
                    .tokens
                    .compare_exchange(current, current - MILLI, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            let missing = MILLI - current;
            let wait_ms = missing / self.limit_rps;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(5, 100))).await;
        }
    }

    fn refill_tokens(&self) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);

        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let to_add = (self.limit_rps as f64 * MILLI as f64 * elapsed_secs) as u64;

        if to_add > 0
            && self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let capacity = self.limit_rps * MILLI;
            let _ = self
                .tokens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tokens| {
                    Some((tokens + to_add).min(capacity))
                });
        }
    }

    fn now_nanos() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

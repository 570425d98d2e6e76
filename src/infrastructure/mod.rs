pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RatePermit};
pub use retry::{Retryable, RetryPolicy};

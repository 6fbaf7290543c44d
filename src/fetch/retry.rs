//! Retry bound and wait policy shared by every upstream request.

use bon::Builder;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_AFTER_FLOOR: Duration = Duration::from_secs(5);

/// Statuses that are worth another attempt. Anything else outside 2xx is terminal.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
const TOO_MANY_REQUESTS: u16 = 429;

/// How many times a request is attempted and how long to wait between attempts.
///
/// # Examples
///
/// ```
/// use aemet_etl::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(3)
///     .delay(Duration::from_secs(2))
///     .build();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.retry_after_floor, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Fixed wait used for every retryable failure that does not carry a usable `Retry-After`.
    #[builder(default = DEFAULT_DELAY)]
    pub delay: Duration,
    /// Lower bound applied to a server supplied `Retry-After` on 429 responses.
    #[builder(default = DEFAULT_RETRY_AFTER_FLOOR)]
    pub retry_after_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Computes the wait before the next attempt.
    ///
    /// Only a 429 honours `Retry-After`; the header is read either as whole seconds or
    /// as an HTTP date, and the result never drops below `retry_after_floor`. Connection
    /// failures (`status == None`) and the other retryable statuses use `delay`.
    pub fn wait_for(
        &self,
        status: Option<u16>,
        retry_after: Option<&str>,
        now: DateTime<Utc>,
    ) -> Duration {
        if status != Some(TOO_MANY_REQUESTS) {
            return self.delay;
        }
        match retry_after.and_then(|value| parse_retry_after(value, now)) {
            Some(wait) => wait.max(self.retry_after_floor),
            None => self.delay,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Parses a `Retry-After` header value given as delta-seconds or as an HTTP date.
///
/// A date in the past yields a zero wait. Unparseable values yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

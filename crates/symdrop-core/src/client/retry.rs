//! Bounded exponential backoff for transient storage failures.

use super::transport::{HttpRequest, HttpResponse, Transport};
use crate::error::Result;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Statuses that indicate a transient failure worth retrying
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const BASE_DELAY_MS: u64 = 1000;
const MAX_JITTER_MS: u64 = 1000;

/// Retry limits for one upload, supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (0 disables retrying)
    pub max_retries: u32,
    /// Upper bound on the exponential part of the delay
    pub max_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            max_retry_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries after the first attempt
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the cap on the exponential part of the delay
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Exponential part of the delay after failed attempt `attempt` (0-based):
    /// `min(max_retry_delay, 2^attempt * 1s)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exponential = Duration::from_millis(BASE_DELAY_MS.saturating_mul(factor));
        exponential.min(self.max_retry_delay)
    }

    /// Backoff plus uniform jitter in `0..1000ms`
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0..MAX_JITTER_MS);
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

/// Returns true if `status` is one of [`RETRYABLE_STATUSES`]
pub fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Sends `request`, retrying transient statuses according to `policy`.
///
/// The last response is returned as-is once it is not retryable or the retry
/// budget is spent; only transport failures are errors.
pub(crate) async fn send_with_retry(
    transport: &dyn Transport,
    request: HttpRequest,
    policy: &RetryPolicy,
) -> Result<HttpResponse> {
    let mut attempt = 0;
    loop {
        let response = transport.send(request.clone()).await?;
        if !is_retryable(response.status) {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            debug!(
                "Giving up on {} after {} attempt(s): {}",
                request.url,
                attempt + 1,
                response.status
            );
            return Ok(response);
        }

        let delay = policy.delay(attempt);
        attempt += 1;
        warn!(
            "Upload returned {}; retrying in {} ms ({}/{})",
            response.status,
            delay.as_millis(),
            attempt,
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
    }
}

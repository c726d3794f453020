//! HTTP retry helper for transient geocoder errors.
//!
//! Every lookup goes through [`send`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so connection failures,
//! timeouts, HTTP 429 and HTTP 5xx get exponential backoff.
//!
//! Unlike a strict client, a status error that survives every retry is not
//! turned into an error here: the final response is handed back and the
//! caller decides what to do with its body.

use std::time::Duration;

/// Retry settings for a single logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that sends exactly once.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Sends the request built by `build_request`, retrying transient failures.
///
/// The closure is called on each attempt since builders are consumed by
/// `.send()`.
///
/// # Errors
///
/// Returns the last [`reqwest::Error`] if the request could not be sent
/// after all retries, or immediately for non-transient send errors.
#[allow(clippy::future_not_send)]
pub async fn send<F>(
    build_request: F,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            log::warn!(
                "  retry {attempt}/{} in {delay:?}...",
                policy.max_retries
            );
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < policy.max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(e);
            }
            Ok(response) => {
                if is_retryable_status(response.status()) && attempt < policy.max_retries {
                    log::warn!("  HTTP {}", response.status());
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
        }
    }
}

/// Returns `true` for statuses worth sending again (429 and 5xx).
#[must_use]
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

//! Page fetching with retry/backoff.
//!
//! Retryable failures are the transient kind: timeouts, connection
//! resets, and 5xx responses. 4xx responses and local misconfiguration
//! are terminal; retrying them only hammers the server.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;

/// Browser-like UA; the leaderboard page serves a challenge to obvious
/// bots.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            // Timeouts and connection failures are transient; a request
            // that never left the building (builder error) is not.
            FetchError::Transport(err) => !err.is_builder(),
            FetchError::Status { status, .. } => status.is_server_error(),
        }
    }
}

/// Shared HTTP client with the browser UA and a per-request timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Fetch a page body as text. Non-2xx statuses are errors, with 5xx
/// flagged retryable.
pub async fn fetch_html(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status,
            url: url.to_string(),
        });
    }
    Ok(response.text().await?)
}

/// Run `operation` up to `retries + 1` times, doubling the backoff after
/// each retryable failure. Terminal errors and exhausted attempts
/// propagate.
pub async fn with_retries<T, F, Fut>(
    operation_name: &str,
    retries: u32,
    backoff: Duration,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = retries + 1;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt == max_attempts {
                    return Err(err);
                }
                let delay = backoff.mul_f64(f64::from(1u32 << (attempt - 1)));
                warn!(
                    "retrying {operation_name} (attempt {attempt}/{max_attempts}) \
                     after {:.1}s: {err}",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status_error(code: u16) -> FetchError {
        FetchError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            url: "https://example.com".to_string(),
        }
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(status_error(500).is_retryable());
        assert!(status_error(503).is_retryable());
        assert!(!status_error(404).is_retryable());
        assert!(!status_error(403).is_retryable());
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test op", 3, Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(status_error(502))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test op", 3, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_error(404)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_propagate_the_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries("test op", 2, Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_error(500)) }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            FetchError::Status { status, .. } if status.as_u16() == 500
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

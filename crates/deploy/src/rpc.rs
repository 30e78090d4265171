//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for a single RPC request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between polling attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or the node
/// answered with an error object.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error from {}: {}",
            method,
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .with_context(|| format!("No result in {} response", method))?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Consecutive failed polls after which [`poll_until`] gives up.
pub const MAX_CONSECUTIVE_POLL_ERRORS: usize = 5;

/// Poll `check_fn` until it yields a value.
///
/// Errors from `check_fn` are logged and retried. After
/// [`MAX_CONSECUTIVE_POLL_ERRORS`] failures in a row the last error is
/// returned. The caller bounds the total wait (for example with
/// [`tokio::time::timeout`]).
pub async fn poll_until<T, F, Fut>(name: &str, interval: Duration, check_fn: F) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let mut consecutive_errors = 0;
    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                consecutive_errors = 0;
                tracing::trace!(target_name = %name, "Condition not met yet, polling again...");
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                    return Err(e.context(format!(
                        "{name}: giving up after {consecutive_errors} consecutive errors"
                    )));
                }
                tracing::debug!(error = %e, target_name = %name, "Poll failed, retrying...");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_until_retries_errors() {
        let attempts = AtomicUsize::new(0);

        let value = poll_until("counter", Duration::from_millis(1), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => anyhow::bail!("node unavailable"),
                    1 => Ok(None),
                    n => Ok(Some(n)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_gives_up_on_repeated_errors() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), anyhow::Error> = poll_until("unreachable node", Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("connection refused") }
        })
        .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
        assert!(err.to_string().contains("5 consecutive errors"));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_CONSECUTIVE_POLL_ERRORS);
    }

    #[tokio::test]
    async fn test_poll_until_resets_error_count() {
        let attempts = AtomicUsize::new(0);

        // Errors separated by a pending poll never reach the limit.
        let value = poll_until("flaky node", Duration::from_millis(1), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0..=3 | 5..=8 => anyhow::bail!("timeout"),
                    4 => Ok(None),
                    n => Ok(Some(n)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 9);
    }
}

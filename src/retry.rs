//! Retry helpers shared across the bus, saga, and client modules.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use tracing::{error, warn};

/// Exponential backoff with jitter for startup-time dependency connects
/// (Postgres, in-process resources) where a handful of retries with
/// growing spacing is the right shape, as opposed to the broker's fixed
/// 2-second cadence below. Mirrors the teacher's `ExponentialBuilder`
/// usage in its CloudEvents HTTP sink.
pub fn exponential_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Runs `connect` under `exponential_backoff`, logging each failed attempt.
pub async fn connect_with_backoff<T, E, F, Fut>(service_name: &str, max_retries: usize, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    connect
        .retry(exponential_backoff(max_retries))
        .notify(|err: &E, delay: Duration| {
            warn!(service = service_name, error = %err, ?delay, "connection attempt failed, retrying");
        })
        .await
}

/// Connect to a service with a fixed retry interval.
///
/// Used for the event bus's broker connection: at least `max_attempts`
/// tries spaced `delay` apart, matching the fixed 2-second cadence the
/// original client used rather than exponential backoff.
pub async fn connect_with_fixed_delay<T, E, F, Fut>(
    service_name: &str,
    max_attempts: u32,
    delay: Duration,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                tracing::info!(service = service_name, attempt, "connected");
                return Ok(client);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    service = service_name,
                    attempt, max_attempts, error = %e, "connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    service = service_name,
                    attempt, error = %e, "exhausted connection attempts"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_with_backoff_succeeds_eventually() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = connect_with_backoff("test-service", 5, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet".to_string())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_connect_with_backoff_exhausts_attempts() {
        let result: Result<u32, String> =
            connect_with_backoff("test-service", 2, || async { Err::<u32, _>("always fails".to_string()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_with_fixed_delay_succeeds_eventually() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = connect_with_fixed_delay(
            "test-service",
            5,
            Duration::from_millis(1),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(42)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_connect_with_fixed_delay_exhausts_attempts() {
        let result: Result<u32, String> = connect_with_fixed_delay(
            "test-service",
            3,
            Duration::from_millis(1),
            || async { Err::<u32, _>("always fails".to_string()) },
        )
        .await;
        assert!(result.is_err());
    }
}

//! Constant-backoff retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use ensim_core::Timings;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    pub interval: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
}

impl ConstantBackoff {
    pub fn from_timings(timings: &Timings) -> Self {
        Self {
            interval: timings.backoff_interval,
            attempts: timings.backoff_retries + 1,
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` are used up.
///
/// Waits `policy.interval` between attempts. Cancellation during a wait
/// gives up early and returns the last error.
pub async fn retry_constant<T, E, F, Fut>(
    policy: ConstantBackoff,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(attempt, attempts, error = %e, "attempt failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> ConstantBackoff {
        ConstantBackoff {
            interval: Duration::from_secs(10),
            attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let result: Result<u32, String> = retry_constant(policy(3), &cancel, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error() {
        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), String> = retry_constant(policy(3), &cancel, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("fail {n}"))
        })
        .await;
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_come_on_top_of_the_first_call() {
        let timings = Timings::default();
        let policy = ConstantBackoff::from_timings(&timings);
        assert_eq!(policy.attempts, timings.backoff_retries + 1);

        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), String> = retry_constant(policy, &cancel, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), timings.backoff_retries + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let calls = &AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), String> = retry_constant(policy(5), &cancel, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

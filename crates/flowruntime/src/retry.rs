use crate::config::RetryPolicy;
use flowcore::{panic_message, DispatchError, FlowError};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run a dispatch call under the retry policy.
///
/// Each attempt is bounded by `timeout`; an elapsed timeout counts as a
/// transient failure. A panicking attempt is a fatal failure. Only transient
/// failures are retried. Cancellation is
/// honoured while waiting between attempts, never during an attempt.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
) -> Result<T, FlowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded(call())).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::timeout(limit.as_millis() as u64)),
            },
            None => guarded(call()).await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = policy.delay_for(attempt);
                warn!(
                    call = what,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying dispatch"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(FlowError::Cancelled),
                }
            }
            Err(e) => return Err(FlowError::Dispatch(e)),
        }
    }
}

async fn guarded<T, Fut>(attempt: Fut) -> Result<T, DispatchError>
where
    Fut: Future<Output = Result<T, DispatchError>>,
{
    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(DispatchError::fatal(format!(
            "dispatch panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

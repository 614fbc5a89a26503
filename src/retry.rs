//! Retry helpers used by leaves and components.
//!
//! Both helpers stop immediately on an error tagged
//! [`ErrorTag::LoopBreak`] and on fatal errors, and both watch the
//! cancellation token before each attempt and while sleeping.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorTag, ExecError};

/// Run `f` up to `count` times, sleeping `interval` between failures.
///
/// `count` is the total number of attempts; zero is treated as one.
/// Returns the last error when every attempt failed.
pub async fn limit_count<T, F, Fut>(
    cancel: &CancellationToken,
    count: u32,
    interval: Duration,
    label: &str,
    mut f: F,
) -> Result<T, ExecError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    let attempts = count.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        check_cancelled(cancel, label)?;
        let err = match f().await {
            Ok(value) => {
                debug!("Retry {label:?}: succeeded at attempt {attempt}.");
                return Ok(value);
            }
            Err(err) => err,
        };
        if stops_retry(&err) {
            debug!("Retry {label:?}: aborted at attempt {attempt}: {err}");
            return Err(err);
        }
        if attempt >= attempts {
            debug!("Retry {label:?}: all {attempts} attempts failed: {err}");
            return Err(err);
        }
        debug!("Retry {label:?}: attempt {attempt} of {attempts} failed: {err}");
        sleep_or_cancel(cancel, interval, label).await?;
    }
}

/// Run `f` until it succeeds or `timeout` has elapsed, sleeping `interval`
/// between failures.
pub async fn with_timeout<T, F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    label: &str,
    mut f: F,
) -> Result<T, ExecError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    // A timeout too large for the clock never expires.
    let deadline = Instant::now().checked_add(timeout);
    let mut attempt = 0;
    loop {
        attempt += 1;
        check_cancelled(cancel, label)?;
        let err = match f().await {
            Ok(value) => {
                debug!("Retry {label:?}: succeeded at attempt {attempt}.");
                return Ok(value);
            }
            Err(err) => err,
        };
        if stops_retry(&err) {
            debug!("Retry {label:?}: aborted at attempt {attempt}: {err}");
            return Err(err);
        }
        let mut pause = interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                debug!("Retry {label:?}: timed out after {attempt} attempts: {err}");
                return Err(err.annotate(format!("retry {label}: timeout {timeout:?}")));
            }
            pause = pause.min(deadline - now);
        }
        debug!("Retry {label:?}: attempt {attempt} failed: {err}");
        sleep_or_cancel(cancel, pause, label).await?;
    }
}

fn stops_retry(err: &ExecError) -> bool {
    ErrorTag::LoopBreak.is_in(err) || err.is_fatal()
}

fn check_cancelled(cancel: &CancellationToken, label: &str) -> Result<(), ExecError> {
    if cancel.is_cancelled() {
        return Err(ExecError::cancelled(format!("retry {label}: cancelled")));
    }
    Ok(())
}

async fn sleep_or_cancel(
    cancel: &CancellationToken,
    interval: Duration,
    label: &str,
) -> Result<(), ExecError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ExecError::cancelled(format!("retry {label}: cancelled"))),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

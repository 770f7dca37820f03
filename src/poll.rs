//! Bounded condition polling.
//!
//! [`wait_until`] is the only place the crate waits for observable state.
//! Fixed, unconditional delays go through [`settle`] instead.

use std::future::Future;
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Duration, Instant};

/// Smallest poll interval honoured; a zero interval would make the attempt
/// bound infinite.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A check that became true.
#[derive(Debug, Clone, PartialEq)]
pub struct Satisfied<T> {
    /// Value observed by the successful check.
    pub value: T,
    /// Checks evaluated, including the successful one.
    pub attempts: u32,
    /// Time from the call to the successful check.
    pub elapsed: Duration,
}

/// The check never became true within the budget.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("condition not met after {attempts} attempt(s) in {}ms (timeout {}ms)", elapsed.as_millis(), timeout.as_millis())]
pub struct WaitTimeout {
    pub attempts: u32,
    pub elapsed: Duration,
    pub timeout: Duration,
}

/// Upper bound on check evaluations for a timeout/interval pair:
/// `ceil(timeout / interval)`, never less than one.
pub fn max_attempts(timeout: Duration, interval: Duration) -> u32 {
    let interval = interval.max(MIN_POLL_INTERVAL).as_nanos();
    let attempts = timeout.as_nanos().div_ceil(interval).max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

/// Poll `check` until it yields `Some`, the attempt bound is reached, or
/// `timeout` has elapsed.
///
/// The check is evaluated immediately, then once per `interval`. Each sleep is
/// capped at the remaining budget and a check still pending at
/// `timeout + interval` is dropped and counted as unsatisfied, so the call
/// returns no later than that whatever the check does.
pub async fn wait_until<F, Fut, T>(
    mut check: F,
    timeout: Duration,
    interval: Duration,
) -> Result<Satisfied<T>, WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let interval = interval.max(MIN_POLL_INTERVAL);
    let limit = max_attempts(timeout, interval);
    let start = Instant::now();
    let deadline = start + timeout;
    let hard_deadline = deadline + interval;
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        match timeout_at(hard_deadline, check()).await {
            Ok(Some(value)) => {
                return Ok(Satisfied {
                    value,
                    attempts,
                    elapsed: start.elapsed(),
                })
            }
            Ok(None) => {}
            Err(_) => {
                log::debug!(
                    "Check still pending after {}ms, giving up",
                    start.elapsed().as_millis()
                );
                return Err(WaitTimeout {
                    attempts,
                    elapsed: start.elapsed(),
                    timeout,
                });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let pause = interval.min(remaining);
        if !pause.is_zero() {
            sleep(pause).await;
        }

        if attempts >= limit || Instant::now() >= deadline {
            return Err(WaitTimeout {
                attempts,
                elapsed: start.elapsed(),
                timeout,
            });
        }
    }
}

/// Boolean convenience over [`wait_until`].
pub async fn wait_for<F, Fut>(
    mut check: F,
    timeout: Duration,
    interval: Duration,
) -> Result<Satisfied<()>, WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    wait_until(
        || {
            let fut = check();
            async move { fut.await.then_some(()) }
        },
        timeout,
        interval,
    )
    .await
}

/// Unconditional delay: grace periods after an action, countdowns between
/// items.
pub async fn settle(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

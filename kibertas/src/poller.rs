//! Bounded waits on observable conditions.
use crate::config::WaitSettings;
use crate::event::cancellation::CancellationToken;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of evaluating a condition once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Converged,
    /// Not there yet, the condition is evaluated again after the interval.
    Pending,
    /// The condition cannot converge anymore, the wait stops right away.
    Fatal(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}

impl PollError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled)
    }
}

/// Evaluates `probe` every `settings.interval` until it converges, fails fatally, the
/// `settings.timeout` elapses or the `cancel` token is triggered.
///
/// When `immediate` is false the first evaluation happens after one interval. Independently of
/// the relation between interval and timeout, the condition is evaluated at least once before
/// a [PollError::Timeout] is reported, and the last sleep is cut down so a final evaluation
/// takes place at the deadline.
pub fn poll_until<F>(
    settings: &WaitSettings,
    immediate: bool,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), PollError>
where
    F: FnMut() -> Probe,
{
    // A timeout too large to be represented as an instant never expires.
    let deadline = Instant::now().checked_add(settings.timeout);

    if cancel.is_cancelled() {
        return Err(PollError::Cancelled);
    }
    if !immediate && cancel.wait_timeout(settings.interval.min(settings.timeout)) {
        return Err(PollError::Cancelled);
    }

    loop {
        match probe() {
            Probe::Converged => return Ok(()),
            Probe::Fatal(reason) => return Err(PollError::Fatal(reason)),
            Probe::Pending => {}
        }

        let sleep = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PollError::Timeout(settings.timeout));
                }
                settings.interval.min(deadline - now)
            }
            None => settings.interval,
        };
        if cancel.wait_timeout(sleep) {
            return Err(PollError::Cancelled);
        }
    }
}

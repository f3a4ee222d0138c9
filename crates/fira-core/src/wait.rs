//! Deadline-bounded polling for device state that has no callback
//! (airplane mode, UWB enable state).

use std::fmt;
use std::future::Future;

use tokio::time::{Duration, Instant, sleep};

/// Backoff configuration for poll loops.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second poll.
    pub initial: Duration,
    /// Maximum delay between polls.
    pub max: Duration,
    pub factor: u32,
}

impl Backoff {
    /// Poll schedule for remote device settings: 100 ms growing to 500 ms.
    #[must_use]
    pub const fn device_setting() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            factor: 2,
        }
    }

    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(self.factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_millis(1000),
            factor: 2,
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending { observed: Option<String> },
}

impl<T> PollOutcome<T> {
    #[must_use]
    pub fn pending(observed: impl Into<String>) -> Self {
        Self::Pending {
            observed: Some(observed.into()),
        }
    }
}

/// A poll loop ran out of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTimeout {
    pub expected: String,
    pub last_observed: Option<String>,
    /// Polls made, including the first.
    pub polls: usize,
    pub elapsed: Duration,
}

impl fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeout waiting for {} after {}ms (polls={}, last_observed={})",
            self.expected,
            self.elapsed.as_millis(),
            self.polls,
            self.last_observed.as_deref().unwrap_or("<none>")
        )
    }
}

impl std::error::Error for PollTimeout {}

/// Poll `check` until it is ready or `timeout` elapses. The check always
/// runs at least once; sleeps never overshoot the deadline.
pub async fn poll_until<F, Fut, T>(
    expected: impl Into<String>,
    mut check: F,
    timeout: Duration,
    backoff: Backoff,
) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollOutcome<T>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut polls = 0usize;
    let mut delay = backoff.initial;
    let mut last_observed = None;

    loop {
        polls = polls.saturating_add(1);
        match check().await {
            PollOutcome::Ready(value) => return Ok(value),
            PollOutcome::Pending { observed } => {
                if observed.is_some() {
                    last_observed = observed;
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                expected: expected.into(),
                last_observed,
                polls,
                elapsed: now.saturating_duration_since(start),
            });
        }

        let sleep_for = delay.min(deadline.saturating_duration_since(now));
        if !sleep_for.is_zero() {
            sleep(sleep_for).await;
        }
        delay = backoff.next_delay(delay);
    }
}

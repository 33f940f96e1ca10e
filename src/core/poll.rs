//! Backoff loop around non-blocking polls
//!
//! Broker operations never sleep. Callers that want to wait for work wrap the
//! poll in `poll_until`, which retries with exponential backoff until the poll
//! yields something or the time budget runs out.

use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Backoff policy for repeated polls
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Run `poll` until it returns a non-empty batch, an error, or the timeout elapses.
///
/// The poll always runs at least once, so a zero timeout degrades to a single
/// non-blocking call.
///
/// # Examples
/// ```rust
/// use routemq::core::poll::{poll_until, PollPolicy};
///
/// # async fn example() -> Result<(), String> {
/// let batch = poll_until("orders", PollPolicy::default(), || {
///     Ok::<Vec<u32>, String>(vec![1, 2, 3])
/// })
/// .await?;
/// assert_eq!(batch.len(), 3);
/// # Ok(())
/// # }
/// ```
pub async fn poll_until<F, T, E>(
    operation_name: &str,
    policy: PollPolicy,
    mut poll: F,
) -> Result<Vec<T>, E>
where
    F: FnMut() -> Result<Vec<T>, E>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let batch = poll()?;
        if !batch.is_empty() {
            return Ok(batch);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            log::trace!(
                "Poll '{}' found nothing after {} attempts in {:?}",
                operation_name,
                attempts,
                elapsed
            );
            return Ok(batch);
        }

        sleep(delay.min(policy.timeout - elapsed)).await;
        delay = (delay * 2).min(policy.max_delay);
    }
}

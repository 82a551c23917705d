//! Bounded best-effort polling
//!
//! Background runs poll a fixed number of times at a fixed interval, with no
//! backoff. Running out of attempts is not an error: the caller gets the last
//! observation and decides how to degrade.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl ProbePolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Longest time a probe can spend sleeping
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome<T> {
    pub value: T,
    /// Polls made after the initial fetch
    pub attempts: u32,
    pub settled: bool,
}

/// Fetch once, then re-fetch while `settled` rejects the value and attempts remain.
///
/// Fetch errors end the probe immediately and are returned as-is.
pub async fn probe<T, E, F, Fut, S>(
    policy: &ProbePolicy,
    mut fetch: F,
    settled: S,
) -> Result<ProbeOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Fn(&T) -> bool,
{
    let mut value = fetch().await?;
    let mut attempts = 0;
    while !settled(&value) && attempts < policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        value = fetch().await?;
        attempts += 1;
        trace!(attempt = attempts, max = policy.max_attempts, "Probe poll");
    }

    let settled = settled(&value);
    Ok(ProbeOutcome {
        value,
        attempts,
        settled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> ProbePolicy {
        ProbePolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_settles_when_value_appears() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = probe(
            &fast(10),
            move || async move { Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst)) },
            |n| *n >= 3,
        )
        .await
        .unwrap();

        assert!(outcome.settled);
        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_expiry_returns_last_observation() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = probe(
            &fast(10),
            move || async move { Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst)) },
            |_| false,
        )
        .await
        .unwrap();

        assert!(!outcome.settled);
        assert_eq!(outcome.attempts, 10);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_already_settled_does_not_sleep() {
        let policy = ProbePolicy::new(10, Duration::from_secs(60));
        let outcome = probe(&policy, || async { Ok::<_, ()>("ready") }, |_| true)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.settled);
    }

    #[tokio::test]
    async fn test_fetch_error_stops_probe() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = probe(
            &fast(10),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    Err("lost")
                } else {
                    Ok(())
                }
            },
            |_| false,
        )
        .await;

        assert_eq!(result.unwrap_err(), "lost");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_policy_serde_and_budget() {
        let policy: ProbePolicy =
            toml::from_str("max_attempts = 5\ninterval = \"20ms\"").unwrap();
        assert_eq!(policy, ProbePolicy::new(5, Duration::from_millis(20)));
        assert_eq!(policy.budget(), Duration::from_millis(100));
        assert_eq!(ProbePolicy::default().budget(), Duration::from_secs(1));
    }
}

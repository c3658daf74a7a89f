use std::time::Duration;

/// Exponential backoff with optional jitter.
///
/// The same policy drives two things: how often a failed queue job is
/// redelivered (`backoff_for`), and short in-process retries of Redis
/// commands (`retry_async_with_policy`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter_max: Some(Duration::from_millis(250)),
        }
    }
}

impl RetryPolicy {
    /// Quick retries for single Redis round-trips.
    pub fn for_queue_operations() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }

    /// Whether a job that has already failed `failures` times may run again.
    pub fn allows_another_attempt(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay before the next delivery after `failures` failed deliveries (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        backoff + self.jitter()
    }

    fn jitter(&self) -> Duration {
        match self.jitter_max {
            Some(jitter_max) if !jitter_max.is_zero() => {
                let jitter_ms = jitter_max.as_millis() as u64;
                Duration::from_millis(rand::random_range(0..=jitter_ms))
            }
            _ => Duration::ZERO,
        }
    }
}

pub async fn retry_async_with_policy<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut failures = 0;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                failures += 1;
                if !policy.allows_another_attempt(failures) {
                    return Err(e);
                }
                tokio::time::sleep(policy.backoff_for(failures)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            jitter_max: None,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            jitter_max: Some(Duration::from_millis(50)),
            ..no_jitter(3)
        };
        for failures in 1..5 {
            let wait = policy.backoff_for(failures);
            assert!(wait <= policy.max_backoff + Duration::from_millis(50));
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = no_jitter(3);
        assert!(policy.allows_another_attempt(2));
        assert!(!policy.allows_another_attempt(3));
    }

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);

        let res: Result<usize, &'static str> = retry_async_with_policy(&no_jitter(3), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> = retry_async_with_policy(&no_jitter(2), || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fail")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

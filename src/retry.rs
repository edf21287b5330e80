use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Exponential backoff with full jitter.
///
/// Retry `n` (0-based) sleeps a random duration in
/// `[0, min(max_delay, initial_delay * multiplier^n)]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Upper bound of the sleep before retry `attempt`, before jitter.
    pub fn ceiling_for_attempt(&self, attempt: usize) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as usize) as i32);
        let ms = (self.initial_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Run `operation`, retrying while `should_retry` accepts the error and
/// retries remain. Returns the first success or the last error.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries && should_retry(&err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, "retrying after: {err}");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    #[test]
    fn ceiling_grows_then_caps() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .multiplier(2.0)
            .build();
        assert_eq!(policy.ceiling_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.ceiling_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.ceiling_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.ceiling_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.ceiling_for_attempt(60), Duration::from_millis(500));
    }

    #[test]
    fn jittered_delay_stays_under_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 0..8 {
            assert!(policy.delay_for_attempt(attempt) <= policy.ceiling_for_attempt(attempt));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<usize, String> = retry_with_predicate(
            &fast(5),
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("busy".to_string()) } else { Ok(n) }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry_with_predicate(
            &fast(2),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("busy".to_string())
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), String> = retry_with_predicate(
            &fast(5),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("conflict".to_string())
            },
            |e| e == "busy",
        )
        .await;
        assert_eq!(result, Err("conflict".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

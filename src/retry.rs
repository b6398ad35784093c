//! Bounded retry with exponential backoff for outbound calls.
//!
//! The operation decides how each attempt ended ([`Attempt`]); this module
//! only owns the schedule. Permanent failures return immediately, transient
//! ones sleep and retry until `max_attempts` is spent. Attempts are strictly
//! sequential: the next one starts only after the previous future resolved
//! and the backoff sleep elapsed.

use std::future::Future;
use std::time::Duration;

use crate::error::UpstreamError;

/// Retry schedule for one outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every retry.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay. `None` lets it grow without bound.
    pub max_delay: Option<Duration>,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Some(Duration::from_secs(30)),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// How a single attempt ended.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; worth another try if any remain.
    Retry(UpstreamError),
    /// Permanent failure; stop now.
    Fail(UpstreamError),
}

/// Mutable bookkeeping for one retried call.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    delay: Duration,
    max_attempts: u32,
    max_delay: Option<Duration>,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            delay: policy.initial_delay,
            max_attempts: policy.max_attempts.max(1),
            max_delay: policy.max_delay,
        }
    }

    /// Number of the attempt in progress (1-based). Zero before the first.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    pub fn has_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Return the delay to sleep before the next attempt and double the one
    /// after it.
    pub fn backoff(&mut self) -> Duration {
        let delay = self.delay;
        let doubled = self.delay.saturating_mul(2);
        self.delay = match self.max_delay {
            Some(cap) => doubled.min(cap),
            None => doubled,
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `op` receives the 1-based attempt number. On exhaustion the last
/// transient error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut state = RetryState::new(policy);

    loop {
        state.begin_attempt();
        let attempt = state.attempt();
        tracing::debug!(target_url = %target, attempt, max_attempts = state.max_attempts, "Calling upstream");

        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => {
                tracing::warn!(target_url = %target, attempt, error = %err, "Upstream failed permanently");
                return Err(err);
            }
            Attempt::Retry(err) => {
                if !state.has_remaining() {
                    tracing::warn!(
                        target_url = %target,
                        attempts = attempt,
                        error = %err,
                        "Retry attempts exhausted, returning last error"
                    );
                    return Err(err);
                }

                let delay = state.backoff();
                tracing::warn!(
                    target_url = %target,
                    attempt,
                    max_attempts = state.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying upstream after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(2),
            max_delay: None,
            attempt_timeout: Duration::from_secs(60),
        }
    }

    fn unavailable() -> UpstreamError {
        UpstreamError::Status {
            status: 503,
            message: "Service Unavailable".into(),
        }
    }

    /// Replays a fixed list of attempt outcomes and records when each
    /// attempt started.
    #[derive(Clone)]
    struct Script {
        outcomes: Arc<Mutex<VecDeque<Attempt<&'static str>>>>,
        started: Arc<Mutex<Vec<Instant>>>,
    }

    impl Script {
        fn new(outcomes: Vec<Attempt<&'static str>>) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                started: Arc::default(),
            }
        }

        async fn next(&self) -> Attempt<&'static str> {
            self.started.lock().unwrap().push(Instant::now());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("script ran out of outcomes")
        }

        fn gaps(&self) -> Vec<Duration> {
            let started = self.started.lock().unwrap();
            started.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn calls(&self) -> usize {
            self.started.lock().unwrap().len()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let script = Script::new(vec![
            Attempt::Retry(unavailable()),
            Attempt::Retry(unavailable()),
            Attempt::Done("a cat"),
        ]);

        let result = with_retry(&policy(5), "test", |_| script.next()).await;

        assert_eq!(result.unwrap(), "a cat");
        assert_eq!(script.calls(), 3);
        assert_eq!(
            script.gaps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let script = Script::new(vec![
            Attempt::Retry(unavailable()),
            Attempt::Retry(unavailable()),
            Attempt::Retry(unavailable()),
        ]);
        let start = Instant::now();

        let result = with_retry(&policy(3), "test", |_| script.next()).await;

        assert_eq!(result.unwrap_err(), unavailable());
        assert_eq!(script.calls(), 3);
        // Two sleeps (2s + 4s); no sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_stops_immediately() {
        let bad_request = UpstreamError::Status {
            status: 400,
            message: "bad input".into(),
        };
        let script = Script::new(vec![
            Attempt::Fail(bad_request.clone()),
            Attempt::Done("never reached"),
        ]);

        let result = with_retry(&policy(5), "test", |_| script.next()).await;

        assert_eq!(result.unwrap_err(), bad_request);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn passes_attempt_numbers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let result: Result<(), _> = with_retry(&policy(3), "test", |attempt| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(attempt);
                Attempt::Retry(UpstreamError::Timeout)
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), UpstreamError::Timeout);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn backoff_doubles_from_initial_delay() {
        let mut state = RetryState::new(&policy(4));
        let delays: Vec<u64> = (0..3).map(|_| state.backoff().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8]);
    }

    #[test]
    fn backoff_respects_cap() {
        let mut state = RetryState::new(&RetryPolicy {
            max_delay: Some(Duration::from_secs(5)),
            ..policy(10)
        });
        let delays: Vec<u64> = (0..4).map(|_| state.backoff().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 5, 5]);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut state = RetryState::new(&policy(0));
        assert_eq!(state.attempt(), 0);
        state.begin_attempt();
        assert!(!state.has_remaining());
    }
}

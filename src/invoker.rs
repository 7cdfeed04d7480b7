//! Bounded, jittered retries around a single classified invocation of a deployed runtime.
use crate::backend::BackendHandler;
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::{debug, warn};

pub mod error;
pub mod host_cache;
pub mod http;
pub mod request;

pub use error::InvocationError;
pub use request::{InvocationOutcome, InvocationRequest, InvocationResult};

/// Candidate delays between two attempts. One of them is picked at random for each retry.
pub const DEFAULT_RETRY_SLEEPS: [Duration; 4] = [
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
    Duration::from_secs(24),
];
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,
    pub sleep_choices: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sleep_choices: DEFAULT_RETRY_SLEEPS.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Number of attempts this policy allows. There is always at least one.
    pub fn attempts(&self) -> usize {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    fn jittered_sleep(&self) -> Duration {
        self.sleep_choices
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }
}

/// Invokes runtimes through a [BackendHandler], retrying the retryable failures.
///
/// The public result is `None` for every kind of failure; the failure itself is only logged.
#[derive(Debug, Clone, Default)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn invoke(
        &self,
        backend: &dyn BackendHandler,
        image: &str,
        memory: u32,
        request: &InvocationRequest,
        want_result: bool,
    ) -> Option<InvocationResult> {
        self.retry(
            request,
            || backend.invoke(image, memory, request, want_result),
            std::thread::sleep,
        )
    }

    pub(crate) fn retry<F, S>(
        &self,
        request: &InvocationRequest,
        mut attempt: F,
        mut sleep_func: S,
    ) -> Option<InvocationResult>
    where
        F: FnMut() -> Result<InvocationOutcome, InvocationError>,
        S: FnMut(Duration),
    {
        let max_attempts = self.policy.attempts();
        for n in 1..=max_attempts {
            match attempt() {
                Ok(outcome) => {
                    debug!(
                        "ExecutorID {} | JobID {} - Function activation {} finished ({:.3}s, status {})",
                        request.executor_id,
                        request.job_id,
                        request.call_id,
                        outcome.round_trip.as_secs_f64(),
                        outcome.status_code
                    );
                    return Some(outcome.result);
                }
                Err(err) if !err.is_retryable() => {
                    warn!(
                        "ExecutorID {} | JobID {} - Function invocation {} failed: {}",
                        request.executor_id, request.job_id, request.call_id, err
                    );
                    return None;
                }
                Err(err) if n == max_attempts => {
                    warn!(
                        "ExecutorID {} | JobID {} - Function invocation {} failed after {} attempts: {}",
                        request.executor_id, request.job_id, request.call_id, n, err
                    );
                }
                Err(err) => {
                    let selected_sleep = self.policy.jittered_sleep();
                    debug!(
                        "ExecutorID {} - Function {} - Retry {} in {:?} after: {}",
                        request.executor_id,
                        request.call_id,
                        n + 1,
                        selected_sleep,
                        err
                    );
                    sleep_func(selected_sleep);
                }
            }
        }
        None
    }
}

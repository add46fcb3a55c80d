//! Retryable asynchronous tasks
//!
//! A task is an operation closure, retried according to a [`RetryPolicy`],
//! followed by a completion closure that always observes the final outcome:
//! success, the last error after retries are exhausted, or cancellation.

use crate::error::SyncError;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type RetryPredicate = Arc<dyn Fn(&SyncError) -> bool + Send + Sync>;

/// Bounded retry schedule with exponential backoff
#[derive(Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay
    pub max_backoff: Duration,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            retryable: Arc::new(SyncError::is_retryable),
        }
    }

    /// Single attempt, errors propagate immediately
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the predicate deciding which errors are retried
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SyncError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Whether another attempt is allowed after `attempt` attempts failed with `error`
    pub fn should_retry(&self, attempt: u32, error: &SyncError) -> bool {
        attempt <= self.max_retries && (self.retryable)(error)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let mut backoff = self.initial_backoff;
        for _ in 1..retry {
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
        std::cmp::min(backoff, self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails terminally, runs out of retries
/// or `cancel` fires.
pub async fn run_with_retry<T, Op, Fut>(
    name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: Op,
) -> Result<T, SyncError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = operation() => result,
        };

        let error = match outcome {
            Ok(value) => {
                debug!(task = name, attempt = attempt, "Task operation succeeded");
                return Ok(value);
            }
            Err(error) => error,
        };

        if !policy.should_retry(attempt, &error) {
            if attempt > 1 {
                warn!(task = name, attempts = attempt, error = %error, "Task failed after retries");
            }
            return Err(error);
        }

        let backoff = policy.backoff_for(attempt);
        warn!(
            task = name,
            attempt = attempt,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Task operation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Operation plus completion, with a retry policy and cancellation token
pub struct RetryableTask<T, Op, Done> {
    name: &'static str,
    operation: Op,
    completion: Done,
    policy: RetryPolicy,
    cancel: CancellationToken,
    _output: PhantomData<fn() -> T>,
}

impl<T, Op, Fut, Done> RetryableTask<T, Op, Done>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    Done: FnOnce(Result<T, SyncError>),
{
    pub fn new(name: &'static str, operation: Op, completion: Done) -> Self {
        Self {
            name,
            operation,
            completion,
            policy: RetryPolicy::no_retry(),
            cancel: CancellationToken::new(),
            _output: PhantomData,
        }
    }

    pub fn retry_with(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run both phases on the current task
    pub async fn run(self) {
        let outcome = run_with_retry(self.name, &self.policy, &self.cancel, self.operation).await;
        (self.completion)(outcome);
    }

    /// Spawn both phases on `runner`
    pub fn execute(self, runner: &TaskRunner) -> TaskHandle
    where
        T: Send + 'static,
        Op: Send + 'static,
        Fut: Send + 'static,
        Done: Send + 'static,
    {
        let cancel = self.cancel.clone();
        runner.spawn(cancel, self.run())
    }
}

/// Shared worker pool the synchronizer dispatches onto
#[derive(Clone, Debug)]
pub struct TaskRunner {
    handle: Handle,
}

impl TaskRunner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runner on the ambient tokio runtime, if there is one
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn spawn<F>(&self, cancel: CancellationToken, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            cancel,
            join: self.handle.spawn(future),
        }
    }
}

/// Handle to a spawned task
#[derive(Debug)]
pub struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Request cancellation; the completion phase still runs
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until both phases have run
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            warn!(error = %e, "Sync task terminated abnormally");
        }
    }
}

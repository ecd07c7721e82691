//! Re-running a fallible asynchronous operation.
//!
//! A [`RetryFuture`] calls its operation factory to obtain a child future.
//! A success completes the retry future; a failure is handed to the
//! [`RetryPolicy`] together with a [`Decide`] token, and the policy answers,
//! possibly later and from another thread, with either another attempt or a
//! terminal error.
//!
//! The outstanding attempt's observer owns the retry state, so retrying goes
//! on after every handle to the [`RetryFuture`] is gone. Cancel handlers
//! only hold weak references, in both directions.
use crate::{
    executor::{self, ExecutionContext},
    Future, Promise, Setter,
};
use std::{
    fmt,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Decides what happens after a failed attempt.
///
/// `attempt` counts attempts made so far, starting at 1. The policy must
/// eventually consume `decide`; dropping it leaves the retry future waiting
/// until it is stopped or cancelled.
pub trait RetryPolicy<E>: Send + Sync + 'static {
    fn on_failure(&self, error: E, attempt: u32, decide: Decide<E>);
}

impl<E, F> RetryPolicy<E> for F
where
    F: Fn(E, Decide<E>) + Send + Sync + 'static,
{
    fn on_failure(&self, error: E, _attempt: u32, decide: Decide<E>) {
        self(error, decide)
    }
}

/// One-shot answer to a failed attempt.
pub struct Decide<E> {
    respond: Box<dyn FnOnce(Option<E>) + Send + 'static>,
}

impl<E> Decide<E> {
    fn new<F>(respond: F) -> Self
    where
        F: FnOnce(Option<E>) + Send + 'static,
    {
        Self {
            respond: Box::new(respond),
        }
    }

    /// `None` launches another attempt; `Some(err)` fails with `err`.
    pub fn decide(self, outcome: Option<E>) {
        (self.respond)(outcome)
    }

    pub fn retry(self) {
        self.decide(None)
    }

    /// Gives up, completing the retry future with `err`. This need not be the
    /// error that was observed.
    pub fn fail(self, err: E) {
        self.decide(Some(err))
    }
}

impl<E> fmt::Debug for Decide<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decide").finish_non_exhaustive()
    }
}

/// Retries immediately, forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryForever;

impl<E: Send + 'static> RetryPolicy<E> for RetryForever {
    fn on_failure(&self, _error: E, _attempt: u32, decide: Decide<E>) {
        decide.retry();
    }
}

/// Retries after a fixed interval, optionally a limited number of times.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    /// Pause between a failure and the next attempt.
    pub interval: Duration,
    /// Maximum number of retries, not counting the first attempt. `None`
    /// retries until stopped.
    pub max_retries: Option<u32>,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_retries: None,
        }
    }
}

impl FixedDelay {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl<E: Send + 'static> RetryPolicy<E> for FixedDelay {
    fn on_failure(&self, error: E, attempt: u32, decide: Decide<E>) {
        if self.max_retries.is_some_and(|max| attempt > max) {
            tracing::debug!(attempt, "retries exhausted");
            decide.fail(error);
            return;
        }
        executor::schedule_after(self.interval, Box::new(move || decide.retry()));
    }
}

/// A future that re-runs an operation until it succeeds, the policy gives
/// up, or the caller stops it.
///
/// Dereferences to the underlying [`Future`], so observers and combinators
/// attach directly.
///
/// # Examples
///
/// ```
/// use promise_future::{Future, RetryFuture};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = calls.clone();
/// let retry = RetryFuture::new(
///     move || match counter.fetch_add(1, Ordering::SeqCst) {
///         0 | 1 => Future::failure("flaky"),
///         n => Future::success(n),
///     },
///     promise_future::RetryForever,
/// );
/// assert_eq!(retry.wait(), Ok(Ok(2)));
/// ```
pub struct RetryFuture<T, E> {
    future: Future<T, E>,
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    operation: Box<dyn Fn() -> Future<T, E> + Send + Sync + 'static>,
    policy: Box<dyn RetryPolicy<E>>,
    context: ExecutionContext,
    setter: Setter<T, E>,
    run: Mutex<Run<E>>,
}

struct Run<E> {
    stopped: bool,
    attempts: u32,
    // Cancels the outstanding attempt without keeping it alive.
    current: Option<Box<dyn FnOnce() + Send + 'static>>,
    // A failure the policy has not yet answered.
    pending_error: Option<E>,
}

impl<T, E> RetryFuture<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// [`with_context`](Self::with_context) using the global context.
    pub fn new<O, P>(operation: O, policy: P) -> Self
    where
        O: Fn() -> Future<T, E> + Send + Sync + 'static,
        P: RetryPolicy<E>,
    {
        Self::with_context(&executor::global(), operation, policy)
    }

    /// Starts the first attempt right away. Child results are observed on
    /// `context`.
    pub fn with_context<O, P>(context: &ExecutionContext, operation: O, policy: P) -> Self
    where
        O: Fn() -> Future<T, E> + Send + Sync + 'static,
        P: RetryPolicy<E>,
    {
        let (future, setter) = Future::pending();
        let shared = Arc::new(Shared {
            operation: Box::new(operation),
            policy: Box::new(policy),
            context: Arc::clone(context),
            setter,
            run: Mutex::new(Run {
                stopped: false,
                attempts: 0,
                current: None,
                pending_error: None,
            }),
        });

        let handle = Arc::downgrade(&shared);
        future.on_cancel(move || {
            if let Some(shared) = handle.upgrade() {
                shared.halt();
            }
        });
        shared.launch();
        Self { future, shared }
    }

    /// Launches no further attempts.
    ///
    /// If a failure is waiting on the policy, the future completes with that
    /// error. Otherwise it is left waiting and never settles on its own; a
    /// result from an attempt still in flight is discarded. Call
    /// [`Future::cancel`] to move it to a terminal state.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    /// Number of attempts launched so far.
    pub fn attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    pub fn future(&self) -> &Future<T, E> {
        &self.future
    }

    /// Detaches the plain future. Retrying continues, but it can no longer
    /// be stopped, only cancelled.
    pub fn into_future(self) -> Future<T, E> {
        self.future
    }
}

impl<T, E> Deref for RetryFuture<T, E> {
    type Target = Future<T, E>;

    fn deref(&self) -> &Self::Target {
        &self.future
    }
}

impl<T, E> fmt::Debug for RetryFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = self.shared.lock();
        f.debug_struct("RetryFuture")
            .field("attempts", &run.attempts)
            .field("stopped", &run.stopped)
            .finish()
    }
}

impl<T, E> Shared<T, E> {
    fn lock(&self) -> MutexGuard<'_, Run<E>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn launch(self: &Arc<Self>) {
        let attempt = {
            let mut run = self.lock();
            if run.stopped {
                return;
            }
            run.attempts = run.attempts.saturating_add(1);
            run.attempts
        };
        tracing::debug!(attempt, "starting attempt");

        let child = (self.operation)();
        {
            let mut run = self.lock();
            if run.stopped {
                drop(run);
                if self.setter.is_cancelled() {
                    child.cancel();
                }
                return;
            }
            run.current = Some(Box::new(child.cancel_handle()));
        }

        let downstream = self.setter.downgrade();
        child.on_cancel(move || {
            downstream.cancel();
        });
        let shared = Arc::clone(self);
        child.on_result(&self.context, move |result| shared.settle(attempt, result));
    }

    fn settle(self: &Arc<Self>, attempt: u32, result: Result<T, E>) {
        let mut run = self.lock();
        if run.stopped {
            tracing::trace!(attempt, "discarding result of stopped attempt");
            return;
        }
        run.current = None;
        match result {
            Ok(value) => {
                drop(run);
                tracing::debug!(attempt, "attempt succeeded");
                self.setter.success(value);
            }
            Err(err) => {
                run.pending_error = Some(err.clone());
                drop(run);
                tracing::debug!(attempt, "attempt failed");
                let shared = Arc::clone(self);
                let decide = Decide::new(move |outcome| shared.decided(outcome));
                self.policy.on_failure(err, attempt, decide);
            }
        }
    }

    fn decided(self: &Arc<Self>, outcome: Option<E>) {
        // `stop` may have already settled the future with the pending error.
        if self.lock().pending_error.take().is_none() {
            return;
        }
        match outcome {
            None => self.launch(),
            Some(err) => {
                self.setter.error(err);
            }
        }
    }

    fn stop(&self) {
        let pending = {
            let mut run = self.lock();
            if run.stopped {
                return;
            }
            run.stopped = true;
            run.pending_error.take()
        };
        tracing::debug!(pending_failure = pending.is_some(), "retry stopped");
        if let Some(err) = pending {
            self.setter.error(err);
        }
    }

    // Cancellation of the retry future itself.
    fn halt(&self) {
        let current = {
            let mut run = self.lock();
            run.stopped = true;
            run.pending_error = None;
            run.current.take()
        };
        if let Some(cancel) = current {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedDelay, RetryFuture};
    use crate::{
        executor::{ExecutionContext, ThreadSpawner},
        Future,
    };
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            mpsc::channel,
            Arc,
        },
        time::{Duration, Instant},
    };

    #[test]
    fn test_fixed_delay_waits_between_attempts() {
        let ctx: ExecutionContext = Arc::new(ThreadSpawner);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();
        let retry = RetryFuture::with_context(
            &ctx,
            move || match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Future::failure("first"),
                _ => Future::success("second"),
            },
            FixedDelay::new(Duration::from_millis(50)),
        );
        assert_eq!(retry.wait(), Ok(Ok("second")));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(retry.attempts(), 2);
    }

    #[test]
    fn test_fixed_delay_gives_up_after_max_retries() {
        let retry = RetryFuture::new(
            || Future::<(), String>::failure("down".into()),
            FixedDelay::new(Duration::from_millis(1)).max_retries(2),
        );
        assert_eq!(retry.wait(), Ok(Err("down".to_string())));
        assert_eq!(retry.attempts(), 3);
    }

    #[test]
    fn test_chained_retry_delivers_without_kept_handle() {
        let ctx: ExecutionContext = Arc::new(ThreadSpawner);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (tx, rx) = channel();
        RetryFuture::with_context(
            &ctx,
            move || match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Future::failure("first"),
                n => Future::success(n),
            },
            FixedDelay::new(Duration::from_millis(10)),
        )
        .on_success(&ctx, move |n| tx.send(n).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

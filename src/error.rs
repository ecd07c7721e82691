use thiserror::Error;

/// Returned by [`Future::wait`](crate::Future::wait) and by `.await` when the
/// future was cancelled instead of completed.
///
/// Cancellation is a terminal state of its own, not a failure of the
/// producer, so it never travels through the future's error channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[error("future was cancelled")]
pub struct Cancelled;

/// Failures while standing up an execution context.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start thread pool: {0}")]
    ThreadPool(#[source] std::io::Error),
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Worker {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

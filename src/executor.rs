//! Execution contexts that future callbacks are scheduled onto.
//!
//! Futures never own threads. Every observer is paired with the context it
//! must run on, and the future hands the observer to that context once a
//! result exists. This module provides the context trait plus a few stock
//! implementations: a shared worker pool, a thread per job and a serial queue.
use crate::error::ExecutorError;
use futures::executor::ThreadPool;
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run jobs somewhere other than the calling stack frame.
///
/// Implementations must not run the job inline on the caller's thread, and
/// must not block: a future calls `execute` while holding its own lock, so
/// that observers are queued in the exact order they were registered.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Shared handle to an executor, as stored alongside each observer.
pub type ExecutionContext = Arc<dyn Executor>;

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        self.spawn_ok(async move { job() });
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

/// Runs every job on a freshly spawned thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Executor for ThreadSpawner {
    fn execute(&self, job: Job) {
        if let Err(err) = thread::Builder::new().spawn(job) {
            tracing::error!(%err, "failed to spawn thread for job; job dropped");
        }
    }
}

/// A single worker thread that runs jobs one at a time, in submission order.
///
/// The worker exits once the last handle to the queue is dropped and the
/// backlog has drained.
#[derive(Debug, Clone)]
pub struct SerialQueue {
    label: Arc<str>,
    sender: Sender<Job>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Result<Self, ExecutorError> {
        let label: String = label.into();
        let (sender, receiver) = channel::<Job>();
        let worker_label = label.clone();
        thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(queue = %worker_label, "job panicked on serial queue");
                    }
                }
                tracing::trace!(queue = %worker_label, "serial queue drained");
            })
            .map_err(|source| ExecutorError::Worker {
                name: label.clone(),
                source,
            })?;
        Ok(Self {
            label: label.into(),
            sender,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wraps the queue as a shareable [`ExecutionContext`].
    pub fn into_context(self) -> ExecutionContext {
        Arc::new(self)
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!(queue = %self.label, "serial queue worker is gone; job dropped");
        }
    }
}

/// Settings for [`thread_pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. `None` uses one per CPU.
    pub pool_size: Option<usize>,
    /// Prefix for worker thread names.
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            name_prefix: "promise-future-".to_owned(),
        }
    }
}

/// Builds a worker pool context.
pub fn thread_pool(config: &PoolConfig) -> Result<ExecutionContext, ExecutorError> {
    let mut builder = ThreadPool::builder();
    builder.name_prefix(config.name_prefix.clone());
    if let Some(size) = config.pool_size {
        builder.pool_size(size);
    }
    let pool = builder.create().map_err(ExecutorError::ThreadPool)?;
    Ok(Arc::new(pool))
}

/// Process-wide default context used by combinators that are not given one.
pub fn global() -> ExecutionContext {
    static GLOBAL: OnceLock<ExecutionContext> = OnceLock::new();
    GLOBAL
        .get_or_init(|| match thread_pool(&PoolConfig::default()) {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!(%err, "falling back to thread-per-job executor");
                Arc::new(ThreadSpawner)
            }
        })
        .clone()
}

/// Hands `job` to the global context once `delay` has elapsed.
///
/// All delayed jobs share one timer thread, which only keeps deadlines and
/// never runs the jobs itself.
pub fn schedule_after(delay: Duration, job: Job) {
    static TIMER: OnceLock<Option<Sender<Deadline>>> = OnceLock::new();
    let timer = TIMER.get_or_init(|| {
        let (sender, receiver) = channel();
        match thread::Builder::new()
            .name("promise-future-timer".to_owned())
            .spawn(move || run_timer(receiver))
        {
            Ok(_) => Some(sender),
            Err(err) => {
                tracing::warn!(%err, "failed to start timer thread; sleeping per job");
                None
            }
        }
    });
    let deadline = Deadline {
        at: Instant::now() + delay,
        job,
    };
    match timer {
        Some(sender) => {
            if let Err(rejected) = sender.send(deadline) {
                tracing::error!("timer thread is gone; firing job late");
                global().execute(rejected.0.job);
            }
        }
        None => ThreadSpawner.execute(Box::new(move || {
            thread::sleep(delay);
            (deadline.job)();
        })),
    }
}

struct Deadline {
    at: Instant,
    job: Job,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at)
    }
}

fn run_timer(receiver: Receiver<Deadline>) {
    let mut queue: BinaryHeap<Reverse<Deadline>> = BinaryHeap::new();
    loop {
        let received = match queue.peek() {
            Some(Reverse(next)) => {
                receiver.recv_timeout(next.at.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(deadline) => queue.push(Reverse(deadline)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) if queue.is_empty() => return,
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(Reverse(next)) = queue.peek() {
                    thread::sleep(next.at.saturating_duration_since(Instant::now()));
                }
            }
        }
        let now = Instant::now();
        while queue.peek().is_some_and(|Reverse(next)| next.at <= now) {
            if let Some(Reverse(due)) = queue.pop() {
                global().execute(due.job);
            }
        }
    }
}

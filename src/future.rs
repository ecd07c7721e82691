use crate::{
    error::Cancelled,
    executor::ExecutionContext,
    state::PromiseState,
    Promise,
};
use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

/// A read-only handle to a result that will be written exactly once.
///
/// Handles are cheap to clone and every clone observes the same state. The
/// producer writes through the [`Setter`] returned alongside the future by
/// [`Future::pending`].
///
/// # Examples
///
/// ```
/// use promise_future::{executor::ThreadSpawner, Future, Promise};
/// use std::sync::{mpsc::channel, Arc};
/// use std::thread;
///
/// let ctx: promise_future::ExecutionContext = Arc::new(ThreadSpawner);
/// let (future, setter) = Future::<String, ()>::pending();
/// let (tx, rx) = channel();
/// future.on_success(&ctx, move |value| tx.send(value).unwrap());
///
/// thread::spawn(move || setter.success("🍓".into()));
/// assert_eq!(rx.recv().unwrap(), "🍓");
/// ```
pub struct Future<T, E> {
    inner: Arc<Inner<T, E>>,
}

/// Exclusive write capability over one [`Future`].
///
/// Holding a `Setter` keeps the future's state alive. Use
/// [`Setter::downgrade`] when the producer must not extend its lifetime.
pub struct Setter<T, E> {
    inner: Arc<Inner<T, E>>,
}

/// A [`Setter`] that does not keep the future alive.
///
/// Every operation first checks that the future still exists and silently
/// does nothing otherwise.
pub struct WeakSetter<T, E> {
    inner: Weak<Inner<T, E>>,
}

type Callback<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;
type CancelHandler = Box<dyn FnOnce() + Send + 'static>;

struct Observer<T, E> {
    context: ExecutionContext,
    callback: Callback<T, E>,
}

struct Inner<T, E> {
    core: Mutex<Core<T, E>>,
    settled: Condvar,
}

struct Core<T, E> {
    state: PromiseState<T, E>,
    observers: Vec<Observer<T, E>>,
    cancel_handlers: Vec<CancelHandler>,
    wakers: Vec<Waker>,
}

impl<T, E> Inner<T, E> {
    fn new(state: PromiseState<T, E>) -> Self {
        Self {
            core: Mutex::new(Core {
                state,
                observers: Vec::new(),
                cancel_handlers: Vec::new(),
                wakers: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    // Callbacks never run while the lock is held (they are only handed to
    // their executor), so a poisoned lock still guards a consistent state.
    fn lock(&self) -> MutexGuard<'_, Core<T, E>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Inner<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn write(&self, result: Result<T, E>) -> bool {
        let mut core = self.lock();
        if !core.state.complete(result.clone()) {
            tracing::trace!(cancelled = core.state.is_cancelled(), "dropping late write");
            return false;
        }
        // Scheduling only enqueues, so it happens under the lock: a racing
        // late subscriber is always queued behind these observers.
        let observers = std::mem::take(&mut core.observers);
        tracing::trace!(observers = observers.len(), ok = result.is_ok(), "future completed");
        for observer in observers {
            schedule(observer, result.clone());
        }
        let wakers = std::mem::take(&mut core.wakers);
        core.cancel_handlers.clear();
        drop(core);

        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn cancel(&self) -> bool {
        let mut core = self.lock();
        if !core.state.cancel() {
            return false;
        }
        let handlers = std::mem::take(&mut core.cancel_handlers);
        let wakers = std::mem::take(&mut core.wakers);
        core.observers.clear();
        drop(core);

        self.settled.notify_all();
        tracing::trace!(handlers = handlers.len(), "future cancelled");
        for handler in handlers {
            handler();
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn subscribe(&self, context: &ExecutionContext, callback: Callback<T, E>) {
        let observer = Observer {
            context: Arc::clone(context),
            callback,
        };
        let mut core = self.lock();
        if core.state.is_waiting() {
            core.observers.push(observer);
            return;
        }
        // Cancelled futures silently drop late observers.
        if let Some(result) = core.state.result() {
            schedule(observer, result.clone());
        }
    }

    fn on_cancel(&self, handler: CancelHandler) {
        let mut core = self.lock();
        if core.state.is_waiting() {
            core.cancel_handlers.push(handler);
            return;
        }
        let cancelled = core.state.is_cancelled();
        drop(core);
        if cancelled {
            handler();
        }
    }
}

fn schedule<T, E>(observer: Observer<T, E>, result: Result<T, E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    let Observer { context, callback } = observer;
    context.execute(Box::new(move || callback(result)));
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A future in the `Waiting` state, together with its setter.
    pub fn pending() -> (Self, Setter<T, E>) {
        let inner = Arc::new(Inner::new(PromiseState::Waiting));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            Setter { inner },
        )
    }

    /// A future that is already `Done` with `result`.
    pub fn completed(result: Result<T, E>) -> Self {
        Self {
            inner: Arc::new(Inner::new(PromiseState::Done(result))),
        }
    }

    pub fn success(value: T) -> Self {
        Self::completed(Ok(value))
    }

    pub fn failure(error: E) -> Self {
        Self::completed(Err(error))
    }

    /// Runs `callback` on `context` once the future is `Done`.
    ///
    /// If the future already completed, the callback is still handed to
    /// `context` rather than invoked on the calling thread. A cancelled
    /// future never calls it.
    pub fn on_result<F>(&self, context: &ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.inner.subscribe(context, Box::new(callback));
        self
    }

    pub fn on_success<F>(&self, context: &ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_result(context, move |result| {
            if let Ok(value) = result {
                callback(value)
            }
        })
    }

    pub fn on_error<F>(&self, context: &ExecutionContext, callback: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.on_result(context, move |result| {
            if let Err(error) = result {
                callback(error)
            }
        })
    }

    /// Runs `handler` once if the future gets cancelled.
    ///
    /// Runs immediately on the calling thread when the future is already
    /// cancelled, and never once it is `Done`.
    pub fn on_cancel<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_cancel(Box::new(handler));
        self
    }

    /// Moves a waiting future to `Cancelled` and notifies cancel handlers.
    ///
    /// Cancellation is advisory: work already in flight keeps running, and
    /// its eventual write is dropped. Returns `false` if the future had
    /// already settled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Blocks the calling thread until the future settles.
    ///
    /// Never call this from an execution context that delivers this future's
    /// callbacks; the callback that would complete it could be queued behind
    /// the blocked job.
    pub fn wait(&self) -> Result<Result<T, E>, Cancelled> {
        let mut core = self.inner.lock();
        while core.state.is_waiting() {
            core = self
                .inner
                .settled
                .wait(core)
                .unwrap_or_else(PoisonError::into_inner);
        }
        settled(&core.state)
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and returns
    /// `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Result<T, E>, Cancelled>> {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.lock();
        while core.state.is_waiting() {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, _) = self
                .inner
                .settled
                .wait_timeout(core, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            core = guard;
        }
        Some(settled(&core.state))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PromiseState<T, E> {
        self.inner.lock().state.clone()
    }

    /// The result, if the future is already `Done`.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.inner.lock().state.result().cloned()
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().state.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().state.is_cancelled()
    }

    /// Cancels this future when called, if it still exists, without keeping
    /// it alive in the meantime.
    pub(crate) fn cancel_handle(&self) -> impl FnOnce() + Send + 'static {
        let inner = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                inner.cancel();
            }
        }
    }
}

fn settled<T: Clone, E: Clone>(state: &PromiseState<T, E>) -> Result<Result<T, E>, Cancelled> {
    match state {
        PromiseState::Done(result) => Ok(result.clone()),
        _ => Err(Cancelled),
    }
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("Future")
            .field("state", &core.state)
            .field("observers", &core.observers.len())
            .finish()
    }
}

impl<T, E> std::future::Future for Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<Result<T, E>, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut core = self.inner.lock();
        if core.state.is_waiting() {
            if !core.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                core.wakers.push(cx.waker().clone());
            }
            return Poll::Pending;
        }
        Poll::Ready(settled(&core.state))
    }
}

impl<T, E> Setter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A setter that does not keep the future alive.
    pub fn downgrade(&self) -> WeakSetter<T, E> {
        WeakSetter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A read handle to the future this setter writes.
    pub fn future(&self) -> Future<T, E> {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Promise for Setter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn write(&self, result: Result<T, E>) -> bool {
        self.inner.write(result)
    }

    fn on_cancel<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_cancel(Box::new(handler));
    }

    fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    fn is_cancelled(&self) -> bool {
        self.inner.lock().state.is_cancelled()
    }
}

impl<T, E> fmt::Debug for Setter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("Setter")
            .field("waiting", &core.state.is_waiting())
            .finish()
    }
}

impl<T, E> WeakSetter<T, E> {
    /// Whether the future this setter writes still exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl<T, E> Promise for WeakSetter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn write(&self, result: Result<T, E>) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.write(result),
            None => {
                tracing::trace!("future dropped before write");
                false
            }
        }
    }

    fn on_cancel<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_cancel(Box::new(handler));
        }
    }

    fn cancel(&self) -> bool {
        self.inner.upgrade().map_or(false, |inner| inner.cancel())
    }

    // A future nobody can observe any more counts as cancelled.
    fn is_cancelled(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |inner| inner.lock().state.is_cancelled())
    }
}

impl<T, E> Clone for WeakSetter<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for WeakSetter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSetter")
            .field("alive", &self.is_alive())
            .finish()
    }
}

//! Joining many futures into one.
//!
//! The joined future yields the children's values in input order, no matter
//! in which order they complete, and fails with the first error any child
//! reports. Each child writes into its own slot, so children completing
//! concurrently never contend on a shared lock; only the countdown of
//! missing results is shared.
//!
//! Every child's observer shares ownership of the joined future's setter, so
//! the join stays alive while any child is pending. The join only keeps weak
//! cancel handles to its children.
use crate::{
    executor::{self, ExecutionContext},
    Future, Promise, Setter,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

/// [`join_all_on`] using the global context.
///
/// # Examples
///
/// ```
/// use promise_future::{bulk, Future};
///
/// let joined = bulk::join_all(vec![
///     Future::<u32, ()>::success(1),
///     Future::success(2),
/// ]);
/// assert_eq!(joined.wait(), Ok(Ok(vec![1, 2])));
/// ```
pub fn join_all<T, E, I>(children: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    join_all_on(&executor::global(), children)
}

/// Joins `children` into a future of their values, in input order.
///
/// - An empty input completes immediately with an empty vector.
/// - The first child error fails the join; later results are ignored.
/// - Cancelling the join cancels every child still outstanding, and a
///   cancelled child cancels the join, which could otherwise never finish.
pub fn join_all_on<T, E, I>(context: &ExecutionContext, children: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Future<T, E>>,
{
    let children: Vec<Future<T, E>> = children.into_iter().collect();
    if children.is_empty() {
        return Future::success(Vec::new());
    }

    let (joined, setter) = Future::pending();
    let downstream = setter.downgrade();
    let join = Arc::new(Join {
        slots: (0..children.len()).map(|_| Mutex::new(None)).collect(),
        remaining: AtomicUsize::new(children.len()),
        setter,
    });

    let outstanding: Vec<_> = children.iter().map(Future::cancel_handle).collect();
    joined.on_cancel(move || {
        tracing::debug!(children = outstanding.len(), "join cancelled; cancelling children");
        for cancel in outstanding {
            cancel();
        }
    });

    for (index, child) in children.iter().enumerate() {
        let downstream = downstream.clone();
        child.on_cancel(move || {
            downstream.cancel();
        });
        let join = Arc::clone(&join);
        child.on_result(context, move |result| match result {
            Ok(value) => join.fill(index, value),
            Err(err) => {
                if join.setter.error(err) {
                    tracing::debug!(index, "join failed on child error");
                }
            }
        });
    }
    joined
}

/// [`join_all_flat_on`] using the global context.
pub fn join_all_flat<T, E, C, I>(children: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    C: IntoIterator<Item = T> + Clone + Send + 'static,
    I: IntoIterator<Item = Future<C, E>>,
{
    join_all_flat_on(&executor::global(), children)
}

/// Like [`join_all_on`], but each child yields a sequence and the results
/// are concatenated in input order.
pub fn join_all_flat_on<T, E, C, I>(context: &ExecutionContext, children: I) -> Future<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    C: IntoIterator<Item = T> + Clone + Send + 'static,
    I: IntoIterator<Item = Future<C, E>>,
{
    join_all_on(context, children)
        .map_on(context, |batches| batches.into_iter().flatten().collect())
}

struct Join<T, E> {
    slots: Box<[Mutex<Option<T>>]>,
    remaining: AtomicUsize,
    setter: Setter<Vec<T>, E>,
}

impl<T, E> Join<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn fill(&self, index: usize, value: T) {
        *self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let values: Vec<T> = self
            .slots
            .iter()
            .filter_map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).take())
            .collect();
        self.setter.success(values);
    }
}

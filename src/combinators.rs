//! Deriving one future from another.
//!
//! Every derived future is linked to its source in both directions:
//! cancelling the derived future cancels the source, and a cancelled source
//! cancels the derived future. The source's observer owns the derived
//! future's [`Setter`], so a derived future lives at least as long as its
//! source is pending, and fluent chains like `f.map(g).on_success(..)` need
//! no handle kept around. The cancellation edges are weak in both directions;
//! a derived future never keeps its source alive.
//!
//! [`Setter`]: crate::Setter
use crate::{
    executor::{self, ExecutionContext},
    Future, Promise, Setter,
};
use std::sync::Arc;

/// Type-erased error produced by [`Future::generalize_error`].
pub type AnyError = Arc<dyn std::error::Error + Send + Sync + 'static>;

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// [`map_on`](Self::map_on) using the global context.
    pub fn map<U, F>(&self, transform: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(&executor::global(), transform)
    }

    /// Applies `transform` to a successful value on `context`. Errors pass
    /// through untouched.
    pub fn map_on<U, F>(&self, context: &ExecutionContext, transform: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.derive(context, move |result, setter| {
            setter.write(result.map(transform));
        })
    }

    /// Applies `transform` to an error on `context`. Values pass through.
    pub fn map_err<G, F>(&self, context: &ExecutionContext, transform: F) -> Future<T, G>
    where
        G: Clone + Send + 'static,
        F: FnOnce(E) -> G + Send + 'static,
    {
        self.derive(context, move |result, setter| {
            setter.write(result.map_err(transform));
        })
    }

    /// [`flat_map_on`](Self::flat_map_on) using the global context.
    pub fn flat_map<U, F>(&self, transform: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U, E> + Send + 'static,
    {
        self.flat_map_on(&executor::global(), transform)
    }

    /// Chains a second asynchronous step after this one.
    ///
    /// On success, `transform` produces an inner future whose eventual
    /// result (or cancellation) becomes the result of the returned future.
    /// Cancelling the returned future cancels whichever of the two is
    /// still outstanding.
    pub fn flat_map_on<U, F>(&self, context: &ExecutionContext, transform: F) -> Future<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U, E> + Send + 'static,
    {
        let inner_context = Arc::clone(context);
        self.derive(context, move |result, setter| match result {
            Ok(value) => forward(&transform(value), &inner_context, setter),
            Err(err) => {
                setter.error(err);
            }
        })
    }

    /// Narrows any error type into a shared, type-erased [`AnyError`].
    pub fn generalize_error(&self) -> Future<T, AnyError>
    where
        E: std::error::Error + Sync,
    {
        self.map_err(&executor::global(), |err| Arc::new(err) as AnyError)
    }

    // Sets up the two-way cancellation link, then hands the source's result
    // to `complete` on `context`.
    fn derive<U, G, F>(&self, context: &ExecutionContext, complete: F) -> Future<U, G>
    where
        U: Clone + Send + 'static,
        G: Clone + Send + 'static,
        F: FnOnce(Result<T, E>, Setter<U, G>) + Send + 'static,
    {
        let (derived, setter) = Future::pending();

        derived.on_cancel(self.cancel_handle());
        let downstream = setter.downgrade();
        self.on_cancel(move || {
            downstream.cancel();
        });
        self.on_result(context, move |result| complete(result, setter));
        derived
    }
}

impl<T, E> Future<Future<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Collapses a future of a future into a single future.
    pub fn flatten(&self) -> Future<T, E> {
        self.flat_map(|inner| inner)
    }
}

// Mirrors `inner` into `setter`, and cancels `inner` if the outer future is
// cancelled first.
fn forward<U, E>(inner: &Future<U, E>, context: &ExecutionContext, setter: Setter<U, E>)
where
    U: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    setter.on_cancel(inner.cancel_handle());
    let downstream = setter.downgrade();
    inner.on_cancel(move || {
        downstream.cancel();
    });
    inner.on_result(context, move |result| {
        setter.write(result);
    });
}

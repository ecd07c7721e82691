//! Single-assignment futures with callbacks and cooperative cancellation.
//!
//! A [`Future`] is a read-only handle to a result that a producer writes
//! exactly once through its [`Setter`]. Any number of observers may attach
//! before or after the write; each one runs on the [`ExecutionContext`] it
//! was registered with, never inline on the caller's stack. Futures can be
//! cancelled, which suppresses a later write and tells the producer it may
//! stop working.
//!
//! On top of that core sit the combinators (`map`, `flat_map`, `flatten`,
//! `map_err`, `generalize_error`), [`bulk::join_all`] for joining many
//! futures into one ordered result, and [`RetryFuture`] for re-running a
//! fallible operation under a pluggable policy.
//!
//! # Examples
//!
//! ```
//! use promise_future::{Future, Promise};
//! use std::thread;
//!
//! let (future, setter) = Future::<u32, String>::pending();
//! let doubled = future.map(|v| v * 2);
//!
//! thread::spawn(move || setter.success(21));
//! assert_eq!(doubled.wait(), Ok(Ok(42)));
//! ```

pub mod bulk;
mod combinators;
pub mod error;
pub mod executor;
mod future;
pub mod retry;
mod state;

pub use combinators::AnyError;
pub use error::{Cancelled, ExecutorError};
pub use executor::{ExecutionContext, Executor};
pub use future::{Future, Setter, WeakSetter};
pub use retry::{Decide, FixedDelay, RetryFuture, RetryForever, RetryPolicy};
pub use state::PromiseState;

/// The producer side of a future.
///
/// Implemented by the strong [`Setter`] and the non-owning [`WeakSetter`].
/// Writes after the future has settled, or been cancelled, are ignored and
/// report `false`.
pub trait Promise {
    type Output;
    type Error;

    /// Moves the future from waiting to done. Returns whether this call won.
    fn write(&self, result: Result<Self::Output, Self::Error>) -> bool;

    fn success(&self, value: Self::Output) -> bool {
        self.write(Ok(value))
    }

    fn error(&self, err: Self::Error) -> bool {
        self.write(Err(err))
    }

    /// Learn about consumer-driven cancellation, e.g. to abort a request.
    fn on_cancel<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static;

    fn cancel(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

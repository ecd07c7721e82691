/// Lifecycle of a single future.
///
/// A future starts out `Waiting` and moves exactly once to either `Done` or
/// `Cancelled`. Both are terminal; later attempts to transition are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState<T, E> {
    Waiting,
    Done(Result<T, E>),
    Cancelled,
}

impl<T, E> PromiseState<T, E> {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_waiting()
    }

    /// The stored result, if the future completed.
    pub fn result(&self) -> Option<&Result<T, E>> {
        match self {
            Self::Done(result) => Some(result),
            _ => None,
        }
    }

    /// `Waiting -> Done(result)`. Returns `false` if already terminal.
    pub(crate) fn complete(&mut self, result: Result<T, E>) -> bool {
        if !self.is_waiting() {
            return false;
        }
        *self = Self::Done(result);
        true
    }

    /// `Waiting -> Cancelled`. Returns `false` if already terminal.
    pub(crate) fn cancel(&mut self) -> bool {
        if !self.is_waiting() {
            return false;
        }
        *self = Self::Cancelled;
        true
    }
}

impl<T, E> Default for PromiseState<T, E> {
    fn default() -> Self {
        Self::Waiting
    }
}

//! Three-way fiber outcome.

use crate::error::Cause;
use crate::value::AnyValue;

/// The outcome of running an effect to completion.
///
/// This is the currency of fiber completion and async resumption (§3).
#[derive(Debug)]
pub enum ExitResult<E, A> {
    /// The effect produced a value.
    Completed(A),
    /// The effect failed with a typed error.
    Failed(E),
    /// The effect was interrupted before it could produce a value or a
    /// typed failure.
    Interrupted(Cause),
}

impl<E, A> ExitResult<E, A> {
    /// Maps the success channel, leaving failure/interruption untouched.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> ExitResult<E, B> {
        match self {
            ExitResult::Completed(a) => ExitResult::Completed(f(a)),
            ExitResult::Failed(e) => ExitResult::Failed(e),
            ExitResult::Interrupted(cause) => ExitResult::Interrupted(cause),
        }
    }

    /// Maps the failure channel, leaving success/interruption untouched.
    pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> ExitResult<F, A> {
        match self {
            ExitResult::Completed(a) => ExitResult::Completed(a),
            ExitResult::Failed(e) => ExitResult::Failed(f(e)),
            ExitResult::Interrupted(cause) => ExitResult::Interrupted(cause),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ExitResult::Completed(_))
    }
}

/// Type-erased [`ExitResult`], the form carried around by the interpreter
/// and the fiber table. Recovered into a typed [`ExitResult`] at
/// [`crate::runtime::fiber::Fiber::join`].
pub(crate) enum ExitAny {
    Completed(AnyValue),
    Failed(AnyValue),
    Terminated(AnyValue),
    Interrupted(Cause),
}

// Hand-written: `AnyValue` is `Box<dyn Any + Send>`, which has no `Debug`
// impl of its own to derive through.
impl std::fmt::Debug for ExitAny {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitAny::Completed(_) => f.write_str("Completed(..)"),
            ExitAny::Failed(_) => f.write_str("Failed(..)"),
            ExitAny::Terminated(_) => f.write_str("Terminated(..)"),
            ExitAny::Interrupted(cause) => f.debug_tuple("Interrupted").field(cause).finish()
        }
    }
}

/// Recovers a typed [`ExitResult`] from an [`ExitAny`] carrying the same
/// logical outcome, downcasting the success/failure payload back to `A`/`E`.
pub(crate) fn recover<E: 'static, A: 'static>(exit: ExitAny) -> ExitResult<E, A> {
    match exit {
        ExitAny::Completed(a) => ExitResult::Completed(crate::value::downcast::<A>(a)),
        ExitAny::Failed(e) => ExitResult::Failed(crate::value::downcast::<E>(e)),
        ExitAny::Terminated(_) => {
            unreachable!("rill: a defect must be translated before it reaches typed code")
        }
        ExitAny::Interrupted(cause) => ExitResult::Interrupted(cause),
    }
}

/// Translates a root fiber's termination to host behavior (§7): completed
/// returns `Ok`; typed failure, defect, and interruption all become `Err`.
pub(crate) fn translate<E: 'static, A: 'static>(
    exit: ExitAny,
) -> Result<A, crate::error::RillError<E>> {
    match exit {
        ExitAny::Completed(a) => Ok(crate::value::downcast::<A>(a)),
        ExitAny::Failed(e) => Err(crate::error::RillError::Unhandled(
            crate::value::downcast::<E>(e),
        )),
        ExitAny::Terminated(t) => Err(crate::error::RillError::Defect(
            crate::error::DefectError(crate::error::Defect(t)),
        )),
        ExitAny::Interrupted(cause) => Err(crate::error::RillError::Interrupted(cause)),
    }
}

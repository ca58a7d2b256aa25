//! The three error channels of §7: typed failures, defects, interruption.

use crate::runtime::fiber::FiberId;
use std::any::Any;
use std::fmt;

/// Why a fiber was interrupted.
///
/// Carried by [`crate::exit::ExitResult::Interrupted`] and surfaced to
/// joiners and to `run`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cause {
    /// The fiber that requested the interruption, if known.
    pub interruptor: Option<FiberId>,
    /// A human-readable reason, supplied at the `interrupt` call site.
    pub reason: String,
}

impl Cause {
    pub fn new(interruptor: Option<FiberId>, reason: impl Into<String>) -> Self {
        Cause {
            interruptor,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted: {}", self.reason)
    }
}

/// An unrecoverable defect: a panic raised inside `sync`/`point`, or an
/// explicit `terminate(t)`.
///
/// Not recoverable by `attempt`/`absolve`; surfaces from `run` unchanged
/// (§7).
pub struct Defect(pub(crate) Box<dyn Any + Send>);

impl Defect {
    /// Renders the defect payload as a string when possible, falling back
    /// to a generic marker. Mirrors the teacher's own handling of panic
    /// payloads in `runtime::start`/`runtime::spawn` (`thread::Result`).
    pub fn message(&self) -> String {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            s.to_string()
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            s.clone()
        } else {
            "<opaque defect>".to_string()
        }
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Defect").field(&self.message()).finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message())
    }
}

impl std::error::Error for Defect {}

// Hand-written: the boxed `dyn Any + Send` payload has no `PartialEq` of its
// own to derive through. Two defects are equal if they render the same
// message -- good enough for tests asserting on a defect's identity, not a
// claim that the underlying payloads are the same value.
impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message() == other.message()
    }
}

/// The error `run` returns when the root effect doesn't complete.
///
/// Translates fiber termination to host behavior per §7: `Completed(a)` →
/// `Ok(a)`; `Failed(e)` → `Err(Unhandled(e))`; `Interrupted`/defect →
/// `Err(Interrupted)`/`Err(Defect)`.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RillError<E> {
    /// A typed failure escaped every `Recover` frame.
    #[error("unhandled failure")]
    Unhandled(E),

    /// A panic inside `sync`/`point`, or an explicit `terminate`.
    #[error("{0}")]
    Defect(#[source] DefectError),

    /// The root fiber was interrupted before completing.
    #[error("{0}")]
    Interrupted(Cause),
}

/// Wraps [`Defect`] so `RillError` can derive `std::error::Error`.
#[derive(Debug, PartialEq)]
pub struct DefectError(pub Defect);

impl fmt::Display for DefectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for DefectError {}

impl<E> RillError<E> {
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> RillError<F> {
        match self {
            RillError::Unhandled(e) => RillError::Unhandled(f(e)),
            RillError::Defect(d) => RillError::Defect(d),
            RillError::Interrupted(c) => RillError::Interrupted(c),
        }
    }
}

/// What reaches a fiber's uncaught-error handler (§4.4, §6 `defaultHandler`).
///
/// Every forked fiber that terminates with a typed failure or a defect
/// routes it here -- through `fork0`'s handler if one was given, otherwise
/// through the process-wide [`crate::runtime::set_default_handler`]
/// override -- independently of whether anyone ever joins it.
#[derive(Debug)]
pub enum UncaughtError {
    /// A typed failure that escaped every `Recover` frame.
    Failed(Box<dyn fmt::Debug + Send>),
    /// A panic inside `sync`/`point`, or an explicit `terminate`.
    Defect(Defect),
}

impl fmt::Display for UncaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncaughtError::Failed(e) => write!(f, "unhandled failure: {:?}", e),
            UncaughtError::Defect(d) => write!(f, "{d}"),
        }
    }
}

impl std::error::Error for UncaughtError {}

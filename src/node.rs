//! Type-erased effect tree and continuation frames (§3, §9 of the design).
//!
//! [`Effect<E, A>`](crate::effect::Effect) is a phantom-typed wrapper around
//! [`Node`]; the interpreter only ever sees `Node`s and [`AnyValue`]s. This
//! is what lets `FlatMap`'s continuation change the success type without an
//! unbounded generic parameter list threading through every frame.

use crate::error::Cause;
use crate::runtime::fiber::FiberId;
use crate::value::AnyValue;
use std::time::Duration;

pub(crate) type SyncThunk = Box<dyn FnOnce() -> AnyValue + Send>;
pub(crate) type ThrowingThunk = Box<dyn FnOnce() -> Result<AnyValue, AnyValue> + Send>;
pub(crate) type SuspendThunk = Box<dyn FnOnce() -> Node + Send>;
pub(crate) type Continuation = Box<dyn FnOnce(AnyValue) -> Node + Send>;
pub(crate) type Recovery = Box<dyn FnOnce(AnyValue) -> Node + Send>;
/// Borrows rather than consumes the failure: the same value still needs to
/// reach a joiner (or the fiber table's `Done` slot) after the handler runs.
pub(crate) type ForkHandler = Box<dyn FnOnce(&AnyValue) -> Node + Send>;

/// What an [`Async`](Node::Async) registration hands back to the runtime.
pub(crate) struct Resume(pub(crate) Box<dyn FnOnce(ResumeValue) + Send>);

/// The value an async callback resumes a fiber with: either the success
/// payload or a typed failure. A registration that never calls this leaves
/// the fiber parked until `interrupt` delivers a cancellation.
pub(crate) enum ResumeValue {
    Completed(AnyValue),
    Failed(AnyValue),
}

/// Cancels an in-flight async registration; invoked by `interrupt` while
/// the fiber is `AsyncSuspended` (§4.4).
pub(crate) type Canceler = Box<dyn FnOnce() + Send>;

/// `register(resume)` starts the operation and may return a canceler;
/// `resume` must be invoked at most once (§4.5 "Async callback
/// single-fire").
pub(crate) type Register = Box<dyn FnOnce(Resume) -> Option<Canceler> + Send>;
/// Like [`Register`] but itself produced by evaluating an effect.
pub(crate) type RegisterPure = Box<dyn FnOnce(Resume) -> Node + Send>;

/// Outcome handed to an [`OnError`](Node::OnError) handler: `None` on
/// success, `Some(&e)` on typed failure. Skipped entirely on defect and
/// interruption (§4.2 rule 7).
pub(crate) type OnErrorHandler = Box<dyn FnOnce(Option<&AnyValue>) -> Node + Send>;

/// Internal representation of `Either[E, A]`, the sum type [`Attempt`]
/// reifies a typed failure into and [`Absolve`] inverts (§3).
pub(crate) enum EitherAny {
    Left(AnyValue),
    Right(AnyValue),
}

/// The closed tagged sum of §3. One variant per constructor named in the
/// specification; deliberately not an open hierarchy (§9).
pub(crate) enum Node {
    Now(AnyValue),
    Point(SyncThunk),
    Sync(SyncThunk),
    SyncThrowable(ThrowingThunk),
    Suspend(SuspendThunk),
    Fail(AnyValue),
    Terminate(AnyValue),
    FlatMap(Box<Node>, Continuation),
    Attempt(Box<Node>),
    Absolve(Box<Node>),
    Async(Register),
    AsyncPure(RegisterPure),
    Fork {
        child: Box<Node>,
        /// Always materialized by `effect::fork`/`effect::fork0` at the
        /// typed layer -- the no-custom-handler case still builds one that
        /// reports through the RTS default handler (§4.4).
        handler: ForkHandler,
    },
    Join(FiberId),
    Interrupt {
        target: FiberId,
        reason: String,
    },
    Sleep(Duration),
    Ensuring(Box<Node>, Box<Node>),
    OnError(Box<Node>, OnErrorHandler),
    Never,
}

/// A continuation-stack entry (§3 "Continuation frame").
///
/// The stack grows on `FlatMap`, `Attempt`, `Ensuring`, `OnError` and
/// shrinks on value production or error propagation (§3).
pub(crate) enum Frame {
    /// Consumes a success value; skipped while unwinding an error, defect,
    /// or interruption (§4.2 rule 3/5).
    Apply(Continuation),
    /// Consumes a typed failure; skipped on success, defect, and
    /// interruption.
    Recover(Recovery),
    /// Runs unconditionally, including on interruption (`Ensuring`).
    FinalizeAlways(Box<Node>),
    /// Runs on success (with `None`) and typed failure (with `Some(&e)`);
    /// skipped on defect and interruption (`OnError`).
    FinalizeOnOutcome(OnErrorHandler),
}

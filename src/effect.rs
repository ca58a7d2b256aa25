//! The public, phantom-typed `Effect<E, A>` value and its combinators (§3,
//! §4.1 of the design).
//!
//! `Effect<E, A>` restores static typing at the API boundary over the
//! type-erased [`crate::node::Node`] tree the interpreter actually walks.
//! Building one never executes anything -- it only constructs a `Node` --
//! which is what makes every combinator here "pure" in the spec's sense.

use crate::node::{self, EitherAny, Node};
use crate::runtime::fiber::{Fiber, RawFiberHandle};
use crate::value::{self, AnyValue};
use std::convert::Infallible;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

/// A lazy, immutable description of a computation that, once interpreted,
/// either produces an `A`, fails with a typed `E`, or is interrupted.
///
/// `Effect` is move-only: the interpreter consumes the tree it's given
/// exactly once, the same way the teacher's own futures/closures are
/// consumed by `spawn`/`block_on`.
pub struct Effect<E, A> {
    pub(crate) node: Node,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Effect<E, A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Effect {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

/// The sum type `attempt`/`absolve` reify a typed failure into and out of
/// (§3 "Attempt(child)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<E, A> {
    Left(E),
    Right(A),
}

impl<E, A> Either<E, A> {
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }
}

// --- Leaf constructors (§4.1) -----------------------------------------

/// Evaluates `a` eagerly -- by the time this returns, `a` already exists.
pub fn now<A: Send + 'static>(a: A) -> Effect<Infallible, A> {
    Effect::from_node(Node::Now(value::boxed(a)))
}

/// Defers `f` until interpreted. A throwing `f` is a defect.
pub fn point<A: Send + 'static>(f: impl FnOnce() -> A + Send + 'static) -> Effect<Infallible, A> {
    Effect::from_node(Node::Point(Box::new(move || value::boxed(f()))))
}

/// Same contract as [`point`], spelled `sync` for call sites that read as
/// "run this side-effecting thunk" rather than "defer this pure value."
pub fn sync<A: Send + 'static>(f: impl FnOnce() -> A + Send + 'static) -> Effect<Infallible, A> {
    Effect::from_node(Node::Sync(Box::new(move || value::boxed(f()))))
}

/// Like [`sync`], but a `Result` returned from `f` becomes a typed failure
/// instead of propagating as a panic. A panic inside `f` is still a defect.
pub fn sync_throwable<E, A>(f: impl FnOnce() -> Result<A, E> + Send + 'static) -> Effect<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Effect::from_node(Node::SyncThrowable(Box::new(move || {
        f().map(value::boxed).map_err(value::boxed)
    })))
}

/// Defers both producing the inner effect and any exception raised while
/// doing so; evaluated exactly once per interpretation.
pub fn suspend<E, A>(f: impl FnOnce() -> Effect<E, A> + Send + 'static) -> Effect<E, A>
where
    E: 'static,
    A: 'static,
{
    Effect::from_node(Node::Suspend(Box::new(move || f().into_node())))
}

/// A typed failure, recoverable by [`attempt`]/[`absolve`].
pub fn fail<E: Send + 'static, A>(e: E) -> Effect<E, A> {
    Effect::from_node(Node::Fail(value::boxed(e)))
}

/// An untyped defect, not recoverable by [`attempt`]/[`absolve`].
pub fn terminate<T: Send + 'static, E, A>(t: T) -> Effect<E, A> {
    Effect::from_node(Node::Terminate(value::boxed(t)))
}

/// Suspends forever until interrupted.
pub fn never<E, A>() -> Effect<E, A> {
    Effect::from_node(Node::Never)
}

/// Completes after `duration` elapses.
pub fn sleep(duration: Duration) -> Effect<Infallible, ()> {
    Effect::from_node(Node::Sleep(duration))
}

// --- Sequencing (§4.1, §4.2 rule 2) ------------------------------------

/// Sequences `effect`, passing its success value into `k`.
pub fn flat_map<E, A, B>(
    effect: Effect<E, A>,
    k: impl FnOnce(A) -> Effect<E, B> + Send + 'static,
) -> Effect<E, B>
where
    A: 'static,
{
    Effect::from_node(Node::FlatMap(
        Box::new(effect.into_node()),
        Box::new(move |any| k(value::downcast::<A>(any)).into_node()),
    ))
}

/// `map(f) ≡ flat_map(x => now(f(x)))` (§8).
pub fn map<E, A, B>(effect: Effect<E, A>, f: impl FnOnce(A) -> B + Send + 'static) -> Effect<E, B>
where
    A: 'static,
    B: Send + 'static,
{
    flat_map(effect, move |a| Effect::from_node(Node::Now(value::boxed(f(a)))))
}

// --- Error-channel combinators (§4.2 rules 3-5) -------------------------

/// Reifies `effect`'s typed failure into a success of `Either::Left`;
/// defects and interruption are not caught (§4.2 rule 4).
pub fn attempt<E, A>(effect: Effect<E, A>) -> Effect<Infallible, Either<E, A>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let node = Node::Attempt(Box::new(effect.into_node()));
    let node = Node::FlatMap(
        Box::new(node),
        Box::new(|any| {
            let either = match value::downcast::<EitherAny>(any) {
                EitherAny::Left(e) => Either::Left(value::downcast::<E>(e)),
                EitherAny::Right(a) => Either::Right(value::downcast::<A>(a)),
            };
            Node::Now(value::boxed(either))
        }),
    );
    Effect::from_node(node)
}

/// Inverse of [`attempt`]: `absolve(attempt(e)) ≡ e` (§8).
pub fn absolve<E, A>(effect: Effect<Infallible, Either<E, A>>) -> Effect<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let node = Node::FlatMap(
        Box::new(effect.into_node()),
        Box::new(|any| {
            let either_any = match value::downcast::<Either<E, A>>(any) {
                Either::Left(e) => EitherAny::Left(value::boxed(e)),
                Either::Right(a) => EitherAny::Right(value::boxed(a)),
            };
            Node::Now(value::boxed(either_any))
        }),
    );
    Effect::from_node(Node::Absolve(Box::new(node)))
}

/// Witnesses that a more specific error kind fits into a wider one.
/// Purely structural: only the typed-failure channel is touched, defects
/// and interruption pass through untouched (realized via [`attempt`],
/// which has the same restriction).
pub fn widen_error<E, F, A>(effect: Effect<E, A>) -> Effect<F, A>
where
    E: Send + 'static,
    F: From<E> + Send + 'static,
    A: Send + 'static,
{
    absolve(map(attempt(effect), |either| match either {
        Either::Left(e) => Either::Left(F::from(e)),
        Either::Right(a) => Either::Right(a),
    }))
}

/// Runs `finalizer` after `effect`, whatever the outcome (success, typed
/// failure, defect, or interruption). The finalizer runs with interrupts
/// masked; a finalizer that itself fails or defects is reported to the
/// uncaught-error handler rather than replacing `effect`'s outcome (§4.3).
pub fn ensuring<E, A, FE, FA>(effect: Effect<E, A>, finalizer: Effect<FE, FA>) -> Effect<E, A>
where
    FE: 'static,
    FA: 'static,
{
    Effect::from_node(Node::Ensuring(
        Box::new(effect.into_node()),
        Box::new(finalizer.into_node()),
    ))
}

/// Like [`ensuring`], but `handler` observes the outcome: `None` on
/// success, `Some(&e)` on typed failure. Skipped on defect and
/// interruption (§4.2 rule 7).
pub fn on_error<E, A, FE, FA>(
    effect: Effect<E, A>,
    handler: impl FnOnce(Option<&E>) -> Effect<FE, FA> + Send + 'static,
) -> Effect<E, A>
where
    E: 'static,
    FE: 'static,
    FA: 'static,
{
    let node_handler: node::OnErrorHandler = Box::new(move |maybe_e: Option<&AnyValue>| {
        let typed = maybe_e.map(|e| value::downcast_ref::<E>(e));
        handler(typed).into_node()
    });
    Effect::from_node(Node::OnError(Box::new(effect.into_node()), node_handler))
}

// --- Asynchronous suspension (§4.2 rule 8) ------------------------------

/// Handed to an [`async_effect`] registration; resumes the suspended fiber
/// when invoked. At most one of `completed`/`failed` has any effect --
/// later calls are silently discarded (§4.5 "Async callback single-fire").
pub struct Resume<E, A> {
    inner: node::Resume,
    _marker: PhantomData<fn(E, A)>,
}

impl<E: Send + 'static, A: Send + 'static> Resume<E, A> {
    pub fn completed(self, a: A) {
        (self.inner.0)(node::ResumeValue::Completed(value::boxed(a)))
    }

    pub fn failed(self, e: E) {
        (self.inner.0)(node::ResumeValue::Failed(value::boxed(e)))
    }
}

/// `register(resume)` starts an asynchronous operation and suspends the
/// fiber; `resume` must be invoked at most once, from any thread.
/// `register` may return a canceler, invoked if the fiber is interrupted
/// while still suspended (§4.2 rule 8, §4.4).
pub fn async_effect<E, A>(
    register: impl FnOnce(Resume<E, A>) -> Option<node::Canceler> + Send + 'static,
) -> Effect<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let node_register: node::Register = Box::new(move |resume: node::Resume| {
        register(Resume {
            inner: resume,
            _marker: PhantomData,
        })
    });
    Effect::from_node(Node::Async(node_register))
}

/// Like [`async_effect`], but the registration itself is expressed as an
/// effect, executed to register the callback (§3 "AsyncPure").
pub fn async_pure<E, A>(
    register: impl FnOnce(Resume<E, A>) -> Effect<Infallible, ()> + Send + 'static,
) -> Effect<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let node_register: node::RegisterPure = Box::new(move |resume: node::Resume| {
        register(Resume {
            inner: resume,
            _marker: PhantomData,
        })
        .into_node()
    });
    Effect::from_node(Node::AsyncPure(node_register))
}

// --- Fork / join / interrupt (§4.2 rules 9-10, §4.4) --------------------

/// Schedules `effect` on a new fiber; unhandled typed failures are routed
/// through `handler`, an effect run on the failing fiber's own completion.
pub fn fork0<E, A>(
    effect: Effect<E, A>,
    handler: impl FnOnce(&E) -> Effect<Infallible, ()> + Send + 'static,
) -> Effect<Infallible, Fiber<E, A>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let node_handler: node::ForkHandler = Box::new(move |any: &AnyValue| {
        let e = value::downcast_ref::<E>(any);
        handler(e).into_node()
    });
    let node = Node::FlatMap(
        Box::new(Node::Fork {
            child: Box::new(effect.into_node()),
            handler: node_handler,
        }),
        Box::new(|any| {
            let raw = value::downcast::<RawFiberHandle>(any);
            Node::Now(value::boxed(Fiber::<E, A>::new(raw.id, raw.shared)))
        }),
    );
    Effect::from_node(node)
}

/// Schedules `effect` on a new fiber; an unhandled typed failure is
/// reported through the runtime's default handler (§4.4, §6
/// `defaultHandler`).
pub fn fork<E, A>(effect: Effect<E, A>) -> Effect<Infallible, Fiber<E, A>>
where
    E: Send + Debug + 'static,
    A: Send + 'static,
{
    fork0(effect, |e| {
        let message = format!("{e:?}");
        sync(move || {
            crate::runtime::handler::report(crate::error::UncaughtError::Failed(Box::new(
                message,
            )));
        })
    })
}

impl<E, A> Fiber<E, A> {
    /// Suspends until the fiber terminates, producing its value or
    /// propagating its failure/interruption (§4.2 rule 10, §4.4 "join").
    ///
    /// Consumes the handle: a fiber's exit is observed at most once, the
    /// same way the teacher's own `JoinHandle::join` takes `self` by value.
    pub fn join(self) -> Effect<E, A> {
        let id = self.id;
        std::mem::forget(self);
        Effect::from_node(Node::Join(id))
    }

    /// Signals the fiber to terminate with `reason`, queuing the
    /// interruption for delivery at its next preemption point (§4.4, §6
    /// `fiber.interrupt(cause)`). Returns once delivery is queued, not once
    /// the fiber has actually stopped.
    pub fn interrupt(&self, reason: impl Into<String>) -> Effect<Infallible, ()> {
        Effect::from_node(Node::Interrupt {
            target: self.id,
            reason: reason.into(),
        })
    }
}

// --- Racing (§4.1 "race", §5 "Timeouts") --------------------------------

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

#[derive(Clone)]
struct RaceOutcome<E, A> {
    side: Side,
    either: Either<E, A>,
}

/// Runs `left` and `right` concurrently and resolves with whichever
/// completes first. The loser is interrupted and its finalizers have
/// finished running before the race's result is observed -- the race
/// never joins the loser directly (which would propagate its
/// interruption into the race itself); instead each side signals a
/// dedicated "done" promise from an `ensuring` finalizer that runs on
/// every exit path, including interruption (§9 open question (a)).
pub fn race<E, A>(left: Effect<E, A>, right: Effect<E, A>) -> Effect<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    flat_map(crate::sync::Promise::make(), move |done_left| {
        flat_map(crate::sync::Promise::make(), move |done_right| {
            flat_map(crate::sync::Promise::make(), move |winner| {
                race_with_signals(left, right, done_left, done_right, winner)
            })
        })
    })
}

fn race_with_signals<E, A>(
    left: Effect<E, A>,
    right: Effect<E, A>,
    done_left: crate::sync::Promise<Infallible, ()>,
    done_right: crate::sync::Promise<Infallible, ()>,
    winner: crate::sync::Promise<Infallible, RaceOutcome<E, A>>,
) -> Effect<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    let watch = |side: Side,
                 effect: Effect<E, A>,
                 done: crate::sync::Promise<Infallible, ()>,
                 winner: crate::sync::Promise<Infallible, RaceOutcome<E, A>>| {
        let report = flat_map(attempt(effect), move |either| {
            winner.complete(Ok(RaceOutcome { side, either }))
        });
        fork(ensuring(report, done.complete(Ok(()))))
    };

    flat_map(watch(Side::Left, left, done_left.clone(), winner.clone()), move |fiber_left| {
        flat_map(watch(Side::Right, right, done_right.clone(), winner.clone()), move |fiber_right| {
            flat_map(winner.get(), move |outcome| {
                let (loser_fiber, loser_done, either) = match outcome.side {
                    Side::Left => (fiber_right, done_right, outcome.either),
                    Side::Right => (fiber_left, done_left, outcome.either),
                };
                flat_map(loser_fiber.interrupt("lost a race"), move |_| {
                    flat_map(loser_done.get(), move |_| absolve(now(either)))
                })
            })
        })
    })
}

/// `timeout(d)` is `race(effect, sleep(d).flat_map(_ => None))` (§5).
pub fn timeout<E, A>(effect: Effect<E, A>, duration: Duration) -> Effect<E, Option<A>>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    let completed = map(effect, Some);
    let expired = widen_error::<Infallible, E, Option<A>>(map(sleep(duration), |_| None));
    race(completed, expired)
}

//! Fiber identity, state, and the public [`Fiber`] handle (§3 "Fiber[E,A]").

use crate::error::Cause;
use crate::exit::ExitAny;
use crate::node::{Canceler, ForkHandler, Frame, Node};
use crate::runtime::scheduler::Shared;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};

/// Opaque identity of a fiber, stable for its whole lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FiberId(pub(crate) usize);

/// What a fiber is doing right now.
pub(crate) enum FiberStatus {
    /// Holds the node to resume with; present in the ready queue or about
    /// to be.
    Ready(Node),
    /// Parked on `Async`/`AsyncPure`, with an optional canceler stashed for
    /// `interrupt` to invoke (§4.4).
    AsyncSuspended(Option<Canceler>),
    /// Parked observing another fiber's completion via `Join`.
    JoinSuspended(FiberId),
    /// Parked in the timer (§4.5 `Sleep`).
    SleepSuspended,
    /// Terminated; exit observed at most once (§9 move-only semantics,
    /// mirrored from the teacher's own single-consumption `JoinHandle`).
    Done(ExitAny),
    /// The exit was already consumed by the one `Join` allowed to exist,
    /// or the fiber was dropped unobserved and cleaned up.
    Observed,
}

/// External waiter used by [`crate::runtime::run`] to block the calling
/// OS thread on the root fiber.
pub(crate) struct ExternalWait {
    pub(crate) result: Mutex<Option<ExitAny>>,
    pub(crate) condvar: Condvar,
}

pub(crate) struct FiberState {
    pub(crate) status: FiberStatus,
    pub(crate) frames: Vec<Frame>,
    /// Another fiber parked on `Join(self)`, notified exactly once.
    pub(crate) joiner: Option<FiberId>,
    pub(crate) external_waiter: Option<Arc<ExternalWait>>,
    pub(crate) interrupt_requested: Option<Cause>,
    pub(crate) mask_depth: u32,
    pub(crate) fork_handler: Option<ForkHandler>,
    /// `false` only for the root fiber created by `run`/`run_with`: its
    /// termination is translated to a `Result` by the caller, not routed
    /// through an uncaught-error handler (§4.4).
    pub(crate) is_child: bool,
    /// Set once the owning [`Fiber`] handle is dropped without calling
    /// `join`; lets the scheduler free the slot on completion instead of
    /// holding the exit result forever.
    pub(crate) unobserved: bool,
}

impl FiberState {
    pub(crate) fn new(root: Node, is_child: bool, fork_handler: Option<ForkHandler>) -> Self {
        FiberState {
            status: FiberStatus::Ready(root),
            frames: Vec::new(),
            joiner: None,
            external_waiter: None,
            interrupt_requested: None,
            mask_depth: 0,
            fork_handler,
            is_child,
            unobserved: false,
        }
    }
}

/// Handle returned by `fork`, used to `join` or `interrupt` the child
/// fiber it names (§6).
///
/// `join` consumes the handle: a fiber's exit is observed at most once,
/// the same way the teacher's own `JoinHandle::join` takes `self` by
/// value. `interrupt` only needs the id, so it borrows.
pub struct Fiber<E, A> {
    pub(crate) id: FiberId,
    pub(crate) shared: Arc<Shared>,
    pub(crate) _marker: PhantomData<fn() -> (E, A)>,
}

// Hand-written rather than derived: `Shared` (the fiber table, ready queue,
// timer) has no `Debug` impl of its own and shouldn't grow one just to
// satisfy this bound -- the id is the only part of a fiber handle worth
// printing anyway.
impl<E, A> std::fmt::Debug for Fiber<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber").field("id", &self.id).finish()
    }
}

impl<E, A> Fiber<E, A> {
    pub(crate) fn new(id: FiberId, shared: Arc<Shared>) -> Self {
        Fiber {
            id,
            shared,
            _marker: PhantomData,
        }
    }

    /// The fiber's stable identity.
    pub fn id(&self) -> FiberId {
        self.id
    }
}

impl<E, A> Drop for Fiber<E, A> {
    fn drop(&mut self) {
        // `join` forgets `self` after extracting what it needs, so this
        // only runs for handles that were never joined.
        self.shared.clone().mark_unobserved(self.id);
    }
}

/// What a `Fork` step produces before the typed layer (which alone knows
/// `E`/`A`) turns it into a `Fiber<E, A>`.
pub(crate) struct RawFiberHandle {
    pub(crate) id: FiberId,
    pub(crate) shared: Arc<Shared>,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod fiber {
        use super::*;

        #[test]
        fn implements_traits() {
            use impls::impls;
            use std::fmt::Debug;

            // Same shape as the teacher's `JoinHandle<O>` assertion
            // (`runtime::task::tests::join_handle::implements_traits`):
            // `Debug` unconditionally (hand-written, not derived), `Send` +
            // `Sync` because the only real field is `Arc<Shared>`, never
            // `Clone` since a fiber's exit is observed at most once.
            assert!(impls!(Fiber<&'static str, i32>: Debug & Send & Sync & !Clone));
        }

        #[test]
        fn debug_does_not_require_e_or_a_to_implement_it() {
            use impls::impls;
            use std::fmt::Debug;

            struct NotDebug;

            assert!(impls!(Fiber<NotDebug, NotDebug>: Debug));
        }
    }
}

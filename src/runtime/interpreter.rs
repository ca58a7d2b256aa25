//! The trampolined step loop (§4.2) plus finalizer unwinding (§4.3) and
//! fork/join/interrupt propagation (§4.4).
//!
//! Each fiber's continuation stack lives on the heap
//! ([`FiberState::frames`]); nothing here recurses on the host stack across
//! effect nodes, which is what makes arbitrarily deep `flat_map`/`map`/
//! `attempt` chains only consume heap (§8 "Stack safety").

use crate::error::{Cause, Defect, UncaughtError};
use crate::exit::ExitAny;
use crate::node::{EitherAny, Frame, Node, Resume, ResumeValue};
use crate::runtime::fiber::{ExternalWait, FiberId, FiberState, FiberStatus};
use crate::runtime::scheduler::Shared;
use crate::value::{self, AnyValue};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex};

/// One trampoline slice: either evaluate the next node, or unwind the frame
/// stack against a produced outcome.
enum Step {
    Eval(Node),
    Unwind(Outcome),
    Park,
    Done(ExitAny),
}

/// What's propagating while the interpreter unwinds frames (§4.2 rules 3,
/// 5, and the implicit success path of rule 1).
enum Outcome {
    Value(AnyValue),
    Fail(AnyValue),
    Defect(AnyValue),
    Interrupted(Cause),
}

/// Picks up a fiber that was just placed on the ready queue and drives its
/// trampoline until it parks or terminates. Called by worker threads and,
/// indirectly, by the timer thread and async resumptions.
pub(crate) fn drive(shared: &Arc<Shared>, id: FiberId) {
    let Some(cell) = shared.lookup(id) else {
        return;
    };
    let mut state = cell.lock().unwrap();

    let node = match std::mem::replace(&mut state.status, FiberStatus::AsyncSuspended(None)) {
        FiberStatus::Ready(node) => node,
        other => {
            // Stale wakeup (e.g. a canceler fired after the fiber already
            // moved on); put things back and ignore it.
            state.status = other;
            return;
        }
    };

    let mut step = Step::Eval(node);
    loop {
        step = match step {
            Step::Eval(node) => eval(shared, id, &mut state, node),
            Step::Unwind(outcome) => unwind(shared, id, &mut state, outcome),
            Step::Park => {
                tracing::trace!(fiber = id.0, "fiber parked");
                return;
            }
            Step::Done(exit) => {
                tracing::trace!(fiber = id.0, ?exit, "fiber done");
                finish(shared, id, &mut state, exit);
                return;
            }
        };
    }
}

/// Invoked by the timer thread when a `Sleep` deadline elapses.
pub(crate) fn resume_sleep(shared: &Arc<Shared>, id: FiberId) {
    let Some(cell) = shared.lookup(id) else {
        return;
    };
    {
        let mut state = cell.lock().unwrap();
        if !matches!(state.status, FiberStatus::SleepSuspended) {
            return; // interrupted or otherwise moved on already
        }
        state.status = FiberStatus::Ready(Node::Now(value::boxed(())));
    }
    shared.submit(id);
}

fn eval(shared: &Arc<Shared>, id: FiberId, state: &mut FiberState, node: Node) -> Step {
    // Preemption point (§4.4): between any two effect nodes, unless masked.
    if state.mask_depth == 0 {
        if let Some(cause) = state.interrupt_requested.take() {
            return Step::Unwind(Outcome::Interrupted(cause));
        }
    }

    match node {
        Node::Now(a) => Step::Unwind(Outcome::Value(a)),

        Node::Point(f) | Node::Sync(f) => {
            match std::panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(a) => Step::Unwind(Outcome::Value(a)),
                Err(payload) => Step::Unwind(Outcome::Defect(payload)),
            }
        }

        Node::SyncThrowable(f) => match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(a)) => Step::Unwind(Outcome::Value(a)),
            Ok(Err(e)) => Step::Unwind(Outcome::Fail(e)),
            Err(payload) => Step::Unwind(Outcome::Defect(payload)),
        },

        Node::Suspend(f) => match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(next) => Step::Eval(next),
            Err(payload) => Step::Unwind(Outcome::Defect(payload)),
        },

        Node::Fail(e) => Step::Unwind(Outcome::Fail(e)),
        Node::Terminate(t) => Step::Unwind(Outcome::Defect(t)),

        Node::FlatMap(child, k) => {
            state.frames.push(Frame::Apply(k));
            Step::Eval(*child)
        }

        Node::Attempt(child) => {
            state
                .frames
                .push(Frame::Recover(Box::new(|e| Node::Now(Box::new(EitherAny::Left(e))))));
            state
                .frames
                .push(Frame::Apply(Box::new(|a| Node::Now(Box::new(EitherAny::Right(a))))));
            Step::Eval(*child)
        }

        Node::Absolve(child) => {
            state.frames.push(Frame::Apply(Box::new(|v| {
                match value::downcast::<EitherAny>(v) {
                    EitherAny::Left(e) => Node::Fail(e),
                    EitherAny::Right(a) => Node::Now(a),
                }
            })));
            Step::Eval(*child)
        }

        Node::Async(register) => {
            let slot = ResumeSlot::new();
            let canceler = register(make_resume(shared.clone(), id, slot.clone()));
            match slot.resolve() {
                Resolution::FiredEarly(value) => resume_step(value),
                Resolution::Parked => {
                    state.status = FiberStatus::AsyncSuspended(canceler);
                    Step::Park
                }
            }
        }

        Node::AsyncPure(register) => {
            // Unlike `Async`, the registration itself is an effect, run on
            // a throwaway fiber via `run_to_completion`, which blocks this
            // worker thread -- and with it, the lock on this fiber's own
            // cell -- until the registration completes. If that
            // registration's `resume` fires synchronously (the "already
            // have the value" fast path, e.g. `Promise::get` on an
            // already-completed promise) it may do so from a different
            // thread than this one, racing the wait; it must not try to
            // re-lock this fiber's cell to deliver that result, or the two
            // threads deadlock on each other. `ResumeSlot` gives `resume` an
            // independent place to drop the value that needs no lock this
            // thread could be holding; only a *truly* asynchronous resume
            // (observed after this call returns) goes through the fiber
            // table at all.
            let slot = ResumeSlot::new();
            let registration = register(make_resume(shared.clone(), id, slot.clone()));
            run_to_completion(shared, registration);
            match slot.resolve() {
                Resolution::FiredEarly(value) => resume_step(value),
                Resolution::Parked => {
                    state.status = FiberStatus::AsyncSuspended(None);
                    Step::Park
                }
            }
        }

        Node::Fork { child, handler } => {
            let mut child_state = FiberState::new(*child, true, Some(handler));
            child_state.unobserved = false;
            let child_id = shared.insert_fiber(child_state);
            let raw = crate::runtime::fiber::RawFiberHandle {
                id: child_id,
                shared: shared.clone(),
            };
            Step::Unwind(Outcome::Value(value::boxed(raw)))
        }

        Node::Join(target) => handle_join(shared, id, state, target),

        Node::Interrupt { target, reason } => {
            let cause = Cause::new(Some(id), reason);
            if target == id {
                // A fiber interrupting itself: `deliver_interrupt`'s usual
                // `cell.lock()` on `target` would re-lock this very cell,
                // already held for the duration of this `eval` call (same
                // non-reentrancy hazard as `ResumeSlot` above). Since this
                // fiber is plainly running right now, not parked, queuing
                // the flag directly gets the same outcome `deliver_interrupt`
                // gives a running target: picked up at the next preemption
                // check, which is the very next `eval` call.
                state.interrupt_requested = Some(cause);
            } else {
                deliver_interrupt(shared, target, cause);
            }
            Step::Unwind(Outcome::Value(value::boxed(())))
        }

        Node::Sleep(duration) => {
            state.status = FiberStatus::SleepSuspended;
            shared.timer.schedule(id, duration);
            Step::Park
        }

        Node::Ensuring(child, finalizer) => {
            state.frames.push(Frame::FinalizeAlways(finalizer));
            Step::Eval(*child)
        }

        Node::OnError(child, handler) => {
            state.frames.push(Frame::FinalizeOnOutcome(handler));
            Step::Eval(*child)
        }

        Node::Never => {
            state.status = FiberStatus::AsyncSuspended(None);
            Step::Park
        }
    }
}

fn unwind(shared: &Arc<Shared>, id: FiberId, state: &mut FiberState, outcome: Outcome) -> Step {
    let Some(frame) = state.frames.pop() else {
        return Step::Done(match outcome {
            Outcome::Value(a) => ExitAny::Completed(a),
            Outcome::Fail(e) => ExitAny::Failed(e),
            Outcome::Defect(t) => ExitAny::Terminated(t),
            Outcome::Interrupted(cause) => ExitAny::Interrupted(cause),
        });
    };

    match (frame, outcome) {
        // Rule 1: success pops to the next Apply.
        (Frame::Apply(k), Outcome::Value(a)) => Step::Eval(k(a)),
        // Rule 3: failure skips Apply frames.
        (Frame::Apply(_), outcome @ (Outcome::Fail(_) | Outcome::Defect(_) | Outcome::Interrupted(_))) => {
            Step::Unwind(outcome)
        }

        // Rule 3: typed failure is consumed by the nearest Recover.
        (Frame::Recover(h), Outcome::Fail(e)) => Step::Eval(h(e)),
        // Recover never sees success, defects, or interruption (rule 5).
        (Frame::Recover(_), outcome) => Step::Unwind(outcome),

        // Ensuring: runs on every exit path, masked (§4.3).
        (Frame::FinalizeAlways(finalizer), outcome) => {
            run_finalizer_masked(shared, state, *finalizer);
            Step::Unwind(outcome)
        }

        // OnError: success -> None, failure -> Some(&e); skipped on defect
        // and interruption (§4.2 rule 7).
        (Frame::FinalizeOnOutcome(handler), Outcome::Value(a)) => {
            let finalizer = handler(None);
            run_finalizer_masked(shared, state, finalizer);
            Step::Unwind(Outcome::Value(a))
        }
        (Frame::FinalizeOnOutcome(handler), Outcome::Fail(e)) => {
            let finalizer = handler(Some(&e));
            run_finalizer_masked(shared, state, finalizer);
            Step::Unwind(Outcome::Fail(e))
        }
        (Frame::FinalizeOnOutcome(_), outcome) => Step::Unwind(outcome),
    }
}

/// Runs `finalizer` to completion with interrupts masked (§4.3). A
/// finalizer that fails or defects is reported to the default handler and
/// never changes the outcome it's wrapped around.
fn run_finalizer_masked(shared: &Arc<Shared>, state: &mut FiberState, finalizer: Node) {
    state.mask_depth += 1;
    let exit = run_to_completion(shared, finalizer);
    state.mask_depth -= 1;

    match exit {
        ExitAny::Completed(_) | ExitAny::Interrupted(_) => {}
        ExitAny::Failed(_) => {
            crate::runtime::handler::report(UncaughtError::Failed(Box::new(
                "a finalizer failed with a typed error".to_string(),
            )));
        }
        ExitAny::Terminated(t) => {
            crate::runtime::handler::report(UncaughtError::Defect(Defect(t)));
        }
    }
}

/// Drives a brand-new, throwaway fiber to completion and blocks the
/// calling worker thread until it's done. Used for finalizers and fork
/// uncaught-handler effects, both of which are expected to be short-lived.
///
/// Lends the shared ready queue a temporary helper thread for the duration
/// of the wait (see [`crate::runtime::scheduler::spawn_helper`]): without
/// it, a worker pool sized `N` could deadlock on finalizers nested `N+1`
/// deep, since each level parks one worker waiting on the next.
pub(crate) fn run_to_completion(shared: &Arc<Shared>, node: Node) -> ExitAny {
    let wait = Arc::new(ExternalWait {
        result: Mutex::new(None),
        condvar: Condvar::new(),
    });

    let mut fiber_state = FiberState::new(node, false, None);
    fiber_state.external_waiter = Some(wait.clone());
    shared.insert_fiber(fiber_state);

    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let helper = crate::runtime::scheduler::spawn_helper(shared, done.clone());

    let mut guard = wait.result.lock().unwrap();
    while guard.is_none() {
        guard = wait.condvar.wait(guard).unwrap();
    }
    let exit = guard.take().unwrap();
    drop(guard);

    done.store(true, std::sync::atomic::Ordering::SeqCst);
    shared.ready.condvar.notify_all();
    let _ = helper.join();

    exit
}

fn handle_join(shared: &Arc<Shared>, id: FiberId, state: &mut FiberState, target: FiberId) -> Step {
    let Some(target_cell) = shared.lookup(target) else {
        return Step::Unwind(Outcome::Defect(value::boxed(
            "rill: joined a fiber that no longer exists".to_string(),
        )));
    };

    let mut target_state = target_cell.lock().unwrap();
    if matches!(target_state.status, FiberStatus::Done(_)) {
        let exit = match std::mem::replace(&mut target_state.status, FiberStatus::Observed) {
            FiberStatus::Done(exit) => exit,
            _ => unreachable!(),
        };
        drop(target_state);
        shared.remove_fiber(target);

        Step::Unwind(match exit {
            ExitAny::Completed(a) => Outcome::Value(a),
            ExitAny::Failed(e) => Outcome::Fail(e),
            ExitAny::Terminated(t) => Outcome::Defect(t),
            ExitAny::Interrupted(cause) => Outcome::Interrupted(cause),
        })
    } else {
        target_state.joiner = Some(id);
        drop(target_state);
        state.status = FiberStatus::JoinSuspended(target);
        Step::Park
    }
}

/// Finalizes a fiber's termination: reports uncaught child errors (§4.4),
/// notifies whoever is waiting on it, and frees its slot if nobody will
/// ever observe the result.
fn finish(shared: &Arc<Shared>, id: FiberId, state: &mut FiberState, exit: ExitAny) {
    if state.is_child {
        match &exit {
            ExitAny::Failed(e) => {
                let handler = state.fork_handler.take();
                let report_node = match handler {
                    Some(handler) => handler(e),
                    None => Node::Now(value::boxed(())),
                };
                run_to_completion(shared, report_node);
            }
            ExitAny::Terminated(_) => {
                // The real payload still needs to reach a joiner (or the
                // `Done` slot) below, so report a fresh synthetic marker
                // rather than consuming it here.
                crate::runtime::handler::report(UncaughtError::Defect(Defect(value::boxed(
                    "a forked fiber terminated with a defect".to_string(),
                ))));
            }
            _ => {}
        }
    }

    if let Some(joiner) = state.joiner.take() {
        if let Some(joiner_cell) = shared.lookup(joiner) {
            let mut joiner_state = joiner_cell.lock().unwrap();
            if matches!(joiner_state.status, FiberStatus::JoinSuspended(t) if t == id) {
                let node = match exit {
                    ExitAny::Completed(a) => Node::Now(a),
                    ExitAny::Failed(e) => Node::Fail(e),
                    ExitAny::Terminated(t) => Node::Terminate(t),
                    ExitAny::Interrupted(cause) => {
                        drop(joiner_state);
                        interrupt_ready(shared, joiner, cause);
                        return;
                    }
                };
                joiner_state.status = FiberStatus::Ready(node);
                drop(joiner_state);
                shared.submit(joiner);
                return;
            }
        }
        // Joiner vanished or moved on; nothing observed the result.
        finalize_unobserved_or_store(shared, id, state, ExitAny::Interrupted(Cause::new(None, "joiner gone")));
        return;
    }

    if let Some(wait) = state.external_waiter.take() {
        *wait.result.lock().unwrap() = Some(exit);
        wait.condvar.notify_one();
        shared.remove_fiber(id);
        return;
    }

    finalize_unobserved_or_store(shared, id, state, exit);
}

fn finalize_unobserved_or_store(shared: &Arc<Shared>, id: FiberId, state: &mut FiberState, exit: ExitAny) {
    if state.unobserved {
        shared.remove_fiber(id);
    } else {
        state.status = FiberStatus::Done(exit);
    }
}

/// Delivers an interruption directly into an already-`Unwind`ing fiber
/// that's about to observe another fiber's `Interrupted` exit via `join`.
fn interrupt_ready(shared: &Arc<Shared>, id: FiberId, cause: Cause) {
    let Some(cell) = shared.lookup(id) else { return };
    {
        let mut state = cell.lock().unwrap();
        state.interrupt_requested = Some(cause);
        state.status = FiberStatus::Ready(Node::Now(value::boxed(())));
    }
    shared.submit(id);
}

/// Sets a fiber's interruption flag and, if it's parked, wakes it
/// immediately (§4.4). Delivery to a running fiber happens at its next
/// preemption point.
fn deliver_interrupt(shared: &Arc<Shared>, target: FiberId, cause: Cause) {
    tracing::debug!(fiber = target.0, reason = %cause.reason, "interrupt delivered");
    let Some(cell) = shared.lookup(target) else {
        return;
    };
    let mut state = cell.lock().unwrap();

    if state.mask_depth > 0 {
        state.interrupt_requested = Some(cause);
        return;
    }

    match std::mem::replace(&mut state.status, FiberStatus::AsyncSuspended(None)) {
        FiberStatus::AsyncSuspended(canceler) => {
            state.status = FiberStatus::Ready(Node::Now(value::boxed(())));
            state.interrupt_requested = Some(cause);
            drop(state);
            // Run the canceler without holding the fiber's own lock: it's
            // arbitrary user code (e.g. cancels a timer or an I/O op).
            if let Some(canceler) = canceler {
                canceler();
            }
            shared.submit(target);
        }
        FiberStatus::SleepSuspended => {
            state.interrupt_requested = Some(cause);
            state.status = FiberStatus::Ready(Node::Now(value::boxed(())));
            drop(state);
            shared.submit(target);
        }
        FiberStatus::JoinSuspended(waited_on) => {
            state.interrupt_requested = Some(cause);
            // Deregister as a joiner so the fiber we were waiting on
            // doesn't try to wake an already-interrupted target.
            if let Some(waited_cell) = shared.lookup(waited_on) {
                let mut waited_state = waited_cell.lock().unwrap();
                if waited_state.joiner == Some(target) {
                    waited_state.joiner = None;
                }
            }
            state.status = FiberStatus::Ready(Node::Now(value::boxed(())));
            drop(state);
            shared.submit(target);
        }
        other @ (FiberStatus::Ready(_) | FiberStatus::Done(_) | FiberStatus::Observed) => {
            // Already ready to run (will see the flag at its next
            // preemption point), or already terminated: nothing to wake.
            if let FiberStatus::Ready(_) = &other {
                state.status = other;
                state.interrupt_requested = Some(cause);
            } else {
                state.status = other;
            }
        }
    }
}

/// Rendezvous between a `resume` callback and the `eval` call that
/// registered it, used to tell apart a resume fired synchronously (still
/// inside, or racing, the registration call) from one fired genuinely
/// later, after the fiber has parked and released its own lock.
///
/// Needed because the registration for `Async`/`AsyncPure` may call
/// `resume` from the very thread that's driving this fiber -- or from
/// another thread racing `run_to_completion`'s blocking wait, which holds
/// this fiber's cell lock the whole time. Either way, `resume` must be
/// able to hand back a value without taking a lock the calling thread
/// might already hold (`std::sync::Mutex` isn't reentrant): a self-lock
/// hangs forever, and a cross-thread lock on a mutex the other side is
/// blocked holding is a deadlock, not just a wait.
struct ResumeSlot(Mutex<SlotState>);

enum SlotState {
    AwaitingPark,
    FiredEarly(ResumeValue),
    Parked,
}

enum Resolution {
    FiredEarly(ResumeValue),
    Parked,
}

impl ResumeSlot {
    fn new() -> Arc<Self> {
        Arc::new(ResumeSlot(Mutex::new(SlotState::AwaitingPark)))
    }

    /// Called by `resume`. `Ok(())` means it recorded the value itself and
    /// no fiber-table lock is needed; `Err(value)` hands the value back
    /// because the fiber already parked, so the caller must wake it the
    /// normal way.
    fn fire(&self, value: ResumeValue) -> Result<(), ResumeValue> {
        let mut guard = self.0.lock().unwrap();
        match &*guard {
            SlotState::AwaitingPark => {
                *guard = SlotState::FiredEarly(value);
                Ok(())
            }
            SlotState::Parked => Err(value),
            // Unreachable: the `fired` single-fire guard in `make_resume`
            // stops a second call from ever reaching here.
            SlotState::FiredEarly(_) => Ok(()),
        }
    }

    /// Called by `eval` once the registration call (`register(...)`, or
    /// `register`+`run_to_completion` for `AsyncPure`) has returned.
    fn resolve(&self) -> Resolution {
        let mut guard = self.0.lock().unwrap();
        match std::mem::replace(&mut *guard, SlotState::Parked) {
            SlotState::FiredEarly(value) => Resolution::FiredEarly(value),
            SlotState::AwaitingPark => Resolution::Parked,
            SlotState::Parked => unreachable!("a fiber only parks on one node at a time"),
        }
    }
}

/// Turns an early-fired [`ResumeValue`] into the `Step` that continues the
/// trampoline immediately, without ever parking.
fn resume_step(value: ResumeValue) -> Step {
    match value {
        ResumeValue::Completed(a) => Step::Unwind(Outcome::Value(a)),
        ResumeValue::Failed(e) => Step::Unwind(Outcome::Fail(e)),
    }
}

fn make_resume(shared: Arc<Shared>, id: FiberId, slot: Arc<ResumeSlot>) -> Resume {
    let fired = std::sync::atomic::AtomicBool::new(false);
    let fired = Arc::new(fired);

    Resume(Box::new(move |value: ResumeValue| {
        // §4.5 / §9: "at most once"; extra invocations are discarded.
        if fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let value = match slot.fire(value) {
            // Recorded on the slot; `eval`'s `resolve()` call will pick it
            // up once the registration returns. No fiber-table lock taken.
            Ok(()) => return,
            // The fiber already parked and released its own lock by the
            // time this fired -- safe to wake it the normal way.
            Err(value) => value,
        };

        let Some(cell) = shared.lookup(id) else {
            return;
        };
        {
            let mut state = cell.lock().unwrap();
            if !matches!(state.status, FiberStatus::AsyncSuspended(_)) {
                return;
            }
            let node = match value {
                ResumeValue::Completed(a) => Node::Now(a),
                ResumeValue::Failed(e) => Node::Fail(e),
            };
            state.status = FiberStatus::Ready(node);
        }
        shared.submit(id);
    }))
}

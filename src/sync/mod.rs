//! Shared mutable state between fibers (§3 "IORef[A]", "Promise[E,A]").
//!
//! `IORef` and `Promise` are the only shared mutables the runtime exposes
//! (§5): every other form of cross-fiber communication goes through them,
//! async callbacks, or `join`. Both sequence their mutations through
//! effects rather than exposing a synchronous API, consistent with every
//! other primitive in this crate.

use crate::effect::{async_pure, point, Effect, Resume};
use std::sync::{Arc, Mutex};

/// A single-owner mutable cell, reachable by any fiber holding a clone of
/// the handle. Every `modify` call is linearizable relative to every other
/// `modify` on the same ref, including from other fibers (§5).
pub struct IORef<A> {
    inner: Arc<Mutex<A>>,
}

impl<A> Clone for IORef<A> {
    fn clone(&self) -> Self {
        IORef {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Send + 'static> IORef<A> {
    /// Allocates a new ref holding `a`.
    pub fn new(a: A) -> Effect<std::convert::Infallible, IORef<A>> {
        point(move || IORef {
            inner: Arc::new(Mutex::new(a)),
        })
    }

    /// Reads the current value.
    pub fn read(&self) -> Effect<std::convert::Infallible, A>
    where
        A: Clone,
    {
        let inner = self.inner.clone();
        point(move || inner.lock().unwrap().clone())
    }

    /// Replaces the current value.
    pub fn write(&self, a: A) -> Effect<std::convert::Infallible, ()> {
        let inner = self.inner.clone();
        point(move || {
            *inner.lock().unwrap() = a;
        })
    }

    /// Atomically updates the current value in place, producing `b`.
    pub fn modify<B: Send + 'static>(
        &self,
        f: impl FnOnce(&mut A) -> B + Send + 'static,
    ) -> Effect<std::convert::Infallible, B> {
        let inner = self.inner.clone();
        point(move || {
            let mut guard = inner.lock().unwrap();
            f(&mut guard)
        })
    }
}

/// A write-once cell with a waiters list (§3). `complete` transitions
/// `Empty -> Full(result)` exactly once; `get` either returns immediately
/// or registers as an async waiter, resolving once `complete` runs.
///
/// Replaying a completed result to every waiter requires cloning it out of
/// the shared cell -- a Rust-specific realization detail the spec's source
/// didn't need to consider (see `DESIGN.md`), hence the `Clone` bounds.
pub struct Promise<E, A> {
    inner: Arc<Mutex<PromiseState<E, A>>>,
}

impl<E, A> Clone for Promise<E, A> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

enum PromiseState<E, A> {
    Empty(Vec<Box<dyn FnOnce(Result<A, E>) + Send>>),
    Full(Result<A, E>),
}

impl<E, A> Promise<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    /// Allocates a new, empty promise.
    pub fn make() -> Effect<std::convert::Infallible, Promise<E, A>> {
        point(|| Promise {
            inner: Arc::new(Mutex::new(PromiseState::Empty(Vec::new()))),
        })
    }

    /// Completes the promise with `result`, waking every current waiter.
    /// Returns whether this call won the race to complete it -- later
    /// calls are no-ops.
    pub fn complete(&self, result: Result<A, E>) -> Effect<std::convert::Infallible, bool> {
        let inner = self.inner.clone();
        point(move || {
            let mut state = inner.lock().unwrap();
            match std::mem::replace(&mut *state, PromiseState::Full(result.clone())) {
                PromiseState::Empty(waiters) => {
                    drop(state);
                    for waiter in waiters {
                        waiter(result.clone());
                    }
                    true
                }
                already_full @ PromiseState::Full(_) => {
                    *state = already_full;
                    false
                }
            }
        })
    }

    /// Resolves with the completed value, suspending the calling fiber if
    /// the promise isn't complete yet.
    pub fn get(&self) -> Effect<E, A> {
        let inner = self.inner.clone();
        async_pure(move |resume: Resume<E, A>| {
            let mut state = inner.lock().unwrap();
            if let PromiseState::Full(result) = &*state {
                let result = result.clone();
                drop(state);
                return point(move || match result {
                    Ok(a) => resume.completed(a),
                    Err(e) => resume.failed(e),
                });
            }

            match &mut *state {
                PromiseState::Empty(waiters) => {
                    waiters.push(Box::new(move |result| match result {
                        Ok(a) => resume.completed(a),
                        Err(e) => resume.failed(e),
                    }));
                }
                PromiseState::Full(_) => unreachable!(),
            }
            crate::effect::now(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{flat_map, now};
    use crate::error::RillError;
    use crate::runtime;
    use std::convert::Infallible;

    #[test]
    fn ioref_read_write_roundtrip() {
        let result: Result<i32, RillError<Infallible>> =
            runtime::run(flat_map(IORef::new(1), |cell| {
                flat_map(cell.write(41), move |_| {
                    flat_map(cell.read(), move |value| now(value))
                })
            }));
        assert_eq!(result, Ok(41));
    }

    #[test]
    fn ioref_modify_is_atomic_per_call() {
        let result: Result<i32, RillError<Infallible>> =
            runtime::run(flat_map(IORef::new(0), |cell| {
                flat_map(cell.modify(|n| *n += 1), move |_| {
                    flat_map(cell.read(), move |value| now(value))
                })
            }));
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn promise_get_after_complete_returns_immediately() {
        let result: Result<i32, RillError<Infallible>> =
            runtime::run(flat_map(Promise::<Infallible, i32>::make(), |promise| {
                flat_map(promise.complete(Ok(7)), move |_| promise.get())
            }));
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn promise_second_complete_does_not_win() {
        let result: Result<bool, RillError<Infallible>> =
            runtime::run(flat_map(Promise::<Infallible, i32>::make(), |promise| {
                flat_map(promise.complete(Ok(1)), move |_| promise.complete(Ok(2)))
            }));
        assert_eq!(result, Ok(false));
    }
}

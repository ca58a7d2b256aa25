//! Type-erased value carrier used inside the interpreter.
//!
//! The effect tree is generic over its success/error types at the public
//! API (`Effect<E, A>`), but the interpreter that walks the tree is not:
//! a `FlatMap` continuation can turn an `Effect<E, A>` into an
//! `Effect<E, B>` for an arbitrary, unrelated `B`. Rather than thread an
//! unbounded type parameter list through every frame, values crossing
//! interpreter boundaries are boxed as [`AnyValue`] and downcast back to
//! their concrete type exactly once, at the public constructor/destructor
//! that knows what it put there.

use std::any::Any;

/// A boxed, type-erased, thread-movable value.
pub(crate) type AnyValue = Box<dyn Any + Send>;

/// Boxes `a` as an [`AnyValue`].
pub(crate) fn boxed<A: Send + 'static>(a: A) -> AnyValue {
    Box::new(a)
}

/// Downcasts an [`AnyValue`] back to `A`.
///
/// # Panics
/// Panics if `value` wasn't actually boxed from an `A`. This only happens
/// if the interpreter mismatches a frame with the wrong node, which would
/// be a bug in `rill` itself, never a consequence of user code.
pub(crate) fn downcast<A: 'static>(value: AnyValue) -> A {
    match value.downcast::<A>() {
        Ok(a) => *a,
        Err(_) => unreachable!("rill: interpreter produced a value of the wrong type"),
    }
}

/// Borrowing counterpart of [`downcast`], used where the original box must
/// survive the call (e.g. a fork uncaught-handler that runs alongside the
/// value still propagating to a joiner).
pub(crate) fn downcast_ref<A: 'static>(value: &AnyValue) -> &A {
    match value.downcast_ref::<A>() {
        Some(a) => a,
        None => unreachable!("rill: interpreter produced a value of the wrong type"),
    }
}

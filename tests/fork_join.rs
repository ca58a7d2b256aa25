//! `IORef`/`Promise` cross-fiber coordination, and `race`/`timeout` (§5).

use rill::effect::{fork, map, now, race, sleep, timeout};
use rill::effect::flat_map;
use rill::error::RillError;
use rill::runtime::run;
use rill::sync::{IORef, Promise};
use std::convert::Infallible;
use std::time::Duration;

#[test]
fn ioref_is_visible_across_forked_fibers() {
    // The forking fiber writes, the forked fiber reads -- `IORef` is the
    // only channel between them besides join.
    let effect = flat_map(IORef::new(0), |cell| {
        let writer_cell = cell.clone();
        let reader_cell = cell.clone();
        flat_map(writer_cell.write(99), move |_| {
            flat_map(fork(reader_cell.read()), |fiber| fiber.join())
        })
    });

    let result: Result<i32, RillError<Infallible>> = run(effect);
    assert_eq!(result, Ok(99));
}

#[test]
fn promise_get_suspends_a_forked_fiber_until_another_completes_it() {
    let effect = flat_map(Promise::<Infallible, i32>::make(), |promise| {
        let waiter_promise = promise.clone();
        let completer_promise = promise;
        flat_map(fork(waiter_promise.get()), move |waiter| {
            flat_map(completer_promise.complete(Ok(7)), move |_| waiter.join())
        })
    });

    let result: Result<i32, RillError<Infallible>> = run(effect);
    assert_eq!(result, Ok(7));
}

#[test]
fn race_resolves_to_the_faster_side() {
    let fast = now::<&str>("fast");
    let slow = map(sleep(Duration::from_millis(200)), |_| "slow");

    let result: Result<&str, RillError<Infallible>> = run(race(fast, slow));
    assert_eq!(result, Ok("fast"));
}

#[test]
fn race_interrupts_and_drains_the_loser_before_resolving() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let loser_finished = Arc::new(AtomicBool::new(false));
    let marker = loser_finished.clone();

    let fast = now::<&str>("fast");
    let slow = rill::effect::ensuring(
        map(sleep(Duration::from_millis(200)), |_| "slow"),
        rill::effect::sync(move || marker.store(true, Ordering::SeqCst)),
    );

    let result: Result<&str, RillError<Infallible>> = run(race(fast, slow));
    assert_eq!(result, Ok("fast"));
    // `race` doesn't resolve until the loser's finalizers have run.
    assert!(loser_finished.load(Ordering::SeqCst));
}

#[test]
fn timeout_returns_some_when_the_effect_wins() {
    let effect = now::<i32>(42);
    let result: Result<Option<i32>, RillError<Infallible>> = run(timeout(effect, Duration::from_millis(200)));
    assert_eq!(result, Ok(Some(42)));
}

#[test]
fn timeout_returns_none_when_the_deadline_wins() {
    let effect = map(sleep(Duration::from_millis(200)), |_| 42);
    let result: Result<Option<i32>, RillError<Infallible>> = run(timeout(effect, Duration::from_millis(10)));
    assert_eq!(result, Ok(None));
}

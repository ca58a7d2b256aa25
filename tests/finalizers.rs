//! Finalizer semantics (§4.3, §8 "Finalizer invariants"): `ensuring` runs
//! exactly once on every exit path; nested finalizers run innermost-first;
//! a failing finalizer is reported, not propagated; `on_error` observes the
//! outcome and is skipped on interruption.

use rill::effect::{ensuring, fail, flat_map, fork, never, on_error, sync, terminate};
use rill::error::RillError;
use rill::runtime::run;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, Arc<Mutex<Vec<&'static str>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    (log.clone(), log)
}

#[test]
fn ensuring_runs_once_on_success() {
    let (log, log2) = recorder();
    let log3 = log.clone();
    let effect = ensuring(
        sync(move || log.lock().unwrap().push("body")),
        sync(move || log2.lock().unwrap().push("finalizer")),
    );
    let result: Result<(), RillError<Infallible>> = run(effect);
    assert!(result.is_ok());
    assert_eq!(*log3.lock().unwrap(), vec!["body", "finalizer"]);
}

#[test]
fn ensuring_runs_on_typed_failure_without_masking_it() {
    let ran = Arc::new(Mutex::new(false));
    let ran2 = ran.clone();

    let effect = ensuring(fail::<&str, ()>("boom"), sync(move || *ran2.lock().unwrap() = true));
    let result: Result<(), RillError<&str>> = run(effect);

    assert!(matches!(result, Err(RillError::Unhandled("boom"))));
    assert!(*ran.lock().unwrap());
}

#[test]
fn ensuring_runs_on_defect_without_masking_it() {
    let ran = Arc::new(Mutex::new(false));
    let ran2 = ran.clone();

    let effect = ensuring(
        terminate::<&str, Infallible, ()>("kaboom"),
        sync(move || *ran2.lock().unwrap() = true),
    );
    let result: Result<(), RillError<Infallible>> = run(effect);

    assert!(matches!(result, Err(RillError::Defect(_))));
    assert!(*ran.lock().unwrap());
}

#[test]
fn ensuring_runs_on_interruption() {
    let ran = Arc::new(Mutex::new(false));
    let ran2 = ran.clone();

    let guarded = ensuring(never::<Infallible, ()>(), sync(move || *ran2.lock().unwrap() = true));
    let result: Result<(), RillError<Infallible>> = run(flat_map(fork(guarded), |fiber| {
        flat_map(fiber.interrupt("done"), move |_| fiber.join())
    }));

    assert!(matches!(result, Err(RillError::Interrupted(_))));
    assert!(*ran.lock().unwrap());
}

#[test]
fn nested_finalizers_run_innermost_first() {
    let (log, log2) = recorder();
    let log3 = log.clone();

    let effect = ensuring(
        ensuring(fail::<&str, ()>("boom"), sync(move || log2.lock().unwrap().push("inner"))),
        sync(move || log3.lock().unwrap().push("outer")),
    );
    let result: Result<(), RillError<&str>> = run(effect);

    assert!(matches!(result, Err(RillError::Unhandled("boom"))));
    assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
}

#[test]
fn failing_finalizer_does_not_replace_the_outcome() {
    // `fail(Oh).ensuring(terminate(E2)).ensuring(terminate(E3))` (§8
    // scenario 4): the outer failure still surfaces, and both finalizer
    // defects are reported rather than propagated.
    let reported = Arc::new(Mutex::new(Vec::<String>::new()));
    let reported2 = reported.clone();
    rill::runtime::set_default_handler(move |error| {
        reported2.lock().unwrap().push(error.to_string());
    });

    let effect = ensuring(
        ensuring(fail::<&str, ()>("Oh"), terminate::<&str, &str, ()>("E2")),
        terminate::<&str, &str, ()>("E3"),
    );
    let result: Result<(), RillError<&str>> = run(effect);

    assert!(matches!(result, Err(RillError::Unhandled("Oh"))));
    let seen = reported.lock().unwrap();
    assert_eq!(seen.len(), 2);
}

#[test]
fn on_error_observes_success_as_none() {
    let seen = Arc::new(Mutex::new(None));
    let seen2 = seen.clone();

    let effect = on_error(rill::effect::now::<i32>(1), move |maybe_e: Option<&Infallible>| {
        *seen2.lock().unwrap() = Some(maybe_e.is_some());
        rill::effect::now(())
    });
    let result: Result<i32, RillError<Infallible>> = run(effect);

    assert_eq!(result, Ok(1));
    assert_eq!(*seen.lock().unwrap(), Some(false));
}

#[test]
fn on_error_observes_typed_failure_as_some() {
    let seen = Arc::new(Mutex::new(None));
    let seen2 = seen.clone();

    let effect = on_error(fail::<&str, i32>("boom"), move |maybe_e: Option<&&str>| {
        *seen2.lock().unwrap() = maybe_e.copied();
        rill::effect::now(())
    });
    let result: Result<i32, RillError<&str>> = run(effect);

    assert!(matches!(result, Err(RillError::Unhandled("boom"))));
    assert_eq!(*seen.lock().unwrap(), Some("boom"));
}

#[test]
fn on_error_is_skipped_on_interruption() {
    let called = Arc::new(Mutex::new(false));
    let called2 = called.clone();

    let guarded = on_error(never::<Infallible, ()>(), move |_: Option<&Infallible>| {
        *called2.lock().unwrap() = true;
        rill::effect::now(())
    });
    let result: Result<(), RillError<Infallible>> = run(flat_map(fork(guarded), |fiber| {
        flat_map(fiber.interrupt("done"), move |_| fiber.join())
    }));

    assert!(matches!(result, Err(RillError::Interrupted(_))));
    assert!(!*called.lock().unwrap());
}

// Exercised at the very end so an earlier test's `sleep` timer thread can't
// still be racing this one's default-handler swap.
#[test]
fn bracket_release_runs_before_interruption_is_observed() {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let use_log = log.clone();
    let release_log = log.clone();

    let use_effect = flat_map(rill::effect::sleep(Duration::from_millis(5)), move |_| {
        flat_map(sync(move || use_log.lock().unwrap().push("u")), |_| {
            never::<Infallible, ()>()
        })
    });
    let guarded = ensuring(use_effect, sync(move || release_log.lock().unwrap().push("r")));

    let fiber = run(fork(guarded)).expect("fork always succeeds");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if log.lock().unwrap().contains(&"u") {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "timed out waiting for \"u\"");
        std::thread::sleep(Duration::from_millis(2));
    }

    let result: Result<(), RillError<Infallible>> =
        run(flat_map(fiber.interrupt("teardown"), move |_| fiber.join()));

    assert!(matches!(result, Err(RillError::Interrupted(_))));
    assert_eq!(*log.lock().unwrap(), vec!["u", "r"]);
}

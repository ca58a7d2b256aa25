//! Stack safety (§8): long `map`/`flat_map`/`attempt`-`absolve` chains and
//! async-resume chains must complete without host-stack overflow, since the
//! interpreter trampolines rather than recursing across effect nodes.

use rill::effect::{absolve, async_effect, attempt, flat_map, map, now, sync_throwable, Resume};
use rill::error::RillError;
use rill::runtime::run;
use std::convert::Infallible;

const CHAIN_LEN: u64 = 10_000;

#[test]
fn deep_map_chain_does_not_overflow() {
    let mut effect = now(0u64);
    for _ in 0..CHAIN_LEN {
        effect = map(effect, |x| x + 1);
    }
    let result: Result<u64, RillError<Infallible>> = run(effect);
    assert_eq!(result, Ok(CHAIN_LEN));
}

#[test]
fn deep_flat_map_chain_does_not_overflow() {
    let mut effect = now(0u64);
    for _ in 0..CHAIN_LEN {
        effect = flat_map(effect, |x| now(x + 1));
    }
    let result: Result<u64, RillError<Infallible>> = run(effect);
    assert_eq!(result, Ok(CHAIN_LEN));
}

#[test]
fn deep_right_nested_flat_map_chain_does_not_overflow() {
    // Each continuation constructs the next level of the chain only once
    // interpreted, so the chain is `CHAIN_LEN` deep at execution time
    // without ever recursing `CHAIN_LEN` deep at construction time.
    fn build(remaining: u64) -> rill::effect::Effect<Infallible, u64> {
        if remaining == 0 {
            now(0)
        } else {
            flat_map(now(()), move |_| map(build(remaining - 1), |x| x + 1))
        }
    }

    let result: Result<u64, RillError<Infallible>> = run(build(CHAIN_LEN));
    assert_eq!(result, Ok(CHAIN_LEN));
}

#[test]
fn deep_attempt_absolve_chain_does_not_overflow() {
    fn wrap(
        effect: rill::effect::Effect<String, i64>,
    ) -> rill::effect::Effect<String, i64> {
        absolve(attempt(effect))
    }

    let mut effect = sync_throwable(|| Ok::<i64, String>(0));
    for _ in 0..CHAIN_LEN {
        effect = wrap(effect);
    }
    let result: Result<i64, RillError<String>> = run(effect);
    assert_eq!(result, Ok(0));
}

#[test]
fn deep_async_resume_chain_does_not_overflow() {
    fn async_now(n: i64) -> rill::effect::Effect<Infallible, i64> {
        async_effect(move |resume: Resume<Infallible, i64>| {
            resume.completed(n);
            None
        })
    }

    const ASYNC_CHAIN_LEN: i64 = 3_000;

    let mut effect = now(0i64);
    for _ in 0..ASYNC_CHAIN_LEN {
        effect = flat_map(effect, |x| flat_map(async_now(1), move |y| now(x + y)));
    }
    let result: Result<i64, RillError<Infallible>> = run(effect);
    assert_eq!(result, Ok(ASYNC_CHAIN_LEN));
}

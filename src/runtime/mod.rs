//! The RTS: fiber table, scheduler, and trampolined interpreter (§2, §4, §5).
//!
//! The common entry point is the free function [`run`], which lazily
//! creates and reuses one process-wide [`Runtime`] (§9 "process-wide
//! scheduler with explicit lifecycle"). Construct a [`Runtime`] directly
//! for a non-default [`RuntimeConfig`] or to control shutdown explicitly.

pub mod fiber;
pub mod handler;
pub(crate) mod interpreter;
pub mod scheduler;

pub use fiber::{Fiber, FiberId};
pub use handler::set_default_handler;
pub use scheduler::{Runtime, RuntimeConfig};

use crate::effect::Effect;
use crate::error::RillError;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

fn global() -> &'static Runtime {
    GLOBAL.get_or_init(|| Runtime::new(RuntimeConfig::default()))
}

/// Runs `effect` on the process-wide runtime, blocking the calling thread
/// until it terminates (§6 `run`).
///
/// Translates the root fiber's termination to host behavior (§7):
/// `Completed(a)` returns `Ok(a)`; a typed failure, a defect, or an
/// interruption all become `Err`.
pub fn run<E, A>(effect: Effect<E, A>) -> Result<A, RillError<E>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    global().block_on(effect)
}

/// Like [`run`], but against a freshly constructed [`Runtime`] with an
/// explicit [`RuntimeConfig`] instead of the shared process-wide one.
pub fn run_with<E, A>(config: RuntimeConfig, effect: Effect<E, A>) -> Result<A, RillError<E>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Runtime::new(config).block_on(effect)
}

//! The process-wide `defaultHandler` override point (§6, §9 "Uncaught
//! handlers are per-fiber values, not globals" -- the per-fiber override is
//! `fork0`'s handler argument; this module is the fallback every `fork`
//! without one reports through).

use crate::error::UncaughtError;
use std::sync::{Arc, Mutex, OnceLock};

type Handler = Arc<dyn Fn(&UncaughtError) + Send + Sync>;

static DEFAULT_HANDLER: OnceLock<Mutex<Handler>> = OnceLock::new();

fn cell() -> &'static Mutex<Handler> {
    DEFAULT_HANDLER.get_or_init(|| Mutex::new(Arc::new(tracing_handler)))
}

fn tracing_handler(error: &UncaughtError) {
    tracing::error!(%error, "uncaught error on a forked fiber");
}

/// Overrides the default handler for uncaught fiber errors (§6
/// `defaultHandler`). Affects every fiber forked without its own `fork0`
/// handler, including ones already running.
pub fn set_default_handler(handler: impl Fn(&UncaughtError) + Send + Sync + 'static) {
    *cell().lock().unwrap() = Arc::new(handler);
}

pub(crate) fn report(error: UncaughtError) {
    let handler = cell().lock().unwrap().clone();
    handler(&error);
}

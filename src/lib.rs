//! `rill`: a value-oriented effect system and fiber runtime.
//!
//! An [`Effect<E, A>`](effect::Effect) is a pure, lazy description of a
//! side-effecting computation; [`runtime::run`] interprets one on a
//! cooperatively-scheduled fiber, with stack-safe trampolined evaluation,
//! structured error handling with finalizers, asynchronous suspension,
//! forking/joining/racing, and interruption.
//!
//! ```
//! use rill::effect::{flat_map, now};
//! use std::convert::Infallible;
//!
//! let greeting: rill::Effect<Infallible, String> =
//!     flat_map(now("hello"), |s| now(format!("{s}, world")));
//! assert_eq!(rill::runtime::run(greeting), Ok("hello, world".to_string()));
//! ```

#[cfg(feature = "macros")]
pub use rill_macros::main;

mod node;
mod value;

pub mod effect;
pub mod error;
pub mod exit;
pub mod runtime;
pub mod sync;
mod time;

pub use effect::Effect;

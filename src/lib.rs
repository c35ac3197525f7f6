//! Operator lowering and compilation cache for tensor programs.
//!
//! Given a typed function and a target, the [`backend::CompileEngine`]
//! resolves each operator's registered strategy, picks one implementation
//! per call (by priority level, or by tuned cost when profile data exists)
//! and memoizes the lowered result per structurally distinct function.

extern crate crossbeam_utils;
extern crate thiserror;

use env_logger::Env;

pub mod arith;
pub mod backend;
pub mod dtype;
pub mod error;
pub mod ir;
pub mod op;
pub mod target;
pub mod te;
pub mod tuning;

#[cfg(test)]
mod tests;

pub use error::{LowerError, Result};

/// Install an `env_logger` honouring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
}

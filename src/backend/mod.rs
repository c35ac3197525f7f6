//! Operator lowering and the compile cache.
//!
//! [`get_shape`] canonicalizes dimensions, [`get_valid_implementations`]
//! resolves an operator's strategy, [`select_implementation`] picks one
//! implementation, [`lower_call`] ties those together for one call, and
//! [`CompileEngine`] lowers whole functions and caches the results.

use std::sync::Arc;

use lazy_static::lazy_static;

mod compile_engine;
mod jit;
mod lower_call;
mod lowering;
mod select;
mod shape;
mod strategy;

pub use compile_engine::{
    get_cache_key, CCacheKey, CacheValue, CompileEngine, EngineConfig, LowerSource,
};
pub use jit::{Build, PackedFunc, SymbolicBuild};
pub use lower_call::{lower_call, LowerContext, LoweredOutput};
pub use lowering::CachedFunc;
pub use select::{select_implementation, OpCall};
pub use shape::get_shape;
pub use strategy::get_valid_implementations;

use crate::{op::StrategyRegistry, tuning::TuningContext};

lazy_static! {
    static ref ENGINE: CompileEngine = CompileEngine::new(
        Arc::new(StrategyRegistry::new()),
        Arc::new(TuningContext::default())
    );
}

/// The process-wide compile engine, created on first use.
pub fn get() -> &'static CompileEngine {
    &ENGINE
}

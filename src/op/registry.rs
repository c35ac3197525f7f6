use std::{collections::HashMap, sync::Arc};

use crossbeam_utils::sync::ShardedLock;
use log::debug;

use super::{Attrs, Op, OpStrategy};
use crate::{
    error::{LowerError, Result},
    ir::Type,
    target::Target,
    te::Tensor,
};

/// Strategy function: builds the implementation choices for one call.
pub type FStrategy =
    Arc<dyn Fn(&Attrs, &[Tensor], &Type, &Target) -> Result<OpStrategy> + Send + Sync>;

/// Shape function: `(attrs, input shape tensors, output ranks) -> output shape tensors`.
pub type FShapeFunc = Arc<dyn Fn(&Attrs, &[Tensor], &[usize]) -> Result<Vec<Tensor>> + Send + Sync>;

/// Operator name to strategy / shape function tables.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: ShardedLock<HashMap<String, FStrategy>>,
    shape_funcs: ShardedLock<HashMap<String, FShapeFunc>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        StrategyRegistry::default()
    }

    /// Register (or replace) the strategy function of `op`.
    pub fn register_strategy<F>(&self, op: &str, strategy: F)
    where
        F: Fn(&Attrs, &[Tensor], &Type, &Target) -> Result<OpStrategy> + Send + Sync + 'static,
    {
        debug!("Registering strategy for op {}", op);
        self.strategies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(op.to_string(), Arc::new(strategy));
    }

    pub fn register_shape_func<F>(&self, op: &str, shape_func: F)
    where
        F: Fn(&Attrs, &[Tensor], &[usize]) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        debug!("Registering shape function for op {}", op);
        self.shape_funcs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(op.to_string(), Arc::new(shape_func));
    }

    pub fn strategy(&self, op: &Op) -> Result<FStrategy> {
        self.strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(op.name())
            .cloned()
            .ok_or_else(|| LowerError::UnregisteredStrategy {
                op: op.name().to_string(),
            })
    }

    pub fn shape_func(&self, op: &Op) -> Result<FShapeFunc> {
        self.shape_funcs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(op.name())
            .cloned()
            .ok_or_else(|| LowerError::UnregisteredShapeFunc {
                op: op.name().to_string(),
            })
    }

    pub fn has_strategy(&self, op: &Op) -> bool {
        self.strategies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(op.name())
    }
}

use std::{fmt, sync::Arc};

use super::Attrs;
use crate::{arith::PrimExpr, error::Result, ir::Type, te::Tensor};

/// Compute function of one implementation: `(attrs, inputs, out_type) -> outputs`.
pub type FCompute = Arc<dyn Fn(&Attrs, &[Tensor], &Type) -> Result<Vec<Tensor>> + Send + Sync>;

/// One concrete way of computing an operator.
#[derive(Clone)]
pub struct OpImplementation {
    name: String,
    plevel: i32,
    compute: FCompute,
}

impl OpImplementation {
    pub fn new<F>(name: &str, plevel: i32, compute: F) -> Self
    where
        F: Fn(&Attrs, &[Tensor], &Type) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        OpImplementation {
            name: name.to_string(),
            plevel,
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plevel(&self) -> i32 {
        self.plevel
    }

    pub fn compute(&self, attrs: &Attrs, inputs: &[Tensor], out_type: &Type) -> Result<Vec<Tensor>> {
        (self.compute)(attrs, inputs, out_type)
    }
}

impl fmt::Debug for OpImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpImplementation")
            .field("name", &self.name)
            .field("plevel", &self.plevel)
            .finish()
    }
}

/// Conjunction of boolean clauses over shape and attribute expressions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecializedCondition {
    pub clauses: Vec<PrimExpr>,
}

impl SpecializedCondition {
    pub fn new(clauses: Vec<PrimExpr>) -> Self {
        SpecializedCondition { clauses }
    }
}

#[derive(Clone, Debug)]
pub struct OpSpecialization {
    pub condition: Option<SpecializedCondition>,
    pub implementations: Vec<OpImplementation>,
}

/// Implementation choices for one operator instance, grouped by guard.
#[derive(Clone, Debug, Default)]
pub struct OpStrategy {
    pub specializations: Vec<OpSpecialization>,
}

impl OpStrategy {
    pub fn new() -> Self {
        OpStrategy::default()
    }

    pub fn add_implementation<F>(&mut self, compute: F, name: &str, plevel: i32)
    where
        F: Fn(&Attrs, &[Tensor], &Type) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        self.push(None, OpImplementation::new(name, plevel, compute));
    }

    /// Add an implementation that is only valid while `condition` holds.
    pub fn add_specialized_implementation<F>(
        &mut self,
        condition: SpecializedCondition,
        compute: F,
        name: &str,
        plevel: i32,
    ) where
        F: Fn(&Attrs, &[Tensor], &Type) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        self.push(Some(condition), OpImplementation::new(name, plevel, compute));
    }

    fn push(&mut self, condition: Option<SpecializedCondition>, implementation: OpImplementation) {
        match self
            .specializations
            .iter_mut()
            .find(|spec| spec.condition == condition)
        {
            Some(spec) => spec.implementations.push(implementation),
            None => self.specializations.push(OpSpecialization {
                condition,
                implementations: vec![implementation],
            }),
        }
    }
}

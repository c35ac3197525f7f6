use std::{collections::HashMap, fmt, sync::Arc};

use super::lowering::CachedFunc;
use crate::{
    arith::{Analyzer, PrimExpr, SymVar},
    error::{LowerError, Result},
    te::{self, Tensor},
};

type EntryPoint = Arc<dyn Fn(&[Tensor]) -> Result<Vec<Tensor>> + Send + Sync>;

/// Directly callable entry point of a lowered function.
#[derive(Clone)]
pub struct PackedFunc {
    name: String,
    entry: EntryPoint,
}

impl PackedFunc {
    pub fn new<F>(name: &str, entry: F) -> Self
    where
        F: Fn(&[Tensor]) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        PackedFunc {
            name: name.to_string(),
            entry: Arc::new(entry),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Tensor]) -> Result<Vec<Tensor>> {
        (self.entry)(args)
    }

    /// True if both handles share one built entry point.
    pub fn same_entry(&self, other: &PackedFunc) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedFunc").field("name", &self.name).finish()
    }
}

/// Turns a lowered function into a callable entry point.
pub trait Build: Send + Sync {
    fn build(&self, func: &CachedFunc) -> Result<PackedFunc>;
}

/// Builder that produces no device code.
///
/// The entry point checks its arguments against the lowered inputs, binds
/// the symbolic dimensions and returns the output descriptors with those
/// dimensions resolved.
#[derive(Default)]
pub struct SymbolicBuild;

impl Build for SymbolicBuild {
    fn build(&self, func: &CachedFunc) -> Result<PackedFunc> {
        let inputs = func.inputs.clone();
        let outputs = func.outputs.clone();
        Ok(PackedFunc::new(&func.func_name, move |args| {
            let analyzer = bind_arguments(&inputs, args)?;
            Ok(outputs
                .iter()
                .map(|output| {
                    let shape = output
                        .shape()
                        .iter()
                        .map(|dim| analyzer.canonical_simplify(dim))
                        .collect();
                    te::placeholder(shape, output.dtype(), output.name())
                })
                .collect())
        }))
    }
}

fn bind_arguments(inputs: &[Tensor], args: &[Tensor]) -> Result<Analyzer> {
    if inputs.len() != args.len() {
        return Err(LowerError::ArgumentMismatch(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            args.len()
        )));
    }
    let mut bound: HashMap<SymVar, i64> = HashMap::new();
    for (idx, (input, arg)) in inputs.iter().zip(args).enumerate() {
        if input.dtype() != arg.dtype() {
            return Err(LowerError::ArgumentMismatch(format!(
                "argument {} has dtype {}, expected {}",
                idx,
                arg.dtype(),
                input.dtype()
            )));
        }
        let dims = arg.concrete_shape().ok_or_else(|| {
            LowerError::ArgumentMismatch(format!("argument {} has a symbolic shape", idx))
        })?;
        if dims.len() != input.ndim() {
            return Err(LowerError::ArgumentMismatch(format!(
                "argument {} has rank {}, expected {}",
                idx,
                dims.len(),
                input.ndim()
            )));
        }
        for (axis, (expected, actual)) in input.shape().iter().zip(dims).enumerate() {
            let consistent = match expected {
                PrimExpr::IntImm { value, .. } => *value == actual,
                PrimExpr::Var(var) => *bound.entry(var.clone()).or_insert(actual) == actual,
                _ => true,
            };
            if !consistent {
                return Err(LowerError::ArgumentMismatch(format!(
                    "argument {} axis {} is {}, expected {}",
                    idx, axis, actual, expected
                )));
            }
        }
    }
    let mut analyzer = Analyzer::new();
    for (var, value) in &bound {
        analyzer.bind(var, *value);
    }
    Ok(analyzer)
}

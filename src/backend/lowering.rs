//! Whole-function lowering.
//!
//! Parameters become placeholders, every primitive call is lowered in
//! post-order and the function body's tensors become the outputs. The same
//! walk drives shape-function lowering, where each value is replaced by a
//! 1-d `int64` tensor holding its shape.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
};

use itertools::Itertools;
use log::debug;
use uuid::Uuid;

use super::{
    lower_call::{lower_call, LowerContext, LoweredOutput},
    shape::get_shape,
};
use crate::{
    arith::PrimExpr,
    dtype::DataType,
    error::{LowerError, Result},
    ir::{Call, Expr, ExprKind, Function, Type},
    op::StrategyRegistry,
    target::Target,
    te::{self, Tensor},
};

/// Artifact of lowering a whole function.
#[derive(Clone, Debug)]
pub struct CachedFunc {
    pub target: Target,
    pub func_name: String,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    /// Per-call results in evaluation order; empty for shape functions.
    pub lowered: Vec<LoweredOutput>,
}

/// What the walk produces for each call.
#[derive(Clone, Copy)]
pub(crate) enum LowerMode<'a> {
    Value(LowerContext<'a>),
    Shape(&'a StrategyRegistry),
}

/// Result of a walk before the engine assigns the final name.
pub(crate) struct LoweredFunction {
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    pub lowered: Vec<LoweredOutput>,
    pub op_names: Vec<String>,
}

struct FunctionLowerer<'a> {
    target: &'a Target,
    mode: LowerMode<'a>,
    memo: HashMap<usize, Vec<Tensor>>,
    bindings: HashMap<Uuid, Vec<Tensor>>,
    lowered: Vec<LoweredOutput>,
    op_names: Vec<String>,
}

pub(crate) fn lower_function(
    func: &Function,
    target: &Target,
    mode: LowerMode,
) -> Result<LoweredFunction> {
    let mut lowerer = FunctionLowerer {
        target,
        mode,
        memo: HashMap::new(),
        bindings: HashMap::new(),
        lowered: vec![],
        op_names: vec![],
    };

    let mut inputs = Vec::new();
    for param in &func.params {
        let tensors = param
            .ty()
            .flatten_tensors()
            .into_iter()
            .map(|tensor| lowerer.param_placeholder(param.name_hint(), &tensor.shape, tensor.dtype))
            .collect::<Result<Vec<_>>>()?;
        inputs.extend(tensors.iter().cloned());
        lowerer.bindings.insert(param.id(), tensors);
    }

    let outputs = lowerer.visit(&func.body)?;
    Ok(LoweredFunction {
        inputs,
        outputs,
        lowered: lowerer.lowered,
        op_names: lowerer.op_names,
    })
}

impl<'a> FunctionLowerer<'a> {
    fn param_placeholder(&self, name: &str, shape: &[PrimExpr], dtype: DataType) -> Result<Tensor> {
        match self.mode {
            LowerMode::Value(_) => Ok(te::placeholder(get_shape(shape)?, dtype, name)),
            LowerMode::Shape(_) => Ok(shape_tensor_placeholder(name, shape.len())),
        }
    }

    fn visit(&mut self, expr: &Expr) -> Result<Vec<Tensor>> {
        if let Some(tensors) = self.memo.get(&expr.node_ptr()) {
            return Ok(tensors.clone());
        }
        let tensors = match expr.kind() {
            ExprKind::Var(var) => self.bindings.get(&var.id()).cloned().ok_or_else(|| {
                LowerError::UnsupportedExpr(format!("free variable %{}", var.name_hint()))
            })?,
            ExprKind::Constant(constant) => match self.mode {
                LowerMode::Value(_) => vec![te::placeholder(
                    get_shape(&constant.ttype.shape)?,
                    constant.ttype.dtype,
                    "compile_engine_const",
                )],
                LowerMode::Shape(_) => vec![shape_of_constant(&constant.ttype.shape)],
            },
            ExprKind::Call(call) => self.visit_call(call)?,
            ExprKind::Tuple(fields) => {
                let mut tensors = Vec::new();
                for field in fields {
                    tensors.extend(self.visit(field)?);
                }
                tensors
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let tensors = self.visit(tuple)?;
                project(tuple.checked_type(), &tensors, *index)?
            }
            ExprKind::Let { var, value, body } => {
                let bound = self.visit(value)?;
                self.bindings.insert(var.id(), bound);
                self.visit(body)?
            }
        };
        self.memo.insert(expr.node_ptr(), tensors.clone());
        Ok(tensors)
    }

    fn visit_call(&mut self, call: &Call) -> Result<Vec<Tensor>> {
        let mut inputs = Vec::new();
        for arg in &call.args {
            inputs.extend(self.visit(arg)?);
        }
        self.op_names.push(call.op.name().to_string());

        match self.mode {
            LowerMode::Value(ctx) => {
                let lowered = lower_call(call, &inputs, self.target, &ctx)?;
                let outputs = lowered.outputs().to_vec();
                self.lowered.push(lowered);
                Ok(outputs)
            }
            LowerMode::Shape(registry) => {
                let shape_func = registry.shape_func(&call.op)?;
                let out_ranks: Vec<usize> = call
                    .checked_type
                    .flatten_tensors()
                    .iter()
                    .map(|tensor| tensor.shape.len())
                    .collect();
                let outputs = shape_func(&call.attrs, inputs.as_slice(), out_ranks.as_slice())?;
                if outputs.len() != out_ranks.len() {
                    return Err(LowerError::compute(
                        call.op.name(),
                        format!(
                            "shape function returned {} tensors for {} outputs",
                            outputs.len(),
                            out_ranks.len()
                        ),
                    ));
                }
                Ok(outputs)
            }
        }
    }
}

fn shape_tensor_placeholder(name: &str, ndim: usize) -> Tensor {
    te::placeholder(
        vec![PrimExpr::int_typed(ndim as i64, DataType::int32())],
        DataType::int64(),
        name,
    )
}

fn shape_of_constant(shape: &[PrimExpr]) -> Tensor {
    te::compute(
        vec![PrimExpr::int_typed(shape.len() as i64, DataType::int32())],
        DataType::int64(),
        "shape_const",
        "shape_const",
        &[],
    )
}

/// Select the tensors of field `index` out of a flattened tuple value.
fn project(tuple_type: &Type, tensors: &[Tensor], index: usize) -> Result<Vec<Tensor>> {
    let fields = match tuple_type {
        Type::Tuple(fields) => fields,
        other => {
            return Err(LowerError::UnsupportedExpr(format!(
                "projection out of non-tuple type {}",
                other
            )))
        }
    };
    if index >= fields.len() {
        return Err(LowerError::UnsupportedExpr(format!(
            "tuple index {} out of range for {} fields",
            index,
            fields.len()
        )));
    }
    let start: usize = fields[..index]
        .iter()
        .map(|field| field.flatten_tensors().len())
        .sum();
    let len = fields[index].flatten_tensors().len();
    tensors
        .get(start..start + len)
        .map(<[Tensor]>::to_vec)
        .ok_or_else(|| {
            LowerError::UnsupportedExpr(format!(
                "tuple value has {} tensors, field {} needs {}..{}",
                tensors.len(),
                index,
                start,
                start + len
            ))
        })
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Readable function name built from the lowered operators.
///
/// Names over `max_len` are cut and tagged with a hash of the full name.
pub(crate) fn readable_name(op_names: &[String], max_len: usize) -> String {
    let name = if op_names.is_empty() {
        "fused".to_string()
    } else {
        format!("fused_{}", op_names.iter().map(|op| sanitize(op)).join("_"))
    };
    if name.len() <= max_len {
        return name;
    }
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    let truncated = format!("{}__{:016x}", &name[..max_len], hasher.finish());
    debug!("Truncated function name {} to {}", name, truncated);
    truncated
}

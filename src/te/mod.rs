//! Tensor-expression handles produced by compute functions.
//!
//! A [`Tensor`] only describes a value: its shape, element type and the
//! operation that produces it. Nothing here allocates device memory.

use std::{collections::HashSet, fmt, sync::Arc};

use uuid::Uuid;

use crate::{arith::PrimExpr, dtype::DataType};

/// Argument of a [`Workload`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadArg {
    Tensor { shape: Vec<i64>, dtype: DataType },
    Int(i64),
    Str(String),
}

/// Identifier of a tunable computation: template name plus its concrete arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Workload {
    pub name: String,
    pub args: Vec<WorkloadArg>,
}

impl Workload {
    pub fn new(name: &str, args: Vec<WorkloadArg>) -> Self {
        Workload {
            name: name.to_string(),
            args,
        }
    }

    /// Workload whose arguments are the given tensors.
    ///
    /// Returns `None` when any dimension is symbolic, since tuning records
    /// only exist for concrete shapes.
    pub fn from_tensors(name: &str, tensors: &[Tensor]) -> Option<Self> {
        let args = tensors
            .iter()
            .map(|tensor| {
                tensor.concrete_shape().map(|shape| WorkloadArg::Tensor {
                    shape,
                    dtype: tensor.dtype(),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Workload::new(name, args))
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match arg {
                WorkloadArg::Tensor { shape, dtype } => write!(f, "{:?}:{}", shape, dtype)?,
                WorkloadArg::Int(value) => write!(f, "{}", value)?,
                WorkloadArg::Str(value) => write!(f, "{:?}", value)?,
            }
        }
        write!(f, ")")
    }
}

#[derive(Clone, Debug)]
pub enum Operation {
    Placeholder,
    Compute {
        tag: String,
        inputs: Vec<Tensor>,
        workload: Option<Workload>,
    },
}

#[derive(Debug)]
struct TensorNode {
    id: Uuid,
    name: String,
    shape: Vec<PrimExpr>,
    dtype: DataType,
    op: Operation,
}

/// Shared handle to a tensor description; clones refer to the same tensor.
#[derive(Clone, Debug)]
pub struct Tensor {
    node: Arc<TensorNode>,
}

impl Tensor {
    fn from_parts(name: &str, shape: Vec<PrimExpr>, dtype: DataType, op: Operation) -> Self {
        Tensor {
            node: Arc::new(TensorNode {
                id: Uuid::new_v4(),
                name: name.to_string(),
                shape,
                dtype,
                op,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn shape(&self) -> &[PrimExpr] {
        &self.node.shape
    }

    pub fn ndim(&self) -> usize {
        self.node.shape.len()
    }

    pub fn dtype(&self) -> DataType {
        self.node.dtype
    }

    pub fn op(&self) -> &Operation {
        &self.node.op
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.node.op, Operation::Placeholder)
    }

    /// Shape as plain integers, if every dimension is concrete.
    pub fn concrete_shape(&self) -> Option<Vec<i64>> {
        self.node.shape.iter().map(PrimExpr::as_int).collect()
    }

    /// Copy of this compute tensor annotated with a tuning workload.
    ///
    /// Placeholders carry no workload and are returned unchanged.
    pub fn with_workload(&self, workload: Workload) -> Tensor {
        match &self.node.op {
            Operation::Placeholder => self.clone(),
            Operation::Compute { tag, inputs, .. } => Tensor::from_parts(
                &self.node.name,
                self.node.shape.clone(),
                self.node.dtype,
                Operation::Compute {
                    tag: tag.clone(),
                    inputs: inputs.clone(),
                    workload: Some(workload),
                },
            ),
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for Tensor {}

impl std::hash::Hash for Tensor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node.id.hash(state)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(name={}, shape=[", self.name())?;
        for (idx, dim) in self.shape().iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "], dtype={})", self.dtype())
    }
}

pub fn placeholder(shape: Vec<PrimExpr>, dtype: DataType, name: &str) -> Tensor {
    Tensor::from_parts(name, shape, dtype, Operation::Placeholder)
}

pub fn compute(
    shape: Vec<PrimExpr>,
    dtype: DataType,
    name: &str,
    tag: &str,
    inputs: &[Tensor],
) -> Tensor {
    Tensor::from_parts(
        name,
        shape,
        dtype,
        Operation::Compute {
            tag: tag.to_string(),
            inputs: inputs.to_vec(),
            workload: None,
        },
    )
}

/// Find the tuning workload behind a set of outputs.
///
/// Walks the producing operations breadth-first from the outputs and returns
/// the first workload annotation encountered.
pub fn get_workload(outputs: &[Tensor]) -> Option<Workload> {
    let mut visited = HashSet::new();
    let mut frontier: Vec<Tensor> = outputs.to_vec();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for tensor in frontier {
            if !visited.insert(tensor.node.id) {
                continue;
            }
            if let Operation::Compute {
                inputs, workload, ..
            } = tensor.op()
            {
                if let Some(workload) = workload {
                    return Some(workload.clone());
                }
                next.extend(inputs.iter().cloned());
            }
        }
        frontier = next;
    }
    None
}

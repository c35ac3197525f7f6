use std::fmt;

use itertools::Itertools;

use crate::{arith::PrimExpr, dtype::DataType};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub shape: Vec<PrimExpr>,
    pub dtype: DataType,
}

impl TensorType {
    pub fn new(shape: Vec<PrimExpr>, dtype: DataType) -> Self {
        TensorType { shape, dtype }
    }

    pub fn has_any(&self) -> bool {
        self.shape.iter().any(PrimExpr::has_any)
    }
}

/// Checked type of a relay expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
    /// Non-tensor value such as a storage or reference handle.
    Handle(String),
}

impl Type {
    pub fn tensor(shape: Vec<PrimExpr>, dtype: DataType) -> Self {
        Type::Tensor(TensorType::new(shape, dtype))
    }

    /// Tensor type with concrete dimensions.
    pub fn static_tensor(dims: &[i64], dtype: DataType) -> Self {
        Type::tensor(dims.iter().map(|dim| PrimExpr::int(*dim)).collect(), dtype)
    }

    /// True if any dimension anywhere in the type is `Any`.
    pub fn has_any(&self) -> bool {
        match self {
            Type::Tensor(tensor) => tensor.has_any(),
            Type::Tuple(fields) => fields.iter().any(Type::has_any),
            Type::Handle(_) => false,
        }
    }

    /// Tensor leaves in depth-first order.
    pub fn flatten_tensors(&self) -> Vec<&TensorType> {
        match self {
            Type::Tensor(tensor) => vec![tensor],
            Type::Tuple(fields) => fields.iter().flat_map(Type::flatten_tensors).collect(),
            Type::Handle(_) => vec![],
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor[({}), {}]",
            self.shape.iter().join(", "),
            self.dtype
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tensor) => write!(f, "{}", tensor),
            Type::Tuple(fields) => write!(f, "({})", fields.iter().join(", ")),
            Type::Handle(name) => write!(f, "{}", name),
        }
    }
}

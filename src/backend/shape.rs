use num_traits::ToPrimitive;

use crate::{
    arith::PrimExpr,
    dtype::DataType,
    error::{LowerError, Result},
    ir::{TensorType, Type},
};

/// Canonicalize dimensions to `int32`.
///
/// Concrete dimensions are retyped (and must fit), every `Any` becomes a fresh
/// `any_dim` variable, anything else is kept as is.
pub fn get_shape(shape: &[PrimExpr]) -> Result<Vec<PrimExpr>> {
    shape
        .iter()
        .map(|dim| match dim {
            PrimExpr::IntImm { value, .. } => value
                .to_i32()
                .map(|value| PrimExpr::int_typed(value as i64, DataType::int32()))
                .ok_or(LowerError::ShapeOverflow { value: *value }),
            PrimExpr::Any => Ok(PrimExpr::var("any_dim", DataType::int32())),
            other => Ok(other.clone()),
        })
        .collect()
}

pub(crate) fn normalize_tensor_type(tensor: &TensorType) -> Result<TensorType> {
    Ok(TensorType::new(get_shape(&tensor.shape)?, tensor.dtype))
}

/// Normalize a checked return type: a tensor, or a tuple of tensors whose
/// non-tensor fields pass through untouched.
pub(crate) fn normalize_type(ty: &Type) -> Result<Type> {
    match ty {
        Type::Tensor(tensor) => Ok(Type::Tensor(normalize_tensor_type(tensor)?)),
        Type::Tuple(fields) => fields
            .iter()
            .map(|field| match field {
                Type::Tensor(tensor) => Ok(Type::Tensor(normalize_tensor_type(tensor)?)),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>>>()
            .map(Type::Tuple),
        Type::Handle(_) => Ok(ty.clone()),
    }
}

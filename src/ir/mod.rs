//! Typed computation-graph representation consumed by the lowering core.

pub(crate) mod expr;
mod printer;
pub(crate) mod structural;
pub(crate) mod ty;

pub use expr::{Call, Constant, Expr, ExprKind, Function, Var};
pub use structural::StructuralKey;
pub use ty::{TensorType, Type};

use std::{fmt, sync::Arc};

use uuid::Uuid;

use crate::dtype::DataType;

mod simplify;

pub use simplify::Analyzer;

/// Symbolic scalar variable.
///
/// Identity is the uuid, never the name: two variables created with the same
/// name hint are distinct.
#[derive(Clone, Debug)]
pub struct SymVar {
    pub(crate) id: Uuid,
    name: Arc<str>,
    dtype: DataType,
}

impl SymVar {
    pub fn new(name: &str, dtype: DataType) -> Self {
        SymVar {
            id: Uuid::new_v4(),
            name: Arc::from(name),
            dtype,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }
}

impl PartialEq for SymVar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SymVar {}

impl std::hash::Hash for SymVar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    FloorMod,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Scalar integer expression used for tensor dimensions and specialization guards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimExpr {
    IntImm {
        value: i64,
        dtype: DataType,
    },
    Var(SymVar),
    /// A dimension whose extent is only known at runtime.
    Any,
    Binary {
        op: BinaryOp,
        lhs: Box<PrimExpr>,
        rhs: Box<PrimExpr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<PrimExpr>,
        rhs: Box<PrimExpr>,
    },
    And(Box<PrimExpr>, Box<PrimExpr>),
    Or(Box<PrimExpr>, Box<PrimExpr>),
    Not(Box<PrimExpr>),
}

impl PrimExpr {
    /// Integer immediate; shapes coming out of type inference default to `int64`.
    pub fn int(value: i64) -> Self {
        PrimExpr::IntImm {
            value,
            dtype: DataType::int64(),
        }
    }

    pub fn int_typed(value: i64, dtype: DataType) -> Self {
        PrimExpr::IntImm { value, dtype }
    }

    pub fn boolean(value: bool) -> Self {
        PrimExpr::IntImm {
            value: value as i64,
            dtype: DataType::Bool,
        }
    }

    pub fn var(name: &str, dtype: DataType) -> Self {
        PrimExpr::Var(SymVar::new(name, dtype))
    }

    pub fn any() -> Self {
        PrimExpr::Any
    }

    pub fn dtype(&self) -> DataType {
        match self {
            PrimExpr::IntImm { dtype, .. } => *dtype,
            PrimExpr::Var(var) => var.dtype(),
            PrimExpr::Any => DataType::int32(),
            PrimExpr::Binary { lhs, .. } => lhs.dtype(),
            PrimExpr::Compare { .. } | PrimExpr::And(..) | PrimExpr::Or(..) | PrimExpr::Not(_) => {
                DataType::Bool
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PrimExpr::IntImm { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// True if `Any` appears anywhere in the expression.
    pub fn has_any(&self) -> bool {
        match self {
            PrimExpr::Any => true,
            PrimExpr::IntImm { .. } | PrimExpr::Var(_) => false,
            PrimExpr::Binary { lhs, rhs, .. } | PrimExpr::Compare { lhs, rhs, .. } => {
                lhs.has_any() || rhs.has_any()
            }
            PrimExpr::And(lhs, rhs) | PrimExpr::Or(lhs, rhs) => lhs.has_any() || rhs.has_any(),
            PrimExpr::Not(inner) => inner.has_any(),
        }
    }

    fn binary(op: BinaryOp, lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn compare(op: CmpOp, lhs: PrimExpr, rhs: PrimExpr) -> Self {
        PrimExpr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn floordiv(self, rhs: PrimExpr) -> Self {
        Self::binary(BinaryOp::FloorDiv, self, rhs)
    }

    pub fn floormod(self, rhs: PrimExpr) -> Self {
        Self::binary(BinaryOp::FloorMod, self, rhs)
    }

    pub fn min(self, rhs: PrimExpr) -> Self {
        Self::binary(BinaryOp::Min, self, rhs)
    }

    pub fn max(self, rhs: PrimExpr) -> Self {
        Self::binary(BinaryOp::Max, self, rhs)
    }

    pub fn equal(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Eq, self, rhs)
    }

    pub fn not_equal(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Ne, self, rhs)
    }

    pub fn less_than(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Lt, self, rhs)
    }

    pub fn less_equal(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Le, self, rhs)
    }

    pub fn greater_than(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Gt, self, rhs)
    }

    pub fn greater_equal(self, rhs: PrimExpr) -> Self {
        Self::compare(CmpOp::Ge, self, rhs)
    }

    pub fn and(self, rhs: PrimExpr) -> Self {
        PrimExpr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: PrimExpr) -> Self {
        PrimExpr::Or(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Add for PrimExpr {
    type Output = PrimExpr;

    fn add(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::binary(BinaryOp::Add, self, rhs)
    }
}

impl std::ops::Sub for PrimExpr {
    type Output = PrimExpr;

    fn sub(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl std::ops::Mul for PrimExpr {
    type Output = PrimExpr;

    fn mul(self, rhs: PrimExpr) -> PrimExpr {
        PrimExpr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl std::ops::Not for PrimExpr {
    type Output = PrimExpr;

    fn not(self) -> PrimExpr {
        PrimExpr::Not(Box::new(self))
    }
}

impl From<i64> for PrimExpr {
    fn from(value: i64) -> Self {
        PrimExpr::int(value)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::FloorMod => "floormod",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        };
        write!(f, "{}", symbol)
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", symbol)
    }
}

impl fmt::Display for PrimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimExpr::IntImm {
                value,
                dtype: DataType::Bool,
            } => write!(f, "{}", *value != 0),
            PrimExpr::IntImm {
                value,
                dtype: DataType::Int(64),
            } => write!(f, "{}i64", value),
            PrimExpr::IntImm { value, .. } => write!(f, "{}", value),
            PrimExpr::Var(var) => write!(f, "{}", var.name()),
            PrimExpr::Any => write!(f, "?"),
            PrimExpr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                    write!(f, "({} {} {})", lhs, op, rhs)
                }
                _ => write!(f, "{}({}, {})", op, lhs, rhs),
            },
            PrimExpr::Compare { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            PrimExpr::And(lhs, rhs) => write!(f, "({} && {})", lhs, rhs),
            PrimExpr::Or(lhs, rhs) => write!(f, "({} || {})", lhs, rhs),
            PrimExpr::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

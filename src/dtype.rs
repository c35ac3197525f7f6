use std::fmt;

/// Primitive element type of a tensor or scalar expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Int(u8),
    UInt(u8),
    Float(u8),
    Bool,
}

impl DataType {
    pub const fn int32() -> Self {
        DataType::Int(32)
    }

    pub const fn int64() -> Self {
        DataType::Int(64)
    }

    pub const fn float32() -> Self {
        DataType::Float(32)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, DataType::Int(_) | DataType::UInt(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int(bits) => write!(f, "int{}", bits),
            DataType::UInt(bits) => write!(f, "uint{}", bits),
            DataType::Float(bits) => write!(f, "float{}", bits),
            DataType::Bool => write!(f, "bool"),
        }
    }
}

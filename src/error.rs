use thiserror::Error;

#[derive(Error, Debug)]
pub enum LowerError {
    #[error("{op} doesn't have a strategy registered")]
    UnregisteredStrategy { op: String },
    #[error("{op} doesn't have a shape function registered")]
    UnregisteredShapeFunc { op: String },
    #[error("no valid implementation for op {op}")]
    NoImplementation { op: String },
    #[error("dimension {value} does not fit in int32")]
    ShapeOverflow { value: i64 },
    #[error("invalid cache key: {0}")]
    InvalidKey(String),
    #[error("implementation {implementation} failed: {reason}")]
    ComputeFailed {
        implementation: String,
        reason: String,
    },
    #[error("unsupported expression: {0}")]
    UnsupportedExpr(String),
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
    #[error(
        "{cause}\nError during compile func\n--------------------------\n{func_text}--------------------------"
    )]
    LoweringFailure {
        func_text: String,
        #[source]
        cause: Box<LowerError>,
    },
}

impl LowerError {
    pub fn compute(implementation: &str, reason: impl Into<String>) -> Self {
        LowerError::ComputeFailed {
            implementation: implementation.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LowerError>;

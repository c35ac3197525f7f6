use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;

pub(crate) mod registry;
pub(crate) mod strategy;

pub use registry::{FShapeFunc, FStrategy, StrategyRegistry};
pub use strategy::{FCompute, OpImplementation, OpSpecialization, OpStrategy, SpecializedCondition};

/// Primitive operator identity, e.g. `nn.dense`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Op {
    name: Arc<str>,
}

impl Op {
    pub fn get(name: &str) -> Self {
        Op {
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Int(a), AttrValue::Int(b)) => a == b,
            // Bitwise so that equality agrees with `Hash`.
            (AttrValue::Float(a), AttrValue::Float(b)) => a.to_bits() == b.to_bits(),
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a == b,
            (AttrValue::Str(a), AttrValue::Str(b)) => a == b,
            (AttrValue::Ints(a), AttrValue::Ints(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttrValue {}

impl std::hash::Hash for AttrValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttrValue::Int(value) => value.hash(state),
            AttrValue::Float(value) => value.to_bits().hash(state),
            AttrValue::Bool(value) => value.hash(state),
            AttrValue::Str(value) => value.hash(state),
            AttrValue::Ints(values) => values.hash(state),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(value) => write!(f, "{}", value),
            AttrValue::Float(value) => write!(f, "{:?}f", value),
            AttrValue::Bool(value) => write!(f, "{}", value),
            AttrValue::Str(value) => write!(f, "{:?}", value),
            AttrValue::Ints(values) => write!(f, "[{}]", values.iter().join(", ")),
        }
    }
}

/// Operator attributes. Read-only to the lowering core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Attrs {
    fields: BTreeMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Attrs::default()
    }

    pub fn with(mut self, key: &str, value: AttrValue) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.fields.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(AttrValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.fields.iter()
    }
}

impl fmt::Display for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.fields
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .join(", ")
        )
    }
}

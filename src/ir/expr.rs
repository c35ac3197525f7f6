use std::sync::Arc;

use uuid::Uuid;

use super::ty::{TensorType, Type};
use crate::op::{Attrs, Op};

#[derive(Debug)]
struct VarNode {
    id: Uuid,
    name_hint: String,
    ty: Type,
}

/// Relay variable. Identity is fixed at creation; the name is only a hint.
#[derive(Clone, Debug)]
pub struct Var {
    node: Arc<VarNode>,
}

impl Var {
    pub fn new(name_hint: &str, ty: Type) -> Self {
        Var {
            node: Arc::new(VarNode {
                id: Uuid::new_v4(),
                name_hint: name_hint.to_string(),
                ty,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.node.id
    }

    pub fn name_hint(&self) -> &str {
        &self.node.name_hint
    }

    pub fn ty(&self) -> &Type {
        &self.node.ty
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for Var {}

impl std::hash::Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node.id.hash(state)
    }
}

#[derive(Clone, Debug)]
pub struct Constant {
    pub ttype: TensorType,
    pub data: Arc<[u8]>,
}

/// Call of a primitive operator with its checked return type.
#[derive(Clone, Debug)]
pub struct Call {
    pub op: Op,
    pub attrs: Attrs,
    pub args: Vec<Expr>,
    pub checked_type: Type,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Var(Var),
    Constant(Constant),
    Call(Call),
    Tuple(Vec<Expr>),
    TupleGetItem { tuple: Expr, index: usize },
    Let { var: Var, value: Expr, body: Expr },
}

#[derive(Debug)]
struct ExprNode {
    kind: ExprKind,
    checked_type: Type,
}

/// Shared, immutable expression node. Clones alias the same node, which is
/// how a graph expresses reuse of an intermediate value.
#[derive(Clone, Debug)]
pub struct Expr {
    node: Arc<ExprNode>,
}

impl Expr {
    fn from_kind(kind: ExprKind, checked_type: Type) -> Self {
        Expr {
            node: Arc::new(ExprNode { kind, checked_type }),
        }
    }

    pub fn var(var: &Var) -> Self {
        let ty = var.ty().clone();
        Expr::from_kind(ExprKind::Var(var.clone()), ty)
    }

    pub fn constant(ttype: TensorType, data: Vec<u8>) -> Self {
        let ty = Type::Tensor(ttype.clone());
        Expr::from_kind(
            ExprKind::Constant(Constant {
                ttype,
                data: Arc::from(data),
            }),
            ty,
        )
    }

    pub fn call(op: Op, args: Vec<Expr>, attrs: Attrs, checked_type: Type) -> Self {
        Expr::from_kind(
            ExprKind::Call(Call {
                op,
                attrs,
                args,
                checked_type: checked_type.clone(),
            }),
            checked_type,
        )
    }

    pub fn tuple(fields: Vec<Expr>) -> Self {
        let ty = Type::Tuple(fields.iter().map(|field| field.checked_type().clone()).collect());
        Expr::from_kind(ExprKind::Tuple(fields), ty)
    }

    /// Projection out of a tuple-typed expression.
    ///
    /// An out-of-range index is kept as written and rejected at lowering time.
    pub fn tuple_get_item(tuple: Expr, index: usize) -> Self {
        let ty = match tuple.checked_type() {
            Type::Tuple(fields) if index < fields.len() => fields[index].clone(),
            _ => Type::Tuple(vec![]),
        };
        Expr::from_kind(ExprKind::TupleGetItem { tuple, index }, ty)
    }

    pub fn let_in(var: &Var, value: Expr, body: Expr) -> Self {
        let ty = body.checked_type().clone();
        Expr::from_kind(
            ExprKind::Let {
                var: var.clone(),
                value,
                body,
            },
            ty,
        )
    }

    pub fn kind(&self) -> &ExprKind {
        &self.node.kind
    }

    pub fn checked_type(&self) -> &Type {
        &self.node.checked_type
    }

    /// Address of the shared node, used to memoize per-node work.
    pub(crate) fn node_ptr(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }
}

/// A relay function: parameters, body and the body's type.
#[derive(Clone, Debug)]
pub struct Function {
    pub params: Vec<Var>,
    pub body: Expr,
    pub ret_type: Type,
}

impl Function {
    pub fn new(params: Vec<Var>, body: Expr) -> Self {
        let ret_type = body.checked_type().clone();
        Function {
            params,
            body,
            ret_type,
        }
    }
}

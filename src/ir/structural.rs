use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};

use uuid::Uuid;

use super::{
    expr::{Expr, ExprKind, Function},
    ty::{TensorType, Type},
};
use crate::op::{Attrs, Op};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Token {
    Function(usize),
    Param(Type),
    Ret(Type),
    Bound(usize),
    Free(Uuid),
    Constant(TensorType, Arc<[u8]>),
    Call {
        op: Op,
        attrs: Attrs,
        arity: usize,
        ty: Type,
    },
    Tuple(usize),
    GetItem(usize),
    Let(Type),
    /// Reference to the n-th node already encoded.
    Shared(usize),
}

/// Alpha-equivalence fingerprint of a function.
///
/// Bound variables are numbered in binding order, so two functions that only
/// differ in how their parameters and let-binders are named compare equal.
/// Free variables keep their identity. Reuse of an intermediate node is part
/// of the structure.
#[derive(Clone, Debug)]
pub struct StructuralKey {
    tokens: Arc<[Token]>,
    hash: u64,
}

impl StructuralKey {
    pub fn of(func: &Function) -> Self {
        let mut encoder = Encoder::default();
        encoder.tokens.push(Token::Function(func.params.len()));
        for param in &func.params {
            encoder.bind(param.id());
            encoder.tokens.push(Token::Param(param.ty().clone()));
        }
        encoder.encode(&func.body);
        encoder.tokens.push(Token::Ret(func.ret_type.clone()));

        let mut hasher = DefaultHasher::new();
        encoder.tokens.hash(&mut hasher);
        StructuralKey {
            tokens: Arc::from(encoder.tokens),
            hash: hasher.finish(),
        }
    }

    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for StructuralKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.tokens == other.tokens
    }
}

impl Eq for StructuralKey {}

impl Hash for StructuralKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash)
    }
}

#[derive(Default)]
struct Encoder {
    tokens: Vec<Token>,
    bound: HashMap<Uuid, usize>,
    visited: HashMap<usize, usize>,
}

impl Encoder {
    fn bind(&mut self, id: Uuid) {
        let index = self.bound.len();
        self.bound.insert(id, index);
    }

    fn encode(&mut self, expr: &Expr) {
        // Leaves encode by binding or value whether or not the node is reused.
        match expr.kind() {
            ExprKind::Var(var) => {
                let token = match self.bound.get(&var.id()) {
                    Some(index) => Token::Bound(*index),
                    None => Token::Free(var.id()),
                };
                self.tokens.push(token);
                return;
            }
            ExprKind::Constant(constant) => {
                self.tokens.push(Token::Constant(
                    constant.ttype.clone(),
                    constant.data.clone(),
                ));
                return;
            }
            _ => {}
        }

        if let Some(index) = self.visited.get(&expr.node_ptr()) {
            self.tokens.push(Token::Shared(*index));
            return;
        }
        let index = self.visited.len();
        self.visited.insert(expr.node_ptr(), index);

        match expr.kind() {
            ExprKind::Var(_) | ExprKind::Constant(_) => {}
            ExprKind::Call(call) => {
                self.tokens.push(Token::Call {
                    op: call.op.clone(),
                    attrs: call.attrs.clone(),
                    arity: call.args.len(),
                    ty: call.checked_type.clone(),
                });
                for arg in &call.args {
                    self.encode(arg);
                }
            }
            ExprKind::Tuple(fields) => {
                self.tokens.push(Token::Tuple(fields.len()));
                for field in fields {
                    self.encode(field);
                }
            }
            ExprKind::TupleGetItem { tuple, index } => {
                self.tokens.push(Token::GetItem(*index));
                self.encode(tuple);
            }
            ExprKind::Let { var, value, body } => {
                self.tokens.push(Token::Let(var.ty().clone()));
                self.encode(value);
                self.bind(var.id());
                self.encode(body);
            }
        }
    }
}

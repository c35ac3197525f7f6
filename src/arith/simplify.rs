use std::collections::{BTreeMap, HashMap};

use num::Integer;
use uuid::Uuid;

use super::{BinaryOp, CmpOp, PrimExpr, SymVar};
use crate::dtype::DataType;

/// `sum(coeff * var) + constant` over unbound integer variables.
#[derive(Clone, Debug, PartialEq)]
struct LinearForm {
    terms: BTreeMap<Uuid, (SymVar, i64)>,
    constant: i64,
    dtype: DataType,
}

impl LinearForm {
    fn constant(value: i64, dtype: DataType) -> Self {
        LinearForm {
            terms: BTreeMap::new(),
            constant: value,
            dtype,
        }
    }

    fn var(var: &SymVar) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(var.id, (var.clone(), 1));
        LinearForm {
            terms,
            constant: 0,
            dtype: var.dtype(),
        }
    }

    fn add(mut self, other: LinearForm, sign: i64) -> Option<Self> {
        for (id, (var, coeff)) in other.terms {
            let scaled = coeff.checked_mul(sign)?;
            let entry = self.terms.entry(id).or_insert((var, 0));
            entry.1 = entry.1.checked_add(scaled)?;
        }
        self.terms.retain(|_, (_, coeff)| *coeff != 0);
        self.constant = self
            .constant
            .checked_add(other.constant.checked_mul(sign)?)?;
        Some(self)
    }

    fn scale(mut self, factor: i64) -> Option<Self> {
        if factor == 0 {
            return Some(LinearForm::constant(0, self.dtype));
        }
        for (_, coeff) in self.terms.values_mut() {
            *coeff = coeff.checked_mul(factor)?;
        }
        self.constant = self.constant.checked_mul(factor)?;
        Some(self)
    }

    fn as_constant(&self) -> Option<i64> {
        if self.terms.is_empty() {
            Some(self.constant)
        } else {
            None
        }
    }

    fn into_expr(self) -> PrimExpr {
        let dtype = self.dtype;
        let mut acc: Option<PrimExpr> = None;
        for (_, (var, coeff)) in self.terms {
            let term = if coeff == 1 {
                PrimExpr::Var(var)
            } else {
                PrimExpr::Var(var) * PrimExpr::int_typed(coeff, dtype)
            };
            acc = Some(match acc {
                Some(prev) => prev + term,
                None => term,
            });
        }
        match acc {
            None => PrimExpr::int_typed(self.constant, dtype),
            Some(expr) if self.constant == 0 => expr,
            Some(expr) => expr + PrimExpr::int_typed(self.constant, dtype),
        }
    }
}

/// `None` where floored division is undefined or overflows.
fn checked_floor(a: i64, b: i64) -> Option<(i64, i64)> {
    if b == 0 || (a == i64::MIN && b == -1) {
        return None;
    }
    Some(a.div_mod_floor(&b))
}

fn fold_binary(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::FloorDiv => checked_floor(a, b).map(|(quotient, _)| quotient),
        BinaryOp::FloorMod => checked_floor(a, b).map(|(_, remainder)| remainder),
        BinaryOp::Min => Some(a.min(b)),
        BinaryOp::Max => Some(a.max(b)),
    }
}

fn fold_compare(op: CmpOp, a: i64, b: i64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Arithmetic simplifier used to decide specialization guards.
///
/// Expressions are folded bottom-up. Sums, differences and constant multiples
/// of variables are rewritten into a canonical linear form, so `n * 2 - n == n`
/// folds to `true` while `n < 4` stays symbolic.
#[derive(Default)]
pub struct Analyzer {
    bindings: HashMap<SymVar, i64>,
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer::default()
    }

    /// Treat `var` as the constant `value` in later simplifications.
    pub fn bind(&mut self, var: &SymVar, value: i64) {
        self.bindings.insert(var.clone(), value);
    }

    /// True when `expr` simplifies to a non-zero constant.
    pub fn can_prove(&self, expr: &PrimExpr) -> bool {
        matches!(self.canonical_simplify(expr).as_int(), Some(value) if value != 0)
    }

    pub fn canonical_simplify(&self, expr: &PrimExpr) -> PrimExpr {
        match expr {
            PrimExpr::IntImm { .. } | PrimExpr::Any => expr.clone(),
            PrimExpr::Var(var) => match self.bindings.get(var) {
                Some(value) => PrimExpr::int_typed(*value, var.dtype()),
                None => expr.clone(),
            },
            PrimExpr::Binary { op, lhs, rhs } => {
                let lhs = self.canonical_simplify(lhs);
                let rhs = self.canonical_simplify(rhs);
                self.simplify_binary(*op, lhs, rhs)
            }
            PrimExpr::Compare { op, lhs, rhs } => {
                let lhs = self.canonical_simplify(lhs);
                let rhs = self.canonical_simplify(rhs);
                self.simplify_compare(*op, lhs, rhs)
            }
            PrimExpr::And(lhs, rhs) => {
                let lhs = self.canonical_simplify(lhs);
                let rhs = self.canonical_simplify(rhs);
                match (lhs.as_int(), rhs.as_int()) {
                    (Some(0), _) | (_, Some(0)) => PrimExpr::boolean(false),
                    (Some(_), Some(_)) => PrimExpr::boolean(true),
                    (Some(_), None) => rhs,
                    (None, Some(_)) => lhs,
                    (None, None) => lhs.and(rhs),
                }
            }
            PrimExpr::Or(lhs, rhs) => {
                let lhs = self.canonical_simplify(lhs);
                let rhs = self.canonical_simplify(rhs);
                match (lhs.as_int(), rhs.as_int()) {
                    (Some(a), _) if a != 0 => PrimExpr::boolean(true),
                    (_, Some(b)) if b != 0 => PrimExpr::boolean(true),
                    (Some(_), Some(_)) => PrimExpr::boolean(false),
                    (Some(_), None) => rhs,
                    (None, Some(_)) => lhs,
                    (None, None) => lhs.or(rhs),
                }
            }
            PrimExpr::Not(inner) => {
                let inner = self.canonical_simplify(inner);
                match inner.as_int() {
                    Some(value) => PrimExpr::boolean(value == 0),
                    None => !inner,
                }
            }
        }
    }

    fn simplify_binary(&self, op: BinaryOp, lhs: PrimExpr, rhs: PrimExpr) -> PrimExpr {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            if let Some(value) = fold_binary(op, a, b) {
                return PrimExpr::int_typed(value, lhs.dtype());
            }
        }
        let rebuilt = PrimExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => match linear_form(&rebuilt) {
                Some(form) => form.into_expr(),
                None => rebuilt,
            },
            _ => rebuilt,
        }
    }

    fn simplify_compare(&self, op: CmpOp, lhs: PrimExpr, rhs: PrimExpr) -> PrimExpr {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return PrimExpr::boolean(fold_compare(op, a, b));
        }
        if !lhs.has_any() && !rhs.has_any() {
            let difference = linear_form(&lhs)
                .zip(linear_form(&rhs))
                .and_then(|(l, r)| l.add(r, -1));
            if let Some(value) = difference.as_ref().and_then(LinearForm::as_constant) {
                return PrimExpr::boolean(fold_compare(op, value, 0));
            }
            if lhs == rhs {
                return PrimExpr::boolean(matches!(op, CmpOp::Eq | CmpOp::Le | CmpOp::Ge));
            }
        }
        PrimExpr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

fn linear_form(expr: &PrimExpr) -> Option<LinearForm> {
    match expr {
        PrimExpr::IntImm { value, dtype } if dtype.is_int() => {
            Some(LinearForm::constant(*value, *dtype))
        }
        PrimExpr::Var(var) if var.dtype().is_int() => Some(LinearForm::var(var)),
        PrimExpr::Binary { op, lhs, rhs } => match op {
            BinaryOp::Add => linear_form(lhs)?.add(linear_form(rhs)?, 1),
            BinaryOp::Sub => linear_form(lhs)?.add(linear_form(rhs)?, -1),
            BinaryOp::Mul => {
                let lhs = linear_form(lhs)?;
                let rhs = linear_form(rhs)?;
                match (lhs.as_constant(), rhs.as_constant()) {
                    (Some(factor), _) => rhs.scale(factor),
                    (_, Some(factor)) => lhs.scale(factor),
                    _ => None,
                }
            }
            _ => None,
        },
        _ => None,
    }
}

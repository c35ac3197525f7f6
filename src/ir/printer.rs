use std::{collections::HashMap, fmt};

use itertools::Itertools;

use super::expr::{Expr, ExprKind, Function};

/// Relay-style text: every non-atomic node gets a `%n` binding.
struct Printer {
    lines: Vec<String>,
    names: HashMap<usize, String>,
    counter: usize,
}

impl Printer {
    fn new() -> Self {
        Printer {
            lines: vec![],
            names: HashMap::new(),
            counter: 0,
        }
    }

    fn bind(&mut self, expr: &Expr, text: String) -> String {
        let name = format!("%{}", self.counter);
        self.counter += 1;
        self.lines
            .push(format!("{} = {} /* ty={} */;", name, text, expr.checked_type()));
        self.names.insert(expr.node_ptr(), name.clone());
        name
    }

    fn print(&mut self, expr: &Expr) -> String {
        if let Some(name) = self.names.get(&expr.node_ptr()) {
            return name.clone();
        }
        match expr.kind() {
            ExprKind::Var(var) => format!("%{}", var.name_hint()),
            ExprKind::Constant(constant) => format!("meta[Constant]({})", constant.ttype),
            ExprKind::Call(call) => {
                let mut args: Vec<String> = call.args.iter().map(|arg| self.print(arg)).collect();
                if !call.attrs.is_empty() {
                    args.push(call.attrs.to_string());
                }
                let text = format!("{}({})", call.op, args.join(", "));
                self.bind(expr, text)
            }
            ExprKind::Tuple(fields) => {
                let fields: Vec<String> = fields.iter().map(|field| self.print(field)).collect();
                let text = format!("({})", fields.join(", "));
                self.bind(expr, text)
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let tuple = self.print(tuple);
                let text = format!("{}.{}", tuple, index);
                self.bind(expr, text)
            }
            ExprKind::Let { var, value, body } => {
                let value = self.print(value);
                self.lines.push(format!(
                    "let %{}: {} = {};",
                    var.name_hint(),
                    var.ty(),
                    value
                ));
                self.print(body)
            }
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|param| format!("%{}: {}", param.name_hint(), param.ty()))
            .join(", ");
        writeln!(f, "fn ({}) -> {} {{", params, self.ret_type)?;
        let mut printer = Printer::new();
        let result = printer.print(&self.body);
        for line in &printer.lines {
            writeln!(f, "  {}", line)?;
        }
        writeln!(f, "  {}", result)?;
        writeln!(f, "}}")
    }
}

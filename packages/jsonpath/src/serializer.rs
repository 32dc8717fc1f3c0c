use std::fmt;

use crate::ast::{Comparator, Expr};

/// Serializer converts an expression tree back to canonical path-string form.
///
/// `parse` then serialize round-trips any path this engine produces itself;
/// incidental whitespace from hand-written paths is normalized away.
pub struct Serializer {
    out: String,
}

/// Print an expression tree as a canonical path string.
pub fn to_path_string(expr: &Expr) -> String {
    let mut serializer = Serializer::new();
    serializer.write_expr(expr, true);
    serializer.out
}

/// True when `name` lexes as a single identifier token and so can be written
/// without quotes (mirrors the tokenizer's `Ident` rule).
fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Serializer {
    pub fn new() -> Self {
        Self { out: String::new() }
    }

    fn write_expr(&mut self, expr: &Expr, first: bool) {
        match expr {
            Expr::Path { nodes } => {
                let mut first_node = first;
                for node in nodes {
                    self.write_segment(node, first_node);
                    first_node = false;
                }
            }
            other => self.write_segment(other, first),
        }
    }

    fn write_segment(&mut self, expr: &Expr, first: bool) {
        match expr {
            Expr::Attribute { name } => {
                if !first {
                    self.out.push('.');
                }
                self.write_attribute(name);
            }
            Expr::This => {
                if !first {
                    self.out.push('.');
                }
                self.out.push('@');
            }
            Expr::Recursive { term } => {
                self.out.push_str("..");
                self.write_expr(term, true);
            }
            Expr::Index { .. } | Expr::Range { .. } | Expr::Union { .. } | Expr::Constraint { .. } => {
                self.write_bracketed(expr);
            }
            Expr::Path { .. } => self.write_expr(expr, first),
            literal => self.write_literal(literal),
        }
    }

    fn write_bracketed(&mut self, expr: &Expr) {
        self.out.push('[');
        match expr {
            Expr::Union { nodes } => {
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.write_member(node);
                }
            }
            single => self.write_member(single),
        }
        self.out.push(']');
    }

    fn write_member(&mut self, expr: &Expr) {
        match expr {
            Expr::Index { value } => self.out.push_str(&value.to_string()),
            Expr::Range { start, end, step } => {
                if let Some(start) = start {
                    self.out.push_str(&start.to_string());
                }
                self.out.push(':');
                if let Some(end) = end {
                    self.out.push_str(&end.to_string());
                }
                if let Some(step) = step {
                    self.out.push(':');
                    self.out.push_str(&step.to_string());
                }
            }
            Expr::Constraint {
                target,
                comparator,
                value,
            } => {
                self.write_constraint_target(target);
                match (comparator, value) {
                    (Some(op), Some(value)) => {
                        self.out.push(' ');
                        self.out.push_str(op.as_str());
                        self.out.push(' ');
                        self.write_literal(value);
                    }
                    _ => self.out.push('?'),
                }
            }
            other => self.write_expr(other, true),
        }
    }

    fn write_constraint_target(&mut self, target: &Expr) {
        match target {
            Expr::This => self.out.push('@'),
            Expr::Attribute { name } => self.write_attribute(name),
            other => self.write_expr(other, true),
        }
    }

    fn write_attribute(&mut self, name: &str) {
        if is_bare_identifier(name) {
            self.out.push_str(name);
        } else {
            self.out.push('\'');
            for c in name.chars() {
                match c {
                    '\'' | '\\' => {
                        self.out.push('\\');
                        self.out.push(c);
                    }
                    _ => self.out.push(c),
                }
            }
            self.out.push('\'');
        }
    }

    fn write_literal(&mut self, literal: &Expr) {
        match literal {
            Expr::String { value } => {
                self.out.push('"');
                for c in value.chars() {
                    match c {
                        '"' | '\\' => {
                            self.out.push('\\');
                            self.out.push(c);
                        }
                        _ => self.out.push(c),
                    }
                }
                self.out.push('"');
            }
            Expr::Number { value } => self.write_number(*value),
            Expr::Boolean { value } => self.out.push_str(if *value { "true" } else { "false" }),
            other => self.write_expr(other, true),
        }
    }

    fn write_number(&mut self, value: f64) {
        if value.fract() == 0.0 && value.is_finite() {
            self.out.push_str(&(value as i64).to_string());
        } else {
            self.out.push_str(&value.to_string());
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_path_string(self))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

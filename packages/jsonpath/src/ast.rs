use serde::{Deserialize, Serialize};

use crate::probe::{ContainerKind, Probe, Scalar};

/// Comparison operator usable inside a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Neq => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }

    /// Strict comparison: values of different scalar types are never equal
    /// and never ordered.
    pub fn compare(&self, lhs: &Scalar, rhs: &Scalar) -> bool {
        match (lhs, rhs) {
            (Scalar::Number(a), Scalar::Number(b)) => match self {
                Comparator::Eq => a == b,
                Comparator::Neq => a != b,
                Comparator::Gt => a > b,
                Comparator::Gte => a >= b,
                Comparator::Lt => a < b,
                Comparator::Lte => a <= b,
            },
            (Scalar::String(a), Scalar::String(b)) => match self {
                Comparator::Eq => a == b,
                Comparator::Neq => a != b,
                Comparator::Gt => a > b,
                Comparator::Gte => a >= b,
                Comparator::Lt => a < b,
                Comparator::Lte => a <= b,
            },
            (Scalar::Bool(a), Scalar::Bool(b)) => match self {
                Comparator::Eq => a == b,
                Comparator::Neq => a != b,
                _ => false,
            },
            _ => matches!(self, Comparator::Neq),
        }
    }
}

/// A parsed path expression node.
///
/// A whole path is either a single node or a `Path` of sequential nodes;
/// bracketed multi-element groups become `Union` nodes. Literals only appear
/// as constraint operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expr {
    /// Sequential segments: `a.b[5].c`
    Path { nodes: Vec<Expr> },

    /// Bracketed multi-element union: `[a, 1, 2:4]`
    Union { nodes: Vec<Expr> },

    /// Named attribute reference
    Attribute { name: String },

    /// Concrete array index; negative values count from the end
    Index { value: i64 },

    /// Array slice `[start:end]` or `[start:end:step]`
    Range {
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
    },

    /// Value filter such as `[count > 5]`, or existence test `[title?]`
    /// when `comparator`/`value` are absent
    Constraint {
        target: Box<Expr>,
        comparator: Option<Comparator>,
        value: Option<Box<Expr>>,
    },

    /// Recursive descent `..term`, matching the term at any depth
    Recursive { term: Box<Expr> },

    /// Self reference (`@` or `$`)
    This,

    /// String literal (constraint operand)
    String { value: String },

    /// Number literal (constraint operand)
    Number { value: f64 },

    /// Boolean literal (constraint operand)
    Boolean { value: bool },
}

impl Expr {
    pub fn is_path(&self) -> bool {
        matches!(self, Expr::Path { .. })
    }

    pub fn is_union(&self) -> bool {
        matches!(self, Expr::Union { .. })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Expr::Attribute { .. })
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Expr::Index { .. })
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Expr::Range { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Expr::Constraint { .. })
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, Expr::Recursive { .. })
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Expr::This)
    }

    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            Expr::Attribute { name } => Some(name),
            _ => None,
        }
    }

    pub fn index_value(&self) -> Option<i64> {
        match self {
            Expr::Index { value } => Some(*value),
            _ => None,
        }
    }

    /// Flatten into sequential path nodes.
    pub fn into_path_nodes(self) -> Vec<Expr> {
        match self {
            Expr::Path { nodes } => nodes,
            other => vec![other],
        }
    }

    /// Concrete indices this node selects against a collection of `length`
    /// elements, in selection order. Negative indices resolve from the end;
    /// anything unresolvable is silently skipped.
    pub fn to_indices(&self, length: usize) -> Vec<usize> {
        match self {
            Expr::Index { value } => resolve_index(*value, length).into_iter().collect(),
            Expr::Range { start, end, step } => {
                let step = step.unwrap_or(1);
                if step <= 0 {
                    return Vec::new();
                }
                let (from, to) = resolve_bounds(*start, *end, length);
                (from..to).step_by(step as usize).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Evaluate a constraint node against a probed value. Non-constraint
    /// nodes never match.
    pub fn test_constraint<P: Probe>(&self, probe: &P) -> bool {
        let Expr::Constraint {
            target,
            comparator,
            value,
        } = self
        else {
            return false;
        };

        match target.as_ref() {
            Expr::This => {
                let Some(lhs) = probe.scalar() else {
                    return false;
                };
                match (comparator, value) {
                    (None, _) => !matches!(lhs, Scalar::Null),
                    (Some(op), Some(rhs)) => rhs
                        .literal_scalar()
                        .map(|rhs| op.compare(&lhs, &rhs))
                        .unwrap_or(false),
                    _ => false,
                }
            }
            Expr::Attribute { name } => {
                if probe.container_kind() != ContainerKind::Object {
                    return false;
                }
                match (comparator, value) {
                    (None, _) => probe.has_attribute(name),
                    (Some(op), Some(rhs)) => {
                        let Some(lhs) = probe.get_attribute(name).and_then(|a| a.scalar()) else {
                            return false;
                        };
                        rhs.literal_scalar()
                            .map(|rhs| op.compare(&lhs, &rhs))
                            .unwrap_or(false)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Scalar form of a literal node.
    pub fn literal_scalar(&self) -> Option<Scalar> {
        match self {
            Expr::String { value } => Some(Scalar::String(value.clone())),
            Expr::Number { value } => Some(Scalar::Number(*value)),
            Expr::Boolean { value } => Some(Scalar::Bool(*value)),
            _ => None,
        }
    }
}

/// Join two optional paths into one sequential path. Single-node results
/// collapse to the bare node, matching the parser's canonical form.
pub fn concat(a: Option<&Expr>, b: Option<&Expr>) -> Option<Expr> {
    let mut nodes = Vec::new();
    if let Some(a) = a {
        nodes.extend(a.clone().into_path_nodes());
    }
    if let Some(b) = b {
        nodes.extend(b.clone().into_path_nodes());
    }
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(Expr::Path { nodes }),
    }
}

/// Resolve one possibly-negative index against a collection length.
pub fn resolve_index(value: i64, length: usize) -> Option<usize> {
    let resolved = if value < 0 {
        length as i64 + value
    } else {
        value
    };
    if resolved >= 0 && (resolved as usize) < length {
        Some(resolved as usize)
    } else {
        None
    }
}

/// Resolve range bounds against a collection length, clamping to `0..length`.
/// Missing bounds default to the full span. The result may be empty.
pub fn resolve_bounds(start: Option<i64>, end: Option<i64>, length: usize) -> (usize, usize) {
    let clamp = |value: i64| -> usize {
        let resolved = if value < 0 { length as i64 + value } else { value };
        resolved.clamp(0, length as i64) as usize
    };
    let from = start.map(clamp).unwrap_or(0);
    let to = end.map(clamp).unwrap_or(length);
    (from, to.max(from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_indices_negative() {
        let index = Expr::Index { value: -1 };
        assert_eq!(index.to_indices(3), vec![2]);
        assert_eq!(index.to_indices(0), Vec::<usize>::new());
    }

    #[test]
    fn test_to_indices_range() {
        let range = Expr::Range {
            start: Some(1),
            end: Some(4),
            step: None,
        };
        assert_eq!(range.to_indices(6), vec![1, 2, 3]);
        // End clamps to length
        assert_eq!(range.to_indices(3), vec![1, 2]);
    }

    #[test]
    fn test_to_indices_range_with_step() {
        let range = Expr::Range {
            start: Some(0),
            end: None,
            step: Some(2),
        };
        assert_eq!(range.to_indices(5), vec![0, 2, 4]);
    }

    #[test]
    fn test_resolve_bounds_empty_range() {
        assert_eq!(resolve_bounds(Some(2), Some(2), 5), (2, 2));
        assert_eq!(resolve_bounds(Some(4), Some(1), 5), (4, 4));
    }

    #[test]
    fn test_constraint_against_attribute() {
        let doc = json!({"count": 7});
        let constraint = Expr::Constraint {
            target: Box::new(Expr::Attribute {
                name: "count".to_string(),
            }),
            comparator: Some(Comparator::Gt),
            value: Some(Box::new(Expr::Number { value: 5.0 })),
        };

        assert!(constraint.test_constraint(&&doc));

        let low = json!({"count": 3});
        assert!(!constraint.test_constraint(&&low));
    }

    #[test]
    fn test_existence_constraint() {
        let constraint = Expr::Constraint {
            target: Box::new(Expr::Attribute {
                name: "title".to_string(),
            }),
            comparator: None,
            value: None,
        };

        let with = json!({"title": "x"});
        let without = json!({"other": 1});
        assert!(constraint.test_constraint(&&with));
        assert!(!constraint.test_constraint(&&without));
    }

    #[test]
    fn test_self_constraint_on_primitive() {
        let constraint = Expr::Constraint {
            target: Box::new(Expr::This),
            comparator: Some(Comparator::Gte),
            value: Some(Box::new(Expr::Number { value: 10.0 })),
        };

        let ten = json!(10);
        let nine = json!(9);
        assert!(constraint.test_constraint(&&ten));
        assert!(!constraint.test_constraint(&&nine));
    }

    #[test]
    fn test_self_constraint_never_matches_object() {
        let constraint = Expr::Constraint {
            target: Box::new(Expr::This),
            comparator: Some(Comparator::Eq),
            value: Some(Box::new(Expr::Number { value: 1.0 })),
        };

        let doc = json!({"a": 1});
        assert!(!constraint.test_constraint(&&doc));
    }

    #[test]
    fn test_mixed_type_comparison() {
        let lhs = Scalar::Number(1.0);
        let rhs = Scalar::String("1".to_string());
        assert!(!Comparator::Eq.compare(&lhs, &rhs));
        assert!(Comparator::Neq.compare(&lhs, &rhs));
        assert!(!Comparator::Gt.compare(&lhs, &rhs));
    }

    #[test]
    fn test_concat_paths() {
        let a = Expr::Attribute {
            name: "a".to_string(),
        };
        let bc = Expr::Path {
            nodes: vec![
                Expr::Attribute {
                    name: "b".to_string(),
                },
                Expr::Attribute {
                    name: "c".to_string(),
                },
            ],
        };

        let joined = concat(Some(&a), Some(&bc)).unwrap();
        match joined {
            Expr::Path { nodes } => assert_eq!(nodes.len(), 3),
            other => panic!("expected path, got {:?}", other),
        }
    }
}

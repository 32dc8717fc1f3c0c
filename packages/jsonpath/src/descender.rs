use serde::{Deserialize, Serialize};

use crate::ast::{concat, Expr};
use crate::probe::{ContainerKind, Probe};

/// A cursor over a path expression: `head` is the next unresolved segment,
/// `tail` is everything after it. Both empty means the descender has arrived
/// at a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descender {
    pub head: Option<Expr>,
    pub tail: Option<Expr>,
}

impl Descender {
    pub fn new(head: Option<Expr>, tail: Option<Expr>) -> Self {
        Self { head, tail }
    }

    pub fn has_arrived(&self) -> bool {
        self.head.is_none() && self.tail.is_none()
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self.head, Some(Expr::Recursive { .. }))
    }

    /// Unwrap a recursive head into plain descenders over its term followed
    /// by this descender's tail. Non-recursive descenders pass through.
    pub fn extract_recursives(&self) -> Vec<Descender> {
        if let Some(Expr::Recursive { term }) = &self.head {
            let rest = concat(Some(term.as_ref()), self.tail.as_ref());
            return Descender::new(None, rest).descend();
        }
        vec![self.clone()]
    }

    /// Consume the tail, yielding one descender per next-segment branch.
    pub fn descend(&self) -> Vec<Descender> {
        match &self.tail {
            None => vec![Descender::new(None, None)],
            Some(expr) => split_heads(expr, None),
        }
    }

    /// Rewrite a constraint head against the probed value until no constraint
    /// remains in head position. Concrete heads pass through unchanged.
    ///
    /// Array probes resolve a constraint to the concrete indices of matching
    /// elements. Object and primitive probes evaluate the constraint in
    /// place; when it holds, matching continues at this same value with the
    /// rest of the path.
    pub fn iterate<P: Probe>(&self, probe: &P) -> Vec<Descender> {
        let mut work = vec![self.clone()];
        let mut out = Vec::new();

        while let Some(descender) = work.pop() {
            let Descender { head, tail } = descender;
            match head {
                Some(constraint @ Expr::Constraint { .. }) => match probe.container_kind() {
                    ContainerKind::Array => {
                        let length = probe.length().unwrap_or(0);
                        for index in 0..length {
                            let matched = probe
                                .get_index(index)
                                .map(|member| constraint.test_constraint(&member))
                                .unwrap_or(false);
                            if matched {
                                out.push(Descender::new(
                                    Some(Expr::Index {
                                        value: index as i64,
                                    }),
                                    tail.clone(),
                                ));
                            }
                        }
                    }
                    ContainerKind::Object | ContainerKind::Primitive => {
                        if constraint.test_constraint(probe) {
                            match &tail {
                                None => out.push(Descender::new(None, None)),
                                Some(rest) => work.extend(split_heads(rest, None)),
                            }
                        }
                    }
                },
                head => out.push(Descender::new(head, tail)),
            }
        }

        out
    }
}

/// One descender per way `expr` can begin, with `rest` appended after it.
/// Paths split off their first node; unions branch per member.
fn split_heads(expr: &Expr, rest: Option<&Expr>) -> Vec<Descender> {
    match expr {
        Expr::Path { nodes } => match nodes.split_first() {
            None => match rest {
                None => vec![Descender::new(None, None)],
                Some(rest) => split_heads(rest, None),
            },
            Some((first, remainder)) => {
                let remainder = if remainder.is_empty() {
                    None
                } else {
                    Some(Expr::Path {
                        nodes: remainder.to_vec(),
                    })
                };
                let tail = concat(remainder.as_ref(), rest);
                split_heads(first, tail.as_ref())
            }
        },
        Expr::Union { nodes } => nodes
            .iter()
            .flat_map(|member| split_heads(member, rest))
            .collect(),
        other => vec![Descender::new(Some(other.clone()), rest.cloned())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn descend_path(path: &str) -> Vec<Descender> {
        let expr = parse(path).unwrap();
        Descender::new(None, Some(expr)).descend()
    }

    #[test]
    fn test_descend_splits_head_and_tail() {
        let descenders = descend_path("a.b.c");
        assert_eq!(descenders.len(), 1);
        assert_eq!(
            descenders[0].head,
            Some(Expr::Attribute {
                name: "a".to_string()
            })
        );
        assert_eq!(descenders[0].tail, Some(parse("b.c").unwrap()));
    }

    #[test]
    fn test_descend_branches_per_union_member() {
        let descenders = descend_path("[a.b, c]");
        assert_eq!(descenders.len(), 2);
        assert_eq!(
            descenders[0].head,
            Some(Expr::Attribute {
                name: "a".to_string()
            })
        );
        assert_eq!(
            descenders[0].tail,
            Some(Expr::Attribute {
                name: "b".to_string()
            })
        );
        assert_eq!(
            descenders[1].head,
            Some(Expr::Attribute {
                name: "c".to_string()
            })
        );
        assert_eq!(descenders[1].tail, None);
    }

    #[test]
    fn test_descend_empty_union_matches_nothing() {
        assert!(descend_path("[]").is_empty());
    }

    #[test]
    fn test_arrived_descender() {
        let arrived = Descender::new(None, None);
        assert!(arrived.has_arrived());
        assert_eq!(arrived.descend(), vec![Descender::new(None, None)]);
    }

    #[test]
    fn test_iterate_constraint_over_array() {
        let descenders = descend_path("[count > 5].title");
        assert_eq!(descenders.len(), 1);

        let doc = json!([
            {"count": 3, "title": "low"},
            {"count": 9, "title": "high"},
            {"count": 7, "title": "mid"}
        ]);
        let rewritten = descenders[0].iterate(&&doc);

        assert_eq!(rewritten.len(), 2);
        assert!(rewritten
            .iter()
            .any(|d| d.head == Some(Expr::Index { value: 1 })));
        assert!(rewritten
            .iter()
            .any(|d| d.head == Some(Expr::Index { value: 2 })));
        assert!(rewritten
            .iter()
            .all(|d| d.tail
                == Some(Expr::Attribute {
                    name: "title".to_string()
                })));
    }

    #[test]
    fn test_iterate_constraint_on_object_continues_in_place() {
        let descenders = descend_path("[active == true].name");
        let doc = json!({"active": true, "name": "x"});
        let rewritten = descenders[0].iterate(&&doc);

        assert_eq!(rewritten.len(), 1);
        assert_eq!(
            rewritten[0].head,
            Some(Expr::Attribute {
                name: "name".to_string()
            })
        );
        assert_eq!(rewritten[0].tail, None);
    }

    #[test]
    fn test_iterate_failed_object_constraint_prunes() {
        let descenders = descend_path("[active == true].name");
        let doc = json!({"active": false, "name": "x"});
        assert!(descenders[0].iterate(&&doc).is_empty());
    }

    #[test]
    fn test_iterate_self_constraint_on_primitive_arrives() {
        let descenders = descend_path("[@ > 5]");
        let seven = json!(7);
        let rewritten = descenders[0].iterate(&&seven);

        assert_eq!(rewritten.len(), 1);
        assert!(rewritten[0].has_arrived());
    }

    #[test]
    fn test_iterate_chained_constraints_same_value() {
        let descenders = descend_path("[a == 1][b == 2].c");
        let doc = json!({"a": 1, "b": 2, "c": 3});
        let rewritten = descenders[0].iterate(&&doc);

        assert_eq!(rewritten.len(), 1);
        assert_eq!(
            rewritten[0].head,
            Some(Expr::Attribute {
                name: "c".to_string()
            })
        );
    }

    #[test]
    fn test_extract_recursives_unwraps_term() {
        let descenders = descend_path("..a.b");
        assert_eq!(descenders.len(), 1);
        assert!(descenders[0].is_recursive());

        let unwrapped = descenders[0].extract_recursives();
        assert_eq!(unwrapped.len(), 1);
        assert_eq!(
            unwrapped[0].head,
            Some(Expr::Attribute {
                name: "a".to_string()
            })
        );
        assert_eq!(
            unwrapped[0].tail,
            Some(Expr::Attribute {
                name: "b".to_string()
            })
        );
    }

    #[test]
    fn test_non_constraint_head_passes_through() {
        let descenders = descend_path("a.b");
        let doc = json!({"a": {"b": 1}});
        let rewritten = descenders[0].iterate(&&doc);
        assert_eq!(rewritten, descenders);
    }
}

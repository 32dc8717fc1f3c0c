use std::collections::BTreeSet;

use crate::ast::{resolve_index, Expr};
use crate::descender::Descender;
use crate::probe::{ContainerKind, Probe};

/// Matches an expression tree against live values one level at a time.
///
/// The active set holds descenders positioned at the current level; the
/// recursive set holds unwrapped `..` descenders, which are re-tested at
/// every level until the value shape disqualifies them.
#[derive(Debug, Clone)]
pub struct Matcher {
    active: Vec<Descender>,
    recursives: Vec<Descender>,
}

/// Further work: look up `target`'s child value and match `matcher` against it.
#[derive(Debug, Clone)]
pub struct Lead {
    pub target: Expr,
    pub matcher: Matcher,
}

/// One level of matching: leads to follow into children, and — when some
/// descender arrived here — the resolved target expressions for this value.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub leads: Vec<Lead>,
    pub targets: Option<Vec<Expr>>,
}

impl Matcher {
    /// Build a matcher positioned at the start of `expr`.
    pub fn from_expr(expr: &Expr) -> Matcher {
        Matcher::with_recursives(
            Descender::new(None, Some(expr.clone())).descend(),
            Vec::new(),
        )
    }

    /// Wrap an active set, moving recursive descenders into the recursive set.
    fn with_recursives(active: Vec<Descender>, mut recursives: Vec<Descender>) -> Matcher {
        let mut plain = Vec::new();
        for descender in active {
            if descender.is_recursive() {
                recursives.extend(descender.extract_recursives());
            } else {
                plain.push(descender);
            }
        }
        Matcher {
            active: plain,
            recursives,
        }
    }

    pub fn has_recursives(&self) -> bool {
        !self.recursives.is_empty()
    }

    /// Match one level of the value, producing leads into children and a
    /// delivery of resolved targets when a descender arrived here.
    pub fn match_probe<P: Probe>(&self, probe: &P) -> MatchResult {
        // Recursives re-enter the active set at every level. Constraint
        // rewriting may surface new recursive heads (a `..` following a
        // constraint), which also apply at this same level, so iterate
        // until the set is free of both. Each descender keeps a flag for
        // whether it came out of the recursive set: recursive matches are
        // pattern re-tests and must respect the container shape, while an
        // explicit path names a slot the payload may create.
        let mut work: Vec<(Descender, bool)> = self
            .active
            .iter()
            .map(|d| (d.clone(), false))
            .chain(self.recursives.iter().map(|d| (d.clone(), true)))
            .collect();
        let mut recursives = self.recursives.clone();
        let mut settled = Vec::new();

        while !work.is_empty() {
            let mut rewritten = Vec::new();
            for (descender, from_recursive) in work.drain(..) {
                for next in descender.iterate(probe) {
                    rewritten.push((next, from_recursive));
                }
            }
            for (descender, from_recursive) in rewritten {
                if descender.is_recursive() {
                    let unwrapped = descender.extract_recursives();
                    recursives.extend(unwrapped.iter().cloned());
                    work.extend(unwrapped.into_iter().map(|d| (d, true)));
                } else {
                    settled.push((descender, from_recursive));
                }
            }
        }

        let kind = probe.container_kind();
        let mut leads: Vec<Lead> = Vec::new();
        let mut targets: Vec<Expr> = Vec::new();

        for (descender, from_recursive) in settled {
            if descender.has_arrived() {
                targets.push(Expr::This);
                continue;
            }
            let Some(head) = descender.head.clone() else {
                continue;
            };
            if descender.tail.is_none() {
                // A terminal head on an explicit path is delivered as-is.
                // Whether the slot it names exists, or can exist in this
                // container at all, is the payload's concern: set creates
                // missing attributes and splits primitives, unset of a
                // missing slot is a no-op. A recursive pattern is a re-test
                // at every level and only delivers slots that exist here,
                // otherwise `..a` would deliver into every value in the
                // document.
                let deliverable = if from_recursive {
                    match &head {
                        Expr::Attribute { name } => {
                            kind == ContainerKind::Object && probe.has_attribute(name)
                        }
                        Expr::Index { value } => {
                            kind == ContainerKind::Array
                                && resolve_index(*value, probe.length().unwrap_or(0)).is_some()
                        }
                        Expr::Range { .. } => kind == ContainerKind::Array,
                        Expr::This => true,
                        _ => false,
                    }
                } else {
                    true
                };
                if deliverable {
                    targets.push(head);
                }
            } else {
                // Descending needs a container of the right shape.
                let compatible = match &head {
                    Expr::Attribute { .. } => kind == ContainerKind::Object,
                    Expr::Index { .. } | Expr::Range { .. } => kind == ContainerKind::Array,
                    Expr::This => true,
                    _ => false,
                };
                if !compatible {
                    continue;
                }
                let matcher = Matcher::with_recursives(descender.descend(), recursives.clone());
                if matcher.active.is_empty() && matcher.recursives.is_empty() {
                    // An empty union in the tail; nothing can ever deliver.
                    continue;
                }
                leads.push(Lead {
                    target: head,
                    matcher,
                });
            }
        }

        if !recursives.is_empty() {
            spread_recursives(probe, kind, &recursives, &mut leads);
        }

        MatchResult {
            leads,
            targets: if targets.is_empty() {
                None
            } else {
                Some(targets)
            },
        }
    }
}

/// Recursive descenders must be re-tested inside every child. Leads already
/// carry the recursive set with them, so spreading covers exactly the child
/// slots no lead enters — entering a slot twice would double-deliver.
fn spread_recursives<P: Probe>(
    probe: &P,
    kind: ContainerKind,
    recursives: &[Descender],
    leads: &mut Vec<Lead>,
) {
    let continuation = Matcher {
        active: Vec::new(),
        recursives: recursives.to_vec(),
    };
    match kind {
        ContainerKind::Array => {
            let length = probe.length().unwrap_or(0);
            let mut covered = vec![false; length];
            for lead in leads.iter() {
                for index in lead.target.to_indices(length) {
                    covered[index] = true;
                }
            }
            for (index, covered) in covered.into_iter().enumerate() {
                if !covered {
                    leads.push(Lead {
                        target: Expr::Index {
                            value: index as i64,
                        },
                        matcher: continuation.clone(),
                    });
                }
            }
        }
        ContainerKind::Object => {
            let covered: BTreeSet<String> = leads
                .iter()
                .filter_map(|lead| lead.target.attribute_name().map(str::to_string))
                .collect();
            for key in probe.attribute_keys() {
                if !covered.contains(&key) {
                    leads.push(Lead {
                        target: Expr::Attribute { name: key },
                        matcher: continuation.clone(),
                    });
                }
            }
        }
        ContainerKind::Primitive => {}
    }
}

//! Read-side evaluation: pull every value a path expression matches out of a
//! document, optionally with the concrete path each value was found at.

use std::collections::VecDeque;

use serde_json::Value as JsonValue;

use crate::ast::Expr;
use crate::error::ParseResult;
use crate::matcher::Matcher;
use crate::parser::parse;
use crate::probe::Probe;

/// One concrete step of a resolved path. Unlike `Expr`, a segment is always
/// a single attribute or a single in-bounds element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Attribute(String),
    Index(usize),
}

/// Build a plain path expression from concrete segments. An empty slice maps
/// to `@`, the document itself.
pub fn path_from_segments(segments: &[PathSegment]) -> Expr {
    let mut nodes: Vec<Expr> = segments
        .iter()
        .map(|segment| match segment {
            PathSegment::Attribute(name) => Expr::Attribute { name: name.clone() },
            PathSegment::Index(index) => Expr::Index {
                value: *index as i64,
            },
        })
        .collect();
    match nodes.len() {
        0 => Expr::This,
        1 => nodes.remove(0),
        _ => Expr::Path { nodes },
    }
}

/// All values in `value` matched by `path`, in breadth-first document order.
pub fn extract(path: &str, value: &JsonValue) -> ParseResult<Vec<JsonValue>> {
    let expr = parse(path)?;
    Ok(collect_matches(&expr, &value)
        .into_iter()
        .map(|(_, found)| found.clone())
        .collect())
}

/// Like [`extract`], but pairs every value with the concrete path it was
/// found at. Constraints, ranges and unions are resolved down to plain
/// attribute and index steps.
pub fn extract_with_path(path: &str, value: &JsonValue) -> ParseResult<Vec<(Expr, JsonValue)>> {
    let expr = parse(path)?;
    Ok(matches_with_path(&expr, &value)
        .into_iter()
        .map(|(concrete, found)| (concrete, found.clone()))
        .collect())
}

/// Match a parsed expression against any probe, yielding each match with
/// the concrete path expression it was found at.
pub fn matches_with_path<P: Probe>(expr: &Expr, probe: &P) -> Vec<(Expr, P)> {
    collect_matches(expr, probe)
        .into_iter()
        .map(|(segments, found)| (path_from_segments(&segments), found))
        .collect()
}

/// Walk the value with an explicit work list. Matching can fan out (unions,
/// ranges, recursive descent), so the frontier is a queue rather than the
/// call stack.
fn collect_matches<P: Probe>(expr: &Expr, probe: &P) -> Vec<(Vec<PathSegment>, P)> {
    let mut out = Vec::new();
    let mut work: VecDeque<(Vec<PathSegment>, P, Matcher)> = VecDeque::new();
    work.push_back((Vec::new(), probe.clone(), Matcher::from_expr(expr)));

    while let Some((prefix, probe, matcher)) = work.pop_front() {
        let result = matcher.match_probe(&probe);

        if let Some(targets) = result.targets {
            for target in targets {
                for (segment, child) in resolve_target(&target, &probe) {
                    let mut path = prefix.clone();
                    path.extend(segment);
                    out.push((path, child));
                }
            }
        }

        for lead in result.leads {
            for (segment, child) in resolve_target(&lead.target, &probe) {
                let mut path = prefix.clone();
                path.extend(segment);
                work.push_back((path, child, lead.matcher.clone()));
            }
        }
    }

    out
}

/// Resolve a match target to the concrete children it names. Missing
/// attributes and out-of-bounds indices resolve to nothing; a `This` target
/// is the probed value itself.
fn resolve_target<P: Probe>(target: &Expr, probe: &P) -> Vec<(Option<PathSegment>, P)> {
    match target {
        Expr::This => vec![(None, probe.clone())],
        Expr::Attribute { name } => probe
            .get_attribute(name)
            .map(|child| (Some(PathSegment::Attribute(name.clone())), child))
            .into_iter()
            .collect(),
        Expr::Index { .. } | Expr::Range { .. } => {
            let length = probe.length().unwrap_or(0);
            target
                .to_indices(length)
                .into_iter()
                .filter_map(|index| {
                    probe
                        .get_index(index)
                        .map(|child| (Some(PathSegment::Index(index)), child))
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

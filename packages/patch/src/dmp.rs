//! Serialized text-diff patches.
//!
//! The wire format is the diff-match-patch patch text: one `@@ -a,b +c,d @@`
//! header per hunk followed by context (` `), deletion (`-`) and insertion
//! (`+`) lines with URI-style percent encoding. [`make`] produces a minimal
//! single-hunk patch for a string replacement; [`parse`] and [`apply`] accept
//! any well-formed patch text, including multi-hunk patches produced
//! elsewhere. Coordinates count characters, and hunks that no longer match
//! the text fall back to a content search before being skipped.

use std::fmt::Write as _;

use tracing::debug;

use crate::error::{PatchError, PatchResult};

/// Context either side of a change when building a patch.
const MARGIN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Context,
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    kind: LineKind,
    text: String,
}

/// One `@@` hunk: coordinates into the source and target texts plus the
/// decoded body lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    start1: usize,
    length1: usize,
    start2: usize,
    length2: usize,
    lines: Vec<Line>,
}

/// Build patch text turning `before` into `after`. Equal inputs produce an
/// empty patch.
pub fn make(before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    let before: Vec<char> = before.chars().collect();
    let after: Vec<char> = after.chars().collect();

    let limit = before.len().min(after.len());
    let mut prefix = 0;
    while prefix < limit && before[prefix] == after[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < limit - prefix
        && before[before.len() - 1 - suffix] == after[after.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed = &before[prefix..before.len() - suffix];
    let added = &after[prefix..after.len() - suffix];

    let context_start = prefix.saturating_sub(MARGIN);
    let context_before = &before[context_start..prefix];
    let context_end = (before.len() - suffix + MARGIN).min(before.len());
    let context_after = &before[before.len() - suffix..context_end];

    let length1 = context_before.len() + removed.len() + context_after.len();
    let length2 = context_before.len() + added.len() + context_after.len();

    let mut out = format!(
        "@@ -{} +{} @@\n",
        coords(context_start, length1),
        coords(context_start, length2)
    );
    if !context_before.is_empty() {
        write_line(&mut out, ' ', context_before);
    }
    if !removed.is_empty() {
        write_line(&mut out, '-', removed);
    }
    if !added.is_empty() {
        write_line(&mut out, '+', added);
    }
    if !context_after.is_empty() {
        write_line(&mut out, ' ', context_after);
    }
    out
}

/// Parse patch text into hunks.
pub fn parse(patch: &str) -> PatchResult<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for (line_no, line) in patch.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@ -") {
            let header = header
                .strip_suffix(" @@")
                .ok_or_else(|| PatchError::malformed_diff(line_no, "unterminated hunk header"))?;
            let (first, second) = header
                .split_once(" +")
                .ok_or_else(|| PatchError::malformed_diff(line_no, "expected two coordinates"))?;
            let (start1, length1) = parse_coords(first, line_no)?;
            let (start2, length2) = parse_coords(second, line_no)?;
            hunks.push(Hunk {
                start1,
                length1,
                start2,
                length2,
                lines: Vec::new(),
            });
            continue;
        }
        let hunk = hunks
            .last_mut()
            .ok_or_else(|| PatchError::malformed_diff(line_no, "body before first hunk header"))?;
        let kind = match line.as_bytes()[0] {
            b' ' => LineKind::Context,
            b'+' => LineKind::Insert,
            b'-' => LineKind::Delete,
            _ => {
                return Err(PatchError::malformed_diff(
                    line_no,
                    "line must start with ' ', '+' or '-'",
                ))
            }
        };
        hunk.lines.push(Line {
            kind,
            text: decode_uri(&line[1..], line_no)?,
        });
    }
    Ok(hunks)
}

/// Apply hunks to `text`. A hunk whose source window no longer matches is
/// located by content search; if the content is gone entirely the hunk is
/// skipped.
pub fn apply(hunks: &[Hunk], text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    let mut delta: isize = 0;

    for hunk in hunks {
        let expected: Vec<char> = hunk
            .lines
            .iter()
            .filter(|line| line.kind != LineKind::Insert)
            .flat_map(|line| line.text.chars())
            .collect();
        let replacement: Vec<char> = hunk
            .lines
            .iter()
            .filter(|line| line.kind != LineKind::Delete)
            .flat_map(|line| line.text.chars())
            .collect();

        let adjusted = hunk.start1 as isize + delta;
        let adjusted = adjusted.clamp(0, chars.len() as isize) as usize;

        let position = if expected.is_empty() {
            Some(adjusted)
        } else if matches_at(&chars, adjusted, &expected) {
            Some(adjusted)
        } else {
            find_window(&chars, &expected)
        };

        match position {
            Some(position) => {
                chars.splice(position..position + expected.len(), replacement.iter().cloned());
                delta += replacement.len() as isize - expected.len() as isize;
            }
            None => {
                debug!(start = hunk.start1, "text patch hunk no longer applies, skipping");
            }
        }
    }

    chars.into_iter().collect()
}

/// Parse-and-apply convenience for callers holding raw patch text.
pub fn apply_patch(patch: &str, text: &str) -> PatchResult<String> {
    Ok(apply(&parse(patch)?, text))
}

fn matches_at(chars: &[char], position: usize, expected: &[char]) -> bool {
    position + expected.len() <= chars.len()
        && chars[position..position + expected.len()] == *expected
}

fn find_window(chars: &[char], expected: &[char]) -> Option<usize> {
    if expected.len() > chars.len() {
        return None;
    }
    chars
        .windows(expected.len())
        .position(|window| window == expected)
}

/// `n` means (n-1, 1); `n,0` means (n, 0) with n counting from zero; `n,m`
/// means (n-1, m). Mirrors the diff-match-patch header encoding.
fn parse_coords(text: &str, line_no: usize) -> PatchResult<(usize, usize)> {
    let bad = || PatchError::malformed_diff(line_no, "invalid hunk coordinates");
    match text.split_once(',') {
        None => {
            let start: usize = text.parse().map_err(|_| bad())?;
            Ok((start.checked_sub(1).ok_or_else(bad)?, 1))
        }
        Some((start, length)) => {
            let start: usize = start.parse().map_err(|_| bad())?;
            let length: usize = length.parse().map_err(|_| bad())?;
            if length == 0 {
                Ok((start, 0))
            } else {
                Ok((start.checked_sub(1).ok_or_else(bad)?, length))
            }
        }
    }
}

fn coords(start: usize, length: usize) -> String {
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, length),
    }
}

fn write_line(out: &mut String, prefix: char, payload: &[char]) {
    out.push(prefix);
    for c in payload.iter().copied() {
        if is_uri_safe(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out.push('\n');
}

// The characters encodeURI leaves alone.
fn is_uri_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '_'
                | '.'
                | '!'
                | '~'
                | '*'
                | '\''
                | '('
                | ')'
                | ';'
                | '/'
                | '?'
                | ':'
                | '@'
                | '&'
                | '='
                | '+'
                | '$'
                | ','
                | '#'
        )
}

fn decode_uri(text: &str, line_no: usize) -> PatchResult<String> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if c == '%' {
            let digits = rest
                .get(1..3)
                .ok_or_else(|| PatchError::malformed_diff(line_no, "truncated percent escape"))?;
            let byte = u8::from_str_radix(digits, 16).map_err(|_| {
                PatchError::malformed_diff(line_no, "invalid percent escape")
            })?;
            bytes.push(byte);
            rest = &rest[3..];
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            rest = &rest[c.len_utf8()..];
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| PatchError::malformed_diff(line_no, "patch body is not valid UTF-8"))
}

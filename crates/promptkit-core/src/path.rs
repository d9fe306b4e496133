//! Path resolution over JSON values.
//!
//! Paths use a small JSONPath subset: `$` for the root, `.name`, `.*`, `[n]`,
//! `[*]` and quoted bracket keys (`['name']`). Sugared paths such as
//! `foo.bar` or `[0]` are normalized to `$.foo.bar` and `$[0]`.
//!
//! Resolution is total: a missing path or an unparsable expression yields a
//! single absent sample rather than an empty list or an error.

use crate::types::Sample;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while parsing a path expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("unexpected character '{found}' at offset {offset} in path '{path}'")]
    UnexpectedChar {
        path: String,
        found: char,
        offset: usize,
    },
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),
    #[error("unterminated bracket in path '{0}'")]
    UnterminatedBracket(String),
    #[error("invalid bracket selector '{selector}' in path '{path}'")]
    InvalidSelector { path: String, selector: String },
}

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Normalize a sugared path into a `$`-rooted expression.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else if path.starts_with('$') {
        path.to_string()
    } else if path.starts_with('.') || path.starts_with('[') {
        format!("${path}")
    } else {
        format!("$.{path}")
    }
}

/// Parse a path expression into segments.
///
/// # Errors
/// Returns a `PathError` if the expression is not part of the supported
/// subset.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let normalized = normalize_path(path);
    // normalize_path guarantees the leading '$'
    let rest = &normalized[1..];
    let mut segments = Vec::new();
    let mut chars = rest.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '.' => {
                if chars.peek().is_some_and(|&(_, next)| next == '*') {
                    chars.next();
                    segments.push(Segment::Wildcard);
                    continue;
                }
                let mut name = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(PathError::EmptySegment(normalized));
                }
                segments.push(Segment::Key(name));
            }
            '[' => {
                let mut selector = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    match quote {
                        Some(q) if next == q => quote = None,
                        Some(_) => {}
                        None if next == '\'' || next == '"' => quote = Some(next),
                        None if next == ']' => {
                            closed = true;
                            break;
                        }
                        None => {}
                    }
                    selector.push(next);
                }
                if !closed {
                    return Err(PathError::UnterminatedBracket(normalized));
                }
                segments.push(parse_selector(&selector, &normalized)?);
            }
            other => {
                return Err(PathError::UnexpectedChar {
                    path: normalized.clone(),
                    found: other,
                    offset: offset + 1,
                });
            }
        }
    }

    Ok(segments)
}

fn parse_selector(selector: &str, path: &str) -> Result<Segment, PathError> {
    let trimmed = selector.trim();
    if trimmed == "*" {
        return Ok(Segment::Wildcard);
    }
    for q in ['\'', '"'] {
        if let Some(inner) = trimmed
            .strip_prefix(q)
            .and_then(|s| s.strip_suffix(q))
        {
            return Ok(Segment::Key(inner.to_string()));
        }
    }
    trimmed
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| PathError::InvalidSelector {
            path: path.to_string(),
            selector: selector.to_string(),
        })
}

/// Resolve a path against a JSON value.
///
/// Always returns at least one sample; `[None]` means nothing matched.
#[must_use]
pub fn resolve(value: &Value, path: &str) -> Vec<Sample> {
    let Ok(segments) = parse_path(path) else {
        return vec![None];
    };

    let mut current: Vec<&Value> = vec![value];
    for segment in &segments {
        let mut next = Vec::new();
        for node in current {
            step(node, segment, &mut next);
        }
        if next.is_empty() {
            return vec![None];
        }
        current = next;
    }

    current.into_iter().cloned().map(Some).collect()
}

fn step<'a>(node: &'a Value, segment: &Segment, out: &mut Vec<&'a Value>) {
    match (segment, node) {
        (Segment::Key(key), Value::Object(map)) => out.extend(map.get(key)),
        // `.0` on an array behaves like `[0]`
        (Segment::Key(key), Value::Array(items)) => {
            if let Ok(index) = key.parse::<usize>() {
                out.extend(items.get(index));
            }
        }
        (Segment::Index(index), Value::Array(items)) => out.extend(items.get(*index)),
        (Segment::Wildcard, Value::Array(items)) => out.extend(items.iter()),
        (Segment::Wildcard, Value::Object(map)) => out.extend(map.values()),
        _ => {}
    }
}

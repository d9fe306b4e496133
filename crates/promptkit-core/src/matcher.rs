//! Matcher registry.
//!
//! Every [`MatcherName`] maps to exactly one predicate and one description
//! through exhaustive matches, so adding a matcher without implementing both
//! is a compile error.

use crate::pattern::{PatternCompiler, PatternError};
use crate::types::{MatcherName, Sample};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Maximum characters of a rendered value inside a message.
const MAX_RENDERED_CHARS: usize = 200;

/// Errors raised when a matcher is used against its contract.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("{matcher} expects {shape} as its expected value, got {got}")]
    InvalidExpectation {
        matcher: MatcherName,
        shape: &'static str,
        got: String,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Number of expected operands a matcher takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
}

/// Shared services handed to matchers.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    compiler: PatternCompiler,
}

impl MatchContext {
    #[must_use]
    pub const fn new(compiler: PatternCompiler) -> Self {
        Self { compiler }
    }

    #[must_use]
    pub const fn compiler(&self) -> &PatternCompiler {
        &self.compiler
    }

    /// Structural equality used by every matcher.
    #[must_use]
    pub fn deep_equal(&self, a: &Value, b: &Value) -> bool {
        deep_equal(a, b)
    }

    fn sample_equals(&self, sample: &Sample, expected: &Value) -> bool {
        sample.as_ref().is_some_and(|v| self.deep_equal(v, expected))
    }
}

/// Deep equality: object key order is ignored, array order is not, and
/// numbers compare by value (`42 == 42.0`).
#[must_use]
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

#[allow(clippy::float_cmp)]
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if x == y {
        return true;
    }
    if !x.is_f64() && !y.is_f64() {
        return false;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// What a description talks about.
#[derive(Debug, Clone, Copy)]
pub enum Observed<'a> {
    One(&'a Sample),
    Many(&'a [Sample]),
}

impl MatcherName {
    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::ToBeNull => Arity::None,
            Self::ToEqual | Self::ToContain | Self::ToMatch | Self::ToBeOneOf => Arity::One,
        }
    }

    /// Apply the matcher to one resolved value.
    ///
    /// # Errors
    /// Returns `MatchError` when `expected` has the wrong shape for this
    /// matcher or the pattern cannot be compiled or run.
    pub fn evaluate(
        self,
        value: &Sample,
        expected: Option<&Value>,
        ctx: &MatchContext,
    ) -> Result<bool, MatchError> {
        let expected = expected.unwrap_or(&Value::Null);
        match self {
            Self::ToEqual => Ok(ctx.sample_equals(value, expected)),
            Self::ToBeNull => Ok(matches!(value, Some(Value::Null))),
            Self::ToContain => evaluate_contain(value, expected, ctx),
            Self::ToMatch => evaluate_match(value, expected, ctx),
            Self::ToBeOneOf => {
                let Value::Array(options) = expected else {
                    return Err(invalid(self, "an array", expected));
                };
                Ok(options.iter().any(|option| ctx.sample_equals(value, option)))
            }
        }
    }

    /// Human-readable sentence for the asserted or negated case.
    #[must_use]
    pub fn describe(self, observed: Observed<'_>, expected: Option<&Value>, not: bool) -> String {
        let subject = match observed {
            Observed::One(_) => "value",
            Observed::Many(_) => "values",
        };
        let negation = if not { "NOT " } else { "" };
        let expectation = match self {
            Self::ToEqual => format!("to deeply equal {}", render_expected(expected)),
            Self::ToBeNull => "to be null".to_string(),
            Self::ToContain => match expected.and_then(needle) {
                Some(Needle {
                    text,
                    case_insensitive: true,
                }) => format!("to contain {} (case-insensitive)", render_str(text)),
                Some(Needle { text, .. }) => format!("to contain {}", render_str(text)),
                None => format!("to contain {}", render_expected(expected)),
            },
            Self::ToMatch => match expected.and_then(pattern_spec) {
                Some((source, flags)) => format!("to match /{source}/{flags}"),
                None => format!("to match {}", render_expected(expected)),
            },
            Self::ToBeOneOf => format!("to be one of {}", render_expected(expected)),
        };
        format!(
            "expected {subject} {negation}{expectation}, got {}",
            render_observed(observed)
        )
    }
}

struct Needle<'a> {
    text: &'a str,
    case_insensitive: bool,
}

fn needle(expected: &Value) -> Option<Needle<'_>> {
    match expected {
        Value::String(text) => Some(Needle {
            text,
            case_insensitive: false,
        }),
        Value::Object(map) => Some(Needle {
            text: map.get("value")?.as_str()?,
            case_insensitive: flag(map, "caseInsensitive"),
        }),
        _ => None,
    }
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn pattern_spec(expected: &Value) -> Option<(&str, &str)> {
    match expected {
        Value::String(source) => Some((source, "")),
        Value::Object(map) => {
            let source = map.get("source")?.as_str()?;
            let flags = match map.get("flags") {
                None | Some(Value::Null) => "",
                Some(Value::String(flags)) => flags,
                Some(_) => return None,
            };
            Some((source, flags))
        }
        _ => None,
    }
}

fn evaluate_contain(value: &Sample, expected: &Value, ctx: &MatchContext) -> Result<bool, MatchError> {
    match value {
        Some(Value::Array(items)) => Ok(items.iter().any(|item| ctx.deep_equal(item, expected))),
        Some(Value::String(haystack)) => {
            let Some(needle) = needle(expected) else {
                return Err(invalid(
                    MatcherName::ToContain,
                    "a string or {value, caseInsensitive}",
                    expected,
                ));
            };
            if needle.case_insensitive {
                Ok(haystack
                    .to_lowercase()
                    .contains(&needle.text.to_lowercase()))
            } else {
                Ok(haystack.contains(needle.text))
            }
        }
        _ => Ok(false),
    }
}

fn evaluate_match(value: &Sample, expected: &Value, ctx: &MatchContext) -> Result<bool, MatchError> {
    let Some((source, flags)) = pattern_spec(expected) else {
        return Err(invalid(
            MatcherName::ToMatch,
            "a pattern string or {source, flags}",
            expected,
        ));
    };
    let pattern = ctx.compiler().compile(source, flags)?;
    match value {
        Some(Value::String(subject)) => Ok(pattern.is_match(subject)?),
        _ => Ok(false),
    }
}

fn invalid(matcher: MatcherName, shape: &'static str, got: &Value) -> MatchError {
    MatchError::InvalidExpectation {
        matcher,
        shape,
        got: render_value(got),
    }
}

fn clip(rendered: String) -> String {
    let mut chars = rendered.chars();
    let clipped: String = chars.by_ref().take(MAX_RENDERED_CHARS).collect();
    if chars.next().is_some() {
        format!("{clipped}...")
    } else {
        clipped
    }
}

fn render_value(value: &Value) -> String {
    clip(value.to_string())
}

fn render_str(text: &str) -> String {
    render_value(&Value::String(text.to_string()))
}

fn render_sample(sample: &Sample) -> String {
    sample
        .as_ref()
        .map_or_else(|| "undefined".to_string(), render_value)
}

fn render_expected(expected: Option<&Value>) -> String {
    expected.map_or_else(|| "undefined".to_string(), render_value)
}

fn render_observed(observed: Observed<'_>) -> String {
    match observed {
        Observed::One(sample) => render_sample(sample),
        Observed::Many(samples) => {
            let items: Vec<String> = samples.iter().map(render_sample).collect();
            clip(format!("[{}]", items.join(", ")))
        }
    }
}

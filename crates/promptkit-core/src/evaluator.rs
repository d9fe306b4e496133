//! Assertion evaluation against an LLM output.

use crate::matcher::{MatchContext, MatchError, Observed};
use crate::path::resolve;
use crate::types::{Assertion, AssertionResult, EvaluationOutcome, PathMatch, Sample};
use serde_json::Value;
use std::borrow::Cow;
use thiserror::Error;

/// A matcher contract violation, tagged with the offending assertion.
#[derive(Error, Debug)]
#[error("assertion '{assertion_id}': {source}")]
pub struct EvaluationError {
    pub assertion_id: String,
    #[source]
    pub source: MatchError,
}

/// Parse a string output as JSON when possible.
///
/// Non-string values and strings that are not valid JSON are returned as-is.
#[must_use]
pub fn parse_actual(actual: &Value) -> Cow<'_, Value> {
    match actual {
        Value::String(text) => serde_json::from_str(text).map_or(Cow::Borrowed(actual), Cow::Owned),
        _ => Cow::Borrowed(actual),
    }
}

/// Evaluate one assertion against an already parsed root value.
///
/// # Errors
/// Returns `EvaluationError` if the matcher rejects the expectation or the
/// pattern compiler rejects the pattern or subject.
pub fn evaluate_assertion(
    root: &Value,
    assertion: &Assertion,
    ctx: &MatchContext,
) -> Result<AssertionResult, EvaluationError> {
    let samples = resolve(root, &assertion.path);
    let expected = assertion.expected.as_ref();

    let check = |sample: &Sample| {
        assertion
            .matcher
            .evaluate(sample, expected, ctx)
            .map_err(|source| EvaluationError {
                assertion_id: assertion.assertion_id.clone(),
                source,
            })
    };

    // Every sample is checked so contract errors surface regardless of order.
    let verdicts = samples.iter().map(check).collect::<Result<Vec<_>, _>>()?;
    let matched = match assertion.path_match {
        PathMatch::Any => verdicts.iter().any(|&v| v),
        PathMatch::All => verdicts.iter().all(|&v| v),
    };
    let passed = matched != assertion.not;

    let observed = match samples.as_slice() {
        [single] => Observed::One(single),
        many => Observed::Many(many),
    };
    let message = assertion
        .matcher
        .describe(observed, expected, assertion.not);

    Ok(AssertionResult {
        assertion_id: assertion.assertion_id.clone(),
        path: assertion.path.clone(),
        matcher: assertion.matcher,
        not: assertion.not,
        path_match: assertion.path_match,
        passed,
        actual_samples: samples,
        message,
        hash: None,
    })
}

/// Evaluate every assertion against `actual`.
///
/// String outputs are parsed as JSON first; an empty assertion list passes.
///
/// # Errors
/// Returns the first `EvaluationError` raised by any assertion.
pub fn evaluate_assertions(
    actual: &Value,
    assertions: &[Assertion],
    ctx: &MatchContext,
) -> Result<EvaluationOutcome, EvaluationError> {
    let root = parse_actual(actual);
    let results = assertions
        .iter()
        .map(|assertion| evaluate_assertion(&root, assertion, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let passed = results.iter().all(|r| r.passed);
    Ok(EvaluationOutcome { passed, results })
}

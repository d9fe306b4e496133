//! `{{key}}` substitution in prompt text.

use serde_json::Value;
use std::collections::BTreeMap;

/// String form of an input value: strings verbatim, everything else as JSON.
#[must_use]
pub fn input_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace every `{{key}}` whose key is present in `inputs`.
///
/// Substitution is a single pass, so inserted text is never re-scanned.
/// Tokens with no matching input are left untouched.
#[must_use]
pub fn render_prompt(template: &str, inputs: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let key = &after[..end];
        if let Some(value) = inputs.get(key) {
            out.push_str(&input_to_string(value));
            rest = &after[end + 2..];
        } else {
            // Keep the braces and continue scanning right after them.
            out.push_str("{{");
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

/// Names referenced by `{{key}}` tokens, in order of first appearance.
#[must_use]
pub fn template_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let key = &after[..end];
        if !key.is_empty() && !key.contains("{{") && !names.iter().any(|n| n == key) {
            names.push(key.to_string());
        }
        rest = &after[end + 2..];
    }
    names
}

//! Bounded storage of assertion details.
//!
//! Oversized `actualSamples` are replaced by a marker and a SHA-256 hash of
//! the original samples, largest entries first, until the serialized details
//! fit the byte budget.

use crate::types::{AssertionResult, Sample};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Replacement text for truncated samples.
pub const TRUNCATION_MARKER: &str = "...truncated";

/// Default byte budget for a result's details.
pub const DEFAULT_MAX_DETAILS_BYTES: usize = 524_288;

/// Serialized JSON length of a value, in bytes.
#[must_use]
pub fn serialized_len<T: serde::Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len())
}

/// Lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// SHA-256 hex digest of the samples' JSON serialization.
#[must_use]
pub fn samples_hash(samples: &[Sample]) -> String {
    sha256_hex(&serde_json::to_vec(samples).unwrap_or_default())
}

fn marker() -> Vec<Sample> {
    vec![Some(Value::String(TRUNCATION_MARKER.to_string()))]
}

/// Shrink `details` until its JSON serialization fits in `max_bytes`.
///
/// Best effort: when every entry is truncated and the budget is still
/// exceeded, truncated entries lose their samples entirely but keep the hash.
#[must_use]
pub fn truncate_details(mut details: Vec<AssertionResult>, max_bytes: usize) -> Vec<AssertionResult> {
    let mut total = serialized_len(&details);
    if total <= max_bytes {
        return details;
    }

    let marker = marker();
    let marker_len = serialized_len(&marker);

    // Stable sort keeps position order among equal sizes.
    let mut order: Vec<(usize, usize)> = details
        .iter()
        .enumerate()
        .map(|(index, d)| (index, serialized_len(&d.actual_samples)))
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1));

    for (index, samples_len) in order {
        if total <= max_bytes {
            break;
        }
        if samples_len <= marker_len {
            continue;
        }
        let entry = &mut details[index];
        let before = serialized_len(&*entry);
        entry.hash = Some(samples_hash(&entry.actual_samples));
        entry.actual_samples.clone_from(&marker);
        let after = serialized_len(&*entry);
        total = total.saturating_sub(before).saturating_add(after);
    }

    if total > max_bytes {
        for entry in details.iter_mut().filter(|d| d.hash.is_some()) {
            entry.actual_samples.clear();
        }
        tracing::warn!(
            max_bytes,
            size = serialized_len(&details),
            "assertion details still exceed budget after truncation"
        );
    }

    details
}

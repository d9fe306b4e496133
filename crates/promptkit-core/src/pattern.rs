//! Safe compilation of user-authored regular expressions.
//!
//! Length and flag checks run before the regex engine sees the source. The
//! engine itself matches in linear time and is given a compiled-size ceiling,
//! so an accepted pattern cannot backtrack catastrophically or allocate
//! without bound.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Default maximum pattern source length in characters.
pub const DEFAULT_MAX_SOURCE_LEN: usize = 1024;

/// Default maximum subject length in characters.
pub const DEFAULT_MAX_SUBJECT_LEN: usize = 100_000;

/// Default allowed flag characters.
pub const DEFAULT_ALLOWED_FLAGS: &str = "imsu";

/// Flags the engine understands.
pub const SUPPORTED_FLAGS: &str = "imsu";

/// Compiled program size ceiling passed to the engine.
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Errors that can occur while compiling or running a pattern.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("regex source length {len} exceeds maximum length of {max}")]
    PatternTooLong { len: usize, max: usize },
    #[error("regex flag '{flag}' is not allowed (allowed flags: \"{allowed}\")")]
    DisallowedFlag { flag: char, allowed: String },
    #[error("regex flag '{0}' is repeated")]
    DuplicateFlag(char),
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("match subject length {len} exceeds maximum length of {max}")]
    SubjectTooLong { len: usize, max: usize },
}

/// Resource limits applied to user patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternLimits {
    pub max_source_len: usize,
    pub max_subject_len: usize,
    pub allowed_flags: String,
}

impl Default for PatternLimits {
    fn default() -> Self {
        Self {
            max_source_len: DEFAULT_MAX_SOURCE_LEN,
            max_subject_len: DEFAULT_MAX_SUBJECT_LEN,
            allowed_flags: DEFAULT_ALLOWED_FLAGS.to_string(),
        }
    }
}

/// Compiles patterns under a fixed set of limits.
#[derive(Debug, Clone, Default)]
pub struct PatternCompiler {
    limits: PatternLimits,
}

impl PatternCompiler {
    #[must_use]
    pub const fn new(limits: PatternLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub const fn limits(&self) -> &PatternLimits {
        &self.limits
    }

    /// Compile `source` with JavaScript-style `flags`.
    ///
    /// # Errors
    /// Returns `PatternTooLong`, `DisallowedFlag`, `DuplicateFlag` or
    /// `InvalidPattern`, checked in that order.
    pub fn compile(&self, source: &str, flags: &str) -> Result<Pattern, PatternError> {
        let len = source.chars().count();
        if len > self.limits.max_source_len {
            return Err(PatternError::PatternTooLong {
                len,
                max: self.limits.max_source_len,
            });
        }

        let mut seen = String::with_capacity(flags.len());
        for flag in flags.chars() {
            if !self.limits.allowed_flags.contains(flag) {
                return Err(PatternError::DisallowedFlag {
                    flag,
                    allowed: self.limits.allowed_flags.clone(),
                });
            }
            if seen.contains(flag) {
                return Err(PatternError::DuplicateFlag(flag));
            }
            seen.push(flag);
        }

        // `u` is accepted for compatibility; the engine always runs in Unicode mode.
        let regex = RegexBuilder::new(source)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .size_limit(COMPILED_SIZE_LIMIT)
            .build()
            .map_err(|e| PatternError::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            })?;

        Ok(Pattern {
            regex,
            source: source.to_string(),
            flags: flags.to_string(),
            max_subject_len: self.limits.max_subject_len,
        })
    }
}

/// A compiled, limit-checked pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    source: String,
    flags: String,
    max_subject_len: usize,
}

impl Pattern {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// Test the pattern against `subject`.
    ///
    /// # Errors
    /// Returns `PatternError::SubjectTooLong` if the subject exceeds the limit.
    pub fn is_match(&self, subject: &str) -> Result<bool, PatternError> {
        // Byte length bounds the char count from above; only count when needed.
        if subject.len() > self.max_subject_len {
            let len = subject.chars().count();
            if len > self.max_subject_len {
                return Err(PatternError::SubjectTooLong {
                    len,
                    max: self.max_subject_len,
                });
            }
        }
        Ok(self.regex.is_match(subject))
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

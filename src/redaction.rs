//! Per-build redaction registry.
//!
//! Every value resolved during a build is registered here before it is handed
//! back to the caller. The log-recording pipeline calls [`redact`] on each
//! line before persisting it; by that point the registry is guaranteed to
//! contain every value the line could mention.
//!
//! [`redact`]: RedactionRegistry::redact

use crate::context::BuildId;
use dashmap::DashMap;
use zeroize::Zeroize;

/// What registered values are replaced with in redacted text.
pub const REDACTED_PLACEHOLDER: &str = "<redacted>";

/// Process-local registry of secret values, one set per active build.
///
/// Sets are created at build start and discarded at build end; values from
/// one build never affect another build's log lines.
#[derive(Debug, Default)]
pub struct RedactionRegistry {
    // Values kept sorted longest-first so a secret that is a substring of
    // another cannot clip the longer match.
    builds: DashMap<BuildId, Vec<String>>,
}

impl RedactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the redaction set for a build. Idempotent.
    pub fn begin_build(&self, build: BuildId) {
        self.builds.entry(build).or_default();
    }

    /// Discard a build's set, wiping the stored values.
    pub fn finish_build(&self, build: BuildId) {
        if let Some((_, mut values)) = self.builds.remove(&build) {
            for value in &mut values {
                value.zeroize();
            }
        }
    }

    /// Add a resolved value to a build's set.
    pub fn register(&self, build: BuildId, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut entry = self.builds.entry(build).or_default();
        if entry.iter().any(|existing| existing == value) {
            return;
        }
        entry.push(value.to_string());
        entry.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Replace every occurrence of every value registered for `build`.
    /// Text for builds with no registered set passes through untouched.
    pub fn redact(&self, build: BuildId, text: &str) -> String {
        let Some(values) = self.builds.get(&build) else {
            return text.to_string();
        };
        let mut out = text.to_string();
        for value in values.iter() {
            out = out.replace(value, REDACTED_PLACEHOLDER);
        }
        out
    }
}

//! Build-scoped resolution context.
//!
//! Every resolve and provision call carries a [`BuildContext`] instead of
//! reading any process-global "current build" state. The context owns the
//! build's slice of the redaction registry and remembers which providers have
//! failed terminally during this build.

use crate::redaction::RedactionRegistry;
use crate::value::SecretValue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Identifier of one build in the execution engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BuildId(u64);

impl BuildId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for BuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-build state threaded through every resolution.
///
/// Creating a context opens the build's redaction set; call
/// [`finish`](BuildContext::finish) when the build completes to discard it.
pub struct BuildContext {
    build_id: BuildId,
    redaction: Arc<RedactionRegistry>,
    quarantined: RwLock<HashSet<String>>,
}

impl BuildContext {
    pub fn new(build_id: BuildId, redaction: Arc<RedactionRegistry>) -> Self {
        redaction.begin_build(build_id);
        Self {
            build_id,
            redaction,
            quarantined: RwLock::new(HashSet::new()),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn redaction(&self) -> &Arc<RedactionRegistry> {
        &self.redaction
    }

    /// Drop the build's redaction set. Called by the execution engine once
    /// the last log line of the build has been recorded.
    pub fn finish(self) {
        self.redaction.finish_build(self.build_id);
    }

    /// Register a resolved value for redaction. Must happen before the value
    /// is returned to whoever asked for it.
    pub(crate) fn register_secret(&self, value: &SecretValue) {
        self.redaction.register(self.build_id, value.reveal());
    }

    /// Disable a provider for the remainder of this build.
    pub(crate) fn quarantine(&self, provider: &str) {
        self.quarantined.write().insert(provider.to_string());
    }

    pub(crate) fn is_quarantined(&self, provider: &str) -> bool {
        self.quarantined.read().contains(provider)
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("build_id", &self.build_id)
            .field("quarantined", &*self.quarantined.read())
            .finish()
    }
}

//! Secret provider backends.
//!
//! A provider resolves parsed identifiers against one backend: the local
//! filesystem, a GPG password store, or a Vault KV engine. Providers are
//! registered with the [`SecretManager`](crate::manager::SecretManager) in
//! precedence order; the closed variant set here is the extension point for
//! new backends.

mod file;
mod pass;
mod vault;
mod vault_auth;

pub use file::FileSecretProvider;
pub use pass::PassSecretProvider;
pub use vault::{KvApiVersion, VaultKvSecretProvider};
pub use vault_auth::{AuthSession, VaultAuthenticator};

use crate::error::SecretError;
use crate::identifier::{SecretIdentifier, Splitter};
use crate::value::SecretValue;
use async_trait::async_trait;

/// Result of asking one provider for one identifier.
///
/// `NotFound` is ordinary fallthrough, not a failure: the manager moves on to
/// the next provider. Real failures travel as [`SecretError`].
#[derive(Debug)]
pub enum FetchOutcome {
    Found(SecretValue),
    NotFound,
}

impl FetchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }

    pub fn into_value(self) -> Option<SecretValue> {
        match self {
            FetchOutcome::Found(value) => Some(value),
            FetchOutcome::NotFound => None,
        }
    }
}

/// One credential backend.
///
/// Implementations must tolerate concurrent `fetch` calls; configuration is
/// immutable after construction and any mutable session state is managed
/// internally.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Stable name used in logs, provenance, and quarantine bookkeeping.
    fn name(&self) -> &str;

    /// How raw references are split for this provider. `None` means the whole
    /// raw string is the path and no key can ever be present.
    fn splitter(&self) -> Option<&Splitter> {
        None
    }

    /// Cheap availability probe, checked before each fetch attempt.
    fn is_available(&self) -> bool {
        true
    }

    /// Resolve one identifier against the backend.
    async fn fetch(&self, identifier: &SecretIdentifier) -> Result<FetchOutcome, SecretError>;
}

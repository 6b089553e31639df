//! Error taxonomy for secret resolution and provisioning.
//!
//! The variants drive the manager's fallthrough behavior: `NotFound` is not an
//! error at all (providers report it through [`FetchOutcome`]), `Auth` and
//! `ProviderUnavailable` skip to the next provider, and `MalformedIdentifier`
//! aborts the render immediately. Secret values never appear in any message —
//! only identifier paths and provider names do.
//!
//! [`FetchOutcome`]: crate::providers::FetchOutcome

use crate::context::BuildId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    /// The identifier cannot be used with the provider that received it.
    /// Never retried; fails the requesting render immediately.
    #[error("malformed secret identifier '{identifier}': {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    /// Credential exchange with a backend failed. `terminal` marks failures
    /// with no renewal path (a rejected static token): the provider is
    /// skipped for the rest of the build.
    #[error("authentication for provider '{provider}' failed: {reason}")]
    Auth {
        provider: String,
        reason: String,
        terminal: bool,
    },

    /// Transport or backend failure. Terminal for the provider for the rest
    /// of the build, but other providers still get a chance.
    #[error("secret provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// Every registered provider was exhausted. The retained cause, if any,
    /// is the last provider-level failure seen during fallthrough.
    #[error("secret '{name}' could not be resolved by any provider")]
    SecretNotFound {
        name: String,
        #[source]
        cause: Option<Box<SecretError>>,
    },

    /// A second scope tried to provision a path already owned by an active
    /// scope of the same build.
    #[error("path '{}' is already provisioned for build {build}", path.display())]
    ConflictingProvision { build: BuildId, path: PathBuf },

    /// Writing or removing a provisioned secret file failed.
    #[error("provisioning secret file '{}' failed", path.display())]
    ProvisionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SecretError {
    /// Whether this failure disables the provider that produced it for the
    /// remainder of the build.
    pub(crate) fn quarantines_provider(&self) -> bool {
        match self {
            SecretError::Auth { terminal, .. } => *terminal,
            SecretError::ProviderUnavailable { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_auth_failure_quarantines() {
        let err = SecretError::Auth {
            provider: "vault-kv".into(),
            reason: "server rejected token".into(),
            terminal: true,
        };
        assert!(err.quarantines_provider());
    }

    #[test]
    fn renewable_auth_failure_does_not_quarantine() {
        let err = SecretError::Auth {
            provider: "vault-kv".into(),
            reason: "approle login rejected".into(),
            terminal: false,
        };
        assert!(!err.quarantines_provider());
    }

    #[test]
    fn unavailable_quarantines() {
        let err = SecretError::ProviderUnavailable {
            provider: "pass".into(),
            reason: "timed out".into(),
        };
        assert!(err.quarantines_provider());
    }

    #[test]
    fn not_found_carries_retained_cause() {
        let cause = SecretError::Auth {
            provider: "vault-kv".into(),
            reason: "approle login rejected".into(),
            terminal: false,
        };
        let err = SecretError::SecretNotFound {
            name: "db-password".into(),
            cause: Some(Box::new(cause)),
        };
        let message = err.to_string();
        assert!(message.contains("db-password"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

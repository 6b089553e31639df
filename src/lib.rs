//! Secret resolution and provisioning core for the Reefbuild automation
//! platform.
//!
//! Build configuration references secrets by opaque identifiers; this crate
//! resolves them at the last possible moment through an ordered chain of
//! backends (local files, a GPG password store, Vault KV), registers every
//! resolved value for log redaction before anyone can print it, and manages
//! the bounded lifetime of secrets delivered to workers as files.
//!
//! The pieces, bottom up:
//!
//! - [`identifier`] — parsing raw `path[:key]` references with escapable
//!   delimiters
//! - [`providers`] — the backend implementations behind one
//!   [`SecretProvider`] capability
//! - [`manager`] — ordered fallthrough resolution, wired from [`config`]
//! - [`render`] — deferred direct and templated interpolation
//! - [`redaction`] — the per-build value registry the log pipeline consults
//! - [`provision`] — scoped materialization of secrets as worker files

pub mod config;
pub mod context;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod manager;
pub mod providers;
pub mod provision;
pub mod redaction;
pub mod render;
pub mod value;

pub use config::{build_manager, build_providers, ProviderConfig, SecretsConfig};
pub use context::{BuildContext, BuildId};
pub use error::SecretError;
pub use identifier::{SecretIdentifier, Splitter};
pub use manager::SecretManager;
pub use providers::{
    AuthSession, FetchOutcome, FileSecretProvider, KvApiVersion, PassSecretProvider,
    SecretProvider, VaultAuthenticator, VaultKvSecretProvider,
};
pub use provision::{ProvisionScope, Provisioner, SecretFileSpec};
pub use redaction::{RedactionRegistry, REDACTED_PLACEHOLDER};
pub use render::Renderable;
pub use value::SecretValue;

//! Provider configuration records.
//!
//! These are the records the build-configuration loader hands over when it
//! wires a master: an ordered list of provider declarations, set once and
//! immutable afterwards. Ordering in the list is resolution precedence.

use crate::identifier::Splitter;
use crate::manager::SecretManager;
use crate::providers::{
    FileSecretProvider, KvApiVersion, PassSecretProvider, SecretProvider,
    VaultAuthenticator, VaultKvSecretProvider,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Top-level secrets configuration for one master.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// One provider declaration. The tag picks the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    File(FileProviderConfig),
    Pass(PassProviderConfig),
    VaultKv(VaultKvProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProviderConfig {
    /// Directory whose files are the secrets.
    pub directory: PathBuf,
    /// Remove trailing newline characters from file contents.
    #[serde(default = "default_strip")]
    pub strip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassProviderConfig {
    /// Password store location; the pipeline's own default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    /// GPG passphrase for non-interactive decryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Pipeline binary; gopass-compatible replacements work too.
    #[serde(default = "default_pass_command")]
    pub command: String,
    #[serde(default = "default_pass_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultKvProviderConfig {
    /// Vault server URL, e.g. `https://vault.example.com:8200`.
    pub server: String,
    #[serde(default = "default_vault_mount")]
    pub mount: String,
    #[serde(default)]
    pub api_version: KvApiVersion,
    pub auth: VaultAuthConfig,
    /// Delimiter splitting path from key in raw references.
    #[serde(default = "default_vault_delimiter")]
    pub delimiter: char,
    /// Escape character making the delimiter literal.
    #[serde(default = "default_vault_escape")]
    pub escape: char,
    #[serde(default = "default_vault_timeout_secs")]
    pub timeout_secs: u64,
    /// Renew AppRole sessions this many seconds before expiry.
    #[serde(default = "default_renewal_margin_secs")]
    pub renewal_margin_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum VaultAuthConfig {
    Token {
        token: String,
    },
    AppRole {
        role_id: String,
        secret_id: String,
        #[serde(default = "default_login_mount")]
        login_mount: String,
    },
}

fn default_strip() -> bool {
    true
}

fn default_pass_command() -> String {
    "pass".to_string()
}

fn default_pass_timeout_secs() -> u64 {
    30
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

fn default_vault_delimiter() -> char {
    ':'
}

fn default_vault_escape() -> char {
    '\\'
}

fn default_vault_timeout_secs() -> u64 {
    10
}

fn default_renewal_margin_secs() -> u64 {
    30
}

fn default_login_mount() -> String {
    "approle".to_string()
}

/// Instantiate the providers declared in `config`, in declaration order.
pub fn build_providers(config: &SecretsConfig) -> Result<Vec<Arc<dyn SecretProvider>>> {
    config.providers.iter().map(build_provider).collect()
}

/// Instantiate the providers and register them with a fresh manager.
pub fn build_manager(config: &SecretsConfig) -> Result<SecretManager> {
    let mut manager = SecretManager::new();
    for provider in build_providers(config)? {
        manager.register(provider);
    }
    Ok(manager)
}

fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn SecretProvider>> {
    match config {
        ProviderConfig::File(file) => Ok(Arc::new(FileSecretProvider::new(
            &file.directory,
            file.strip,
        ))),
        ProviderConfig::Pass(pass) => {
            let mut provider = PassSecretProvider::new()
                .with_command(&pass.command)
                .with_timeout(Duration::from_secs(pass.timeout_secs));
            if let Some(dir) = &pass.store_dir {
                provider = provider.with_store_dir(dir);
            }
            if let Some(passphrase) = &pass.passphrase {
                provider = provider.with_passphrase(passphrase);
            }
            Ok(Arc::new(provider))
        }
        ProviderConfig::VaultKv(vault) => {
            let server = Url::parse(&vault.server)
                .with_context(|| format!("invalid vault server url '{}'", vault.server))?;
            anyhow::ensure!(
                matches!(server.scheme(), "http" | "https"),
                "vault server url '{}' must use http or https",
                vault.server
            );

            let auth = match &vault.auth {
                VaultAuthConfig::Token { token } => VaultAuthenticator::static_token(token),
                VaultAuthConfig::AppRole {
                    role_id,
                    secret_id,
                    login_mount,
                } => VaultAuthenticator::app_role(role_id, secret_id)
                    .with_login_mount(login_mount)
                    .with_renewal_margin(Duration::from_secs(vault.renewal_margin_secs)),
            };

            Ok(Arc::new(
                VaultKvSecretProvider::new(&server, &vault.mount, vault.api_version, auth)
                    .with_splitter(Splitter::new(vault.delimiter, vault.escape))
                    .with_timeout(Duration::from_secs(vault.timeout_secs)),
            ))
        }
    }
}

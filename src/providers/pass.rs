//! Password-store secret provider.
//!
//! Shells out to the `pass` decryption pipeline (gopass works too) and treats
//! the first line of decrypted output as the secret. The store location and
//! an optional GPG passphrase are forwarded through the environment variables
//! the pipeline already understands.

use super::{FetchOutcome, SecretProvider};
use crate::error::SecretError;
use crate::identifier::SecretIdentifier;
use crate::value::SecretValue;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default maximum time for one decryption run.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves secrets from a GPG-encrypted password store.
pub struct PassSecretProvider {
    store_dir: Option<PathBuf>,
    passphrase: Option<String>,
    command: String,
    timeout: Duration,
}

impl PassSecretProvider {
    pub fn new() -> Self {
        Self {
            store_dir: None,
            passphrase: None,
            command: "pass".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a store other than the pipeline's default (`~/.password-store`).
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Passphrase handed to GPG for non-interactive decryption.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Override the pipeline binary (e.g. `gopass`).
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PassSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretProvider for PassSecretProvider {
    fn name(&self) -> &str {
        "pass"
    }

    fn is_available(&self) -> bool {
        match &self.store_dir {
            Some(dir) => dir.is_dir(),
            None => true,
        }
    }

    async fn fetch(&self, identifier: &SecretIdentifier) -> Result<FetchOutcome, SecretError> {
        if identifier.key().is_some() {
            return Err(SecretError::MalformedIdentifier {
                identifier: identifier.to_string(),
                reason: "password-store entries have no key component".into(),
            });
        }
        let entry = identifier.path();

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg(&entry);
        if let Some(dir) = &self.store_dir {
            cmd.env("PASSWORD_STORE_DIR", dir);
        }
        if let Some(passphrase) = &self.passphrase {
            cmd.env(
                "PASSWORD_STORE_GPG_OPTS",
                format!("--passphrase {passphrase}"),
            );
        }
        // No stdin: the pipeline must never wait on a pinentry prompt.
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let result = tokio::time::timeout(self.timeout, cmd.output()).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(command = %self.command, "decryption pipeline not installed");
                return Ok(FetchOutcome::NotFound);
            }
            Ok(Err(err)) => {
                return Err(SecretError::ProviderUnavailable {
                    provider: self.name().to_string(),
                    reason: format!("running '{}' failed: {err}", self.command),
                });
            }
            Err(_) => {
                return Err(SecretError::ProviderUnavailable {
                    provider: self.name().to_string(),
                    reason: format!(
                        "decryption timed out after {}s",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        if !output.status.success() {
            // Missing entry and wrong key both exit non-zero; either way the
            // entry is unusable here and fallthrough continues.
            debug!(
                secret = %identifier,
                status = %output.status,
                "decryption pipeline reported failure"
            );
            return Ok(FetchOutcome::NotFound);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next() {
            Some(first_line) if !first_line.is_empty() => Ok(FetchOutcome::Found(
                SecretValue::new(first_line, self.name()),
            )),
            _ => {
                debug!(secret = %identifier, "entry decrypted to empty output");
                Ok(FetchOutcome::NotFound)
            }
        }
    }
}

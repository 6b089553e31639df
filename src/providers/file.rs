//! Filesystem secret provider.
//!
//! Resolves an identifier path to a file of the same name under a configured
//! directory. Intended for secrets mounted onto the master host by an
//! operator or an orchestration layer.

use super::{FetchOutcome, SecretProvider};
use crate::error::SecretError;
use crate::identifier::SecretIdentifier;
use crate::value::SecretValue;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Resolves secrets from files in a directory.
pub struct FileSecretProvider {
    directory: PathBuf,
    strip: bool,
}

impl FileSecretProvider {
    /// `strip` removes trailing newline characters from file contents,
    /// matching how editors and `echo` tend to write one-line secrets.
    pub fn new(directory: impl Into<PathBuf>, strip: bool) -> Self {
        Self {
            directory: directory.into(),
            strip,
        }
    }

    /// Map an identifier path to a file path, refusing anything that could
    /// escape the secrets directory.
    fn entry_path(&self, identifier: &SecretIdentifier) -> Result<PathBuf, SecretError> {
        let path = identifier.path();
        let relative = Path::new(&path);
        let escapes = path.is_empty()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(SecretError::MalformedIdentifier {
                identifier: identifier.to_string(),
                reason: "must name a file inside the secrets directory".into(),
            });
        }
        Ok(self.directory.join(relative))
    }

    /// Names of the secrets currently present in the directory.
    pub async fn list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.directory).await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        names
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn is_available(&self) -> bool {
        self.directory.is_dir()
    }

    async fn fetch(&self, identifier: &SecretIdentifier) -> Result<FetchOutcome, SecretError> {
        if identifier.key().is_some() {
            return Err(SecretError::MalformedIdentifier {
                identifier: identifier.to_string(),
                reason: "file secrets have no key component".into(),
            });
        }

        let path = self.entry_path(identifier)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let value = if self.strip {
                    contents.trim_end_matches(['\n', '\r']).to_string()
                } else {
                    contents
                };
                Ok(FetchOutcome::Found(SecretValue::new(value, self.name())))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(secret = %identifier, "no file for secret");
                Ok(FetchOutcome::NotFound)
            }
            Err(err) => Err(SecretError::ProviderUnavailable {
                provider: self.name().to_string(),
                reason: format!("reading '{}' failed: {err}", identifier.path()),
            }),
        }
    }
}

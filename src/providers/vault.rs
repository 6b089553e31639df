//! HashiCorp Vault KV secret provider.
//!
//! Reads one field of a KV secret over the Vault HTTP API. Supports both KV
//! engine versions; the only behavioral difference between them — the extra
//! `data` path segment and response nesting level — lives in [`KvApiVersion`]
//! so call sites never branch on the version themselves.

use super::vault_auth::VaultAuthenticator;
use super::{FetchOutcome, SecretProvider};
use crate::error::SecretError;
use crate::identifier::{SecretIdentifier, Splitter};
use crate::value::SecretValue;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// KV engine version. The path shape and response nesting are derived from
/// this table; everything else about a read is identical across versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvApiVersion {
    V1,
    #[default]
    V2,
}

impl KvApiVersion {
    /// Read path for `path` under `mount`, relative to the server root.
    pub(crate) fn read_path(&self, mount: &str, path: &str) -> String {
        match self {
            KvApiVersion::V1 => format!("v1/{mount}/{path}"),
            KvApiVersion::V2 => format!("v1/{mount}/data/{path}"),
        }
    }

    /// The key/value map inside a read response body. V2 nests the fields one
    /// level deeper under a second `data` object.
    pub(crate) fn secret_map<'a>(
        &self,
        body: &'a serde_json::Value,
    ) -> Option<&'a serde_json::Map<String, serde_json::Value>> {
        let data = body.get("data")?.as_object()?;
        match self {
            KvApiVersion::V1 => Some(data),
            KvApiVersion::V2 => data.get("data")?.as_object(),
        }
    }
}

/// Resolves secrets from a Vault KV engine.
pub struct VaultKvSecretProvider {
    base_url: String,
    mount: String,
    api_version: KvApiVersion,
    auth: VaultAuthenticator,
    splitter: Splitter,
    timeout: Duration,
    client: reqwest::Client,
}

impl VaultKvSecretProvider {
    pub fn new(
        server: &Url,
        mount: impl Into<String>,
        api_version: KvApiVersion,
        auth: VaultAuthenticator,
    ) -> Self {
        Self {
            base_url: server.as_str().trim_end_matches('/').to_string(),
            mount: mount.into(),
            api_version,
            auth,
            splitter: Splitter::default(),
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Override the delimiter/escape pair used to split raw references.
    pub fn with_splitter(mut self, splitter: Splitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn unavailable(&self, reason: String) -> SecretError {
        SecretError::ProviderUnavailable {
            provider: self.name().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl SecretProvider for VaultKvSecretProvider {
    fn name(&self) -> &str {
        "vault-kv"
    }

    fn splitter(&self) -> Option<&Splitter> {
        Some(&self.splitter)
    }

    async fn fetch(&self, identifier: &SecretIdentifier) -> Result<FetchOutcome, SecretError> {
        let Some(key) = identifier.key() else {
            return Err(SecretError::MalformedIdentifier {
                identifier: identifier.to_string(),
                reason: "vault kv references need both a path and a key".into(),
            });
        };
        let path = identifier.path();

        let session = self.auth.ensure_session(&self.client, &self.base_url).await?;
        let url = format!(
            "{}/{}",
            self.base_url,
            self.api_version.read_path(&self.mount, &path)
        );

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", session.token())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.unavailable(format!("read request failed: {err}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(secret = %path, "no secret at path");
                Ok(FetchOutcome::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let status = response.status();
                let terminal = self.auth.is_static();
                self.auth.invalidate().await;
                Err(SecretError::Auth {
                    provider: self.name().to_string(),
                    reason: format!("server rejected token (status {status})"),
                    terminal,
                })
            }
            status if status.is_success() => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|err| self.unavailable(format!("unreadable response: {err}")))?;
                let Some(map) = self.api_version.secret_map(&body) else {
                    return Err(
                        self.unavailable("response missing the data envelope".to_string())
                    );
                };
                // A missing path 404s; a present path with a missing key lands
                // here. Both read as NotFound so callers cannot tell which
                // half of the reference was wrong.
                match map.get(key) {
                    Some(serde_json::Value::String(value)) => Ok(FetchOutcome::Found(
                        SecretValue::new(value.clone(), self.name()),
                    )),
                    Some(serde_json::Value::Number(n)) => Ok(FetchOutcome::Found(
                        SecretValue::new(n.to_string(), self.name()),
                    )),
                    Some(serde_json::Value::Bool(b)) => Ok(FetchOutcome::Found(
                        SecretValue::new(b.to_string(), self.name()),
                    )),
                    Some(_) | None => {
                        debug!(secret = %path, "field absent or not a scalar");
                        Ok(FetchOutcome::NotFound)
                    }
                }
            }
            status => Err(self.unavailable(format!("unexpected status {status}"))),
        }
    }
}

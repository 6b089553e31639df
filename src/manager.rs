//! Ordered provider registry and resolution fallthrough.

use crate::context::BuildContext;
use crate::error::SecretError;
use crate::identifier::SecretIdentifier;
use crate::providers::{FetchOutcome, SecretProvider};
use crate::value::SecretValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves raw secret references by querying providers in registration
/// order until one succeeds.
///
/// Nothing is cached between calls: a backend value may rotate mid-build, and
/// serving a stale copy would defeat the rotation. Every successful
/// resolution registers the value in the build's redaction set before the
/// value is returned.
#[derive(Default)]
pub struct SecretManager {
    providers: Vec<Arc<dyn SecretProvider>>,
}

impl SecretManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Registration order is precedence order.
    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `name`, trying each provider in order. The first non-NotFound
    /// outcome wins. Provider-level auth and availability failures fall
    /// through to the next provider but are retained and surfaced if every
    /// provider exhausts.
    pub async fn resolve(
        &self,
        ctx: &BuildContext,
        name: &str,
    ) -> Result<SecretValue, SecretError> {
        let mut retained: Option<SecretError> = None;

        for provider in &self.providers {
            if ctx.is_quarantined(provider.name()) {
                debug!(provider = provider.name(), "skipping provider quarantined for this build");
                continue;
            }
            if !provider.is_available() {
                debug!(provider = provider.name(), "provider reports unavailable, skipping");
                continue;
            }

            let identifier = match provider.splitter() {
                Some(splitter) => splitter.parse(name),
                None => SecretIdentifier::opaque(name),
            };

            match provider.fetch(&identifier).await {
                Ok(FetchOutcome::Found(value)) => {
                    // Redaction registration must precede returning the value:
                    // once the caller has it, it can show up in captured output.
                    ctx.register_secret(&value);
                    debug!(
                        provider = provider.name(),
                        secret = %identifier.path(),
                        "resolved secret"
                    );
                    return Ok(value);
                }
                Ok(FetchOutcome::NotFound) => {
                    debug!(provider = provider.name(), secret = %identifier.path(), "not found");
                }
                Err(err @ SecretError::MalformedIdentifier { .. }) => return Err(err),
                Err(err) => {
                    if err.quarantines_provider() {
                        ctx.quarantine(provider.name());
                    }
                    warn!(
                        provider = provider.name(),
                        error = %err,
                        "provider failed, continuing fallthrough"
                    );
                    retained = Some(err);
                }
            }
        }

        Err(SecretError::SecretNotFound {
            name: name.to_string(),
            cause: retained.map(Box::new),
        })
    }
}

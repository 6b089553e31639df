//! Opaque resolved secret values.

use std::fmt;
use zeroize::Zeroizing;

/// A resolved secret plus its provenance.
///
/// The payload is only reachable through [`reveal`](SecretValue::reveal):
/// `Debug` redacts it, there is no `Display`, and the backing buffer is wiped
/// when the value is dropped.
#[derive(Clone)]
pub struct SecretValue {
    value: Zeroizing<String>,
    provider: String,
}

impl SecretValue {
    pub fn new(value: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
            provider: provider.into(),
        }
    }

    /// The secret payload. Callers own the obligation not to log it.
    pub fn reveal(&self) -> &str {
        &self.value
    }

    /// Name of the provider that resolved this value.
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("provider", &self.provider)
            .field("value", &"<redacted>")
            .finish()
    }
}

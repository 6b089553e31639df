//! Vault authenticators: static token and AppRole.
//!
//! An authenticator produces the bearer token a KV read presents. Static
//! tokens never renew; AppRole exchanges a role id and secret id for a
//! short-lived session token and renews it transparently shortly before
//! expiry. Renewal is single-flight: concurrent fetches that hit an expired
//! session trigger exactly one login, and every waiter observes its result.

use crate::error::SecretError;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Renew this long before the server-reported expiry.
const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// A bearer credential with an optional expiry instant.
///
/// Owned by the authenticator that created it; callers only ever see clones.
#[derive(Clone)]
pub struct AuthSession {
    token: String,
    expiry: Option<Instant>,
}

impl AuthSession {
    pub fn new(token: impl Into<String>, expiry: Option<Instant>) -> Self {
        Self {
            token: token.into(),
            expiry,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// How the Vault provider authenticates. Closed set: extend by adding a
/// variant, not by open-ended plugging.
pub enum VaultAuthenticator {
    Static(StaticToken),
    AppRole(AppRole),
}

impl VaultAuthenticator {
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(StaticToken {
            token: token.into(),
        })
    }

    pub fn app_role(role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self::AppRole(AppRole {
            role_id: role_id.into(),
            secret_id: secret_id.into(),
            login_mount: "approle".to_string(),
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            session: Mutex::new(None),
        })
    }

    /// Login path mount for AppRole (no effect on static tokens).
    pub fn with_login_mount(mut self, mount: impl Into<String>) -> Self {
        if let Self::AppRole(approle) = &mut self {
            approle.login_mount = mount.into();
        }
        self
    }

    /// Renewal safety margin for AppRole (no effect on static tokens).
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        if let Self::AppRole(approle) = &mut self {
            approle.renewal_margin = margin;
        }
        self
    }

    /// Whether a rejected token is terminal: static tokens have no renewal
    /// path, so one rejection disables the provider for the build.
    pub(crate) fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// Yield a session valid for at least the renewal margin, renewing first
    /// when needed.
    pub(crate) async fn ensure_session(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<AuthSession, SecretError> {
        match self {
            Self::Static(auth) => Ok(AuthSession::new(auth.token.clone(), None)),
            Self::AppRole(auth) => auth.ensure_session(client, base_url).await,
        }
    }

    /// Forget the current session after the server rejected it, so the next
    /// fetch re-authenticates instead of replaying a dead token.
    pub(crate) async fn invalidate(&self) {
        if let Self::AppRole(auth) = self {
            *auth.session.lock().await = None;
        }
    }
}

/// Caller-supplied token, used as-is for the whole build.
pub struct StaticToken {
    token: String,
}

/// Role id + secret id exchange for a short-lived session token.
pub struct AppRole {
    role_id: String,
    secret_id: String,
    login_mount: String,
    renewal_margin: Duration,
    // Holding this lock across the login request is what makes renewal
    // single-flight: waiters queue here and find the fresh session on entry.
    session: Mutex<Option<AuthSession>>,
}

impl AppRole {
    fn needs_renewal(&self, session: &AuthSession) -> bool {
        match session.expiry() {
            Some(expiry) => Instant::now() + self.renewal_margin >= expiry,
            None => false,
        }
    }

    async fn ensure_session(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<AuthSession, SecretError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !self.needs_renewal(session) {
                return Ok(session.clone());
            }
        }

        debug!(mount = %self.login_mount, "approle session missing or near expiry, logging in");
        match self.login(client, base_url).await {
            Ok(session) => {
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(err) => {
                // Cleared so the next call retries instead of reusing a
                // session that was already due for renewal.
                *slot = None;
                Err(err)
            }
        }
    }

    async fn login(
        &self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<AuthSession, SecretError> {
        let url = format!("{base_url}/v1/auth/{}/login", self.login_mount);
        let response = client
            .post(&url)
            .json(&serde_json::json!({
                "role_id": self.role_id,
                "secret_id": self.secret_id,
            }))
            .send()
            .await
            .map_err(|err| SecretError::Auth {
                provider: "vault-kv".to_string(),
                reason: format!("approle login request failed: {err}"),
                terminal: false,
            })?;

        if !response.status().is_success() {
            return Err(SecretError::Auth {
                provider: "vault-kv".to_string(),
                reason: format!("approle login rejected (status {})", response.status()),
                terminal: false,
            });
        }

        let body: LoginResponse =
            response.json().await.map_err(|err| SecretError::Auth {
                provider: "vault-kv".to_string(),
                reason: format!("approle login response unreadable: {err}"),
                terminal: false,
            })?;

        let expiry = match body.auth.lease_duration {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };
        Ok(AuthSession::new(body.auth.client_token, expiry))
    }

    #[cfg(test)]
    async fn seed_session(&self, session: AuthSession) {
        *self.session.lock().await = Some(session);
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

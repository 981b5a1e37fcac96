/// OAuth callback coordinator: exchanges a one-time authorization code
/// for credentials exactly once per code, safely across re-entrant
/// invocation.
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::guard::ExchangeGuard;
use crate::session::SessionStore;
use crate::types::UserProfile;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication service unreachable: {0}")]
    Network(#[from] reqwest::Error),
    #[error("authentication rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to persist session: {0}")]
    Storage(anyhow::Error),
}

/// Query parameters carried by the incoming request (the provider's
/// redirect back to us). The coordinator strips a spent code so it cannot
/// be replayed on the next pass.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    code: Option<String>,
}

impl RequestContext {
    /// Parse from a raw query string, with or without a leading '?'
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let code = url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
        Self { code }
    }

    /// Parse from the full redirect URL the provider sent the user back to
    pub fn from_redirect_url(raw: &str) -> Self {
        match url::Url::parse(raw) {
            Ok(url) => Self::from_query(url.query().unwrap_or("")),
            // Not a URL; treat the input as a bare authorization code
            Err(_) => Self {
                code: Some(raw.trim().to_string()).filter(|c| !c.is_empty()),
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Remove the authorization code. Codes are single-use; once an
    /// exchange has failed, retrying the same code would fail again.
    pub fn strip_code(&mut self) {
        self.code = None;
    }
}

/// Transient coordinator status, readable by the host between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub enum CallbackOutcome {
    /// No authorization code present
    Idle,
    /// The store already holds a session; a present code is stale and
    /// treated as inert
    AlreadyAuthenticated,
    /// Another exchange holds the guard; this invocation did nothing
    InFlight,
    /// Credentials are in the store and durable. The host must fully
    /// re-initialize (reload from its root entry point) so every
    /// component starts against the persisted session.
    Succeeded,
    Failed(AuthError),
}

#[derive(Debug)]
pub enum LoginStart {
    /// Send the user to the provider's authorization page
    Redirect(String),
    /// 503 from the service: enhanced features not deployed. Fall back
    /// to the non-authenticated entry point instead of failing hard.
    Degraded,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    user: UserProfile,
    token: String,
    github_token: String,
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    authorization_url: String,
}

pub struct CallbackCoordinator {
    client: reqwest::Client,
    base_url: String,
    store: Arc<SessionStore>,
    guard: ExchangeGuard,
    phase: Mutex<Phase>,
}

impl CallbackCoordinator {
    pub fn new(base_url: &str, store: Arc<SessionStore>, guard: ExchangeGuard) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            guard,
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap() = phase;
    }

    /// Ask the service for the provider's authorization URL
    pub async fn begin_login(&self) -> Result<LoginStart, AuthError> {
        let res = self
            .client
            .get(format!("{}/auth/github", self.base_url))
            .send()
            .await?;

        if res.status().as_u16() == 503 {
            tracing::warn!("Authentication degraded: service reports 503");
            return Ok(LoginStart::Degraded);
        }

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        let authorize: AuthorizeResponse = res.json().await?;
        Ok(LoginStart::Redirect(authorize.authorization_url))
    }

    /// Drive the exchange state machine for the code in `ctx`, if any.
    ///
    /// The guard is set before any network call goes out; that ordering
    /// closes the window where a second invocation could spend the same
    /// code. On failure the code is stripped from `ctx` so it is not
    /// retried on the next pass.
    pub async fn process_callback(&self, ctx: &mut RequestContext) -> CallbackOutcome {
        if self.store.is_authenticated() {
            tracing::debug!("Already authenticated; ignoring callback code");
            return CallbackOutcome::AlreadyAuthenticated;
        }

        let Some(code) = ctx.code().map(str::to_string) else {
            return CallbackOutcome::Idle;
        };

        match self.guard.acquire() {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Exchange already in flight; skipping");
                return CallbackOutcome::InFlight;
            }
            Err(e) => {
                // Could not set the guard, so no call was made and the
                // code is still spendable
                return CallbackOutcome::Failed(AuthError::Storage(e));
            }
        }

        self.set_phase(Phase::Processing);
        tracing::info!("Exchanging authorization code");

        match self.exchange(&code).await {
            Ok(resp) => {
                if let Err(e) = self
                    .store
                    .login(resp.user, resp.token, resp.github_token)
                {
                    // The code is spent either way
                    self.clear_guard();
                    ctx.strip_code();
                    self.set_phase(Phase::Failed);
                    return CallbackOutcome::Failed(AuthError::Storage(e));
                }

                self.clear_guard();
                self.set_phase(Phase::Succeeded);
                tracing::info!("Authorization code exchange succeeded");
                CallbackOutcome::Succeeded
            }
            Err(err) => {
                self.clear_guard();
                ctx.strip_code();
                self.set_phase(Phase::Failed);
                tracing::warn!("Authorization code exchange failed: {}", err);
                CallbackOutcome::Failed(err)
            }
        }
    }

    async fn exchange(&self, code: &str) -> Result<ExchangeResponse, AuthError> {
        let res = self
            .client
            .post(format!(
                "{}/auth/callback?code={}",
                self.base_url,
                urlencoding::encode(code)
            ))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, body });
        }

        Ok(res.json().await?)
    }

    fn clear_guard(&self) {
        if let Err(e) = self.guard.clear() {
            tracing::warn!("Failed to clear exchange guard: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_query() {
        let ctx = RequestContext::from_query("?code=abc123&state=xyz");
        assert_eq!(ctx.code(), Some("abc123"));

        let ctx = RequestContext::from_query("state=xyz");
        assert_eq!(ctx.code(), None);

        let ctx = RequestContext::from_query("code=");
        assert_eq!(ctx.code(), None);
    }

    #[test]
    fn test_context_from_redirect_url() {
        let ctx = RequestContext::from_redirect_url("http://localhost:3000/?code=abc%20123");
        assert_eq!(ctx.code(), Some("abc 123"));

        // A pasted bare code also works
        let ctx = RequestContext::from_redirect_url("abc123");
        assert_eq!(ctx.code(), Some("abc123"));
    }

    #[test]
    fn test_strip_code() {
        let mut ctx = RequestContext::from_query("code=abc123");
        ctx.strip_code();
        assert_eq!(ctx.code(), None);
    }
}

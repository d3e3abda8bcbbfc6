//! Identity Toolkit sign-in and Secure Token refresh.
//!
//! TRADE-OFFS
//! ==========
//! Tokens are refreshed lazily, on the next authenticated call within
//! `TOKEN_REFRESH_MARGIN` of expiry. A refresh rejected as permanently
//! invalid ends the session, which reaches the screen as a sign-out.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{FirebaseApp, Session, read_success, request_error};
use crate::backend::{AuthService, BackendError, Credentials, User};

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
const FEDERATED_REQUEST_URI: &str = "http://localhost";

/// Refresh failures after which the session cannot be recovered.
const TERMINAL_REFRESH_ERRORS: &[&str] = &["TOKEN_EXPIRED", "INVALID_REFRESH_TOKEN", "USER_DISABLED", "USER_NOT_FOUND"];

// =============================================================================
// SERVICE
// =============================================================================

pub struct FirebaseAuth {
    app: Arc<FirebaseApp>,
}

impl FirebaseAuth {
    #[must_use]
    pub fn new(app: Arc<FirebaseApp>) -> Self {
        Self { app }
    }

    async fn post_sign_in(&self, method: &str, body: serde_json::Value) -> Result<Session, BackendError> {
        let config = self.app.config();
        let url = format!("{}/accounts:{method}", config.endpoints.auth);
        let response = self
            .app
            .http()
            .post(url)
            .query(&[("key", config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let text = read_success(response).await.map_err(auth_failure)?;
        parse_sign_in(&text)
    }
}

#[async_trait::async_trait]
impl AuthService for FirebaseAuth {
    fn current_user(&self) -> Option<User> {
        self.app.session().map(|s| s.user)
    }

    fn watch(&self) -> watch::Receiver<Option<User>> {
        self.app.watch_user()
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<User, BackendError> {
        let session = match credentials {
            Credentials::EmailPassword { email, password } => {
                let body = serde_json::json!({ "email": email, "password": password, "returnSecureToken": true });
                self.post_sign_in("signInWithPassword", body).await?
            }
            Credentials::Federated { provider, id_token } => {
                let body = serde_json::json!({
                    "postBody": format!("id_token={id_token}&providerId={}", provider.provider_id()),
                    "requestUri": FEDERATED_REQUEST_URI,
                    "returnSecureToken": true,
                    "returnIdpCredential": true,
                });
                self.post_sign_in("signInWithIdp", body).await?
            }
        };
        let user = session.user.clone();
        info!(uid = %user.uid, "auth: signed in");
        self.app.set_session(Some(session));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.app.set_session(None);
        info!("auth: signed out");
        Ok(())
    }
}

// =============================================================================
// TOKENS
// =============================================================================

/// Current id token, refreshed first if it is about to expire.
pub(crate) async fn fresh_id_token(app: &FirebaseApp) -> Result<String, BackendError> {
    let session = app.session().ok_or(BackendError::NotSignedIn)?;
    if session.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
        return Ok(session.id_token);
    }
    refresh_id_token(app).await
}

/// Exchange the refresh token for a new id token, whatever the old one's expiry.
pub(crate) async fn refresh_id_token(app: &FirebaseApp) -> Result<String, BackendError> {
    let session = app.session().ok_or(BackendError::NotSignedIn)?;
    let config = app.config();
    let url = format!("{}/token", config.endpoints.token);
    let form = [("grant_type", "refresh_token"), ("refresh_token", session.refresh_token.as_str())];
    let response = app
        .http()
        .post(url)
        .query(&[("key", config.api_key.as_str())])
        .form(&form)
        .send()
        .await
        .map_err(|e| request_error(&e))?;

    let text = match read_success(response).await {
        Ok(text) => text,
        Err(e) => {
            let e = auth_failure(e);
            if let BackendError::Auth(code) = &e {
                if TERMINAL_REFRESH_ERRORS.contains(&code.as_str()) {
                    warn!(%code, "auth: refresh token rejected; ending session");
                    app.set_session(None);
                }
            }
            return Err(e);
        }
    };

    let refreshed = parse_refresh(&text, session.user)?;
    let token = refreshed.id_token.clone();
    app.update_tokens(refreshed);
    Ok(token)
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// PARSING
// =============================================================================

fn expires_at(expires_in: Option<&str>) -> Instant {
    let secs = expires_in
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Instant::now() + Duration::from_secs(secs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_sign_in(json: &str) -> Result<Session, BackendError> {
    let api: SignInResponse = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    Ok(Session {
        user: User { uid: api.local_id, display_name: non_empty(api.display_name), email: non_empty(api.email) },
        expires_at: expires_at(api.expires_in.as_deref()),
        id_token: api.id_token,
        refresh_token: api.refresh_token,
    })
}

fn parse_refresh(json: &str, user: User) -> Result<Session, BackendError> {
    let api: RefreshResponse = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    Ok(Session {
        user,
        expires_at: expires_at(api.expires_in.as_deref()),
        id_token: api.id_token,
        refresh_token: api.refresh_token,
    })
}

/// Error code from an Identity Toolkit error body, e.g. `INVALID_PASSWORD`.
///
/// Codes may carry a detail suffix (`TOO_MANY_ATTEMPTS_TRY_LATER : ...`);
/// only the code is kept.
fn error_code(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let code = envelope.error.message.split(" : ").next()?.trim().to_owned();
    (!code.is_empty()).then_some(code)
}

/// Rewrite a 4xx status carrying an identity error code as `Auth`.
fn auth_failure(err: BackendError) -> BackendError {
    if let BackendError::Status { status: 400..=499, body } = &err {
        if let Some(code) = error_code(body) {
            return BackendError::Auth(code);
        }
    }
    err
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

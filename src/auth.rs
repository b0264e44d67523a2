use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::api::{ApiRequest, ApiResponse, Transport};
use crate::error::{Error, Result};

const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Access/refresh token pair. Always replaced as a whole.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry_hint: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expiry_hint: None,
        }
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_hint = Some(expiry);
        self
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expiry_hint", &self.expiry_hint)
            .finish()
    }
}

fn redact(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

/// Holder of the live credential for the signed-in session.
pub trait CredentialStore: Send + Sync {
    fn current(&self) -> Option<Credential>;
    fn replace(&self, credential: Credential);
    fn clear(&self);

    fn access_token(&self) -> Option<String> {
        self.current().map(|credential| credential.access_token)
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn current(&self) -> Option<Credential> {
        self.slot.read().clone()
    }

    fn replace(&self, credential: Credential) {
        *self.slot.write() = Some(credential);
    }

    fn clear(&self) {
        self.slot.write().take();
    }
}

/// Login and refresh endpoints.
///
/// `refresh` reports a rejected refresh token as [`Error::AuthFailure`]; any
/// other error is treated as transient by the refresh coordinator.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<Credential>;
    async fn refresh(&self, current: &Credential) -> Result<Credential>;
}

#[derive(Debug, Clone)]
pub struct AuthPaths {
    pub login: String,
    pub refresh: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            refresh: "/auth/refresh".into(),
        }
    }
}

/// [`AuthApi`] backed by the remote token endpoints. Requests are public and
/// go straight to the transport, never through the request pipeline.
pub struct HttpAuthApi {
    transport: Arc<dyn Transport>,
    paths: AuthPaths,
}

impl HttpAuthApi {
    pub fn new(transport: Arc<dyn Transport>, paths: AuthPaths) -> Self {
        Self { transport, paths }
    }

    async fn token_request<T: Serialize + Sync>(
        &self,
        path: &str,
        form: &T,
    ) -> Result<TokenResponse> {
        let request = ApiRequest::post(path).public().json(form)?;
        let resp = self.transport.send(&request, None).await?;
        if matches!(resp.status, 400 | 401 | 403) {
            return Err(Error::AuthFailure(token_error_message(&resp)));
        }
        resp.error_for_status()?.json()
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::AuthFailure("username and password are required".into()));
        }
        let form = LoginRequest { username, password };
        let payload = self.token_request(&self.paths.login, &form).await?;
        if payload.refresh_token.is_empty() {
            return Err(Error::InvalidResponse("login response missing refresh token".into()));
        }
        credential_from_response(payload, None)
    }

    async fn refresh(&self, current: &Credential) -> Result<Credential> {
        if !current.can_refresh() {
            return Err(Error::AuthFailure("no refresh token".into()));
        }
        let form = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &current.refresh_token,
        };
        let payload = self.token_request(&self.paths.refresh, &form).await?;
        credential_from_response(payload, Some(current))
    }
}

fn credential_from_response(
    payload: TokenResponse,
    current: Option<&Credential>,
) -> Result<Credential> {
    if payload.access_token.is_empty() {
        return Err(Error::InvalidResponse("missing access token".into()));
    }
    let expires_in = if payload.expires_in == 0 {
        DEFAULT_EXPIRES_IN
    } else {
        payload.expires_in
    };
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let refresh_token = if !payload.refresh_token.is_empty() {
        payload.refresh_token
    } else if let Some(current) = current.filter(|c| c.can_refresh()) {
        current.refresh_token.clone()
    } else {
        return Err(Error::InvalidResponse(
            "refresh response missing refresh token".into(),
        ));
    };

    Ok(Credential::new(payload.access_token, refresh_token).with_expiry(expires_at))
}

fn token_error_message(resp: &ApiResponse) -> String {
    match serde_json::from_str::<TokenError>(&resp.body) {
        Ok(err) => err.to_string(),
        Err(_) if resp.body.trim().is_empty() => format!("status {}", resp.status),
        Err(_) => resp.body.clone(),
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default, rename = "error_description")]
    description: String,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error.is_empty() && self.description.is_empty() {
            return write!(f, "unknown token error");
        }
        if self.description.is_empty() {
            write!(f, "{}", self.error)
        } else if self.error.is_empty() {
            write!(f, "{}", self.description)
        } else {
            write!(f, "{} ({})", self.error, self.description)
        }
    }
}

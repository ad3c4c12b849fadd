//! Per-site authentication: credential bundles, header production, and the
//! token refresh state machine.
//!
//! The manager serializes all credential access behind one per-site mutex,
//! which also makes refresh single-flight: concurrent requests hitting an
//! expiring token queue behind the first refresher and observe the renewed
//! credential. Tokens live in memory only.

// crates.io
use base64::prelude::*;
use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use rand::{Rng, distr::Alphanumeric};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;
// self
use crate::{_prelude::*, context::Ctx, security};

/// Refresh lead time: tokens expiring within this window are renewed before
/// the request proceeds.
pub const REFRESH_LEAD: Duration = Duration::from_secs(60);
/// Fallback lifetime for JWT plugins that omit `expires_in`.
pub const DEFAULT_JWT_TTL: Duration = Duration::from_secs(60 * 60);
const JWT_TOKEN_PATH: &str = "/wp-json/jwt-auth/v1/token";
const OAUTH_AUTHORIZE_PATH: &str = "/oauth/authorize";
const OAUTH_TOKEN_PATH: &str = "/oauth/token";
const VALIDATE_PATH: &str = "/wp-json/wp/v2/users/me";

/// Bearer token held for JWT credentials.
#[derive(Clone, Debug)]
pub struct BearerToken {
    /// Opaque access token issued by the JWT plugin.
    pub access_token: security::Secret,
    /// Monotonic expiry deadline, when known.
    pub expires_at: Option<Instant>,
}
impl BearerToken {
    fn needs_refresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_duration_since(now) < REFRESH_LEAD,
            None => false,
        }
    }
}

/// Access and refresh tokens held for OAuth credentials.
#[derive(Clone, Debug)]
pub struct OAuthToken {
    /// Current access token.
    pub access_token: security::Secret,
    /// Refresh token, when the grant supplied one.
    pub refresh_token: Option<security::Secret>,
    /// Monotonic expiry deadline, when known.
    pub expires_at: Option<Instant>,
}
impl OAuthToken {
    fn needs_refresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_duration_since(now) < REFRESH_LEAD,
            None => false,
        }
    }
}

/// In-progress authorization-code exchange state.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    state: String,
    pkce_verifier: security::Secret,
}

/// Tagged credential variants for one site.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub enum CredentialBundle {
    AppPassword {
        username: String,
        app_password: security::Secret,
    },
    Basic {
        username: String,
        password: security::Secret,
    },
    Jwt {
        username: String,
        password: security::Secret,
        token: Option<BearerToken>,
    },
    OAuth {
        client_id: String,
        client_secret: security::Secret,
        redirect_uri: Url,
        scope: String,
        token: Option<OAuthToken>,
        pending: Option<PendingAuthorization>,
    },
}
impl CredentialBundle {
    /// Human-readable method label used in config and diagnostics.
    pub fn method(&self) -> &'static str {
        match self {
            Self::AppPassword { .. } => "app-password",
            Self::Basic { .. } => "basic",
            Self::Jwt { .. } => "jwt",
            Self::OAuth { .. } => "oauth",
        }
    }
}

/// Lifecycle phases of a site's credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
    /// No credential interaction has happened yet.
    Uninitialized,
    /// A login or authorization step is required before headers exist.
    NeedsLogin,
    /// A usable credential is held.
    Active,
    /// A refresh is in progress; requests queue behind it.
    Refreshing,
    /// The credential failed unrecoverably (e.g. revoked refresh token).
    Failed,
}
impl AuthPhase {
    /// Stable label for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::NeedsLogin => "needs-login",
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a forced refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The credential was renewed.
    Refreshed,
    /// The method holds static credentials with nothing to renew.
    Unsupported,
}

/// Authorization handle returned by [`AuthManager::start_oauth`].
#[derive(Clone, Debug)]
pub struct OAuthAuthorization {
    /// Browser URL the operator must visit.
    pub url: Url,
    /// Anti-forgery state parameter echoed by the callback.
    pub state: String,
}

#[derive(Debug)]
struct AuthState {
    bundle: CredentialBundle,
    phase: AuthPhase,
}

/// Per-site credential owner.
#[derive(Debug)]
pub struct AuthManager {
    site_id: String,
    base_url: Url,
    client: Client,
    state: Mutex<AuthState>,
}
impl AuthManager {
    /// Build a manager for one site.
    pub fn new(
        site_id: impl Into<String>,
        base_url: Url,
        bundle: CredentialBundle,
        client: Client,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            base_url,
            client,
            state: Mutex::new(AuthState {
                bundle,
                phase: AuthPhase::Uninitialized,
            }),
        }
    }

    /// Current lifecycle phase, for diagnostics.
    pub async fn phase(&self) -> AuthPhase {
        self.state.lock().await.phase
    }

    /// Credential method label, for diagnostics.
    pub async fn method(&self) -> &'static str {
        self.state.lock().await.bundle.method()
    }

    /// Produce the auth headers for one outbound request, refreshing the
    /// token inline when it expires within [`REFRESH_LEAD`].
    #[tracing::instrument(skip(self, ctx), fields(site = %self.site_id))]
    pub async fn headers(&self, ctx: &Ctx) -> Result<HeaderMap> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match &state.bundle {
            CredentialBundle::AppPassword { .. } | CredentialBundle::Basic { .. } => {
                state.phase = AuthPhase::Active;
            }
            CredentialBundle::Jwt { token, .. } => {
                if token.as_ref().is_none_or(|token| token.needs_refresh(now)) {
                    self.refresh_locked(ctx, &mut state).await?;
                } else {
                    state.phase = AuthPhase::Active;
                }
            }
            CredentialBundle::OAuth { token, .. } => match token {
                None => {
                    state.phase = AuthPhase::NeedsLogin;

                    return Err(Error::AuthRequired(
                        "OAuth authorization has not been completed for this site.".into(),
                    ));
                }
                Some(token) if token.needs_refresh(now) => {
                    self.refresh_locked(ctx, &mut state).await?;
                }
                Some(_) => {
                    state.phase = AuthPhase::Active;
                }
            },
        }

        build_headers(&state.bundle)
    }

    /// Force one refresh after an upstream 401; static methods report
    /// [`RefreshOutcome::Unsupported`].
    #[tracing::instrument(skip(self, ctx), fields(site = %self.site_id))]
    pub async fn force_refresh(&self, ctx: &Ctx) -> Result<RefreshOutcome> {
        let mut state = self.state.lock().await;

        match &state.bundle {
            CredentialBundle::AppPassword { .. } | CredentialBundle::Basic { .. } => {
                Ok(RefreshOutcome::Unsupported)
            }
            CredentialBundle::Jwt { .. } | CredentialBundle::OAuth { .. } => {
                self.refresh_locked(ctx, &mut state).await?;

                Ok(RefreshOutcome::Refreshed)
            }
        }
    }

    /// Probe the credential against `GET /wp-json/wp/v2/users/me`.
    pub async fn validate(&self, ctx: &Ctx) -> Result<bool> {
        let headers = self.headers(ctx).await?;

        self.probe(ctx, headers).await
    }

    /// Begin a PKCE authorization-code flow, returning the URL to visit.
    pub async fn start_oauth(&self) -> Result<OAuthAuthorization> {
        let mut state = self.state.lock().await;
        let AuthState { bundle, phase } = &mut *state;
        let CredentialBundle::OAuth {
            client_id,
            redirect_uri,
            scope,
            pending,
            ..
        } = bundle
        else {
            return Err(Error::AuthMethodUnsupported("OAuth authorization"));
        };
        let oauth_state: String = random_token(32);
        let verifier: String = random_token(64);
        let challenge = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        let mut url = self.base_url.join(OAUTH_AUTHORIZE_PATH)?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", scope)
            .append_pair("state", &oauth_state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        *pending = Some(PendingAuthorization {
            state: oauth_state.clone(),
            pkce_verifier: security::Secret::new(verifier),
        });
        *phase = AuthPhase::NeedsLogin;

        Ok(OAuthAuthorization {
            url,
            state: oauth_state,
        })
    }

    /// Complete the authorization-code flow with the callback's code and
    /// state, exchanging them for tokens.
    #[tracing::instrument(skip_all, fields(site = %self.site_id))]
    pub async fn complete_oauth(&self, ctx: &Ctx, code: &str, callback_state: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let (client_id, client_secret, redirect_uri, verifier) = {
            let CredentialBundle::OAuth {
                client_id,
                client_secret,
                redirect_uri,
                pending,
                ..
            } = &state.bundle
            else {
                return Err(Error::AuthMethodUnsupported("OAuth authorization"));
            };
            let Some(pending) = pending else {
                return Err(Error::AuthRefreshFailed(
                    "No authorization flow is in progress.".into(),
                ));
            };

            if pending.state != callback_state {
                return Err(Error::AuthRefreshFailed(
                    "OAuth state mismatch; discard the callback.".into(),
                ));
            }

            (
                client_id.clone(),
                client_secret.clone(),
                redirect_uri.clone(),
                pending.pkce_verifier.clone(),
            )
        };
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose()),
            ("code_verifier", verifier.expose()),
        ];
        let token = self.exchange_token(ctx, &form).await?;

        if let CredentialBundle::OAuth {
            token: slot,
            pending,
            ..
        } = &mut state.bundle
        {
            *slot = Some(token);
            *pending = None;
        }

        state.phase = AuthPhase::Active;

        tracing::debug!("oauth authorization complete");

        Ok(())
    }

    /// Validate `new_bundle` against the site and atomically replace the
    /// current credential on success; the previous bundle is discarded.
    #[tracing::instrument(skip_all, fields(site = %self.site_id, method = new_bundle.method()))]
    pub async fn switch(&self, ctx: &Ctx, new_bundle: CredentialBundle) -> Result<()> {
        let candidate = build_headers(&new_bundle)?;

        if !self.probe(ctx, candidate).await? {
            return Err(Error::AuthRequired(
                "Validation of the replacement credential failed.".into(),
            ));
        }

        let mut state = self.state.lock().await;

        state.bundle = new_bundle;
        state.phase = AuthPhase::Active;

        tracing::debug!("credential switched");

        Ok(())
    }

    async fn refresh_locked(&self, ctx: &Ctx, state: &mut AuthState) -> Result<()> {
        state.phase = AuthPhase::Refreshing;

        let refreshed = match &state.bundle {
            CredentialBundle::Jwt {
                username, password, ..
            } => self
                .jwt_login(ctx, username, password)
                .await
                .map(Renewed::Jwt),
            CredentialBundle::OAuth {
                client_id,
                client_secret,
                token,
                ..
            } => {
                let Some(refresh_token) =
                    token.as_ref().and_then(|token| token.refresh_token.clone())
                else {
                    state.phase = AuthPhase::Failed;

                    return Err(Error::AuthExpired);
                };
                let form = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.expose()),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.expose()),
                ];

                self.exchange_token(ctx, &form).await.map(Renewed::OAuth)
            }
            _ => return Ok(()),
        };

        match refreshed {
            Ok(Renewed::Jwt(token)) => {
                if let CredentialBundle::Jwt { token: slot, .. } = &mut state.bundle {
                    *slot = Some(token);
                }

                state.phase = AuthPhase::Active;

                Ok(())
            }
            Ok(Renewed::OAuth(mut token)) => {
                if let CredentialBundle::OAuth { token: slot, .. } = &mut state.bundle {
                    // A refresh grant may omit the rotation; keep the old
                    // refresh token in that case.
                    if token.refresh_token.is_none() {
                        token.refresh_token =
                            slot.as_ref().and_then(|old| old.refresh_token.clone());
                    }
                    *slot = Some(token);
                }

                state.phase = AuthPhase::Active;

                Ok(())
            }
            Err(err) => {
                state.phase = AuthPhase::Failed;

                tracing::warn!(error = %err, "credential refresh failed");

                Err(err)
            }
        }
    }

    async fn jwt_login(
        &self,
        ctx: &Ctx,
        username: &str,
        password: &security::Secret,
    ) -> Result<BearerToken> {
        #[derive(Deserialize)]
        struct JwtResponse {
            token: String,
            expires_in: Option<u64>,
        }

        let url = self.base_url.join(JWT_TOKEN_PATH)?;
        let body = serde_json::json!({ "username": username, "password": password.expose() });
        let response = ctx
            .run(async {
                self.client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(Error::from)
            })
            .await
            .map_err(refresh_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let excerpt = response
                .text()
                .await
                .ok()
                .and_then(|text| security::excerpt(&text));

            return Err(Error::AuthRefreshFailed(format!(
                "JWT login returned HTTP {status}{}.",
                excerpt.map(|text| format!(": {text}")).unwrap_or_default()
            )));
        }

        let payload: JwtResponse = response
            .json()
            .await
            .map_err(|err| refresh_error(Error::Reqwest(err)))?;
        let lifetime = payload
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JWT_TTL);

        Ok(BearerToken {
            access_token: security::Secret::new(payload.token),
            expires_at: Some(Instant::now() + lifetime),
        })
    }

    async fn exchange_token(&self, ctx: &Ctx, form: &[(&str, &str)]) -> Result<OAuthToken> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: Option<String>,
            expires_in: Option<u64>,
        }

        let url = self.base_url.join(OAUTH_TOKEN_PATH)?;
        let response = ctx
            .run(async {
                self.client
                    .post(url)
                    .form(form)
                    .send()
                    .await
                    .map_err(Error::from)
            })
            .await
            .map_err(refresh_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let excerpt = response
                .text()
                .await
                .ok()
                .and_then(|text| security::excerpt(&text));

            return Err(Error::AuthRefreshFailed(format!(
                "Token exchange returned HTTP {status}{}.",
                excerpt.map(|text| format!(": {text}")).unwrap_or_default()
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| refresh_error(Error::Reqwest(err)))?;

        Ok(OAuthToken {
            access_token: security::Secret::new(payload.access_token),
            refresh_token: payload.refresh_token.map(security::Secret::new),
            expires_at: payload
                .expires_in
                .map(|seconds| Instant::now() + Duration::from_secs(seconds)),
        })
    }

    async fn probe(&self, ctx: &Ctx, headers: HeaderMap) -> Result<bool> {
        let url = self.base_url.join(VALIDATE_PATH)?;
        let response = ctx
            .run(async {
                self.client
                    .get(url)
                    .headers(headers)
                    .send()
                    .await
                    .map_err(Error::from)
            })
            .await?;
        let status = response.status();

        if status.is_success() {
            Ok(true)
        } else if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN
        {
            Ok(false)
        } else {
            Err(Error::UpstreamClient {
                status: status.as_u16(),
                excerpt: response
                    .text()
                    .await
                    .ok()
                    .and_then(|text| security::excerpt(&text)),
            })
        }
    }
}

#[derive(Debug)]
enum Renewed {
    Jwt(BearerToken),
    OAuth(OAuthToken),
}

fn refresh_error(err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::Timeout => Error::Timeout,
        other => Error::AuthRefreshFailed(security::redact_secrets(&other.to_string())),
    }
}

fn build_headers(bundle: &CredentialBundle) -> Result<HeaderMap> {
    let value = match bundle {
        CredentialBundle::AppPassword {
            username,
            app_password,
        } => basic_header(username, app_password),
        CredentialBundle::Basic { username, password } => basic_header(username, password),
        CredentialBundle::Jwt { token, .. } => match token {
            Some(token) => format!("Bearer {}", token.access_token.expose()),
            None => {
                return Err(Error::AuthRequired(
                    "JWT login has not produced a token yet.".into(),
                ));
            }
        },
        CredentialBundle::OAuth { token, .. } => match token {
            Some(token) => format!("Bearer {}", token.access_token.expose()),
            None => {
                return Err(Error::AuthRequired(
                    "OAuth authorization has not been completed for this site.".into(),
                ));
            }
        },
    };
    let mut headers = HeaderMap::with_capacity(1);
    let mut header = HeaderValue::from_str(&value).map_err(|_| {
        Error::AuthRequired("Credential contains characters invalid in a header.".into())
    })?;

    header.set_sensitive(true);
    headers.insert(AUTHORIZATION, header);

    Ok(headers)
}

fn basic_header(username: &str, password: &security::Secret) -> String {
    let credentials = format!("{username}:{}", password.expose());

    format!("Basic {}", BASE64_STANDARD.encode(credentials.as_bytes()))
}

fn random_token(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

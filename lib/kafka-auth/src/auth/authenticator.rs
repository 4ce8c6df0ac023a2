use super::handshake::{self, join_url, ACCEPTED_PROBE_STATUSES};
use super::{AuthMethod, AuthProvider, Token, TokenScheme};
use crate::{AuthError, Credentials};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

const DEFAULT_PROBE_PATH: &str = "/api/health";
const DEFAULT_GATEWAY_PROBE_PATH: &str = "/gateway/admin/api/v1/info";
const DEFAULT_TOKEN_ENDPOINTS: [&str; 3] = [
    "/oauth2/token",
    "/cdp-proxy/oauth2/token",
    "/cdp-proxy-api/oauth2/token",
];
const DEFAULT_OAUTH_SCOPE: &str = "api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REVALIDATE_AFTER: Duration = Duration::from_secs(3600);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_USER_AGENT: &str = concat!("kafka-gateway/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Cheap endpoint used to validate Basic and bearer credentials
    pub probe_path: String,
    /// Endpoint used to validate gateway-issued tokens
    pub gateway_probe_path: String,
    /// OAuth2 token endpoints, tried in order
    pub token_endpoints: Vec<String>,
    pub oauth_scope: String,
    pub timeout: Duration,
    /// Tokens older than this are reported invalid even without an expiry
    pub revalidate_after: Duration,
    pub verify_tls: bool,
    pub user_agent: String,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            gateway_probe_path: DEFAULT_GATEWAY_PROBE_PATH.to_string(),
            token_endpoints: DEFAULT_TOKEN_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            oauth_scope: DEFAULT_OAUTH_SCOPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            revalidate_after: DEFAULT_REVALIDATE_AFTER,
            verify_tls: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct AuthenticatorState {
    method: Option<AuthMethod>,
    current_token: Option<Token>,
    last_auth_time: Option<DateTime<Utc>>,
}

impl AuthenticatorState {
    fn is_valid_at(&self, now: DateTime<Utc>, revalidate_after: Duration) -> bool {
        let token = match &self.current_token {
            Some(token) => token,
            None => return false,
        };

        if token.is_expired_at(now) {
            return false;
        }

        match self.last_auth_time {
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed <= revalidate_after,
                // Clock went backwards; the token is as fresh as it gets.
                Err(_) => true,
            },
            None => false,
        }
    }
}

/// Outcome of [`Authenticator::test_authentication`]
#[derive(Debug, Clone, Serialize)]
pub struct ServiceAuthStatus {
    pub authenticated: bool,
    pub method: Option<AuthMethod>,
    pub status_code: Option<u16>,
    pub scheme: Option<TokenScheme>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Reachability of one authentication endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub status_code: Option<u16>,
    pub available: bool,
    pub error: Option<String>,
}

/// Authentication handler for a single downstream service.
///
/// Holds the only copy of the service's token. Readers go through
/// [`Authenticator::get_auth_headers`]; a token is swapped in with a single
/// write so readers see either the old token or the new one.
pub struct Authenticator {
    service: String,
    base_url: String,
    credentials: Arc<Credentials>,
    config: AuthenticatorConfig,
    client: reqwest::Client,
    state: RwLock<AuthenticatorState>,
    refresh_lock: Mutex<()>,
    basic_fallback_used: AtomicBool,
}

impl Authenticator {
    pub fn new(
        service: impl Into<String>,
        base_url: impl Into<String>,
        credentials: Arc<Credentials>,
        config: AuthenticatorConfig,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| AuthError::Request(format!("Failed to build HTTP client: {}", e)))?;

        let base_url: String = base_url.into();

        Ok(Self {
            service: service.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            config,
            client,
            state: RwLock::new(AuthenticatorState::default()),
            refresh_lock: Mutex::new(()),
            basic_fallback_used: AtomicBool::new(false),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn detect_method(&self) -> AuthMethod {
        AuthMethod::detect(&self.credentials)
    }

    /// Method that produced the current token, if any
    pub async fn method(&self) -> Option<AuthMethod> {
        self.state.read().await.method
    }

    /// Run the handshake for `method` (detected when `None`) and install the token.
    ///
    /// Never retries: on failure the previous state is left untouched.
    pub async fn authenticate(&self, method: Option<AuthMethod>) -> Result<Token, AuthError> {
        let method = method.unwrap_or_else(|| self.detect_method());

        let token = match self.handshake(method).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(service = %self.service, %method, error = %e, "Authentication failed");
                return Err(e);
            }
        };

        self.install(method, token.clone()).await;
        tracing::info!(service = %self.service, %method, "Authenticated");
        Ok(token)
    }

    /// Cold-start authentication with the one-time Basic fallback.
    ///
    /// When the detected method fails and a username is available, Basic is
    /// tried once for the lifetime of this authenticator.
    pub async fn authenticate_with_fallback(&self) -> Result<Token, AuthError> {
        let method = self.detect_method();

        match self.authenticate(Some(method)).await {
            Ok(token) => Ok(token),
            Err(e)
                if method != AuthMethod::Basic
                    && self.credentials.has_basic()
                    && !self.basic_fallback_used.swap(true, Ordering::SeqCst) =>
            {
                tracing::warn!(
                    service = %self.service,
                    %method,
                    error = %e,
                    "Falling back to basic authentication"
                );
                self.authenticate(Some(AuthMethod::Basic)).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn is_token_valid(&self) -> bool {
        self.state
            .read()
            .await
            .is_valid_at(Utc::now(), self.config.revalidate_after)
    }

    pub async fn get_auth_headers(&self) -> Result<HeaderMap, AuthError> {
        let authorization = {
            let state = self.state.read().await;
            state
                .current_token
                .as_ref()
                .ok_or(AuthError::NotAuthenticated)?
                .authorization()
        };

        let mut value = HeaderValue::from_str(&authorization)
            .map_err(|e| AuthError::InvalidResponse(format!("Token is not a valid header: {}", e)))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        Ok(headers)
    }

    /// Replace the current token.
    ///
    /// Uses the OAuth2 refresh grant when the token carries a refresh secret,
    /// otherwise re-runs the handshake with the method used last time.
    pub async fn refresh(&self) -> Result<Token, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let (method, refresh_secret) = {
            let state = self.state.read().await;
            (
                state.method,
                state
                    .current_token
                    .as_ref()
                    .and_then(|t| t.refresh_secret.clone()),
            )
        };

        if let Some(refresh_secret) = refresh_secret {
            match handshake::refresh_grant(
                &self.client,
                &self.config,
                &self.base_url,
                &self.credentials,
                &refresh_secret,
            )
            .await
            {
                Ok(token) => {
                    self.install(AuthMethod::OAuth2ClientCredentials, token.clone())
                        .await;
                    tracing::debug!(service = %self.service, "Token refreshed via refresh grant");
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!(
                        service = %self.service,
                        error = %e,
                        "Refresh grant failed, re-authenticating"
                    );
                }
            }
        }

        self.authenticate(method).await
    }

    /// Make sure a usable token exists, then probe with it.
    pub async fn test_authentication(&self) -> ServiceAuthStatus {
        let mut status = ServiceAuthStatus {
            authenticated: false,
            method: None,
            status_code: None,
            scheme: None,
            expires_at: None,
            error: None,
        };

        if let Err(e) = self.ensure_token().await {
            status.method = self.method().await;
            status.error = Some(e.to_string());
            return status;
        }

        {
            let state = self.state.read().await;
            status.method = state.method;
            status.scheme = state.current_token.as_ref().map(|t| t.scheme);
            status.expires_at = state.current_token.as_ref().and_then(|t| t.expires_at);
        }

        let headers = match self.get_auth_headers().await {
            Ok(headers) => headers,
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        };

        let url = join_url(&self.base_url, &self.config.probe_path);
        match self.client.get(&url).headers(headers).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                status.status_code = Some(code);
                status.authenticated = ACCEPTED_PROBE_STATUSES.contains(&code);
                if !status.authenticated {
                    status.error = Some(format!("probe returned {}", code));
                }
            }
            Err(e) => status.error = Some(e.to_string()),
        }

        status
    }

    /// Check which of the known authentication endpoints answer at all.
    pub async fn discover_auth_endpoints(&self) -> BTreeMap<String, EndpointStatus> {
        let mut known = vec![
            ("probe".to_string(), self.config.probe_path.clone()),
            (
                "gateway_info".to_string(),
                self.config.gateway_probe_path.clone(),
            ),
        ];
        for (i, endpoint) in self.config.token_endpoints.iter().enumerate() {
            known.push((format!("oauth2_token_{}", i), endpoint.clone()));
        }

        let mut discovered = BTreeMap::new();
        for (name, path) in known {
            let url = join_url(&self.base_url, &path);
            let status = match self
                .client
                .get(&url)
                .timeout(DISCOVERY_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => {
                    let code = response.status().as_u16();
                    EndpointStatus {
                        url,
                        status_code: Some(code),
                        available: matches!(code, 200 | 401 | 403 | 404),
                        error: None,
                    }
                }
                Err(e) => EndpointStatus {
                    url,
                    status_code: None,
                    available: false,
                    error: Some(e.to_string()),
                },
            };
            discovered.insert(name, status);
        }

        discovered
    }

    async fn ensure_token(&self) -> Result<(), AuthError> {
        if self.is_token_valid().await {
            return Ok(());
        }
        let has_token = self.state.read().await.current_token.is_some();
        if has_token {
            self.refresh().await?;
        } else {
            self.authenticate_with_fallback().await?;
        }
        Ok(())
    }

    async fn handshake(&self, method: AuthMethod) -> Result<Token, AuthError> {
        match method {
            AuthMethod::Basic => {
                if !self.credentials.has_basic() {
                    return Err(AuthError::authentication(method, "username not provided"));
                }
                let encoded = STANDARD.encode(format!(
                    "{}:{}",
                    self.credentials.username(),
                    self.credentials.password()
                ));
                let token = Token::static_token(encoded, TokenScheme::Basic);
                self.probe(method, &self.config.probe_path, &token).await?;
                Ok(token)
            }
            AuthMethod::BearerToken | AuthMethod::GatewayToken => {
                let secret = self
                    .credentials
                    .opaque_token()
                    .ok_or_else(|| AuthError::authentication(method, "token not provided"))?;
                let token = Token::static_token(secret.to_string(), TokenScheme::Bearer);
                let probe_path = if method == AuthMethod::GatewayToken {
                    &self.config.gateway_probe_path
                } else {
                    &self.config.probe_path
                };
                self.probe(method, probe_path, &token).await?;
                Ok(token)
            }
            AuthMethod::OAuth2ClientCredentials => {
                handshake::client_credentials(
                    &self.client,
                    &self.config,
                    &self.base_url,
                    &self.credentials,
                )
                .await
            }
            AuthMethod::Saml => Err(AuthError::authentication(
                method,
                "SAML requires interactive browser SSO, which is not supported",
            )),
            AuthMethod::Kerberos => Err(AuthError::authentication(
                method,
                "Kerberos ticket acquisition is not supported for non-interactive use",
            )),
        }
    }

    async fn probe(&self, method: AuthMethod, path: &str, token: &Token) -> Result<u16, AuthError> {
        let url = join_url(&self.base_url, path);
        handshake::probe(&self.client, &self.config, &url, method, &token.authorization()).await
    }

    async fn install(&self, method: AuthMethod, token: Token) {
        let mut state = self.state.write().await;
        *state = AuthenticatorState {
            method: Some(method),
            current_token: Some(token),
            last_auth_time: Some(Utc::now()),
        };
    }
}

#[async_trait]
impl AuthProvider for Authenticator {
    fn name(&self) -> &str {
        &self.service
    }

    async fn get_auth_headers(&self) -> Result<HeaderMap, AuthError> {
        Authenticator::get_auth_headers(self).await
    }

    async fn is_token_valid(&self) -> bool {
        Authenticator::is_token_valid(self).await
    }

    async fn ensure_authenticated(&self) -> Result<Token, AuthError> {
        self.authenticate_with_fallback().await
    }

    async fn refresh(&self) -> Result<Token, AuthError> {
        Authenticator::refresh(self).await
    }
}

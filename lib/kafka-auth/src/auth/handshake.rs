use super::{AuthMethod, AuthenticatorConfig, Token, TokenScheme};
use crate::{AuthError, Credentials};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

/// Probe statuses proving the transport accepted the credential format.
pub(crate) const ACCEPTED_PROBE_STATUSES: [u16; 3] = [200, 401, 403];

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for Token {
    fn from(resp: TokenResponse) -> Self {
        let scheme = TokenScheme::from_token_type(resp.token_type.as_deref().unwrap_or("Bearer"));
        let mut token = Token::issued(resp.access_token, scheme, resp.expires_in);
        token.scope = resp.scope;
        token.refresh_secret = resp.refresh_token;
        token
    }
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Send one cheap request with the candidate `Authorization` value.
///
/// Returns the probe status when it is one of [`ACCEPTED_PROBE_STATUSES`].
pub(crate) async fn probe(
    client: &reqwest::Client,
    config: &AuthenticatorConfig,
    url: &str,
    method: AuthMethod,
    authorization: &str,
) -> Result<u16, AuthError> {
    let response = client
        .get(url)
        .header(AUTHORIZATION, authorization)
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, &config.user_agent)
        .send()
        .await
        .map_err(|e| AuthError::authentication(method, format!("probe {} failed: {}", url, e)))?;

    let status = response.status().as_u16();
    if ACCEPTED_PROBE_STATUSES.contains(&status) {
        tracing::debug!(%method, url, status, "Probe accepted credential");
        Ok(status)
    } else {
        Err(AuthError::authentication(
            method,
            format!("probe {} returned {}", url, status),
        ))
    }
}

/// OAuth2 `client_credentials` grant against the configured token endpoints.
pub(crate) async fn client_credentials(
    client: &reqwest::Client,
    config: &AuthenticatorConfig,
    base_url: &str,
    credentials: &Credentials,
) -> Result<Token, AuthError> {
    let method = AuthMethod::OAuth2ClientCredentials;
    let (client_id, client_secret) = match (
        credentials.oauth_client_id(),
        credentials.oauth_client_secret(),
    ) {
        (Some(id), Some(secret)) => (id, secret),
        _ => {
            return Err(AuthError::authentication(
                method,
                "OAuth2 client credentials not provided",
            ))
        }
    };

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("scope", config.oauth_scope.as_str()),
    ];

    request_token(client, config, base_url, method, &form).await
}

/// OAuth2 `refresh_token` grant.
pub(crate) async fn refresh_grant(
    client: &reqwest::Client,
    config: &AuthenticatorConfig,
    base_url: &str,
    credentials: &Credentials,
    refresh_secret: &str,
) -> Result<Token, AuthError> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_secret),
    ];
    if let (Some(id), Some(secret)) = (
        credentials.oauth_client_id(),
        credentials.oauth_client_secret(),
    ) {
        form.push(("client_id", id));
        form.push(("client_secret", secret));
    }

    request_token(
        client,
        config,
        base_url,
        AuthMethod::OAuth2ClientCredentials,
        &form,
    )
    .await
}

/// Try each token endpoint in order; the first 200 with a parseable body wins.
async fn request_token(
    client: &reqwest::Client,
    config: &AuthenticatorConfig,
    base_url: &str,
    method: AuthMethod,
    form: &[(&str, &str)],
) -> Result<Token, AuthError> {
    let mut failures = Vec::with_capacity(config.token_endpoints.len());

    for endpoint in &config.token_endpoints {
        let url = join_url(base_url, endpoint);

        let response = match client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &config.user_agent)
            .form(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Token endpoint unreachable");
                failures.push(format!("{}: {}", endpoint, e));
                continue;
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            tracing::debug!(url = %url, status, "Token endpoint rejected request");
            failures.push(format!("{}: status {}", endpoint, status));
            continue;
        }

        match response.json::<TokenResponse>().await {
            Ok(body) => {
                tracing::debug!(url = %url, "Token endpoint issued token");
                return Ok(body.into());
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Token endpoint returned unparseable body");
                failures.push(format!("{}: invalid body: {}", endpoint, e));
            }
        }
    }

    Err(AuthError::authentication(
        method,
        format!("no token endpoint succeeded ({})", failures.join("; ")),
    ))
}

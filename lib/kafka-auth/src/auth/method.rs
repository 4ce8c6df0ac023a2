use crate::Credentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque tokens longer than this are treated as gateway-issued.
pub const GATEWAY_TOKEN_MIN_LEN: usize = 500;

/// Issuer marker found in gateway-issued tokens (matched case-insensitively).
pub const GATEWAY_TOKEN_MARKER: &str = "knox";

/// Supported authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Basic,
    BearerToken,
    GatewayToken,
    #[serde(rename = "oauth2")]
    OAuth2ClientCredentials,
    Saml,
    Kerberos,
}

impl AuthMethod {
    pub const ALL: [AuthMethod; 6] = [
        AuthMethod::Basic,
        AuthMethod::BearerToken,
        AuthMethod::GatewayToken,
        AuthMethod::OAuth2ClientCredentials,
        AuthMethod::Saml,
        AuthMethod::Kerberos,
    ];

    /// Pick a method from the shape of the credentials.
    ///
    /// First match wins:
    /// 1. OAuth client id + secret → OAuth2 client credentials
    /// 2. Kerberos principal + keytab → Kerberos
    /// 3. Opaque token → gateway token if long or marked, bearer otherwise
    /// 4. Otherwise → Basic
    pub fn detect(credentials: &Credentials) -> Self {
        if credentials.oauth_client_id().is_some() && credentials.oauth_client_secret().is_some() {
            return AuthMethod::OAuth2ClientCredentials;
        }

        if credentials.kerberos_principal().is_some()
            && credentials.kerberos_keytab_path().is_some()
        {
            return AuthMethod::Kerberos;
        }

        match credentials.opaque_token() {
            Some(token) if is_gateway_token(token) => AuthMethod::GatewayToken,
            Some(_) => AuthMethod::BearerToken,
            None => AuthMethod::Basic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Basic => "basic",
            AuthMethod::BearerToken => "bearer_token",
            AuthMethod::GatewayToken => "gateway_token",
            AuthMethod::OAuth2ClientCredentials => "oauth2",
            AuthMethod::Saml => "saml",
            AuthMethod::Kerberos => "kerberos",
        }
    }
}

fn is_gateway_token(token: &str) -> bool {
    token.len() > GATEWAY_TOKEN_MIN_LEN || token.to_lowercase().contains(GATEWAY_TOKEN_MARKER)
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthMethod::Basic),
            "bearer" | "bearer_token" => Ok(AuthMethod::BearerToken),
            "gateway" | "gateway_token" | "knox" | "knox_token" => Ok(AuthMethod::GatewayToken),
            "oauth2" | "oauth2_client_credentials" => Ok(AuthMethod::OAuth2ClientCredentials),
            "saml" => Ok(AuthMethod::Saml),
            "kerberos" => Ok(AuthMethod::Kerberos),
            other => Err(format!("unknown authentication method: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_basic_by_default() {
        let creds = Credentials::new("admin", "secret");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::Basic);
        assert_eq!(AuthMethod::detect(&Credentials::default()), AuthMethod::Basic);
    }

    #[test]
    fn test_detect_short_token_is_bearer() {
        let creds = Credentials::new("admin", "secret").with_token("abc.def.ghi");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::BearerToken);
    }

    #[test]
    fn test_detect_long_token_is_gateway() {
        let creds = Credentials::default().with_token("x".repeat(600));
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::GatewayToken);
    }

    #[test]
    fn test_detect_token_length_threshold_is_exclusive() {
        let creds = Credentials::default().with_token("x".repeat(GATEWAY_TOKEN_MIN_LEN));
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::BearerToken);
    }

    #[test]
    fn test_detect_marked_token_is_gateway() {
        let creds = Credentials::default().with_token("issued-by-KNOX-123");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::GatewayToken);
    }

    #[test]
    fn test_detect_oauth_wins_over_everything() {
        let creds = Credentials::new("admin", "secret")
            .with_token("x".repeat(600))
            .with_kerberos("kafka@REALM", "/etc/kafka.keytab")
            .with_oauth_client("client", "secret");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::OAuth2ClientCredentials);
    }

    #[test]
    fn test_detect_kerberos_wins_over_token() {
        let creds = Credentials::default()
            .with_token("abc")
            .with_kerberos("kafka@REALM", "/etc/kafka.keytab");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::Kerberos);
    }

    #[test]
    fn test_detect_requires_both_oauth_parts() {
        let creds = Credentials::new("admin", "secret").with_oauth_client("client", "");
        assert_eq!(AuthMethod::detect(&creds), AuthMethod::Basic);
    }

    #[test]
    fn test_detect_is_idempotent() {
        let creds = Credentials::default().with_token("knox-token");
        let first = AuthMethod::detect(&creds);
        for _ in 0..10 {
            assert_eq!(AuthMethod::detect(&creds), first);
        }
    }

    #[test]
    fn test_method_name_roundtrip() {
        for method in AuthMethod::ALL {
            assert_eq!(method.as_str().parse::<AuthMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_method_serializes_as_snake_case() {
        let json = serde_json::to_string(&AuthMethod::OAuth2ClientCredentials).unwrap();
        assert_eq!(json, r#""oauth2""#);
        let json = serde_json::to_string(&AuthMethod::GatewayToken).unwrap();
        assert_eq!(json, r#""gateway_token""#);
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// How the token is presented in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenScheme {
    Basic,
    Bearer,
}

impl TokenScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScheme::Basic => "Basic",
            TokenScheme::Bearer => "Bearer",
        }
    }

    /// Map an OAuth2 `token_type` onto a header scheme.
    pub fn from_token_type(token_type: &str) -> Self {
        if token_type.eq_ignore_ascii_case("basic") {
            TokenScheme::Basic
        } else {
            TokenScheme::Bearer
        }
    }
}

impl fmt::Display for TokenScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token information from authentication
#[derive(Clone)]
pub struct Token {
    pub secret: String,
    pub scheme: TokenScheme,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_secret: Option<String>,
    pub scope: Option<String>,
}

impl Token {
    /// Non-expiring token (Basic credentials or a caller-supplied opaque token)
    pub fn static_token(secret: String, scheme: TokenScheme) -> Self {
        Self {
            secret,
            scheme,
            issued_at: Utc::now(),
            expires_at: None,
            refresh_secret: None,
            scope: None,
        }
    }

    /// Token minted by a token endpoint, expiring `expires_in` seconds from now
    pub fn issued(secret: String, scheme: TokenScheme, expires_in: Option<u64>) -> Self {
        let issued_at = Utc::now();
        Self {
            secret,
            scheme,
            issued_at,
            expires_at: expires_in.and_then(|secs| expiry_after(issued_at, secs)),
            refresh_secret: None,
            scope: None,
        }
    }

    /// Check if token is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Value of the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.scheme, self.secret)
    }
}

/// `None` when the lease does not fit a timestamp; such a token is treated as non-expiring.
fn expiry_after(issued_at: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lease| issued_at.checked_add_signed(lease))
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("secret", &"***")
            .field("scheme", &self.scheme)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("refreshable", &self.refresh_secret.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_never_expires() {
        let token = Token::static_token("test".to_string(), TokenScheme::Bearer);
        assert!(!token.is_expired_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_issued_token_expires_after_lease() {
        let token = Token::issued("test".to_string(), TokenScheme::Bearer, Some(100));
        assert!(!token.is_expired_at(token.issued_at + Duration::seconds(50)));
        assert!(token.is_expired_at(token.issued_at + Duration::seconds(100)));
    }

    #[test]
    fn test_oversized_lease_does_not_overflow() {
        let token = Token::issued("test".to_string(), TokenScheme::Bearer, Some(100_000_000_000_000_000));
        assert_eq!(token.expires_at, None);

        let token = Token::issued("test".to_string(), TokenScheme::Bearer, Some(u64::MAX));
        assert_eq!(token.expires_at, None);
        assert!(!token.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_authorization_uses_scheme() {
        let basic = Token::static_token("YWRtaW46c2VjcmV0".to_string(), TokenScheme::Basic);
        assert_eq!(basic.authorization(), "Basic YWRtaW46c2VjcmV0");

        let bearer = Token::issued("abc".to_string(), TokenScheme::from_token_type("bearer"), None);
        assert_eq!(bearer.authorization(), "Bearer abc");
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = Token::static_token("super-secret".to_string(), TokenScheme::Bearer);
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}

mod authenticator;
mod handshake;
mod manager;
mod method;
mod token;

pub use authenticator::{Authenticator, AuthenticatorConfig, EndpointStatus, ServiceAuthStatus};
pub use manager::AuthManager;
pub use method::{AuthMethod, GATEWAY_TOKEN_MARKER, GATEWAY_TOKEN_MIN_LEN};
pub use token::{Token, TokenScheme};

use crate::AuthError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;

/// Source of request headers for a backend.
///
/// Implemented by [`Authenticator`]; backends only ever see this trait.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Name used in logs (usually the service name)
    fn name(&self) -> &str;

    /// Headers for the current token; `NotAuthenticated` if there is none
    async fn get_auth_headers(&self) -> Result<HeaderMap, AuthError>;

    async fn is_token_valid(&self) -> bool;

    /// Obtain a first token
    async fn ensure_authenticated(&self) -> Result<Token, AuthError>;

    /// Replace the current token
    async fn refresh(&self) -> Result<Token, AuthError>;
}

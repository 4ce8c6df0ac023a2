//! kafka-auth - authentication for Kafka access paths (REST proxy, gateway)
//!
//! Auto-detects authentication method from the credential shape:
//! 1. OAuth client id + secret → OAuth2 client credentials
//! 2. Kerberos principal + keytab → Kerberos (rejected, needs a ticket)
//! 3. Opaque token → gateway token or bearer token
//! 4. Otherwise → Basic

pub mod auth;
mod credentials;
mod error;

pub use auth::{
    AuthManager, AuthMethod, AuthProvider, Authenticator, AuthenticatorConfig, EndpointStatus,
    ServiceAuthStatus, Token, TokenScheme,
};
pub use credentials::Credentials;
pub use error::AuthError;
pub use reqwest::header::HeaderMap;

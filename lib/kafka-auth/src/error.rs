use crate::auth::AuthMethod;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed ({method}): {cause}")]
    Authentication { method: AuthMethod, cause: String },

    #[error("Not authenticated: no token has been obtained yet")]
    NotAuthenticated,

    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    pub(crate) fn authentication(method: AuthMethod, cause: impl Into<String>) -> Self {
        Self::Authentication {
            method,
            cause: cause.into(),
        }
    }
}

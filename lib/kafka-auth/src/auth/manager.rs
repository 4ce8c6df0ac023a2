use super::{AuthMethod, Authenticator, AuthenticatorConfig, ServiceAuthStatus, Token};
use crate::{AuthError, Credentials};
use futures::future::join_all;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Services registered by [`AuthManager::with_default_services`]
pub const DEFAULT_SERVICES: [&str; 5] = ["kafka-rest", "connect", "smm", "admin", "cdp"];

/// One authenticator per downstream service, all sharing the same credentials.
pub struct AuthManager {
    credentials: Arc<Credentials>,
    authenticators: BTreeMap<String, Arc<Authenticator>>,
}

impl AuthManager {
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self {
            credentials,
            authenticators: BTreeMap::new(),
        }
    }

    /// Register every default service against a single base URL.
    pub fn with_default_services(
        credentials: Arc<Credentials>,
        base_url: &str,
        config: AuthenticatorConfig,
    ) -> Result<Self, AuthError> {
        let mut manager = Self::new(credentials);
        for service in DEFAULT_SERVICES {
            manager.register(service, base_url, config.clone())?;
        }
        Ok(manager)
    }

    /// Add a service. Re-registering a name replaces its authenticator.
    pub fn register(
        &mut self,
        service: &str,
        base_url: &str,
        config: AuthenticatorConfig,
    ) -> Result<Arc<Authenticator>, AuthError> {
        let authenticator = Arc::new(Authenticator::new(
            service,
            base_url,
            Arc::clone(&self.credentials),
            config,
        )?);
        self.authenticators
            .insert(service.to_string(), Arc::clone(&authenticator));
        Ok(authenticator)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.authenticators.keys().map(String::as_str)
    }

    pub fn authenticator(&self, service: &str) -> Result<Arc<Authenticator>, AuthError> {
        self.authenticators
            .get(service)
            .cloned()
            .ok_or_else(|| AuthError::UnknownService {
                service: service.to_string(),
            })
    }

    pub async fn authenticate_service(
        &self,
        service: &str,
        method: Option<AuthMethod>,
    ) -> Result<Token, AuthError> {
        self.authenticator(service)?.authenticate(method).await
    }

    pub async fn get_service_auth_headers(&self, service: &str) -> Result<HeaderMap, AuthError> {
        self.authenticator(service)?.get_auth_headers().await
    }

    /// Probe every service; one failing service never hides the others.
    pub async fn test_all_services(&self) -> BTreeMap<String, ServiceAuthStatus> {
        let probes = self.authenticators.iter().map(|(name, auth)| async move {
            (name.clone(), auth.test_authentication().await)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Best-effort refresh of every service token.
    pub async fn refresh_all_tokens(&self) -> BTreeMap<String, bool> {
        let refreshes = self.authenticators.iter().map(|(name, auth)| async move {
            let refreshed = match auth.refresh().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Failed to refresh token");
                    false
                }
            };
            (name.clone(), refreshed)
        });

        join_all(refreshes).await.into_iter().collect()
    }
}

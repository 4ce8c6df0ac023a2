use kafka_auth::{AuthenticatorConfig, Credentials};
use kafka_router::{EndpointLayout, OperationKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "KAFKA_GATEWAY_CONFIG";
pub const DEFAULT_ROUTE: &str = "default";

const DEFAULT_FILE_NAME: &str = ".kafka-gateway.json5";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TOPOLOGY: &str = "cdp-proxy-api";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const GATEWAY_SERVICE: &str = "knox";
const GATEWAY_BACKEND: &str = "gateway";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse { path: PathBuf, source: json5::Error },

    #[error("Invalid URL for {field}: {value:?} (expected http:// or https://)")]
    InvalidUrl { field: String, value: String },

    #[error("Backend {backend} references unknown service {service}")]
    UnknownService { backend: String, service: String },

    #[error("Route {route} references unknown backend {backend}")]
    UnknownBackend { route: String, backend: String },

    #[error("Unknown operation in routes: {0}")]
    UnknownOperation(String),

    #[error("Invalid log level {0:?}, expected one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub kerberos_principal: Option<String>,
    pub kerberos_keytab: Option<String>,
}

impl CredentialsConfig {
    pub fn to_credentials(&self) -> Credentials {
        let mut credentials = Credentials::new(
            self.username.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_default(),
        );
        if let Some(token) = &self.token {
            credentials = credentials.with_token(token.clone());
        }
        if let (Some(id), Some(secret)) = (&self.oauth_client_id, &self.oauth_client_secret) {
            credentials = credentials.with_oauth_client(id.clone(), secret.clone());
        }
        if let (Some(principal), Some(keytab)) = (&self.kerberos_principal, &self.kerberos_keytab) {
            credentials = credentials.with_kerberos(principal.clone(), keytab.clone());
        }
        credentials
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    CloudRest,
    Gateway,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Service that authenticates this backend's calls
    pub service: String,
    /// Data endpoint base, the service URL when absent
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default = "default_topology")]
    pub topology: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
}

fn default_topology() -> String {
    DEFAULT_TOPOLOGY.to_string()
}

impl BackendConfig {
    pub fn layout(&self) -> EndpointLayout {
        match self.kind {
            BackendKind::CloudRest => EndpointLayout::CloudRest {
                path_prefix: self.path_prefix.clone(),
            },
            BackendKind::Gateway => EndpointLayout::Gateway {
                topology: self.topology.clone(),
            },
        }
    }
}

/// Authenticator tuning; unset fields keep the library defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub probe_path: Option<String>,
    pub gateway_probe_path: Option<String>,
    pub token_endpoints: Option<Vec<String>>,
    pub oauth_scope: Option<String>,
    pub timeout_secs: Option<u64>,
    pub revalidate_secs: Option<u64>,
    pub verify_ssl: Option<bool>,
}

impl AuthSettings {
    pub fn to_authenticator_config(&self) -> AuthenticatorConfig {
        let mut config = AuthenticatorConfig::default();
        if let Some(path) = &self.probe_path {
            config.probe_path = path.clone();
        }
        if let Some(path) = &self.gateway_probe_path {
            config.gateway_probe_path = path.clone();
        }
        if let Some(endpoints) = &self.token_endpoints {
            config.token_endpoints = endpoints.clone();
        }
        if let Some(scope) = &self.oauth_scope {
            config.oauth_scope = scope.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.revalidate_secs {
            config.revalidate_after = Duration::from_secs(secs);
        }
        if let Some(verify) = self.verify_ssl {
            config.verify_tls = verify;
        }
        config
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    /// Service name to base URL
    pub services: BTreeMap<String, String>,
    pub backends: BTreeMap<String, BackendConfig>,
    /// Operation name (or `default`) to backend names in try order
    pub routes: BTreeMap<String, Vec<String>>,
    pub auth: AuthSettings,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            services: BTreeMap::new(),
            backends: BTreeMap::new(),
            routes: BTreeMap::new(),
            auth: AuthSettings::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load the file, apply environment overrides and validate.
    ///
    /// An explicit path (argument or `KAFKA_GATEWAY_CONFIG`) must exist; the
    /// default `~/.kafka-gateway.json5` is optional.
    pub async fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let explicit = path.or_else(|| {
            std::env::var(CONFIG_ENV)
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
        });

        let mut config = match explicit {
            Some(path) => Self::from_file(&path).await?,
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path).await?,
                _ => {
                    tracing::debug!("No config file, using environment only");
                    Config::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        json5::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay non-empty environment values on top of the file settings.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let credentials = &mut self.credentials;
        let overrides = [
            ("KNOX_USERNAME", &mut credentials.username),
            ("KNOX_PASSWORD", &mut credentials.password),
            ("KNOX_TOKEN", &mut credentials.token),
            ("OAUTH_CLIENT_ID", &mut credentials.oauth_client_id),
            ("OAUTH_CLIENT_SECRET", &mut credentials.oauth_client_secret),
            ("KERBEROS_PRINCIPAL", &mut credentials.kerberos_principal),
            ("KERBEROS_KEYTAB", &mut credentials.kerberos_keytab),
        ];
        for (key, field) in overrides {
            if let Some(value) = get(key) {
                *field = Some(value);
            }
        }

        if let Some(level) = get("MCP_LOG_LEVEL") {
            self.log_level = level.trim().to_ascii_lowercase();
        }

        if let Some(gateway) = get("KNOX_GATEWAY") {
            let url = gateway.trim().trim_end_matches('/');
            let url = url.strip_suffix("/gateway").unwrap_or(url);
            self.services
                .insert(GATEWAY_SERVICE.to_string(), url.to_string());

            if self.backends.is_empty() {
                self.backends.insert(
                    GATEWAY_BACKEND.to_string(),
                    BackendConfig {
                        kind: BackendKind::Gateway,
                        service: GATEWAY_SERVICE.to_string(),
                        base_url: None,
                        path_prefix: String::new(),
                        topology: default_topology(),
                        cluster_id: None,
                    },
                );
                self.routes
                    .entry(DEFAULT_ROUTE.to_string())
                    .or_insert_with(|| vec![GATEWAY_BACKEND.to_string()]);
            }
        }
    }

    /// Check references and normalize URLs (trailing `/` removed).
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (name, url) in self.services.iter_mut() {
            *url = normalize_url(&format!("services.{}", name), url)?;
        }

        for (name, backend) in self.backends.iter_mut() {
            if !self.services.contains_key(&backend.service) {
                return Err(ConfigError::UnknownService {
                    backend: name.clone(),
                    service: backend.service.clone(),
                });
            }
            if let Some(url) = backend.base_url.take() {
                backend.base_url =
                    Some(normalize_url(&format!("backends.{}.base_url", name), &url)?);
            }
        }

        self.operation_routes()?;
        for (route, names) in &self.routes {
            if let Some(missing) = names.iter().find(|n| !self.backends.contains_key(*n)) {
                return Err(ConfigError::UnknownBackend {
                    route: route.clone(),
                    backend: missing.clone(),
                });
            }
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }

    /// Per-operation routes, without the `default` entry
    pub fn operation_routes(&self) -> Result<Vec<(OperationKind, &[String])>, ConfigError> {
        self.routes
            .iter()
            .filter(|(key, _)| key.as_str() != DEFAULT_ROUTE)
            .map(|(key, names)| {
                key.parse::<OperationKind>()
                    .map(|kind| (kind, names.as_slice()))
                    .map_err(|_| ConfigError::UnknownOperation(key.clone()))
            })
            .collect()
    }

    pub fn default_route(&self) -> &[String] {
        self.routes
            .get(DEFAULT_ROUTE)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn default_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_FILE_NAME))
}

fn normalize_url(field: &str, value: &str) -> Result<String, ConfigError> {
    let url = value.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(url.to_string())
}

use crate::config::{Config, ConfigError, DEFAULT_ROUTE};
use kafka_auth::{AuthManager, AuthProvider, Credentials};
use kafka_router::{
    AttemptStats, Backend, BackendDescriptor, HttpBackend, OperationRequest, OperationResult,
    Orchestrator,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

type Bound = (Arc<dyn Backend>, Arc<dyn AuthProvider>);

/// Services, backends and routes built from one configuration
pub struct App {
    auth: AuthManager,
    orchestrator: Orchestrator,
    stats: Arc<AttemptStats>,
}

impl App {
    pub fn build(config: &Config) -> Result<Self, Box<dyn Error>> {
        let credentials: Arc<Credentials> = Arc::new(config.credentials.to_credentials());
        let auth_config = config.auth.to_authenticator_config();

        let mut auth = AuthManager::new(credentials);
        for (service, url) in &config.services {
            auth.register(service, url, auth_config.clone())?;
        }

        let mut bound: BTreeMap<&str, Bound> = BTreeMap::new();
        for (name, backend) in &config.backends {
            let service_url =
                config
                    .services
                    .get(&backend.service)
                    .ok_or_else(|| ConfigError::UnknownService {
                        backend: name.clone(),
                        service: backend.service.clone(),
                    })?;
            let base_url = backend.base_url.as_deref().unwrap_or(service_url);

            let mut http =
                HttpBackend::new(name.as_str(), base_url, backend.layout(), auth_config.verify_tls)?;
            if let Some(cluster_id) = &backend.cluster_id {
                http = http.with_cluster_id(cluster_id.as_str());
            }

            let http: Arc<dyn Backend> = Arc::new(http);
            let authenticator: Arc<dyn AuthProvider> = auth.authenticator(&backend.service)?;
            bound.insert(name.as_str(), (http, authenticator));
        }

        let descriptors = |route: &str, names: &[String]| -> Result<Vec<BackendDescriptor>, ConfigError> {
            names
                .iter()
                .enumerate()
                .map(|(rank, name)| {
                    let (backend, authenticator) =
                        bound
                            .get(name.as_str())
                            .ok_or_else(|| ConfigError::UnknownBackend {
                                route: route.to_string(),
                                backend: name.clone(),
                            })?;
                    Ok::<_, ConfigError>(BackendDescriptor::new(
                        rank as u32,
                        backend.clone(),
                        authenticator.clone(),
                    ))
                })
                .collect()
        };

        let stats = Arc::new(AttemptStats::new());
        let mut builder = Orchestrator::builder()
            .observer(stats.clone())
            .default_route(descriptors(DEFAULT_ROUTE, config.default_route())?);
        for (operation, names) in config.operation_routes()? {
            builder = builder.route(operation, descriptors(operation.as_str(), names)?);
        }

        Ok(Self {
            auth,
            orchestrator: builder.build(),
            stats,
        })
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn stats(&self) -> &AttemptStats {
        &self.stats
    }

    /// Run one tool call; `arguments` may be null for tools without parameters.
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: Value,
    ) -> Result<OperationResult, serde_json::Error> {
        let request = OperationRequest::from_tool(tool, arguments)?;
        Ok(self.orchestrator.execute(&request).await)
    }

    pub fn route_table(&self) -> Value {
        let table: Map<String, Value> = self
            .orchestrator
            .route_table()
            .into_iter()
            .map(|(operation, names)| (operation.to_string(), Value::from(names)))
            .collect();
        Value::Object(table)
    }
}

use super::{Backend, BackendResponse, Dispatch};
use crate::error::NetworkError;
use crate::operation::OperationRequest;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kafka_auth::HeaderMap;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_CLUSTER_ID: &str = "default";
const CONSUMER_INSTANCE: &str = "mcp-instance";
const KAFKA_REST_SERVICE: &str = "kafka-rest";
const CONNECT_SERVICE: &str = "kafka-connect";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How service URLs are laid out behind a base address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointLayout {
    /// Cloud REST proxy: `{base}{path_prefix}/cdp-proxy/{service}`
    CloudRest { path_prefix: String },
    /// Gateway reverse proxy: `{base}/gateway/{topology}/{service}`
    Gateway { topology: String },
}

impl EndpointLayout {
    fn service_root(&self, base_url: &str, service: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            EndpointLayout::CloudRest { path_prefix } => {
                let prefix = path_prefix.trim_matches('/');
                if prefix.is_empty() {
                    format!("{}/cdp-proxy/{}", base, service)
                } else {
                    format!("{}/{}/cdp-proxy/{}", base, prefix, service)
                }
            }
            EndpointLayout::Gateway { topology } => {
                format!("{}/gateway/{}/{}", base, topology.trim_matches('/'), service)
            }
        }
    }
}

#[derive(Debug, PartialEq)]
struct HttpCall {
    method: Method,
    url: String,
    body: Option<Value>,
    query: Vec<(&'static str, String)>,
}

impl HttpCall {
    fn get(url: String) -> Self {
        Self::new(Method::GET, url, None)
    }

    fn new(method: Method, url: String, body: Option<Value>) -> Self {
        Self {
            method,
            url,
            body,
            query: Vec::new(),
        }
    }
}

/// Kafka REST v3 + Kafka Connect over HTTP, behind a cloud proxy or a gateway
pub struct HttpBackend {
    name: String,
    kafka_rest_url: String,
    connect_url: String,
    cluster_id: Option<String>,
    discovery_timeout: Duration,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        layout: EndpointLayout,
        verify_tls: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            name: name.into(),
            kafka_rest_url: layout.service_root(base_url, KAFKA_REST_SERVICE),
            connect_url: layout.service_root(base_url, CONNECT_SERVICE),
            cluster_id: None,
            discovery_timeout: DISCOVERY_TIMEOUT,
            client,
        })
    }

    /// Use a fixed cluster id instead of discovering it
    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    /// Bound on the `GET /clusters` lookup made before cluster-scoped calls
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn kafka_rest_url(&self) -> &str {
        &self.kafka_rest_url
    }

    pub fn connect_url(&self) -> &str {
        &self.connect_url
    }

    /// Configured cluster id, or the first one the proxy lists, or `default`.
    ///
    /// A proxy that does not answer within the discovery timeout fails the
    /// call before anything else is sent.
    async fn resolve_cluster_id(&self, headers: &HeaderMap) -> Result<String, NetworkError> {
        if let Some(id) = &self.cluster_id {
            return Ok(id.clone());
        }

        let url = format!("{}/clusters", self.kafka_rest_url);
        let request = self
            .client
            .get(&url)
            .headers(headers.clone())
            .timeout(self.discovery_timeout);
        let discovered = match request.send().await {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| first_cluster_id(&body)),
            Ok(response) => {
                tracing::debug!(backend = %self.name, status = response.status().as_u16(), "Cluster discovery rejected");
                None
            }
            Err(e) if e.is_timeout() => {
                return Err(NetworkError::not_sent(format!(
                    "cluster discovery timed out after {:?}",
                    self.discovery_timeout
                )));
            }
            Err(e) => {
                tracing::debug!(backend = %self.name, error = %e, "Cluster discovery failed");
                None
            }
        };

        Ok(discovered.unwrap_or_else(|| DEFAULT_CLUSTER_ID.to_string()))
    }

    fn plan(&self, request: &OperationRequest, cluster: &str) -> Result<HttpCall, NetworkError> {
        let rest = |segments: &[&str]| -> Result<String, NetworkError> {
            let mut all = vec!["clusters", cluster];
            all.extend_from_slice(segments);
            endpoint(&self.kafka_rest_url, &all)
        };
        let connect = |segments: &[&str]| endpoint(&self.connect_url, segments);

        let call = match request {
            OperationRequest::ListTopics {} => HttpCall::get(rest(&["topics"])?),
            OperationRequest::DescribeTopic { name }
            | OperationRequest::TopicExists { name }
            | OperationRequest::GetTopicPartitions { name } => {
                HttpCall::get(rest(&["topics", name.as_str()])?)
            }
            OperationRequest::CreateTopic {
                name,
                partitions,
                replication_factor,
                config,
            } => HttpCall::new(
                Method::POST,
                rest(&["topics"])?,
                Some(json!({
                    "topic_name": name,
                    "partitions_count": partitions,
                    "replication_factor": replication_factor,
                    "configs": config_entries(config),
                })),
            ),
            OperationRequest::DeleteTopic { name } => {
                HttpCall::new(Method::DELETE, rest(&["topics", name.as_str()])?, None)
            }
            OperationRequest::UpdateTopicConfig { name, config } => HttpCall::new(
                Method::POST,
                rest(&["topics", name.as_str(), "configs:alter"])?,
                Some(json!({ "data": config_entries(config) })),
            ),
            OperationRequest::ProduceMessage {
                topic,
                value,
                key,
                partition,
                headers,
            } => HttpCall::new(
                Method::POST,
                rest(&["topics", topic.as_str(), "records"])?,
                Some(produce_record(value, key.as_deref(), *partition, headers)),
            ),
            OperationRequest::ConsumeMessages {
                consumer_group,
                max_messages,
                ..
            } => {
                let mut call = HttpCall::get(rest(&[
                    "consumers",
                    consumer_group.as_str(),
                    "instances",
                    CONSUMER_INSTANCE,
                    "records",
                ])?);
                call.query
                    .push(("max_bytes", (u64::from(*max_messages) * 1024).to_string()));
                call
            }
            OperationRequest::GetTopicOffsets { topic, partition } => {
                let partition = partition.to_string();
                HttpCall::get(rest(&["topics", topic.as_str(), "partitions", partition.as_str()])?)
            }
            OperationRequest::GetBrokerInfo {} => HttpCall::get(rest(&["brokers"])?),
            OperationRequest::GetClusterMetadata {} => HttpCall::get(rest(&[])?),
            OperationRequest::TestConnection {} => {
                HttpCall::get(endpoint(&self.kafka_rest_url, &["clusters"])?)
            }
            OperationRequest::ListConnectors {} => HttpCall::get(connect(&["connectors"])?),
            OperationRequest::GetConnector { name } => {
                HttpCall::get(connect(&["connectors", name.as_str()])?)
            }
            OperationRequest::GetConnectorStatus { name } => {
                HttpCall::get(connect(&["connectors", name.as_str(), "status"])?)
            }
            OperationRequest::GetConnectorConfig { name } => {
                HttpCall::get(connect(&["connectors", name.as_str(), "config"])?)
            }
            OperationRequest::GetConnectorTasks { name } => {
                HttpCall::get(connect(&["connectors", name.as_str(), "tasks"])?)
            }
            OperationRequest::CreateConnector { name, config } => HttpCall::new(
                Method::POST,
                connect(&["connectors"])?,
                Some(json!({ "name": name, "config": config })),
            ),
            OperationRequest::UpdateConnectorConfig { name, config } => HttpCall::new(
                Method::PUT,
                connect(&["connectors", name.as_str(), "config"])?,
                Some(json!(config)),
            ),
            OperationRequest::DeleteConnector { name } => {
                HttpCall::new(Method::DELETE, connect(&["connectors", name.as_str()])?, None)
            }
            OperationRequest::PauseConnector { name } => {
                HttpCall::new(Method::PUT, connect(&["connectors", name.as_str(), "pause"])?, None)
            }
            OperationRequest::ResumeConnector { name } => {
                HttpCall::new(Method::PUT, connect(&["connectors", name.as_str(), "resume"])?, None)
            }
            OperationRequest::RestartConnector { name } => {
                HttpCall::new(Method::POST, connect(&["connectors", name.as_str(), "restart"])?, None)
            }
            OperationRequest::GetConnectorActiveTopics { name } => {
                HttpCall::get(connect(&["connectors", name.as_str(), "topics"])?)
            }
            OperationRequest::ListConnectorPlugins {} => {
                HttpCall::get(connect(&["connector-plugins"])?)
            }
            OperationRequest::ValidateConnectorConfig { plugin, config } => HttpCall::new(
                Method::PUT,
                connect(&["connector-plugins", plugin.as_str(), "config", "validate"])?,
                Some(json!(config)),
            ),
            OperationRequest::GetConnectServerInfo {} => HttpCall::get(connect(&[])?),
        };

        Ok(call)
    }

    async fn send(&self, headers: &HeaderMap, call: HttpCall) -> Result<BackendResponse, NetworkError> {
        let mut builder = self
            .client
            .request(call.method.clone(), &call.url)
            .headers(headers.clone());
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.to_ascii_lowercase().contains("html"));
        let text = response
            .text()
            .await
            .map_err(|e| NetworkError::sent(e.to_string()))?;

        tracing::debug!(backend = %self.name, method = %call.method, url = %call.url, status, "Backend call");

        // Gateways answer unauthenticated calls with a login page
        if is_html && (200..300).contains(&status) {
            return Ok(BackendResponse::new(
                401,
                Value::String("received HTML login page instead of JSON".to_string()),
            ));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(BackendResponse::new(status, body))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        headers: &HeaderMap,
        request: &OperationRequest,
        dispatch: &Dispatch,
    ) -> Result<BackendResponse, NetworkError> {
        let cluster = if uses_cluster(request) {
            self.resolve_cluster_id(headers).await?
        } else {
            String::new()
        };

        if let OperationRequest::ConsumeMessages {
            topic,
            consumer_group,
            ..
        } = request
        {
            let url = endpoint(
                &self.kafka_rest_url,
                &[
                    "clusters",
                    cluster.as_str(),
                    "consumers",
                    consumer_group.as_str(),
                    "instances",
                    CONSUMER_INSTANCE,
                    "subscription",
                ],
            )?;
            let subscribe = HttpCall::new(Method::POST, url, Some(json!({ "topics": [topic] })));
            match self.send(headers, subscribe).await {
                Ok(response) if response.is_success() => {}
                Ok(response) if self.is_auth_rejection(&response) => {
                    tracing::warn!(backend = %self.name, status = response.status, "Subscription rejected credentials");
                    return Ok(response);
                }
                Ok(response) => {
                    tracing::warn!(backend = %self.name, status = response.status, "Failed to subscribe to topic")
                }
                Err(e) => tracing::warn!(backend = %self.name, error = %e, "Failed to subscribe to topic"),
            }
        }

        let call = self.plan(request, &cluster)?;
        dispatch.mark_sent();
        let response = self.send(headers, call).await?;
        Ok(normalize(request, response))
    }
}

fn uses_cluster(request: &OperationRequest) -> bool {
    matches!(
        request,
        OperationRequest::ListTopics {}
            | OperationRequest::DescribeTopic { .. }
            | OperationRequest::TopicExists { .. }
            | OperationRequest::GetTopicPartitions { .. }
            | OperationRequest::CreateTopic { .. }
            | OperationRequest::DeleteTopic { .. }
            | OperationRequest::UpdateTopicConfig { .. }
            | OperationRequest::ProduceMessage { .. }
            | OperationRequest::ConsumeMessages { .. }
            | OperationRequest::GetTopicOffsets { .. }
            | OperationRequest::GetBrokerInfo {}
            | OperationRequest::GetClusterMetadata {}
    )
}

/// Append percent-encoded path segments to a root URL.
fn endpoint(root: &str, segments: &[&str]) -> Result<String, NetworkError> {
    let mut url = Url::parse(root)
        .map_err(|e| NetworkError::not_sent(format!("invalid URL {}: {}", root, e)))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| NetworkError::not_sent(format!("URL {} cannot take a path", root)))?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url.to_string())
}

fn config_entries(config: &BTreeMap<String, Value>) -> Vec<Value> {
    config
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ "name": name, "value": value })
        })
        .collect()
}

fn typed_data(data: &Value) -> Value {
    match data {
        Value::String(s) => json!({ "type": "STRING", "data": s }),
        other => json!({ "type": "JSON", "data": other }),
    }
}

fn produce_record(
    value: &Value,
    key: Option<&str>,
    partition: Option<i32>,
    headers: &BTreeMap<String, String>,
) -> Value {
    let mut record = json!({ "value": typed_data(value) });
    if let Some(key) = key {
        record["key"] = json!({ "type": "STRING", "data": key });
    }
    if let Some(partition) = partition {
        record["partition_id"] = json!(partition);
    }
    if !headers.is_empty() {
        record["headers"] = headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": STANDARD.encode(value) }))
            .collect();
    }
    record
}

fn first_cluster_id(body: &Value) -> Option<String> {
    let first = match body {
        Value::Array(items) => items.first(),
        Value::Object(map) => map.get("data").and_then(Value::as_array)?.first(),
        _ => None,
    }?;
    first
        .get("cluster_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn topic_names(body: &Value) -> Vec<String> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("data").or_else(|| map.get("topics")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.clone()),
            Value::Object(topic) => topic
                .get("topic_name")
                .or_else(|| topic.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn partition_count(body: &Value) -> u64 {
    match body.get("partitions_count").or_else(|| body.get("partitions")) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(1),
        Some(Value::Array(items)) => items.len() as u64,
        _ => 1,
    }
}

/// Shape responses so every backend returns the same payload for an operation.
fn normalize(request: &OperationRequest, response: BackendResponse) -> BackendResponse {
    match request {
        OperationRequest::ListTopics {} if response.is_success() => {
            let names = topic_names(&response.body);
            BackendResponse::new(
                response.status,
                json!({ "count": names.len(), "topics": names }),
            )
        }
        OperationRequest::TopicExists { name } if response.status == 404 => {
            BackendResponse::new(200, json!({ "topic": name, "exists": false }))
        }
        OperationRequest::TopicExists { name } if response.is_success() => {
            BackendResponse::new(response.status, json!({ "topic": name, "exists": true }))
        }
        OperationRequest::GetTopicPartitions { name } if response.is_success() => {
            BackendResponse::new(
                response.status,
                json!({ "topic": name, "partitions": partition_count(&response.body) }),
            )
        }
        OperationRequest::TestConnection {} if response.is_success() => BackendResponse::new(
            response.status,
            json!({ "connected": true, "cluster_id": first_cluster_id(&response.body) }),
        ),
        _ => response,
    }
}

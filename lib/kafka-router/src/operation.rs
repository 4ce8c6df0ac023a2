use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_CONSUMER_GROUP: &str = "mcp-consumer";
const DEFAULT_MAX_MESSAGES: u32 = 10;

/// Logical operation, independent of the backend serving it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ListTopics,
    DescribeTopic,
    TopicExists,
    GetTopicPartitions,
    CreateTopic,
    DeleteTopic,
    UpdateTopicConfig,
    ProduceMessage,
    ConsumeMessages,
    GetTopicOffsets,
    GetBrokerInfo,
    GetClusterMetadata,
    TestConnection,
    ListConnectors,
    GetConnector,
    GetConnectorStatus,
    GetConnectorConfig,
    GetConnectorTasks,
    CreateConnector,
    UpdateConnectorConfig,
    DeleteConnector,
    PauseConnector,
    ResumeConnector,
    RestartConnector,
    GetConnectorActiveTopics,
    ListConnectorPlugins,
    ValidateConnectorConfig,
    GetConnectServerInfo,
}

impl OperationKind {
    pub const ALL: [OperationKind; 28] = [
        OperationKind::ListTopics,
        OperationKind::DescribeTopic,
        OperationKind::TopicExists,
        OperationKind::GetTopicPartitions,
        OperationKind::CreateTopic,
        OperationKind::DeleteTopic,
        OperationKind::UpdateTopicConfig,
        OperationKind::ProduceMessage,
        OperationKind::ConsumeMessages,
        OperationKind::GetTopicOffsets,
        OperationKind::GetBrokerInfo,
        OperationKind::GetClusterMetadata,
        OperationKind::TestConnection,
        OperationKind::ListConnectors,
        OperationKind::GetConnector,
        OperationKind::GetConnectorStatus,
        OperationKind::GetConnectorConfig,
        OperationKind::GetConnectorTasks,
        OperationKind::CreateConnector,
        OperationKind::UpdateConnectorConfig,
        OperationKind::DeleteConnector,
        OperationKind::PauseConnector,
        OperationKind::ResumeConnector,
        OperationKind::RestartConnector,
        OperationKind::GetConnectorActiveTopics,
        OperationKind::ListConnectorPlugins,
        OperationKind::ValidateConnectorConfig,
        OperationKind::GetConnectServerInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ListTopics => "list_topics",
            OperationKind::DescribeTopic => "describe_topic",
            OperationKind::TopicExists => "topic_exists",
            OperationKind::GetTopicPartitions => "get_topic_partitions",
            OperationKind::CreateTopic => "create_topic",
            OperationKind::DeleteTopic => "delete_topic",
            OperationKind::UpdateTopicConfig => "update_topic_config",
            OperationKind::ProduceMessage => "produce_message",
            OperationKind::ConsumeMessages => "consume_messages",
            OperationKind::GetTopicOffsets => "get_topic_offsets",
            OperationKind::GetBrokerInfo => "get_broker_info",
            OperationKind::GetClusterMetadata => "get_cluster_metadata",
            OperationKind::TestConnection => "test_connection",
            OperationKind::ListConnectors => "list_connectors",
            OperationKind::GetConnector => "get_connector",
            OperationKind::GetConnectorStatus => "get_connector_status",
            OperationKind::GetConnectorConfig => "get_connector_config",
            OperationKind::GetConnectorTasks => "get_connector_tasks",
            OperationKind::CreateConnector => "create_connector",
            OperationKind::UpdateConnectorConfig => "update_connector_config",
            OperationKind::DeleteConnector => "delete_connector",
            OperationKind::PauseConnector => "pause_connector",
            OperationKind::ResumeConnector => "resume_connector",
            OperationKind::RestartConnector => "restart_connector",
            OperationKind::ListConnectorPlugins => "list_connector_plugins",
            OperationKind::GetConnectorActiveTopics => "get_connector_active_topics",
            OperationKind::ValidateConnectorConfig => "validate_connector_config",
            OperationKind::GetConnectServerInfo => "get_connect_server_info",
        }
    }

    /// Whether a sent call may change cluster state.
    ///
    /// An ambiguous failure of such a call is never retried on another backend.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateTopic
                | OperationKind::DeleteTopic
                | OperationKind::UpdateTopicConfig
                | OperationKind::ProduceMessage
                | OperationKind::ConsumeMessages
                | OperationKind::CreateConnector
                | OperationKind::UpdateConnectorConfig
                | OperationKind::DeleteConnector
                | OperationKind::RestartConnector
        )
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            OperationKind::ProduceMessage | OperationKind::ConsumeMessages => WRITE_TIMEOUT,
            kind if kind.has_side_effects() => WRITE_TIMEOUT,
            _ => READ_TIMEOUT,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown operation: {}", s))
    }
}

fn default_one() -> u32 {
    1
}

fn default_replication() -> u16 {
    1
}

fn default_consumer_group() -> String {
    DEFAULT_CONSUMER_GROUP.to_string()
}

fn default_max_messages() -> u32 {
    DEFAULT_MAX_MESSAGES
}

/// A logical operation together with its parameters.
///
/// Deserializes from `{"tool": "<name>", "arguments": {...}}`. Unknown
/// arguments (such as an advisory `method` hint) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum OperationRequest {
    ListTopics {},
    DescribeTopic {
        name: String,
    },
    TopicExists {
        name: String,
    },
    GetTopicPartitions {
        name: String,
    },
    CreateTopic {
        name: String,
        #[serde(default = "default_one")]
        partitions: u32,
        #[serde(default = "default_replication")]
        replication_factor: u16,
        #[serde(default)]
        config: BTreeMap<String, Value>,
    },
    DeleteTopic {
        name: String,
    },
    UpdateTopicConfig {
        name: String,
        config: BTreeMap<String, Value>,
    },
    ProduceMessage {
        topic: String,
        value: Value,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        partition: Option<i32>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    ConsumeMessages {
        topic: String,
        #[serde(default = "default_consumer_group")]
        consumer_group: String,
        #[serde(default = "default_max_messages")]
        max_messages: u32,
    },
    GetTopicOffsets {
        topic: String,
        partition: u32,
    },
    GetBrokerInfo {},
    GetClusterMetadata {},
    TestConnection {},
    ListConnectors {},
    GetConnector {
        name: String,
    },
    GetConnectorStatus {
        name: String,
    },
    GetConnectorConfig {
        name: String,
    },
    GetConnectorTasks {
        name: String,
    },
    CreateConnector {
        name: String,
        config: BTreeMap<String, Value>,
    },
    UpdateConnectorConfig {
        name: String,
        config: BTreeMap<String, Value>,
    },
    DeleteConnector {
        name: String,
    },
    PauseConnector {
        name: String,
    },
    ResumeConnector {
        name: String,
    },
    RestartConnector {
        name: String,
    },
    GetConnectorActiveTopics {
        name: String,
    },
    ListConnectorPlugins {},
    ValidateConnectorConfig {
        plugin: String,
        config: BTreeMap<String, Value>,
    },
    GetConnectServerInfo {},
}

impl OperationRequest {
    /// Build a request from a tool name and its JSON arguments.
    pub fn from_tool(tool: &str, arguments: Value) -> Result<Self, serde_json::Error> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        serde_json::from_value(serde_json::json!({
            "tool": tool,
            "arguments": arguments,
        }))
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::ListTopics {} => OperationKind::ListTopics,
            OperationRequest::DescribeTopic { .. } => OperationKind::DescribeTopic,
            OperationRequest::TopicExists { .. } => OperationKind::TopicExists,
            OperationRequest::GetTopicPartitions { .. } => OperationKind::GetTopicPartitions,
            OperationRequest::CreateTopic { .. } => OperationKind::CreateTopic,
            OperationRequest::DeleteTopic { .. } => OperationKind::DeleteTopic,
            OperationRequest::UpdateTopicConfig { .. } => OperationKind::UpdateTopicConfig,
            OperationRequest::ProduceMessage { .. } => OperationKind::ProduceMessage,
            OperationRequest::ConsumeMessages { .. } => OperationKind::ConsumeMessages,
            OperationRequest::GetTopicOffsets { .. } => OperationKind::GetTopicOffsets,
            OperationRequest::GetBrokerInfo {} => OperationKind::GetBrokerInfo,
            OperationRequest::GetClusterMetadata {} => OperationKind::GetClusterMetadata,
            OperationRequest::TestConnection {} => OperationKind::TestConnection,
            OperationRequest::ListConnectors {} => OperationKind::ListConnectors,
            OperationRequest::GetConnector { .. } => OperationKind::GetConnector,
            OperationRequest::GetConnectorStatus { .. } => OperationKind::GetConnectorStatus,
            OperationRequest::GetConnectorConfig { .. } => OperationKind::GetConnectorConfig,
            OperationRequest::GetConnectorTasks { .. } => OperationKind::GetConnectorTasks,
            OperationRequest::CreateConnector { .. } => OperationKind::CreateConnector,
            OperationRequest::UpdateConnectorConfig { .. } => OperationKind::UpdateConnectorConfig,
            OperationRequest::DeleteConnector { .. } => OperationKind::DeleteConnector,
            OperationRequest::PauseConnector { .. } => OperationKind::PauseConnector,
            OperationRequest::ResumeConnector { .. } => OperationKind::ResumeConnector,
            OperationRequest::RestartConnector { .. } => OperationKind::RestartConnector,
            OperationRequest::GetConnectorActiveTopics { .. } => {
                OperationKind::GetConnectorActiveTopics
            }
            OperationRequest::ListConnectorPlugins {} => OperationKind::ListConnectorPlugins,
            OperationRequest::ValidateConnectorConfig { .. } => {
                OperationKind::ValidateConnectorConfig
            }
            OperationRequest::GetConnectServerInfo {} => OperationKind::GetConnectServerInfo,
        }
    }
}

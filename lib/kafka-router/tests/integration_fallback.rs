// lib/kafka-router/tests/integration_fallback.rs

use kafka_auth::{Authenticator, AuthenticatorConfig, Credentials};
use kafka_router::{
    BackendDescriptor, EndpointLayout, HttpBackend, OperationKind, OperationRequest, Orchestrator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASIC_ADMIN: &str = "Basic YWRtaW46c2VjcmV0";

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn descriptor(rank: u32, name: &str, server: &MockServer, layout: EndpointLayout) -> BackendDescriptor {
    let credentials = Arc::new(Credentials::new("admin", "secret"));
    let auth = Authenticator::new(name, server.uri(), credentials, AuthenticatorConfig::default())
        .unwrap();
    let backend = HttpBackend::new(name, &server.uri(), layout, true)
        .unwrap()
        .with_cluster_id("c1");
    BackendDescriptor::new(rank, Arc::new(backend), Arc::new(auth))
}

#[tokio::test]
async fn test_falls_back_from_cloud_to_gateway() {
    let cloud = healthy_server().await;
    Mock::given(method("GET"))
        .and(path("/cdp-proxy/kafka-rest/clusters/c1/topics"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&cloud)
        .await;

    let gateway = healthy_server().await;
    Mock::given(method("GET"))
        .and(path("/gateway/cdp-proxy-api/kafka-rest/clusters/c1/topics"))
        .and(header("authorization", BASIC_ADMIN))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"topic_name": "orders"}]})),
        )
        .expect(1)
        .mount(&gateway)
        .await;

    let orchestrator = Orchestrator::builder()
        .default_route(vec![
            descriptor(
                0,
                "cloud",
                &cloud,
                EndpointLayout::CloudRest {
                    path_prefix: String::new(),
                },
            ),
            descriptor(
                1,
                "gateway",
                &gateway,
                EndpointLayout::Gateway {
                    topology: "cdp-proxy-api".to_string(),
                },
            ),
        ])
        .build();

    let result = orchestrator.execute(&OperationRequest::ListTopics {}).await;

    assert!(result.succeeded);
    assert_eq!(result.served_by, "gateway");
    assert_eq!(result.payload, Some(json!({"count": 1, "topics": ["orders"]})));
}

#[tokio::test]
async fn test_all_backends_failing_reports_each_cause() {
    let cloud = healthy_server().await;
    Mock::given(method("DELETE"))
        .and(path("/cdp-proxy/kafka-rest/clusters/c1/topics/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_string("broker down"))
        .mount(&cloud)
        .await;

    let gateway = healthy_server().await;
    Mock::given(method("DELETE"))
        .and(path("/gateway/cdp-proxy-api/kafka-rest/clusters/c1/topics/orders"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "unknown"})))
        .mount(&gateway)
        .await;

    let orchestrator = Orchestrator::builder()
        .route(
            OperationKind::DeleteTopic,
            vec![
                descriptor(
                    0,
                    "cloud",
                    &cloud,
                    EndpointLayout::CloudRest {
                        path_prefix: String::new(),
                    },
                ),
                descriptor(
                    1,
                    "gateway",
                    &gateway,
                    EndpointLayout::Gateway {
                        topology: "cdp-proxy-api".to_string(),
                    },
                ),
            ],
        )
        .build();

    let request = OperationRequest::from_tool("delete_topic", json!({"name": "orders"})).unwrap();
    let result = orchestrator.execute(&request).await;

    assert!(!result.succeeded);
    assert_eq!(result.served_by, "none");
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["failures"][0]["backend"], "cloud");
    assert_eq!(value["failures"][0]["reason"], "status 500: broker down");
    assert_eq!(value["failures"][1]["backend"], "gateway");
}

#[tokio::test]
async fn test_write_stalled_in_discovery_falls_back() {
    let stalled = healthy_server().await;
    Mock::given(method("GET"))
        .and(path("/cdp-proxy/kafka-rest/clusters"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"cluster_id": "c1"}]}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&stalled)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&stalled)
        .await;

    let gateway = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/gateway/cdp-proxy-api/kafka-rest/clusters/c1/topics"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"topic_name": "orders"})))
        .expect(1)
        .mount(&gateway)
        .await;

    let credentials = Arc::new(Credentials::new("admin", "secret"));
    let auth = Authenticator::new("a", stalled.uri(), credentials, AuthenticatorConfig::default())
        .unwrap();
    let discovering = HttpBackend::new(
        "a",
        &stalled.uri(),
        EndpointLayout::CloudRest {
            path_prefix: String::new(),
        },
        true,
    )
    .unwrap();

    let orchestrator = Orchestrator::builder()
        .default_route(vec![
            BackendDescriptor::new(0, Arc::new(discovering), Arc::new(auth)),
            descriptor(
                1,
                "b",
                &gateway,
                EndpointLayout::Gateway {
                    topology: "cdp-proxy-api".to_string(),
                },
            ),
        ])
        .attempt_timeout(Duration::from_secs(1))
        .build();

    let request = OperationRequest::from_tool("create_topic", json!({"name": "orders"})).unwrap();
    let result = orchestrator.execute(&request).await;

    assert!(result.succeeded);
    assert_eq!(result.served_by, "b");
}

use crate::backend::{BackendDescriptor, BackendResponse, Dispatch};
use crate::error::{BackendCallError, BackendErrorKind, NetworkError, OrchestrationError};
use crate::observer::{AttemptEvent, AttemptObserver};
use crate::operation::{OperationKind, OperationRequest};
use crate::result::OperationResult;
use kafka_auth::{AuthError, HeaderMap};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct OrchestratorBuilder {
    routes: HashMap<OperationKind, Vec<BackendDescriptor>>,
    default_route: Vec<BackendDescriptor>,
    observers: Vec<Arc<dyn AttemptObserver>>,
    attempt_timeout: Option<Duration>,
}

impl OrchestratorBuilder {
    /// Backends for one operation, replacing any previous list
    pub fn route(mut self, operation: OperationKind, backends: Vec<BackendDescriptor>) -> Self {
        self.routes.insert(operation, backends);
        self
    }

    /// Backends for operations without their own route
    pub fn default_route(mut self, backends: Vec<BackendDescriptor>) -> Self {
        self.default_route = backends;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Per-attempt timeout for every operation instead of the operation default
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn build(mut self) -> Orchestrator {
        // Stable: equal ranks keep their configured order
        for backends in self.routes.values_mut() {
            backends.sort_by_key(|b| b.priority_rank);
        }
        self.default_route.sort_by_key(|b| b.priority_rank);

        Orchestrator {
            routes: self.routes,
            default_route: self.default_route,
            observers: self.observers,
            attempt_timeout: self.attempt_timeout,
        }
    }
}

/// Runs a logical operation against an ordered list of backends, first success wins.
pub struct Orchestrator {
    routes: HashMap<OperationKind, Vec<BackendDescriptor>>,
    default_route: Vec<BackendDescriptor>,
    observers: Vec<Arc<dyn AttemptObserver>>,
    attempt_timeout: Option<Duration>,
}

enum AttemptError {
    Failed(BackendCallError),
    Ambiguous(BackendCallError),
}

/// Backend currently carrying a side-effecting call, if any
#[derive(Default)]
struct InFlight(Mutex<Option<(String, Arc<Dispatch>)>>);

impl InFlight {
    fn set(&self, call: Option<(&str, Arc<Dispatch>)>) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard = call.map(|(backend, dispatch)| (backend.to_string(), dispatch));
    }

    /// Backend whose side-effecting request already went out
    fn sent_to(&self) -> Option<String> {
        let guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|(_, dispatch)| dispatch.is_sent())
            .map(|(backend, _)| backend.clone())
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Ordered backends tried for `operation`
    pub fn route(&self, operation: OperationKind) -> &[BackendDescriptor] {
        self.routes
            .get(&operation)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_route)
    }

    /// Backend names per operation, in try order
    pub fn route_table(&self) -> Vec<(OperationKind, Vec<&str>)> {
        OperationKind::ALL
            .iter()
            .map(|kind| {
                let names = self.route(*kind).iter().map(|b| b.name.as_str()).collect();
                (*kind, names)
            })
            .collect()
    }

    pub async fn execute(&self, request: &OperationRequest) -> OperationResult {
        self.run(request, &InFlight::default()).await
    }

    /// Execute until `cancel` completes.
    ///
    /// Cancelling drops the in-flight call and skips remaining backends. A
    /// side-effecting call that was on the wire yields `AmbiguousOutcome`.
    pub async fn execute_until<F>(&self, request: &OperationRequest, cancel: F) -> OperationResult
    where
        F: Future<Output = ()>,
    {
        let in_flight = InFlight::default();
        tokio::select! {
            result = self.run(request, &in_flight) => result,
            _ = cancel => {
                let operation = request.kind();
                let error = match in_flight.sent_to() {
                    Some(backend) => OrchestrationError::AmbiguousOutcome {
                        operation,
                        cause: BackendCallError::new(
                            backend,
                            BackendErrorKind::Network(NetworkError::sent("cancelled while the call was in flight")),
                        ),
                    },
                    None => OrchestrationError::Cancelled { operation },
                };
                tracing::warn!(%operation, error = %error, "Operation cancelled");
                OperationResult::failed(error)
            }
        }
    }

    pub async fn execute_with_deadline(
        &self,
        request: &OperationRequest,
        deadline: Duration,
    ) -> OperationResult {
        self.execute_until(request, tokio::time::sleep(deadline)).await
    }

    async fn run(&self, request: &OperationRequest, in_flight: &InFlight) -> OperationResult {
        let operation = request.kind();
        let backends = self.route(operation);
        if backends.is_empty() {
            return OperationResult::failed(OrchestrationError::NoRoute { operation });
        }

        let mut failures = Vec::with_capacity(backends.len());
        for descriptor in backends {
            tracing::debug!(%operation, backend = %descriptor.name, "Trying backend");
            let started = Instant::now();
            let outcome = self.attempt(descriptor, request, in_flight).await;
            self.notify(AttemptEvent {
                operation,
                backend: descriptor.name.clone(),
                succeeded: outcome.is_ok(),
                latency: started.elapsed(),
            });

            match outcome {
                Ok(payload) => {
                    tracing::debug!(%operation, backend = %descriptor.name, "Served");
                    return OperationResult::served(operation, &descriptor.name, payload);
                }
                Err(AttemptError::Ambiguous(cause)) => {
                    tracing::error!(%operation, error = %cause, "Outcome unknown, not trying other backends");
                    return OperationResult::failed(OrchestrationError::AmbiguousOutcome {
                        operation,
                        cause,
                    });
                }
                Err(AttemptError::Failed(cause)) => {
                    tracing::warn!(%operation, error = %cause, "Backend failed");
                    failures.push(cause);
                }
            }
        }

        let error = OrchestrationError::AllBackendsFailed {
            operation,
            failures,
        };
        tracing::error!(error = %error, "Operation failed");
        OperationResult::failed(error)
    }

    async fn attempt(
        &self,
        descriptor: &BackendDescriptor,
        request: &OperationRequest,
        in_flight: &InFlight,
    ) -> Result<Value, AttemptError> {
        let auth_failure = |e: AuthError| {
            AttemptError::Failed(BackendCallError::new(
                &descriptor.name,
                BackendErrorKind::Auth(e.to_string()),
            ))
        };

        let headers = headers_for(descriptor).await.map_err(auth_failure)?;
        let mut response = self.call(descriptor, &headers, request, in_flight).await?;

        if descriptor.backend.is_auth_rejection(&response) {
            tracing::warn!(backend = %descriptor.name, "Credentials rejected, refreshing once");
            descriptor.authenticator.refresh().await.map_err(auth_failure)?;
            let headers = descriptor
                .authenticator
                .get_auth_headers()
                .await
                .map_err(auth_failure)?;
            response = self.call(descriptor, &headers, request, in_flight).await?;
        }

        if response.is_success() {
            Ok(response.body)
        } else {
            Err(AttemptError::Failed(BackendCallError::status(
                &descriptor.name,
                response.status,
                &response.body,
            )))
        }
    }

    async fn call(
        &self,
        descriptor: &BackendDescriptor,
        headers: &HeaderMap,
        request: &OperationRequest,
        in_flight: &InFlight,
    ) -> Result<BackendResponse, AttemptError> {
        let operation = request.kind();
        let side_effects = operation.has_side_effects();
        let timeout = self
            .attempt_timeout
            .unwrap_or_else(|| operation.default_timeout());

        let dispatch = Arc::new(Dispatch::default());
        if side_effects {
            in_flight.set(Some((descriptor.name.as_str(), dispatch.clone())));
        }
        let outcome = tokio::time::timeout(
            timeout,
            descriptor.backend.execute(headers, request, &dispatch),
        )
        .await;
        in_flight.set(None);

        let (kind, sent) = match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => {
                let sent = e.sent;
                (BackendErrorKind::Network(e), sent)
            }
            Err(_) => (BackendErrorKind::Timeout(timeout), dispatch.is_sent()),
        };

        let error = BackendCallError::new(&descriptor.name, kind);
        if side_effects && sent {
            Err(AttemptError::Ambiguous(error))
        } else {
            Err(AttemptError::Failed(error))
        }
    }

    fn notify(&self, event: AttemptEvent) {
        for observer in &self.observers {
            observer.record(&event);
        }
    }
}

/// Headers for a backend, authenticating or refreshing first when needed.
async fn headers_for(descriptor: &BackendDescriptor) -> Result<HeaderMap, AuthError> {
    let auth = &descriptor.authenticator;
    if !auth.is_token_valid().await {
        match auth.get_auth_headers().await {
            Err(AuthError::NotAuthenticated) => auth.ensure_authenticated().await?,
            _ => auth.refresh().await?,
        };
    }
    auth.get_auth_headers().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::observer::AttemptStats;
    use async_trait::async_trait;
    use kafka_auth::{AuthMethod, AuthProvider, Token, TokenScheme};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Reply = Result<BackendResponse, NetworkError>;

    struct MockBackend {
        name: String,
        replies: Mutex<VecDeque<Reply>>,
        delay: Option<Duration>,
        stall_before_send: Option<Duration>,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new(name: &str, replies: Vec<Reply>) -> Arc<Self> {
            Self::delayed(name, replies, None)
        }

        fn delayed(name: &str, replies: Vec<Reply>, delay: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(replies.into()),
                delay,
                stall_before_send: None,
                calls: AtomicUsize::new(0),
            })
        }

        /// Hangs in its preparatory step, before the operation is sent
        fn stalled(name: &str, stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(VecDeque::new()),
                delay: None,
                stall_before_send: Some(stall),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &HeaderMap, _: &OperationRequest, dispatch: &Dispatch) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall_before_send {
                tokio::time::sleep(stall).await;
            }
            dispatch.mark_sent();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(BackendResponse::new(200, json!({"ok": true}))))
        }
    }

    #[derive(Default)]
    struct MockAuth {
        authenticated: AtomicBool,
        fail: bool,
        refreshes: AtomicUsize,
    }

    impl MockAuth {
        fn ready() -> Arc<Self> {
            let auth = Self::default();
            auth.authenticated.store(true, Ordering::SeqCst);
            Arc::new(auth)
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthProvider for MockAuth {
        fn name(&self) -> &str {
            "mock"
        }

        async fn get_auth_headers(&self) -> Result<HeaderMap, AuthError> {
            if !self.authenticated.load(Ordering::SeqCst) {
                return Err(AuthError::NotAuthenticated);
            }
            let mut headers = HeaderMap::new();
            headers.insert("authorization", "Bearer mock".parse().unwrap());
            Ok(headers)
        }

        async fn is_token_valid(&self) -> bool {
            self.authenticated.load(Ordering::SeqCst)
        }

        async fn ensure_authenticated(&self) -> Result<Token, AuthError> {
            if self.fail {
                return Err(AuthError::Authentication {
                    method: AuthMethod::Basic,
                    cause: "bad password".to_string(),
                });
            }
            self.authenticated.store(true, Ordering::SeqCst);
            Ok(Token::static_token("mock".to_string(), TokenScheme::Bearer))
        }

        async fn refresh(&self) -> Result<Token, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.ensure_authenticated().await
        }
    }

    fn descriptor(rank: u32, backend: &Arc<MockBackend>, auth: &Arc<MockAuth>) -> BackendDescriptor {
        BackendDescriptor::new(rank, backend.clone(), auth.clone())
    }

    fn status(code: u16) -> Reply {
        Ok(BackendResponse::new(code, json!({"error_code": code})))
    }

    fn list_topics() -> OperationRequest {
        OperationRequest::ListTopics {}
    }

    fn create_topic() -> OperationRequest {
        OperationRequest::from_tool("create_topic", json!({"name": "orders"})).unwrap()
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![status(500)]);
        let b = MockBackend::new("b", vec![]);
        let c = MockBackend::new("c", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![
                descriptor(0, &a, &auth),
                descriptor(1, &b, &auth),
                descriptor(2, &c, &auth),
            ])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert!(result.succeeded);
        assert_eq!(result.served_by, "b");
        assert_eq!(result.payload, Some(json!({"ok": true})));
        assert_eq!(a.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_priority_rank_orders_backends() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(5, &a, &auth), descriptor(1, &b, &auth)])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert_eq!(result.served_by, "b");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_retry_on_auth_rejection() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![status(401)]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth)])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert!(result.succeeded);
        assert_eq!(auth.refreshes(), 1);
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_rejection_moves_on() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![status(401), status(401)]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth), descriptor(1, &b, &auth)])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert_eq!(result.served_by, "b");
        assert_eq!(auth.refreshes(), 1);
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_all_fail_aggregates_causes() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![status(500)]);
        let b = MockBackend::new("b", vec![Err(NetworkError::not_sent("connection refused"))]);
        let stats = Arc::new(AttemptStats::new());
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth), descriptor(1, &b, &auth)])
            .observer(stats.clone())
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert!(!result.succeeded);
        assert_eq!(result.served_by, "none");
        let error = result.error.unwrap();
        assert_eq!(error.failures().len(), 2);
        let message = error.to_string();
        assert!(message.contains("[a: status 500"));
        assert!(message.contains("[b: network error: connection refused]"));
        assert_eq!(stats.get("a", OperationKind::ListTopics).unwrap().failures, 1);
        assert_eq!(stats.get("b", OperationKind::ListTopics).unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_is_a_backend_failure() {
        let broken = Arc::new(MockAuth {
            fail: true,
            ..Default::default()
        });
        let ready = MockAuth::ready();
        let a = MockBackend::new("a", vec![]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &broken), descriptor(1, &b, &ready)])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert_eq!(result.served_by, "b");
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_cold_start_authenticates_before_call() {
        let auth = Arc::new(MockAuth::default());
        let a = MockBackend::new("a", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth)])
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert!(result.succeeded);
        assert!(auth.authenticated.load(Ordering::SeqCst));
        assert_eq!(auth.refreshes(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_write_is_not_retried_elsewhere() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![Err(NetworkError::sent("connection reset"))]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth), descriptor(1, &b, &auth)])
            .build();

        let result = orchestrator.execute(&create_topic()).await;

        assert!(!result.succeeded);
        assert_eq!(result.served_by, "none");
        assert!(matches!(
            result.error,
            Some(OrchestrationError::AmbiguousOutcome { .. })
        ));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsent_write_moves_on() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![Err(NetworkError::not_sent("connection refused"))]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth), descriptor(1, &b, &auth)])
            .build();

        let result = orchestrator.execute(&create_topic()).await;

        assert_eq!(result.served_by, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_moves_on() {
        let auth = MockAuth::ready();
        let slow = MockBackend::delayed("slow", vec![], Some(Duration::from_secs(5)));
        let fast = MockBackend::new("fast", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &slow, &auth), descriptor(1, &fast, &auth)])
            .attempt_timeout(Duration::from_millis(100))
            .build();

        let result = orchestrator.execute(&list_topics()).await;

        assert_eq!(result.served_by, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_is_ambiguous() {
        let auth = MockAuth::ready();
        let slow = MockBackend::delayed("slow", vec![], Some(Duration::from_secs(5)));
        let fast = MockBackend::new("fast", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &slow, &auth), descriptor(1, &fast, &auth)])
            .attempt_timeout(Duration::from_millis(100))
            .build();

        let result = orchestrator.execute(&create_topic()).await;

        assert!(matches!(
            result.error,
            Some(OrchestrationError::AmbiguousOutcome { .. })
        ));
        assert_eq!(fast.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_before_send_moves_on() {
        let auth = MockAuth::ready();
        let stalled = MockBackend::stalled("stalled", Duration::from_secs(3));
        let healthy = MockBackend::new("healthy", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &stalled, &auth), descriptor(1, &healthy, &auth)])
            .attempt_timeout(Duration::from_secs(1))
            .build();

        let result = orchestrator.execute(&create_topic()).await;

        assert!(result.succeeded);
        assert_eq!(result.served_by, "healthy");
        assert_eq!(healthy.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_write_is_sent_is_cancelled() {
        let auth = MockAuth::ready();
        let stalled = MockBackend::stalled("stalled", Duration::from_secs(5));
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &stalled, &auth)])
            .build();

        let result = orchestrator
            .execute_with_deadline(&create_topic(), Duration::from_millis(50))
            .await;

        assert!(matches!(
            result.error,
            Some(OrchestrationError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_write_is_ambiguous() {
        let auth = MockAuth::ready();
        let slow = MockBackend::delayed("slow", vec![], Some(Duration::from_secs(5)));
        let next = MockBackend::new("next", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &slow, &auth), descriptor(1, &next, &auth)])
            .build();

        let result = orchestrator
            .execute_with_deadline(&create_topic(), Duration::from_millis(50))
            .await;

        match result.error {
            Some(OrchestrationError::AmbiguousOutcome { cause, .. }) => {
                assert_eq!(cause.backend, "slow")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(next.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_read_is_cancelled() {
        let auth = MockAuth::ready();
        let slow = MockBackend::delayed("slow", vec![], Some(Duration::from_secs(5)));
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &slow, &auth)])
            .build();

        let result = orchestrator
            .execute_with_deadline(&list_topics(), Duration::from_millis(50))
            .await;

        assert!(matches!(
            result.error,
            Some(OrchestrationError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_route() {
        let orchestrator = Orchestrator::builder().build();

        let result = orchestrator.execute(&list_topics()).await;

        assert!(matches!(result.error, Some(OrchestrationError::NoRoute { .. })));
        assert_eq!(result.served_by, "none");
    }

    #[tokio::test]
    async fn test_operation_route_overrides_default() {
        let auth = MockAuth::ready();
        let a = MockBackend::new("a", vec![]);
        let b = MockBackend::new("b", vec![]);
        let orchestrator = Orchestrator::builder()
            .default_route(vec![descriptor(0, &a, &auth)])
            .route(OperationKind::CreateTopic, vec![descriptor(0, &b, &auth)])
            .build();

        assert_eq!(orchestrator.execute(&create_topic()).await.served_by, "b");
        assert_eq!(orchestrator.execute(&list_topics()).await.served_by, "a");
        let table = orchestrator.route_table();
        assert_eq!(table.len(), OperationKind::ALL.len());
        assert!(table.contains(&(OperationKind::CreateTopic, vec!["b"])));
    }
}

mod http;

pub use http::{EndpointLayout, HttpBackend};

use crate::error::NetworkError;
use crate::operation::OperationRequest;
use async_trait::async_trait;
use kafka_auth::{AuthProvider, HeaderMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Response of a backend call, before success/failure is decided
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl BackendResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Set by a backend right before the request carrying the operation goes out.
///
/// Work done earlier in `execute` (cluster discovery, consumer subscription)
/// cannot change state, so a timeout before the mark is not ambiguous.
#[derive(Debug, Default)]
pub struct Dispatch {
    sent: AtomicBool,
}

impl Dispatch {
    pub fn mark_sent(&self) {
        self.sent.store(true, Ordering::SeqCst);
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

/// One access path to the cluster (cloud REST proxy, gateway proxy, direct client)
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging and `served_by`
    fn name(&self) -> &str;

    /// Issue the call for `request` with the given auth headers.
    ///
    /// Implementations call `dispatch.mark_sent()` just before sending the
    /// request that carries the operation itself.
    async fn execute(
        &self,
        headers: &HeaderMap,
        request: &OperationRequest,
        dispatch: &Dispatch,
    ) -> Result<BackendResponse, NetworkError>;

    /// Whether the response means the credentials were rejected
    fn is_auth_rejection(&self, response: &BackendResponse) -> bool {
        response.status == 401
    }
}

/// A backend bound to the authenticator that signs its calls
#[derive(Clone)]
pub struct BackendDescriptor {
    pub name: String,
    pub priority_rank: u32,
    pub backend: Arc<dyn Backend>,
    pub authenticator: Arc<dyn AuthProvider>,
}

impl BackendDescriptor {
    pub fn new(
        priority_rank: u32,
        backend: Arc<dyn Backend>,
        authenticator: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            name: backend.name().to_string(),
            priority_rank,
            backend,
            authenticator,
        }
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("priority_rank", &self.priority_rank)
            .field("authenticator", &self.authenticator.name())
            .finish()
    }
}

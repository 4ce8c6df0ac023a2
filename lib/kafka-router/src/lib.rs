//! kafka-router - runs logical Kafka operations against ordered backends
//!
//! Each operation has a configured list of backends. They are tried in
//! order until one succeeds; a rejected credential gets one refresh and one
//! retry on the same backend. Side-effecting calls whose outcome is unknown
//! are never repeated on another backend.

pub mod backend;
mod error;
mod observer;
mod operation;
mod orchestrator;
mod result;

pub use backend::{
    Backend, BackendDescriptor, BackendResponse, Dispatch, EndpointLayout, HttpBackend,
};
pub use error::{BackendCallError, BackendErrorKind, NetworkError, OrchestrationError};
pub use observer::{AttemptCounters, AttemptEvent, AttemptObserver, AttemptStats};
pub use operation::{OperationKind, OperationRequest};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use result::{OperationResult, SERVED_BY_NONE};

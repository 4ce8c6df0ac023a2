use crate::operation::OperationKind;
use std::time::Duration;
use thiserror::Error;

const MAX_BODY_IN_ERROR: usize = 200;

/// Transport-level failure reported by a backend.
///
/// `sent` tells whether the request may have reached the server, which
/// decides if a side-effecting call has an unknown outcome.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NetworkError {
    pub sent: bool,
    pub message: String,
}

impl NetworkError {
    pub fn not_sent(message: impl Into<String>) -> Self {
        Self {
            sent: false,
            message: message.into(),
        }
    }

    pub fn sent(message: impl Into<String>) -> Self {
        Self {
            sent: true,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        // Connect and builder errors never leave the process
        let sent = !(e.is_connect() || e.is_builder());
        Self {
            sent,
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum BackendErrorKind {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(NetworkError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Failure of one backend attempt
#[derive(Debug, Clone, Error)]
#[error("{backend}: {kind}")]
pub struct BackendCallError {
    pub backend: String,
    pub kind: BackendErrorKind,
}

impl BackendCallError {
    pub fn new(backend: impl Into<String>, kind: BackendErrorKind) -> Self {
        Self {
            backend: backend.into(),
            kind,
        }
    }

    pub(crate) fn status(backend: &str, status: u16, body: &serde_json::Value) -> Self {
        let mut body = match body {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        if body.len() > MAX_BODY_IN_ERROR {
            let mut cut = MAX_BODY_IN_ERROR;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Self::new(backend, BackendErrorKind::Status { status, body })
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{operation}: outcome unknown, not retried on other backends ({cause})")]
    AmbiguousOutcome {
        operation: OperationKind,
        cause: BackendCallError,
    },

    #[error("{operation}: all backends failed: {}", format_failures(.failures))]
    AllBackendsFailed {
        operation: OperationKind,
        failures: Vec<BackendCallError>,
    },

    #[error("{operation}: cancelled before any backend call was sent")]
    Cancelled { operation: OperationKind },

    #[error("{operation}: no backends configured")]
    NoRoute { operation: OperationKind },
}

impl OrchestrationError {
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::AmbiguousOutcome { operation, .. }
            | Self::AllBackendsFailed { operation, .. }
            | Self::Cancelled { operation }
            | Self::NoRoute { operation } => *operation,
        }
    }

    /// Per-backend failures behind this error
    pub fn failures(&self) -> &[BackendCallError] {
        match self {
            Self::AmbiguousOutcome { cause, .. } => std::slice::from_ref(cause),
            Self::AllBackendsFailed { failures, .. } => failures,
            Self::Cancelled { .. } | Self::NoRoute { .. } => &[],
        }
    }
}

fn format_failures(failures: &[BackendCallError]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}]", f))
        .collect::<Vec<_>>()
        .join(" ")
}

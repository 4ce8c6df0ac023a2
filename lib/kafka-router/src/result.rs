use crate::error::OrchestrationError;
use crate::operation::OperationKind;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// `served_by` value of a result no backend served
pub const SERVED_BY_NONE: &str = "none";

/// Outcome of one orchestrated operation, built fresh for every call.
#[derive(Debug)]
pub struct OperationResult {
    pub operation: OperationKind,
    pub succeeded: bool,
    pub served_by: String,
    pub payload: Option<Value>,
    pub error: Option<OrchestrationError>,
}

impl OperationResult {
    pub(crate) fn served(operation: OperationKind, backend: &str, payload: Value) -> Self {
        Self {
            operation,
            succeeded: true,
            served_by: backend.to_string(),
            payload: Some(payload),
            error: None,
        }
    }

    pub(crate) fn failed(error: OrchestrationError) -> Self {
        Self {
            operation: error.operation(),
            succeeded: false,
            served_by: SERVED_BY_NONE.to_string(),
            payload: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, OrchestrationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Serialize)]
struct FailureView<'a> {
    backend: &'a str,
    reason: String,
}

#[derive(Serialize)]
struct ResultView<'a> {
    operation: OperationKind,
    succeeded: bool,
    served_by: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<FailureView<'a>>,
}

impl Serialize for OperationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let failures = self
            .error
            .as_ref()
            .map(|e| e.failures())
            .unwrap_or_default()
            .iter()
            .map(|f| FailureView {
                backend: &f.backend,
                reason: f.kind.to_string(),
            })
            .collect();

        ResultView {
            operation: self.operation,
            succeeded: self.succeeded,
            served_by: &self.served_by,
            payload: self.payload.as_ref(),
            error: self.error.as_ref().map(ToString::to_string),
            failures,
        }
        .serialize(serializer)
    }
}

use crate::operation::OperationKind;
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

/// One backend attempt, as reported to observers
#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub operation: OperationKind,
    pub backend: String,
    pub succeeded: bool,
    pub latency: Duration,
}

/// Notified after every backend attempt. Must not block.
pub trait AttemptObserver: Send + Sync {
    fn record(&self, event: &AttemptEvent);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptCounters {
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
}

/// In-memory per backend/operation attempt statistics
#[derive(Debug, Default)]
pub struct AttemptStats {
    counters: DashMap<(String, OperationKind), AttemptCounters>,
}

impl AttemptStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, backend: &str, operation: OperationKind) -> Option<AttemptCounters> {
        self.counters
            .get(&(backend.to_string(), operation))
            .map(|entry| entry.value().clone())
    }

    /// Copy of all counters, sorted by backend then operation
    pub fn snapshot(&self) -> Vec<(String, OperationKind, AttemptCounters)> {
        let mut all: Vec<_> = self
            .counters
            .iter()
            .map(|entry| {
                let (backend, operation) = entry.key();
                (backend.clone(), *operation, entry.value().clone())
            })
            .collect();
        all.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        all
    }
}

impl AttemptObserver for AttemptStats {
    fn record(&self, event: &AttemptEvent) {
        let mut counters = self
            .counters
            .entry((event.backend.clone(), event.operation))
            .or_default();
        if event.succeeded {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        counters.total_latency_ms += event.latency.as_millis() as u64;
    }
}

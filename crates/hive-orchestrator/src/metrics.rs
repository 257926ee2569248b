//! Metrics sink seam.
//!
//! Every executed step (and every request an agent handles) produces one
//! record. Recording is fire-and-forget; sinks never fail the caller.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    /// What was measured, usually the step action.
    pub kind: String,
    /// Department or agent type the work belonged to.
    pub context: String,
    pub details: serde_json::Value,
}

/// Destination for metric records (an external event/metrics store).
pub trait MetricsSink: Send + Sync {
    fn record(&self, subject_id: &str, record: MetricRecord);
}

/// Emits each record as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, subject_id: &str, record: MetricRecord) {
        tracing::info!(
            target: "hive::metrics",
            subject_id,
            success = record.success,
            duration_ms = record.duration_ms,
            kind = %record.kind,
            context = %record.context,
            details = %record.details,
            "metric"
        );
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    records: Mutex<Vec<(String, MetricRecord)>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, MetricRecord)> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn failures(&self) -> usize {
        self.records().iter().filter(|(_, r)| !r.success).count()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, subject_id: &str, record: MetricRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((subject_id.to_string(), record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool) -> MetricRecord {
        MetricRecord {
            timestamp: Utc::now(),
            success,
            duration_ms: 5,
            kind: "quote".into(),
            context: "pricing".into(),
            details: serde_json::json!({}),
        }
    }

    #[test]
    fn test_memory_metrics_counts_failures() {
        let sink = MemoryMetrics::new();
        assert!(sink.is_empty());
        sink.record("t1", record(true));
        sink.record("t1", record(false));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.records()[0].0, "t1");
    }
}

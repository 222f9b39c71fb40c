//! Metrics store publisher

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{pascal_case, MetricRecord, MetricUnit};
use crate::collectors::DomainMetrics;
use crate::error::PublishError;
use crate::orchestrator::CollectionResult;

/// Most metric points accepted by one put call
pub const MAX_DATUMS_PER_CALL: usize = 20;

pub const DOMAIN_ENABLED_METRIC: &str = "DomainEnabled";
pub const DOMAIN_FAILED_METRIC: &str = "DomainCollectionFailed";
pub const HEALTH_SCORE_METRIC: &str = "AccountHealthScore";

/// Metrics store backend
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send at most [`MAX_DATUMS_PER_CALL`] records
    async fn put_metrics(&self, namespace: &str, records: &[MetricRecord]) -> Result<(), PublishError>;
}

pub struct MetricsPublisher {
    sink: Arc<dyn MetricsSink>,
    namespace: String,
}

impl MetricsPublisher {
    pub fn new(sink: Arc<dyn MetricsSink>, namespace: impl Into<String>) -> Self {
        Self {
            sink,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Metric points for one account's result, ending with its health score
    pub fn to_records(&self, result: &CollectionResult) -> Vec<MetricRecord> {
        let mut records = Vec::new();

        for (domain, metrics) in &result.domains {
            let record = |name: String, value: f64, unit: MetricUnit| MetricRecord {
                namespace: self.namespace.clone(),
                name,
                value,
                unit,
                dimensions: vec![
                    ("AccountId".to_string(), result.account.id.clone()),
                    ("Domain".to_string(), domain.as_str().to_string()),
                ],
                timestamp: result.collected_at,
            };

            match metrics {
                DomainMetrics::Collected { values } => {
                    records.push(record(DOMAIN_ENABLED_METRIC.to_string(), 1.0, MetricUnit::None));
                    for obs in values.observations() {
                        records.push(record(pascal_case(obs.field), obs.value, obs.unit));
                    }
                }
                DomainMetrics::NotEnabled => {
                    records.push(record(DOMAIN_ENABLED_METRIC.to_string(), 0.0, MetricUnit::None));
                }
                DomainMetrics::Failed { .. } => {
                    records.push(record(DOMAIN_FAILED_METRIC.to_string(), 1.0, MetricUnit::Count));
                }
            }
        }

        records.push(MetricRecord {
            namespace: self.namespace.clone(),
            name: HEALTH_SCORE_METRIC.to_string(),
            value: result.health.score,
            unit: MetricUnit::None,
            dimensions: vec![("AccountId".to_string(), result.account.id.clone())],
            timestamp: result.collected_at,
        });
        records
    }

    /// Send every record of `result` in batches
    pub async fn publish(&self, result: &CollectionResult) -> Result<usize, PublishError> {
        let records = self.to_records(result);
        self.send(result.account_id(), &records).await
    }

    /// Send `records` in batches. A failed batch does not stop the rest.
    pub async fn send(&self, account_id: &str, records: &[MetricRecord]) -> Result<usize, PublishError> {
        let batches: Vec<&[MetricRecord]> = records.chunks(MAX_DATUMS_PER_CALL).collect();
        let total = batches.len();

        let mut sent = 0;
        let mut failures = Vec::new();
        for batch in batches {
            match self.sink.put_metrics(&self.namespace, batch).await {
                Ok(()) => sent += batch.len(),
                Err(e) => {
                    warn!(account_id = %account_id, batch_size = batch.len(), error = %e, "Metric batch failed");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            debug!(account_id = %account_id, records = sent, "Published metrics");
            return Ok(sent);
        }

        Err(PublishError::PartialBatch {
            failed: failures.len(),
            total,
            first: failures.swap_remove(0),
        })
    }
}

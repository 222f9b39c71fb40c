//! Analytics stream publisher
//!
//! Each account becomes one flat, newline-terminated JSON record. The key
//! set does not depend on which domains were collected: missing domains are
//! filled with their zero values and flagged through `<domain>_state`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::types::MetricUnit;
use crate::collectors::{Domain, DomainMetrics, DomainValues};
use crate::error::PublishError;
use crate::orchestrator::CollectionResult;

/// Record-oriented delivery stream
#[async_trait]
pub trait RecordStream: Send + Sync {
    async fn put_record(&self, data: Vec<u8>) -> Result<(), PublishError>;
}

pub struct StreamPublisher {
    stream: Arc<dyn RecordStream>,
}

/// Flatten a result into the stream's stable key set
pub fn flatten(result: &CollectionResult) -> BTreeMap<String, Value> {
    let mut record = BTreeMap::new();
    record.insert("run_id".to_string(), json!(result.run_id.to_string()));
    record.insert("account_id".to_string(), json!(result.account.id));
    record.insert("account_name".to_string(), json!(result.account.name));
    record.insert("collected_at".to_string(), json!(result.collected_at.to_rfc3339()));
    record.insert("status".to_string(), json!(result.status));
    record.insert("health_score".to_string(), json!(result.health.score));
    record.insert("health_status".to_string(), json!(result.health.status));

    for domain in Domain::ALL {
        let metrics = result.domains.get(&domain);
        let state = metrics.map(DomainMetrics::state).unwrap_or("missing");
        record.insert(format!("{domain}_state"), json!(state));

        let empty = DomainValues::empty(domain);
        let values = metrics.and_then(DomainMetrics::values).unwrap_or(&empty);

        for obs in values.observations() {
            let value = match obs.unit {
                MetricUnit::Count => json!(obs.value as u64),
                _ => json!(obs.value),
            };
            record.insert(format!("{domain}_{}", obs.field), value);
        }
        for (field, ranked) in values.rankings() {
            record.insert(format!("{domain}_{field}"), json!(ranked));
        }
    }

    record
}

impl StreamPublisher {
    pub fn new(stream: Arc<dyn RecordStream>) -> Self {
        Self { stream }
    }

    pub async fn publish(&self, result: &CollectionResult) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&flatten(result))?;
        line.push(b'\n');
        let size = line.len();
        self.stream.put_record(line).await?;
        debug!(account_id = %result.account_id(), bytes = size, "Streamed record");
        Ok(())
    }
}

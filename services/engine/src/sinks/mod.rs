//! Sinks
//!
//! Downstream destinations for collected results. Dispatch is best effort:
//! a failing sink is logged and counted, the others still receive the
//! result.

pub mod archive;
pub mod metrics;
pub mod stream;
mod types;
#[cfg(feature = "aws")]
pub mod aws;

pub use archive::{ArchiveWriter, LocalObjectStore, ObjectStore};
pub use metrics::{MetricsPublisher, MetricsSink, MAX_DATUMS_PER_CALL};
pub use stream::{RecordStream, StreamPublisher};
pub use types::*;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::PublishError;
use crate::orchestrator::CollectionResult;

/// What happened to one result across all sinks
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub metrics_sent: usize,
    pub archive_key: Option<String>,
    pub streamed: bool,
    pub errors: Vec<String>,
}

/// Configured set of sinks
#[derive(Default)]
pub struct Sinks {
    pub metrics: Option<MetricsPublisher>,
    pub archive: Option<ArchiveWriter>,
    pub stream: Option<StreamPublisher>,
}

impl Sinks {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_none() && self.archive.is_none() && self.stream.is_none()
    }

    pub async fn dispatch(&self, result: &CollectionResult) -> DispatchReport {
        let mut report = DispatchReport::default();
        let account_id = result.account_id();

        if let Some(metrics) = &self.metrics {
            match metrics.publish(result).await {
                Ok(sent) => report.metrics_sent = sent,
                Err(e) => {
                    warn!(account_id = %account_id, sink = "metrics", error = %e, "Publish failed");
                    report.errors.push(format!("metrics: {e}"));
                }
            }
        }

        if let Some(archive) = &self.archive {
            match archive.write(result).await {
                Ok(key) => report.archive_key = Some(key),
                Err(e) => {
                    warn!(account_id = %account_id, sink = "archive", error = %e, "Publish failed");
                    report.errors.push(format!("archive: {e}"));
                }
            }
        }

        if let Some(stream) = &self.stream {
            match stream.publish(result).await {
                Ok(()) => report.streamed = true,
                Err(e) => {
                    warn!(account_id = %account_id, sink = "stream", error = %e, "Publish failed");
                    report.errors.push(format!("stream: {e}"));
                }
            }
        }

        report
    }
}

/// Sink backend that only logs what would have been written
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

#[async_trait]
impl MetricsSink for DryRunSink {
    async fn put_metrics(&self, namespace: &str, records: &[MetricRecord]) -> Result<(), PublishError> {
        info!(namespace = %namespace, count = records.len(), "[DRY RUN] Would put metric data");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for DryRunSink {
    async fn put_new(&self, key: &str, body: Vec<u8>) -> Result<(), PublishError> {
        info!(key = %key, bytes = body.len(), "[DRY RUN] Would write snapshot");
        Ok(())
    }
}

#[async_trait]
impl RecordStream for DryRunSink {
    async fn put_record(&self, data: Vec<u8>) -> Result<(), PublishError> {
        info!(bytes = data.len(), "[DRY RUN] Would put stream record");
        Ok(())
    }
}

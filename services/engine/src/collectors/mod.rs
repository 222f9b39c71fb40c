//! Metric Collectors
//!
//! One collector per domain. Each walks the session's regions through its
//! own service trait and reduces the raw facts into a [`DomainValues`].
//! Collectors never fail the account: every error ends up as
//! [`DomainMetrics::Failed`] for that domain only.

mod types;
pub mod backup;
pub mod config_rules;
pub mod iam;
pub mod patch;
pub mod security_hub;
#[cfg(feature = "aws")]
pub mod aws;

pub use types::*;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::credentials::ScopedSession;

/// Collects one domain's metrics for one account
#[async_trait]
pub trait MetricCollector: Send + Sync {
    fn domain(&self) -> Domain;

    async fn collect(&self, account_id: &str, session: &ScopedSession) -> DomainMetrics;
}

/// All collectors for a run, executed concurrently per account
#[derive(Clone)]
pub struct CollectorSet {
    collectors: Vec<Arc<dyn MetricCollector>>,
    domain_timeout: Duration,
}

impl CollectorSet {
    pub fn new(collectors: Vec<Arc<dyn MetricCollector>>, domain_timeout: Duration) -> Self {
        Self {
            collectors,
            domain_timeout,
        }
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.collectors.iter().map(|c| c.domain()).collect()
    }

    /// Run every collector for `account_id`. A panic or timeout in one
    /// collector becomes `Failed` for that domain.
    pub async fn collect_all(
        &self,
        account_id: &str,
        session: &ScopedSession,
    ) -> BTreeMap<Domain, DomainMetrics> {
        let timeout = self.domain_timeout;

        let runs = self.collectors.iter().map(|collector| async move {
            let domain = collector.domain();
            let guarded = AssertUnwindSafe(tokio::time::timeout(
                timeout,
                collector.collect(account_id, session),
            ))
            .catch_unwind()
            .await;

            let metrics = match guarded {
                Ok(Ok(metrics)) => metrics,
                Ok(Err(_)) => {
                    warn!(account_id = %account_id, domain = %domain, timeout_secs = timeout.as_secs(), "Domain collection timed out");
                    DomainMetrics::failed(format!("timed out after {}s", timeout.as_secs()))
                }
                Err(_) => {
                    error!(account_id = %account_id, domain = %domain, "Domain collector panicked");
                    DomainMetrics::failed("collector panicked")
                }
            };

            if let DomainMetrics::Failed { reason } = &metrics {
                warn!(account_id = %account_id, domain = %domain, reason = %reason, "Domain collection failed");
            }
            (domain, metrics)
        });

        let results: BTreeMap<_, _> = join_all(runs).await.into_iter().collect();

        info!(
            account_id = %account_id,
            domains = results.len(),
            failed = results.values().filter(|m| m.is_failed()).count(),
            "Collected account metrics"
        );
        results
    }
}

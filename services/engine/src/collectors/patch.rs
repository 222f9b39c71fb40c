//! Patch compliance collector
//!
//! Instances come from the compute API, management and patch state from the
//! systems manager. Only online managed instances that the compute API also
//! reports are considered, so on-premises nodes and stale registrations never
//! count as managed.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use super::{
    percent_or, Domain, DomainMetrics, DomainValues, MetricCollector, PatchComplianceMetrics,
    DEFAULT_MANAGED_PERCENT, DEFAULT_PATCH_COMPLIANCE_PERCENT,
};
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

/// Largest instance batch accepted by the patch state API
pub const PATCH_STATE_BATCH: usize = 50;

/// Non-compliant patch counts by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSeverityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub informational: u64,
    pub unspecified: u64,
}

impl std::ops::AddAssign for PatchSeverityCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.critical += rhs.critical;
        self.high += rhs.high;
        self.medium += rhs.medium;
        self.low += rhs.low;
        self.informational += rhs.informational;
        self.unspecified += rhs.unspecified;
    }
}

/// Patch state of one managed instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstancePatchState {
    pub missing: u64,
    pub failed: u64,
    pub installed_pending_reboot: u64,
}

impl InstancePatchState {
    pub fn is_compliant(&self) -> bool {
        self.missing == 0 && self.failed == 0
    }
}

/// Compute and systems-manager services, per region
#[async_trait]
pub trait PatchApi: Send + Sync {
    /// Ids of running and stopped instances
    async fn instance_ids(&self, session: &ScopedSession, region: &str) -> Result<Vec<String>, ServiceError>;

    /// Ids of managed instances currently online
    async fn managed_instance_ids(&self, session: &ScopedSession, region: &str) -> Result<Vec<String>, ServiceError>;

    async fn compliance_summary(&self, session: &ScopedSession, region: &str) -> Result<PatchSeverityCounts, ServiceError>;

    /// Patch states for at most [`PATCH_STATE_BATCH`] instances
    async fn patch_states(
        &self,
        session: &ScopedSession,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstancePatchState>, ServiceError>;
}

pub fn summarize(
    total_instances: u64,
    managed: u64,
    states: &[InstancePatchState],
    severity: PatchSeverityCounts,
) -> PatchComplianceMetrics {
    let managed = managed.min(total_instances);
    let compliant = states.iter().filter(|s| s.is_compliant()).count() as u64;
    let non_compliant = states.len() as u64 - compliant;

    PatchComplianceMetrics {
        total_instances,
        managed_instances: managed,
        unmanaged_instances: total_instances.saturating_sub(managed),
        managed_percent: percent_or(managed, total_instances, DEFAULT_MANAGED_PERCENT),
        compliant_instances: compliant,
        non_compliant_instances: non_compliant,
        compliance_percent: percent_or(
            compliant,
            compliant + non_compliant,
            DEFAULT_PATCH_COMPLIANCE_PERCENT,
        ),
        critical: severity.critical,
        high: severity.high,
        medium: severity.medium,
        low: severity.low,
        informational: severity.informational,
        unspecified: severity.unspecified,
        missing_patches: states.iter().map(|s| s.missing).sum(),
        failed_patches: states.iter().map(|s| s.failed).sum(),
        installed_pending_reboot: states.iter().map(|s| s.installed_pending_reboot).sum(),
    }
}

pub struct PatchComplianceCollector {
    api: Arc<dyn PatchApi>,
}

impl PatchComplianceCollector {
    pub fn new(api: Arc<dyn PatchApi>) -> Self {
        Self { api }
    }

    async fn gather(&self, session: &ScopedSession) -> Result<Option<DomainValues>, ServiceError> {
        let mut total = 0;
        let mut managed = 0;
        let mut states = Vec::new();
        let mut severity = PatchSeverityCounts::default();

        for region in session.regions() {
            let instances: HashSet<String> = self
                .api
                .instance_ids(session, region)
                .await
                .map_err(|e| e.in_region(region))?
                .into_iter()
                .collect();
            total += instances.len() as u64;

            let ids: Vec<String> = self
                .api
                .managed_instance_ids(session, region)
                .await
                .map_err(|e| e.in_region(region))?
                .into_iter()
                .filter(|id| instances.contains(id))
                .collect();
            if ids.is_empty() {
                continue;
            }
            managed += ids.len() as u64;

            severity += self
                .api
                .compliance_summary(session, region)
                .await
                .map_err(|e| e.in_region(region))?;

            for batch in ids.chunks(PATCH_STATE_BATCH) {
                match self.api.patch_states(session, region, batch).await {
                    Ok(batch_states) => states.extend(batch_states),
                    Err(e) => warn!(
                        account_id = %session.account_id(),
                        region = %region,
                        batch_size = batch.len(),
                        error = %e,
                        "Skipping patch state batch"
                    ),
                }
            }
        }

        if managed == 0 {
            return Ok(None);
        }
        Ok(Some(DomainValues::PatchCompliance(summarize(total, managed, &states, severity))))
    }
}

#[async_trait]
impl MetricCollector for PatchComplianceCollector {
    fn domain(&self) -> Domain {
        Domain::PatchCompliance
    }

    async fn collect(&self, _account_id: &str, session: &ScopedSession) -> DomainMetrics {
        DomainMetrics::from_outcome(self.gather(session).await)
    }
}

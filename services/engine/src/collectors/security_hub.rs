//! Security findings collector

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    percent_or, top_n, Domain, DomainMetrics, DomainValues, MetricCollector,
    SecurityFindingsMetrics, DEFAULT_CONTROL_PASS_PERCENT,
};
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

/// Default per-region cap on fetched findings
pub const DEFAULT_FINDINGS_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Informational,
}

impl Severity {
    /// Unknown labels are treated as informational
    pub fn parse(label: &str) -> Self {
        match label {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Informational,
        }
    }
}

/// Result of the control check behind a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Passed,
    Failed,
}

/// An active finding as returned by the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub title: String,
    pub severity: Severity,
    pub control: Option<ControlStatus>,
}

/// Security hub, per region
#[async_trait]
pub trait SecurityHubApi: Send + Sync {
    async fn hub_enabled(&self, session: &ScopedSession, region: &str) -> Result<bool, ServiceError>;

    /// Active findings in workflow state NEW, at most `limit`
    async fn active_findings(
        &self,
        session: &ScopedSession,
        region: &str,
        limit: usize,
    ) -> Result<Vec<Finding>, ServiceError>;
}

pub fn summarize(findings: &[Finding], top: usize) -> SecurityFindingsMetrics {
    let severity = |s: Severity| findings.iter().filter(|f| f.severity == s).count() as u64;
    let control = |c: ControlStatus| findings.iter().filter(|f| f.control == Some(c)).count() as u64;

    let passed = control(ControlStatus::Passed);
    let failed = control(ControlStatus::Failed);

    SecurityFindingsMetrics {
        total_active: findings.len() as u64,
        critical: severity(Severity::Critical),
        high: severity(Severity::High),
        medium: severity(Severity::Medium),
        low: severity(Severity::Low),
        informational: severity(Severity::Informational),
        passed_controls: passed,
        failed_controls: failed,
        control_pass_percent: percent_or(passed, passed + failed, DEFAULT_CONTROL_PASS_PERCENT),
        top_finding_titles: top_n(findings.iter().map(|f| f.title.clone()), top),
    }
}

pub struct SecurityFindingsCollector {
    api: Arc<dyn SecurityHubApi>,
    top_n: usize,
    findings_limit: usize,
}

impl SecurityFindingsCollector {
    pub fn new(api: Arc<dyn SecurityHubApi>, top_n: usize, findings_limit: usize) -> Self {
        Self {
            api,
            top_n,
            findings_limit,
        }
    }

    async fn gather(&self, session: &ScopedSession) -> Result<Option<DomainValues>, ServiceError> {
        let mut enabled = false;
        let mut findings = Vec::new();

        for region in session.regions() {
            let hub = self
                .api
                .hub_enabled(session, region)
                .await
                .map_err(|e| e.in_region(region))?;
            if !hub {
                debug!(account_id = %session.account_id(), region = %region, "Security hub not enabled");
                continue;
            }
            enabled = true;
            findings.extend(
                self.api
                    .active_findings(session, region, self.findings_limit)
                    .await
                    .map_err(|e| e.in_region(region))?,
            );
        }

        Ok(enabled.then(|| DomainValues::SecurityFindings(summarize(&findings, self.top_n))))
    }
}

#[async_trait]
impl MetricCollector for SecurityFindingsCollector {
    fn domain(&self) -> Domain {
        Domain::SecurityFindings
    }

    async fn collect(&self, _account_id: &str, session: &ScopedSession) -> DomainMetrics {
        DomainMetrics::from_outcome(self.gather(session).await)
    }
}

//! Configuration compliance collector

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{
    percent_or, top_n_weighted, ConfigComplianceMetrics, Domain, DomainMetrics, DomainValues,
    MetricCollector, DEFAULT_CONFIG_COMPLIANCE_PERCENT,
};
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

/// Evaluation state of a single rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Compliant,
    NonCompliant,
    NotApplicable,
    InsufficientData,
}

impl RuleState {
    /// Unknown values count as insufficient data
    pub fn parse(value: &str) -> Self {
        match value {
            "COMPLIANT" => RuleState::Compliant,
            "NON_COMPLIANT" => RuleState::NonCompliant,
            "NOT_APPLICABLE" => RuleState::NotApplicable,
            _ => RuleState::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCompliance {
    pub rule_name: String,
    pub state: RuleState,
    /// Resources the rule currently flags
    pub non_compliant_resources: u64,
}

/// Configuration service, per region
#[async_trait]
pub trait ConfigRulesApi: Send + Sync {
    /// Whether a configuration recorder exists
    async fn recorder_enabled(&self, session: &ScopedSession, region: &str) -> Result<bool, ServiceError>;

    async fn rule_compliance(
        &self,
        session: &ScopedSession,
        region: &str,
    ) -> Result<Vec<RuleCompliance>, ServiceError>;
}

pub fn summarize(rules: &[RuleCompliance], top_n: usize) -> ConfigComplianceMetrics {
    let count = |state: RuleState| rules.iter().filter(|r| r.state == state).count() as u64;

    let compliant = count(RuleState::Compliant);
    let non_compliant = count(RuleState::NonCompliant);

    ConfigComplianceMetrics {
        total_rules: rules.len() as u64,
        compliant_rules: compliant,
        non_compliant_rules: non_compliant,
        not_applicable_rules: count(RuleState::NotApplicable),
        insufficient_data_rules: count(RuleState::InsufficientData),
        compliance_percent: percent_or(
            compliant,
            compliant + non_compliant,
            DEFAULT_CONFIG_COMPLIANCE_PERCENT,
        ),
        top_non_compliant_rules: top_n_weighted(
            rules
                .iter()
                .filter(|r| r.state == RuleState::NonCompliant)
                .map(|r| (r.rule_name.clone(), r.non_compliant_resources)),
            top_n,
        ),
    }
}

pub struct ConfigComplianceCollector {
    api: Arc<dyn ConfigRulesApi>,
    top_n: usize,
}

impl ConfigComplianceCollector {
    pub fn new(api: Arc<dyn ConfigRulesApi>, top_n: usize) -> Self {
        Self { api, top_n }
    }

    async fn gather(&self, session: &ScopedSession) -> Result<Option<DomainValues>, ServiceError> {
        let mut enabled = false;
        let mut rules = Vec::new();

        for region in session.regions() {
            if !self
                .api
                .recorder_enabled(session, region)
                .await
                .map_err(|e| e.in_region(region))?
            {
                debug!(account_id = %session.account_id(), region = %region, "No configuration recorder");
                continue;
            }
            enabled = true;
            rules.extend(
                self.api
                    .rule_compliance(session, region)
                    .await
                    .map_err(|e| e.in_region(region))?,
            );
        }

        Ok(enabled.then(|| DomainValues::ConfigCompliance(summarize(&rules, self.top_n))))
    }
}

#[async_trait]
impl MetricCollector for ConfigComplianceCollector {
    fn domain(&self) -> Domain {
        Domain::ConfigCompliance
    }

    async fn collect(&self, _account_id: &str, session: &ScopedSession) -> DomainMetrics {
        DomainMetrics::from_outcome(self.gather(session).await)
    }
}

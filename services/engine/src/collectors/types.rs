//! Collector Types
//!
//! Per-domain metric structs and the helpers that derive ratios and top-N
//! rankings from raw counts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ServiceError;

/// Default size of every top-N list
pub const DEFAULT_TOP_N: usize = 5;

/// Value reported for config compliance when no rule was evaluated
pub const DEFAULT_CONFIG_COMPLIANCE_PERCENT: f64 = 0.0;
/// Value reported for the control pass rate when no control was evaluated
pub const DEFAULT_CONTROL_PASS_PERCENT: f64 = 100.0;
/// Value reported for the backup success rate when no job finished
pub const DEFAULT_BACKUP_SUCCESS_PERCENT: f64 = 100.0;
/// Value reported for the managed rate when there are no instances
pub const DEFAULT_MANAGED_PERCENT: f64 = 0.0;
/// Value reported for patch compliance when no instance reported state
pub const DEFAULT_PATCH_COMPLIANCE_PERCENT: f64 = 0.0;
/// Value reported for MFA coverage when the account has no users
pub const DEFAULT_MFA_PERCENT: f64 = 100.0;
/// Value reported for the stale key share when the account has no keys
pub const DEFAULT_OLD_KEY_PERCENT: f64 = 0.0;

/// Collection domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    ConfigCompliance,
    SecurityFindings,
    BackupJobs,
    PatchCompliance,
    IamHygiene,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::ConfigCompliance,
        Domain::SecurityFindings,
        Domain::BackupJobs,
        Domain::PatchCompliance,
        Domain::IamHygiene,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::ConfigCompliance => "config_compliance",
            Domain::SecurityFindings => "security_findings",
            Domain::BackupJobs => "backup_jobs",
            Domain::PatchCompliance => "patch_compliance",
            Domain::IamHygiene => "iam_hygiene",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit attached to a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Count,
    Percent,
    None,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Count => "Count",
            MetricUnit::Percent => "Percent",
            MetricUnit::None => "None",
        }
    }
}

/// One numeric field of a domain's metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub field: &'static str,
    pub value: f64,
    pub unit: MetricUnit,
}

impl Observation {
    fn count(field: &'static str, value: u64) -> Self {
        Self {
            field,
            value: value as f64,
            unit: MetricUnit::Count,
        }
    }

    fn percent(field: &'static str, value: f64) -> Self {
        Self {
            field,
            value,
            unit: MetricUnit::Percent,
        }
    }
}

/// Entry of a bounded top-N list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub label: String,
    pub count: u64,
}

/// `numerator / denominator` as a percentage rounded to one decimal, or
/// `default` when the denominator is zero
pub fn percent_or(numerator: u64, denominator: u64, default: f64) -> f64 {
    if denominator == 0 {
        return default;
    }
    let pct = numerator as f64 * 100.0 / denominator as f64;
    (pct * 10.0).round() / 10.0
}

/// Rank labels by occurrence count
pub fn top_n<I>(labels: I, n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = String>,
{
    top_n_weighted(labels.into_iter().map(|l| (l, 1)), n)
}

/// Rank labels by summed weight. Count descending, ties in first-seen order.
pub fn top_n_weighted<I>(items: I, n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let mut order: Vec<RankedCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (label, weight) in items {
        match index.get(&label) {
            Some(&i) => order[i].count += weight,
            None => {
                index.insert(label.clone(), order.len());
                order.push(RankedCount { label, count: weight });
            }
        }
    }

    order.retain(|r| r.count > 0);
    // sort_by is stable, which keeps first-seen order among equal counts
    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(n);
    order
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigComplianceMetrics {
    pub total_rules: u64,
    pub compliant_rules: u64,
    pub non_compliant_rules: u64,
    pub not_applicable_rules: u64,
    pub insufficient_data_rules: u64,
    pub compliance_percent: f64,
    pub top_non_compliant_rules: Vec<RankedCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityFindingsMetrics {
    pub total_active: u64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub informational: u64,
    pub passed_controls: u64,
    pub failed_controls: u64,
    pub control_pass_percent: f64,
    pub top_finding_titles: Vec<RankedCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupJobMetrics {
    pub jobs_total: u64,
    pub completed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub expired: u64,
    pub in_progress: u64,
    pub protected_resources: u64,
    pub success_percent: f64,
    pub top_failure_reasons: Vec<RankedCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchComplianceMetrics {
    pub total_instances: u64,
    pub managed_instances: u64,
    pub unmanaged_instances: u64,
    pub managed_percent: f64,
    pub compliant_instances: u64,
    pub non_compliant_instances: u64,
    pub compliance_percent: f64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub informational: u64,
    pub unspecified: u64,
    pub missing_patches: u64,
    pub failed_patches: u64,
    pub installed_pending_reboot: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamHygieneMetrics {
    pub total_users: u64,
    pub users_without_mfa: u64,
    pub mfa_percent: f64,
    pub total_access_keys: u64,
    pub active_keys: u64,
    /// Keys past the warning age but not yet critical
    pub aging_keys: u64,
    /// Keys past the critical age
    pub old_keys: u64,
    pub old_key_percent: f64,
    pub top_stale_key_owners: Vec<RankedCount>,
}

/// Metrics of one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainValues {
    ConfigCompliance(ConfigComplianceMetrics),
    SecurityFindings(SecurityFindingsMetrics),
    BackupJobs(BackupJobMetrics),
    PatchCompliance(PatchComplianceMetrics),
    IamHygiene(IamHygieneMetrics),
}

impl DomainValues {
    pub fn domain(&self) -> Domain {
        match self {
            DomainValues::ConfigCompliance(_) => Domain::ConfigCompliance,
            DomainValues::SecurityFindings(_) => Domain::SecurityFindings,
            DomainValues::BackupJobs(_) => Domain::BackupJobs,
            DomainValues::PatchCompliance(_) => Domain::PatchCompliance,
            DomainValues::IamHygiene(_) => Domain::IamHygiene,
        }
    }

    /// Zero-valued metrics for `domain`, with ratio defaults applied
    pub fn empty(domain: Domain) -> Self {
        match domain {
            Domain::ConfigCompliance => DomainValues::ConfigCompliance(ConfigComplianceMetrics {
                compliance_percent: DEFAULT_CONFIG_COMPLIANCE_PERCENT,
                ..Default::default()
            }),
            Domain::SecurityFindings => DomainValues::SecurityFindings(SecurityFindingsMetrics {
                control_pass_percent: DEFAULT_CONTROL_PASS_PERCENT,
                ..Default::default()
            }),
            Domain::BackupJobs => DomainValues::BackupJobs(BackupJobMetrics {
                success_percent: DEFAULT_BACKUP_SUCCESS_PERCENT,
                ..Default::default()
            }),
            Domain::PatchCompliance => DomainValues::PatchCompliance(PatchComplianceMetrics {
                managed_percent: DEFAULT_MANAGED_PERCENT,
                compliance_percent: DEFAULT_PATCH_COMPLIANCE_PERCENT,
                ..Default::default()
            }),
            Domain::IamHygiene => DomainValues::IamHygiene(IamHygieneMetrics {
                mfa_percent: DEFAULT_MFA_PERCENT,
                old_key_percent: DEFAULT_OLD_KEY_PERCENT,
                ..Default::default()
            }),
        }
    }

    /// Every numeric field, in declaration order
    pub fn observations(&self) -> Vec<Observation> {
        use Observation as O;
        match self {
            DomainValues::ConfigCompliance(m) => vec![
                O::count("total_rules", m.total_rules),
                O::count("compliant_rules", m.compliant_rules),
                O::count("non_compliant_rules", m.non_compliant_rules),
                O::count("not_applicable_rules", m.not_applicable_rules),
                O::count("insufficient_data_rules", m.insufficient_data_rules),
                O::percent("compliance_percent", m.compliance_percent),
            ],
            DomainValues::SecurityFindings(m) => vec![
                O::count("total_active", m.total_active),
                O::count("critical", m.critical),
                O::count("high", m.high),
                O::count("medium", m.medium),
                O::count("low", m.low),
                O::count("informational", m.informational),
                O::count("passed_controls", m.passed_controls),
                O::count("failed_controls", m.failed_controls),
                O::percent("control_pass_percent", m.control_pass_percent),
            ],
            DomainValues::BackupJobs(m) => vec![
                O::count("jobs_total", m.jobs_total),
                O::count("completed", m.completed),
                O::count("failed", m.failed),
                O::count("aborted", m.aborted),
                O::count("expired", m.expired),
                O::count("in_progress", m.in_progress),
                O::count("protected_resources", m.protected_resources),
                O::percent("success_percent", m.success_percent),
            ],
            DomainValues::PatchCompliance(m) => vec![
                O::count("total_instances", m.total_instances),
                O::count("managed_instances", m.managed_instances),
                O::count("unmanaged_instances", m.unmanaged_instances),
                O::percent("managed_percent", m.managed_percent),
                O::count("compliant_instances", m.compliant_instances),
                O::count("non_compliant_instances", m.non_compliant_instances),
                O::percent("compliance_percent", m.compliance_percent),
                O::count("critical", m.critical),
                O::count("high", m.high),
                O::count("medium", m.medium),
                O::count("low", m.low),
                O::count("informational", m.informational),
                O::count("unspecified", m.unspecified),
                O::count("missing_patches", m.missing_patches),
                O::count("failed_patches", m.failed_patches),
                O::count("installed_pending_reboot", m.installed_pending_reboot),
            ],
            DomainValues::IamHygiene(m) => vec![
                O::count("total_users", m.total_users),
                O::count("users_without_mfa", m.users_without_mfa),
                O::percent("mfa_percent", m.mfa_percent),
                O::count("total_access_keys", m.total_access_keys),
                O::count("active_keys", m.active_keys),
                O::count("aging_keys", m.aging_keys),
                O::count("old_keys", m.old_keys),
                O::percent("old_key_percent", m.old_key_percent),
            ],
        }
    }

    /// Top-N lists keyed by field name
    pub fn rankings(&self) -> Vec<(&'static str, &[RankedCount])> {
        match self {
            DomainValues::ConfigCompliance(m) => {
                vec![("top_non_compliant_rules", m.top_non_compliant_rules.as_slice())]
            }
            DomainValues::SecurityFindings(m) => {
                vec![("top_finding_titles", m.top_finding_titles.as_slice())]
            }
            DomainValues::BackupJobs(m) => {
                vec![("top_failure_reasons", m.top_failure_reasons.as_slice())]
            }
            DomainValues::PatchCompliance(_) => Vec::new(),
            DomainValues::IamHygiene(m) => {
                vec![("top_stale_key_owners", m.top_stale_key_owners.as_slice())]
            }
        }
    }
}

/// Outcome of collecting one domain for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DomainMetrics {
    Collected { values: DomainValues },
    NotEnabled,
    Failed { reason: String },
}

impl DomainMetrics {
    pub fn failed(reason: impl Into<String>) -> Self {
        DomainMetrics::Failed {
            reason: reason.into(),
        }
    }

    /// `Ok(None)` means the service is not enabled anywhere
    pub fn from_outcome(outcome: Result<Option<DomainValues>, ServiceError>) -> Self {
        match outcome {
            Ok(Some(values)) => DomainMetrics::Collected { values },
            Ok(None) => DomainMetrics::NotEnabled,
            Err(e) => DomainMetrics::failed(e.to_string()),
        }
    }

    pub fn state(&self) -> &'static str {
        match self {
            DomainMetrics::Collected { .. } => "collected",
            DomainMetrics::NotEnabled => "not_enabled",
            DomainMetrics::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DomainMetrics::Failed { .. })
    }

    pub fn values(&self) -> Option<&DomainValues> {
        match self {
            DomainMetrics::Collected { values } => Some(values),
            _ => None,
        }
    }
}

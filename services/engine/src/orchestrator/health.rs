//! Account Health
//!
//! A 0-100 score derived from an account's collected domains. Every account
//! starts at 100 and loses points per domain:
//!
//! | Domain            | Deduction                                             |
//! |-------------------|-------------------------------------------------------|
//! | IAM hygiene       | share of users without MFA × 10, share of old keys × 10 |
//! | Security findings | 5 per critical (max 25), 2 per high (max 15)          |
//! | Config compliance | share of non-compliant rules × 20                     |
//! | Backup jobs       | 10 with no protected resource, 5 with fewer than 5    |
//!
//! A domain that is not enabled or failed costs a flat penalty instead.
//! Domains absent from the result were not collected and cost nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::collectors::{Domain, DomainMetrics, DomainValues};

pub const MAX_SCORE: f64 = 100.0;

const UNAVAILABLE_PENALTY: f64 = 10.0;
const BACKUP_UNAVAILABLE_PENALTY: f64 = 5.0;
const CRITICAL_FINDING_WEIGHT: f64 = 5.0;
const CRITICAL_FINDING_CAP: f64 = 25.0;
const HIGH_FINDING_WEIGHT: f64 = 2.0;
const HIGH_FINDING_CAP: f64 = 15.0;
const MIN_PROTECTED_RESOURCES: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthStatus::Excellent
        } else if score >= 60.0 {
            HealthStatus::Good
        } else if score >= 40.0 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    /// Rounded to one decimal, never below zero
    pub score: f64,
    /// Banded on the unrounded score
    pub status: HealthStatus,
}

fn share(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn deduction(domain: Domain, metrics: &DomainMetrics) -> f64 {
    let Some(values) = metrics.values() else {
        return match domain {
            Domain::BackupJobs if matches!(metrics, DomainMetrics::NotEnabled) => UNAVAILABLE_PENALTY,
            Domain::BackupJobs => BACKUP_UNAVAILABLE_PENALTY,
            Domain::PatchCompliance => 0.0,
            _ => UNAVAILABLE_PENALTY,
        };
    };

    match values {
        DomainValues::IamHygiene(m) => {
            share(m.users_without_mfa, m.total_users) * 10.0 + share(m.old_keys, m.total_access_keys) * 10.0
        }
        DomainValues::SecurityFindings(m) => {
            (m.critical as f64 * CRITICAL_FINDING_WEIGHT).min(CRITICAL_FINDING_CAP)
                + (m.high as f64 * HIGH_FINDING_WEIGHT).min(HIGH_FINDING_CAP)
        }
        DomainValues::ConfigCompliance(m) => share(m.non_compliant_rules, m.total_rules) * 20.0,
        DomainValues::BackupJobs(m) => match m.protected_resources {
            0 => UNAVAILABLE_PENALTY,
            n if n < MIN_PROTECTED_RESOURCES => BACKUP_UNAVAILABLE_PENALTY,
            _ => 0.0,
        },
        DomainValues::PatchCompliance(_) => 0.0,
    }
}

impl HealthScore {
    pub fn from_domains(domains: &BTreeMap<Domain, DomainMetrics>) -> Self {
        let raw = domains
            .iter()
            .fold(MAX_SCORE, |score, (domain, metrics)| score - deduction(*domain, metrics));
        Self {
            score: ((raw * 10.0).round() / 10.0).max(0.0),
            status: HealthStatus::from_score(raw),
        }
    }
}

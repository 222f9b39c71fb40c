//! Run Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::HealthScore;
use crate::collectors::{Domain, DomainMetrics};
use crate::directory::Account;

/// Whether every domain of an account was harvested without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Complete,
    Partial,
}

/// Everything collected for one account in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub run_id: Uuid,
    pub account: Account,
    pub collected_at: DateTime<Utc>,
    pub status: CollectionStatus,
    pub domains: BTreeMap<Domain, DomainMetrics>,
    pub health: HealthScore,
}

impl CollectionResult {
    pub fn new(
        run_id: Uuid,
        account: Account,
        collected_at: DateTime<Utc>,
        domains: BTreeMap<Domain, DomainMetrics>,
    ) -> Self {
        let status = if domains.values().any(DomainMetrics::is_failed) {
            CollectionStatus::Partial
        } else {
            CollectionStatus::Complete
        };
        Self {
            run_id,
            account,
            collected_at,
            status,
            health: HealthScore::from_domains(&domains),
            domains,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account.id
    }
}

/// How the run ended for one selected account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccountOutcome {
    Processed,
    Failed { reason: String },
    /// Still running when the run budget ran out
    Abandoned,
    /// Never started before the deadline
    NotAttempted,
}

/// Aggregate of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier shared by every record of this run
    pub run_id: Uuid,
    /// Accounts selected for processing
    pub total_accounts: usize,
    /// Accounts whose results were produced
    pub processed: usize,
    /// Accounts that errored or panicked
    pub failed: usize,
    /// Active accounts discovered but not selected
    pub excluded: usize,
    pub abandoned: usize,
    pub not_attempted: usize,
    /// Sink writes that did not go through
    pub publish_errors: usize,
    /// Any errors encountered
    pub errors: Vec<String>,
    /// Start of the run
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn new(run_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id,
            total_accounts: 0,
            processed: 0,
            failed: 0,
            excluded: 0,
            abandoned: 0,
            not_attempted: 0,
            publish_errors: 0,
            errors: Vec::new(),
            timestamp,
            duration_ms: 0,
        }
    }

    /// True when every selected account was processed and every write landed
    pub fn success(&self) -> bool {
        self.errors.is_empty()
            && self.failed == 0
            && self.abandoned == 0
            && self.not_attempted == 0
            && self.publish_errors == 0
    }
}

/// Summary plus the per-account detail behind it
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub results: Vec<CollectionResult>,
    pub outcomes: BTreeMap<String, AccountOutcome>,
}

//! IAM hygiene collector
//!
//! IAM is global, so the account is read once through the session's first
//! region. Key age counts whole days since creation; a key is aging past
//! [`KEY_WARNING_AGE_DAYS`] and old past [`KEY_CRITICAL_AGE_DAYS`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{
    percent_or, top_n_weighted, Domain, DomainMetrics, DomainValues, IamHygieneMetrics, MetricCollector,
    DEFAULT_MFA_PERCENT, DEFAULT_OLD_KEY_PERCENT,
};
use crate::cache::Clock;
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

pub const KEY_WARNING_AGE_DAYS: i64 = 60;
pub const KEY_CRITICAL_AGE_DAYS: i64 = 90;

/// Region used for the global endpoint when the session names none
const GLOBAL_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IamUser {
    pub name: String,
    pub mfa_devices: u64,
    pub access_keys: Vec<AccessKey>,
}

/// Identity service, account-wide
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Every user with its MFA device count and access keys
    async fn users(&self, session: &ScopedSession, region: &str) -> Result<Vec<IamUser>, ServiceError>;
}

fn age_days(key: &AccessKey, now: DateTime<Utc>) -> i64 {
    (now - key.created_at).num_days()
}

fn is_old(key: &AccessKey, now: DateTime<Utc>) -> bool {
    age_days(key, now) > KEY_CRITICAL_AGE_DAYS
}

pub fn summarize(users: &[IamUser], now: DateTime<Utc>, top: usize) -> IamHygieneMetrics {
    let total_users = users.len() as u64;
    let users_without_mfa = users.iter().filter(|u| u.mfa_devices == 0).count() as u64;

    let keys: Vec<&AccessKey> = users.iter().flat_map(|u| &u.access_keys).collect();
    let total_access_keys = keys.len() as u64;
    let old_keys = keys.iter().filter(|k| is_old(k, now)).count() as u64;
    let aging_keys = keys
        .iter()
        .filter(|k| !is_old(k, now) && age_days(k, now) > KEY_WARNING_AGE_DAYS)
        .count() as u64;

    let owners = users.iter().map(|u| {
        let stale = u.access_keys.iter().filter(|k| is_old(k, now)).count() as u64;
        (u.name.clone(), stale)
    });

    IamHygieneMetrics {
        total_users,
        users_without_mfa,
        mfa_percent: percent_or(total_users - users_without_mfa, total_users, DEFAULT_MFA_PERCENT),
        total_access_keys,
        active_keys: keys.iter().filter(|k| k.active).count() as u64,
        aging_keys,
        old_keys,
        old_key_percent: percent_or(old_keys, total_access_keys, DEFAULT_OLD_KEY_PERCENT),
        top_stale_key_owners: top_n_weighted(owners, top),
    }
}

pub struct IamHygieneCollector {
    api: Arc<dyn IamApi>,
    clock: Arc<dyn Clock>,
    top_n: usize,
}

impl IamHygieneCollector {
    pub fn new(api: Arc<dyn IamApi>, clock: Arc<dyn Clock>, top_n: usize) -> Self {
        Self { api, clock, top_n }
    }

    async fn gather(&self, session: &ScopedSession) -> Result<Option<DomainValues>, ServiceError> {
        let region = session.regions().first().map_or(GLOBAL_REGION, String::as_str);
        let users = self.api.users(session, region).await?;
        Ok(Some(DomainValues::IamHygiene(summarize(&users, self.clock.now(), self.top_n))))
    }
}

#[async_trait]
impl MetricCollector for IamHygieneCollector {
    fn domain(&self) -> Domain {
        Domain::IamHygiene
    }

    async fn collect(&self, _account_id: &str, session: &ScopedSession) -> DomainMetrics {
        DomainMetrics::from_outcome(self.gather(session).await)
    }
}

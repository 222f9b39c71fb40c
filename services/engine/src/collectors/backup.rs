//! Backup job collector

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{
    percent_or, top_n, BackupJobMetrics, Domain, DomainMetrics, DomainValues, MetricCollector,
    DEFAULT_BACKUP_SUCCESS_PERCENT,
};
use crate::cache::Clock;
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

/// Default window of jobs considered per run
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 3600);

const UNKNOWN_REASON: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupJobState {
    InProgress,
    Completed,
    Failed,
    Aborted,
    Expired,
}

impl BackupJobState {
    pub fn parse(value: &str) -> Self {
        match value {
            "COMPLETED" => BackupJobState::Completed,
            // PARTIAL jobs did not back up everything they were asked to
            "FAILED" | "PARTIAL" => BackupJobState::Failed,
            "ABORTED" => BackupJobState::Aborted,
            "EXPIRED" => BackupJobState::Expired,
            _ => BackupJobState::InProgress,
        }
    }

    fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            BackupJobState::Failed | BackupJobState::Aborted | BackupJobState::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub state: BackupJobState,
    pub status_message: Option<String>,
}

/// Backup service, per region
#[async_trait]
pub trait BackupApi: Send + Sync {
    async fn plan_count(&self, session: &ScopedSession, region: &str) -> Result<u64, ServiceError>;

    async fn protected_resource_count(&self, session: &ScopedSession, region: &str) -> Result<u64, ServiceError>;

    /// Jobs created at or after `since`
    async fn jobs_since(
        &self,
        session: &ScopedSession,
        region: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<BackupJob>, ServiceError>;
}

pub fn summarize(jobs: &[BackupJob], protected_resources: u64, top: usize) -> BackupJobMetrics {
    let count = |state: BackupJobState| jobs.iter().filter(|j| j.state == state).count() as u64;

    let completed = count(BackupJobState::Completed);
    let failed = count(BackupJobState::Failed);
    let aborted = count(BackupJobState::Aborted);
    let expired = count(BackupJobState::Expired);

    let reasons = jobs.iter().filter(|j| j.state.is_unsuccessful()).map(|j| {
        j.status_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_REASON)
            .to_string()
    });

    BackupJobMetrics {
        jobs_total: jobs.len() as u64,
        completed,
        failed,
        aborted,
        expired,
        in_progress: count(BackupJobState::InProgress),
        protected_resources,
        success_percent: percent_or(
            completed,
            completed + failed + aborted + expired,
            DEFAULT_BACKUP_SUCCESS_PERCENT,
        ),
        top_failure_reasons: top_n(reasons, top),
    }
}

pub struct BackupJobsCollector {
    api: Arc<dyn BackupApi>,
    clock: Arc<dyn Clock>,
    lookback: Duration,
    top_n: usize,
}

impl BackupJobsCollector {
    pub fn new(api: Arc<dyn BackupApi>, clock: Arc<dyn Clock>, lookback: Duration, top_n: usize) -> Self {
        Self {
            api,
            clock,
            lookback,
            top_n,
        }
    }

    async fn gather(&self, session: &ScopedSession) -> Result<Option<DomainValues>, ServiceError> {
        let lookback = chrono::Duration::from_std(self.lookback)
            .map_err(|e| ServiceError::Api(format!("invalid lookback window: {e}")))?;
        let since = self.clock.now() - lookback;

        let mut plans = 0;
        let mut protected = 0;
        let mut jobs = Vec::new();

        for region in session.regions() {
            plans += self
                .api
                .plan_count(session, region)
                .await
                .map_err(|e| e.in_region(region))?;
            protected += self
                .api
                .protected_resource_count(session, region)
                .await
                .map_err(|e| e.in_region(region))?;
            jobs.extend(
                self.api
                    .jobs_since(session, region, since)
                    .await
                    .map_err(|e| e.in_region(region))?,
            );
        }

        if plans == 0 && protected == 0 {
            return Ok(None);
        }
        Ok(Some(DomainValues::BackupJobs(summarize(&jobs, protected, self.top_n))))
    }
}

#[async_trait]
impl MetricCollector for BackupJobsCollector {
    fn domain(&self) -> Domain {
        Domain::BackupJobs
    }

    async fn collect(&self, _account_id: &str, session: &ScopedSession) -> DomainMetrics {
        DomainMetrics::from_outcome(self.gather(session).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::collectors::tests::session;
    use std::sync::Mutex;

    fn job(state: BackupJobState, message: Option<&str>) -> BackupJob {
        BackupJob {
            state,
            status_message: message.map(String::from),
        }
    }

    struct FakeBackup {
        plans: u64,
        protected: u64,
        jobs: Vec<BackupJob>,
        since_seen: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl BackupApi for FakeBackup {
        async fn plan_count(&self, _: &ScopedSession, _: &str) -> Result<u64, ServiceError> {
            Ok(self.plans)
        }

        async fn protected_resource_count(&self, _: &ScopedSession, _: &str) -> Result<u64, ServiceError> {
            Ok(self.protected)
        }

        async fn jobs_since(&self, _: &ScopedSession, _: &str, since: DateTime<Utc>) -> Result<Vec<BackupJob>, ServiceError> {
            self.since_seen.lock().unwrap().push(since);
            Ok(self.jobs.clone())
        }
    }

    #[test]
    fn test_summarize_success_rate_and_reasons() {
        let jobs = vec![
            job(BackupJobState::Completed, None),
            job(BackupJobState::Completed, None),
            job(BackupJobState::Completed, None),
            job(BackupJobState::Failed, Some("Access denied to KMS key")),
            job(BackupJobState::Expired, None),
            job(BackupJobState::InProgress, None),
        ];
        let m = summarize(&jobs, 12, 5);
        assert_eq!(m.jobs_total, 6);
        assert_eq!(m.in_progress, 1);
        assert_eq!(m.success_percent, 60.0);
        assert_eq!(m.protected_resources, 12);
        let labels: Vec<&str> = m.top_failure_reasons.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Access denied to KMS key", "unknown"]);
    }

    #[test]
    fn test_success_rate_defaults_without_finished_jobs() {
        let m = summarize(&[job(BackupJobState::InProgress, None)], 0, 5);
        assert_eq!(m.success_percent, DEFAULT_BACKUP_SUCCESS_PERCENT);
        assert_eq!(BackupJobState::parse("PARTIAL"), BackupJobState::Failed);
        assert_eq!(BackupJobState::parse("RUNNING"), BackupJobState::InProgress);
    }

    #[tokio::test]
    async fn test_lookback_window_and_region_sums() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let api = Arc::new(FakeBackup {
            plans: 1,
            protected: 4,
            jobs: vec![job(BackupJobState::Completed, None)],
            since_seen: Mutex::new(Vec::new()),
        });
        let collector = BackupJobsCollector::new(api.clone(), clock, DEFAULT_LOOKBACK, 5);

        let metrics = collector
            .collect("111111111111", &session("111111111111", &["us-east-1", "us-west-2"]))
            .await;
        match metrics.values() {
            Some(DomainValues::BackupJobs(m)) => {
                assert_eq!(m.protected_resources, 8);
                assert_eq!(m.jobs_total, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        let seen = api.since_seen.lock().unwrap();
        assert!(seen.iter().all(|s| *s == now - chrono::Duration::hours(24)));
    }

    #[tokio::test]
    async fn test_no_plans_and_no_resources_is_not_enabled() {
        let api = Arc::new(FakeBackup {
            plans: 0,
            protected: 0,
            jobs: vec![],
            since_seen: Mutex::new(Vec::new()),
        });
        let collector =
            BackupJobsCollector::new(api, Arc::new(ManualClock::new(Utc::now())), DEFAULT_LOOKBACK, 5);
        let metrics = collector
            .collect("111111111111", &session("111111111111", &["us-east-1"]))
            .await;
        assert_eq!(metrics, DomainMetrics::NotEnabled);
    }
}

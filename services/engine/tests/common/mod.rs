//! In-memory organization, token service, collectors and sinks
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use org_metrics::cache::{Clock, ManualClock};
use org_metrics::collectors::iam::{AccessKey, IamApi, IamHygieneCollector, IamUser};
use org_metrics::collectors::security_hub::{
    ControlStatus, Finding, SecurityFindingsCollector, SecurityHubApi, Severity,
};
use org_metrics::collectors::{CollectorSet, Domain, DomainMetrics, DomainValues, MetricCollector};
use org_metrics::credentials::{
    BrokerSettings, CallerIdentity, CredentialBroker, CredentialLease, LeaseRequest, RetryPolicy,
    RoleAssumer, ScopedSession,
};
use org_metrics::directory::{
    Account, AccountPage, AccountStatus, DirectoryCache, GroupRef, OrganizationDirectory,
    OrganizationsApi,
};
use org_metrics::error::{AuthError, DirectoryError, PublishError, ServiceError};
use org_metrics::orchestrator::{Orchestrator, RunSettings};
use org_metrics::sinks::{
    ArchiveWriter, MetricRecord, MetricsPublisher, MetricsSink, ObjectStore, RecordStream, Sinks,
    StreamPublisher,
};

pub const ROOT: &str = "r-root";
pub const MANAGEMENT: &str = "100000000000";

pub fn account_id(n: usize) -> String {
    format!("{:012}", 200_000_000_000usize + n)
}

/// Organization held in memory
#[derive(Default)]
pub struct FakeOrg {
    groups: HashMap<String, Vec<GroupRef>>,
    attached: HashMap<String, Vec<Account>>,
    all: Vec<Account>,
    pub fail_listing: bool,
    pub fail_group_listing: bool,
}

impl FakeOrg {
    pub fn new() -> Self {
        let mut org = Self::default();
        org.attach(ROOT, Account::new(MANAGEMENT, "management", "mgmt@example.com"));
        org
    }

    pub fn group(mut self, parent: &str, id: &str, name: &str) -> Self {
        self.groups
            .entry(parent.to_string())
            .or_default()
            .push(GroupRef::new(id, name));
        self
    }

    pub fn account(mut self, parent: &str, id: &str) -> Self {
        self.attach(parent, Account::new(id, &format!("acct-{id}"), &format!("{id}@example.com")));
        self
    }

    pub fn suspended(mut self, parent: &str, id: &str) -> Self {
        self.attach(
            parent,
            Account::new(id, "closed", "closed@example.com").with_status(AccountStatus::Suspended),
        );
        self
    }

    fn attach(&mut self, parent: &str, account: Account) {
        self.attached
            .entry(parent.to_string())
            .or_default()
            .push(account.clone());
        self.all.push(account);
    }
}

#[async_trait]
impl OrganizationsApi for FakeOrg {
    async fn list_roots(&self) -> Result<Vec<GroupRef>, DirectoryError> {
        Ok(vec![GroupRef::new(ROOT, "Root")])
    }

    async fn list_groups_for_parent(&self, parent_id: &str) -> Result<Vec<GroupRef>, DirectoryError> {
        if self.fail_group_listing {
            return Err(DirectoryError::Api("ThrottlingException".into()));
        }
        Ok(self.groups.get(parent_id).cloned().unwrap_or_default())
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<Account>, DirectoryError> {
        Ok(self.attached.get(parent_id).cloned().unwrap_or_default())
    }

    async fn list_accounts(&self, _next_token: Option<String>) -> Result<AccountPage, DirectoryError> {
        if self.fail_listing {
            return Err(DirectoryError::Api("AccessDeniedException".into()));
        }
        Ok(AccountPage {
            accounts: self.all.clone(),
            next_token: None,
        })
    }

    async fn management_account_id(&self) -> Result<String, DirectoryError> {
        Ok(MANAGEMENT.to_string())
    }
}

/// Token service that leases every account except the denied ones
#[derive(Default)]
pub struct FakeAssumer {
    pub denied: HashSet<String>,
    pub leased: Mutex<Vec<String>>,
}

#[async_trait]
impl RoleAssumer for FakeAssumer {
    async fn assume_role(&self, request: &LeaseRequest) -> Result<CredentialLease, AuthError> {
        if self.denied.contains(&request.account_id) {
            return Err(AuthError::Permanent(format!(
                "AccessDenied: not authorized to assume {}",
                request.role_arn
            )));
        }
        self.leased.lock().unwrap().push(request.account_id.clone());
        Ok(CredentialLease {
            account_id: request.account_id.clone(),
            access_key_id: format!("ASIA{}", request.account_id),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn verify(&self, lease: &CredentialLease) -> Result<CallerIdentity, AuthError> {
        Ok(CallerIdentity {
            account: lease.account_id.clone(),
            arn: format!("arn:aws:sts::{}:assumed-role/OrgMetricsCollectorRole/x", lease.account_id),
        })
    }
}

/// Collector that sleeps and records how many units overlap
pub struct ProbeCollector {
    pub latency: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub failing: HashSet<String>,
}

impl ProbeCollector {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            failing: HashSet::new(),
        }
    }
}

#[async_trait]
impl MetricCollector for ProbeCollector {
    fn domain(&self) -> Domain {
        Domain::BackupJobs
    }

    async fn collect(&self, account_id: &str, _session: &ScopedSession) -> DomainMetrics {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(account_id) {
            return DomainMetrics::failed("backup:ListBackupJobs denied");
        }
        DomainMetrics::Collected {
            values: DomainValues::empty(Domain::BackupJobs),
        }
    }
}

/// Security hub enabled everywhere with one failed control
pub struct FakeHub;

#[async_trait]
impl SecurityHubApi for FakeHub {
    async fn hub_enabled(&self, _: &ScopedSession, _: &str) -> Result<bool, ServiceError> {
        Ok(true)
    }

    async fn active_findings(&self, _: &ScopedSession, _: &str, _: usize) -> Result<Vec<Finding>, ServiceError> {
        Ok(vec![Finding {
            title: "S3 bucket allows public read".into(),
            severity: Severity::High,
            control: Some(ControlStatus::Failed),
        }])
    }
}

/// Two users: `deploy` without MFA holding a stale key, `alice` with MFA
pub struct FakeIam;

#[async_trait]
impl IamApi for FakeIam {
    async fn users(&self, _: &ScopedSession, _: &str) -> Result<Vec<IamUser>, ServiceError> {
        let key = |days: i64| AccessKey {
            created_at: start_time() - chrono::Duration::days(days),
            active: true,
        };
        Ok(vec![
            IamUser {
                name: "deploy".into(),
                mfa_devices: 0,
                access_keys: vec![key(150)],
            },
            IamUser {
                name: "alice".into(),
                mfa_devices: 1,
                access_keys: vec![key(12)],
            },
        ])
    }
}

/// Captures everything written to any sink
#[derive(Default)]
pub struct MemorySink {
    pub metrics: Mutex<Vec<MetricRecord>>,
    pub objects: Mutex<Vec<(String, Vec<u8>)>>,
    pub records: Mutex<Vec<Vec<u8>>>,
    pub fail_archive: bool,
    pub archive_delay: Duration,
}

impl MemorySink {
    pub fn metric_accounts(&self) -> HashSet<String> {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.dimension("AccountId").map(String::from))
            .collect()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn stream_lines(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::from_slice(r).unwrap())
            .collect()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn put_metrics(&self, _namespace: &str, records: &[MetricRecord]) -> Result<(), PublishError> {
        self.metrics.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemorySink {
    async fn put_new(&self, key: &str, body: Vec<u8>) -> Result<(), PublishError> {
        tokio::time::sleep(self.archive_delay).await;
        if self.fail_archive {
            return Err(PublishError::Api {
                sink: "archive",
                message: "SlowDown".into(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.iter().any(|(k, _)| k == key) {
            return Err(PublishError::AlreadyExists(key.to_string()));
        }
        objects.push((key.to_string(), body));
        Ok(())
    }
}

#[async_trait]
impl RecordStream for MemorySink {
    async fn put_record(&self, data: Vec<u8>) -> Result<(), PublishError> {
        self.records.lock().unwrap().push(data);
        Ok(())
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Everything a scenario needs to build and inspect a run
pub struct Harness {
    pub org: FakeOrg,
    pub assumer: FakeAssumer,
    pub probe: Arc<ProbeCollector>,
    pub sink: Arc<MemorySink>,
    pub clock: Arc<ManualClock>,
    pub settings: RunSettings,
}

impl Harness {
    pub fn new(org: FakeOrg) -> Self {
        Self {
            org,
            assumer: FakeAssumer::default(),
            probe: Arc::new(ProbeCollector::new(Duration::from_millis(10))),
            sink: Arc::new(MemorySink::default()),
            clock: Arc::new(ManualClock::new(start_time())),
            settings: RunSettings::default(),
        }
    }

    pub fn build(self) -> (Orchestrator, Arc<ProbeCollector>, Arc<MemorySink>, Arc<ManualClock>) {
        let clock: Arc<dyn Clock> = self.clock.clone();
        let cache = Arc::new(DirectoryCache::new(Duration::from_secs(3600), clock.clone()));
        let directory = Arc::new(OrganizationDirectory::new(Arc::new(self.org), cache));

        let broker = CredentialBroker::new(
            Arc::new(self.assumer),
            BrokerSettings {
                role_name: "OrgMetricsCollectorRole".into(),
                partition: "aws".into(),
                lease_duration: Duration::from_secs(3600),
                regions: vec!["us-east-1".into(), "us-west-2".into()],
                retry: RetryPolicy::default(),
            },
        )
        .unwrap();

        let collectors: Vec<Arc<dyn MetricCollector>> = vec![
            self.probe.clone() as Arc<dyn MetricCollector>,
            Arc::new(SecurityFindingsCollector::new(Arc::new(FakeHub), 5, 100)) as Arc<dyn MetricCollector>,
            Arc::new(IamHygieneCollector::new(Arc::new(FakeIam), clock.clone(), 5)) as Arc<dyn MetricCollector>,
        ];
        let collectors = CollectorSet::new(collectors, Duration::from_secs(120));

        let sinks = Sinks {
            metrics: Some(MetricsPublisher::new(self.sink.clone(), "OrgMetrics")),
            archive: Some(ArchiveWriter::new(self.sink.clone(), "snapshots")),
            stream: Some(StreamPublisher::new(self.sink.clone())),
        };

        let orchestrator = Orchestrator::new(
            directory,
            Arc::new(broker),
            Arc::new(collectors),
            Arc::new(sinks),
            clock,
            self.settings,
        )
        .unwrap();

        (orchestrator, self.probe, self.sink, self.clock)
    }
}

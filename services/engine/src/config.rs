//! Collector configuration
//!
//! Every flag can also be set from the environment.

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::{BrokerSettings, RetryPolicy};
use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::orchestrator::RunSettings;

/// Org Metrics Collector - cross-account metrics for a cloud organization
#[derive(Parser, Debug, Clone)]
#[command(name = "org-metrics-collector", version, about)]
pub struct CollectorConfig {
    /// Role assumed in every member account
    #[arg(long, env = "CROSS_ACCOUNT_ROLE_NAME", default_value = "OrgMetricsCollectorRole")]
    pub role_name: String,

    /// IAM partition used to build role ARNs
    #[arg(long, env = "PARTITION", default_value = "aws")]
    pub partition: String,

    /// Account ids never processed (comma separated)
    #[arg(long, env = "EXCLUDED_ACCOUNTS", value_delimiter = ',')]
    pub excluded_accounts: Vec<String>,

    /// Accounts processed concurrently
    #[arg(long, env = "MAX_PARALLELISM", default_value = "10")]
    pub max_parallelism: usize,

    /// Only process accounts beneath this organizational unit
    #[arg(long, env = "TARGET_GROUP")]
    pub target_group: Option<String>,

    /// Seconds between runs
    #[arg(long, env = "COLLECTION_INTERVAL", default_value = "900")]
    pub interval: u64,

    /// Run once and exit (for scheduled-job mode)
    #[arg(long, default_value = "false")]
    pub once: bool,

    /// Regions queried in every account (comma separated)
    #[arg(long, env = "REGIONS", value_delimiter = ',', default_value = "us-east-1,us-west-2")]
    pub regions: Vec<String>,

    /// Metrics namespace
    #[arg(long, env = "METRICS_NAMESPACE", default_value = "OrgMetrics")]
    pub namespace: String,

    /// Skip publishing metric points
    #[arg(long, env = "DISABLE_METRICS", default_value = "false")]
    pub disable_metrics: bool,

    /// Bucket receiving per-account snapshots
    #[arg(long, env = "ARCHIVE_BUCKET", conflicts_with = "archive_dir")]
    pub archive_bucket: Option<String>,

    /// Local directory receiving per-account snapshots
    #[arg(long, env = "ARCHIVE_DIR")]
    pub archive_dir: Option<PathBuf>,

    /// Key prefix for snapshots
    #[arg(long, env = "ARCHIVE_PREFIX", default_value = "snapshots")]
    pub archive_prefix: String,

    /// Also archive the organization tree once per run
    #[arg(long, env = "ARCHIVE_HIERARCHY", default_value = "false")]
    pub archive_hierarchy: bool,

    /// Delivery stream for flattened records
    #[arg(long, env = "STREAM_NAME")]
    pub stream_name: Option<String>,

    /// Organization directory cache lifetime in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "3600")]
    pub cache_ttl_secs: u64,

    /// Lifetime of leased credentials in seconds
    #[arg(long, env = "LEASE_DURATION_SECS", default_value = "3600")]
    pub lease_duration_secs: u64,

    /// Attempts per role assumption
    #[arg(long, env = "AUTH_MAX_ATTEMPTS", default_value = "3")]
    pub auth_max_attempts: u32,

    /// First retry delay in milliseconds
    #[arg(long, env = "AUTH_BASE_DELAY_MS", default_value = "500")]
    pub auth_base_delay_ms: u64,

    /// Upper bound on any retry delay in milliseconds
    #[arg(long, env = "AUTH_MAX_DELAY_MS", default_value = "10000")]
    pub auth_max_delay_ms: u64,

    /// Wall-clock budget for one run in seconds
    #[arg(long, env = "RUN_BUDGET_SECS")]
    pub run_budget_secs: Option<u64>,

    /// Stop starting accounts this many seconds before the budget ends
    #[arg(long, env = "DEADLINE_MARGIN_SECS", default_value = "30")]
    pub deadline_margin_secs: u64,

    /// Timeout for one domain of one account in seconds
    #[arg(long, env = "DOMAIN_TIMEOUT_SECS", default_value = "120")]
    pub domain_timeout_secs: u64,

    /// Length of every top-N list
    #[arg(long, env = "TOP_N", default_value = "5")]
    pub top_n: usize,

    /// Findings fetched per region
    #[arg(long, env = "FINDINGS_LIMIT", default_value = "100")]
    pub findings_limit: usize,

    /// Backup job window in hours
    #[arg(long, env = "BACKUP_LOOKBACK_HOURS", default_value = "24")]
    pub backup_lookback_hours: u64,

    /// Dry run - collect but only log what would be published
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

fn is_account_id(id: &str) -> bool {
    id.len() == 12 && id.bytes().all(|b| b.is_ascii_digit())
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self.excluded_accounts.iter().find(|id| !is_account_id(id)) {
            return Err(ConfigError::Invalid(format!(
                "excluded account id must be 12 digits: {bad:?}"
            )));
        }
        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid("region names must not be empty".into()));
        }
        if self.interval == 0 {
            return Err(ConfigError::Invalid("interval must be at least 1 second".into()));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("top-n must be at least 1".into()));
        }
        if self.findings_limit == 0 {
            return Err(ConfigError::Invalid("findings limit must be at least 1".into()));
        }
        if self.domain_timeout_secs == 0 {
            return Err(ConfigError::Invalid("domain timeout must be at least 1 second".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("metrics namespace must not be empty".into()));
        }

        self.broker_settings().validate()?;
        self.run_settings().validate()
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            role_name: self.role_name.clone(),
            partition: self.partition.clone(),
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            regions: self.regions.clone(),
            retry: RetryPolicy {
                max_attempts: self.auth_max_attempts,
                base_delay: Duration::from_millis(self.auth_base_delay_ms),
                max_delay: Duration::from_millis(self.auth_max_delay_ms),
            },
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            max_parallelism: self.max_parallelism,
            excluded_accounts: self.excluded_accounts.iter().cloned().collect::<BTreeSet<_>>(),
            target_group: self.target_group.clone().filter(|g| !g.trim().is_empty()),
            run_budget: self.run_budget_secs.map(Duration::from_secs),
            deadline_margin: Duration::from_secs(self.deadline_margin_secs),
            archive_hierarchy: self.archive_hierarchy,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn domain_timeout(&self) -> Duration {
        Duration::from_secs(self.domain_timeout_secs)
    }

    pub fn backup_lookback(&self) -> Duration {
        Duration::from_secs(self.backup_lookback_hours * 3600)
    }
}

//! Org Metrics Collector - Standalone Binary
//!
//! Walks the organization, collects per-account metrics and publishes them.
//! Runs once for scheduled jobs or loops on a fixed interval.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use org_metrics::cache::{Clock, SystemClock};
use org_metrics::collectors::aws::AwsServiceApis;
use org_metrics::collectors::backup::BackupJobsCollector;
use org_metrics::collectors::config_rules::ConfigComplianceCollector;
use org_metrics::collectors::iam::IamHygieneCollector;
use org_metrics::collectors::patch::PatchComplianceCollector;
use org_metrics::collectors::security_hub::SecurityFindingsCollector;
use org_metrics::collectors::{CollectorSet, MetricCollector};
use org_metrics::credentials::aws::StsRoleAssumer;
use org_metrics::credentials::CredentialBroker;
use org_metrics::directory::aws::AwsOrganizations;
use org_metrics::directory::{DirectoryCache, OrganizationDirectory};
use org_metrics::sinks::aws::{CloudWatchSink, FirehoseStream, S3ObjectStore};
use org_metrics::sinks::{
    ArchiveWriter, DryRunSink, LocalObjectStore, MetricsPublisher, ObjectStore, Sinks, StreamPublisher,
};
use org_metrics::{logging, CollectorConfig, ConfigError, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let config = CollectorConfig::parse();
    logging::init(config.log_format, &config.log_level);

    config.validate().context("Invalid configuration")?;

    info!(
        role = %config.role_name,
        regions = ?config.regions,
        max_parallelism = config.max_parallelism,
        target_group = ?config.target_group,
        interval = config.interval,
        dry_run = config.dry_run,
        "Starting Org Metrics Collector"
    );

    let orchestrator = build(&config).await?;

    if config.once {
        run_once(&orchestrator).await?;
    } else {
        let mut ticker = interval(Duration::from_secs(config.interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = run_once(&orchestrator).await {
                if is_fatal(&e) {
                    error!(error = %e, "Configuration error, stopping");
                    return Err(e);
                }
                error!(error = %e, "Collection run failed");
            }
        }
    }

    Ok(())
}

/// Configuration errors end the process; anything else waits for the next tick
fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ConfigError>().is_some()
}

/// Run a single collection pass and log its summary
async fn run_once(orchestrator: &Orchestrator) -> Result<()> {
    let report = orchestrator.run().await.context("Run aborted")?;

    let summary = serde_json::to_string(&report.summary).context("Failed to encode run summary")?;
    info!(summary = %summary, success = report.summary.success(), "Run summary");
    Ok(())
}

/// Wire the AWS backends into an orchestrator
async fn build(config: &CollectorConfig) -> Result<Orchestrator> {
    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cache = Arc::new(DirectoryCache::new(config.cache_ttl(), clock.clone()));
    let directory = Arc::new(OrganizationDirectory::new(
        Arc::new(AwsOrganizations::new(&sdk_config)),
        cache,
    ));

    let broker = Arc::new(CredentialBroker::new(
        Arc::new(StsRoleAssumer::new(&sdk_config)),
        config.broker_settings(),
    )?);

    let apis = Arc::new(AwsServiceApis::new(&sdk_config));
    let collectors: Vec<Arc<dyn MetricCollector>> = vec![
        Arc::new(ConfigComplianceCollector::new(apis.clone(), config.top_n)) as Arc<dyn MetricCollector>,
        Arc::new(SecurityFindingsCollector::new(apis.clone(), config.top_n, config.findings_limit)),
        Arc::new(BackupJobsCollector::new(
            apis.clone(),
            clock.clone(),
            config.backup_lookback(),
            config.top_n,
        )),
        Arc::new(IamHygieneCollector::new(apis.clone(), clock.clone(), config.top_n)),
        Arc::new(PatchComplianceCollector::new(apis)),
    ];
    let collectors = Arc::new(CollectorSet::new(collectors, config.domain_timeout()));

    let sinks = Arc::new(build_sinks(config, &sdk_config));

    Ok(Orchestrator::new(
        directory,
        broker,
        collectors,
        sinks,
        clock,
        config.run_settings(),
    )?)
}

fn build_sinks(config: &CollectorConfig, sdk_config: &aws_config::SdkConfig) -> Sinks {
    if config.dry_run {
        info!("DRY RUN - results will be logged, not published");
        return Sinks {
            metrics: Some(MetricsPublisher::new(Arc::new(DryRunSink), config.namespace.clone())),
            archive: Some(ArchiveWriter::new(Arc::new(DryRunSink), config.archive_prefix.clone())),
            stream: Some(StreamPublisher::new(Arc::new(DryRunSink))),
        };
    }

    let metrics = (!config.disable_metrics).then(|| {
        MetricsPublisher::new(Arc::new(CloudWatchSink::new(sdk_config)), config.namespace.clone())
    });

    let store: Option<Arc<dyn ObjectStore>> = match (&config.archive_bucket, &config.archive_dir) {
        (Some(bucket), _) => Some(Arc::new(S3ObjectStore::new(sdk_config, bucket.clone())) as Arc<dyn ObjectStore>),
        (None, Some(dir)) => Some(Arc::new(LocalObjectStore::new(dir)) as Arc<dyn ObjectStore>),
        (None, None) => None,
    };
    let archive = store.map(|s| ArchiveWriter::new(s, config.archive_prefix.clone()));

    let stream = config
        .stream_name
        .as_ref()
        .map(|name| StreamPublisher::new(Arc::new(FirehoseStream::new(sdk_config, name.clone()))));

    Sinks {
        metrics,
        archive,
        stream,
    }
}

//! End-to-end runs against the in-memory organization

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use org_metrics::collectors::Domain;
use org_metrics::error::ConfigError;
use org_metrics::orchestrator::{AccountOutcome, CollectionStatus, HealthStatus};

const B: &str = "200000000001";
const C: &str = "200000000002";
const D: &str = "200000000003";
const E: &str = "200000000004";

/// Root: management, B, suspended E; Workloads/Target: C, D
fn small_org() -> FakeOrg {
    FakeOrg::new()
        .account(ROOT, B)
        .suspended(ROOT, E)
        .group(ROOT, "ou-workloads", "Workloads")
        .group("ou-workloads", "ou-target", "Target")
        .account("ou-target", C)
        .account("ou-target", D)
}

fn wide_org(accounts: usize) -> FakeOrg {
    (1..=accounts).fold(FakeOrg::new(), |org, n| org.account(ROOT, &account_id(n)))
}

#[tokio::test]
async fn test_management_and_excluded_accounts_are_skipped() {
    let mut harness = Harness::new(small_org());
    harness.settings.excluded_accounts.insert(B.to_string());
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    let summary = &report.summary;

    assert_eq!(summary.total_accounts, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    // management + B
    assert_eq!(summary.excluded, 2);
    assert!(summary.success());

    let processed: Vec<&str> = report.results.iter().map(|r| r.account_id()).collect();
    assert_eq!(processed, vec![C, D]);

    let published = sink.metric_accounts();
    assert!(!published.contains(MANAGEMENT));
    assert!(!published.contains(B));
    assert!(!published.contains(E));
    assert_eq!(published, HashSet::from([C.to_string(), D.to_string()]));

    for line in sink.stream_lines() {
        assert_ne!(line["account_id"], MANAGEMENT);
        assert_ne!(line["account_id"], B);
    }
}

#[tokio::test]
async fn test_target_group_limits_the_run() {
    let mut harness = Harness::new(small_org());
    harness.settings.target_group = Some("Target".into());
    let (orchestrator, _, _, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.total_accounts, 2);
    assert_eq!(report.summary.excluded, 2);
    assert!(report.outcomes.keys().all(|id| id == C || id == D));
}

#[tokio::test]
async fn test_unknown_target_group_aborts_before_any_account() {
    let mut harness = Harness::new(small_org());
    harness.settings.target_group = Some("Sandbox".into());
    let (orchestrator, probe, sink, _) = harness.build();

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, ConfigError::TargetGroupNotFound(name) if name == "Sandbox"));
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 0);
    assert!(sink.object_keys().is_empty());
}

#[tokio::test]
async fn test_unreadable_organization_is_not_a_missing_group() {
    let mut org = small_org();
    org.fail_group_listing = true;
    let mut harness = Harness::new(org);
    harness.settings.target_group = Some("Target".into());
    let (orchestrator, _, _, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.processed, 0);
    assert!(report.summary.errors[0].starts_with("discovery"));
}

#[tokio::test]
async fn test_hierarchy_archived_alongside_snapshots() {
    let mut harness = Harness::new(small_org());
    harness.settings.archive_hierarchy = true;
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    let keys = sink.object_keys();
    let tree_key = format!("snapshots/hierarchy/date=2026-06-01/{}.json", report.summary.run_id);

    assert_eq!(keys.len(), 4);
    assert!(keys.contains(&tree_key));
    assert!(report.summary.success());
}

#[tokio::test]
async fn test_lease_failure_is_isolated_to_one_account() {
    let mut harness = Harness::new(small_org());
    harness.assumer.denied.insert(C.to_string());
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    let summary = &report.summary;

    assert_eq!(summary.total_accounts, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert!(summary.errors.iter().any(|e| e.starts_with(C)));
    assert!(matches!(report.outcomes[C], AccountOutcome::Failed { .. }));
    assert_eq!(sink.object_keys().len(), 2);
}

#[tokio::test]
async fn test_failed_domain_marks_result_partial() {
    let mut harness = Harness::new(small_org());
    let mut probe = ProbeCollector::new(Duration::from_millis(1));
    probe.failing.insert(D.to_string());
    harness.probe = Arc::new(probe);
    let (orchestrator, _, _, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.processed, 3);

    let d = report.results.iter().find(|r| r.account_id() == D).unwrap();
    assert_eq!(d.status, CollectionStatus::Partial);
    assert!(d.domains[&Domain::BackupJobs].is_failed());
    assert_eq!(d.domains[&Domain::SecurityFindings].state(), "collected");

    let b = report.results.iter().find(|r| r.account_id() == B).unwrap();
    assert_eq!(b.status, CollectionStatus::Complete);
}

#[tokio::test]
async fn test_health_scores_reach_every_sink() {
    let mut harness = Harness::new(small_org());
    let mut probe = ProbeCollector::new(Duration::from_millis(1));
    probe.failing.insert(D.to_string());
    harness.probe = Arc::new(probe);
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();

    // one high finding per region -4, half the users without MFA -5, half the keys stale -5,
    // no protected resources -10 (a failed backup read costs only 5)
    let scores: Vec<(&str, f64, HealthStatus)> = report
        .results
        .iter()
        .map(|r| (r.account_id(), r.health.score, r.health.status))
        .collect();
    assert_eq!(
        scores,
        vec![
            (B, 76.0, HealthStatus::Good),
            (C, 76.0, HealthStatus::Good),
            (D, 81.0, HealthStatus::Excellent),
        ]
    );

    let published = sink.metrics.lock().unwrap();
    let d_metric = published
        .iter()
        .find(|r| r.name == "AccountHealthScore" && r.dimension("AccountId") == Some(D))
        .unwrap();
    assert_eq!(d_metric.value, 81.0);
    drop(published);

    let d_line = sink
        .stream_lines()
        .into_iter()
        .find(|l| l["account_id"] == D)
        .unwrap();
    assert_eq!(d_line["health_status"], "excellent");
    assert_eq!(d_line["iam_hygiene_users_without_mfa"], 1);
}

#[tokio::test]
async fn test_publish_failures_are_counted_not_fatal() {
    let mut harness = Harness::new(small_org());
    harness.sink = Arc::new(MemorySink {
        fail_archive: true,
        ..Default::default()
    });
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.processed, 3);
    assert_eq!(report.summary.publish_errors, 3);
    assert!(!report.summary.success());
    assert_eq!(sink.stream_lines().len(), 3);
}

#[tokio::test]
async fn test_discovery_failure_yields_empty_summary() {
    let mut org = small_org();
    org.fail_listing = true;
    let (orchestrator, _, _, _) = Harness::new(org).build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.processed, 0);
    assert_eq!(report.summary.total_accounts, 0);
    assert_eq!(report.summary.errors.len(), 1);
    assert!(report.summary.errors[0].starts_with("discovery"));
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_bound_and_wall_time() {
    let mut harness = Harness::new(wide_org(10));
    harness.settings.max_parallelism = 3;
    harness.probe = Arc::new(ProbeCollector::new(Duration::from_millis(100)));
    let (orchestrator, probe, _, _) = harness.build();

    let started = tokio::time::Instant::now();
    let report = orchestrator.run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.summary.processed, 10);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 3);
    // ceil(10 / 3) waves of 100ms
    assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_run_budget_abandons_and_skips_late_units() {
    let mut harness = Harness::new(wide_org(3));
    harness.settings.max_parallelism = 1;
    harness.settings.run_budget = Some(Duration::from_millis(300));
    harness.settings.deadline_margin = Duration::from_millis(50);
    harness.probe = Arc::new(ProbeCollector::new(Duration::from_millis(200)));
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    let summary = &report.summary;

    // First unit finishes at 200ms, the second starts then and is cut off
    // at 300ms, the third never gets a permit before 250ms.
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.not_attempted, 1);
    assert_eq!(report.results.len(), 1);

    // Only the processed account reached the sinks
    assert_eq!(sink.object_keys().len(), 1);
    assert_eq!(sink.stream_lines().len(), 1);
    assert_eq!(sink.metric_accounts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publishing_is_not_cut_off_by_the_budget() {
    let mut harness = Harness::new(wide_org(1));
    harness.settings.run_budget = Some(Duration::from_millis(300));
    harness.settings.deadline_margin = Duration::from_millis(50);
    harness.probe = Arc::new(ProbeCollector::new(Duration::from_millis(100)));
    harness.sink = Arc::new(MemorySink {
        archive_delay: Duration::from_millis(400),
        ..Default::default()
    });
    let (orchestrator, _, sink, _) = harness.build();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.summary.abandoned, 0);
    assert_eq!(sink.object_keys().len(), 1);
    assert_eq!(sink.stream_lines().len(), 1);
}

#[tokio::test]
async fn test_runs_are_independent() {
    let (orchestrator, _, sink, clock) = Harness::new(small_org()).build();

    let first = orchestrator.run().await.unwrap();
    clock.advance(Duration::from_secs(900));
    let second = orchestrator.run().await.unwrap();

    assert_ne!(first.summary.run_id, second.summary.run_id);
    assert_eq!(
        second.summary.timestamp - first.summary.timestamp,
        chrono::Duration::seconds(900)
    );
    assert_eq!(first.summary.processed, second.summary.processed);

    // Every run writes its own snapshot per account
    let keys = sink.object_keys();
    assert_eq!(keys.len(), 6);
    assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 6);
}

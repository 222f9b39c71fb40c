//! Run Orchestrator
//!
//! Discover → Filter → FanOut → {Lease → Collect → Merge → Dispatch} per
//! account → Aggregate.
//!
//! Each account is one task in a `JoinSet`, admitted by a semaphore. A unit
//! failure (auth error, panic) is counted and never stops the run.
//!
//! ## Run budget
//!
//! With a budget configured, units that have not started when
//! `budget - margin` has elapsed are reported as not attempted, and units
//! still leasing or collecting when the budget is spent are abandoned.
//! Sinks are only written for units that finished collecting in time.

mod health;
mod types;

pub use health::*;
pub use types::*;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::Clock;
use crate::collectors::CollectorSet;
use crate::credentials::CredentialBroker;
use crate::directory::{Account, AccountStatus, OrganizationDirectory};
use crate::error::{ConfigError, DirectoryError};
use crate::sinks::{DispatchReport, Sinks};

/// Default number of accounts processed at once
pub const DEFAULT_MAX_PARALLELISM: usize = 10;

/// Per-run knobs
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_parallelism: usize,
    pub excluded_accounts: BTreeSet<String>,
    /// Restrict the run to accounts beneath this group
    pub target_group: Option<String>,
    pub run_budget: Option<Duration>,
    pub deadline_margin: Duration,
    /// Archive the organization tree once per run
    pub archive_hierarchy: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            excluded_accounts: BTreeSet::new(),
            target_group: None,
            run_budget: None,
            deadline_margin: Duration::from_secs(30),
            archive_hierarchy: false,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::Invalid("max parallelism must be at least 1".into()));
        }
        if let Some(budget) = self.run_budget {
            if budget <= self.deadline_margin {
                return Err(ConfigError::Invalid(format!(
                    "run budget ({}s) must exceed the deadline margin ({}s)",
                    budget.as_secs(),
                    self.deadline_margin.as_secs()
                )));
            }
        }
        Ok(())
    }
}

/// Accounts chosen for one run
#[derive(Debug)]
struct Selection {
    selected: Vec<Account>,
    excluded: usize,
}

/// What a single unit produced
enum UnitOutcome {
    Done(Box<CollectionResult>, DispatchReport),
    Failed(String),
    Abandoned,
    NotAttempted,
}

/// Drives one collection run across the organization
#[derive(Clone)]
pub struct Orchestrator {
    directory: Arc<OrganizationDirectory>,
    broker: Arc<CredentialBroker>,
    collectors: Arc<CollectorSet>,
    sinks: Arc<Sinks>,
    clock: Arc<dyn Clock>,
    settings: Arc<RunSettings>,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<OrganizationDirectory>,
        broker: Arc<CredentialBroker>,
        collectors: Arc<CollectorSet>,
        sinks: Arc<Sinks>,
        clock: Arc<dyn Clock>,
        settings: RunSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            directory,
            broker,
            collectors,
            sinks,
            clock,
            settings: Arc::new(settings),
        })
    }

    /// Execute one full run.
    ///
    /// Only configuration problems (an unknown target group) are returned
    /// as errors; everything else is reported in the summary.
    pub async fn run(&self) -> Result<RunReport, ConfigError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut summary = RunSummary::new(run_id, self.clock.now());

        info!(run_id = %run_id, "Starting collection run");

        let selection = match self.discover().await {
            Ok(selection) => selection,
            Err(DirectoryError::GroupNotFound(name)) => {
                error!(run_id = %run_id, group = %name, "Target group not found");
                return Err(ConfigError::TargetGroupNotFound(name));
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Account discovery failed");
                self.directory.refresh();
                summary.errors.push(format!("discovery: {e}"));
                summary.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(RunReport {
                    summary,
                    results: Vec::new(),
                    outcomes: BTreeMap::new(),
                });
            }
        };

        summary.total_accounts = selection.selected.len();
        summary.excluded = selection.excluded;
        info!(
            run_id = %run_id,
            selected = summary.total_accounts,
            excluded = summary.excluded,
            max_parallelism = self.settings.max_parallelism,
            "Accounts selected"
        );

        if self.settings.archive_hierarchy {
            if let Err(e) = self.archive_hierarchy(run_id, summary.timestamp).await {
                warn!(run_id = %run_id, error = %e, "Failed to archive organization hierarchy");
                summary.publish_errors += 1;
                summary.errors.push(format!("hierarchy: {e}"));
            }
        }

        let (start_deadline, hard_deadline) = match self.settings.run_budget {
            Some(budget) => (
                Some(started + budget.saturating_sub(self.settings.deadline_margin)),
                Some(started + budget),
            ),
            None => (None, None),
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallelism));
        let mut units = JoinSet::new();

        for account in selection.selected {
            let this = self.clone();
            let semaphore = semaphore.clone();
            units.spawn(async move {
                let account_id = account.id.clone();
                let outcome = this
                    .run_unit(run_id, account, semaphore, start_deadline, hard_deadline)
                    .await;
                (account_id, outcome)
            });
        }

        let mut results = Vec::new();
        let mut outcomes = BTreeMap::new();

        while let Some(joined) = units.join_next().await {
            let (account_id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Account task did not complete");
                    summary.failed += 1;
                    summary.errors.push(format!("task: {e}"));
                    continue;
                }
            };

            let recorded = match outcome {
                UnitOutcome::Done(result, dispatch) => {
                    summary.processed += 1;
                    summary.publish_errors += dispatch.errors.len();
                    summary
                        .errors
                        .extend(dispatch.errors.iter().map(|e| format!("{account_id}: {e}")));
                    results.push(*result);
                    AccountOutcome::Processed
                }
                UnitOutcome::Failed(reason) => {
                    summary.failed += 1;
                    summary.errors.push(format!("{account_id}: {reason}"));
                    AccountOutcome::Failed { reason }
                }
                UnitOutcome::Abandoned => {
                    summary.abandoned += 1;
                    AccountOutcome::Abandoned
                }
                UnitOutcome::NotAttempted => {
                    summary.not_attempted += 1;
                    AccountOutcome::NotAttempted
                }
            };
            outcomes.insert(account_id, recorded);
        }

        results.sort_by(|a, b| a.account.id.cmp(&b.account.id));
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            run_id = %run_id,
            total = summary.total_accounts,
            processed = summary.processed,
            failed = summary.failed,
            excluded = summary.excluded,
            abandoned = summary.abandoned,
            not_attempted = summary.not_attempted,
            publish_errors = summary.publish_errors,
            duration_ms = summary.duration_ms,
            "Collection run finished"
        );

        Ok(RunReport {
            summary,
            results,
            outcomes,
        })
    }

    async fn discover(&self) -> Result<Selection, DirectoryError> {
        let target = match &self.settings.target_group {
            Some(name) => {
                let group_id = self.directory.find_group(name).await?;
                Some(self.directory.list_accounts_under(&group_id).await)
            }
            None => None,
        };

        let active = self.directory.list_all_accounts(AccountStatus::Active).await?;
        let management = self.directory.management_account_id().await?;
        let discovered = active.len();

        let selected: Vec<Account> = active
            .into_iter()
            .filter(|a| target.as_ref().map_or(true, |ids| ids.contains(&a.id)))
            .filter(|a| a.id != management)
            .filter(|a| !self.settings.excluded_accounts.contains(&a.id))
            .collect();

        Ok(Selection {
            excluded: discovered - selected.len(),
            selected,
        })
    }

    async fn archive_hierarchy(&self, run_id: Uuid, at: DateTime<Utc>) -> Result<(), String> {
        let Some(archive) = &self.sinks.archive else {
            return Ok(());
        };
        let tree = self.directory.hierarchy().await.map_err(|e| e.to_string())?;
        archive
            .write_hierarchy(run_id, at, &tree)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn run_unit(
        &self,
        run_id: Uuid,
        account: Account,
        semaphore: Arc<Semaphore>,
        start_deadline: Option<Instant>,
        hard_deadline: Option<Instant>,
    ) -> UnitOutcome {
        let permit = match start_deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await {
                // A permit that frees up exactly at the deadline still counts as too late
                Ok(Ok(permit)) if Instant::now() < deadline => permit,
                _ => {
                    warn!(account_id = %account.id, "Run deadline reached before start");
                    return UnitOutcome::NotAttempted;
                }
            },
            None => match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return UnitOutcome::NotAttempted,
            },
        };

        let account_id = account.id.clone();
        let unit = AssertUnwindSafe(self.process_account(run_id, account)).catch_unwind();

        let finished = match hard_deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, unit).await {
                Ok(finished) => finished,
                Err(_) => {
                    warn!(account_id = %account_id, "Run budget spent, abandoning account");
                    return UnitOutcome::Abandoned;
                }
            },
            None => unit.await,
        };

        let result = match finished {
            Ok(Ok(result)) => result,
            Ok(Err(reason)) => {
                error!(account_id = %account_id, reason = %reason, "Account processing failed");
                return UnitOutcome::Failed(reason);
            }
            Err(_) => {
                error!(account_id = %account_id, "Account processing panicked");
                return UnitOutcome::Failed("account processing panicked".to_string());
            }
        };

        // Publishing starts only once collection finished inside the budget,
        // so an abandoned account never has partial output.
        let dispatch = self.sinks.dispatch(&result).await;
        drop(permit);
        UnitOutcome::Done(Box::new(result), dispatch)
    }

    async fn process_account(&self, run_id: Uuid, account: Account) -> Result<CollectionResult, String> {
        let session = self
            .broker
            .lease(&account.id)
            .await
            .map_err(|e| format!("credential lease failed: {e}"))?;

        let domains = self.collectors.collect_all(&account.id, &session).await;
        drop(session);

        Ok(CollectionResult::new(run_id, account, self.clock.now(), domains))
    }
}

//! AWS SDK backends for the domain collectors
//!
//! Clients are built per call from the leased credentials and region; the
//! base config only contributes retry, timeout and endpoint settings.

use async_trait::async_trait;
use aws_config::SdkConfig;
use chrono::{DateTime, Utc};

use super::backup::{BackupApi, BackupJob, BackupJobState};
use super::config_rules::{ConfigRulesApi, RuleCompliance, RuleState};
use super::iam::{AccessKey, IamApi, IamUser};
use super::patch::{InstancePatchState, PatchApi, PatchSeverityCounts};
use super::security_hub::{ControlStatus, Finding, SecurityHubApi, Severity};
use crate::aws_support::{error_code, service_error, session_config};
use crate::credentials::ScopedSession;
use crate::error::ServiceError;

/// Largest page the findings API returns
const FINDINGS_PAGE_MAX: usize = 100;

fn non_negative(value: Option<i32>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

/// Every per-domain service API over the AWS SDK
#[derive(Clone)]
pub struct AwsServiceApis {
    base: SdkConfig,
}

impl AwsServiceApis {
    pub fn new(base: &SdkConfig) -> Self {
        Self { base: base.clone() }
    }

    fn config(&self, session: &ScopedSession, region: &str) -> SdkConfig {
        session_config(&self.base, &session.lease, region)
    }
}

#[async_trait]
impl ConfigRulesApi for AwsServiceApis {
    async fn recorder_enabled(&self, session: &ScopedSession, region: &str) -> Result<bool, ServiceError> {
        let client = aws_sdk_config::Client::new(&self.config(session, region));
        match client.describe_configuration_recorders().send().await {
            Ok(output) => Ok(!output.configuration_recorders().is_empty()),
            Err(e) if error_code(&e).as_deref() == Some("NoSuchConfigurationRecorderException") => Ok(false),
            Err(e) => Err(service_error(&e)),
        }
    }

    async fn rule_compliance(&self, session: &ScopedSession, region: &str) -> Result<Vec<RuleCompliance>, ServiceError> {
        let client = aws_sdk_config::Client::new(&self.config(session, region));
        let mut rules = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_compliance_by_config_rule()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            for item in output.compliance_by_config_rules() {
                let compliance = item.compliance();
                let state = compliance
                    .and_then(|c| c.compliance_type())
                    .map(|t| RuleState::parse(t.as_str()))
                    .unwrap_or(RuleState::InsufficientData);
                let flagged = compliance
                    .and_then(|c| c.compliance_contributor_count())
                    .map(|count| {
                        let capped: Option<i32> = count.capped_count().into();
                        non_negative(capped)
                    })
                    .unwrap_or(0);

                rules.push(RuleCompliance {
                    rule_name: item.config_rule_name().unwrap_or_default().to_string(),
                    state,
                    non_compliant_resources: flagged,
                });
            }

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(rules)
    }
}

#[async_trait]
impl SecurityHubApi for AwsServiceApis {
    async fn hub_enabled(&self, session: &ScopedSession, region: &str) -> Result<bool, ServiceError> {
        let client = aws_sdk_securityhub::Client::new(&self.config(session, region));
        match client.describe_hub().send().await {
            Ok(_) => Ok(true),
            Err(e) if matches!(
                error_code(&e).as_deref(),
                Some("InvalidAccessException" | "ResourceNotFoundException")
            ) =>
            {
                Ok(false)
            }
            Err(e) => Err(service_error(&e)),
        }
    }

    async fn active_findings(
        &self,
        session: &ScopedSession,
        region: &str,
        limit: usize,
    ) -> Result<Vec<Finding>, ServiceError> {
        use aws_sdk_securityhub::types::{AwsSecurityFindingFilters, StringFilter, StringFilterComparison};

        let client = aws_sdk_securityhub::Client::new(&self.config(session, region));
        let filters = AwsSecurityFindingFilters::builder()
            .record_state(
                StringFilter::builder()
                    .value("ACTIVE")
                    .comparison(StringFilterComparison::Equals)
                    .build(),
            )
            .workflow_status(
                StringFilter::builder()
                    .value("NEW")
                    .comparison(StringFilterComparison::Equals)
                    .build(),
            )
            .build();

        let mut findings = Vec::new();
        let mut next_token: Option<String> = None;

        while findings.len() < limit {
            let page_size = (limit - findings.len()).min(FINDINGS_PAGE_MAX) as i32;
            let output = client
                .get_findings()
                .filters(filters.clone())
                .max_results(page_size)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            for raw in output.findings() {
                let title: Option<&str> = raw.title().into();
                let severity = raw
                    .severity()
                    .and_then(|s| s.label())
                    .map(|l| Severity::parse(l.as_str()))
                    .unwrap_or(Severity::Informational);
                let control = raw
                    .compliance()
                    .and_then(|c| c.status())
                    .and_then(|s| match s.as_str() {
                        "PASSED" => Some(ControlStatus::Passed),
                        "FAILED" => Some(ControlStatus::Failed),
                        _ => None,
                    });

                findings.push(Finding {
                    title: title.unwrap_or_default().to_string(),
                    severity,
                    control,
                });
            }

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        findings.truncate(limit);
        Ok(findings)
    }
}

#[async_trait]
impl BackupApi for AwsServiceApis {
    async fn plan_count(&self, session: &ScopedSession, region: &str) -> Result<u64, ServiceError> {
        let client = aws_sdk_backup::Client::new(&self.config(session, region));
        let mut count = 0u64;
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .list_backup_plans()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;
            count += output.backup_plans_list().len() as u64;

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(count)
    }

    async fn protected_resource_count(&self, session: &ScopedSession, region: &str) -> Result<u64, ServiceError> {
        let client = aws_sdk_backup::Client::new(&self.config(session, region));
        let mut count = 0u64;
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .list_protected_resources()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;
            count += output.results().len() as u64;

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(count)
    }

    async fn jobs_since(
        &self,
        session: &ScopedSession,
        region: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<BackupJob>, ServiceError> {
        let client = aws_sdk_backup::Client::new(&self.config(session, region));
        let created_after = aws_smithy_types::DateTime::from_secs(since.timestamp());
        let mut jobs = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .list_backup_jobs()
                .by_created_after(created_after)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            jobs.extend(output.backup_jobs().iter().map(|job| BackupJob {
                state: job
                    .state()
                    .map(|s| BackupJobState::parse(s.as_str()))
                    .unwrap_or(BackupJobState::InProgress),
                status_message: job.status_message().map(str::to_string),
            }));

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(jobs)
    }
}

#[async_trait]
impl PatchApi for AwsServiceApis {
    async fn instance_ids(&self, session: &ScopedSession, region: &str) -> Result<Vec<String>, ServiceError> {
        use aws_sdk_ec2::types::Filter;

        let client = aws_sdk_ec2::Client::new(&self.config(session, region));
        let state_filter = Filter::builder()
            .name("instance-state-name")
            .values("running")
            .values("stopped")
            .build();
        let mut ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_instances()
                .filters(state_filter.clone())
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;
            ids.extend(
                output
                    .reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(|i| i.instance_id())
                    .map(str::to_string),
            );

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn managed_instance_ids(&self, session: &ScopedSession, region: &str) -> Result<Vec<String>, ServiceError> {
        use aws_sdk_ssm::types::PingStatus;

        let client = aws_sdk_ssm::Client::new(&self.config(session, region));
        let mut ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_instance_information()
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            ids.extend(
                output
                    .instance_information_list()
                    .iter()
                    .filter(|i| i.ping_status() == Some(&PingStatus::Online))
                    .filter_map(|i| i.instance_id().map(str::to_string)),
            );

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn compliance_summary(&self, session: &ScopedSession, region: &str) -> Result<PatchSeverityCounts, ServiceError> {
        use aws_sdk_ssm::types::{ComplianceQueryOperatorType, ComplianceStringFilter};

        let client = aws_sdk_ssm::Client::new(&self.config(session, region));
        let output = client
            .list_compliance_summaries()
            .filters(
                ComplianceStringFilter::builder()
                    .key("ComplianceType")
                    .values("Patch")
                    .r#type(ComplianceQueryOperatorType::Equal)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        let mut counts = PatchSeverityCounts::default();
        for item in output.compliance_summary_items() {
            let Some(severity) = item.non_compliant_summary().and_then(|s| s.severity_summary()) else {
                continue;
            };
            counts += PatchSeverityCounts {
                critical: non_negative(severity.critical_count().into()),
                high: non_negative(severity.high_count().into()),
                medium: non_negative(severity.medium_count().into()),
                low: non_negative(severity.low_count().into()),
                informational: non_negative(severity.informational_count().into()),
                unspecified: non_negative(severity.unspecified_count().into()),
            };
        }

        Ok(counts)
    }

    async fn patch_states(
        &self,
        session: &ScopedSession,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<InstancePatchState>, ServiceError> {
        let client = aws_sdk_ssm::Client::new(&self.config(session, region));
        let output = client
            .describe_instance_patch_states()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        Ok(output
            .instance_patch_states()
            .iter()
            .map(|state| InstancePatchState {
                missing: non_negative(state.missing_count().into()),
                failed: non_negative(state.failed_count().into()),
                installed_pending_reboot: non_negative(state.installed_pending_reboot_count().into()),
            })
            .collect())
    }
}

#[async_trait]
impl IamApi for AwsServiceApis {
    async fn users(&self, session: &ScopedSession, region: &str) -> Result<Vec<IamUser>, ServiceError> {
        use aws_sdk_iam::types::StatusType;

        let client = aws_sdk_iam::Client::new(&self.config(session, region));
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = client
                .list_users()
                .set_marker(marker)
                .send()
                .await
                .map_err(|e| service_error(&e))?;
            names.extend(output.users().iter().map(|u| u.user_name().to_string()));

            marker = output.marker().map(str::to_string);
            if !output.is_truncated() || marker.is_none() {
                break;
            }
        }

        let mut users = Vec::with_capacity(names.len());
        for name in names {
            let mfa = client
                .list_mfa_devices()
                .user_name(&name)
                .send()
                .await
                .map_err(|e| service_error(&e))?;
            let keys = client
                .list_access_keys()
                .user_name(&name)
                .send()
                .await
                .map_err(|e| service_error(&e))?;

            let access_keys = keys
                .access_key_metadata()
                .iter()
                .map(|key| AccessKey {
                    // Undated keys count as fresh
                    created_at: key
                        .create_date()
                        .and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), 0))
                        .unwrap_or_else(Utc::now),
                    active: key.status() == Some(&StatusType::Active),
                })
                .collect();

            users.push(IamUser {
                name,
                mfa_devices: mfa.mfa_devices().len() as u64,
                access_keys,
            });
        }

        Ok(users)
    }
}

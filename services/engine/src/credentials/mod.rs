//! Credential Broker
//!
//! Exchanges an account id for a scoped, time-limited session by assuming a
//! well-known role in that account. Leases are never renewed, cached or
//! persisted.

mod types;
#[cfg(feature = "aws")]
pub mod aws;

pub use types::*;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable as _};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AuthError, ConfigError};

/// Shortest lease the token service accepts
pub const MIN_LEASE_DURATION: Duration = Duration::from_secs(900);
/// Longest lease the token service accepts
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(43_200);

/// Role assumption backend
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(&self, request: &LeaseRequest) -> Result<CredentialLease, AuthError>;

    /// Identity the token service reports for `lease`
    async fn verify(&self, lease: &CredentialLease) -> Result<CallerIdentity, AuthError>;
}

/// Classify a token service error code
pub fn classify_sts_error(code: &str, message: &str) -> AuthError {
    let detail = format!("{code}: {message}");
    match code {
        "Throttling"
        | "ThrottlingException"
        | "RequestLimitExceeded"
        | "IDPCommunicationError"
        | "ServiceUnavailable"
        | "InternalFailure"
        // A freshly created role can take a while to propagate
        | "InvalidClientTokenId"
        | "ExpiredToken" => AuthError::Transient(detail),
        _ => AuthError::Permanent(detail),
    }
}

/// Exponential backoff for transient auth failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: `base * 2^(n-1)`, capped at `max_delay`,
    /// with `max_attempts - 1` retries in total
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub role_name: String,
    pub partition: String,
    pub lease_duration: Duration,
    pub regions: Vec<String>,
    pub retry: RetryPolicy,
}

impl BrokerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role_name.trim().is_empty() {
            return Err(ConfigError::Invalid("role name must not be empty".into()));
        }
        if !(MIN_LEASE_DURATION..=MAX_LEASE_DURATION).contains(&self.lease_duration) {
            return Err(ConfigError::Invalid(format!(
                "lease duration must be between {}s and {}s, got {}s",
                MIN_LEASE_DURATION.as_secs(),
                MAX_LEASE_DURATION.as_secs(),
                self.lease_duration.as_secs()
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("auth attempts must be at least 1".into()));
        }
        if self.regions.is_empty() {
            return Err(ConfigError::Invalid("at least one region is required".into()));
        }
        Ok(())
    }
}

pub struct CredentialBroker {
    assumer: Arc<dyn RoleAssumer>,
    settings: BrokerSettings,
}

impl CredentialBroker {
    pub fn new(assumer: Arc<dyn RoleAssumer>, settings: BrokerSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { assumer, settings })
    }

    pub fn role_arn(&self, account_id: &str) -> String {
        format!(
            "arn:{}:iam::{}:role/{}",
            self.settings.partition, account_id, self.settings.role_name
        )
    }

    fn request_for(&self, account_id: &str) -> LeaseRequest {
        LeaseRequest {
            account_id: account_id.to_string(),
            role_arn: self.role_arn(account_id),
            session_name: format!("org-metrics-{account_id}"),
            duration: self.settings.lease_duration,
        }
    }

    /// Lease a session for `account_id`, retrying transient failures.
    ///
    /// Assumption and identity verification are retried together: freshly
    /// issued credentials can be rejected by the identity call until they
    /// propagate.
    pub async fn lease(&self, account_id: &str) -> Result<ScopedSession, AuthError> {
        let request = self.request_for(account_id);
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let outcome = (|| self.attempt(&request, attempts))
            .retry(self.settings.retry.backoff())
            .when(AuthError::is_transient)
            .notify(|err: &AuthError, delay: Duration| {
                warn!(
                    account_id = %account_id,
                    attempt = attempts.load(Ordering::SeqCst),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient role assumption failure, retrying"
                );
            })
            .await;

        let attempts = counter.load(Ordering::SeqCst);
        let (lease, identity) = match outcome {
            Ok(leased) => leased,
            Err(AuthError::Transient(last)) => {
                warn!(account_id = %account_id, attempts, "Role assumption retries exhausted");
                return Err(AuthError::RetriesExhausted { attempts, last });
            }
            Err(e) => return Err(e),
        };

        debug!(account_id = %account_id, arn = %identity.arn, "Lease verified");
        info!(account_id = %account_id, attempts, expires_at = %lease.expires_at, "Leased credentials");

        Ok(ScopedSession::new(lease, self.settings.regions.clone()))
    }

    /// One assume + verify round trip
    async fn attempt(
        &self,
        request: &LeaseRequest,
        attempts: &AtomicU32,
    ) -> Result<(CredentialLease, CallerIdentity), AuthError> {
        attempts.fetch_add(1, Ordering::SeqCst);

        let lease = self.assumer.assume_role(request).await?;
        let identity = self.assumer.verify(&lease).await?;
        if identity.account != request.account_id {
            return Err(AuthError::Permanent(format!(
                "lease for {} resolved to account {} ({})",
                request.account_id, identity.account, identity.arn
            )));
        }
        Ok((lease, identity))
    }
}

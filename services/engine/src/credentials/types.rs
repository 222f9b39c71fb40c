//! Credential Types

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Temporary credentials for one member account.
///
/// Owned by exactly one processing unit and dropped with it. There is no
/// `Clone` and `Debug` never prints the secret or the session token.
pub struct CredentialLease {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CredentialLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A lease plus the regions the unit will query with it
#[derive(Debug)]
pub struct ScopedSession {
    pub lease: CredentialLease,
    regions: Vec<String>,
}

impl ScopedSession {
    pub fn new(lease: CredentialLease, regions: Vec<String>) -> Self {
        Self { lease, regions }
    }

    pub fn account_id(&self) -> &str {
        &self.lease.account_id
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }
}

/// Parameters of a single role assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub account_id: String,
    pub role_arn: String,
    pub session_name: String,
    pub duration: Duration,
}

/// Identity reported for a lease by the token service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

//! Error types
//!
//! Each component owns a small `thiserror` enum. `ErrorClass` is the single
//! decision point for retry-vs-skip-vs-abort.

use thiserror::Error;

/// How the engine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying (throttling, propagation delay, network)
    Transient,
    /// Retrying will not help; skip the affected unit
    Permanent,
    /// Fatal at startup, no account is processed
    Configuration,
}

/// Errors raised while reading the organization structure
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("organization has no root")]
    NoRoot,

    #[error("group {name} not found, {skipped} branches could not be read")]
    SearchIncomplete { name: String, skipped: usize },

    #[error("organizations API error: {0}")]
    Api(String),
}

impl DirectoryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DirectoryError::GroupNotFound(_) => ErrorClass::Configuration,
            DirectoryError::SearchIncomplete { .. } => ErrorClass::Transient,
            DirectoryError::NoRoot | DirectoryError::Api(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors raised while leasing credentials for an account
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("transient auth failure: {0}")]
    Transient(String),

    #[error("permanent auth failure: {0}")]
    Permanent(String),

    #[error("auth retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl AuthError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AuthError::Transient(_) | AuthError::RetriesExhausted { .. } => ErrorClass::Transient,
            AuthError::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transient(_))
    }
}

/// Errors raised by a per-domain service backend
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service is not provisioned in this account/region
    #[error("service not enabled: {0}")]
    NotEnabled(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("service API error: {0}")]
    Api(String),
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Throttled(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Prefix the message with the region the call was made in
    pub fn in_region(self, region: &str) -> Self {
        match self {
            ServiceError::NotEnabled(m) => ServiceError::NotEnabled(format!("{region}: {m}")),
            ServiceError::Throttled(m) => ServiceError::Throttled(format!("{region}: {m}")),
            ServiceError::AccessDenied(m) => ServiceError::AccessDenied(format!("{region}: {m}")),
            ServiceError::Api(m) => ServiceError::Api(format!("{region}: {m}")),
        }
    }
}

/// Errors raised by a sink
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{sink} publish failed: {message}")]
    Api { sink: &'static str, message: String },

    #[error("{failed} of {total} metric batches failed, first error: {first}")]
    PartialBatch {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup errors; the run aborts before any account is processed
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("target group not found: {0}")]
    TargetGroupNotFound(String),

    #[error("failed to initialize backend: {0}")]
    Backend(String),
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

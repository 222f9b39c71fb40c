//! Org Metrics Engine
//!
//! Cross-account discovery and metrics collection for a cloud organization:
//! walk the organization, lease credentials per account, harvest per-domain
//! metrics in parallel and publish the results to the configured sinks.

#[cfg(feature = "aws")]
mod aws_support;

pub mod cache;
pub mod collectors;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod sinks;

pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use collectors::{CollectorSet, Domain, DomainMetrics, MetricCollector};
pub use config::CollectorConfig;
pub use credentials::{CredentialBroker, RoleAssumer};
pub use directory::{DirectoryCache, OrganizationDirectory, OrganizationsApi};
pub use error::{AuthError, ConfigError, DirectoryError, ErrorClass, PublishError, ServiceError};
pub use orchestrator::{CollectionResult, Orchestrator, RunReport, RunSettings, RunSummary};
pub use sinks::Sinks;

//! Shared helpers for the AWS SDK backends

use aws_config::SdkConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_types::region::Region;
use std::time::SystemTime;

use crate::credentials::CredentialLease;
use crate::error::ServiceError;

/// Service error code, if the call reached the service
pub(crate) fn error_code<E, R>(err: &SdkError<E, R>) -> Option<String>
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(inner) => inner.err().code().map(str::to_string),
        _ => None,
    }
}

/// True for failures that never reached the service (network, timeouts)
pub(crate) fn is_network<E, R>(err: &SdkError<E, R>) -> bool {
    matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    )
}

pub(crate) fn describe<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    DisplayErrorContext(err).to_string()
}

/// Map a per-domain service call failure onto [`ServiceError`]
pub(crate) fn service_error<E, R>(err: &SdkError<E, R>) -> ServiceError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    let message = describe(err);
    match error_code(err).as_deref() {
        Some("ThrottlingException" | "Throttling" | "TooManyRequestsException" | "RequestLimitExceeded") => {
            ServiceError::Throttled(message)
        }
        Some("AccessDeniedException" | "AccessDenied" | "UnauthorizedOperation") => {
            ServiceError::AccessDenied(message)
        }
        _ => ServiceError::Api(message),
    }
}

/// SDK config for one leased account in one region
pub(crate) fn session_config(base: &SdkConfig, lease: &CredentialLease, region: &str) -> SdkConfig {
    let expiry: SystemTime = lease.expires_at.into();
    let credentials = Credentials::new(
        lease.access_key_id.clone(),
        lease.secret_access_key.clone(),
        Some(lease.session_token.clone()),
        Some(expiry),
        "org-metrics-lease",
    );

    base.to_builder()
        .region(Region::new(region.to_string()))
        .credentials_provider(SharedCredentialsProvider::new(credentials))
        .build()
}

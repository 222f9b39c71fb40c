//! STS backend for the credential broker

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sts::Client;
use chrono::{DateTime, Utc};

use super::{classify_sts_error, CallerIdentity, CredentialLease, LeaseRequest, RoleAssumer};
use crate::aws_support::{describe, error_code, is_network, session_config};
use crate::error::AuthError;

const DEFAULT_STS_REGION: &str = "us-east-1";

/// [`RoleAssumer`] over the STS SDK client
pub struct StsRoleAssumer {
    base: SdkConfig,
    client: Client,
}

impl StsRoleAssumer {
    pub fn new(base: &SdkConfig) -> Self {
        Self {
            base: base.clone(),
            client: Client::new(base),
        }
    }

    fn region(&self) -> String {
        self.base
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| DEFAULT_STS_REGION.to_string())
    }
}

fn auth_error<E, R>(err: &aws_smithy_runtime_api::client::result::SdkError<E, R>) -> AuthError
where
    E: std::error::Error + aws_smithy_types::error::metadata::ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    if is_network(err) {
        return AuthError::Transient(describe(err));
    }
    match error_code(err) {
        Some(code) => classify_sts_error(&code, &describe(err)),
        None => AuthError::Permanent(describe(err)),
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(&self, request: &LeaseRequest) -> Result<CredentialLease, AuthError> {
        let duration = i32::try_from(request.duration.as_secs())
            .map_err(|_| AuthError::Permanent("lease duration out of range".into()))?;

        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(duration)
            .send()
            .await
            .map_err(|e| auth_error(&e))?;

        let creds = output
            .credentials()
            .ok_or_else(|| AuthError::Permanent("AssumeRole returned no credentials".into()))?;

        let access_key_id: Option<&str> = creds.access_key_id().into();
        let secret_access_key: Option<&str> = creds.secret_access_key().into();
        let session_token: Option<&str> = creds.session_token().into();
        let expiration: Option<&aws_smithy_types::DateTime> = creds.expiration().into();

        let expires_at = expiration
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(i64::from(duration)));

        match (access_key_id, secret_access_key, session_token) {
            (Some(key), Some(secret), Some(token)) => Ok(CredentialLease {
                account_id: request.account_id.clone(),
                access_key_id: key.to_string(),
                secret_access_key: secret.to_string(),
                session_token: token.to_string(),
                expires_at,
            }),
            _ => Err(AuthError::Permanent("AssumeRole returned incomplete credentials".into())),
        }
    }

    async fn verify(&self, lease: &CredentialLease) -> Result<CallerIdentity, AuthError> {
        let config = session_config(&self.base, lease, &self.region());
        let output = Client::new(&config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| auth_error(&e))?;

        Ok(CallerIdentity {
            account: output.account().unwrap_or_default().to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
        })
    }
}

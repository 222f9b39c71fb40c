//! AWS Organizations backend

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_organizations::Client;

use super::{Account, AccountPage, AccountStatus, GroupRef, OrganizationsApi};
use crate::aws_support::describe;
use crate::error::DirectoryError;

/// [`OrganizationsApi`] over the Organizations SDK client
pub struct AwsOrganizations {
    client: Client,
}

impl AwsOrganizations {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

fn to_account(raw: &aws_sdk_organizations::types::Account) -> Account {
    Account {
        id: raw.id().unwrap_or_default().to_string(),
        name: raw.name().unwrap_or_default().to_string(),
        status: raw
            .status()
            .map(|s| AccountStatus::parse(s.as_str()))
            .unwrap_or(AccountStatus::Suspended),
        email: raw.email().unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl OrganizationsApi for AwsOrganizations {
    async fn list_roots(&self) -> Result<Vec<GroupRef>, DirectoryError> {
        let output = self
            .client
            .list_roots()
            .send()
            .await
            .map_err(|e| DirectoryError::Api(describe(&e)))?;

        Ok(output
            .roots()
            .iter()
            .map(|r| GroupRef::new(r.id().unwrap_or_default(), r.name().unwrap_or_default()))
            .collect())
    }

    async fn list_groups_for_parent(&self, parent_id: &str) -> Result<Vec<GroupRef>, DirectoryError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_organizational_units_for_parent()
                .parent_id(parent_id)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| DirectoryError::Api(describe(&e)))?;

            groups.extend(
                output
                    .organizational_units()
                    .iter()
                    .map(|ou| GroupRef::new(ou.id().unwrap_or_default(), ou.name().unwrap_or_default())),
            );

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(groups)
    }

    async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<Account>, DirectoryError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_accounts_for_parent()
                .parent_id(parent_id)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| DirectoryError::Api(describe(&e)))?;

            accounts.extend(output.accounts().iter().map(to_account));

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(accounts)
    }

    async fn list_accounts(&self, next_token: Option<String>) -> Result<AccountPage, DirectoryError> {
        let output = self
            .client
            .list_accounts()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| DirectoryError::Api(describe(&e)))?;

        Ok(AccountPage {
            accounts: output.accounts().iter().map(to_account).collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn management_account_id(&self) -> Result<String, DirectoryError> {
        let output = self
            .client
            .describe_organization()
            .send()
            .await
            .map_err(|e| DirectoryError::Api(describe(&e)))?;

        output
            .organization()
            .and_then(|org| org.master_account_id())
            .map(str::to_string)
            .ok_or_else(|| DirectoryError::Api("organization has no management account".to_string()))
    }
}

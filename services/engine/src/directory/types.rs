//! Organization Types
//!
//! Accounts and group nodes as returned by the organization directory.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a member account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    PendingClosure,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::PendingClosure => "PENDING_CLOSURE",
        }
    }

    /// Parse the API's status string; unknown values are treated as suspended
    pub fn parse(value: &str) -> Self {
        match value {
            "ACTIVE" => AccountStatus::Active,
            "PENDING_CLOSURE" => AccountStatus::PendingClosure,
            _ => AccountStatus::Suspended,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member account of the organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub status: AccountStatus,
    pub email: String,
}

impl Account {
    pub fn new(id: &str, name: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: AccountStatus::Active,
            email: email.to_string(),
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// A group (organizational unit or root) as listed under a parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
}

impl GroupRef {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// One page of the org-wide account listing
#[derive(Debug, Clone, Default)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    pub next_token: Option<String>,
}

/// A node of the organization hierarchy with everything beneath it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub id: String,
    pub name: String,
    pub children: Vec<GroupNode>,
    pub accounts: Vec<Account>,
}

impl GroupNode {
    pub fn new(group: &GroupRef) -> Self {
        Self {
            id: group.id.clone(),
            name: group.name.clone(),
            children: Vec::new(),
            accounts: Vec::new(),
        }
    }

    /// Number of accounts in this node and every descendant
    pub fn account_count(&self) -> usize {
        self.accounts.len()
            + self
                .children
                .iter()
                .map(GroupNode::account_count)
                .sum::<usize>()
    }

    /// Number of group nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(GroupNode::node_count).sum::<usize>()
    }
}

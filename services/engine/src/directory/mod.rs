//! Organization Directory
//!
//! Resolves the organization structure: find a group by name, enumerate the
//! accounts beneath a group or across the whole organization, and resolve the
//! management account. Every query is memoized through [`DirectoryCache`].
//!
//! ## Traversal
//!
//! Group lookups are a depth-first pre-order walk starting at the root(s).
//! Child order is whatever the backing API returns, so when several groups
//! share a name the one returned is not guaranteed to be stable across runs.
//!
//! A listing failure below the root skips that branch only; siblings are
//! still visited. A root that cannot be listed fails the lookup, and so does a
//! miss while branches were skipped. Neither outcome is memoized.

mod types;
#[cfg(feature = "aws")]
pub mod aws;

pub use types::*;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{Clock, TtlCache};
use crate::error::DirectoryError;

/// Backing API for organization structure queries
#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    /// Roots of the organization (normally exactly one)
    async fn list_roots(&self) -> Result<Vec<GroupRef>, DirectoryError>;

    /// Groups directly under a root or group
    async fn list_groups_for_parent(&self, parent_id: &str)
        -> Result<Vec<GroupRef>, DirectoryError>;

    /// Accounts directly attached to a root or group
    async fn list_accounts_for_parent(&self, parent_id: &str)
        -> Result<Vec<Account>, DirectoryError>;

    /// One page of the org-wide account listing
    async fn list_accounts(&self, next_token: Option<String>)
        -> Result<AccountPage, DirectoryError>;

    /// Id of the management (payer) account
    async fn management_account_id(&self) -> Result<String, DirectoryError>;
}

/// Process-wide memoization for directory queries
pub struct DirectoryCache {
    groups: TtlCache<String, Option<String>>,
    subtrees: TtlCache<String, BTreeSet<String>>,
    accounts: TtlCache<AccountStatus, Vec<Account>>,
    management: TtlCache<(), String>,
    hierarchy: TtlCache<(), GroupNode>,
}

impl DirectoryCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            groups: TtlCache::new(ttl, clock.clone()),
            subtrees: TtlCache::new(ttl, clock.clone()),
            accounts: TtlCache::new(ttl, clock.clone()),
            management: TtlCache::new(ttl, clock.clone()),
            hierarchy: TtlCache::new(ttl, clock),
        }
    }

    /// Drop every memoized result
    pub fn invalidate_all(&self) {
        self.groups.invalidate_all();
        self.subtrees.invalidate_all();
        self.accounts.invalidate_all();
        self.management.invalidate_all();
        self.hierarchy.invalidate_all();
    }
}

/// Organization directory service
pub struct OrganizationDirectory {
    api: Arc<dyn OrganizationsApi>,
    cache: Arc<DirectoryCache>,
}

impl OrganizationDirectory {
    pub fn new(api: Arc<dyn OrganizationsApi>, cache: Arc<DirectoryCache>) -> Self {
        Self { api, cache }
    }

    /// Forget everything memoized so the next query reads the API again
    pub fn refresh(&self) {
        self.cache.invalidate_all();
        debug!("Directory cache cleared");
    }

    /// Find the id of the first group named exactly `name`
    pub async fn find_group(&self, name: &str) -> Result<String, DirectoryError> {
        let found = self
            .cache
            .groups
            .get_or_try_init(name.to_string(), || self.search_group(name))
            .await?;

        found.ok_or_else(|| DirectoryError::GroupNotFound(name.to_string()))
    }

    async fn search_group(&self, name: &str) -> Result<Option<String>, DirectoryError> {
        let roots = self.api.list_roots().await?;
        if roots.is_empty() {
            return Err(DirectoryError::NoRoot);
        }

        let mut skipped = 0usize;
        for root in &roots {
            // Nothing was searched if a root cannot be listed
            let children = self.api.list_groups_for_parent(&root.id).await?;
            if let Some(group) = self.search_children(children, name, &mut skipped).await {
                info!(group = %name, group_id = %group.id, "Resolved group");
                return Ok(Some(group.id));
            }
        }

        if skipped > 0 {
            warn!(group = %name, skipped, "Group not found in the readable part of the organization");
            return Err(DirectoryError::SearchIncomplete {
                name: name.to_string(),
                skipped,
            });
        }

        debug!(group = %name, "No group with that name");
        Ok(None)
    }

    fn search_children<'a>(
        &'a self,
        children: Vec<GroupRef>,
        name: &'a str,
        skipped: &'a mut usize,
    ) -> BoxFuture<'a, Option<GroupRef>> {
        async move {
            for child in children {
                if child.name == name {
                    return Some(child);
                }
                match self.api.list_groups_for_parent(&child.id).await {
                    Ok(grandchildren) => {
                        if let Some(found) = self.search_children(grandchildren, name, &mut *skipped).await {
                            return Some(found);
                        }
                    }
                    Err(e) => {
                        warn!(parent_id = %child.id, error = %e, "Skipping branch during group search");
                        *skipped += 1;
                    }
                }
            }

            None
        }
        .boxed()
    }

    /// Ids of every account attached anywhere beneath `group_id`.
    ///
    /// Unreadable branches are skipped; the remaining ids are still returned
    /// but not memoized.
    pub async fn list_accounts_under(&self, group_id: &str) -> BTreeSet<String> {
        self.cache
            .subtrees
            .get_or_try_init(group_id.to_string(), || async {
                let mut ids = BTreeSet::new();
                let skipped = self.collect_subtree(group_id, &mut ids).await;
                if skipped == 0 {
                    Ok(ids)
                } else {
                    Err(ids)
                }
            })
            .await
            .unwrap_or_else(|partial| {
                warn!(group_id = %group_id, accounts = partial.len(), "Subtree listed partially");
                partial
            })
    }

    /// Adds every account beneath `parent_id` to `ids`; returns how many
    /// listings failed
    fn collect_subtree<'a>(
        &'a self,
        parent_id: &'a str,
        ids: &'a mut BTreeSet<String>,
    ) -> BoxFuture<'a, usize> {
        async move {
            let mut skipped = 0;

            match self.api.list_accounts_for_parent(parent_id).await {
                Ok(accounts) => ids.extend(accounts.into_iter().map(|a| a.id)),
                Err(e) => {
                    warn!(parent_id = %parent_id, error = %e, "Failed to list accounts for parent");
                    skipped += 1;
                }
            }

            match self.api.list_groups_for_parent(parent_id).await {
                Ok(children) => {
                    for child in children {
                        skipped += self.collect_subtree(&child.id, &mut *ids).await;
                    }
                }
                Err(e) => {
                    warn!(parent_id = %parent_id, error = %e, "Failed to list child groups");
                    skipped += 1;
                }
            }

            skipped
        }
        .boxed()
    }

    /// Every account in the organization with the given status
    pub async fn list_all_accounts(
        &self,
        status: AccountStatus,
    ) -> Result<Vec<Account>, DirectoryError> {
        self.cache
            .accounts
            .get_or_try_init(status, || async {
                let mut accounts = Vec::new();
                let mut next_token = None;
                let mut pages = 0usize;

                loop {
                    let page = self.api.list_accounts(next_token).await?;
                    pages += 1;
                    accounts.extend(page.accounts.into_iter().filter(|a| a.status == status));
                    match page.next_token {
                        Some(token) => next_token = Some(token),
                        None => break,
                    }
                }

                info!(count = accounts.len(), pages, status = %status, "Listed organization accounts");
                Ok(accounts)
            })
            .await
    }

    /// Id of the management (payer) account
    pub async fn management_account_id(&self) -> Result<String, DirectoryError> {
        self.cache
            .management
            .get_or_try_init((), || self.api.management_account_id())
            .await
    }

    /// Full hierarchy from the first root, active accounts only.
    ///
    /// Unreadable branches are left out of the tree; such a tree is still
    /// returned but not memoized.
    pub async fn hierarchy(&self) -> Result<GroupNode, DirectoryError> {
        let built: Result<GroupNode, PartialTree> = self
            .cache
            .hierarchy
            .get_or_try_init((), || async {
                let roots = self.api.list_roots().await?;
                let root = roots.first().ok_or(DirectoryError::NoRoot)?;
                let mut node = GroupNode::new(root);
                match self.build_node(&mut node).await {
                    0 => Ok(node),
                    _ => Err(PartialTree::Incomplete(node)),
                }
            })
            .await;

        match built {
            Ok(tree) => Ok(tree),
            Err(PartialTree::Incomplete(tree)) => {
                warn!(nodes = tree.node_count(), "Hierarchy listed partially");
                Ok(tree)
            }
            Err(PartialTree::Failed(e)) => Err(e),
        }
    }

    /// Fills `node` with its children and active accounts; returns how many
    /// listings failed
    fn build_node<'a>(&'a self, node: &'a mut GroupNode) -> BoxFuture<'a, usize> {
        async move {
            let mut skipped = 0;

            match self.api.list_groups_for_parent(&node.id).await {
                Ok(children) => {
                    for child in children {
                        let mut child_node = GroupNode::new(&child);
                        skipped += self.build_node(&mut child_node).await;
                        node.children.push(child_node);
                    }
                }
                Err(e) => {
                    warn!(parent_id = %node.id, error = %e, "Failed to list child groups");
                    skipped += 1;
                }
            }

            match self.api.list_accounts_for_parent(&node.id).await {
                Ok(accounts) => node
                    .accounts
                    .extend(accounts.into_iter().filter(Account::is_active)),
                Err(e) => {
                    warn!(parent_id = %node.id, error = %e, "Failed to list accounts for parent");
                    skipped += 1;
                }
            }

            skipped
        }
        .boxed()
    }
}

/// Hierarchy outcomes that must not be memoized
enum PartialTree {
    Incomplete(GroupNode),
    Failed(DirectoryError),
}

impl From<DirectoryError> for PartialTree {
    fn from(e: DirectoryError) -> Self {
        PartialTree::Failed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory organization tree
    #[derive(Default)]
    struct FakeOrg {
        groups: HashMap<String, Vec<GroupRef>>,
        accounts: HashMap<String, Vec<Account>>,
        all: Vec<Account>,
        page_size: usize,
        failing_parents: Mutex<HashSet<String>>,
        calls: AtomicUsize,
    }

    impl FakeOrg {
        fn group(mut self, parent: &str, id: &str, name: &str) -> Self {
            self.groups
                .entry(parent.to_string())
                .or_default()
                .push(GroupRef::new(id, name));
            self
        }

        fn account(mut self, parent: &str, id: &str) -> Self {
            let account = Account::new(id, &format!("acct-{id}"), &format!("{id}@example.com"));
            self.accounts
                .entry(parent.to_string())
                .or_default()
                .push(account.clone());
            self.all.push(account);
            self
        }

        fn failing(mut self, parent: &str) -> Self {
            self.failing_parents.get_mut().unwrap().insert(parent.to_string());
            self
        }

        fn is_failing(&self, parent_id: &str) -> bool {
            self.failing_parents.lock().unwrap().contains(parent_id)
        }

        fn recover(&self) {
            self.failing_parents.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl OrganizationsApi for FakeOrg {
        async fn list_roots(&self) -> Result<Vec<GroupRef>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![GroupRef::new("r-root", "Root")])
        }

        async fn list_groups_for_parent(&self, parent_id: &str) -> Result<Vec<GroupRef>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.is_failing(parent_id) {
                return Err(DirectoryError::Api(format!("denied on {parent_id}")));
            }
            Ok(self.groups.get(parent_id).cloned().unwrap_or_default())
        }

        async fn list_accounts_for_parent(&self, parent_id: &str) -> Result<Vec<Account>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.is_failing(parent_id) {
                return Err(DirectoryError::Api(format!("denied on {parent_id}")));
            }
            Ok(self.accounts.get(parent_id).cloned().unwrap_or_default())
        }

        async fn list_accounts(&self, next_token: Option<String>) -> Result<AccountPage, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let size = self.page_size.max(1);
            let end = (start + size).min(self.all.len());
            Ok(AccountPage {
                accounts: self.all[start..end].to_vec(),
                next_token: (end < self.all.len()).then(|| end.to_string()),
            })
        }

        async fn management_account_id(&self) -> Result<String, DirectoryError> {
            Ok("000000000000".to_string())
        }
    }

    fn directory(org: FakeOrg) -> (OrganizationDirectory, Arc<FakeOrg>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let api = Arc::new(org);
        let cache = Arc::new(DirectoryCache::new(Duration::from_secs(3600), clock.clone()));
        (OrganizationDirectory::new(api.clone(), cache), api, clock)
    }

    /// Root
    /// ├── Workloads (ou-w)
    /// │   ├── Prod (ou-p)   -> 111, 222
    /// │   └── Target (ou-t) -> 333
    /// └── Target (ou-t2)    -> 444
    fn nested_org() -> FakeOrg {
        FakeOrg::default()
            .group("r-root", "ou-w", "Workloads")
            .group("r-root", "ou-t2", "Target")
            .group("ou-w", "ou-p", "Prod")
            .group("ou-w", "ou-t", "Target")
            .account("ou-p", "111111111111")
            .account("ou-p", "222222222222")
            .account("ou-t", "333333333333")
            .account("ou-t2", "444444444444")
    }

    #[tokio::test]
    async fn test_find_group_returns_first_depth_first_match() {
        let (dir, _, _) = directory(nested_org());
        // Pre-order walk reaches Workloads/Target before the root-level Target
        assert_eq!(dir.find_group("Target").await.unwrap(), "ou-t");
        assert_eq!(dir.find_group("Prod").await.unwrap(), "ou-p");
    }

    #[tokio::test]
    async fn test_find_group_not_found() {
        let (dir, _, _) = directory(nested_org());
        let err = dir.find_group("Sandbox").await.unwrap_err();
        assert!(matches!(err, DirectoryError::GroupNotFound(name) if name == "Sandbox"));
    }

    #[tokio::test]
    async fn test_find_group_is_case_sensitive() {
        let (dir, _, _) = directory(nested_org());
        assert!(dir.find_group("prod").await.is_err());
    }

    #[tokio::test]
    async fn test_find_group_skips_failing_branch() {
        let (dir, _, _) = directory(nested_org().failing("ou-w"));
        // Workloads cannot be listed, so the root-level Target is the first match
        assert_eq!(dir.find_group("Target").await.unwrap(), "ou-t2");
    }

    #[tokio::test]
    async fn test_unreadable_root_is_an_error_and_not_memoized() {
        let (dir, api, _) = directory(nested_org().failing("r-root"));

        let err = dir.find_group("Target").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Api(_)));

        api.recover();
        assert_eq!(dir.find_group("Target").await.unwrap(), "ou-t");
    }

    #[tokio::test]
    async fn test_miss_with_skipped_branches_is_not_memoized() {
        let (dir, api, _) = directory(nested_org().failing("ou-w"));

        let err = dir.find_group("Prod").await.unwrap_err();
        assert!(matches!(err, DirectoryError::SearchIncomplete { skipped: 1, .. }));

        api.recover();
        assert_eq!(dir.find_group("Prod").await.unwrap(), "ou-p");
    }

    #[tokio::test]
    async fn test_list_accounts_under_collects_whole_subtree() {
        let (dir, _, _) = directory(nested_org());
        let ids = dir.list_accounts_under("ou-w").await;
        let expected: BTreeSet<String> = ["111111111111", "222222222222", "333333333333"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_list_accounts_under_deduplicates() {
        let org = nested_org().account("ou-w", "111111111111");
        let (dir, _, _) = directory(org);
        assert_eq!(dir.list_accounts_under("ou-w").await.len(), 3);
    }

    #[tokio::test]
    async fn test_list_accounts_under_keeps_siblings_when_branch_fails() {
        let (dir, _, _) = directory(nested_org().failing("ou-p"));
        let ids = dir.list_accounts_under("r-root").await;
        assert!(ids.contains("333333333333"));
        assert!(ids.contains("444444444444"));
        assert!(!ids.contains("111111111111"));
    }

    #[tokio::test]
    async fn test_list_all_accounts_paginates_and_filters_status() {
        let mut org = nested_org();
        org.page_size = 2;
        org.all.push(
            Account::new("555555555555", "closed", "c@example.com")
                .with_status(AccountStatus::Suspended),
        );
        let (dir, _, _) = directory(org);

        let active = dir.list_all_accounts(AccountStatus::Active).await.unwrap();
        assert_eq!(active.len(), 4);
        assert!(active.iter().all(Account::is_active));

        let suspended = dir.list_all_accounts(AccountStatus::Suspended).await.unwrap();
        assert_eq!(suspended.len(), 1);
    }

    #[tokio::test]
    async fn test_queries_are_memoized_until_ttl() {
        let (dir, api, clock) = directory(nested_org());

        dir.list_accounts_under("ou-w").await;
        let after_first = api.calls.load(Ordering::SeqCst);
        dir.list_accounts_under("ou-w").await;
        assert_eq!(api.calls.load(Ordering::SeqCst), after_first);

        clock.advance(Duration::from_secs(3601));
        dir.list_accounts_under("ou-w").await;
        assert!(api.calls.load(Ordering::SeqCst) > after_first);
    }

    #[tokio::test]
    async fn test_not_found_is_memoized() {
        let (dir, api, _) = directory(nested_org());
        assert!(dir.find_group("Sandbox").await.is_err());
        let calls = api.calls.load(Ordering::SeqCst);
        assert!(dir.find_group("Sandbox").await.is_err());
        assert_eq!(api.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_partial_subtree_is_not_memoized() {
        let (dir, api, _) = directory(nested_org().failing("ou-p"));
        assert_eq!(dir.list_accounts_under("ou-w").await.len(), 1);

        api.recover();
        assert_eq!(dir.list_accounts_under("ou-w").await.len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_drops_memoized_results() {
        let (dir, api, _) = directory(nested_org());
        dir.list_accounts_under("ou-w").await;
        let calls = api.calls.load(Ordering::SeqCst);

        dir.refresh();
        dir.list_accounts_under("ou-w").await;
        assert!(api.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test]
    async fn test_hierarchy_snapshot() {
        let (dir, _, _) = directory(nested_org());
        let tree = dir.hierarchy().await.unwrap();
        assert_eq!(tree.id, "r-root");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.account_count(), 4);
        assert_eq!(tree.node_count(), 5);
    }

    #[tokio::test]
    async fn test_partial_hierarchy_is_not_memoized() {
        let (dir, api, _) = directory(nested_org().failing("ou-w"));
        let partial = dir.hierarchy().await.unwrap();
        assert_eq!(partial.account_count(), 1);
        assert_eq!(partial.node_count(), 3);

        api.recover();
        let full = dir.hierarchy().await.unwrap();
        assert_eq!(full.account_count(), 4);
        assert_eq!(full.node_count(), 5);
    }

    #[tokio::test]
    async fn test_management_account_id() {
        let (dir, _, _) = directory(nested_org());
        assert_eq!(dir.management_account_id().await.unwrap(), "000000000000");
    }
}

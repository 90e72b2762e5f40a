//! Repository collector.
//!
//! Enumerates every repository of the selected organizations (or an explicit
//! `owner/name` list) and enriches each with webhooks, collaborators,
//! vulnerability alert status, Actions token permissions, default branch
//! protection and, optionally, a Scorecard result.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::scorecard::{ScorecardResult, ScorecardRunner};
use super::{
    Collector, CollectorHandle, CollectorStreams, Metadata, MissingPermission,
    PendingRepositoryContext, TaskGroup, fetch_all, selected_organizations, spawn_collection,
};
use crate::github::{
    BranchProtection, ExtendedOrg, GitHubApi, Hook, Repository, TokenPermissions, User,
    full_repo_name,
};
use crate::namespace::Namespace;
use crate::pagination::{ListOptions, NextPageStrategy, Paginator};
use crate::permissions::scope;
use crate::platform::{self, PlatformError, short_error_message};
use crate::retry::{RetryConfig, with_retry};

pub const REPO_HOOKS_EFFECT: &str = "Cannot read repository webhooks";
pub const ACTIONS_SETTINGS_EFFECT: &str = "Cannot read repository actions settings";
pub const BRANCH_PROTECTION_EFFECT: &str = "Cannot read repository branch protection information";
pub const FREE_PLAN_BRANCH_PROTECTION_EFFECT: &str =
    "Branch protection cannot be collected because the organization is in free plan";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid repository {0:?}, expected owner/name")]
pub struct InvalidRepository(String);

/// An explicitly requested `owner/name` repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepositoryRef {
    type Err = InvalidRepository;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(InvalidRepository(s.to_string())),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A repository with everything fetched about it.
///
/// `None` fields couldn't be read with the working token.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryEntity {
    #[serde(flatten)]
    pub repository: Repository,
    pub vulnerability_alerts_enabled: Option<bool>,
    pub hooks: Option<Vec<Hook>>,
    pub collaborators: Option<Vec<User>>,
    pub actions_token_permissions: Option<TokenPermissions>,
    pub branch_protection: Option<Value>,
    pub scorecard: Option<ScorecardResult>,
}

type SeenRepositories = Arc<Mutex<HashSet<i64>>>;

#[derive(Clone)]
pub struct RepositoryCollector {
    client: Arc<dyn GitHubApi>,
    repositories: Arc<[RepositoryRef]>,
    scorecard: Option<Arc<ScorecardRunner>>,
    retry: RetryConfig,
}

impl RepositoryCollector {
    pub fn new(
        client: Arc<dyn GitHubApi>,
        repositories: Vec<RepositoryRef>,
        scorecard: Option<ScorecardRunner>,
    ) -> Self {
        Self {
            client,
            repositories: repositories.into(),
            scorecard: scorecard.map(Arc::new),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn run(self, handle: CollectorHandle) {
        if self.repositories.is_empty() {
            self.collect_all(handle).await;
        } else {
            self.collect_specific(handle).await;
        }
    }

    async fn collect_specific(&self, handle: CollectorHandle) {
        let mut group = TaskGroup::new();
        for repo_ref in self.repositories.iter().cloned() {
            let this = self.clone();
            let handle = handle.clone();
            group.spawn(async move {
                let repo = match this.client.repository(&repo_ref.owner, &repo_ref.name).await {
                    Ok(repo) => repo,
                    Err(e) => {
                        tracing::error!(repo = %repo_ref, error = %e, "Failed to collect repository");
                        return;
                    }
                };
                let org = this.owning_org(&repo).await;
                this.collect_repository(repo, org.as_ref(), &handle).await;
            });
        }
        group.wait().await;
    }

    /// The owning organization, or `None` for user-owned repositories.
    async fn owning_org(&self, repo: &Repository) -> Option<ExtendedOrg> {
        let is_org = repo
            .owner
            .as_ref()
            .and_then(|o| o.kind.as_deref())
            .is_some_and(|kind| kind == "Organization");
        if !is_org {
            return None;
        }
        match self.client.organization(repo.owner_login()).await {
            Ok(org) => Some(org),
            Err(e) => {
                tracing::debug!(org = %repo.owner_login(), error = %e, "Owning organization unavailable");
                None
            }
        }
    }

    async fn collect_all(&self, handle: CollectorHandle) {
        let Some(orgs) = selected_organizations(self.client.as_ref(), Namespace::Repository).await
        else {
            return;
        };

        let seen: SeenRepositories = Arc::default();
        let mut group = TaskGroup::new();
        for org in orgs {
            let this = self.clone();
            let handle = handle.clone();
            let seen = Arc::clone(&seen);
            group.spawn(async move {
                let result = with_retry(
                    || this.collect_org(&org, &handle, &seen),
                    this.retry.clone(),
                    is_retryable,
                    |e: &PlatformError| short_error_message(e),
                    org.name(),
                )
                .await;
                if let Err(e) = result {
                    tracing::error!(org = %org.name(), error = %e, "Giving up on organization repositories");
                }
            });
        }
        group.wait().await;
    }

    /// One attempt at an organization's repositories.
    ///
    /// Repositories already handed to an enrichment task are skipped, so a
    /// retry after a mid-pagination failure only picks up the rest.
    async fn collect_org(
        &self,
        org: &ExtendedOrg,
        handle: &CollectorHandle,
        seen: &SeenRepositories,
    ) -> platform::Result<()> {
        let client = Arc::clone(&self.client);
        let login = org.name().to_string();
        let mut pages = Paginator::new(
            move |opts: ListOptions| {
                let client = Arc::clone(&client);
                let login = login.clone();
                async move { client.list_org_repos(&login, opts).await }
            },
            NextPageStrategy,
            None,
        )
        .map_err(|e| PlatformError::internal(e.to_string()))?
        .stream();

        let mut group = TaskGroup::new();
        let mut outcome = Ok(());
        while let Some(page) = pages.recv().await {
            let repos = match page {
                Ok(repos) => repos,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            for repo in repos {
                if !seen.lock().await.insert(repo.id) {
                    continue;
                }
                let this = self.clone();
                let org = org.clone();
                let handle = handle.clone();
                group.spawn(async move { this.collect_repository(repo, Some(&org), &handle).await });
            }
        }

        group.wait().await;
        outcome
    }

    async fn collect_repository(
        &self,
        repo: Repository,
        org: Option<&ExtendedOrg>,
        handle: &CollectorHandle,
    ) {
        let owner = repo.owner_login().to_string();
        let name = repo.name.clone();
        let full_name = full_repo_name(&owner, &name);

        let mut roles = Vec::new();
        if let Some(org) = org {
            roles.push(org.role);
        }
        roles.extend(repo.viewer_role());
        let premium = org.is_some_and(ExtendedOrg::is_enterprise);
        let pending = PendingRepositoryContext {
            roles,
            premium,
            is_branch_protection_supported: premium || !repo.private,
            scorecard_enabled: self.scorecard.is_some(),
        };

        let (vulnerability_alerts, hooks, collaborators, actions) = tokio::join!(
            self.client.vulnerability_alerts_enabled(&owner, &name),
            fetch_all(ListOptions::default(), |opts| {
                self.client.list_repo_hooks(&owner, &name, opts)
            }),
            fetch_all(ListOptions::default(), |opts| {
                self.client.list_collaborators(&owner, &name, opts)
            }),
            self.client.repo_actions_token_permissions(&owner, &name),
        );

        let mut missing = Vec::new();
        let vulnerability_alerts_enabled = ok_or_log(vulnerability_alerts, &full_name, "vulnerability alerts");
        let hooks = match hooks {
            Ok(hooks) => Some(hooks),
            Err(e) => {
                if e.is_permission_denied() {
                    missing.push(MissingPermission::new(
                        scope::READ_REPO_HOOK,
                        &full_name,
                        REPO_HOOKS_EFFECT,
                        Namespace::Repository,
                    ));
                }
                tracing::debug!(repo = %full_name, error = %e, "Repository webhooks unavailable");
                None
            }
        };
        let collaborators = ok_or_log(collaborators, &full_name, "collaborators");
        let actions_token_permissions = match actions {
            Ok(permissions) => Some(permissions),
            Err(e) => {
                missing.push(MissingPermission::new(
                    scope::REPO,
                    &full_name,
                    ACTIONS_SETTINGS_EFFECT,
                    Namespace::Repository,
                ));
                tracing::debug!(repo = %full_name, error = %e, "Repository actions settings unavailable");
                None
            }
        };

        let (branch_protection, has_branch_protection_permission) = self
            .branch_protection(&repo, &pending, &full_name, &mut missing)
            .await;

        let scorecard = match &self.scorecard {
            Some(runner) => match runner.run(&repo.html_url, repo.private).await {
                Ok(result) => Some(result),
                Err(e) => {
                    tracing::warn!(repo = %full_name, error = %e, "Failed to get scorecard result");
                    None
                }
            },
            None => None,
        };

        handle.issue_missing_permissions(missing).await;

        let context = pending.resolve(has_branch_protection_permission);
        let link = repo.html_url.clone();
        let entity = RepositoryEntity {
            repository: repo,
            vulnerability_alerts_enabled,
            hooks,
            collaborators,
            actions_token_permissions,
            branch_protection,
            scorecard,
        };
        handle.collect_data(&entity, full_name, link, context).await;
        handle.collection_change_by_one().await;
    }

    /// Default branch protection and whether the viewer could read it.
    async fn branch_protection(
        &self,
        repo: &Repository,
        pending: &PendingRepositoryContext,
        full_name: &str,
        missing: &mut Vec<MissingPermission>,
    ) -> (Option<Value>, bool) {
        if !pending.is_branch_protection_supported {
            missing.push(MissingPermission::new(
                scope::REPO,
                full_name,
                FREE_PLAN_BRANCH_PROTECTION_EFFECT,
                Namespace::Repository,
            ));
            return (None, false);
        }
        let Some(branch) = repo.default_branch.as_deref() else {
            return (None, false);
        };

        match self
            .client
            .branch_protection(repo.owner_login(), &repo.name, branch)
            .await
        {
            Ok(BranchProtection::Protected(protection)) => (Some(protection), true),
            Ok(BranchProtection::NotProtected) => (None, true),
            Ok(BranchProtection::NoPermission) => {
                missing.push(MissingPermission::new(
                    scope::REPO,
                    full_name,
                    BRANCH_PROTECTION_EFFECT,
                    Namespace::Repository,
                ));
                (None, false)
            }
            Err(e) => {
                tracing::warn!(repo = %full_name, error = %e, "Failed to collect branch protection");
                (None, false)
            }
        }
    }
}

/// Quota exhaustion outlasts the retry budget, so it isn't retried either.
fn is_retryable(e: &PlatformError) -> bool {
    !(e.is_permission_denied()
        || e.is_rate_limited()
        || matches!(e, PlatformError::InvalidToken { .. }))
}

fn ok_or_log<T>(result: platform::Result<T>, repo: &str, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(repo = %repo, error = %e, "Repository {what} unavailable");
            None
        }
    }
}

#[async_trait]
impl Collector for RepositoryCollector {
    fn namespace(&self) -> Namespace {
        Namespace::Repository
    }

    async fn collect_metadata(&self) -> Metadata {
        if !self.repositories.is_empty() {
            return Metadata {
                total_entities: self.repositories.len(),
            };
        }

        let Some(orgs) = selected_organizations(self.client.as_ref(), self.namespace()).await
        else {
            return Metadata::default();
        };

        let mut counts = JoinSet::new();
        for org in orgs {
            let client = Arc::clone(&self.client);
            counts.spawn(async move {
                match client.org_repo_count(org.name()).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(org = %org.name(), error = %e, "Failed to count repositories");
                        0
                    }
                }
            });
        }

        let mut total_entities = 0;
        while let Some(count) = counts.join_next().await {
            total_entities += count.unwrap_or(0);
        }
        Metadata { total_entities }
    }

    fn collect(&self) -> CollectorStreams {
        let this = self.clone();
        spawn_collection(self.namespace(), move |handle| this.run(handle))
    }
}

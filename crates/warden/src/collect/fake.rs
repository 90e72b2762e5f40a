//! In-memory [`GitHubApi`] for collector tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::collect::{CollectedData, CollectorEvent, CollectorStreams, MissingPermission, Multiplexer};
use crate::github::types::{BranchProtection, OrgSecret};
use crate::github::{
    ActionsPermissions, Enterprise, ExtendedOrg, GitHubApi, Hook, MemberListOptions,
    OrgSecretList, Organization, Repository, RunnerGroup, RunnerGroups, TokenPermissions, User,
};
use crate::pagination::{ListOptions, PageMeta};
use crate::permissions::{Role, TokenScopes};
use crate::platform::{PlatformError, Result};

/// Every call is keyed `"<call>:<target>"`, e.g. `"repo_hooks:acme/api"`.
///
/// Keys in `denied` answer 404; keys in `flaky` fail with a network error
/// that many times before succeeding.
#[derive(Default)]
pub struct FakeGitHub {
    pub scopes: TokenScopes,
    pub orgs: Vec<ExtendedOrg>,
    pub repos: HashMap<String, Vec<Repository>>,
    pub members: HashMap<String, Vec<User>>,
    pub admins: HashMap<String, Vec<User>>,
    pub runner_groups: HashMap<String, Vec<RunnerGroup>>,
    pub enterprises: HashMap<String, Enterprise>,
    pub protected_branches: HashSet<String>,
    pub saml_orgs: HashSet<String>,
    pub denied: HashSet<String>,
    pub flaky: Mutex<HashMap<String, usize>>,
    pub page_size: Option<usize>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, key: &str) -> Self {
        self.denied.insert(key.to_string());
        self
    }

    pub fn flaky(self, key: &str, failures: usize) -> Self {
        self.flaky
            .lock()
            .expect("flaky lock")
            .insert(key.to_string(), failures);
        self
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn check(&self, key: String) -> Result<()> {
        *self.calls.lock().expect("calls lock").entry(key.clone()).or_default() += 1;
        if self.denied.contains(&key) {
            return Err(PlatformError::not_found(key));
        }
        let mut flaky = self.flaky.lock().expect("flaky lock");
        if let Some(remaining) = flaky.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(PlatformError::network(format!("connection reset: {key}")));
        }
        Ok(())
    }

    fn page<T: Clone>(&self, items: &[T], opts: ListOptions) -> (Vec<T>, PageMeta) {
        let size = self.page_size.unwrap_or(opts.per_page as usize).max(1);
        let page = opts.page.max(1) as usize;
        let total = items.len().div_ceil(size).max(1);
        let start = (page - 1) * size;
        let slice = items.iter().skip(start).take(size).cloned().collect();
        let meta = PageMeta {
            status: 200,
            next_page: if page < total { page as u32 + 1 } else { 0 },
            current_page: page as u32,
            total_pages: total as u32,
        };
        (slice, meta)
    }
}

/// Everything one collector run produced.
pub struct Drained {
    pub collected: Vec<CollectedData>,
    /// Sum of progress deltas.
    pub progress: usize,
    pub total_change: usize,
    pub missing: Vec<MissingPermission>,
}

pub async fn drain(streams: CollectorStreams) -> Drained {
    let mut out = Drained {
        collected: Vec::new(),
        progress: 0,
        total_change: 0,
        missing: Vec::new(),
    };
    let mut mux = Multiplexer::new(streams);
    while let Some(event) = mux.next().await {
        match event {
            CollectorEvent::Collected(data) => out.collected.push(data),
            CollectorEvent::Progress(metric) => {
                out.progress += metric.change;
                out.total_change += metric.total_change;
            }
            CollectorEvent::MissingPermission(perm) => out.missing.push(perm),
        }
    }
    out
}

pub fn org(login: &str, plan: Option<&str>, role: Role) -> ExtendedOrg {
    let mut value = json!({
        "login": login,
        "id": login.len() as i64,
        "html_url": format!("https://github.com/{login}"),
    });
    if let Some(plan) = plan {
        value["plan"] = json!({ "name": plan });
    }
    let organization: Organization = serde_json::from_value(value).expect("organization");
    ExtendedOrg::new(organization, role)
}

pub fn repo(id: i64, owner: &str, name: &str, private: bool) -> Repository {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "html_url": format!("https://github.com/{owner}/{name}"),
        "private": private,
        "default_branch": "main",
        "owner": { "login": owner, "type": "Organization" },
        "permissions": { "admin": true, "maintain": true, "push": true, "triage": true, "pull": true }
    }))
    .expect("repository")
}

pub fn user(id: i64, login: &str) -> User {
    serde_json::from_value(json!({ "login": login, "id": id })).expect("user")
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    fn scopes(&self) -> &TokenScopes {
        &self.scopes
    }

    fn is_cloud(&self) -> bool {
        true
    }

    async fn organizations(&self) -> Result<Vec<ExtendedOrg>> {
        self.check("organizations:".to_string())?;
        Ok(self.orgs.clone())
    }

    async fn organization(&self, login: &str) -> Result<ExtendedOrg> {
        self.check(format!("organization:{login}"))?;
        self.orgs
            .iter()
            .find(|o| o.name() == login)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(login))
    }

    async fn list_org_hooks(&self, org: &str, opts: ListOptions) -> Result<(Vec<Hook>, PageMeta)> {
        self.check(format!("org_hooks:{org}"))?;
        Ok(self.page::<Hook>(&[], opts))
    }

    async fn list_org_secrets(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(OrgSecretList, PageMeta)> {
        self.check(format!("org_secrets:{org}"))?;
        let secrets = vec![OrgSecret {
            name: "DEPLOY_KEY".to_string(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }];
        let (secrets, meta) = self.page(&secrets, opts);
        Ok((OrgSecretList { secrets }, meta))
    }

    async fn list_org_repos(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(Vec<Repository>, PageMeta)> {
        self.check(format!("org_repos:{org}:{}", opts.page))?;
        let repos = self.repos.get(org).cloned().unwrap_or_default();
        Ok(self.page(&repos, opts))
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<Repository> {
        self.check(format!("repository:{owner}/{name}"))?;
        self.repos
            .get(owner)
            .and_then(|repos| repos.iter().find(|r| r.name == name))
            .cloned()
            .ok_or_else(|| PlatformError::not_found(format!("{owner}/{name}")))
    }

    async fn list_repo_hooks(
        &self,
        owner: &str,
        repo: &str,
        opts: ListOptions,
    ) -> Result<(Vec<Hook>, PageMeta)> {
        self.check(format!("repo_hooks:{owner}/{repo}"))?;
        Ok(self.page::<Hook>(&[], opts))
    }

    async fn list_collaborators(
        &self,
        owner: &str,
        repo: &str,
        opts: ListOptions,
    ) -> Result<(Vec<User>, PageMeta)> {
        self.check(format!("collaborators:{owner}/{repo}"))?;
        Ok(self.page(&[user(1, "octocat")], opts))
    }

    async fn vulnerability_alerts_enabled(&self, owner: &str, repo: &str) -> Result<bool> {
        self.check(format!("vulnerability_alerts:{owner}/{repo}"))?;
        Ok(true)
    }

    async fn repo_actions_token_permissions(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<TokenPermissions> {
        self.check(format!("repo_actions:{owner}/{repo}"))?;
        Ok(TokenPermissions {
            default_workflow_permissions: Some("read".to_string()),
            can_approve_pull_request_reviews: Some(false),
        })
    }

    async fn org_actions_token_permissions(&self, org: &str) -> Result<TokenPermissions> {
        self.check(format!("org_actions_token:{org}"))?;
        Ok(TokenPermissions {
            default_workflow_permissions: Some("write".to_string()),
            can_approve_pull_request_reviews: Some(true),
        })
    }

    async fn org_actions_permissions(&self, org: &str) -> Result<ActionsPermissions> {
        self.check(format!("org_actions:{org}"))?;
        Ok(serde_json::from_value(json!({ "enabled_repositories": "all", "allowed_actions": "all" }))
            .expect("actions permissions"))
    }

    async fn branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchProtection> {
        let key = format!("branch_protection:{owner}/{repo}");
        if self.denied.contains(&key) {
            self.check(format!("{key}:hidden"))?;
            return Ok(BranchProtection::NoPermission);
        }
        self.check(key.clone())?;
        if self.protected_branches.contains(&format!("{owner}/{repo}")) {
            return Ok(BranchProtection::Protected(json!({ "branch": branch })));
        }
        Ok(BranchProtection::NotProtected)
    }

    async fn list_org_members(
        &self,
        org: &str,
        opts: MemberListOptions,
    ) -> Result<(Vec<User>, PageMeta)> {
        self.check(format!("members:{org}:{}", opts.role))?;
        let source = if opts.role == "admin" {
            &self.admins
        } else {
            &self.members
        };
        let users = source.get(org).cloned().unwrap_or_default();
        Ok(self.page(&users, opts.list))
    }

    async fn member_last_active(&self, org: &str, login: &str) -> Result<Option<DateTime<Utc>>> {
        self.check(format!("last_active:{org}/{login}"))?;
        Ok(DateTime::from_timestamp(1_700_000_000, 0))
    }

    async fn list_runner_groups(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(RunnerGroups, PageMeta)> {
        self.check(format!("runner_groups:{org}"))?;
        let groups = self.runner_groups.get(org).cloned().unwrap_or_default();
        let (runner_groups, meta) = self.page(&groups, opts);
        Ok((
            RunnerGroups {
                total_count: groups.len(),
                runner_groups,
            },
            meta,
        ))
    }

    async fn enterprise(&self, slug: &str) -> Result<Enterprise> {
        self.check(format!("enterprise:{slug}"))?;
        self.enterprises
            .get(slug)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(slug))
    }

    async fn org_saml_enabled(&self, org: &str) -> Result<bool> {
        self.check(format!("saml:{org}"))?;
        Ok(self.saml_orgs.contains(org))
    }

    async fn org_repo_count(&self, org: &str) -> Result<usize> {
        self.check(format!("repo_count:{org}"))?;
        Ok(self.repos.get(org).map_or(0, Vec::len))
    }
}

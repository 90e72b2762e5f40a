//! Transport-backed GitHub client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use url::form_urlencoded;

use super::types::{
    ActionsPermissions, AuditLogEvent, BranchProtection, Enterprise, ExtendedOrg, Hook,
    OrgMembership, OrgSecretList, OrgSummary, Organization, Repository, RunnerGroups,
    TokenPermissions, User, ViewerRepository,
};
use super::{GITHUB_API_URL, GitHubApi, MemberListOptions, validate_token};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::pagination::{ListOptions, NextPageStrategy, PageMeta, Paginator};
use crate::permissions::{Role, TokenScopes};
use crate::platform::{ApiRateLimiter, PlatformError, Result, SecondaryRateLimitTransport};

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const SCOPES_HEADER: &str = "x-oauth-scopes";

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone, Default)]
pub struct GitHubConfig {
    pub token: String,
    /// GitHub Enterprise Server root (`https://github.example.com`); `None` for github.com.
    pub endpoint: Option<String>,
    /// Organizations to audit; empty means every organization the token can see.
    pub orgs: Vec<String>,
    /// Proactive pacing; `None` disables it.
    pub requests_per_second: Option<u32>,
}

/// GitHub API client.
///
/// Every request goes through a [`SecondaryRateLimitTransport`], so a
/// `Retry-After` on one request pauses all of them.
pub struct GitHubClient {
    transport: SecondaryRateLimitTransport<Arc<dyn HttpTransport>>,
    api_base: String,
    graphql_url: String,
    endpoint: Option<String>,
    token: String,
    requested_orgs: Vec<String>,
    scopes: TokenScopes,
    rate_limiter: Option<ApiRateLimiter>,
    orgs_cache: RwLock<Option<Vec<ExtendedOrg>>>,
}

impl GitHubClient {
    /// Connect over HTTPS with a 30 second request timeout.
    #[cfg(feature = "github")]
    pub async fn connect(config: GitHubConfig) -> Result<Self> {
        use crate::http::reqwest_transport::ReqwestTransport;

        let transport = ReqwestTransport::with_timeout(std::time::Duration::from_secs(30))
            .map_err(|e| PlatformError::internal(e.to_string()))?;
        Self::connect_with_transport(config, Arc::new(transport)).await
    }

    /// Validate the token, then read its scopes from `GET /user`.
    pub async fn connect_with_transport(
        config: GitHubConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        validate_token(&config.token)?;

        let endpoint = config
            .endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty());
        let (api_base, graphql_url) = match &endpoint {
            None => (GITHUB_API_URL.to_string(), format!("{GITHUB_API_URL}/graphql")),
            Some(root) => (format!("{root}/api/v3"), format!("{root}/api/graphql")),
        };

        let mut client = Self {
            transport: SecondaryRateLimitTransport::new(transport),
            api_base,
            graphql_url,
            endpoint,
            token: config.token,
            requested_orgs: config.orgs,
            scopes: TokenScopes::default(),
            rate_limiter: config.requests_per_second.map(ApiRateLimiter::new),
            orgs_cache: RwLock::new(None),
        };
        client.scopes = client.fetch_token_scopes().await?;

        match &client.endpoint {
            None => tracing::info!("Using GitHub Cloud"),
            Some(endpoint) => tracing::info!(endpoint = %endpoint, "Using GitHub Enterprise endpoint"),
        }

        Ok(client)
    }

    /// The GitHub Enterprise Server root, if one is configured.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn fetch_token_scopes(&self) -> Result<TokenScopes> {
        let response = self.get("/user").await.map_err(|e| match e {
            PlatformError::AuthRequired { .. } => PlatformError::invalid_token(
                "token was rejected (make sure it's not expired or revoked)",
            ),
            other => other,
        })?;
        let scopes = response
            .header(SCOPES_HEADER)
            .map(TokenScopes::from_header)
            .unwrap_or_default();
        tracing::debug!(scopes = scopes.len(), "Read token scopes");
        Ok(scopes)
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
        .with_header("Accept", ACCEPT)
        .with_header("X-GitHub-Api-Version", API_VERSION)
        .with_header("Authorization", format!("Bearer {}", self.token))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }
        self.transport
            .send(request)
            .await
            .map_err(|e| PlatformError::network(e.to_string()))
    }

    /// GET `path` (relative to the API root); non-2xx becomes an error.
    async fn get(&self, path: &str) -> Result<HttpResponse> {
        let url = format!("{}{}", self.api_base, path);
        let response = self.send(self.request(HttpMethod::Get, url)).await?;
        if !response.is_success() {
            return Err(error_from_response(path, &response));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        decode(path, &response.body)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        opts: &ListOptions,
    ) -> Result<(T, PageMeta)> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let path = format!("{path}{sep}{}", opts.query());
        let response = self.get(&path).await?;
        let meta = PageMeta::from_response(&response);
        Ok((decode(&path, &response.body)?, meta))
    }

    /// Count a listing by asking for one item per page and reading the last page number.
    async fn count_items(&self, path: &str) -> Result<usize> {
        let opts = ListOptions {
            page: 1,
            per_page: 1,
        };
        let (items, meta): (Vec<Value>, _) = self.get_page(path, &opts).await?;
        if meta.next_page == 0 {
            return Ok(items.len());
        }
        Ok(meta.total_pages as usize)
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let body = serde_json::to_vec(&json!({ "query": query, "variables": variables }))
            .map_err(|e| PlatformError::internal(e.to_string()))?;
        let mut request = self.request(HttpMethod::Post, self.graphql_url.clone());
        request.body = body;

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(error_from_response("/graphql", &response));
        }
        let mut value: Value = decode("/graphql", &response.body)?;
        if let Some(message) = value
            .pointer("/errors/0/message")
            .and_then(Value::as_str)
        {
            return Err(PlatformError::api(response.status, message));
        }
        Ok(value.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    async fn list_org_logins(&self) -> Result<Vec<String>> {
        let paginator = Paginator::with_mapper(
            |opts: ListOptions| async move {
                self.get_page::<Vec<OrgSummary>>("/user/orgs", &opts).await
            },
            NextPageStrategy,
            None,
            |page: Vec<OrgSummary>| page.into_iter().map(|o| o.login).collect::<Vec<_>>(),
        )
        .map_err(|e| PlatformError::internal(e.to_string()))?;
        paginator.sync().await.into_result()
    }

    /// The viewer's role in `org`.
    ///
    /// Reading memberships needs `read:org`; without it the viewer is treated
    /// as a plain member, since only organizations they belong to are listed.
    async fn viewer_org_role(&self, org: &str) -> Result<Role> {
        let path = format!("/user/memberships/orgs/{org}");
        match self.get_json::<OrgMembership>(&path).await {
            Ok(membership) => Ok(membership.viewer_role()),
            Err(e) if e.is_permission_denied() => Ok(Role::ORG_MEMBER),
            Err(e) => Err(e),
        }
    }

    async fn load_organizations(&self) -> Result<Vec<ExtendedOrg>> {
        let visible = self.list_org_logins().await?;

        let selected: Vec<String> = if self.requested_orgs.is_empty() {
            visible
        } else {
            for requested in &self.requested_orgs {
                if !visible.iter().any(|v| v.eq_ignore_ascii_case(requested)) {
                    return Err(PlatformError::auth_required(format!(
                        "user has no access to the requested organization: {requested}"
                    )));
                }
            }
            self.requested_orgs.clone()
        };

        let mut orgs = Vec::with_capacity(selected.len());
        for login in &selected {
            match self.organization(login).await {
                Ok(org) => orgs.push(org),
                Err(e) => tracing::warn!(org = %login, error = %e, "Skipping organization"),
            }
        }

        if orgs.is_empty() {
            let message = if self.requested_orgs.is_empty() {
                "token doesn't have access to any organization"
            } else {
                "token doesn't have access to the requested organizations"
            };
            return Err(PlatformError::auth_required(message));
        }
        Ok(orgs)
    }
}

impl GitHubClient {
    /// Every repository the viewer owns or can reach through an organization,
    /// with the viewer's permission on it.
    pub async fn viewer_repositories(&self) -> Result<Vec<ViewerRepository>> {
        const QUERY: &str = "query($cursor: String) { viewer { repositories(first: 100, after: $cursor, affiliations: [OWNER, ORGANIZATION_MEMBER, COLLABORATOR]) { pageInfo { hasNextPage endCursor } nodes { nameWithOwner viewerPermission } } } }";

        let mut repositories = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let data = self.graphql(QUERY, json!({ "cursor": cursor })).await?;
            let page = data
                .pointer("/viewer/repositories")
                .ok_or_else(|| PlatformError::Decode {
                    resource: "/graphql".to_string(),
                    message: "missing viewer.repositories".to_string(),
                })?;

            if let Some(nodes) = page.get("nodes").and_then(Value::as_array) {
                repositories.extend(nodes.iter().filter_map(|node| {
                    Some(ViewerRepository {
                        name_with_owner: node.get("nameWithOwner")?.as_str()?.to_string(),
                        viewer_permission: node
                            .get("viewerPermission")
                            .and_then(Value::as_str)
                            .and_then(Role::parse),
                    })
                }));
            }

            let has_next = page
                .pointer("/pageInfo/hasNextPage")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = page
                .pointer("/pageInfo/endCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_next || cursor.is_none() {
                break;
            }
        }
        tracing::debug!(count = repositories.len(), "Listed viewer repositories");
        Ok(repositories)
    }
}

/// Build an error from a non-2xx response, preferring GitHub's `message` field.
fn error_from_response(path: &str, response: &HttpResponse) -> PlatformError {
    if let Some(reset_at) = primary_limit_reset(response) {
        return PlatformError::RateLimited { reset_at };
    }
    let message = serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());
    PlatformError::from_status(response.status, path, message)
}

/// When the hourly quota is spent GitHub answers 403/429 with
/// `X-RateLimit-Remaining: 0` and the reset time in epoch seconds. Without
/// this, the 403 would read as a missing permission.
fn primary_limit_reset(response: &HttpResponse) -> Option<DateTime<Utc>> {
    if !matches!(response.status, 403 | 429)
        || response.header("x-ratelimit-remaining")?.trim() != "0"
    {
        return None;
    }
    let reset = response.header("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(reset, 0)
}

fn api_message(response: &HttpResponse) -> Option<String> {
    serde_json::from_slice::<Value>(&response.body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| PlatformError::Decode {
        resource: path.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl GitHubApi for GitHubClient {
    fn scopes(&self) -> &TokenScopes {
        &self.scopes
    }

    fn is_cloud(&self) -> bool {
        self.endpoint.is_none()
    }

    async fn organizations(&self) -> Result<Vec<ExtendedOrg>> {
        if let Some(orgs) = self.orgs_cache.read().await.as_ref() {
            return Ok(orgs.clone());
        }

        let mut cache = self.orgs_cache.write().await;
        if let Some(orgs) = cache.as_ref() {
            return Ok(orgs.clone());
        }
        let orgs = self.load_organizations().await?;
        *cache = Some(orgs.clone());
        Ok(orgs)
    }

    async fn organization(&self, login: &str) -> Result<ExtendedOrg> {
        let org: Organization = self.get_json(&format!("/orgs/{login}")).await?;
        let role = self.viewer_org_role(&org.login).await?;
        Ok(ExtendedOrg::new(org, role))
    }

    async fn list_org_hooks(&self, org: &str, opts: ListOptions) -> Result<(Vec<Hook>, PageMeta)> {
        self.get_page(&format!("/orgs/{org}/hooks"), &opts).await
    }

    async fn list_org_secrets(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(OrgSecretList, PageMeta)> {
        self.get_page(&format!("/orgs/{org}/actions/secrets"), &opts)
            .await
    }

    async fn list_org_repos(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(Vec<Repository>, PageMeta)> {
        self.get_page(&format!("/orgs/{org}/repos?type=all"), &opts)
            .await
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<Repository> {
        self.get_json(&format!("/repos/{owner}/{name}")).await
    }

    async fn list_repo_hooks(
        &self,
        owner: &str,
        repo: &str,
        opts: ListOptions,
    ) -> Result<(Vec<Hook>, PageMeta)> {
        self.get_page(&format!("/repos/{owner}/{repo}/hooks"), &opts)
            .await
    }

    async fn list_collaborators(
        &self,
        owner: &str,
        repo: &str,
        opts: ListOptions,
    ) -> Result<(Vec<User>, PageMeta)> {
        self.get_page(&format!("/repos/{owner}/{repo}/collaborators"), &opts)
            .await
    }

    async fn vulnerability_alerts_enabled(&self, owner: &str, repo: &str) -> Result<bool> {
        match self
            .get(&format!("/repos/{owner}/{repo}/vulnerability-alerts"))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn repo_actions_token_permissions(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<TokenPermissions> {
        self.get_json(&format!("/repos/{owner}/{repo}/actions/permissions/workflow"))
            .await
    }

    async fn org_actions_token_permissions(&self, org: &str) -> Result<TokenPermissions> {
        self.get_json(&format!("/orgs/{org}/actions/permissions/workflow"))
            .await
    }

    async fn org_actions_permissions(&self, org: &str) -> Result<ActionsPermissions> {
        self.get_json(&format!("/orgs/{org}/actions/permissions"))
            .await
    }

    async fn branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchProtection> {
        const NOT_PROTECTED: &str = "Branch not protected";

        let path = format!("/repos/{owner}/{repo}/branches/{branch}/protection");
        let url = format!("{}{}", self.api_base, path);
        let response = self.send(self.request(HttpMethod::Get, url)).await?;

        match response.status {
            s if (200..300).contains(&s) => {
                Ok(BranchProtection::Protected(decode(&path, &response.body)?))
            }
            404 if api_message(&response).as_deref() == Some(NOT_PROTECTED) => {
                Ok(BranchProtection::NotProtected)
            }
            404 => Ok(BranchProtection::NoPermission),
            _ => Err(error_from_response(&path, &response)),
        }
    }

    async fn list_org_members(
        &self,
        org: &str,
        opts: MemberListOptions,
    ) -> Result<(Vec<User>, PageMeta)> {
        self.get_page(&format!("/orgs/{org}/members?role={}", opts.role), &opts.list)
            .await
    }

    async fn member_last_active(&self, org: &str, login: &str) -> Result<Option<DateTime<Utc>>> {
        let phrase: String =
            form_urlencoded::byte_serialize(format!("actor:{login}").as_bytes()).collect();
        let path = format!("/orgs/{org}/audit-log?phrase={phrase}&include=all&per_page=1");
        let events: Vec<AuditLogEvent> = self.get_json(&path).await?;
        Ok(events
            .first()
            .and_then(|e| DateTime::from_timestamp_millis(e.timestamp)))
    }

    async fn list_runner_groups(
        &self,
        org: &str,
        opts: ListOptions,
    ) -> Result<(RunnerGroups, PageMeta)> {
        self.get_page(&format!("/orgs/{org}/actions/runner-groups"), &opts)
            .await
    }

    async fn enterprise(&self, slug: &str) -> Result<Enterprise> {
        const QUERY: &str = "query($slug: String!) { enterprise(slug: $slug) { databaseId slug name url ownerInfo { membersCanChangeRepositoryVisibilitySetting } } }";

        let data = self.graphql(QUERY, json!({ "slug": slug })).await?;
        let node = data
            .get("enterprise")
            .filter(|v| !v.is_null())
            .ok_or_else(|| PlatformError::not_found(format!("enterprise {slug}")))?;

        let text = |key: &str| {
            node.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Enterprise {
            id: node.get("databaseId").and_then(Value::as_i64).unwrap_or_default(),
            slug: text("slug"),
            name: text("name"),
            url: text("url"),
            members_can_change_repository_visibility_setting: node
                .pointer("/ownerInfo/membersCanChangeRepositoryVisibilitySetting")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn org_saml_enabled(&self, org: &str) -> Result<bool> {
        const QUERY: &str = "query($login: String!) { organization(login: $login) { samlIdentityProvider { externalIdentities(first: 1) { totalCount } } } }";

        let data = self.graphql(QUERY, json!({ "login": org })).await?;
        let linked = data
            .pointer("/organization/samlIdentityProvider/externalIdentities/totalCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(linked > 0)
    }

    async fn org_repo_count(&self, org: &str) -> Result<usize> {
        self.count_items(&format!("/orgs/{org}/repos?type=all"))
            .await
    }
}

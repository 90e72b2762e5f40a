//! GitHub REST payloads.
//!
//! Only the fields the collectors reason about are typed. Everything else a
//! response carries is kept in `extra`, so the entity handed to the policy
//! engine is the full API object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::permissions::{RepoRole, Role};

/// `GET /orgs/{org}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub html_url: Option<String>,
    /// Only visible to members with `read:org`.
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
}

/// An organization together with the viewer's role in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedOrg {
    #[serde(flatten)]
    pub organization: Organization,
    pub role: Role,
}

impl ExtendedOrg {
    pub fn new(organization: Organization, role: Role) -> Self {
        Self { organization, role }
    }

    pub fn name(&self) -> &str {
        &self.organization.login
    }

    pub fn id(&self) -> i64 {
        self.organization.id
    }

    pub fn is_enterprise(&self) -> bool {
        self.plan_name() == Some("enterprise")
    }

    pub fn is_free(&self) -> bool {
        self.plan_name() == Some("free")
    }

    /// Whether the plan was visible to the token at all.
    pub fn has_plan(&self) -> bool {
        self.organization.plan.is_some()
    }

    fn plan_name(&self) -> Option<&str> {
        self.organization.plan.as_ref().map(|p| p.name.as_str())
    }

    pub fn canonical_link(&self) -> String {
        self.organization
            .html_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}", self.name()))
    }
}

/// `GET /user/memberships/orgs/{org}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgMembership {
    pub role: String,
}

impl OrgMembership {
    pub fn viewer_role(&self) -> Role {
        Role::org(self.role == "admin")
    }
}

/// Minimal `GET /user/orgs` item; only the login is used.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgSummary {
    pub login: String,
}

/// Organization or repository webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET /orgs/{org}/actions/secrets`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgSecretList {
    #[serde(default)]
    pub secrets: Vec<OrgSecret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSecret {
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// Repository as listed by `GET /orgs/{org}/repos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub owner: Option<Owner>,
    /// Viewer permissions; present when listed with an authenticated token.
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Repository {
    /// The strongest role the viewer holds on this repository.
    pub fn viewer_role(&self) -> Option<Role> {
        let p = self.permissions.as_ref()?;
        let role = if p.admin {
            RepoRole::Admin
        } else if p.maintain {
            RepoRole::Maintain
        } else if p.push {
            RepoRole::Write
        } else if p.triage {
            RepoRole::Triage
        } else if p.pull {
            RepoRole::Read
        } else {
            return None;
        };
        Some(Role::Repo(role))
    }

    /// Owner login, falling back to the `owner/name` prefix.
    pub fn owner_login(&self) -> &str {
        match &self.owner {
            Some(owner) => &owner.login,
            None => self
                .full_name
                .split_once('/')
                .map(|(owner, _)| owner)
                .unwrap_or(&self.full_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub triage: bool,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET .../actions/permissions/workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workflow_permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_approve_pull_request_reviews: Option<bool>,
}

/// `GET /orgs/{org}/actions/permissions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsPermissions {
    #[serde(default)]
    pub enabled_repositories: Option<String>,
    #[serde(default)]
    pub allowed_actions: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET /orgs/{org}/actions/runner-groups` envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerGroups {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub runner_groups: Vec<RunnerGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerGroup {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One audit log event; only the timestamp (epoch millis) is read.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: i64,
}

/// Outcome of a branch protection lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchProtection {
    Protected(Value),
    NotProtected,
    /// GitHub hides protection settings from non-admins behind a 404.
    NoPermission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enterprise {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub members_can_change_repository_visibility_setting: Option<String>,
}

/// A repository the viewer can reach, as listed over GraphQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerRepository {
    pub name_with_owner: String,
    /// `ADMIN`, `MAINTAIN`, `WRITE`, `TRIAGE` or `READ`; `None` when GitHub reports none.
    pub viewer_permission: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repository_viewer_role_takes_the_strongest_permission() {
        let repo: Repository = serde_json::from_value(json!({
            "id": 1,
            "name": "api",
            "full_name": "acme/api",
            "html_url": "https://github.com/acme/api",
            "private": true,
            "permissions": { "admin": false, "maintain": false, "push": true, "triage": true, "pull": true },
            "topics": ["backend"]
        }))
        .expect("repository json");

        assert_eq!(repo.viewer_role(), Some(Role::Repo(RepoRole::Write)));
        assert_eq!(repo.owner_login(), "acme");
        assert_eq!(repo.extra.get("topics"), Some(&json!(["backend"])));
    }

    #[test]
    fn extended_org_flattens_and_reads_plan() {
        let org: Organization = serde_json::from_value(json!({
            "login": "acme",
            "id": 7,
            "html_url": "https://github.com/acme",
            "plan": { "name": "enterprise", "seats": 10 },
            "two_factor_requirement_enabled": true
        }))
        .expect("organization json");
        let ext = ExtendedOrg::new(org, Role::ORG_OWNER);

        assert!(ext.is_enterprise());
        assert!(!ext.is_free());
        let value = serde_json::to_value(&ext).expect("serialize");
        assert_eq!(value["role"], "OWNER");
        assert_eq!(value["two_factor_requirement_enabled"], true);
    }

    #[test]
    fn membership_role_maps_to_org_role() {
        let admin = OrgMembership {
            role: "admin".into(),
        };
        let member = OrgMembership {
            role: "member".into(),
        };
        assert_eq!(admin.viewer_role(), Role::ORG_OWNER);
        assert_eq!(member.viewer_role(), Role::ORG_MEMBER);
    }
}

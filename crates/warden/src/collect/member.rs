use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    CollectedDataContext, Collector, CollectorHandle, CollectorStreams, Metadata,
    MissingPermission, TaskGroup, fetch_all, selected_organizations, spawn_collection,
};
use crate::github::{ExtendedOrg, GitHubApi, MemberListOptions, User};
use crate::namespace::Namespace;
use crate::permissions::scope;

pub const LAST_ACTIVE_EFFECT: &str = "Cannot read organization member last active time";
pub const ORG_INFO_EFFECT: &str = "Cannot read organization information";
pub const NOT_ENTERPRISE_EFFECT: &str =
    "Some information cannot be collected because the organization is not part of an enterprise";

const MEMBER_ROLES: [&str; 2] = ["member", "admin"];

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationMember {
    pub user: User,
    /// Latest audit log activity. Only looked up for enterprise organizations.
    pub last_active: Option<DateTime<Utc>>,
    pub is_admin: bool,
}

/// One organization's membership roster.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationMembers {
    pub organization: ExtendedOrg,
    pub members: Vec<OrganizationMember>,
    pub has_last_active: bool,
}

#[derive(Clone)]
pub struct MemberCollector {
    client: Arc<dyn GitHubApi>,
}

impl MemberCollector {
    pub fn new(client: Arc<dyn GitHubApi>) -> Self {
        Self { client }
    }

    async fn run(self, handle: CollectorHandle) {
        let Some(orgs) = selected_organizations(self.client.as_ref(), Namespace::Member).await
        else {
            return;
        };

        let mut group = TaskGroup::new();
        for org in orgs {
            let this = self.clone();
            let handle = handle.clone();
            group.spawn(async move { this.collect_org(org, &handle).await });
        }
        group.wait().await;
    }

    async fn collect_org(&self, org: ExtendedOrg, handle: &CollectorHandle) {
        handle.issue_missing_permissions(org_missing_permissions(&org)).await;

        let has_last_active = org.is_enterprise();
        let mut members = Vec::new();
        for role in MEMBER_ROLES {
            let users = match fetch_all(MemberListOptions::with_role(role), |opts| {
                self.client.list_org_members(org.name(), opts)
            })
            .await
            {
                Ok(users) => users,
                Err(e) => {
                    tracing::warn!(org = %org.name(), role, error = %e, "Failed to collect organization members");
                    continue;
                }
            };

            let is_admin = role == "admin";
            if has_last_active {
                members.extend(self.with_last_active(&org, users, is_admin, handle).await);
            } else {
                members.extend(users.into_iter().map(|user| OrganizationMember {
                    user,
                    last_active: None,
                    is_admin,
                }));
            }
        }

        members.sort_by(|a, b| a.user.login.cmp(&b.user.login));

        let context = CollectedDataContext::new(vec![org.role], org.is_enterprise());
        let link = people_link(&org);
        let name = org.name().to_string();
        let entity = OrganizationMembers {
            organization: org,
            members,
            has_last_active,
        };
        handle.collect_data(&entity, name, link, context).await;
        handle.collection_change_by_one().await;
    }

    /// Look up every member's last activity concurrently.
    ///
    /// Each lookup counts as one unit of progress on top of the organization
    /// itself, so large audits show movement before the roster is complete.
    /// Members whose lookup fails are kept without a timestamp.
    async fn with_last_active(
        &self,
        org: &ExtendedOrg,
        users: Vec<User>,
        is_admin: bool,
        handle: &CollectorHandle,
    ) -> Vec<OrganizationMember> {
        handle.total_collection_change(users.len()).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut group = TaskGroup::new();
        for user in users {
            let client = Arc::clone(&self.client);
            let org = org.clone();
            let handle = handle.clone();
            let tx = tx.clone();
            group.spawn(async move {
                let last_active = match client.member_last_active(org.name(), &user.login).await {
                    Ok(last_active) => last_active,
                    Err(e) => {
                        tracing::debug!(org = %org.name(), member = %user.login, error = %e, "Member last active time unavailable");
                        handle
                            .issue_missing_permission(MissingPermission::new(
                                scope::ADMIN_ORG,
                                format!("{} ({})", user.login, org.name()),
                                LAST_ACTIVE_EFFECT,
                                Namespace::Member,
                            ))
                            .await;
                        None
                    }
                };
                let _ = tx.send(OrganizationMember {
                    user,
                    last_active,
                    is_admin,
                });
                handle.collection_change_by_one().await;
            });
        }
        drop(tx);
        group.wait().await;

        let mut members = Vec::new();
        while let Some(member) = rx.recv().await {
            members.push(member);
        }
        members
    }
}

/// Organization-level gaps that limit what can be said about its members.
fn org_missing_permissions(org: &ExtendedOrg) -> Option<MissingPermission> {
    let effect = if !org.has_plan() {
        ORG_INFO_EFFECT
    } else if !org.is_enterprise() {
        NOT_ENTERPRISE_EFFECT
    } else {
        return None;
    };
    Some(MissingPermission::new(
        scope::READ_ORG,
        org.name(),
        effect,
        Namespace::Organization,
    ))
}

/// `https://<host>/orgs/<org>/people`, derived from the organization's page.
fn people_link(org: &ExtendedOrg) -> String {
    let link = org.canonical_link();
    let base = link
        .strip_suffix(org.name())
        .map(|base| base.trim_end_matches('/'))
        .unwrap_or("https://github.com");
    format!("{base}/orgs/{}/people", org.name())
}

#[async_trait]
impl Collector for MemberCollector {
    fn namespace(&self) -> Namespace {
        Namespace::Member
    }

    async fn collect_metadata(&self) -> Metadata {
        let total_entities = selected_organizations(self.client.as_ref(), self.namespace())
            .await
            .map_or(0, |orgs| orgs.len());
        Metadata { total_entities }
    }

    fn collect(&self) -> CollectorStreams {
        let this = self.clone();
        spawn_collection(self.namespace(), move |handle| this.run(handle))
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{
    CollectedDataContext, Collector, CollectorHandle, CollectorStreams, Metadata,
    MissingPermission, TaskGroup, selected_organizations, spawn_collection,
};
use crate::github::{ActionsPermissions, ExtendedOrg, GitHubApi, TokenPermissions};
use crate::namespace::Namespace;
use crate::permissions::scope;

pub const ORG_ACTIONS_EFFECT: &str = "Cannot read organization actions settings";

/// An organization's GitHub Actions settings.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationActions {
    pub organization: ExtendedOrg,
    pub actions_permissions: Option<ActionsPermissions>,
    pub token_permissions: Option<TokenPermissions>,
}

#[derive(Clone)]
pub struct ActionsCollector {
    client: Arc<dyn GitHubApi>,
}

impl ActionsCollector {
    pub fn new(client: Arc<dyn GitHubApi>) -> Self {
        Self { client }
    }

    async fn run(self, handle: CollectorHandle) {
        let Some(orgs) = selected_organizations(self.client.as_ref(), Namespace::Actions).await
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
        let (token_permissions, actions_permissions) = tokio::join!(
            self.client.org_actions_token_permissions(org.name()),
            self.client.org_actions_permissions(org.name()),
        );

        if let Some(e) = token_permissions.as_ref().err().or(actions_permissions.as_ref().err()) {
            tracing::debug!(org = %org.name(), error = %e, "Organization actions settings unavailable");
            handle
                .issue_missing_permission(MissingPermission::new(
                    scope::ADMIN_ORG,
                    format!("{}/{}", Namespace::Organization, org.name()),
                    ORG_ACTIONS_EFFECT,
                    Namespace::Organization,
                ))
                .await;
        }

        let context = CollectedDataContext::new(vec![org.role], org.is_enterprise());
        let link = org.canonical_link();
        let name = org.name().to_string();
        let entity = OrganizationActions {
            organization: org,
            actions_permissions: actions_permissions.ok(),
            token_permissions: token_permissions.ok(),
        };
        handle.collect_data(&entity, name, link, context).await;
        handle.collection_change_by_one().await;
    }
}

#[async_trait]
impl Collector for ActionsCollector {
    fn namespace(&self) -> Namespace {
        Namespace::Actions
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::fake::{FakeGitHub, drain, org};
    use crate::permissions::Role;

    #[tokio::test]
    async fn collects_both_settings_per_org() {
        let mut fake = FakeGitHub::new();
        fake.orgs = vec![org("acme", Some("enterprise"), Role::ORG_OWNER)];
        let collector = ActionsCollector::new(Arc::new(fake));

        assert_eq!(collector.collect_metadata().await.total_entities, 1);
        let out = drain(collector.collect()).await;

        assert!(out.missing.is_empty());
        let entity = &out.collected[0].entity;
        assert_eq!(entity["organization"]["login"], "acme");
        assert_eq!(entity["actions_permissions"]["allowed_actions"], "all");
        assert_eq!(entity["token_permissions"]["default_workflow_permissions"], "write");
    }

    #[tokio::test]
    async fn either_failure_is_one_missing_permission() {
        let mut fake = FakeGitHub::new()
            .deny("org_actions:acme")
            .deny("org_actions_token:acme");
        fake.orgs = vec![org("acme", Some("free"), Role::ORG_MEMBER)];
        let collector = ActionsCollector::new(Arc::new(fake));

        let out = drain(collector.collect()).await;

        assert_eq!(out.collected.len(), 1);
        assert_eq!(out.progress, 1);
        assert!(out.collected[0].entity["actions_permissions"].is_null());
        assert_eq!(
            out.missing,
            vec![MissingPermission::new(
                scope::ADMIN_ORG,
                "organization/acme",
                ORG_ACTIONS_EFFECT,
                Namespace::Organization
            )]
        );
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{
    CollectedDataContext, Collector, CollectorHandle, CollectorStreams, Metadata,
    MissingPermission, TaskGroup, fetch_all, fetch_all_mapped, selected_organizations,
    spawn_collection,
};
use crate::github::{ExtendedOrg, GitHubApi, Hook, OrgSecret, OrgSecretList};
use crate::namespace::Namespace;
use crate::pagination::ListOptions;
use crate::permissions::scope;

pub const ORG_HOOKS_EFFECT: &str = "Cannot read organization webhooks";

/// An organization with its webhooks, Actions secrets and SAML status.
///
/// `None` means the data couldn't be read, not that there is none.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationEntity {
    #[serde(flatten)]
    pub organization: ExtendedOrg,
    pub hooks: Option<Vec<Hook>>,
    pub org_secrets: Option<Vec<OrgSecret>>,
    pub saml_enabled: Option<bool>,
}

#[derive(Clone)]
pub struct OrganizationCollector {
    client: Arc<dyn GitHubApi>,
}

impl OrganizationCollector {
    pub fn new(client: Arc<dyn GitHubApi>) -> Self {
        Self { client }
    }

    async fn run(self, handle: CollectorHandle) {
        let Some(orgs) = selected_organizations(self.client.as_ref(), Namespace::Organization).await
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
        let name = org.name().to_string();

        let (hooks, org_secrets, saml_enabled) = tokio::join!(
            fetch_all(ListOptions::default(), |opts| self.client.list_org_hooks(&name, opts)),
            self.org_secrets(&name),
            self.client.org_saml_enabled(&name),
        );
        let saml_enabled = saml_enabled
            .inspect_err(|e| tracing::warn!(org = %name, error = %e, "Failed to collect SAML data"))
            .ok();

        let hooks = match hooks {
            Ok(hooks) => Some(hooks),
            Err(e) => {
                if e.is_permission_denied() {
                    handle
                        .issue_missing_permission(MissingPermission::new(
                            scope::ADMIN_ORG_HOOK,
                            &name,
                            ORG_HOOKS_EFFECT,
                            Namespace::Organization,
                        ))
                        .await;
                }
                tracing::warn!(org = %name, error = %e, "Failed to collect organization webhooks");
                None
            }
        };

        let context = CollectedDataContext::new(vec![org.role], org.is_enterprise());
        let link = org.canonical_link();
        let entity = OrganizationEntity {
            organization: org,
            hooks,
            org_secrets,
            saml_enabled,
        };
        handle.collect_data(&entity, name, link, context).await;
        handle.collection_change_by_one().await;
    }

    async fn org_secrets(&self, org: &str) -> Option<Vec<OrgSecret>> {
        let secrets = fetch_all_mapped(
            |opts| self.client.list_org_secrets(org, opts),
            |page: OrgSecretList| page.secrets,
        )
        .await;
        match secrets {
            Ok(secrets) => Some(secrets),
            Err(e) => {
                tracing::debug!(org = %org, error = %e, "Organization secrets unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl Collector for OrganizationCollector {
    fn namespace(&self) -> Namespace {
        Namespace::Organization
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

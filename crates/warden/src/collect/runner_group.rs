use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinSet;

use super::{
    CollectedDataContext, Collector, CollectorHandle, CollectorStreams, Metadata,
    MissingPermission, fetch_all_mapped, selected_organizations, spawn_collection,
};
use crate::github::{ExtendedOrg, GitHubApi, RunnerGroup, RunnerGroups};
use crate::namespace::Namespace;
use crate::permissions::scope;

pub const RUNNER_GROUPS_EFFECT: &str = "Cannot read organization runner groups";

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationRunnerGroup {
    pub organization: ExtendedOrg,
    pub runner_group: RunnerGroup,
}

/// One organization's runner groups, fetched at most once per run.
#[derive(Debug, Default)]
struct OrgRunnerGroups {
    groups: Vec<RunnerGroup>,
    readable: bool,
}

type RunnerGroupCache = Mutex<HashMap<String, Arc<OnceCell<OrgRunnerGroups>>>>;

/// Runner groups of every organization.
///
/// Counting them for progress already requires listing them, so the listing
/// is cached and shared between metadata and collection.
#[derive(Clone)]
pub struct RunnerGroupCollector {
    client: Arc<dyn GitHubApi>,
    cache: Arc<RunnerGroupCache>,
}

impl RunnerGroupCollector {
    pub fn new(client: Arc<dyn GitHubApi>) -> Self {
        Self {
            client,
            cache: Arc::default(),
        }
    }

    async fn groups_for(&self, org: &str) -> Arc<OnceCell<OrgRunnerGroups>> {
        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(org.to_string()).or_default())
        };
        cell.get_or_init(|| async {
            let listed = fetch_all_mapped(
                |opts| self.client.list_runner_groups(org, opts),
                |page: RunnerGroups| page.runner_groups,
            )
            .await;
            match listed {
                Ok(groups) => OrgRunnerGroups {
                    groups,
                    readable: true,
                },
                Err(e) => {
                    tracing::debug!(org = %org, error = %e, "Runner groups unavailable");
                    OrgRunnerGroups::default()
                }
            }
        })
        .await;
        cell
    }

    async fn run(self, handle: CollectorHandle) {
        let Some(orgs) = selected_organizations(self.client.as_ref(), Namespace::RunnerGroup).await
        else {
            return;
        };

        for org in orgs {
            let cell = self.groups_for(org.name()).await;
            let Some(listed) = cell.get() else {
                continue;
            };
            if !listed.readable {
                handle
                    .issue_missing_permission(MissingPermission::new(
                        scope::ADMIN_ORG,
                        org.name(),
                        RUNNER_GROUPS_EFFECT,
                        Namespace::Organization,
                    ))
                    .await;
            }

            for group in &listed.groups {
                let context = CollectedDataContext::new(vec![org.role], org.is_enterprise());
                let entity = OrganizationRunnerGroup {
                    organization: org.clone(),
                    runner_group: group.clone(),
                };
                handle
                    .collect_data(&entity, &group.name, org.canonical_link(), context)
                    .await;
                handle.collection_change_by_one().await;
            }
        }
    }
}

#[async_trait]
impl Collector for RunnerGroupCollector {
    fn namespace(&self) -> Namespace {
        Namespace::RunnerGroup
    }

    async fn collect_metadata(&self) -> Metadata {
        let Some(orgs) = selected_organizations(self.client.as_ref(), self.namespace()).await
        else {
            return Metadata::default();
        };

        let mut counts = JoinSet::new();
        for org in orgs {
            let this = self.clone();
            counts.spawn(async move {
                let cell = this.groups_for(org.name()).await;
                cell.get().map_or(0, |listed| listed.groups.len())
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

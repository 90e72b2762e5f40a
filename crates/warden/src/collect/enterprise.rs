use std::sync::Arc;

use async_trait::async_trait;

use super::{
    CollectedDataContext, Collector, CollectorHandle, CollectorStreams, Metadata, TaskGroup,
    spawn_collection,
};
use crate::github::GitHubApi;
use crate::namespace::Namespace;
use crate::permissions::Role;

/// The configured enterprise accounts.
///
/// Enterprises can't be enumerated from a token, so the slugs come from
/// configuration. Reading one at all requires enterprise admin, hence the
/// fixed role.
#[derive(Clone)]
pub struct EnterpriseCollector {
    client: Arc<dyn GitHubApi>,
    slugs: Arc<[String]>,
}

impl EnterpriseCollector {
    pub fn new(client: Arc<dyn GitHubApi>, slugs: Vec<String>) -> Self {
        Self {
            client,
            slugs: slugs.into(),
        }
    }

    async fn run(self, handle: CollectorHandle) {
        let mut group = TaskGroup::new();
        for slug in self.slugs.iter().cloned() {
            let client = Arc::clone(&self.client);
            let handle = handle.clone();
            group.spawn(async move {
                let enterprise = match client.enterprise(&slug).await {
                    Ok(enterprise) => enterprise,
                    Err(e) => {
                        tracing::error!(enterprise = %slug, error = %e, "Failed to collect enterprise");
                        return;
                    }
                };
                let context = CollectedDataContext::new(vec![Role::ENTERPRISE_ADMIN], true);
                let link = enterprise.url.clone();
                handle.collect_data(&enterprise, &enterprise.slug, link, context).await;
                handle.collection_change_by_one().await;
            });
        }
        group.wait().await;
    }
}

#[async_trait]
impl Collector for EnterpriseCollector {
    fn namespace(&self) -> Namespace {
        Namespace::Enterprise
    }

    async fn collect_metadata(&self) -> Metadata {
        Metadata {
            total_entities: self.slugs.len(),
        }
    }

    fn collect(&self) -> CollectorStreams {
        let this = self.clone();
        spawn_collection(self.namespace(), move |handle| this.run(handle))
    }
}

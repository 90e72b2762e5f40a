use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{
    CollectedData, CollectionMetric, Collector, CollectorEvent, CollectorOptions, Metadata,
    MissingPermission, Multiplexer, TaskGroup, new_collector,
};
use crate::github::GitHubApi;
use crate::issues::PermissionLog;
use crate::namespace::Namespace;

/// Capacity of the manager's merged streams.
pub const MANAGER_CHANNEL_BUFFER: usize = 256;

/// Merged output of every collector.
///
/// Both receivers must be drained: a full progress stream holds back the
/// collected stream and the other way around.
pub struct ManagerChannels {
    pub collected: mpsc::Receiver<CollectedData>,
    pub progress: mpsc::Receiver<CollectionMetric>,
}

/// Runs the selected collectors side by side and merges their streams.
pub struct CollectorManager {
    collectors: Vec<Arc<dyn Collector>>,
    permissions: Arc<PermissionLog>,
}

impl CollectorManager {
    pub fn new(
        namespaces: &[Namespace],
        client: Arc<dyn GitHubApi>,
        options: &CollectorOptions,
    ) -> Self {
        let collectors = namespaces
            .iter()
            .map(|ns| new_collector(*ns, Arc::clone(&client), options))
            .collect();
        Self::from_collectors(collectors)
    }

    #[must_use]
    pub fn from_collectors(collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self {
            collectors,
            permissions: Arc::new(PermissionLog::new()),
        }
    }

    #[must_use]
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.collectors.iter().map(|c| c.namespace()).collect()
    }

    /// Where missing-permission notices end up. Complete once both
    /// [`ManagerChannels`] streams have closed.
    #[must_use]
    pub fn permission_log(&self) -> Arc<PermissionLog> {
        Arc::clone(&self.permissions)
    }

    /// Every collector's entity count, gathered concurrently.
    pub async fn collect_metadata(&self) -> BTreeMap<Namespace, Metadata> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut group = TaskGroup::new();
        for collector in &self.collectors {
            let collector = Arc::clone(collector);
            let tx = tx.clone();
            group.spawn(async move {
                let metadata = collector.collect_metadata().await;
                let _ = tx.send((collector.namespace(), metadata));
            });
        }
        drop(tx);
        group.wait().await;

        let mut result = BTreeMap::new();
        while let Some((namespace, metadata)) = rx.recv().await {
            tracing::debug!(namespace = %namespace, total = metadata.total_entities, "Collected metadata");
            result.insert(namespace, metadata);
        }
        result
    }

    /// Start every collector and return the merged streams at once.
    ///
    /// Each collector gets a drain task that forwards its entities and
    /// progress, routes missing permissions to the [`PermissionLog`], and sends
    /// one `finished` metric when all of its streams have closed. The merged
    /// streams close after every drain task and the permission aggregation are
    /// done.
    ///
    /// Both streams are bounded, so the caller must read them concurrently;
    /// draining one to the end before touching the other can stall the run.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ManagerChannels { mut collected, mut progress } = manager.collect();
    /// tokio::spawn(async move { while progress.recv().await.is_some() {} });
    /// while let Some(data) = collected.recv().await {
    ///     println!("{} {}", data.namespace, data.name);
    /// }
    /// let report = manager.permission_log().report();
    /// ```
    #[must_use]
    pub fn collect(&self) -> ManagerChannels {
        let (collected_tx, collected_rx) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let (progress_tx, progress_rx) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let collectors = self.collectors.clone();
        let permissions = Arc::clone(&self.permissions);

        tokio::spawn(async move {
            let (perm_tx, perm_rx) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
            let aggregator = tokio::spawn(aggregate_permissions(perm_rx, permissions));

            let mut group = TaskGroup::new();
            for collector in collectors {
                let namespace = collector.namespace();
                let mux = Multiplexer::new(collector.collect());
                group.spawn(drain(
                    namespace,
                    mux,
                    collected_tx.clone(),
                    progress_tx.clone(),
                    perm_tx.clone(),
                ));
            }
            drop(perm_tx);
            group.wait().await;

            if let Err(e) = aggregator.await {
                tracing::error!(error = %e, "Permission aggregation task failed");
            }
            tracing::debug!("All collectors finished");
            drop((collected_tx, progress_tx));
        });

        ManagerChannels {
            collected: collected_rx,
            progress: progress_rx,
        }
    }
}

async fn drain(
    namespace: Namespace,
    mut mux: Multiplexer,
    collected: mpsc::Sender<CollectedData>,
    progress: mpsc::Sender<CollectionMetric>,
    permissions: mpsc::Sender<MissingPermission>,
) {
    while let Some(event) = mux.next().await {
        let delivered = match event {
            CollectorEvent::Collected(data) => collected.send(data).await.is_ok(),
            CollectorEvent::Progress(metric) => progress.send(metric).await.is_ok(),
            CollectorEvent::MissingPermission(perm) => permissions.send(perm).await.is_ok(),
        };
        if !delivered {
            tracing::debug!(namespace = %namespace, "Manager output dropped, discarding event");
        }
    }

    tracing::debug!(namespace = %namespace, "Collector drained");
    let _ = progress.send(CollectionMetric::finished(namespace)).await;
}

async fn aggregate_permissions(
    mut rx: mpsc::Receiver<MissingPermission>,
    log: Arc<PermissionLog>,
) {
    while let Some(permission) = rx.recv().await {
        log.record(&permission);
    }
}

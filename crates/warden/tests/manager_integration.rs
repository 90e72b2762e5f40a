//! End-to-end tests for the collector manager.
//!
//! Drives the manager with in-process collectors to check that:
//! - entities from every collector reach the merged stream, tagged by namespace
//! - each collector produces exactly one `finished` metric
//! - missing permissions land in the permission log, not on the streams
//! - a manager with no collectors closes its streams right away

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use warden::collect::{Collector, CollectorStreams, spawn_collection};
use warden::permissions::scope;
use warden::{
    CollectedData, CollectedDataContext, CollectionMetric, CollectorManager, Metadata,
    MissingPermission, Namespace, Role,
};

const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Emits `names` one by one, then the given missing permissions.
struct StaticCollector {
    namespace: Namespace,
    names: Vec<&'static str>,
    missing: Vec<MissingPermission>,
    delay: Duration,
}

impl StaticCollector {
    fn new(namespace: Namespace, names: Vec<&'static str>) -> Self {
        Self {
            namespace,
            names,
            missing: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    fn with_missing(mut self, missing: MissingPermission) -> Self {
        self.missing.push(missing);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn namespace(&self) -> Namespace {
        self.namespace
    }

    async fn collect_metadata(&self) -> Metadata {
        Metadata {
            total_entities: self.names.len(),
        }
    }

    fn collect(&self) -> CollectorStreams {
        let names = self.names.clone();
        let missing = self.missing.clone();
        let delay = self.delay;
        spawn_collection(self.namespace, move |handle| async move {
            for name in names {
                tokio::time::sleep(delay).await;
                let context = CollectedDataContext::new(vec![Role::ORG_OWNER], true);
                handle
                    .collect_data(
                        &json!({ "name": name }),
                        name,
                        format!("https://github.com/{name}"),
                        context,
                    )
                    .await;
                handle.collection_change_by_one().await;
            }
            handle.issue_missing_permissions(missing).await;
        })
    }
}

struct Drained {
    collected: Vec<CollectedData>,
    progress: Vec<CollectionMetric>,
}

/// Read both merged streams to completion, concurrently.
async fn drain(
    mut collected: mpsc::Receiver<CollectedData>,
    mut progress: mpsc::Receiver<CollectionMetric>,
) -> Drained {
    let collected = tokio::spawn(async move {
        let mut items = Vec::new();
        while let Some(item) = collected.recv().await {
            items.push(item);
        }
        items
    });
    let progress = tokio::spawn(async move {
        let mut metrics = Vec::new();
        while let Some(metric) = progress.recv().await {
            metrics.push(metric);
        }
        metrics
    });
    Drained {
        collected: collected.await.expect("collected reader"),
        progress: progress.await.expect("progress reader"),
    }
}

fn finished_counts(metrics: &[CollectionMetric]) -> BTreeMap<Namespace, usize> {
    let mut counts = BTreeMap::new();
    for metric in metrics.iter().filter(|m| m.finished) {
        *counts.entry(metric.namespace).or_insert(0) += 1;
    }
    counts
}

fn manager(collectors: Vec<StaticCollector>) -> CollectorManager {
    CollectorManager::from_collectors(
        collectors
            .into_iter()
            .map(|c| Arc::new(c) as Arc<dyn Collector>)
            .collect(),
    )
}

#[tokio::test]
async fn entities_from_every_collector_are_merged() {
    let manager = manager(vec![
        StaticCollector::new(Namespace::Organization, vec!["acme", "globex", "initech"]),
        StaticCollector::new(Namespace::Repository, vec![]),
    ]);

    let channels = manager.collect();
    let out = tokio::time::timeout(COLLECT_TIMEOUT, drain(channels.collected, channels.progress))
        .await
        .expect("streams close");

    assert_eq!(out.collected.len(), 3);
    assert!(out.collected.iter().all(|d| d.namespace == Namespace::Organization));
    let mut names: Vec<&str> = out.collected.iter().map(|d| d.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["acme", "globex", "initech"]);

    assert_eq!(
        finished_counts(&out.progress),
        BTreeMap::from([(Namespace::Organization, 1), (Namespace::Repository, 1)])
    );
    let org_progress: usize = out
        .progress
        .iter()
        .filter(|m| m.namespace == Namespace::Organization)
        .map(|m| m.change)
        .sum();
    assert_eq!(org_progress, 3);
    assert!(manager.permission_log().is_empty());
}

#[tokio::test]
async fn finished_is_the_last_metric_of_its_namespace() {
    let manager = manager(vec![
        StaticCollector::new(Namespace::Member, vec!["a", "b"]).with_delay(Duration::from_millis(5)),
        StaticCollector::new(Namespace::Actions, vec!["c"]),
    ]);

    let channels = manager.collect();
    let out = tokio::time::timeout(COLLECT_TIMEOUT, drain(channels.collected, channels.progress))
        .await
        .expect("streams close");

    for namespace in [Namespace::Member, Namespace::Actions] {
        let metrics: Vec<&CollectionMetric> =
            out.progress.iter().filter(|m| m.namespace == namespace).collect();
        let last = metrics.last().expect("metrics for namespace");
        assert!(last.finished, "{namespace} should end with finished");
        assert_eq!(metrics.iter().filter(|m| m.finished).count(), 1);
    }
}

#[tokio::test]
async fn no_collectors_closes_both_streams() {
    let manager = CollectorManager::from_collectors(Vec::new());
    assert!(manager.namespaces().is_empty());

    let channels = manager.collect();
    let out = tokio::time::timeout(COLLECT_TIMEOUT, drain(channels.collected, channels.progress))
        .await
        .expect("streams close");

    assert!(out.collected.is_empty());
    assert!(out.progress.is_empty());
    assert!(manager.collect_metadata().await.is_empty());
}

#[tokio::test]
async fn missing_permissions_are_aggregated() {
    let hooks = MissingPermission::new(
        scope::ADMIN_REPO_HOOK,
        "acme/api",
        "Cannot read repository webhooks",
        Namespace::Repository,
    );
    let manager = manager(vec![
        StaticCollector::new(Namespace::Repository, vec!["acme/api"])
            .with_missing(hooks.clone())
            // Reported twice: the log keeps one.
            .with_missing(hooks),
        StaticCollector::new(Namespace::Organization, vec!["acme"]).with_missing(
            MissingPermission::new(
                scope::ADMIN_ORG,
                "acme",
                "Cannot read organization webhooks",
                Namespace::Organization,
            ),
        ),
    ]);

    let channels = manager.collect();
    let out = tokio::time::timeout(COLLECT_TIMEOUT, drain(channels.collected, channels.progress))
        .await
        .expect("streams close");
    assert_eq!(out.collected.len(), 2);

    let snapshot = manager.permission_log().snapshot();
    assert_eq!(snapshot.0.len(), 2);
    assert_eq!(
        snapshot.0[scope::ADMIN_REPO_HOOK]["repository:acme/api"],
        vec!["Cannot read repository webhooks".to_string()]
    );
    assert!(snapshot.0[scope::ADMIN_ORG].contains_key("organization:acme"));

    let report = manager.permission_log().report();
    assert!(report.contains("missing permission: \"admin:org\" on:"));
}

#[tokio::test]
async fn metadata_is_gathered_per_namespace() {
    let manager = manager(vec![
        StaticCollector::new(Namespace::Organization, vec!["acme", "globex"]),
        StaticCollector::new(Namespace::RunnerGroup, vec!["default"]),
    ]);

    let metadata = manager.collect_metadata().await;

    assert_eq!(metadata[&Namespace::Organization].total_entities, 2);
    assert_eq!(metadata[&Namespace::RunnerGroup].total_entities, 1);
    assert_eq!(manager.namespaces(), [Namespace::Organization, Namespace::RunnerGroup]);
}

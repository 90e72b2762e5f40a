//! Per-namespace collectors and the manager that runs them.
//!
//! A [`Collector`] enumerates every entity of one [`Namespace`] in a background
//! task and reports through three independent streams:
//!
//! - collected entities ([`CollectedData`]), one per item
//! - progress deltas ([`CollectionMetric`]), one per item
//! - missing-permission notices ([`MissingPermission`]), as they're hit
//!
//! All three close together when enumeration ends, error or not. The
//! [`CollectorManager`] runs the selected collectors side by side and merges
//! their output with a [`Multiplexer`] per collector.

pub mod actions;
pub mod enterprise;
#[cfg(test)]
pub(crate) mod fake;
mod group;
mod manager;
pub mod member;
mod multiplex;
pub mod organization;
mod registry;
pub mod repository;
pub mod runner_group;
pub mod scorecard;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::github::{ExtendedOrg, GitHubApi};
use crate::namespace::Namespace;
use crate::pagination::{ListOptions, NextPageStrategy, PageMeta, PageOptions, Paginator};
use crate::permissions::Role;
use crate::platform::{self, PlatformError};

pub use group::TaskGroup;
pub use manager::{CollectorManager, ManagerChannels};
pub use multiplex::{CollectorEvent, Multiplexer};
pub use registry::{CollectorConstructor, CollectorOptions, constructor, new_collector};
pub use repository::{InvalidRepository, RepositoryRef};

/// Capacity of each collector stream.
pub const COLLECTOR_CHANNEL_BUFFER: usize = 64;

/// Repository-only context flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFlags {
    pub is_branch_protection_supported: bool,
    pub has_branch_protection_permission: bool,
    pub scorecard_enabled: bool,
}

/// What the skip evaluator needs to know about the viewer and the tenant.
///
/// Immutable once built. Repository contexts go through
/// [`PendingRepositoryContext`] so the branch protection permission is known
/// before the context exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedDataContext {
    roles: Vec<Role>,
    premium: bool,
    repository: Option<RepositoryFlags>,
}

impl CollectedDataContext {
    #[must_use]
    pub fn new(roles: Vec<Role>, premium: bool) -> Self {
        Self {
            roles,
            premium,
            repository: None,
        }
    }

    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Enterprise-tier tenant.
    #[must_use]
    pub fn premium(&self) -> bool {
        self.premium
    }

    #[must_use]
    pub fn repository(&self) -> Option<&RepositoryFlags> {
        self.repository.as_ref()
    }
}

/// A repository context still waiting for its branch protection lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRepositoryContext {
    pub roles: Vec<Role>,
    pub premium: bool,
    pub is_branch_protection_supported: bool,
    pub scorecard_enabled: bool,
}

impl PendingRepositoryContext {
    /// Seal the context. Consumes `self`, so the flag is set exactly once.
    #[must_use]
    pub fn resolve(self, has_branch_protection_permission: bool) -> CollectedDataContext {
        CollectedDataContext {
            roles: self.roles,
            premium: self.premium,
            repository: Some(RepositoryFlags {
                is_branch_protection_supported: self.is_branch_protection_supported,
                has_branch_protection_permission,
                scorecard_enabled: self.scorecard_enabled,
            }),
        }
    }
}

/// One collected entity, ready for policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedData {
    pub entity: Value,
    /// Short display name (login, `owner/name`, slug, ...).
    pub name: String,
    pub namespace: Namespace,
    pub canonical_link: String,
    pub context: CollectedDataContext,
}

/// A progress delta for one namespace.
///
/// `finished` is sent exactly once per namespace, by the manager, and carries
/// no counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionMetric {
    pub namespace: Namespace,
    pub change: usize,
    pub total_change: usize,
    pub finished: bool,
}

impl CollectionMetric {
    #[must_use]
    pub fn finished(namespace: Namespace) -> Self {
        Self {
            namespace,
            change: 0,
            total_change: 0,
            finished: true,
        }
    }
}

/// A capability that was unavailable for one entity. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPermission {
    pub permission: String,
    pub entity: String,
    pub effect: String,
    pub namespace: Namespace,
}

impl MissingPermission {
    pub fn new(
        permission: impl Into<String>,
        entity: impl Into<String>,
        effect: impl Into<String>,
        namespace: Namespace,
    ) -> Self {
        Self {
            permission: permission.into(),
            entity: entity.into(),
            effect: effect.into(),
            namespace,
        }
    }
}

/// Best-effort size of a namespace, used only to size progress bars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub total_entities: usize,
}

/// The receiving ends of one collector run.
pub struct CollectorStreams {
    pub collected: mpsc::Receiver<CollectedData>,
    pub progress: mpsc::Receiver<CollectionMetric>,
    pub missing_permissions: mpsc::Receiver<MissingPermission>,
}

/// Enumerates every entity of one namespace.
#[async_trait]
pub trait Collector: Send + Sync {
    fn namespace(&self) -> Namespace;

    /// Cheap entity count. Failures degrade to zero.
    async fn collect_metadata(&self) -> Metadata;

    /// Start enumerating in the background and return the streams at once.
    fn collect(&self) -> CollectorStreams;
}

/// The sending ends of one collector run.
///
/// Cheap to clone into sub-tasks. The streams close once every clone is
/// dropped, so a collection body that waits for its sub-tasks closes all three
/// together.
#[derive(Clone)]
pub struct CollectorHandle {
    namespace: Namespace,
    collected: mpsc::Sender<CollectedData>,
    progress: mpsc::Sender<CollectionMetric>,
    missing_permissions: mpsc::Sender<MissingPermission>,
}

impl CollectorHandle {
    fn new(namespace: Namespace) -> (Self, CollectorStreams) {
        let (collected_tx, collected_rx) = mpsc::channel(COLLECTOR_CHANNEL_BUFFER);
        let (progress_tx, progress_rx) = mpsc::channel(COLLECTOR_CHANNEL_BUFFER);
        let (perm_tx, perm_rx) = mpsc::channel(COLLECTOR_CHANNEL_BUFFER);
        (
            Self {
                namespace,
                collected: collected_tx,
                progress: progress_tx,
                missing_permissions: perm_tx,
            },
            CollectorStreams {
                collected: collected_rx,
                progress: progress_rx,
                missing_permissions: perm_rx,
            },
        )
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Emit one entity.
    pub async fn collect_data<E: Serialize>(
        &self,
        entity: &E,
        name: impl Into<String>,
        canonical_link: impl Into<String>,
        context: CollectedDataContext,
    ) {
        let entity = match serde_json::to_value(entity) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(namespace = %self.namespace, error = %e, "Failed to serialize collected entity");
                return;
            }
        };
        let data = CollectedData {
            entity,
            name: name.into(),
            namespace: self.namespace,
            canonical_link: canonical_link.into(),
            context,
        };
        if self.collected.send(data).await.is_err() {
            tracing::debug!(namespace = %self.namespace, "Collected stream receiver dropped");
        }
    }

    pub async fn collection_change(&self, change: usize) {
        self.send_metric(change, 0).await;
    }

    pub async fn collection_change_by_one(&self) {
        self.collection_change(1).await;
    }

    /// Grow the expected total discovered mid-collection.
    pub async fn total_collection_change(&self, total: usize) {
        self.send_metric(0, total).await;
    }

    async fn send_metric(&self, change: usize, total_change: usize) {
        let metric = CollectionMetric {
            namespace: self.namespace,
            change,
            total_change,
            finished: false,
        };
        if self.progress.send(metric).await.is_err() {
            tracing::debug!(namespace = %self.namespace, "Progress stream receiver dropped");
        }
    }

    pub async fn issue_missing_permissions<I>(&self, permissions: I)
    where
        I: IntoIterator<Item = MissingPermission>,
    {
        for permission in permissions {
            tracing::debug!(
                namespace = %self.namespace,
                permission = %permission.permission,
                entity = %permission.entity,
                "Missing permission"
            );
            if self.missing_permissions.send(permission).await.is_err() {
                return;
            }
        }
    }

    pub async fn issue_missing_permission(&self, permission: MissingPermission) {
        self.issue_missing_permissions([permission]).await;
    }
}

/// The run's organizations, or `None` after logging why there are none.
pub(crate) async fn selected_organizations(
    client: &dyn GitHubApi,
    namespace: Namespace,
) -> Option<Vec<ExtendedOrg>> {
    match client.organizations().await {
        Ok(orgs) => Some(orgs),
        Err(e) => {
            tracing::error!(namespace = %namespace, error = %e, "Failed to collect organizations");
            None
        }
    }
}

/// Walk every page of a list endpoint starting from `options`.
pub(crate) async fn fetch_all<O, F, Fut, T>(options: O, fetch: F) -> platform::Result<Vec<T>>
where
    O: PageOptions + Default,
    F: Fn(O) -> Fut,
    Fut: Future<Output = platform::Result<(Vec<T>, PageMeta)>>,
{
    Paginator::new(fetch, NextPageStrategy, Some(options))
        .map_err(|e| PlatformError::internal(e.to_string()))?
        .sync()
        .await
        .into_result()
}

/// Like [`fetch_all`] for endpoints whose pages wrap the items in an envelope.
pub(crate) async fn fetch_all_mapped<F, Fut, T, U, M>(fetch: F, mapper: M) -> platform::Result<Vec<U>>
where
    F: Fn(ListOptions) -> Fut,
    Fut: Future<Output = platform::Result<(T, PageMeta)>>,
    M: Fn(T) -> Vec<U>,
{
    Paginator::with_mapper(fetch, NextPageStrategy, None, mapper)
        .map_err(|e| PlatformError::internal(e.to_string()))?
        .sync()
        .await
        .into_result()
}

/// Run `body` in a background task and hand back its streams immediately.
///
/// The streams close when `body` returns and every clone of the
/// [`CollectorHandle`] it was given has been dropped.
///
/// # Example
///
/// ```ignore
/// fn collect(&self) -> CollectorStreams {
///     let this = self.clone();
///     spawn_collection(self.namespace(), move |handle| this.run(handle))
/// }
/// ```
pub fn spawn_collection<F, Fut>(namespace: Namespace, body: F) -> CollectorStreams
where
    F: FnOnce(CollectorHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (handle, streams) = CollectorHandle::new(namespace);
    tokio::spawn(async move {
        tracing::debug!(namespace = %namespace, "Collection started");
        body(handle).await;
        tracing::debug!(namespace = %namespace, "Collection body returned");
    });
    streams
}

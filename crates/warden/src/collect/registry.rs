//! Namespace → collector constructor table.

use std::sync::Arc;

use super::actions::ActionsCollector;
use super::enterprise::EnterpriseCollector;
use super::member::MemberCollector;
use super::organization::OrganizationCollector;
use super::repository::{RepositoryCollector, RepositoryRef};
use super::runner_group::RunnerGroupCollector;
use super::scorecard::ScorecardRunner;
use super::Collector;
use crate::github::GitHubApi;
use crate::namespace::Namespace;

/// Run-wide knobs some collectors need.
#[derive(Debug, Clone, Default)]
pub struct CollectorOptions {
    /// Collect only these repositories instead of every org repository.
    pub repositories: Vec<RepositoryRef>,
    /// Enterprise slugs to collect.
    pub enterprises: Vec<String>,
    /// Attach Scorecard results to repositories.
    pub scorecard: Option<ScorecardRunner>,
}

pub type CollectorConstructor = fn(Arc<dyn GitHubApi>, &CollectorOptions) -> Arc<dyn Collector>;

/// The constructor registered for `namespace`.
#[must_use]
pub fn constructor(namespace: Namespace) -> CollectorConstructor {
    match namespace {
        Namespace::Organization => organization,
        Namespace::Enterprise => enterprise,
        Namespace::Repository => repository,
        Namespace::Member => member,
        Namespace::Actions => actions,
        Namespace::RunnerGroup => runner_group,
    }
}

pub fn new_collector(
    namespace: Namespace,
    client: Arc<dyn GitHubApi>,
    options: &CollectorOptions,
) -> Arc<dyn Collector> {
    constructor(namespace)(client, options)
}

fn organization(client: Arc<dyn GitHubApi>, _: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(OrganizationCollector::new(client))
}

fn enterprise(client: Arc<dyn GitHubApi>, options: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(EnterpriseCollector::new(client, options.enterprises.clone()))
}

fn repository(client: Arc<dyn GitHubApi>, options: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(RepositoryCollector::new(
        client,
        options.repositories.clone(),
        options.scorecard.clone(),
    ))
}

fn member(client: Arc<dyn GitHubApi>, _: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(MemberCollector::new(client))
}

fn actions(client: Arc<dyn GitHubApi>, _: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(ActionsCollector::new(client))
}

fn runner_group(client: Arc<dyn GitHubApi>, _: &CollectorOptions) -> Arc<dyn Collector> {
    Arc::new(RunnerGroupCollector::new(client))
}

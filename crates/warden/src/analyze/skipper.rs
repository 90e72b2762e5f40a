//! Decides whether a policy result applies to an entity at all.
//!
//! A result is skipped when the policy is ignored, when one of its
//! `prerequisites` doesn't hold for the entity, or when the token lacks one of
//! its `requiredScopes` for the viewer's roles. Checks run in that order and
//! stop at the first failure, so every skip has exactly one reason.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::engine::QueryResult;
use crate::collect::{CollectedData, RepositoryFlags};
use crate::issues::{SkipLog, SkipReason};
use crate::permissions::{TokenScopes, has_scope};

pub const PREREQUISITES_ANNOTATION: &str = "prerequisites";
pub const REQUIRED_SCOPES_ANNOTATION: &str = "requiredScopes";

/// A named condition a policy can require of the entity's context.
pub type Prerequisite = Arc<dyn Fn(&CollectedData) -> bool + Send + Sync>;

/// Run-wide facts the default prerequisites read.
#[derive(Debug, Clone, Default)]
pub struct SkipperSettings {
    pub ignored_policies: Vec<String>,
    pub scorecard_enabled: bool,
    /// Talking to github.com rather than an Enterprise Server.
    pub is_cloud: bool,
    pub enterprise_slug: Option<String>,
}

pub struct Skipper {
    ignored_policies: HashSet<String>,
    prerequisites: HashMap<String, Prerequisite>,
    scopes: TokenScopes,
    log: Arc<SkipLog>,
}

impl Skipper {
    pub fn new(settings: SkipperSettings, scopes: TokenScopes, log: Arc<SkipLog>) -> Self {
        let mut skipper = Self {
            ignored_policies: settings.ignored_policies.iter().cloned().collect(),
            prerequisites: HashMap::new(),
            scopes,
            log,
        };

        let SkipperSettings {
            scorecard_enabled,
            is_cloud,
            enterprise_slug,
            ..
        } = settings;
        let has_enterprise_slug = enterprise_slug.is_some_and(|slug| !slug.is_empty());

        skipper.insert_prerequisite("premium", |data| data.context.premium());
        skipper.insert_prerequisite("scorecard_enabled", move |_| scorecard_enabled);
        skipper.insert_prerequisite("has_branch_protection_permission", |data| {
            repository_flags(data).is_some_and(|flags| flags.has_branch_protection_permission)
        });
        skipper.insert_prerequisite("is_branch_protection_supported", |data| {
            repository_flags(data).is_some_and(|flags| flags.is_branch_protection_supported)
        });
        skipper.insert_prerequisite("enterprise", move |_| !is_cloud);
        skipper.insert_prerequisite("enterprise_slug", move |_| has_enterprise_slug);
        skipper
    }

    /// Add or replace the predicate behind a prerequisite name.
    pub fn insert_prerequisite<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&CollectedData) -> bool + Send + Sync + 'static,
    {
        self.prerequisites.insert(name.into(), Arc::new(predicate));
    }

    #[must_use]
    pub fn with_prerequisite<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&CollectedData) -> bool + Send + Sync + 'static,
    {
        self.insert_prerequisite(name, predicate);
        self
    }

    #[must_use]
    pub fn skip_log(&self) -> Arc<SkipLog> {
        Arc::clone(&self.log)
    }

    /// Whether `result` should be reported as skipped for `data`.
    ///
    /// Skips other than ignored policies are recorded in the skip log.
    pub fn should_skip(&self, data: &CollectedData, result: &QueryResult) -> bool {
        if self.ignored_policies.contains(&result.policy_name) {
            return true;
        }
        match self.skip_reason(data, result) {
            Some(reason) => {
                tracing::debug!(
                    policy = %result.policy_name,
                    entity = %data.name,
                    reason = %reason,
                    "Skipping policy"
                );
                self.log.record(&result.policy_name, &data.name, reason);
                true
            }
            None => false,
        }
    }

    fn skip_reason(&self, data: &CollectedData, result: &QueryResult) -> Option<SkipReason> {
        for name in result.annotations.resolve(PREREQUISITES_ANNOTATION) {
            let satisfied = self
                .prerequisites
                .get(&name)
                .is_some_and(|predicate| predicate(data));
            if !satisfied {
                return Some(SkipReason::Prerequisite(name));
            }
        }

        result
            .annotations
            .resolve(REQUIRED_SCOPES_ANNOTATION)
            .into_iter()
            .find(|scope| !has_scope(scope, &self.scopes, data.context.roles()))
            .map(SkipReason::Permission)
    }
}

fn repository_flags(data: &CollectedData) -> Option<&RepositoryFlags> {
    let flags = data.context.repository();
    if flags.is_none() {
        tracing::warn!(
            namespace = %data.namespace,
            entity = %data.name,
            "Repository prerequisite used on a non-repository entity"
        );
    }
    flags
}

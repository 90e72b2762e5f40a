use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Mutex;

use serde::Serialize;

use crate::collect::MissingPermission;

type Effects = BTreeSet<String>;
type Entities = BTreeMap<String, Effects>;

/// Process-wide aggregation of missing-permission notices.
///
/// Keyed `permission -> "namespace:entity" -> effects`; both levels iterate in
/// sorted order. Recording the same notice twice is a no-op.
#[derive(Debug, Default)]
pub struct PermissionLog {
    permissions: Mutex<BTreeMap<String, Entities>>,
}

impl PermissionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, issue: &MissingPermission) {
        let entity = format!("{}:{}", issue.namespace, issue.entity);
        let mut permissions = match self.permissions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        permissions
            .entry(issue.permission.clone())
            .or_default()
            .entry(entity)
            .or_default()
            .insert(issue.effect.clone());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Sorted copy of the log with empty effects dropped.
    #[must_use]
    pub fn snapshot(&self) -> PermissionSnapshot {
        let permissions = match self.permissions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        PermissionSnapshot(
            permissions
                .iter()
                .map(|(permission, entities)| {
                    let entities = entities
                        .iter()
                        .map(|(entity, effects)| {
                            let effects = effects
                                .iter()
                                .filter(|e| !e.is_empty())
                                .cloned()
                                .collect();
                            (entity.clone(), effects)
                        })
                        .collect();
                    (permission.clone(), entities)
                })
                .collect(),
        )
    }

    /// Human-readable report, one block per permission.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (permission, entities) in &self.snapshot().0 {
            let _ = writeln!(out, "missing permission: \"{permission}\" on:");
            for (entity, effects) in entities {
                let effects: Vec<&str> = effects.iter().map(String::as_str).collect();
                let _ = writeln!(out, "    - {entity} [{}]", effects.join(", "));
            }
        }
        out
    }
}

/// Serializable view of a [`PermissionLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSnapshot(pub BTreeMap<String, BTreeMap<String, Vec<String>>>);

impl PermissionSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Serialize, Serializer};

/// Why a policy wasn't evaluated for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Prerequisite(String),
    Permission(String),
}

impl SkipReason {
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            SkipReason::Prerequisite(_) => "Unmet prerequisite",
            SkipReason::Permission(_) => "Missing permission",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            SkipReason::Prerequisite(r) | SkipReason::Permission(r) => r,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.prefix(), self.reason())
    }
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `policy -> entity -> reason`, last reason wins.
#[derive(Debug, Default)]
pub struct SkipLog {
    policies: Mutex<BTreeMap<String, BTreeMap<String, SkipReason>>>,
}

impl SkipLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, policy: &str, entity: &str, reason: SkipReason) {
        let mut policies = match self.policies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        policies
            .entry(policy.to_string())
            .or_default()
            .insert(entity.to_string(), reason);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, SkipReason>> {
        match self.policies.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn get(&self, policy: &str, entity: &str) -> Option<SkipReason> {
        self.snapshot().get(policy)?.get(entity).cloned()
    }
}

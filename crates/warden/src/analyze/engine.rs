use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::namespace::Namespace;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("policy engine failed: {0}")]
    Query(String),

    #[error("failed to run policy engine: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid policy engine output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Metadata a policy declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `severity`, `prerequisites`, `requiredScopes`, `remediationSteps`, ...
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl Annotations {
    /// A custom annotation as a string list.
    ///
    /// A single string is a one-element list; non-string list items and any
    /// other shape are ignored.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Vec<String> {
        match self.custom.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One policy's verdict on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub policy_name: String,
    pub fully_qualified_policy_name: String,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub extra_data: Value,
    pub is_violation: bool,
}

/// The external policy evaluator.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate every policy of `namespace` against `entity`.
    async fn query(&self, namespace: Namespace, entity: &Value) -> Result<Vec<QueryResult>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn annotations_resolve_strings_and_lists() {
        let annotations: Annotations = serde_json::from_value(json!({
            "title": "Webhooks should use TLS",
            "custom": {
                "prerequisites": "premium",
                "requiredScopes": ["admin:org_hook", 3, "read:org"],
                "severity": { "nested": true }
            }
        }))
        .expect("annotations");

        assert_eq!(annotations.resolve("prerequisites"), vec!["premium"]);
        assert_eq!(annotations.resolve("requiredScopes"), vec!["admin:org_hook", "read:org"]);
        assert!(annotations.resolve("severity").is_empty());
        assert!(annotations.resolve("remediationSteps").is_empty());
    }

    #[test]
    fn query_results_use_camel_case_on_the_wire() {
        let result: QueryResult = serde_json::from_value(json!({
            "policyName": "repository_not_maintained",
            "fullyQualifiedPolicyName": "data.repository.repository_not_maintained",
            "isViolation": true
        }))
        .expect("query result");

        assert!(result.is_violation);
        assert_eq!(result.annotations, Annotations::default());
        assert!(result.extra_data.is_null());
    }
}

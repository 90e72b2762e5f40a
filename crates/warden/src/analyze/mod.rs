//! Policy evaluation of collected entities.
//!
//! The [`Analyzer`] sends each [`CollectedData`] to the external
//! [`PolicyEngine`] and turns every returned [`QueryResult`] into an
//! [`AnalyzedData`] whose status accounts for the [`Skipper`].

mod engine;
mod skipper;

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::collect::{CollectedData, TaskGroup};
use crate::namespace::Namespace;

pub use engine::{Annotations, EngineError, PolicyEngine, QueryResult};
pub use skipper::{
    PREREQUISITES_ANNOTATION, Prerequisite, REQUIRED_SCOPES_ANNOTATION, Skipper, SkipperSettings,
};

/// Capacity of the analyzed-data stream.
pub const ANALYZED_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyStatus {
    Passed,
    Failed,
    Skipped,
}

impl PolicyStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Passed => "PASSED",
            PolicyStatus::Failed => "FAILED",
            PolicyStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PolicyStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// The `severity` annotation of `result`, `Unknown` when absent or invalid.
    #[must_use]
    pub fn resolve(result: &QueryResult) -> Self {
        match result.annotations.custom.get("severity") {
            Some(Value::String(raw)) => Severity::parse(raw).unwrap_or_else(|| {
                tracing::warn!(
                    policy = %result.fully_qualified_policy_name,
                    severity = %raw,
                    "Invalid severity value"
                );
                Severity::Unknown
            }),
            other => {
                tracing::warn!(
                    policy = %result.fully_qualified_policy_name,
                    severity = ?other,
                    "Invalid severity type"
                );
                Severity::Unknown
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One policy's outcome for one entity.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedData {
    pub entity: Value,
    pub entity_name: String,
    pub namespace: Namespace,
    pub policy_name: String,
    pub fully_qualified_policy_name: String,
    pub title: String,
    pub description: String,
    pub annotations: Annotations,
    pub required_enrichers: Vec<String>,
    pub remediation_steps: Vec<String>,
    pub severity: Severity,
    pub canonical_link: String,
    pub extra_data: Value,
    pub status: PolicyStatus,
}

impl AnalyzedData {
    fn new(data: &CollectedData, result: QueryResult, status: PolicyStatus) -> Self {
        Self {
            entity: data.entity.clone(),
            entity_name: data.name.clone(),
            namespace: data.namespace,
            severity: Severity::resolve(&result),
            required_enrichers: result.annotations.resolve("requiredEnrichers"),
            remediation_steps: result.annotations.resolve("remediationSteps"),
            title: result.annotations.title.clone(),
            description: result.annotations.description.clone(),
            canonical_link: data.canonical_link.clone(),
            policy_name: result.policy_name,
            fully_qualified_policy_name: result.fully_qualified_policy_name,
            annotations: result.annotations,
            extra_data: result.extra_data,
            status,
        }
    }
}

pub struct Analyzer {
    engine: Arc<dyn PolicyEngine>,
    skipper: Arc<Skipper>,
}

impl Analyzer {
    pub fn new(engine: Arc<dyn PolicyEngine>, skipper: Arc<Skipper>) -> Self {
        Self { engine, skipper }
    }

    /// Evaluate every entity from `collected` as it arrives.
    ///
    /// Each entity is evaluated in its own task. The output closes once the
    /// input has closed and every evaluation is done. An engine failure drops
    /// that entity's results and is logged.
    pub fn analyze(&self, mut collected: mpsc::Receiver<CollectedData>) -> mpsc::Receiver<AnalyzedData> {
        let (tx, rx) = mpsc::channel(ANALYZED_CHANNEL_BUFFER);
        let engine = Arc::clone(&self.engine);
        let skipper = Arc::clone(&self.skipper);

        tokio::spawn(async move {
            let mut group = TaskGroup::new();
            while let Some(data) = collected.recv().await {
                let engine = Arc::clone(&engine);
                let skipper = Arc::clone(&skipper);
                let tx = tx.clone();
                group.spawn(async move {
                    let results = match engine.query(data.namespace, &data.entity).await {
                        Ok(results) => results,
                        Err(e) => {
                            tracing::error!(namespace = %data.namespace, entity = %data.name, error = %e, "Failed to evaluate policies");
                            return;
                        }
                    };
                    for result in results {
                        let status = resolve_status(&skipper, &data, &result);
                        if tx.send(AnalyzedData::new(&data, result, status)).await.is_err() {
                            return;
                        }
                    }
                });
            }
            group.wait().await;
        });

        rx
    }
}

fn resolve_status(skipper: &Skipper, data: &CollectedData, result: &QueryResult) -> PolicyStatus {
    if skipper.should_skip(data, result) {
        PolicyStatus::Skipped
    } else if result.is_violation {
        PolicyStatus::Failed
    } else {
        PolicyStatus::Passed
    }
}

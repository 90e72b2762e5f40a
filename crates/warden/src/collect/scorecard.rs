//! OpenSSF Scorecard enrichment for repositories.
//!
//! Runs the `scorecard` CLI per repository and attaches its JSON result to the
//! entity. Public repositories get the full check set; private ones only the
//! checks that work without public metadata.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

const COMMON_CHECKS: &[&str] = &[
    "Binary-Artifacts",
    "Branch-Protection",
    "Code-Review",
    "Contributors",
    "Dangerous-Workflow",
    "Dependency-Update-Tool",
    "Maintained",
    "Pinned-Dependencies",
    "SAST",
    "Token-Permissions",
    "Vulnerabilities",
    "Webhooks",
];

const PUBLIC_ONLY_CHECKS: &[&str] = &[
    "Packaging",
    "Security-Policy",
    "CII-Best-Practices",
    "Fuzzing",
    "License",
    "Signed-Releases",
];

#[derive(Debug, Error)]
pub enum ScorecardError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scorecard exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to parse scorecard output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Scorecard output: the aggregate score plus the raw report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorecardResult {
    pub score: f64,
    #[serde(flatten)]
    pub report: serde_json::Map<String, Value>,
}

/// Invokes the scorecard binary with the run's token.
#[derive(Debug, Clone)]
pub struct ScorecardRunner {
    program: String,
    auth_token: String,
}

impl ScorecardRunner {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self::with_program("scorecard", auth_token)
    }

    pub fn with_program(program: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            auth_token: auth_token.into(),
        }
    }

    /// The `--checks` value for a repository of the given visibility.
    #[must_use]
    pub fn checks(private: bool) -> String {
        let mut checks = COMMON_CHECKS.to_vec();
        if !private {
            checks.extend_from_slice(PUBLIC_ONLY_CHECKS);
        }
        checks.join(",")
    }

    pub async fn run(&self, repo_url: &str, private: bool) -> Result<ScorecardResult, ScorecardError> {
        tracing::debug!(repo = %repo_url, "Running scorecard");
        let output = Command::new(&self.program)
            .arg(format!("--repo={repo_url}"))
            .arg(format!("--checks={}", Self::checks(private)))
            .arg("--format=json")
            .env("GITHUB_AUTH_TOKEN", &self.auth_token)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ScorecardError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ScorecardError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

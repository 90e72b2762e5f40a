//! Non-fatal issues gathered during a run: missing permissions and skipped
//! policies.

mod perm_log;
mod skip_log;

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;
use thiserror::Error;

pub use perm_log::{PermissionLog, PermissionSnapshot};
pub use skip_log::{SkipLog, SkipReason};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("failed to serialize issue report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write issue report: {0}")]
    Io(#[from] std::io::Error),
}

/// The machine-readable issue dump.
#[derive(Debug, Serialize)]
pub struct IssueReport {
    pub missing_permissions: PermissionSnapshot,
    pub skipped_policies: BTreeMap<String, BTreeMap<String, SkipReason>>,
}

impl IssueReport {
    #[must_use]
    pub fn new(permissions: &PermissionLog, skips: &SkipLog) -> Self {
        Self {
            missing_permissions: permissions.snapshot(),
            skipped_policies: skips.snapshot(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_permissions.is_empty() && self.skipped_policies.is_empty()
    }

    /// Write pretty JSON to `writer` unless there is nothing to report.
    ///
    /// Returns whether anything was written.
    pub fn flush<W: Write>(&self, mut writer: W) -> Result<bool, IssueError> {
        if self.is_empty() {
            return Ok(false);
        }
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(true)
    }
}

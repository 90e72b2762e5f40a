//! Policy evaluation by an external command.
//!
//! The command receives `{"namespace": ..., "entity": ...}` on stdin and must
//! print a JSON array of query results on stdout.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use warden::analyze::EngineError;
use warden::{Namespace, PolicyEngine, QueryResult};

pub(crate) struct CommandEngine {
    program: String,
    args: Vec<String>,
    permits: Arc<Semaphore>,
}

impl CommandEngine {
    pub(crate) fn new(program: impl Into<String>, args: Vec<String>, max_concurrency: usize) -> Self {
        Self {
            program: program.into(),
            args,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

#[async_trait]
impl PolicyEngine for CommandEngine {
    async fn query(&self, namespace: Namespace, entity: &Value) -> Result<Vec<QueryResult>, EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EngineError::Query(e.to_string()))?;

        let input = serde_json::to_vec(&json!({ "namespace": namespace, "entity": entity }))?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Query("engine stdin unavailable".into()))?;
        // Feed stdin while draining stdout so a chatty engine can't block on a full pipe.
        let write = async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(EngineError::Query(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if let Err(e) = written
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let results: Vec<QueryResult> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(namespace = %namespace, results = results.len(), "Policy engine answered");
        Ok(results)
    }
}

use std::future::Future;

use tokio::task::{JoinError, JoinSet};

/// Launch N tasks, then wait for all of them.
///
/// `wait` never returns early and never cancels a straggler; a slow task just
/// delays it. A panicking task is logged and doesn't affect the others.
#[derive(Default)]
pub struct TaskGroup {
    tasks: JoinSet<()>,
}

impl TaskGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(panic_info = %join_error_message(e), "Task failed");
            }
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_cancelled() {
        return "Task was cancelled".to_string();
    }
    match e.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            }
        }
        Err(e) => format!("Task failed: {e}"),
    }
}

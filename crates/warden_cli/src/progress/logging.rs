use tokio::sync::mpsc;
use warden::{CollectionMetric, Namespace};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub(super) fn namespace_log(&self, namespace: Namespace, total: usize) -> NamespaceLog {
        tracing::info!(namespace = %namespace, total, "Collecting");
        NamespaceLog {
            namespace,
            total,
            collected: 0,
        }
    }
}

/// Per-namespace counters behind the log lines.
pub(super) struct NamespaceLog {
    namespace: Namespace,
    total: usize,
    collected: usize,
}

impl NamespaceLog {
    pub(super) async fn render(mut self, mut rx: mpsc::UnboundedReceiver<CollectionMetric>) {
        while let Some(metric) = rx.recv().await {
            self.apply(&metric);
            if metric.finished {
                tracing::info!(
                    namespace = %self.namespace,
                    collected = self.collected,
                    total = self.total,
                    "Collection finished"
                );
                return;
            }
        }
        tracing::warn!(
            namespace = %self.namespace,
            collected = self.collected,
            total = self.total,
            "Progress stream closed before collection finished"
        );
    }

    fn apply(&mut self, metric: &CollectionMetric) {
        self.total += metric.total_change;
        self.collected += metric.change;
        if metric.change > 0 {
            tracing::debug!(
                namespace = %self.namespace,
                collected = self.collected,
                total = self.total,
                "Collected"
            );
        }
    }
}

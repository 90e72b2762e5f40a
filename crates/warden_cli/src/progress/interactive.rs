use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use warden::{CollectionMetric, Namespace};

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// A bar sized to `total`, or a counting spinner when the total is unknown.
    pub(super) fn bar(&self, namespace: Namespace, total: usize) -> ProgressBar {
        let pb = if total > 0 {
            let bar = self.multi.add(ProgressBar::new(total as u64));
            bar.set_style(Self::bar_style());
            bar
        } else {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(Self::counter_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        pb.set_prefix(format!("{:14}", namespace.to_string()));
        pb.set_message("collecting...");
        pb
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {pos:>4} {msg}")
            .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `bar` until its namespace finishes.
///
/// A finished namespace is shown complete even when fewer entities arrived
/// than estimated, since estimates count entities that may be filtered later.
pub(super) async fn render(bar: ProgressBar, mut rx: mpsc::UnboundedReceiver<CollectionMetric>) {
    while let Some(metric) = rx.recv().await {
        if metric.total_change > 0 {
            bar.inc_length(metric.total_change as u64);
        }
        bar.inc(metric.change as u64);
        if metric.finished {
            if let Some(len) = bar.length() {
                bar.set_position(len);
            }
            bar.finish_with_message("✓ done");
            return;
        }
    }
    if !bar.is_finished() {
        bar.abandon_with_message("incomplete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(change: usize, total_change: usize, finished: bool) -> CollectionMetric {
        CollectionMetric {
            namespace: Namespace::Repository,
            change,
            total_change,
            finished,
        }
    }

    #[tokio::test]
    async fn finished_completes_the_bar() {
        let bar = ProgressBar::hidden();
        bar.set_length(10);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(metric(3, 0, false)).expect("send");
        tx.send(metric(0, 5, false)).expect("send");
        tx.send(metric(0, 0, true)).expect("send");

        render(bar.clone(), rx).await;

        assert!(bar.is_finished());
        assert_eq!(bar.length(), Some(15));
        assert_eq!(bar.position(), 15);
    }

    #[tokio::test]
    async fn closed_stream_abandons_the_bar() {
        let bar = ProgressBar::hidden();
        bar.set_length(4);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(metric(1, 0, false)).expect("send");
        drop(tx);

        render(bar.clone(), rx).await;

        assert!(bar.is_finished());
        assert_eq!(bar.position(), 1);
    }
}

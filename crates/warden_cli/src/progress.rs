//! Progress reporting for collection runs.
//!
//! This module provides two modes of progress reporting:
//! - Interactive mode (TTY): one indicatif bar per namespace
//! - Logging mode (non-TTY): structured logging using tracing
//!
//! Renderers are created up front from the collection metadata and
//! registered with a [`ProgressWaiter`] so the caller can wait for every one
//! of them to finish.

mod interactive;
mod logging;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use console::Term;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warden::{CollectionMetric, Metadata, Namespace, ProgressWaiter};

pub use interactive::InteractiveReporter;
pub use logging::LoggingReporter;

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Interactive progress bars for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Bars when stderr is a terminal, log lines otherwise.
    pub fn new() -> Self {
        if Term::stderr().is_term() {
            Self::Interactive(InteractiveReporter::new())
        } else {
            Self::Logging(LoggingReporter)
        }
    }

    fn renderer(&self, namespace: Namespace, total: usize) -> Renderer {
        match self {
            Self::Interactive(r) => Renderer::Bar(r.bar(namespace, total)),
            Self::Logging(r) => Renderer::Log(r.namespace_log(namespace, total)),
        }
    }

    /// Route `progress` to one renderer per namespace.
    ///
    /// Every namespace in `totals` gets its renderer as soon as the router
    /// starts, so a collector that is slow to produce its first entity still
    /// counts towards the gate. A namespace missing from `totals` gets one on
    /// its first metric. The returned task ends when the stream closes; each
    /// renderer ends when its namespace reports `finished` or the stream
    /// closes.
    pub fn track(
        self: &Arc<Self>,
        waiter: Arc<ProgressWaiter>,
        totals: BTreeMap<Namespace, Metadata>,
        mut progress: mpsc::Receiver<CollectionMetric>,
    ) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let spawn = |namespace: Namespace, total: usize| {
                let (tx, rx) = mpsc::unbounded_channel();
                waiter.spawn_renderer(reporter.renderer(namespace, total).run(rx));
                tx
            };
            let mut routes: HashMap<Namespace, mpsc::UnboundedSender<CollectionMetric>> = totals
                .iter()
                .map(|(namespace, metadata)| (*namespace, spawn(*namespace, metadata.total_entities)))
                .collect();

            while let Some(metric) = progress.recv().await {
                let route = routes
                    .entry(metric.namespace)
                    .or_insert_with(|| spawn(metric.namespace, 0));
                if route.send(metric).is_err() {
                    tracing::debug!(namespace = %metric.namespace, "Renderer already finished");
                }
            }
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

enum Renderer {
    Bar(indicatif::ProgressBar),
    Log(logging::NamespaceLog),
}

impl Renderer {
    async fn run(self, rx: mpsc::UnboundedReceiver<CollectionMetric>) {
        match self {
            Renderer::Bar(bar) => interactive::render(bar, rx).await,
            Renderer::Log(log) => log.render(rx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metric(namespace: Namespace, change: usize, finished: bool) -> CollectionMetric {
        CollectionMetric {
            namespace,
            change,
            total_change: 0,
            finished,
        }
    }

    #[tokio::test]
    async fn one_renderer_per_namespace_opens_the_gate() {
        let reporter = Arc::new(ProgressReporter::Logging(LoggingReporter));
        let waiter = Arc::new(ProgressWaiter::new());
        waiter.set_min_count(2);
        let totals = BTreeMap::from([
            (Namespace::Organization, Metadata { total_entities: 2 }),
            (Namespace::Member, Metadata { total_entities: 1 }),
        ]);

        let (tx, rx) = mpsc::channel(16);
        let router = reporter.track(Arc::clone(&waiter), totals, rx);
        for m in [
            metric(Namespace::Organization, 1, false),
            metric(Namespace::Member, 1, false),
            metric(Namespace::Organization, 1, false),
            metric(Namespace::Member, 0, true),
            metric(Namespace::Organization, 0, true),
        ] {
            tx.send(m).await.expect("router open");
        }
        drop(tx);

        router.await.expect("router");
        waiter
            .wait(Duration::from_secs(5))
            .await
            .expect("gate opens");
        assert_eq!(waiter.gate().created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_namespace_times_out() {
        let reporter = Arc::new(ProgressReporter::Logging(LoggingReporter));
        let waiter = Arc::new(ProgressWaiter::new());
        waiter.set_min_count(2);

        let (tx, rx) = mpsc::channel(4);
        let router = reporter.track(Arc::clone(&waiter), BTreeMap::new(), rx);
        tx.send(metric(Namespace::Actions, 0, true))
            .await
            .expect("router open");
        drop(tx);
        router.await.expect("router");

        assert!(waiter.wait(Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_first_entity_does_not_trip_the_gate() {
        let reporter = Arc::new(ProgressReporter::Logging(LoggingReporter));
        let waiter = Arc::new(ProgressWaiter::new());
        waiter.set_min_count(1);
        let totals = BTreeMap::from([(Namespace::Repository, Metadata { total_entities: 3 })]);

        let (tx, rx) = mpsc::channel(4);
        let _router = reporter.track(Arc::clone(&waiter), totals, rx);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(warden::DEFAULT_GATE_TIMEOUT + Duration::from_secs(1)).await;
            tx.send(metric(Namespace::Repository, 1, false)).await.expect("router open");
            tx.send(metric(Namespace::Repository, 0, true)).await.expect("router open");
        });

        waiter
            .wait(warden::DEFAULT_GATE_TIMEOUT)
            .await
            .expect("renderer exists before the first metric");
        producer.await.expect("producer");
        assert_eq!(waiter.gate().created(), 1);
    }
}

use tokio::sync::mpsc;

use super::{CollectedData, CollectionMetric, CollectorStreams, MissingPermission};

/// One item from any of a collector's three streams.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    Collected(CollectedData),
    Progress(CollectionMetric),
    MissingPermission(MissingPermission),
}

/// Forwards from whichever of a collector's streams is ready.
///
/// A closed stream is excluded for good. [`Multiplexer::next`] returns `None`
/// once all three are closed.
pub struct Multiplexer {
    collected: Option<mpsc::Receiver<CollectedData>>,
    progress: Option<mpsc::Receiver<CollectionMetric>>,
    missing_permissions: Option<mpsc::Receiver<MissingPermission>>,
}

impl Multiplexer {
    #[must_use]
    pub fn new(streams: CollectorStreams) -> Self {
        Self {
            collected: Some(streams.collected),
            progress: Some(streams.progress),
            missing_permissions: Some(streams.missing_permissions),
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.collected.is_none() && self.progress.is_none() && self.missing_permissions.is_none()
    }

    pub async fn next(&mut self) -> Option<CollectorEvent> {
        loop {
            if self.is_exhausted() {
                return None;
            }

            tokio::select! {
                item = recv(&mut self.collected), if self.collected.is_some() => match item {
                    Some(data) => return Some(CollectorEvent::Collected(data)),
                    None => self.collected = None,
                },
                item = recv(&mut self.progress), if self.progress.is_some() => match item {
                    Some(metric) => return Some(CollectorEvent::Progress(metric)),
                    None => self.progress = None,
                },
                item = recv(&mut self.missing_permissions), if self.missing_permissions.is_some() => match item {
                    Some(perm) => return Some(CollectorEvent::MissingPermission(perm)),
                    None => self.missing_permissions = None,
                },
            }
        }
    }
}

async fn recv<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

//! Synchronization between lazily created progress renderers and the caller
//! waiting for them.
//!
//! Renderers (one per namespace) are registered from another task, so "wait
//! for every renderer" could return before the first one is even created. The [`ThresholdGate`] closes that window: waiting first
//! blocks until the expected number of renderers has been registered, then
//! joins them. A gate that never opens is a wiring bug, so waiting on it is
//! bounded by a timeout.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long [`ProgressWaiter::wait`] waits for the gate by default.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error(
        "progress bars were not created in time ({created} of {expected:?} after {timeout:?}), this is a bug"
    )]
    GateTimeout {
        timeout: Duration,
        created: usize,
        expected: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct GateState {
    count: usize,
    min_count: Option<usize>,
    open: bool,
}

impl GateState {
    /// Opens once, the first time the threshold is known and met.
    fn recheck(&mut self) -> bool {
        if !self.open
            && let Some(min) = self.min_count
            && self.count >= min
        {
            self.open = true;
            return true;
        }
        false
    }
}

/// A one-shot gate that opens when `count >= min_count`.
///
/// Stays closed until [`set_min_count`](Self::set_min_count) has been called,
/// and never closes again once open.
#[derive(Debug)]
pub struct ThresholdGate {
    state: watch::Sender<GateState>,
}

impl ThresholdGate {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state }
    }

    pub fn report_created(&self) {
        self.state.send_if_modified(|state| {
            state.count += 1;
            state.recheck()
        });
    }

    pub fn set_min_count(&self, min_count: usize) {
        self.state.send_if_modified(|state| {
            state.min_count = Some(min_count);
            state.recheck()
        });
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.state.borrow().count
    }

    /// Resolve once the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel can't close under us.
        let _ = rx.wait_for(|state| state.open).await;
    }
}

impl Default for ThresholdGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The gate plus the renderer tasks it counts.
#[derive(Debug, Default)]
pub struct ProgressWaiter {
    gate: ThresholdGate,
    renderers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProgressWaiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `min_count` renderers before [`wait`](Self::wait) may proceed.
    pub fn set_min_count(&self, min_count: usize) {
        self.gate.set_min_count(min_count);
    }

    /// Start a renderer task and count it towards the gate.
    pub fn spawn_renderer<F>(&self, renderer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(renderer);
        self.renderers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        self.gate.report_created();
    }

    #[must_use]
    pub fn gate(&self) -> &ThresholdGate {
        &self.gate
    }

    /// Wait for the gate, then for every renderer to finish.
    ///
    /// Fails with [`ProgressError::GateTimeout`] if the gate is still closed
    /// after `timeout`; renderers are not joined in that case.
    pub async fn wait(&self, timeout: Duration) -> Result<(), ProgressError> {
        if tokio::time::timeout(timeout, self.gate.wait()).await.is_err() {
            let state = *self.gate.state.borrow();
            return Err(ProgressError::GateTimeout {
                timeout,
                created: state.count,
                expected: state.min_count,
            });
        }

        let renderers = std::mem::take(&mut *self.renderers.lock().unwrap_or_else(|e| e.into_inner()));
        for renderer in renderers {
            if let Err(e) = renderer.await {
                tracing::error!(error = %e, "Progress renderer failed");
            }
        }
        Ok(())
    }
}

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use staking_types::{Hex, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::refresh::{self, Refresher};
use crate::{
    error_text, FailureKind, PendingTransaction, TrackerError, TxEvent, TxEventHandler, TxSnapshot,
    TxStatus, ABANDONED_ERROR,
};

/// Drives one write action through submission, confirmation and refresh.
///
/// Clones share the same slot: a run started through one clone is seen as
/// in flight by all of them.
pub struct TransactionTracker<R> {
    label: String,
    confirmations: u32,
    refreshers: Vec<Refresher<R>>,
    on_event: Option<TxEventHandler>,
    state: Arc<watch::Sender<TxSnapshot<R>>>,
    pending_refresh: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<R> Clone for TransactionTracker<R> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            confirmations: self.confirmations,
            refreshers: self.refreshers.clone(),
            on_event: self.on_event.clone(),
            state: Arc::clone(&self.state),
            pending_refresh: Arc::clone(&self.pending_refresh),
        }
    }
}

impl<R> TransactionTracker<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TxSnapshot::default());
        Self {
            label: label.into(),
            confirmations: 1,
            refreshers: Vec::new(),
            on_event: None,
            state: Arc::new(state),
            pending_refresh: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_refresher(mut self, refresher: Refresher<R>) -> Self {
        self.refreshers.push(refresher);
        self
    }

    pub fn with_event_handler(mut self, handler: TxEventHandler) -> Self {
        self.on_event = Some(handler);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    pub fn snapshot(&self) -> TxSnapshot<R> {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> TxStatus {
        self.state.borrow().status
    }

    pub fn is_submitting(&self) -> bool {
        self.status() == TxStatus::Submitting
    }

    /// Receive every state change of this slot.
    pub fn subscribe(&self) -> watch::Receiver<TxSnapshot<R>> {
        self.state.subscribe()
    }

    /// Submit a write and follow it to a terminal status.
    ///
    /// Fails with [`TrackerError::AlreadyInFlight`] without invoking
    /// `operation` if this slot is still submitting. Every other failure ends
    /// up in the returned snapshot as `Failed` with its message.
    ///
    /// Dropping the returned future before it completes fails the slot with
    /// [`ABANDONED_ERROR`]. Refreshers need a Tokio runtime; without one they
    /// are skipped.
    pub async fn run<F, Fut, H>(&self, operation: F) -> std::result::Result<TxSnapshot<R>, TrackerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H>>,
        H: PendingTransaction<Receipt = R>,
    {
        if !self.begin() {
            debug!(tx = %self.label, "rejected: already in flight");
            return Err(TrackerError::AlreadyInFlight);
        }
        let mut guard = InFlight {
            tracker: self,
            stage: FailureKind::Submission,
            armed: true,
        };
        self.emit(TxEvent::Submitting {
            label: self.label.clone(),
        });

        let handle = match operation().await {
            Ok(handle) => handle,
            Err(e) => {
                guard.armed = false;
                return Ok(self.fail(FailureKind::Submission, error_text(&e)));
            }
        };
        guard.stage = FailureKind::Confirmation;

        let tx_hash = handle.tx_hash();
        self.state.send_modify(|s| s.tx_hash = Some(tx_hash.clone()));
        debug!(tx = %self.label, %tx_hash, confirmations = self.confirmations, "submitted");
        self.emit(TxEvent::Submitted {
            label: self.label.clone(),
            tx_hash: tx_hash.clone(),
        });

        let outcome = handle.wait(self.confirmations).await;
        guard.armed = false;
        match outcome {
            Ok(receipt) => Ok(self.confirm(tx_hash, receipt)),
            Err(e) => Ok(self.fail(FailureKind::Confirmation, error_text(&e))),
        }
    }

    /// Mark the current outcome as shown. Status is left unchanged.
    pub fn acknowledge(&self) {
        self.state.send_if_modified(|s| {
            if s.acknowledged {
                return false;
            }
            s.acknowledged = true;
            true
        });
    }

    /// Wait until the refreshers fired by the last confirmation have finished.
    pub async fn refreshed(&self) {
        let handle = self
            .pending_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Atomically move into `Submitting` unless already there.
    fn begin(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.status == TxStatus::Submitting {
                return false;
            }
            *s = TxSnapshot {
                status: TxStatus::Submitting,
                acknowledged: false,
                ..TxSnapshot::default()
            };
            true
        })
    }

    fn confirm(&self, tx_hash: Hex, receipt: R) -> TxSnapshot<R> {
        // Stored before `Confirmed` is visible to subscribers.
        let handle =
            refresh::spawn_refreshers(&self.label, &self.refreshers, receipt.clone(), self.on_event.clone());
        *self
            .pending_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handle;

        self.state.send_modify(|s| {
            s.status = TxStatus::Confirmed;
            s.receipt = Some(receipt);
            s.acknowledged = false;
        });
        debug!(tx = %self.label, %tx_hash, "confirmed");
        self.emit(TxEvent::Confirmed {
            label: self.label.clone(),
            tx_hash,
        });
        self.snapshot()
    }

    fn fail(&self, kind: FailureKind, message: String) -> TxSnapshot<R> {
        self.state.send_modify(|s| {
            s.status = TxStatus::Failed;
            s.error = Some(message.clone());
            s.failure = Some(kind);
            s.acknowledged = false;
        });
        debug!(tx = %self.label, ?kind, error = %message, "failed");
        self.emit(TxEvent::Failed {
            label: self.label.clone(),
            kind,
            message,
        });
        self.snapshot()
    }

    fn emit(&self, event: TxEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }
}

/// Fails the slot if a `run` future is dropped while still in flight.
struct InFlight<'a, R>
where
    R: Clone + Send + Sync + 'static,
{
    tracker: &'a TransactionTracker<R>,
    stage: FailureKind,
    armed: bool,
}

impl<R> Drop for InFlight<'_, R>
where
    R: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.armed || !self.tracker.is_submitting() {
            return;
        }
        warn!(tx = %self.tracker.label, stage = ?self.stage, "run dropped before completion");
        self.tracker.fail(self.stage, ABANDONED_ERROR.to_string());
    }
}

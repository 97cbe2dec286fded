//! Transaction lifecycle tracking for contract writes.
//!
//! - Submit a write through the contract gateway
//! - Wait for on-chain confirmation
//! - Re-query dependent read state once confirmed
//!
//! One [`TransactionTracker`] owns one action slot: `Idle -> Submitting ->
//! Confirmed | Failed`, and back to `Submitting` on the next run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use staking_types::{Hex, Result, StakingError};
use thiserror::Error;

pub mod refresh;
pub mod tracker;

pub use refresh::{RefreshFuture, Refresher, NO_RUNTIME};
pub use tracker::TransactionTracker;

/// Error text stored when a failure carries no message of its own.
pub const FALLBACK_ERROR: &str = "transaction failed";

/// Error text stored when a `run` future is dropped before it finished.
pub const ABANDONED_ERROR: &str = "transaction abandoned";

/// Lifecycle status of a tracked action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Idle,
    Submitting,
    Confirmed,
    Failed,
}

/// Where a failed transaction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The write could not be dispatched (e.g. the user refused to sign).
    Submission,
    /// The write was dispatched but reverted, was dropped, or the wait failed.
    Confirmation,
}

/// Read-only view of a tracker, for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSnapshot<R> {
    pub status: TxStatus,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub tx_hash: Option<Hex>,
    pub receipt: Option<R>,
    /// Whether the consumer has already shown the current outcome.
    /// Cleared on every new run and every terminal transition.
    pub acknowledged: bool,
}

impl<R> Default for TxSnapshot<R> {
    fn default() -> Self {
        Self {
            status: TxStatus::Idle,
            error: None,
            failure: None,
            tx_hash: None,
            receipt: None,
            acknowledged: true,
        }
    }
}

impl<R> TxSnapshot<R> {
    pub fn is_submitting(&self) -> bool {
        self.status == TxStatus::Submitting
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TxStatus::Failed
    }
}

/// The only error that crosses [`TransactionTracker::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("a transaction is already in flight for this action")]
    AlreadyInFlight,
}

/// A submitted transaction that can be waited on.
#[async_trait]
pub trait PendingTransaction: Send + Sync {
    type Receipt: Clone + Send + Sync + 'static;

    fn tx_hash(&self) -> Hex;

    /// Resolve once the transaction has `confirmations` blocks on top of it.
    async fn wait(&self, confirmations: u32) -> Result<Self::Receipt>;
}

#[async_trait]
impl<T: PendingTransaction + ?Sized> PendingTransaction for Box<T> {
    type Receipt = T::Receipt;

    fn tx_hash(&self) -> Hex {
        (**self).tx_hash()
    }

    async fn wait(&self, confirmations: u32) -> Result<Self::Receipt> {
        (**self).wait(confirmations).await
    }
}

/// Progress event for tracked transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    Submitting { label: String },
    Submitted { label: String, tx_hash: Hex },
    Confirmed { label: String, tx_hash: Hex },
    Failed { label: String, kind: FailureKind, message: String },
    RefreshFailed { label: String, refresher: String, message: String },
}

/// Callback type for transaction events.
pub type TxEventHandler = Arc<dyn Fn(TxEvent) + Send + Sync>;

/// Message text shown to the user for a failure.
pub(crate) fn error_text(err: &StakingError) -> String {
    let text = err.to_string();
    if text.trim().is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        text
    }
}

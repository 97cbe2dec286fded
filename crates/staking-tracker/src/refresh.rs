//! Post-confirmation refresh of dependent read state.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use staking_types::Result;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{TxEvent, TxEventHandler};

/// Failure message reported when a confirmation happens outside a Tokio runtime.
pub const NO_RUNTIME: &str = "no async runtime";

pub type RefreshFuture = BoxFuture<'static, Result<()>>;

type RefreshFn<R> = Arc<dyn Fn(R) -> RefreshFuture + Send + Sync>;

/// A named read-state re-query, run after a transaction is confirmed.
///
/// Receives a clone of the receipt. Failures are logged, never surfaced
/// through the tracker status.
pub struct Refresher<R> {
    name: String,
    run: RefreshFn<R>,
}

impl<R> Clone for Refresher<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<R> std::fmt::Debug for Refresher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher").field("name", &self.name).finish()
    }
}

impl<R: Send + 'static> Refresher<R> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |receipt| f(receipt).boxed()),
        }
    }

    /// Wrap a synchronous callback.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&R) -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(name, move |receipt: R| {
            let f = Arc::clone(&f);
            async move { f(&receipt) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Fire every refresher on its own task and log the ones that fail.
///
/// Returns a handle that completes once all refreshers have finished, or
/// `None` when there is nothing to run. Outside a Tokio runtime every
/// refresher is reported as failed and none is run.
pub(crate) fn spawn_refreshers<R>(
    label: &str,
    refreshers: &[Refresher<R>],
    receipt: R,
    on_event: Option<TxEventHandler>,
) -> Option<JoinHandle<()>>
where
    R: Clone + Send + 'static,
{
    if refreshers.is_empty() {
        return None;
    }
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            for refresher in refreshers {
                warn!(tx = %label, refresher = %refresher.name, "no async runtime, refresh skipped");
                if let Some(ref handler) = on_event {
                    handler(TxEvent::RefreshFailed {
                        label: label.to_string(),
                        refresher: refresher.name.clone(),
                        message: NO_RUNTIME.to_string(),
                    });
                }
            }
            return None;
        }
    };

    let tasks: Vec<(String, JoinHandle<Result<()>>)> = refreshers
        .iter()
        .map(|refresher| {
            let run = Arc::clone(&refresher.run);
            let receipt = receipt.clone();
            // Calling `run` inside the task keeps a panicking callback off the caller.
            let task = runtime.spawn(async move { run(receipt).await });
            (refresher.name.clone(), task)
        })
        .collect();

    let label = label.to_string();
    Some(runtime.spawn(async move {
        for (name, task) in tasks {
            let message = match task.await {
                Ok(Ok(())) => {
                    debug!(tx = %label, refresher = %name, "refresh done");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => "refresh panicked".to_string(),
                Err(e) => e.to_string(),
            };

            warn!(tx = %label, refresher = %name, error = %message, "refresh failed");
            if let Some(ref handler) = on_event {
                handler(TxEvent::RefreshFailed {
                    label: label.clone(),
                    refresher: name,
                    message,
                });
            }
        }
    }))
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use staking_contracts::WorkerManagerContract;
use staking_networks::ContractKind;
use staking_tracker::Refresher;
use staking_types::units::FINNEY;
use staking_types::{normalize_address, Address, Receipt, Result};
use tokio::sync::watch;
use tracing::debug;

use crate::{Connection, RunResult, Tracker};

/// Worker node state as seen by the worker manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub user: Address,
    pub available: bool,
    pub owned: bool,
    pub retired: bool,
    /// Hired but not yet accepted by the node.
    pub pending: bool,
}

struct WorkerReader {
    contract: Arc<dyn WorkerManagerContract>,
    worker: Address,
    state: watch::Sender<WorkerState>,
}

impl WorkerReader {
    async fn refresh(&self) -> Result<WorkerState> {
        let worker = &self.worker;
        let (user, available, owned, retired) = tokio::try_join!(
            self.contract.user_of(worker),
            self.contract.is_available(worker),
            self.contract.is_owned(worker),
            self.contract.is_retired(worker),
        )?;
        let state = WorkerState {
            user,
            available,
            owned,
            retired,
            pending: !available && !owned && !retired,
        };
        self.state.send_replace(state.clone());
        debug!(%worker, ?state, "worker state refreshed");
        Ok(state)
    }
}

/// Hire, cancel and retire one worker node.
pub struct WorkerManagerService {
    reader: Arc<WorkerReader>,
    hire_value: u128,
    hire: Tracker,
    cancel_hire: Tracker,
    retire: Tracker,
}

impl WorkerManagerService {
    pub fn connect(conn: &Connection, worker: &str) -> Result<Self> {
        let address = conn.address(ContractKind::WorkerManager)?;
        let (state, _) = watch::channel(WorkerState::default());
        let reader = Arc::new(WorkerReader {
            contract: conn.provider.worker_manager(&address)?,
            worker: normalize_address(worker)?,
            state,
        });

        let refresher = {
            let reader = Arc::clone(&reader);
            Refresher::new("worker state", move |_receipt: Receipt| {
                let reader = Arc::clone(&reader);
                async move { reader.refresh().await.map(|_| ()) }
            })
        };

        Ok(Self {
            hire_value: FINNEY,
            hire: conn.tracker("hire", refresher.clone()),
            cancel_hire: conn.tracker("cancel hire", refresher.clone()),
            retire: conn.tracker("retire", refresher),
            reader,
        })
    }

    /// Funds sent to the node on hire (default 1 finney).
    pub fn with_hire_value(mut self, value: u128) -> Self {
        self.hire_value = value;
        self
    }

    pub fn worker(&self) -> &Address {
        &self.reader.worker
    }

    pub async fn hire(&self) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        let worker = self.reader.worker.clone();
        let value = self.hire_value;
        self.hire
            .run(|| async move { contract.hire(&worker, value).await })
            .await
    }

    pub async fn cancel_hire(&self) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        let worker = self.reader.worker.clone();
        self.cancel_hire
            .run(|| async move { contract.cancel_hire(&worker).await })
            .await
    }

    pub async fn retire(&self) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        let worker = self.reader.worker.clone();
        self.retire
            .run(|| async move { contract.retire(&worker).await })
            .await
    }

    pub fn hire_tracker(&self) -> &Tracker {
        &self.hire
    }

    pub fn cancel_hire_tracker(&self) -> &Tracker {
        &self.cancel_hire
    }

    pub fn retire_tracker(&self) -> &Tracker {
        &self.retire
    }

    pub fn state(&self) -> WorkerState {
        self.reader.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.reader.state.subscribe()
    }

    pub async fn refresh(&self) -> Result<WorkerState> {
        self.reader.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use staking_contracts::memory::{MemoryChain, ZERO_ADDRESS};

    #[tokio::test]
    async fn test_hire_is_pending_until_accepted() {
        let chain = MemoryChain::new(USER).unwrap();
        let service = WorkerManagerService::connect(&connect(&chain), WORKER).unwrap();

        let state = service.refresh().await.unwrap();
        assert!(state.available);
        assert!(!state.pending);
        assert_eq!(state.user, ZERO_ADDRESS);

        assert!(service.hire().await.unwrap().is_confirmed());
        service.hire_tracker().refreshed().await;
        let state = service.state();
        assert!(state.pending);
        assert_eq!(state.user, USER);

        chain.accept_job(WORKER).unwrap();
        let state = service.refresh().await.unwrap();
        assert!(state.owned);
        assert!(!state.pending);

        assert!(service.retire().await.unwrap().is_confirmed());
        service.retire_tracker().refreshed().await;
        assert!(service.state().retired);
    }

    #[tokio::test]
    async fn test_cancel_hire() {
        let chain = MemoryChain::new(USER).unwrap();
        let service = WorkerManagerService::connect(&connect(&chain), WORKER).unwrap();
        service.hire().await.unwrap();

        assert!(service.cancel_hire().await.unwrap().is_confirmed());
        service.cancel_hire_tracker().refreshed().await;
        assert!(service.state().available);
    }

    #[tokio::test]
    async fn test_zero_hire_value_fails() {
        let chain = MemoryChain::new(USER).unwrap();
        let service = WorkerManagerService::connect(&connect(&chain), WORKER)
            .unwrap()
            .with_hire_value(0);
        let snapshot = service.hire().await.unwrap();
        assert!(snapshot.is_failed());
        assert_eq!(snapshot.error.as_deref(), Some("WorkerManager: hire requires funds"));
    }

    #[tokio::test]
    async fn test_retire_by_other_user_fails() {
        let chain = MemoryChain::new(USER).unwrap();
        let service = WorkerManagerService::connect(&connect(&chain), WORKER).unwrap();
        service.hire().await.unwrap();
        chain.accept_job(WORKER).unwrap();

        let other = chain.connect_as(OTHER).unwrap();
        let intruder = WorkerManagerService::connect(&connect(&other), WORKER).unwrap();
        assert!(intruder.retire().await.unwrap().is_failed());
        assert!(service.refresh().await.unwrap().owned);
    }
}

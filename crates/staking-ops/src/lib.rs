//! Staking actions: one service per contract, each owning a transaction
//! tracker per action and a published read state that is refreshed after
//! every confirmed transaction.

use std::sync::Arc;

use staking_contracts::ContractProvider;
use staking_forms::FormError;
use staking_networks::{ContractKind, DeploymentRegistry};
use staking_tracker::{Refresher, TrackerError, TransactionTracker, TxEventHandler, TxSnapshot};
use staking_types::{normalize_address, Address, ChainId, Receipt, Result};
use thiserror::Error;

pub mod pool;
pub mod roster;
pub mod staking;
pub mod token;
pub mod worker;

pub use pool::{PoolBalances, PoolService};
pub use roster::{fold_roster, user_workers};
pub use staking::{StakingBalances, StakingService};
pub use token::{TokenBalances, TokenService};
pub use worker::{WorkerManagerService, WorkerState};

pub type Tracker = TransactionTracker<Receipt>;

pub type Snapshot = TxSnapshot<Receipt>;

/// Outcome of a tracked action.
pub type RunResult = std::result::Result<Snapshot, TrackerError>;

pub type ActionResult = std::result::Result<Snapshot, ActionError>;

/// Errors of actions that validate their input before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error(transparent)]
    Invalid(#[from] FormError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Everything a service needs to attach to its contract.
#[derive(Clone)]
pub struct Connection {
    pub provider: Arc<dyn ContractProvider>,
    pub registry: Arc<DeploymentRegistry>,
    pub chain_id: ChainId,
    pub account: Address,
    on_event: Option<TxEventHandler>,
}

impl Connection {
    /// Fails with `UnsupportedNetwork` when the registry does not know `chain_id`.
    pub fn new(
        provider: Arc<dyn ContractProvider>,
        registry: Arc<DeploymentRegistry>,
        chain_id: ChainId,
        account: &str,
    ) -> Result<Self> {
        registry.network(chain_id)?;
        Ok(Self {
            provider,
            registry,
            chain_id,
            account: normalize_address(account)?,
            on_event: None,
        })
    }

    /// Forward tracker events of every service built on this connection.
    pub fn with_event_handler(mut self, handler: TxEventHandler) -> Self {
        self.on_event = Some(handler);
        self
    }

    pub fn address(&self, kind: ContractKind) -> Result<Address> {
        self.registry.address(self.chain_id, kind)
    }

    pub fn confirmations(&self) -> u32 {
        self.registry.confirmations(self.chain_id)
    }

    pub(crate) fn tracker(&self, label: &str, refresher: Refresher<Receipt>) -> Tracker {
        let tracker = TransactionTracker::new(label)
            .with_confirmations(self.confirmations())
            .with_refresher(refresher);
        match &self.on_event {
            Some(handler) => tracker.with_event_handler(Arc::clone(handler)),
            None => tracker,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use staking_contracts::memory::MemoryChain;
    use staking_networks::RegistryConfig;

    pub const CHAIN_ID: ChainId = 31337;
    pub const USER: &str = "0x907ea0e65ecf3af503007b382e1280aeb46104ad";
    pub const OTHER: &str = "0x00000000000000000000000000000000000000b0";
    pub const STAKING: &str = "0x9edeadfde65bcfd0907db3acdb3445229c764a69";
    pub const TOKEN: &str = "0x491604c0fdf08347dd1fa4ee062a822a5dd06b5d";
    pub const WORKER_MANAGER: &str = "0x00000000000000000000000000000000000000aa";
    pub const POOL: &str = "0xe656584736b1efc14b4b6c785aa9c23bac8f41aa";
    pub const WORKER: &str = "0x00000000000000000000000000000000000000c1";

    pub fn registry(confirmations: u32) -> Arc<DeploymentRegistry> {
        let config = RegistryConfig::from_json_str(&format!(
            r#"{{ "chains": [ {{ "chain_id": {}, "confirmations": {},
                "contracts": {{ "Staking": "{}", "CartesiToken": "{}", "WorkerManager": "{}" }} }} ] }}"#,
            CHAIN_ID, confirmations, STAKING, TOKEN, WORKER_MANAGER
        ))
        .unwrap();
        Arc::new(DeploymentRegistry::from_config(config).unwrap())
    }

    pub fn connect(chain: &MemoryChain) -> Connection {
        Connection::new(Arc::new(chain.clone()), registry(1), CHAIN_ID, chain.signer()).unwrap()
    }
}

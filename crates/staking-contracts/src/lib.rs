//! Contract call gateway traits for the staking contracts.
//!
//! Defines one async trait per contract the dashboard talks to.
//! Writes return a [`PendingTx`] to be waited on; reads return plain values.
//! Provides a `MemoryChain` for testing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use staking_tracker::PendingTransaction;
use staking_types::{Address, Receipt, Result};

pub mod memory;

/// A submitted contract write.
pub type PendingTx = Box<dyn PendingTransaction<Receipt = Receipt>>;

/// Worker manager event kinds relevant to a user's roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerEventKind {
    JobAccepted,
    Retired,
}

/// A worker manager log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEvent {
    pub kind: WorkerEventKind,
    pub worker: Address,
    pub user: Address,
    pub block_number: u64,
    pub log_index: u32,
}

/// How a pool manager is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionModel {
    /// Fixed share of each block reward, in basis points (100 = 1%).
    FlatRate { basis_points: u16 },
    /// Fixed amount of gas, priced by oracle and converted to CTSI.
    GasBased { gas: u64 },
}

/// A user's position in a staking pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUserBalance {
    pub shares: u128,
    pub released: u128,
    /// Unix seconds before which the stake cannot be unstaked.
    pub unstake_timestamp: u64,
}

/// Amounts waiting for the next pool rebalance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAmounts {
    pub stake: u128,
    pub unstake: u128,
    pub withdraw: u128,
}

#[async_trait]
pub trait StakingContract: Send + Sync {
    async fn stake(&self, amount: u128) -> Result<PendingTx>;
    async fn unstake(&self, amount: u128) -> Result<PendingTx>;
    async fn withdraw(&self, amount: u128) -> Result<PendingTx>;

    async fn staked_balance(&self, user: &Address) -> Result<u128>;
    async fn maturing_balance(&self, user: &Address) -> Result<u128>;
    /// Unix seconds when the maturing balance becomes staked.
    async fn maturing_timestamp(&self, user: &Address) -> Result<u64>;
    async fn releasing_balance(&self, user: &Address) -> Result<u128>;
    /// Unix seconds when the releasing balance becomes withdrawable.
    async fn releasing_timestamp(&self, user: &Address) -> Result<u64>;
}

#[async_trait]
pub trait TokenContract: Send + Sync {
    async fn approve(&self, spender: &Address, amount: u128) -> Result<PendingTx>;

    async fn balance_of(&self, owner: &Address) -> Result<u128>;
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<u128>;
}

#[async_trait]
pub trait WorkerManagerContract: Send + Sync {
    /// Hire `worker`, funding it with `value` wei.
    async fn hire(&self, worker: &Address, value: u128) -> Result<PendingTx>;
    async fn cancel_hire(&self, worker: &Address) -> Result<PendingTx>;
    async fn retire(&self, worker: &Address) -> Result<PendingTx>;

    async fn is_available(&self, worker: &Address) -> Result<bool>;
    async fn is_owned(&self, worker: &Address) -> Result<bool>;
    async fn is_retired(&self, worker: &Address) -> Result<bool>;
    async fn user_of(&self, worker: &Address) -> Result<Address>;
    /// `JobAccepted` and `Retired` events whose user is `user`.
    async fn worker_events(&self, user: &Address) -> Result<Vec<WorkerEvent>>;
}

#[async_trait]
pub trait StakingPoolContract: Send + Sync {
    async fn stake(&self, amount: u128) -> Result<PendingTx>;
    async fn unstake(&self, shares: u128) -> Result<PendingTx>;
    async fn withdraw(&self, amount: u128) -> Result<PendingTx>;
    async fn rebalance(&self) -> Result<PendingTx>;
    /// Point the pool's reverse ENS record at `name`.
    async fn set_name(&self, name: &str) -> Result<PendingTx>;
    async fn set_commission(&self, model: CommissionModel) -> Result<PendingTx>;

    async fn user_balance(&self, user: &Address) -> Result<PoolUserBalance>;
    async fn amount_to_shares(&self, amount: u128) -> Result<u128>;
    async fn shares_to_amount(&self, shares: u128) -> Result<u128>;
    async fn paused(&self) -> Result<bool>;
    async fn pending_amounts(&self) -> Result<PoolAmounts>;
    async fn commission(&self) -> Result<CommissionModel>;
}

/// Attaches contract gateways to deployed addresses, signing as the
/// connected account.
pub trait ContractProvider: Send + Sync {
    fn staking(&self, address: &Address) -> Result<Arc<dyn StakingContract>>;
    fn token(&self, address: &Address) -> Result<Arc<dyn TokenContract>>;
    fn worker_manager(&self, address: &Address) -> Result<Arc<dyn WorkerManagerContract>>;
    fn staking_pool(&self, address: &Address) -> Result<Arc<dyn StakingPoolContract>>;
}

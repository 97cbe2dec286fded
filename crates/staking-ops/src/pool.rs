use std::sync::Arc;

use serde::{Deserialize, Serialize};
use staking_contracts::{CommissionModel, PoolAmounts, StakingPoolContract};
use staking_forms::{validate_ens_name, CommissionForm};
use staking_tracker::Refresher;
use staking_types::{normalize_address, Address, Receipt, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{ActionResult, Connection, RunResult, Tracker};

/// The user's position in a pool and the pool's own state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBalances {
    pub shares: u128,
    /// Current CTSI value of `shares`.
    pub amount: u128,
    pub released: u128,
    pub unstake_timestamp: u64,
    pub paused: bool,
    pub pending: PoolAmounts,
    pub commission: Option<CommissionModel>,
}

impl PoolBalances {
    /// A lock only applies while shares are held.
    pub fn stake_locked(&self, now: u64) -> bool {
        self.shares > 0 && self.unstake_timestamp > now
    }
}

struct PoolReader {
    contract: Arc<dyn StakingPoolContract>,
    account: Address,
    balances: watch::Sender<PoolBalances>,
}

impl PoolReader {
    async fn refresh(&self) -> Result<PoolBalances> {
        let (user, paused, pending, commission) = tokio::try_join!(
            self.contract.user_balance(&self.account),
            self.contract.paused(),
            self.contract.pending_amounts(),
            self.contract.commission(),
        )?;
        let amount = self.contract.shares_to_amount(user.shares).await?;
        let balances = PoolBalances {
            shares: user.shares,
            amount,
            released: user.released,
            unstake_timestamp: user.unstake_timestamp,
            paused,
            pending,
            commission: Some(commission),
        };
        self.balances.send_replace(balances);
        debug!(account = %self.account, ?balances, "pool balances refreshed");
        Ok(balances)
    }
}

/// User and manager actions on one staking pool.
pub struct PoolService {
    address: Address,
    reader: Arc<PoolReader>,
    stake: Tracker,
    unstake: Tracker,
    withdraw: Tracker,
    rebalance: Tracker,
    set_name: Tracker,
    set_commission: Tracker,
}

impl PoolService {
    /// Pools are user-created, so the address comes from the caller.
    pub fn connect(conn: &Connection, pool: &str) -> Result<Self> {
        let address = normalize_address(pool)?;
        let contract = conn.provider.staking_pool(&address)?;
        info!("Attaching StakingPool to address '{}'", address);

        let (balances, _) = watch::channel(PoolBalances::default());
        let reader = Arc::new(PoolReader {
            contract,
            account: conn.account.clone(),
            balances,
        });
        let refresher = {
            let reader = Arc::clone(&reader);
            Refresher::new("pool balances", move |_receipt: Receipt| {
                let reader = Arc::clone(&reader);
                async move { reader.refresh().await.map(|_| ()) }
            })
        };

        Ok(Self {
            address,
            stake: conn.tracker("pool stake", refresher.clone()),
            unstake: conn.tracker("pool unstake", refresher.clone()),
            withdraw: conn.tracker("pool withdraw", refresher.clone()),
            rebalance: conn.tracker("pool rebalance", refresher.clone()),
            set_name: conn.tracker("pool set name", refresher.clone()),
            set_commission: conn.tracker("pool set commission", refresher),
            reader,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn stake(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.stake.run(|| async move { contract.stake(amount).await }).await
    }

    /// Unstake `amount` CTSI worth of shares, or every share with `None`.
    pub async fn unstake(&self, amount: Option<u128>) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        let account = self.reader.account.clone();
        self.unstake
            .run(|| async move {
                let shares = match amount {
                    Some(amount) => contract.amount_to_shares(amount).await?,
                    None => contract.user_balance(&account).await?.shares,
                };
                contract.unstake(shares).await
            })
            .await
    }

    pub async fn withdraw(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.withdraw.run(|| async move { contract.withdraw(amount).await }).await
    }

    pub async fn rebalance(&self) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.rebalance.run(|| async move { contract.rebalance().await }).await
    }

    /// Set the pool's ENS name. Invalid names never reach the tracker.
    pub async fn set_name(&self, name: &str) -> ActionResult {
        let name = validate_ens_name(name)?;
        let contract = Arc::clone(&self.reader.contract);
        Ok(self
            .set_name
            .run(|| async move { contract.set_name(&name).await })
            .await?)
    }

    pub async fn set_commission(&self, form: &CommissionForm) -> ActionResult {
        let model = form.validate()?;
        let contract = Arc::clone(&self.reader.contract);
        Ok(self
            .set_commission
            .run(|| async move { contract.set_commission(model).await })
            .await?)
    }

    /// Whether the user's stake is still inside its lock period at `now`.
    pub fn stake_locked(&self, now: u64) -> bool {
        self.balances().stake_locked(now)
    }

    pub fn stake_tracker(&self) -> &Tracker {
        &self.stake
    }

    pub fn unstake_tracker(&self) -> &Tracker {
        &self.unstake
    }

    pub fn withdraw_tracker(&self) -> &Tracker {
        &self.withdraw
    }

    pub fn rebalance_tracker(&self) -> &Tracker {
        &self.rebalance
    }

    pub fn set_name_tracker(&self) -> &Tracker {
        &self.set_name
    }

    pub fn set_commission_tracker(&self) -> &Tracker {
        &self.set_commission
    }

    pub fn balances(&self) -> PoolBalances {
        *self.reader.balances.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolBalances> {
        self.reader.balances.subscribe()
    }

    pub async fn refresh(&self) -> Result<PoolBalances> {
        self.reader.refresh().await
    }
}

//! In-memory chain for testing.
//!
//! Every write is mined immediately into its own block; `wait` resolves at
//! once. Time only moves through [`MemoryChain::advance_time`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use staking_tracker::PendingTransaction;
use staking_types::{normalize_address, Address, Hex, Receipt, Result, StakingError};

use crate::*;

pub const GENESIS_TIME: u64 = 1_600_000_000;
/// Delay before newly staked tokens count as staked.
pub const MATURATION_PERIOD: u64 = 6 * 60 * 60;
/// Delay before unstaked tokens can be withdrawn.
pub const RELEASE_PERIOD: u64 = 48 * 60 * 60;
/// Delay after a pool stake before it can be unstaked.
pub const POOL_LOCK_PERIOD: u64 = 6 * 60 * 60;
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

const GAS_USED: u64 = 21_000;

#[derive(Debug, Clone, Copy, Default)]
struct StakeAccount {
    staked: u128,
    maturing: u128,
    maturing_at: u64,
    releasing: u128,
    releasing_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Available,
    Pending,
    Owned,
    Retired,
}

#[derive(Debug, Clone)]
struct WorkerRecord {
    user: Address,
    state: WorkerState,
}

#[derive(Debug, Clone)]
struct PoolState {
    manager: Address,
    name: Option<String>,
    commission: CommissionModel,
    paused: bool,
    total_shares: u128,
    total_amount: u128,
    users: HashMap<Address, PoolUserBalance>,
    amounts: PoolAmounts,
}

impl PoolState {
    fn to_shares(&self, amount: u128) -> u128 {
        if self.total_amount == 0 || self.total_shares == 0 {
            return amount;
        }
        amount
            .checked_mul(self.total_shares)
            .map(|v| v / self.total_amount)
            .unwrap_or(u128::MAX)
    }

    fn to_amount(&self, shares: u128) -> u128 {
        if self.total_amount == 0 || self.total_shares == 0 {
            return shares;
        }
        shares
            .checked_mul(self.total_amount)
            .map(|v| v / self.total_shares)
            .unwrap_or(u128::MAX)
    }
}

#[derive(Debug)]
struct ChainState {
    block_number: u64,
    now: u64,
    nonce: u64,
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
    stakes: HashMap<Address, StakeAccount>,
    workers: HashMap<Address, WorkerRecord>,
    worker_events: Vec<WorkerEvent>,
    pools: HashMap<Address, PoolState>,
    reject_next: Option<String>,
    revert_next: Option<String>,
    failing_reads: Option<String>,
    waits: Vec<u32>,
}

impl ChainState {
    fn new() -> Self {
        Self {
            block_number: 0,
            now: GENESIS_TIME,
            nonce: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            stakes: HashMap::new(),
            workers: HashMap::new(),
            worker_events: Vec::new(),
            pools: HashMap::new(),
            reject_next: None,
            revert_next: None,
            failing_reads: None,
            waits: Vec::new(),
        }
    }

    fn balance(&self, owner: &Address) -> u128 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&mut self, to: &Address, amount: u128) {
        *self.balances.entry(to.clone()).or_insert(0) += amount;
    }

    /// ERC20 `transferFrom(owner, spender, amount)` initiated by `spender`.
    fn transfer_from(&mut self, owner: &Address, spender: &Address, amount: u128) -> Result<()> {
        let allowance = self.allowance(owner, spender);
        require(allowance >= amount, "ERC20: transfer amount exceeds allowance")?;
        require(self.balance(owner) >= amount, "ERC20: transfer amount exceeds balance")?;
        self.allowances
            .insert((owner.clone(), spender.clone()), allowance - amount);
        *self.balances.entry(owner.clone()).or_insert(0) -= amount;
        self.credit(spender, amount);
        Ok(())
    }

    /// Move matured tokens into the staked balance.
    fn settle_stake(&mut self, user: &Address) -> &mut StakeAccount {
        let now = self.now;
        let account = self.stakes.entry(user.clone()).or_default();
        if account.maturing > 0 && now >= account.maturing_at {
            account.staked += account.maturing;
            account.maturing = 0;
        }
        account
    }

    fn pool(&self, address: &Address) -> Result<&PoolState> {
        self.pools
            .get(address)
            .ok_or_else(|| StakingError::Other(format!("no staking pool at {}", address)))
    }

    fn pool_mut(&mut self, address: &Address) -> Result<&mut PoolState> {
        self.pools
            .get_mut(address)
            .ok_or_else(|| StakingError::Other(format!("no staking pool at {}", address)))
    }

    fn worker(&self, worker: &Address) -> WorkerState {
        self.workers
            .get(worker)
            .map(|w| w.state)
            .unwrap_or(WorkerState::Available)
    }
}

fn require(condition: bool, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(StakingError::Rejected(reason.to_string()))
    }
}

fn lock(state: &Mutex<ChainState>) -> MutexGuard<'_, ChainState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A transaction mined by the in-memory chain.
struct MemoryTx {
    hash: Hex,
    outcome: std::result::Result<Receipt, String>,
    state: Arc<Mutex<ChainState>>,
}

#[async_trait]
impl PendingTransaction for MemoryTx {
    type Receipt = Receipt;

    fn tx_hash(&self) -> Hex {
        self.hash.clone()
    }

    async fn wait(&self, confirmations: u32) -> Result<Receipt> {
        lock(&self.state).waits.push(confirmations);
        self.outcome.clone().map_err(StakingError::Reverted)
    }
}

/// In-memory chain hosting a token, the staking contract, a worker manager
/// and any number of staking pools. Clones share the same chain.
#[derive(Clone)]
pub struct MemoryChain {
    state: Arc<Mutex<ChainState>>,
    signer: Address,
}

impl MemoryChain {
    /// Create a chain whose writes are signed by `signer`.
    pub fn new(signer: &str) -> Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(ChainState::new())),
            signer: normalize_address(signer)?,
        })
    }

    /// Same chain, different signing account.
    pub fn connect_as(&self, signer: &str) -> Result<Self> {
        Ok(Self {
            state: Arc::clone(&self.state),
            signer: normalize_address(signer)?,
        })
    }

    pub fn signer(&self) -> &Address {
        &self.signer
    }

    pub fn block_number(&self) -> u64 {
        lock(&self.state).block_number
    }

    pub fn now(&self) -> u64 {
        lock(&self.state).now
    }

    pub fn advance_time(&self, seconds: u64) {
        lock(&self.state).now += seconds;
    }

    pub fn mint(&self, owner: &str, amount: u128) -> Result<()> {
        let owner = normalize_address(owner)?;
        lock(&self.state).credit(&owner, amount);
        Ok(())
    }

    /// Make the next write fail before it is dispatched.
    pub fn reject_next_submission(&self, message: &str) {
        lock(&self.state).reject_next = Some(message.to_string());
    }

    /// Make the next write get mined but revert.
    pub fn revert_next(&self, message: &str) {
        lock(&self.state).revert_next = Some(message.to_string());
    }

    /// Make every read fail with `message` until cleared with `None`.
    pub fn fail_reads(&self, message: Option<&str>) {
        lock(&self.state).failing_reads = message.map(str::to_string);
    }

    /// Confirmation counts passed to `wait`, in call order.
    pub fn confirmations_waited(&self) -> Vec<u32> {
        lock(&self.state).waits.clone()
    }

    pub fn create_pool(&self, address: &str, manager: &str, commission: CommissionModel) -> Result<()> {
        let address = normalize_address(address)?;
        let manager = normalize_address(manager)?;
        lock(&self.state).pools.insert(
            address,
            PoolState {
                manager,
                name: None,
                commission,
                paused: false,
                total_shares: 0,
                total_amount: 0,
                users: HashMap::new(),
                amounts: PoolAmounts::default(),
            },
        );
        Ok(())
    }

    pub fn pause_pool(&self, address: &str, paused: bool) -> Result<()> {
        let address = normalize_address(address)?;
        lock(&self.state).pool_mut(&address)?.paused = paused;
        Ok(())
    }

    /// Add block rewards to a pool, raising the value of its shares.
    pub fn reward_pool(&self, address: &str, amount: u128) -> Result<()> {
        let address = normalize_address(address)?;
        let mut state = lock(&self.state);
        state.pool_mut(&address)?.total_amount += amount;
        state.credit(&address, amount);
        Ok(())
    }

    pub fn pool_name(&self, address: &str) -> Result<Option<String>> {
        let address = normalize_address(address)?;
        Ok(lock(&self.state).pool(&address)?.name.clone())
    }

    /// The worker node accepting a pending hire.
    pub fn accept_job(&self, worker: &str) -> Result<()> {
        let worker = normalize_address(worker)?;
        let mut state = lock(&self.state);
        let block_number = state.block_number + 1;
        let record = state
            .workers
            .get_mut(&worker)
            .filter(|w| w.state == WorkerState::Pending)
            .ok_or_else(|| StakingError::Rejected("WorkerManager: worker not pending".into()))?;
        record.state = WorkerState::Owned;
        let user = record.user.clone();
        state.block_number = block_number;
        state.worker_events.push(WorkerEvent {
            kind: WorkerEventKind::JobAccepted,
            worker,
            user,
            block_number,
            log_index: 0,
        });
        Ok(())
    }

    /// Mine a write. `apply` validates and mutates; on error nothing is mined.
    fn submit<F>(&self, apply: F) -> Result<PendingTx>
    where
        F: FnOnce(&mut ChainState, &Address) -> Result<()>,
    {
        let mut state = lock(&self.state);
        if let Some(message) = state.reject_next.take() {
            return Err(StakingError::Rejected(message));
        }

        state.block_number += 1;
        let outcome = match state.revert_next.take() {
            Some(message) => Err(message),
            None => {
                if let Err(e) = apply(&mut *state, &self.signer) {
                    state.block_number -= 1;
                    return Err(e);
                }
                Ok(())
            }
        };

        state.nonce += 1;
        let hash = format!("0x{:064x}", state.nonce);
        let block_number = state.block_number;
        let outcome = outcome.map(|()| Receipt {
            tx_hash: hash.clone(),
            block_number,
            gas_used: Some(GAS_USED),
        });

        Ok(Box::new(MemoryTx {
            hash,
            outcome,
            state: Arc::clone(&self.state),
        }))
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ChainState) -> Result<T>,
    {
        let mut state = lock(&self.state);
        if let Some(ref message) = state.failing_reads {
            return Err(StakingError::Other(message.clone()));
        }
        f(&mut *state)
    }
}

struct MemoryStaking {
    chain: MemoryChain,
    address: Address,
}

#[async_trait]
impl StakingContract for MemoryStaking {
    async fn stake(&self, amount: u128) -> Result<PendingTx> {
        let contract = self.address.clone();
        self.chain.submit(move |state, signer| {
            require(amount > 0, "Staking: amount must be greater than 0")?;
            state.transfer_from(signer, &contract, amount)?;
            let now = state.now;
            let account = state.settle_stake(signer);
            account.maturing += amount;
            account.maturing_at = now + MATURATION_PERIOD;
            Ok(())
        })
    }

    async fn unstake(&self, amount: u128) -> Result<PendingTx> {
        self.chain.submit(move |state, signer| {
            require(amount > 0, "Staking: amount must be greater than 0")?;
            let now = state.now;
            let account = state.settle_stake(signer);
            require(
                account.maturing + account.staked >= amount,
                "Staking: not enough tokens",
            )?;
            // Maturing tokens are unstaked first.
            let from_maturing = amount.min(account.maturing);
            account.maturing -= from_maturing;
            account.staked -= amount - from_maturing;
            account.releasing += amount;
            account.releasing_at = now + RELEASE_PERIOD;
            Ok(())
        })
    }

    async fn withdraw(&self, amount: u128) -> Result<PendingTx> {
        let contract = self.address.clone();
        self.chain.submit(move |state, signer| {
            let now = state.now;
            let account = state.settle_stake(signer);
            require(account.releasing >= amount, "Staking: not enough tokens")?;
            require(now >= account.releasing_at, "Staking: tokens are not released yet")?;
            account.releasing -= amount;
            let held = state.balance(&contract);
            state.balances.insert(contract.clone(), held.saturating_sub(amount));
            state.credit(signer, amount);
            Ok(())
        })
    }

    async fn staked_balance(&self, user: &Address) -> Result<u128> {
        let user = normalize_address(user)?;
        self.chain.read(|state| Ok(state.settle_stake(&user).staked))
    }

    async fn maturing_balance(&self, user: &Address) -> Result<u128> {
        let user = normalize_address(user)?;
        self.chain.read(|state| Ok(state.settle_stake(&user).maturing))
    }

    async fn maturing_timestamp(&self, user: &Address) -> Result<u64> {
        let user = normalize_address(user)?;
        self.chain.read(|state| Ok(state.settle_stake(&user).maturing_at))
    }

    async fn releasing_balance(&self, user: &Address) -> Result<u128> {
        let user = normalize_address(user)?;
        self.chain.read(|state| Ok(state.settle_stake(&user).releasing))
    }

    async fn releasing_timestamp(&self, user: &Address) -> Result<u64> {
        let user = normalize_address(user)?;
        self.chain.read(|state| Ok(state.settle_stake(&user).releasing_at))
    }
}

struct MemoryToken {
    chain: MemoryChain,
}

#[async_trait]
impl TokenContract for MemoryToken {
    async fn approve(&self, spender: &Address, amount: u128) -> Result<PendingTx> {
        let spender = normalize_address(spender)?;
        self.chain.submit(move |state, signer| {
            state.allowances.insert((signer.clone(), spender), amount);
            Ok(())
        })
    }

    async fn balance_of(&self, owner: &Address) -> Result<u128> {
        let owner = normalize_address(owner)?;
        self.chain.read(|state| Ok(state.balance(&owner)))
    }

    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<u128> {
        let owner = normalize_address(owner)?;
        let spender = normalize_address(spender)?;
        self.chain.read(|state| Ok(state.allowance(&owner, &spender)))
    }
}

struct MemoryWorkerManager {
    chain: MemoryChain,
}

#[async_trait]
impl WorkerManagerContract for MemoryWorkerManager {
    async fn hire(&self, worker: &Address, value: u128) -> Result<PendingTx> {
        let worker = normalize_address(worker)?;
        self.chain.submit(move |state, signer| {
            require(value > 0, "WorkerManager: hire requires funds")?;
            require(
                state.worker(&worker) == WorkerState::Available,
                "WorkerManager: worker not available",
            )?;
            state.workers.insert(
                worker,
                WorkerRecord {
                    user: signer.clone(),
                    state: WorkerState::Pending,
                },
            );
            Ok(())
        })
    }

    /// Withdraw a hire the worker has not accepted yet.
    async fn cancel_hire(&self, worker: &Address) -> Result<PendingTx> {
        let worker = normalize_address(worker)?;
        self.chain.submit(move |state, signer| {
            let record = state
                .workers
                .get(&worker)
                .filter(|w| w.user == *signer)
                .ok_or_else(|| StakingError::Rejected("WorkerManager: only owner can cancel".into()))?;
            require(
                record.state == WorkerState::Pending,
                "WorkerManager: worker not pending",
            )?;
            state.workers.remove(&worker);
            Ok(())
        })
    }

    async fn retire(&self, worker: &Address) -> Result<PendingTx> {
        let worker = normalize_address(worker)?;
        self.chain.submit(move |state, signer| {
            let block_number = state.block_number;
            let record = state
                .workers
                .get_mut(&worker)
                .filter(|w| w.user == *signer)
                .ok_or_else(|| StakingError::Rejected("WorkerManager: only owner can retire".into()))?;
            require(
                record.state == WorkerState::Owned,
                "WorkerManager: worker not owned",
            )?;
            record.state = WorkerState::Retired;
            state.worker_events.push(WorkerEvent {
                kind: WorkerEventKind::Retired,
                worker,
                user: signer.clone(),
                block_number,
                log_index: 0,
            });
            Ok(())
        })
    }

    async fn is_available(&self, worker: &Address) -> Result<bool> {
        let worker = normalize_address(worker)?;
        self.chain
            .read(|state| Ok(state.worker(&worker) == WorkerState::Available))
    }

    async fn is_owned(&self, worker: &Address) -> Result<bool> {
        let worker = normalize_address(worker)?;
        self.chain
            .read(|state| Ok(state.worker(&worker) == WorkerState::Owned))
    }

    async fn is_retired(&self, worker: &Address) -> Result<bool> {
        let worker = normalize_address(worker)?;
        self.chain
            .read(|state| Ok(state.worker(&worker) == WorkerState::Retired))
    }

    async fn user_of(&self, worker: &Address) -> Result<Address> {
        let worker = normalize_address(worker)?;
        self.chain.read(|state| {
            Ok(state
                .workers
                .get(&worker)
                .map(|w| w.user.clone())
                .unwrap_or_else(|| ZERO_ADDRESS.to_string()))
        })
    }

    async fn worker_events(&self, user: &Address) -> Result<Vec<WorkerEvent>> {
        let user = normalize_address(user)?;
        self.chain.read(|state| {
            Ok(state
                .worker_events
                .iter()
                .filter(|e| e.user == user)
                .cloned()
                .collect())
        })
    }
}

struct MemoryPool {
    chain: MemoryChain,
    address: Address,
}

#[async_trait]
impl StakingPoolContract for MemoryPool {
    async fn stake(&self, amount: u128) -> Result<PendingTx> {
        let pool = self.address.clone();
        self.chain.submit(move |state, signer| {
            require(!state.pool(&pool)?.paused, "StakingPool: paused")?;
            require(amount > 0, "StakingPool: amount must be greater than 0")?;
            state.transfer_from(signer, &pool, amount)?;

            let now = state.now;
            let p = state.pool_mut(&pool)?;
            let shares = p.to_shares(amount);
            p.total_shares += shares;
            p.total_amount += amount;
            p.amounts.stake += amount;
            let user = p.users.entry(signer.clone()).or_default();
            user.shares += shares;
            user.unstake_timestamp = now + POOL_LOCK_PERIOD;
            Ok(())
        })
    }

    async fn unstake(&self, shares: u128) -> Result<PendingTx> {
        let pool = self.address.clone();
        self.chain.submit(move |state, signer| {
            let now = state.now;
            let p = state.pool_mut(&pool)?;
            let user = p.users.get(signer).copied().unwrap_or_default();
            require(shares > 0, "StakingPool: shares must be greater than 0")?;
            require(user.shares >= shares, "StakingPool: not enough shares")?;
            require(now >= user.unstake_timestamp, "StakingPool: stake locked")?;

            let amount = p.to_amount(shares);
            p.total_shares -= shares;
            p.total_amount -= amount;
            p.amounts.unstake += amount;
            let user = p.users.entry(signer.clone()).or_default();
            user.shares -= shares;
            user.released += amount;
            Ok(())
        })
    }

    async fn withdraw(&self, amount: u128) -> Result<PendingTx> {
        let pool = self.address.clone();
        self.chain.submit(move |state, signer| {
            let p = state.pool_mut(&pool)?;
            let user = p.users.entry(signer.clone()).or_default();
            require(user.released >= amount, "StakingPool: not enough released tokens")?;
            user.released -= amount;
            p.amounts.withdraw += amount;
            let held = state.balance(&pool);
            state.balances.insert(pool.clone(), held.saturating_sub(amount));
            state.credit(signer, amount);
            Ok(())
        })
    }

    async fn rebalance(&self) -> Result<PendingTx> {
        let pool = self.address.clone();
        self.chain.submit(move |state, _| {
            state.pool_mut(&pool)?.amounts = PoolAmounts::default();
            Ok(())
        })
    }

    async fn set_name(&self, name: &str) -> Result<PendingTx> {
        let pool = self.address.clone();
        let name = name.to_string();
        self.chain.submit(move |state, signer| {
            let p = state.pool_mut(&pool)?;
            require(p.manager == *signer, "Ownable: caller is not the owner")?;
            p.name = Some(name);
            Ok(())
        })
    }

    async fn set_commission(&self, model: CommissionModel) -> Result<PendingTx> {
        let pool = self.address.clone();
        self.chain.submit(move |state, signer| {
            let p = state.pool_mut(&pool)?;
            require(p.manager == *signer, "Ownable: caller is not the owner")?;
            p.commission = model;
            Ok(())
        })
    }

    async fn user_balance(&self, user: &Address) -> Result<PoolUserBalance> {
        let user = normalize_address(user)?;
        let pool = &self.address;
        self.chain.read(|state| {
            Ok(state.pool(pool)?.users.get(&user).copied().unwrap_or_default())
        })
    }

    async fn amount_to_shares(&self, amount: u128) -> Result<u128> {
        let pool = &self.address;
        self.chain.read(|state| Ok(state.pool(pool)?.to_shares(amount)))
    }

    async fn shares_to_amount(&self, shares: u128) -> Result<u128> {
        let pool = &self.address;
        self.chain.read(|state| Ok(state.pool(pool)?.to_amount(shares)))
    }

    async fn paused(&self) -> Result<bool> {
        let pool = &self.address;
        self.chain.read(|state| Ok(state.pool(pool)?.paused))
    }

    async fn pending_amounts(&self) -> Result<PoolAmounts> {
        let pool = &self.address;
        self.chain.read(|state| Ok(state.pool(pool)?.amounts))
    }

    async fn commission(&self) -> Result<CommissionModel> {
        let pool = &self.address;
        self.chain.read(|state| Ok(state.pool(pool)?.commission))
    }
}

impl ContractProvider for MemoryChain {
    fn staking(&self, address: &Address) -> Result<Arc<dyn StakingContract>> {
        Ok(Arc::new(MemoryStaking {
            chain: self.clone(),
            address: normalize_address(address)?,
        }))
    }

    fn token(&self, address: &Address) -> Result<Arc<dyn TokenContract>> {
        normalize_address(address)?;
        Ok(Arc::new(MemoryToken { chain: self.clone() }))
    }

    fn worker_manager(&self, address: &Address) -> Result<Arc<dyn WorkerManagerContract>> {
        normalize_address(address)?;
        Ok(Arc::new(MemoryWorkerManager { chain: self.clone() }))
    }

    fn staking_pool(&self, address: &Address) -> Result<Arc<dyn StakingPoolContract>> {
        let address = normalize_address(address)?;
        lock(&self.state).pool(&address)?;
        Ok(Arc::new(MemoryPool {
            chain: self.clone(),
            address,
        }))
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use staking_contracts::StakingContract;
use staking_networks::ContractKind;
use staking_tracker::Refresher;
use staking_types::{Address, Receipt, Result};
use tokio::sync::watch;
use tracing::debug;

use crate::{Connection, RunResult, Tracker};

/// The user's position in the staking contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingBalances {
    pub staked: u128,
    pub maturing: u128,
    pub maturing_at: u64,
    pub releasing: u128,
    pub releasing_at: u64,
}

struct StakingReader {
    contract: Arc<dyn StakingContract>,
    account: Address,
    balances: watch::Sender<StakingBalances>,
}

impl StakingReader {
    async fn refresh(&self) -> Result<StakingBalances> {
        let user = &self.account;
        let (staked, maturing, maturing_at, releasing, releasing_at) = tokio::try_join!(
            self.contract.staked_balance(user),
            self.contract.maturing_balance(user),
            self.contract.maturing_timestamp(user),
            self.contract.releasing_balance(user),
            self.contract.releasing_timestamp(user),
        )?;
        let balances = StakingBalances {
            staked,
            maturing,
            maturing_at,
            releasing,
            releasing_at,
        };
        self.balances.send_replace(balances);
        debug!(account = %user, ?balances, "staking balances refreshed");
        Ok(balances)
    }
}

fn balances_refresher(reader: &Arc<StakingReader>) -> Refresher<Receipt> {
    let reader = Arc::clone(reader);
    Refresher::new("staking balances", move |_receipt: Receipt| {
        let reader = Arc::clone(&reader);
        async move { reader.refresh().await.map(|_| ()) }
    })
}

/// Stake, unstake and withdraw against the staking contract.
pub struct StakingService {
    reader: Arc<StakingReader>,
    stake: Tracker,
    unstake: Tracker,
    withdraw: Tracker,
}

impl StakingService {
    pub fn connect(conn: &Connection) -> Result<Self> {
        let address = conn.address(ContractKind::Staking)?;
        let (balances, _) = watch::channel(StakingBalances::default());
        let reader = Arc::new(StakingReader {
            contract: conn.provider.staking(&address)?,
            account: conn.account.clone(),
            balances,
        });
        Ok(Self {
            stake: conn.tracker("stake", balances_refresher(&reader)),
            unstake: conn.tracker("unstake", balances_refresher(&reader)),
            withdraw: conn.tracker("withdraw", balances_refresher(&reader)),
            reader,
        })
    }

    pub async fn stake(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.stake.run(|| async move { contract.stake(amount).await }).await
    }

    pub async fn unstake(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.unstake.run(|| async move { contract.unstake(amount).await }).await
    }

    pub async fn withdraw(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        self.withdraw.run(|| async move { contract.withdraw(amount).await }).await
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

    /// Last published balances.
    pub fn balances(&self) -> StakingBalances {
        *self.reader.balances.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StakingBalances> {
        self.reader.balances.subscribe()
    }

    /// Query the contract and publish the result.
    pub async fn refresh(&self) -> Result<StakingBalances> {
        self.reader.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::token::TokenService;
    use staking_contracts::memory::{MemoryChain, MATURATION_PERIOD, RELEASE_PERIOD};
    use staking_tracker::TxStatus;
    use staking_types::units::parse_ctsi;

    async fn funded_chain(amount: u128) -> MemoryChain {
        let chain = MemoryChain::new(USER).unwrap();
        chain.mint(USER, amount).unwrap();
        let token = TokenService::connect(&connect(&chain), STAKING).unwrap();
        token.approve(amount).await.unwrap();
        chain
    }

    #[tokio::test]
    async fn test_stake_refreshes_balances() {
        let amount = parse_ctsi("1000").unwrap();
        let chain = funded_chain(amount).await;
        let service = StakingService::connect(&connect(&chain)).unwrap();
        let mut updates = service.subscribe();

        let snapshot = service.stake(amount).await.unwrap();
        assert_eq!(snapshot.status, TxStatus::Confirmed);
        assert_eq!(snapshot.receipt.unwrap().block_number, chain.block_number());

        service.stake_tracker().refreshed().await;
        assert!(updates.has_changed().unwrap());
        let balances = *updates.borrow_and_update();
        assert_eq!(balances.maturing, amount);
        assert_eq!(balances.maturing_at, chain.now() + MATURATION_PERIOD);
        assert_eq!(balances.staked, 0);
    }

    #[tokio::test]
    async fn test_unstake_and_withdraw() {
        let amount = parse_ctsi("10").unwrap();
        let chain = funded_chain(amount).await;
        let service = StakingService::connect(&connect(&chain)).unwrap();
        service.stake(amount).await.unwrap();
        chain.advance_time(MATURATION_PERIOD);

        service.unstake(amount).await.unwrap();
        service.unstake_tracker().refreshed().await;
        assert_eq!(service.balances().releasing, amount);
        assert_eq!(service.balances().staked, 0);

        // Still releasing: the contract refuses before dispatch.
        let snapshot = service.withdraw(amount).await.unwrap();
        assert!(snapshot.is_failed());
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Staking: tokens are not released yet")
        );

        chain.advance_time(RELEASE_PERIOD);
        let snapshot = service.withdraw(amount).await.unwrap();
        assert!(snapshot.is_confirmed());
        assert!(snapshot.error.is_none());
        service.withdraw_tracker().refreshed().await;
        let balances = service.balances();
        assert_eq!(balances.releasing, 0);
        assert_eq!(balances.staked + balances.maturing, 0);
        assert_eq!(chain.confirmations_waited().len(), 4);
    }

    #[tokio::test]
    async fn test_revert_keeps_balances() {
        let amount = parse_ctsi("5").unwrap();
        let chain = funded_chain(amount).await;
        let service = StakingService::connect(&connect(&chain)).unwrap();

        chain.revert_next("execution reverted");
        let snapshot = service.stake(amount).await.unwrap();
        assert!(snapshot.is_failed());
        assert_eq!(snapshot.error.as_deref(), Some("execution reverted"));
        assert_eq!(service.refresh().await.unwrap(), StakingBalances::default());
    }

    #[tokio::test]
    async fn test_actions_have_independent_trackers() {
        let chain = funded_chain(100).await;
        let service = StakingService::connect(&connect(&chain)).unwrap();
        service.unstake(1).await.unwrap();
        assert!(service.unstake_tracker().snapshot().is_failed());
        assert_eq!(service.stake_tracker().status(), TxStatus::Idle);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let chain = funded_chain(100).await;
        let service = StakingService::connect(&connect(&chain)).unwrap();
        chain.fail_reads(Some("node unreachable"));
        assert!(service.refresh().await.is_err());

        // A failing refresh after confirmation does not undo the confirmation.
        let snapshot = service.stake(100).await.unwrap();
        service.stake_tracker().refreshed().await;
        assert!(snapshot.is_confirmed());
        assert!(service.stake_tracker().snapshot().is_confirmed());
    }
}

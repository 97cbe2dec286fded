use std::sync::Arc;

use serde::{Deserialize, Serialize};
use staking_contracts::TokenContract;
use staking_networks::ContractKind;
use staking_tracker::Refresher;
use staking_types::units::{format_ctsi, parse_ctsi};
use staking_types::{normalize_address, Address, Receipt, Result};
use tokio::sync::watch;
use tracing::debug;

use crate::{Connection, RunResult, Tracker};

/// CTSI balance of the account and its allowance to the spender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalances {
    pub balance: u128,
    pub allowance: u128,
}

struct TokenReader {
    contract: Arc<dyn TokenContract>,
    account: Address,
    spender: Address,
    balances: watch::Sender<TokenBalances>,
}

impl TokenReader {
    async fn refresh(&self) -> Result<TokenBalances> {
        let (balance, allowance) = tokio::try_join!(
            self.contract.balance_of(&self.account),
            self.contract.allowance(&self.account, &self.spender),
        )?;
        let balances = TokenBalances { balance, allowance };
        self.balances.send_replace(balances);
        debug!(account = %self.account, spender = %self.spender, ?balances, "token balances refreshed");
        Ok(balances)
    }
}

/// CTSI token access for one `(account, spender)` pair.
pub struct TokenService {
    reader: Arc<TokenReader>,
    approve: Tracker,
}

impl TokenService {
    /// `spender` is usually the staking contract or a staking pool.
    pub fn connect(conn: &Connection, spender: &str) -> Result<Self> {
        let address = conn.address(ContractKind::CartesiToken)?;
        let (balances, _) = watch::channel(TokenBalances::default());
        let reader = Arc::new(TokenReader {
            contract: conn.provider.token(&address)?,
            account: conn.account.clone(),
            spender: normalize_address(spender)?,
            balances,
        });

        let refresh_reader = Arc::clone(&reader);
        let refresher = Refresher::new("token balances", move |_receipt: Receipt| {
            let reader = Arc::clone(&refresh_reader);
            async move { reader.refresh().await.map(|_| ()) }
        });

        Ok(Self {
            approve: conn.tracker("approve", refresher),
            reader,
        })
    }

    pub fn spender(&self) -> &Address {
        &self.reader.spender
    }

    /// Set the spender's allowance to `amount`.
    pub async fn approve(&self, amount: u128) -> RunResult {
        let contract = Arc::clone(&self.reader.contract);
        let spender = self.reader.spender.clone();
        self.approve
            .run(|| async move { contract.approve(&spender, amount).await })
            .await
    }

    pub fn approve_tracker(&self) -> &Tracker {
        &self.approve
    }

    pub fn balances(&self) -> TokenBalances {
        *self.reader.balances.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TokenBalances> {
        self.reader.balances.subscribe()
    }

    pub async fn refresh(&self) -> Result<TokenBalances> {
        self.reader.refresh().await
    }

    /// Parse CTSI text typed by the user.
    pub fn parse(&self, text: &str) -> Result<u128> {
        parse_ctsi(text)
    }

    pub fn format(&self, amount: u128) -> String {
        format_ctsi(amount)
    }
}

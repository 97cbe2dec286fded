//! Deployment registry: which contracts live where, per chain.
//!
//! - Chain id -> network name and confirmation count
//! - (chain id, contract) -> deployed address
//! - Loaded from a JSON config or from a directory of deployment artifacts
//!
//! All addresses are validated when the registry is built, so lookups after
//! startup only fail for chains or contracts that were never configured.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use staking_types::{normalize_address, Address, ChainId, Result, StakingError};
use tracing::{debug, info};

/// Confirmations waited for when a chain does not configure its own.
pub const DEFAULT_CONFIRMATIONS: u32 = 1;

/// Networks with published deployment artifacts.
pub const KNOWN_NETWORKS: &[(ChainId, &str)] = &[
    (1, "mainnet"),
    (3, "ropsten"),
    (4, "rinkeby"),
    (5, "goerli"),
    (42, "kovan"),
    (97, "bsc_testnet"),
    (80001, "matic_testnet"),
    (31337, "localhost"),
];

pub fn known_network_name(chain_id: ChainId) -> Option<&'static str> {
    KNOWN_NETWORKS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| *name)
}

/// A network the dashboard can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: ChainId,
    pub name: String,
    pub confirmations: u32,
}

/// Contracts the dashboard attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContractKind {
    Staking,
    CartesiToken,
    WorkerManager,
}

impl ContractKind {
    pub const ALL: [ContractKind; 3] = [
        ContractKind::Staking,
        ContractKind::CartesiToken,
        ContractKind::WorkerManager,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContractKind::Staking => "Staking",
            ContractKind::CartesiToken => "CartesiToken",
            ContractKind::WorkerManager => "WorkerManager",
        }
    }

    /// File stem of the deployment artifact (`<network>/<artifact>.json`).
    pub fn artifact(&self) -> &'static str {
        match self {
            ContractKind::Staking => "StakingImpl",
            ContractKind::CartesiToken => "CartesiToken",
            ContractKind::WorkerManager => "WorkerManagerImpl",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One chain in the JSON config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub chain_id: ChainId,
    /// Required for chains outside [`KNOWN_NETWORKS`].
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u32>,
    #[serde(default)]
    pub contracts: BTreeMap<ContractKind, String>,
}

/// Registry configuration, usually read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub chains: Vec<ChainEntry>,
}

impl RegistryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| StakingError::Config(format!("invalid registry config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            StakingError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&data)
    }
}

#[derive(Debug, Clone)]
struct ChainDeployment {
    network: Network,
    contracts: BTreeMap<ContractKind, Address>,
}

/// Validated mapping from chain to network metadata and contract addresses.
#[derive(Debug, Clone, Default)]
pub struct DeploymentRegistry {
    chains: BTreeMap<ChainId, ChainDeployment>,
}

impl DeploymentRegistry {
    /// Build a registry from config, validating every entry.
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        let mut chains = BTreeMap::new();

        for entry in config.chains {
            if chains.contains_key(&entry.chain_id) {
                return Err(StakingError::Config(format!(
                    "chain {} configured twice",
                    entry.chain_id
                )));
            }

            let name = match entry.name {
                Some(name) => name,
                None => known_network_name(entry.chain_id)
                    .ok_or(StakingError::UnsupportedNetwork(entry.chain_id))?
                    .to_string(),
            };
            let confirmations = entry.confirmations.unwrap_or(DEFAULT_CONFIRMATIONS);
            if confirmations == 0 {
                return Err(StakingError::Config(format!(
                    "chain {}: confirmations must be at least 1",
                    entry.chain_id
                )));
            }

            let mut contracts = BTreeMap::new();
            for (kind, address) in entry.contracts {
                contracts.insert(kind, normalize_address(&address)?);
            }

            debug!(chain_id = entry.chain_id, network = %name, contracts = contracts.len(), "registered chain");
            chains.insert(
                entry.chain_id,
                ChainDeployment {
                    network: Network {
                        chain_id: entry.chain_id,
                        name,
                        confirmations,
                    },
                    contracts,
                },
            );
        }

        Ok(Self { chains })
    }

    /// Load deployment artifacts laid out as `<root>/<network>/<Artifact>.json`.
    ///
    /// Every requested chain must be a known network. A missing artifact file
    /// means the contract is not deployed there; a malformed one is an error.
    pub fn load_artifacts(root: &Path, chain_ids: &[ChainId]) -> Result<Self> {
        let mut config = RegistryConfig::default();

        for &chain_id in chain_ids {
            let network = known_network_name(chain_id)
                .ok_or(StakingError::UnsupportedNetwork(chain_id))?;
            let mut contracts = BTreeMap::new();

            for kind in ContractKind::ALL {
                let path = root.join(network).join(format!("{}.json", kind.artifact()));
                if !path.exists() {
                    continue;
                }
                let data = std::fs::read_to_string(&path).map_err(|e| {
                    StakingError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                let address = artifact_address(&data, chain_id).map_err(|e| {
                    StakingError::Config(format!("{}: {}", path.display(), e))
                })?;
                contracts.insert(kind, address);
            }

            config.chains.push(ChainEntry {
                chain_id,
                name: Some(network.to_string()),
                confirmations: None,
                contracts,
            });
        }

        Self::from_config(config)
    }

    /// Override the confirmation count of a configured chain.
    pub fn set_confirmations(&mut self, chain_id: ChainId, confirmations: u32) -> Result<()> {
        if confirmations == 0 {
            return Err(StakingError::Config(
                "confirmations must be at least 1".into(),
            ));
        }
        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or(StakingError::UnsupportedNetwork(chain_id))?;
        chain.network.confirmations = confirmations;
        Ok(())
    }

    pub fn network(&self, chain_id: ChainId) -> Result<&Network> {
        self.chains
            .get(&chain_id)
            .map(|c| &c.network)
            .ok_or(StakingError::UnsupportedNetwork(chain_id))
    }

    /// Address of `kind` on `chain_id`.
    pub fn address(&self, chain_id: ChainId, kind: ContractKind) -> Result<Address> {
        let chain = self
            .chains
            .get(&chain_id)
            .ok_or(StakingError::UnsupportedNetwork(chain_id))?;
        let address = chain
            .contracts
            .get(&kind)
            .cloned()
            .ok_or_else(|| StakingError::NotDeployed {
                contract: kind.name().to_string(),
                network: chain.network.name.clone(),
            })?;
        info!(
            "Attaching {} to address '{}' deployed at network '{}'",
            kind, address, chain.network.name
        );
        Ok(address)
    }

    /// Confirmations to wait for on `chain_id` (default 1 for unknown chains).
    pub fn confirmations(&self, chain_id: ChainId) -> u32 {
        self.chains
            .get(&chain_id)
            .map(|c| c.network.confirmations)
            .unwrap_or(DEFAULT_CONFIRMATIONS)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.keys().copied()
    }
}

/// Extract the address from an artifact: top-level `address`, or
/// `networks.<chainId>.address` as published by the token package.
fn artifact_address(data: &str, chain_id: ChainId) -> Result<Address> {
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| StakingError::Config(format!("invalid artifact json: {}", e)))?;

    let address = json
        .get("address")
        .and_then(|v| v.as_str())
        .or_else(|| {
            json.get("networks")
                .and_then(|n| n.get(chain_id.to_string()))
                .and_then(|n| n.get("address"))
                .and_then(|v| v.as_str())
        })
        .ok_or_else(|| StakingError::Config("artifact has no address".into()))?;

    normalize_address(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAKING: &str = "0x9EDEAdFDE65BCfD0907db3AcdB3445229c764A69";
    const TOKEN: &str = "0x491604c0FDF08347Dd1fa4Ee062a822A5DD06B5D";

    fn sample_config() -> RegistryConfig {
        RegistryConfig::from_json_str(&format!(
            r#"{{
                "chains": [
                    {{ "chain_id": 1, "confirmations": 3,
                       "contracts": {{ "Staking": "{}", "CartesiToken": "{}" }} }},
                    {{ "chain_id": 1337, "name": "devnet" }}
                ]
            }}"#,
            STAKING, TOKEN
        ))
        .unwrap()
    }

    #[test]
    fn test_lookup_from_config() {
        let registry = DeploymentRegistry::from_config(sample_config()).unwrap();

        assert_eq!(registry.network(1).unwrap().name, "mainnet");
        assert_eq!(registry.confirmations(1), 3);
        assert_eq!(registry.confirmations(1337), 1);
        assert_eq!(
            registry.address(1, ContractKind::Staking).unwrap(),
            STAKING.to_lowercase()
        );
        assert_eq!(registry.chain_ids().collect::<Vec<_>>(), vec![1, 1337]);
    }

    #[test]
    fn test_unsupported_network() {
        let registry = DeploymentRegistry::from_config(sample_config()).unwrap();
        assert!(matches!(
            registry.network(42),
            Err(StakingError::UnsupportedNetwork(42))
        ));
        assert!(matches!(
            registry.address(42, ContractKind::Staking),
            Err(StakingError::UnsupportedNetwork(42))
        ));
    }

    #[test]
    fn test_not_deployed() {
        let registry = DeploymentRegistry::from_config(sample_config()).unwrap();
        let err = registry.address(1, ContractKind::WorkerManager).unwrap_err();
        assert_eq!(err.to_string(), "WorkerManager not deployed at network 'mainnet'");
    }

    #[test]
    fn test_invalid_address_fails_at_startup() {
        let config = RegistryConfig::from_json_str(
            r#"{ "chains": [ { "chain_id": 3, "contracts": { "Staking": "0x1234" } } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            DeploymentRegistry::from_config(config),
            Err(StakingError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unknown_chain_without_name_rejected() {
        let config = RegistryConfig::from_json_str(r#"{ "chains": [ { "chain_id": 999 } ] }"#).unwrap();
        assert!(matches!(
            DeploymentRegistry::from_config(config),
            Err(StakingError::UnsupportedNetwork(999))
        ));
    }

    #[test]
    fn test_duplicate_chain_and_zero_confirmations_rejected() {
        let dup = RegistryConfig::from_json_str(
            r#"{ "chains": [ { "chain_id": 3 }, { "chain_id": 3 } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            DeploymentRegistry::from_config(dup),
            Err(StakingError::Config(_))
        ));

        let zero = RegistryConfig::from_json_str(
            r#"{ "chains": [ { "chain_id": 3, "confirmations": 0 } ] }"#,
        )
        .unwrap();
        assert!(DeploymentRegistry::from_config(zero).is_err());
    }

    #[test]
    fn test_set_confirmations() {
        let mut registry = DeploymentRegistry::from_config(sample_config()).unwrap();
        registry.set_confirmations(1337, 5).unwrap();
        assert_eq!(registry.confirmations(1337), 5);
        assert!(registry.set_confirmations(1337, 0).is_err());
        assert!(registry.set_confirmations(4, 2).is_err());
    }

    #[test]
    fn test_load_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ropsten = dir.path().join("ropsten");
        std::fs::create_dir_all(&ropsten).unwrap();
        std::fs::write(
            ropsten.join("StakingImpl.json"),
            format!(r#"{{ "address": "{}", "abi": [] }}"#, STAKING),
        )
        .unwrap();
        std::fs::write(
            ropsten.join("CartesiToken.json"),
            format!(r#"{{ "networks": {{ "3": {{ "address": "{}" }} }} }}"#, TOKEN),
        )
        .unwrap();

        let registry = DeploymentRegistry::load_artifacts(dir.path(), &[3]).unwrap();
        assert_eq!(registry.network(3).unwrap().name, "ropsten");
        assert_eq!(
            registry.address(3, ContractKind::CartesiToken).unwrap(),
            TOKEN.to_lowercase()
        );
        assert!(matches!(
            registry.address(3, ContractKind::WorkerManager),
            Err(StakingError::NotDeployed { .. })
        ));
    }

    #[test]
    fn test_load_artifacts_rejects_unknown_chain_and_bad_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DeploymentRegistry::load_artifacts(dir.path(), &[12345]),
            Err(StakingError::UnsupportedNetwork(12345))
        ));

        let goerli = dir.path().join("goerli");
        std::fs::create_dir_all(&goerli).unwrap();
        std::fs::write(goerli.join("StakingImpl.json"), r#"{ "abi": [] }"#).unwrap();
        assert!(matches!(
            DeploymentRegistry::load_artifacts(dir.path(), &[5]),
            Err(StakingError::Config(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"{ "chains": [ { "chain_id": 31337 } ] }"#).unwrap();
        let registry = DeploymentRegistry::from_config(RegistryConfig::from_file(&path).unwrap()).unwrap();
        assert_eq!(registry.network(31337).unwrap().name, "localhost");

        assert!(RegistryConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod units;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// 0x-prefixed, lowercase 20-byte account or contract address.
pub type Address = String;

/// Chain identifier as reported by the connected wallet.
pub type ChainId = u64;

/// Staking SDK error types.
#[derive(Debug, Error)]
pub enum StakingError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unsupported network: chain id {0}")]
    UnsupportedNetwork(ChainId),

    #[error("{contract} not deployed at network '{network}'")]
    NotDeployed { contract: String, network: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// The transaction could not be dispatched (e.g. the user refused to sign).
    #[error("{0}")]
    Rejected(String),

    /// The transaction was dispatched but failed on-chain or was dropped.
    #[error("{0}")]
    Reverted(String),

    #[error("indexer error: {0}")]
    Indexer(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StakingError>;

/// Confirmation data of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: Hex,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

/// Validate and normalize an address to its lowercase 0x-prefixed form.
pub fn normalize_address(address: &str) -> Result<Address> {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| StakingError::InvalidAddress(address.to_string()))?;
    if body.len() != 40 {
        return Err(StakingError::InvalidAddress(address.to_string()));
    }
    let bytes = hex::decode(body).map_err(|_| StakingError::InvalidAddress(address.to_string()))?;
    Ok(bytes_to_hex(&bytes))
}

/// Compare two addresses ignoring checksum casing.
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x").eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

/// Parse a hex string to a big-endian byte array.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| StakingError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_checksummed_address() {
        let addr = normalize_address("0xE656584736b1EFC14b4b6c785AA9C23BAc8f41AA").unwrap();
        assert_eq!(addr, "0xe656584736b1efc14b4b6c785aa9c23bac8f41aa");
    }

    #[test]
    fn test_normalize_rejects_bad_addresses() {
        assert!(matches!(
            normalize_address("E656584736b1EFC14b4b6c785AA9C23BAc8f41AA"),
            Err(StakingError::InvalidAddress(_))
        ));
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xZZ56584736b1EFC14b4b6c785AA9C23BAc8f41AA").is_err());
    }

    #[test]
    fn test_same_address_ignores_case() {
        assert!(same_address(
            "0x907eA0e65Ecf3af503007B382E1280Aeb46104ad",
            "0x907ea0e65ecf3af503007b382e1280aeb46104ad"
        ));
        assert!(!same_address(
            "0x907eA0e65Ecf3af503007B382E1280Aeb46104ad",
            "0xe656584736b1efc14b4b6c785aa9c23bac8f41aa"
        ));
    }

    #[test]
    fn test_receipt_wire_format() {
        let receipt = Receipt {
            tx_hash: "0xabc".into(),
            block_number: 100,
            gas_used: None,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["blockNumber"], 100);
        assert!(json.get("gasUsed").is_none());
    }

    #[test]
    fn test_error_messages_are_verbatim() {
        let err = StakingError::Reverted("reverted".into());
        assert_eq!(err.to_string(), "reverted");
        let err = StakingError::NotDeployed {
            contract: "Staking".into(),
            network: "ropsten".into(),
        };
        assert_eq!(err.to_string(), "Staking not deployed at network 'ropsten'");
    }
}

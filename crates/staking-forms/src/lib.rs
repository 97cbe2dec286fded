//! Input validation for the staking forms.
//!
//! Validators take the text the user typed and return the value to submit,
//! or a [`FormError`] whose message is displayed as is.

use serde::{Deserialize, Serialize};
use staking_contracts::CommissionModel;
use staking_types::units::{parse_ctsi, parse_units};
use thiserror::Error;

/// Largest flat-rate commission, in basis points.
pub const MAX_COMMISSION_BASIS_POINTS: u16 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Value must be greater than 0")]
    Zero,

    #[error("Not enough balance")]
    NotEnoughBalance,

    #[error("Not enough allowance")]
    NotEnoughAllowance,

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid ENS name: {0}")]
    InvalidEnsName(String),

    #[error("Commission must be between 0% and 100%")]
    CommissionOutOfRange,

    #[error("Commission must have at most 2 decimal places")]
    CommissionPrecision,

    #[error("Gas must be a positive integer")]
    InvalidGas,
}

pub type FormResult<T> = std::result::Result<T, FormError>;

fn parse_amount(input: &str) -> FormResult<u128> {
    parse_ctsi(input).map_err(|_| FormError::InvalidAmount)
}

/// Validate an unstake amount against the user's shares.
pub fn validate_unstake(input: &str, shares: u128) -> FormResult<u128> {
    let amount = parse_amount(input)?;
    if amount == 0 {
        Err(FormError::Zero)
    } else if amount > shares {
        Err(FormError::NotEnoughBalance)
    } else {
        Ok(amount)
    }
}

/// Validate a stake amount against the wallet balance and the allowance
/// granted to the staking contract.
pub fn validate_stake(input: &str, balance: u128, allowance: u128) -> FormResult<u128> {
    let amount = parse_amount(input)?;
    if amount == 0 {
        Err(FormError::Zero)
    } else if amount > balance {
        Err(FormError::NotEnoughBalance)
    } else if amount > allowance {
        Err(FormError::NotEnoughAllowance)
    } else {
        Ok(amount)
    }
}

/// Validate an ENS name such as `mypool.eth` or `staking.mypool.eth`.
pub fn validate_ens_name(name: &str) -> FormResult<String> {
    let name = name.trim();
    let invalid = |reason: &str| FormError::InvalidEnsName(reason.to_string());

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("name must have at least two labels"));
    }
    if labels.last() != Some(&"eth") {
        return Err(invalid("name must end with .eth"));
    }
    for label in &labels {
        if label.is_empty() {
            return Err(invalid("empty label"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid(&format!("invalid characters in '{}'", label)));
        }
    }
    Ok(name.to_string())
}

/// Commission fields as entered in the pool settings form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "camelCase")]
pub enum CommissionForm {
    /// Percentage of each block reward, e.g. "12.5".
    FlatRate { percent: String },
    /// Gas amount charged per block produced.
    GasBased { gas: String },
}

impl CommissionForm {
    pub fn validate(&self) -> FormResult<CommissionModel> {
        match self {
            CommissionForm::FlatRate { percent } => {
                let percent = percent.trim();
                if percent.starts_with('-') {
                    return Err(FormError::CommissionOutOfRange);
                }
                let decimals = percent
                    .split_once('.')
                    .map(|(_, f)| f.trim_end_matches('0').len())
                    .unwrap_or(0);
                if decimals > 2 {
                    return Err(FormError::CommissionPrecision);
                }
                let basis_points = parse_units(percent, 2).map_err(|_| FormError::InvalidAmount)?;
                if basis_points > MAX_COMMISSION_BASIS_POINTS as u128 {
                    return Err(FormError::CommissionOutOfRange);
                }
                Ok(CommissionModel::FlatRate {
                    basis_points: basis_points as u16,
                })
            }
            CommissionForm::GasBased { gas } => match gas.trim().parse::<u64>() {
                Ok(gas) if gas > 0 => Ok(CommissionModel::GasBased { gas }),
                _ => Err(FormError::InvalidGas),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstake_messages() {
        let shares = parse_ctsi("10").unwrap();
        assert_eq!(
            validate_unstake("0", shares).unwrap_err().to_string(),
            "Value must be greater than 0"
        );
        assert_eq!(
            validate_unstake("10.5", shares).unwrap_err().to_string(),
            "Not enough balance"
        );
        assert_eq!(validate_unstake("2.5", shares).unwrap(), parse_ctsi("2.5").unwrap());
        assert_eq!(validate_unstake("10", shares).unwrap(), shares);
        assert_eq!(validate_unstake("abc", shares), Err(FormError::InvalidAmount));
    }

    #[test]
    fn test_stake_checks_balance_before_allowance() {
        let balance = parse_ctsi("100").unwrap();
        let allowance = parse_ctsi("50").unwrap();
        assert_eq!(validate_stake("0.0", balance, allowance), Err(FormError::Zero));
        assert_eq!(
            validate_stake("150", balance, allowance),
            Err(FormError::NotEnoughBalance)
        );
        assert_eq!(
            validate_stake("75", balance, allowance).unwrap_err().to_string(),
            "Not enough allowance"
        );
        assert_eq!(validate_stake("50", balance, allowance), Ok(allowance));
    }

    #[test]
    fn test_ens_names() {
        assert_eq!(validate_ens_name(" mypool.eth ").unwrap(), "mypool.eth");
        assert!(validate_ens_name("staking.my-pool2.eth").is_ok());
        assert!(validate_ens_name("").is_err());
        assert!(validate_ens_name("eth").is_err());
        assert!(validate_ens_name("mypool.com").is_err());
        assert!(validate_ens_name("MyPool.eth").is_err());
        assert!(validate_ens_name("my..pool.eth").is_err());
        assert!(validate_ens_name("my_pool.eth").is_err());
    }

    #[test]
    fn test_flat_rate_commission() {
        let form = |p: &str| CommissionForm::FlatRate { percent: p.to_string() };
        assert_eq!(
            form("12.5").validate(),
            Ok(CommissionModel::FlatRate { basis_points: 1250 })
        );
        assert_eq!(form("0").validate(), Ok(CommissionModel::FlatRate { basis_points: 0 }));
        assert_eq!(
            form("100.00").validate(),
            Ok(CommissionModel::FlatRate { basis_points: 10_000 })
        );
        assert_eq!(form("100.01").validate(), Err(FormError::CommissionOutOfRange));
        assert_eq!(form("-1").validate(), Err(FormError::CommissionOutOfRange));
        assert_eq!(form("1.234").validate(), Err(FormError::CommissionPrecision));
        assert_eq!(form("ten").validate(), Err(FormError::InvalidAmount));
    }

    #[test]
    fn test_gas_based_commission() {
        let form = |g: &str| CommissionForm::GasBased { gas: g.to_string() };
        assert_eq!(
            form("120000").validate(),
            Ok(CommissionModel::GasBased { gas: 120_000 })
        );
        assert_eq!(form("0").validate(), Err(FormError::InvalidGas));
        assert_eq!(form("1.5").validate(), Err(FormError::InvalidGas));
    }

    #[test]
    fn test_commission_form_json() {
        let form: CommissionForm =
            serde_json::from_str(r#"{"model":"flatRate","percent":"5"}"#).unwrap();
        assert_eq!(form, CommissionForm::FlatRate { percent: "5".into() });
    }
}

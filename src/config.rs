//! Owner-managed configuration
//!
//! `Configuration` is the runtime singleton every component reads. It is only
//! mutated through owner-gated setters, each of which rejects the caller
//! before touching any field. `WrapperSettings` is the serde form loaded at
//! startup.

use crate::error::{Result, WrapperError};
use crate::types::{decimal_to_wad, Address, Direction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub owner: Address,
    /// Only account allowed to rebalance
    pub rebalancer: Address,
    /// Outer vault allowed to open, close and settle
    pub minter: Address,
    /// Cap on |position size| (18 decimals)
    pub max_position: u128,
    /// Referral tag forwarded to the venue
    pub referrer_code: String,
    /// Side the wrapper holds: short for USD hedges, long for synths
    pub side: Direction,
    /// Collateral stays in the wrapper; venue margin is a pre-funded buffer
    pub tail_asset: bool,
}

/// Partial update applied by `set_owner_config`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    pub owner: Option<Address>,
    pub rebalancer: Option<Address>,
    pub minter: Option<Address>,
    pub max_position: Option<u128>,
    pub referrer_code: Option<String>,
    pub tail_asset: Option<bool>,
}

impl Configuration {
    pub fn new(owner: Address, minter: Address, rebalancer: Address, side: Direction, max_position: u128) -> Self {
        Self {
            owner,
            rebalancer,
            minter,
            max_position,
            referrer_code: String::new(),
            side,
            tail_asset: false,
        }
    }

    pub fn ensure_owner(&self, sender: &Address) -> Result<()> {
        if *sender != self.owner {
            return Err(WrapperError::Unauthorized(
                "Ownable: caller is not the owner".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_minter(&self, sender: &Address) -> Result<()> {
        if *sender != self.minter {
            return Err(WrapperError::unauthorized("minter"));
        }
        Ok(())
    }

    pub fn ensure_rebalancer(&self, sender: &Address) -> Result<()> {
        if *sender != self.rebalancer {
            return Err(WrapperError::unauthorized("rebalancer"));
        }
        Ok(())
    }

    pub fn set_max_position(&mut self, sender: &Address, max_position: u128) -> Result<()> {
        self.ensure_owner(sender)?;
        self.max_position = max_position;
        Ok(())
    }

    pub fn set_rebalancer(&mut self, sender: &Address, rebalancer: Address) -> Result<()> {
        self.ensure_owner(sender)?;
        Self::ensure_nonzero(&rebalancer, "rebalancer")?;
        self.rebalancer = rebalancer;
        Ok(())
    }

    pub fn set_minter(&mut self, sender: &Address, minter: Address) -> Result<()> {
        self.ensure_owner(sender)?;
        Self::ensure_nonzero(&minter, "minter")?;
        self.minter = minter;
        Ok(())
    }

    pub fn set_referrer_code(&mut self, sender: &Address, code: String) -> Result<()> {
        self.ensure_owner(sender)?;
        self.referrer_code = code;
        Ok(())
    }

    pub fn set_tail_asset(&mut self, sender: &Address, tail_asset: bool) -> Result<()> {
        self.ensure_owner(sender)?;
        self.tail_asset = tail_asset;
        Ok(())
    }

    /// Validate the whole update first so a bad field leaves nothing applied
    pub fn apply(&mut self, sender: &Address, update: OwnerConfig) -> Result<()> {
        self.ensure_owner(sender)?;
        let mut next = self.clone();
        if let Some(owner) = update.owner {
            Self::ensure_nonzero(&owner, "owner")?;
            next.owner = owner;
        }
        if let Some(rebalancer) = update.rebalancer {
            Self::ensure_nonzero(&rebalancer, "rebalancer")?;
            next.rebalancer = rebalancer;
        }
        if let Some(minter) = update.minter {
            Self::ensure_nonzero(&minter, "minter")?;
            next.minter = minter;
        }
        if let Some(max_position) = update.max_position {
            next.max_position = max_position;
        }
        if let Some(code) = update.referrer_code {
            next.referrer_code = code;
        }
        if let Some(tail_asset) = update.tail_asset {
            next.tail_asset = tail_asset;
        }
        *self = next;
        Ok(())
    }

    fn ensure_nonzero(address: &Address, role: &str) -> Result<()> {
        if address.is_zero() {
            return Err(WrapperError::InvalidConfig(format!(
                "{} should not be the zero address",
                role
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid amount for {field}: {value}")]
    InvalidAmount { field: String, value: String },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Startup settings as read from JSON and the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperSettings {
    pub owner: String,
    pub minter: String,
    pub rebalancer: String,
    /// Whole underlying units, decimal string ("1000000.5")
    pub max_position: String,
    pub referrer_code: String,
    pub side: Direction,
    pub tail_asset: bool,
    pub collateral_decimals: u8,
    /// Venue fee in parts per million (simulation only)
    pub venue_fee_ppm: u128,
}

impl Default for WrapperSettings {
    fn default() -> Self {
        Self {
            owner: "0xowner".to_string(),
            minter: "0xusdlemma".to_string(),
            rebalancer: "0xrebalancer".to_string(),
            max_position: "1000000".to_string(),
            referrer_code: String::new(),
            side: Direction::Short,
            tail_asset: false,
            collateral_decimals: 18,
            venue_fee_ppm: 1_000,
        }
    }
}

impl WrapperSettings {
    pub const CONFIG_PATH_VAR: &'static str = "LEMMA_CONFIG";

    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// File named by `LEMMA_CONFIG` (or defaults), then env overrides
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let mut settings = match std::env::var(Self::CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max) = lookup("LEMMA_MAX_POSITION") {
            self.max_position = max;
        }
        if let Some(rebalancer) = lookup("LEMMA_REBALANCER") {
            self.rebalancer = rebalancer;
        }
        if let Some(tail) = lookup("LEMMA_TAIL_ASSET") {
            self.tail_asset = match tail.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "LEMMA_TAIL_ASSET must be a boolean, got {}",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn max_position_wad(&self) -> std::result::Result<u128, ConfigError> {
        let invalid = || ConfigError::InvalidAmount {
            field: "max_position".to_string(),
            value: self.max_position.clone(),
        };
        let value = Decimal::from_str(self.max_position.trim()).map_err(|_| invalid())?;
        decimal_to_wad(value).ok_or_else(invalid)
    }

    pub fn to_configuration(&self) -> std::result::Result<Configuration, ConfigError> {
        for (role, value) in [
            ("owner", &self.owner),
            ("minter", &self.minter),
            ("rebalancer", &self.rebalancer),
        ] {
            if Address::new(value.as_str()).is_zero() {
                return Err(ConfigError::Invalid(format!("{} should not be the zero address", role)));
            }
        }
        let mut config = Configuration::new(
            Address::new(self.owner.as_str()),
            Address::new(self.minter.as_str()),
            Address::new(self.rebalancer.as_str()),
            self.side,
            self.max_position_wad()?,
        );
        config.referrer_code = self.referrer_code.clone();
        config.tail_asset = self.tail_asset;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use std::collections::HashMap;

    fn config() -> Configuration {
        Configuration::new(
            Address::new("owner"),
            Address::new("minter"),
            Address::new("rebalancer"),
            Direction::Short,
            1_000 * WAD,
        )
    }

    #[test]
    fn test_owner_only_setters() {
        let mut cfg = config();
        let stranger = Address::new("stranger");
        assert!(matches!(
            cfg.set_max_position(&stranger, 1),
            Err(WrapperError::Unauthorized(_))
        ));
        assert!(cfg.set_referrer_code(&stranger, "X".into()).is_err());
        assert_eq!(cfg, config());

        let owner = Address::new("owner");
        cfg.set_max_position(&owner, 5 * WAD).unwrap();
        cfg.set_rebalancer(&owner, Address::new("bot")).unwrap();
        cfg.set_referrer_code(&owner, "ADemoReferrerCode".into()).unwrap();
        assert_eq!(cfg.max_position, 5 * WAD);
        assert_eq!(cfg.rebalancer, Address::new("bot"));
        assert_eq!(cfg.referrer_code, "ADemoReferrerCode");
    }

    #[test]
    fn test_zero_address_rejected() {
        let mut cfg = config();
        let owner = Address::new("owner");
        assert!(matches!(
            cfg.set_minter(&owner, Address::zero()),
            Err(WrapperError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bulk_update_is_all_or_nothing() {
        let mut cfg = config();
        let owner = Address::new("owner");
        let update = OwnerConfig {
            max_position: Some(7),
            rebalancer: Some(Address::zero()),
            ..Default::default()
        };
        assert!(cfg.apply(&owner, update).is_err());
        assert_eq!(cfg, config());

        let update = OwnerConfig {
            max_position: Some(7),
            tail_asset: Some(true),
            owner: Some(Address::new("new-owner")),
            ..Default::default()
        };
        cfg.apply(&owner, update).unwrap();
        assert_eq!(cfg.max_position, 7);
        assert!(cfg.tail_asset);
        assert!(cfg.ensure_owner(&owner).is_err());
    }

    #[test]
    fn test_settings_parse_and_override() {
        let raw = r#"{
            "owner": "0xabc",
            "minter": "0xminter",
            "rebalancer": "0xbot",
            "max_position": "1000.5",
            "side": "long"
        }"#;
        let mut settings: WrapperSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.side, Direction::Long);
        assert_eq!(settings.max_position_wad().unwrap(), 10_005 * WAD / 10);

        let env: HashMap<&str, &str> = [("LEMMA_MAX_POSITION", "90"), ("LEMMA_TAIL_ASSET", "true")]
            .into_iter()
            .collect();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        let config = settings.to_configuration().unwrap();
        assert_eq!(config.max_position, 90 * WAD);
        assert!(config.tail_asset);
    }

    #[test]
    fn test_settings_reject_bad_values() {
        let settings = WrapperSettings {
            max_position: "lots".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            settings.to_configuration(),
            Err(ConfigError::InvalidAmount { .. })
        ));

        let mut settings = WrapperSettings::default();
        let err = settings.apply_overrides(|_| Some("maybe".to_string()));
        assert!(err.is_err());
    }
}

//! Core types for the Lemma position wrapper

use crate::error::WrapperError;
use crate::math::WAD;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account or contract address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty() || *self == Self::zero()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction at the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Direction implied by a signed size change; `None` for zero
    pub fn of(signed: i128) -> Option<Self> {
        match signed {
            0 => None,
            s if s > 0 => Some(Direction::Long),
            _ => Some(Direction::Short),
        }
    }

    /// Apply this direction's sign to an unsigned amount
    pub fn signed(&self, amount: u128) -> Option<i128> {
        let amount = i128::try_from(amount).ok()?;
        Some(match self {
            Direction::Long => amount,
            Direction::Short => -amount,
        })
    }
}

/// Market status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Paused,
    Closed,
}

/// Lifecycle of the wrapper's market as seen locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Open,
    Paused,
    Closed,
    Settled,
}

impl From<MarketStatus> for MarketState {
    fn from(status: MarketStatus) -> Self {
        match status {
            MarketStatus::Open => MarketState::Open,
            MarketStatus::Paused => MarketState::Paused,
            MarketStatus::Closed => MarketState::Closed,
        }
    }
}

/// Rounding direction for collateral conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Amounts the wrapper receives
    Up,
    /// Amounts the wrapper pays out
    Down,
}

/// Price limit and deadline forwarded untouched to the venue trade call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeBounds {
    /// Worst acceptable execution price (18 decimals); zero disables the check
    pub price_limit: u128,
    /// Last venue timestamp (seconds) at which the trade may execute
    pub deadline: u64,
}

impl TradeBounds {
    pub const ENCODED_LEN: usize = 64;

    pub fn new(price_limit: u128, deadline: u64) -> Self {
        Self {
            price_limit,
            deadline,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, u64::MAX)
    }

    /// Two big-endian 32-byte words: price limit, deadline
    pub fn encode(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[16..32].copy_from_slice(&self.price_limit.to_be_bytes());
        out[56..64].copy_from_slice(&self.deadline.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, WrapperError> {
        if data.len() != Self::ENCODED_LEN {
            return Err(WrapperError::InvalidBounds(format!(
                "expected {} bytes, got {}",
                Self::ENCODED_LEN,
                data.len()
            )));
        }
        if data[..16].iter().any(|b| *b != 0) {
            return Err(WrapperError::InvalidBounds("price limit exceeds 128 bits".into()));
        }
        if data[32..56].iter().any(|b| *b != 0) {
            // uint256 max deadline is the conventional "no deadline"
            if data[32..64].iter().all(|b| *b == 0xff) {
                let mut price = [0u8; 16];
                price.copy_from_slice(&data[16..32]);
                return Ok(Self::new(u128::from_be_bytes(price), u64::MAX));
            }
            return Err(WrapperError::InvalidBounds("deadline exceeds 64 bits".into()));
        }
        let mut price = [0u8; 16];
        price.copy_from_slice(&data[16..32]);
        let mut deadline = [0u8; 8];
        deadline.copy_from_slice(&data[56..64]);
        Ok(Self::new(
            u128::from_be_bytes(price),
            u64::from_be_bytes(deadline),
        ))
    }

    pub fn decode_hex(encoded: &str) -> Result<Self, WrapperError> {
        let raw = hex::decode(encoded.trim_start_matches("0x"))
            .map_err(|e| WrapperError::InvalidBounds(e.to_string()))?;
        Self::decode(&raw)
    }
}

/// Outcome of a venue trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fill {
    /// Position size change magnitude (18 decimals)
    pub filled: u128,
    /// Quote value exchanged before fees (18 decimals)
    pub notional: u128,
    /// Fee charged by the venue (18 decimals)
    pub fee: u128,
}

/// Render a raw 18-decimal amount for logs and reports
pub fn wad_to_decimal(raw: i128) -> Decimal {
    // Decimal holds 28 significant digits; saturate anything wider
    match Decimal::try_from_i128_with_scale(raw, 18) {
        Ok(value) => value.normalize(),
        Err(_) if raw < 0 => Decimal::MIN,
        Err(_) => Decimal::MAX,
    }
}

/// Parse a human decimal amount ("1000.5") into raw 18-decimal units
pub fn decimal_to_wad(value: Decimal) -> Option<u128> {
    if value.is_sign_negative() {
        return None;
    }
    let scale = value.scale();
    let mantissa = u128::try_from(value.mantissa()).ok()?;
    if scale > 18 {
        return Some(mantissa / 10u128.pow(scale - 18));
    }
    mantissa.checked_mul(10u128.pow(18 - scale))
}

/// One whole unit as a raw 18-decimal value
pub fn units(whole: u128) -> u128 {
    whole * WAD
}

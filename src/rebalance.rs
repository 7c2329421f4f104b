//! Rebalance request validation
//!
//! The rebalancer supplies the magnitude; this module only enforces who may
//! ask and which way the trade may go. A request must carry the sign of the
//! outstanding unrealized funding PnL and may not exceed it, so every
//! accepted rebalance moves that PnL toward zero.

use crate::config::Configuration;
use crate::error::{Result, WrapperError};
use crate::types::{Address, Direction, TradeBounds};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceRequest {
    /// Signed trade amount (18 decimals); also the funding PnL realized
    pub signed_amount: i128,
    pub bounds: TradeBounds,
}

impl RebalanceRequest {
    pub fn new(signed_amount: i128, bounds: TradeBounds) -> Self {
        Self { signed_amount, bounds }
    }

    /// Build from the ABI-style bounds blob taken by `re_balance`
    pub fn decode(signed_amount: i128, encoded_bounds: &[u8]) -> Result<Self> {
        Ok(Self::new(signed_amount, TradeBounds::decode(encoded_bounds)?))
    }

    pub fn encoded_bounds(&self) -> [u8; TradeBounds::ENCODED_LEN] {
        self.bounds.encode()
    }

    pub fn direction(&self) -> Result<Direction> {
        Direction::of(self.signed_amount).ok_or(WrapperError::ZeroAmount)
    }

    /// Accept only trades that shrink `|unrealized|` without overshooting zero
    pub fn validate(&self, unrealized: i128) -> Result<()> {
        if self.signed_amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        if unrealized == 0 || unrealized.signum() != self.signed_amount.signum() {
            return Err(WrapperError::DirectionNotAllowed { unrealized });
        }
        let requested = self.signed_amount.unsigned_abs();
        if requested > unrealized.unsigned_abs() {
            return Err(WrapperError::RebalanceTooLarge { requested, unrealized });
        }
        Ok(())
    }
}

/// The sender must be the configured rebalancer; the `rebalancer` argument is
/// only accepted when it names the sender itself
pub fn authorize(config: &Configuration, sender: &Address, rebalancer: &Address) -> Result<()> {
    config.ensure_rebalancer(sender)?;
    if rebalancer != sender {
        return Err(WrapperError::unauthorized("rebalancer"));
    }
    Ok(())
}

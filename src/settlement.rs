//! Market lifecycle gate and post-close redemption
//!
//! States only move forward, `Open -> Paused -> Closed -> Settled`, driven by
//! the venue's reported status. A venue that reports an earlier status than
//! the one already recorded is ignored. `Settled` is entered only through the
//! one-time transition the handler owns.

use crate::error::{Result, WrapperError};
use crate::math::mul_div_down;
use crate::types::{MarketState, MarketStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementHandler {
    state: MarketState,
    /// Collateral pulled from the venue and not yet redeemed (native units)
    settled_collateral: u128,
    /// Funding accumulator frozen at settlement
    settlement_accumulator: i128,
}

impl Default for SettlementHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementHandler {
    pub fn new() -> Self {
        Self {
            state: MarketState::Open,
            settled_collateral: 0,
            settlement_accumulator: 0,
        }
    }

    pub fn state(&self) -> MarketState {
        self.state
    }

    pub fn settled_collateral(&self) -> u128 {
        self.settled_collateral
    }

    pub fn settlement_accumulator(&self) -> i128 {
        self.settlement_accumulator
    }

    /// Fold the venue-reported status into local state
    pub fn observe(&mut self, status: MarketStatus) -> MarketState {
        let reported = MarketState::from(status);
        if reported > self.state {
            debug!(from = ?self.state, to = ?reported, "market state changed");
            self.state = reported;
        } else if reported < self.state {
            debug!(?reported, recorded = ?self.state, "ignoring earlier venue status");
        }
        self.state
    }

    /// Gate for open, close and rebalance while trading at the venue
    pub fn ensure_open(&self) -> Result<()> {
        if self.state != MarketState::Open {
            return Err(WrapperError::MarketClosed(self.state));
        }
        Ok(())
    }

    pub fn ensure_settleable(&self) -> Result<()> {
        match self.state {
            MarketState::Closed => Ok(()),
            MarketState::Settled => Err(WrapperError::AlreadySettled),
            other => Err(WrapperError::MarketNotClosed(other)),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state == MarketState::Settled
    }

    /// Record the pulled margin and enter the terminal state
    pub fn mark_settled(&mut self, collateral: u128, accumulator: i128) -> Result<()> {
        self.ensure_settleable()?;
        self.state = MarketState::Settled;
        self.settled_collateral = collateral;
        self.settlement_accumulator = accumulator;
        info!(collateral, accumulator, "market settled");
        Ok(())
    }

    /// Pro-rata share of the pulled margin for closing `amount` of `held`
    pub fn redemption_for(&self, amount: u128, held: u128) -> Result<u128> {
        if !self.is_settled() {
            return Err(WrapperError::MarketClosed(self.state));
        }
        if amount > held {
            return Err(WrapperError::InsufficientPosition {
                requested: amount,
                held,
            });
        }
        if amount == held {
            return Ok(self.settled_collateral);
        }
        mul_div_down(self.settled_collateral, amount, held).ok_or(WrapperError::MathOverflow)
    }

    pub fn record_redemption(&mut self, payout: u128) -> Result<()> {
        self.settled_collateral = self
            .settled_collateral
            .checked_sub(payout)
            .ok_or(WrapperError::MathOverflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let mut handler = SettlementHandler::new();
        assert_eq!(handler.observe(MarketStatus::Open), MarketState::Open);
        assert!(handler.ensure_open().is_ok());

        assert_eq!(handler.observe(MarketStatus::Paused), MarketState::Paused);
        assert!(matches!(
            handler.ensure_open(),
            Err(WrapperError::MarketClosed(MarketState::Paused))
        ));
        assert_eq!(handler.observe(MarketStatus::Open), MarketState::Paused);
        assert!(handler.ensure_open().is_err());

        assert_eq!(handler.observe(MarketStatus::Closed), MarketState::Closed);
        assert_eq!(handler.observe(MarketStatus::Paused), MarketState::Closed);
        assert_eq!(handler.observe(MarketStatus::Open), MarketState::Closed);
    }

    #[test]
    fn test_settle_only_from_closed_and_once() {
        let mut handler = SettlementHandler::new();
        assert!(matches!(
            handler.mark_settled(10, 0),
            Err(WrapperError::MarketNotClosed(MarketState::Open))
        ));

        handler.observe(MarketStatus::Closed);
        handler.mark_settled(10, 3).unwrap();
        assert_eq!(handler.state(), MarketState::Settled);
        assert_eq!(handler.mark_settled(99, 0), Err(WrapperError::AlreadySettled));
        assert_eq!(handler.settled_collateral(), 10);
        assert_eq!(handler.settlement_accumulator(), 3);
        assert_eq!(handler.observe(MarketStatus::Open), MarketState::Settled);
    }

    #[test]
    fn test_redemption_is_pro_rata() {
        let mut handler = SettlementHandler::new();
        handler.observe(MarketStatus::Closed);
        handler.mark_settled(1_001, 0).unwrap();

        let first = handler.redemption_for(500, 1_000).unwrap();
        assert_eq!(first, 500);
        handler.record_redemption(first).unwrap();

        // The last holder takes the remainder, dust included
        let last = handler.redemption_for(500, 500).unwrap();
        assert_eq!(last, 501);
        assert!(handler.redemption_for(501, 500).is_err());
    }
}

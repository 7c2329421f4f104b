//! Position ledger with entry-funding-basis tracking
//!
//! The ledger never replays trade history. Every size change `delta` taken at
//! funding accumulator `a` adds `delta * a` to the entry funding basis, so
//! funding accrued since inception is always `basis - size * a_now`.
//! Positive accumulator growth means longs pay shorts.

use crate::error::{Result, WrapperError};
use crate::math::{to_signed, wmul};
use serde::{Deserialize, Serialize};

/// Net exposure held at the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Positive = long, negative = short (18 decimals)
    pub size: i128,
    /// Sum of `delta_i * accumulator_i` over every trade
    pub entry_funding_basis: i128,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size == 0
    }

    pub fn abs_size(&self) -> u128 {
        self.size.unsigned_abs()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLedger {
    position: Position,
    /// Funding PnL already moved out of the unrealized bucket by rebalances
    realized_funding_pnl: i128,
    /// Cash the wrapper expects at the venue: deposits - withdrawals - fees
    net_margin: i128,
    /// Trading fees charged by the venue over the wrapper's lifetime
    #[serde(default)]
    fees_paid: u128,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn size(&self) -> i128 {
        self.position.size
    }

    pub fn realized_funding_pnl(&self) -> i128 {
        self.realized_funding_pnl
    }

    pub fn net_margin(&self) -> i128 {
        self.net_margin
    }

    pub fn fees_paid(&self) -> u128 {
        self.fees_paid
    }

    pub fn record_fee(&mut self, fee: u128) -> Result<()> {
        self.fees_paid = self.fees_paid.checked_add(fee).ok_or(WrapperError::MathOverflow)?;
        Ok(())
    }

    /// Grow the position by `delta` taken at `accumulator`
    pub fn record_open(&mut self, delta: i128, accumulator: i128) -> Result<()> {
        let next = self.shifted(delta, accumulator)?;
        self.position = next;
        Ok(())
    }

    /// Shrink the position by `delta`, expressed with the position's own sign
    /// (closing 5 of a short is `delta = -5`)
    pub fn record_close(&mut self, delta: i128, accumulator: i128) -> Result<()> {
        self.check_closable(delta)?;
        let next = self.shifted(-delta, accumulator)?;
        self.position = next;
        Ok(())
    }

    /// Fails `InsufficientPosition` unless `delta` reduces the position without
    /// crossing zero
    pub fn check_closable(&self, delta: i128) -> Result<()> {
        let held = self.position.abs_size();
        let same_side = delta == 0
            || (delta > 0 && self.position.size > 0)
            || (delta < 0 && self.position.size < 0);
        if !same_side || delta.unsigned_abs() > held {
            return Err(WrapperError::InsufficientPosition {
                requested: delta.unsigned_abs(),
                held,
            });
        }
        Ok(())
    }

    /// Apply a signed size change, routing to open or close by its effect
    pub fn record_trade(&mut self, change: i128, accumulator: i128) -> Result<()> {
        let reduces = (change > 0 && self.position.size < 0) || (change < 0 && self.position.size > 0);
        if reduces {
            self.record_close(-change, accumulator)
        } else {
            self.record_open(change, accumulator)
        }
    }

    /// Track cash moved into (+) or out of (-) the venue margin account
    pub fn record_margin(&mut self, delta: i128) -> Result<()> {
        self.net_margin = self
            .net_margin
            .checked_add(delta)
            .ok_or(WrapperError::MathOverflow)?;
        Ok(())
    }

    /// `basis - size * accumulator`: funding owed to (+) or by (-) the position
    pub fn accrued_funding(&self, accumulator: i128) -> Result<i128> {
        let implied = wmul(self.position.size, accumulator).ok_or(WrapperError::MathOverflow)?;
        self.position
            .entry_funding_basis
            .checked_sub(implied)
            .ok_or(WrapperError::MathOverflow)
    }

    /// Funding PnL accrued since inception, plus any cash the venue holds
    /// beyond what the wrapper put there
    pub fn total_funding_pnl(&self, accumulator: i128, cash_balance: i128) -> Result<i128> {
        let accrued = self.accrued_funding(accumulator)?;
        let cash_drift = cash_balance
            .checked_sub(self.net_margin)
            .ok_or(WrapperError::MathOverflow)?;
        accrued.checked_add(cash_drift).ok_or(WrapperError::MathOverflow)
    }

    /// Funding PnL not yet realized by a rebalance
    pub fn unrealized_funding_pnl(&self, accumulator: i128, cash_balance: i128) -> Result<i128> {
        self.total_funding_pnl(accumulator, cash_balance)?
            .checked_sub(self.realized_funding_pnl)
            .ok_or(WrapperError::MathOverflow)
    }

    /// Move `amount` of funding PnL into the realized accumulator
    pub fn realize_funding(&mut self, amount: i128) -> Result<()> {
        self.realized_funding_pnl = self
            .realized_funding_pnl
            .checked_add(amount)
            .ok_or(WrapperError::MathOverflow)?;
        Ok(())
    }

    /// Drop exposure without touching the venue (post-settlement redemption)
    pub fn record_redemption(&mut self, amount: u128, accumulator: i128) -> Result<()> {
        let amount = to_signed(amount).ok_or(WrapperError::MathOverflow)?;
        let delta = if self.position.size < 0 { -amount } else { amount };
        self.record_close(delta, accumulator)
    }

    fn shifted(&self, change: i128, accumulator: i128) -> Result<Position> {
        let size = self
            .position
            .size
            .checked_add(change)
            .ok_or(WrapperError::MathOverflow)?;
        let weighted = wmul(change, accumulator).ok_or(WrapperError::MathOverflow)?;
        let entry_funding_basis = self
            .position
            .entry_funding_basis
            .checked_add(weighted)
            .ok_or(WrapperError::MathOverflow)?;
        Ok(Position {
            size,
            entry_funding_basis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use proptest::prelude::*;

    const ONE: i128 = WAD as i128;

    #[test]
    fn test_open_and_close_track_basis() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(-10 * ONE, 2 * ONE).unwrap();
        assert_eq!(ledger.size(), -10 * ONE);
        assert_eq!(ledger.position().entry_funding_basis, -20 * ONE);

        ledger.record_close(-4 * ONE, 3 * ONE).unwrap();
        assert_eq!(ledger.size(), -6 * ONE);
        // -20 + (4 * 3)
        assert_eq!(ledger.position().entry_funding_basis, -8 * ONE);
    }

    #[test]
    fn test_close_rejects_overclose_and_wrong_side() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(5 * ONE, 0).unwrap();

        let err = ledger.record_close(6 * ONE, 0).unwrap_err();
        assert_eq!(
            err,
            WrapperError::InsufficientPosition {
                requested: 6 * WAD,
                held: 5 * WAD
            }
        );
        assert!(ledger.record_close(-ONE, 0).is_err());
        assert_eq!(ledger.size(), 5 * ONE);
    }

    #[test]
    fn test_short_earns_positive_funding() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(-10 * ONE, 0).unwrap();
        // Accumulator rises by 0.5: longs pay, the short receives 10 * 0.5
        let pnl = ledger.unrealized_funding_pnl(ONE / 2, 0).unwrap();
        assert_eq!(pnl, 5 * ONE);
    }

    #[test]
    fn test_long_pays_positive_funding() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(10 * ONE, ONE).unwrap();
        let pnl = ledger.unrealized_funding_pnl(ONE + ONE / 10, 0).unwrap();
        assert_eq!(pnl, -ONE);
    }

    #[test]
    fn test_trade_at_current_accumulator_keeps_funding_pnl() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(-10 * ONE, 0).unwrap();
        let before = ledger.total_funding_pnl(ONE, 0).unwrap();
        ledger.record_trade(3 * ONE, ONE).unwrap();
        ledger.record_trade(-7 * ONE, ONE).unwrap();
        assert_eq!(ledger.total_funding_pnl(ONE, 0).unwrap(), before);
    }

    #[test]
    fn test_realize_moves_between_buckets() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(-10 * ONE, 0).unwrap();
        ledger.realize_funding(2 * ONE).unwrap();
        assert_eq!(ledger.realized_funding_pnl(), 2 * ONE);
        assert_eq!(ledger.unrealized_funding_pnl(ONE / 2, 0).unwrap(), 3 * ONE);
        assert_eq!(ledger.total_funding_pnl(ONE / 2, 0).unwrap(), 5 * ONE);
    }

    #[test]
    fn test_cash_drift_counts_toward_funding() {
        let mut ledger = PositionLedger::new();
        ledger.record_margin(100 * ONE).unwrap();
        ledger.record_margin(-ONE).unwrap();
        assert_eq!(ledger.net_margin(), 99 * ONE);
        // Venue reports 1 more than the wrapper deposited net of fees
        assert_eq!(ledger.total_funding_pnl(0, 100 * ONE).unwrap(), ONE);
    }

    #[test]
    fn test_fees_accumulate() {
        let mut ledger = PositionLedger::new();
        ledger.record_fee(WAD).unwrap();
        ledger.record_fee(WAD / 2).unwrap();
        assert_eq!(ledger.fees_paid(), 3 * WAD / 2);
        assert_eq!(ledger.record_fee(u128::MAX), Err(WrapperError::MathOverflow));
    }

    #[test]
    fn test_redemption_follows_position_sign() {
        let mut ledger = PositionLedger::new();
        ledger.record_open(-8 * ONE, 0).unwrap();
        ledger.record_redemption(3 * WAD, 0).unwrap();
        assert_eq!(ledger.size(), -5 * ONE);
        assert!(ledger.record_redemption(6 * WAD, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_funding_basis_is_linear(
            trades in proptest::collection::vec(
                (1i128..1_000_000, -5_000i128..5_000, any::<bool>()),
                1..20,
            )
        ) {
            let mut ledger = PositionLedger::new();
            let mut expected_basis = 0i128;
            for (units, acc_milli, is_open) in trades {
                let delta = units * ONE;
                // Accumulators in whole thousandths keep every product exact
                let accumulator = acc_milli * (ONE / 1_000);
                let signed_units = if is_open || ledger.size() < delta {
                    ledger.record_open(delta, accumulator).unwrap();
                    units
                } else {
                    ledger.record_close(delta, accumulator).unwrap();
                    -units
                };
                expected_basis += signed_units * acc_milli * (ONE / 1_000);
            }
            prop_assert_eq!(ledger.position().entry_funding_basis, expected_basis);
        }
    }
}

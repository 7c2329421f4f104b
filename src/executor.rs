//! Trade execution against the venue
//!
//! The executor performs every check and external call for a trade and
//! hands back a `TradeReceipt`; it never writes wrapper state. The wrapper
//! commits the receipt to its ledger only once every call has succeeded.
//! Margin changes are measured from the venue's own balance before and after
//! each call, never assumed.

use crate::accountant::CollateralAccountant;
use crate::config::Configuration;
use crate::error::{Result, WrapperError};
use crate::math::{mul_div_down, mul_div_up, to_signed, WAD};
use crate::types::{Address, Direction, Fill, Rounding, TradeBounds};
use crate::venue::{CollateralToken, PerpVenue};
use tracing::{debug, warn};

const MAX_SEARCH_STEPS: usize = 64;

/// Everything a successful trade changed outside the wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TradeReceipt {
    /// Signed position change actually filled
    pub size_change: i128,
    pub fill: Fill,
    /// Funding accumulator the trade executed at
    pub accumulator: i128,
    /// Observed change in venue cash (18 decimals)
    pub margin_delta: i128,
    /// Native collateral received (+) or paid out (-)
    pub collateral_delta: i128,
    /// Change to collateral intentionally kept in the wrapper
    pub reserve_delta: i128,
}

pub struct TradeExecutor<'a, V, T> {
    venue: &'a mut V,
    collateral: &'a mut T,
    account: &'a Address,
    accountant: CollateralAccountant,
    config: &'a Configuration,
}

impl<'a, V: PerpVenue, T: CollateralToken> TradeExecutor<'a, V, T> {
    pub fn new(
        venue: &'a mut V,
        collateral: &'a mut T,
        account: &'a Address,
        accountant: CollateralAccountant,
        config: &'a Configuration,
    ) -> Self {
        Self {
            venue,
            collateral,
            account,
            accountant,
            config,
        }
    }

    /// Collateral needed to open, or released by closing, `amount`
    pub fn required_collateral(&self, amount: u128, is_open: bool) -> Result<u128> {
        required_collateral(&*self.venue, self.account, self.accountant, self.config.side, amount, is_open)
    }

    /// Grow the configured side by `amount`, funded by collateral the caller
    /// already transferred to the wrapper
    pub fn open(&mut self, size: i128, reserved: u128, amount: u128, max_collateral_in: u128) -> Result<TradeReceipt> {
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let side = self.config.side;
        self.check_max_position(size, side, amount)?;

        let required = self.required_collateral(amount, true)?;
        if required > max_collateral_in {
            return Err(WrapperError::SlippageExceeded {
                limit: max_collateral_in,
                actual: required,
            });
        }
        let available = self.collateral.balance_of(self.account).saturating_sub(reserved);
        if available < required {
            return Err(WrapperError::InsufficientCollateral { required, available });
        }

        let margin_before = self.venue.margin_balance(self.account);
        if !self.config.tail_asset {
            self.venue.deposit(self.account, &mut *self.collateral, required)?;
        }
        let accumulator = self.venue.funding_accumulator();
        let fill = match self
            .venue
            .open_position(self.account, side, amount, TradeBounds::unbounded())
        {
            Ok(fill) => fill,
            Err(e) => {
                if !self.config.tail_asset {
                    self.unwind_deposit(required);
                }
                return Err(e.into());
            }
        };
        let margin_after = self.venue.margin_balance(self.account);

        let collateral_delta = to_signed(required).ok_or(WrapperError::MathOverflow)?;
        let receipt = TradeReceipt {
            size_change: side.signed(fill.filled).ok_or(WrapperError::MathOverflow)?,
            fill,
            accumulator,
            margin_delta: margin_after - margin_before,
            collateral_delta,
            reserve_delta: if self.config.tail_asset { collateral_delta } else { 0 },
        };
        debug!(?receipt, "open executed");
        Ok(receipt)
    }

    /// Shrink the configured side by `amount` and pay the proceeds to `recipient`
    pub fn close(
        &mut self,
        size: i128,
        reserved: u128,
        amount: u128,
        min_collateral_out: u128,
        recipient: &Address,
    ) -> Result<TradeReceipt> {
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let side = self.config.side;
        let held = match side {
            Direction::Long => size > 0,
            Direction::Short => size < 0,
        };
        if !held || amount > size.unsigned_abs() {
            return Err(WrapperError::InsufficientPosition {
                requested: amount,
                held: if held { size.unsigned_abs() } else { 0 },
            });
        }

        let payout = self.required_collateral(amount, false)?;
        if payout < min_collateral_out {
            return Err(WrapperError::SlippageExceeded {
                limit: min_collateral_out,
                actual: payout,
            });
        }
        if self.config.tail_asset && payout > reserved {
            return Err(WrapperError::InsufficientCollateral {
                required: payout,
                available: reserved,
            });
        }
        if !self.config.tail_asset {
            self.check_withdrawable(size, amount, payout)?;
        }

        let margin_before = self.venue.margin_balance(self.account);
        let accumulator = self.venue.funding_accumulator();
        let fill = self
            .venue
            .open_position(self.account, side.opposite(), amount, TradeBounds::unbounded())?;
        if !self.config.tail_asset {
            if let Err(e) = self.venue.withdraw(self.account, &mut *self.collateral, payout) {
                warn!(error = %e, payout, "margin withdrawal failed after close");
                self.restore_size(size)?;
                return Err(e.into());
            }
        }
        if let Err(e) = self.collateral.transfer(self.account, recipient, payout) {
            warn!(error = %e, "payout transfer failed after close");
            if !self.config.tail_asset {
                self.unwind_withdraw(payout);
            }
            self.restore_size(size)?;
            return Err(e.into());
        }
        let margin_after = self.venue.margin_balance(self.account);

        let collateral_delta = -to_signed(payout).ok_or(WrapperError::MathOverflow)?;
        let receipt = TradeReceipt {
            size_change: side.opposite().signed(fill.filled).ok_or(WrapperError::MathOverflow)?,
            fill,
            accumulator,
            margin_delta: margin_after - margin_before,
            collateral_delta,
            reserve_delta: if self.config.tail_asset { collateral_delta } else { 0 },
        };
        debug!(?receipt, "close executed");
        Ok(receipt)
    }

    /// Trade against existing margin with no collateral flow (rebalances)
    pub fn trade(&mut self, size: i128, signed_amount: i128, bounds: TradeBounds) -> Result<TradeReceipt> {
        let direction = Direction::of(signed_amount).ok_or(WrapperError::ZeroAmount)?;
        let amount = signed_amount.unsigned_abs();
        let reduces = size != 0 && size.signum() != signed_amount.signum();
        if reduces && amount > size.unsigned_abs() {
            return Err(WrapperError::InsufficientPosition {
                requested: amount,
                held: size.unsigned_abs(),
            });
        }
        if !reduces {
            self.check_max_position(size, direction, amount)?;
        }

        let margin_before = self.venue.margin_balance(self.account);
        let accumulator = self.venue.funding_accumulator();
        let fill = self.venue.open_position(self.account, direction, amount, bounds)?;
        let margin_after = self.venue.margin_balance(self.account);

        let receipt = TradeReceipt {
            size_change: direction.signed(fill.filled).ok_or(WrapperError::MathOverflow)?,
            fill,
            accumulator,
            margin_delta: margin_after - margin_before,
            collateral_delta: 0,
            reserve_delta: 0,
        };
        debug!(?receipt, "rebalance trade executed");
        Ok(receipt)
    }

    fn check_max_position(&self, size: i128, direction: Direction, amount: u128) -> Result<()> {
        let change = direction.signed(amount).ok_or(WrapperError::MathOverflow)?;
        let resulting = size
            .checked_add(change)
            .ok_or(WrapperError::MathOverflow)?
            .unsigned_abs();
        if resulting > self.config.max_position {
            return Err(WrapperError::MaxPositionReached {
                max: self.config.max_position,
                resulting,
            });
        }
        Ok(())
    }

    fn unwind_deposit(&mut self, amount: u128) {
        if let Err(e) = self.venue.withdraw(self.account, &mut *self.collateral, amount) {
            warn!(error = %e, amount, "failed to unwind margin deposit");
        }
    }

    fn unwind_withdraw(&mut self, amount: u128) {
        if let Err(e) = self.venue.deposit(self.account, &mut *self.collateral, amount) {
            warn!(error = %e, amount, "failed to unwind margin withdrawal");
        }
    }

    /// Fails before any venue call when the margin left after closing
    /// `amount` could not fund a withdrawal of `payout`
    fn check_withdrawable(&self, size: i128, amount: u128, payout: u128) -> Result<()> {
        let reduce = self.config.side.opposite();
        let fill = self.venue.quote(self.account, reduce, amount)?;
        let change = reduce.signed(fill.filled).ok_or(WrapperError::MathOverflow)?;
        let remaining = size.checked_add(change).ok_or(WrapperError::MathOverflow)?;
        let required_margin = self.venue.required_margin(remaining)?;

        let fee = to_signed(fill.fee).ok_or(WrapperError::MathOverflow)?;
        let free = self
            .venue
            .margin_balance(self.account)
            .checked_sub(fee)
            .and_then(|cash| cash.checked_sub(required_margin))
            .ok_or(WrapperError::MathOverflow)?;
        let debit = to_signed(self.accountant.to_underlying18(payout, Rounding::Up)).ok_or(WrapperError::MathOverflow)?;
        if free < debit {
            return Err(WrapperError::InsufficientCollateral {
                required: payout,
                available: self.accountant.to_native(free.max(0).unsigned_abs(), Rounding::Down),
            });
        }
        Ok(())
    }

    /// Trade the venue position back to `target` after a later call failed
    fn restore_size(&mut self, target: i128) -> Result<()> {
        let current = self.venue.position_size(self.account);
        let gap = target.checked_sub(current).ok_or(WrapperError::MathOverflow)?;
        let Some(direction) = Direction::of(gap) else {
            return Ok(());
        };
        let missing = gap.unsigned_abs();

        // Increases are shrunk by the fee: grow the order until it fills the gap
        let mut gross = missing;
        for _ in 0..MAX_SEARCH_STEPS {
            let filled = self.venue.quote(self.account, direction, gross)?.filled;
            if filled >= missing {
                break;
            }
            gross = gross.checked_add(missing - filled).ok_or(WrapperError::MathOverflow)?;
        }
        if let Err(e) = self
            .venue
            .open_position(self.account, direction, gross, TradeBounds::unbounded())
        {
            warn!(error = %e, gross, "failed to unwind venue trade");
        }

        let actual = self.venue.position_size(self.account);
        if actual != target {
            warn!(expected = target, actual, "venue position out of step after unwind");
            return Err(WrapperError::PositionMismatch { expected: target, actual });
        }
        Ok(())
    }
}

/// Read-only quote shared by the executor and the wrapper's public view
pub fn required_collateral<V: PerpVenue>(
    venue: &V,
    account: &Address,
    accountant: CollateralAccountant,
    side: Direction,
    amount: u128,
    is_open: bool,
) -> Result<u128> {
    if amount == 0 {
        return Ok(0);
    }
    if is_open {
        let fill = venue.quote(account, side, amount)?;
        Ok(accountant.to_native(fill.notional, Rounding::Up))
    } else {
        let fill = venue.quote(account, side.opposite(), amount)?;
        let proceeds = fill.notional.saturating_sub(fill.fee);
        Ok(accountant.to_native(proceeds, Rounding::Down))
    }
}

/// Position amount matching `collateral`: the largest amount whose open
/// costs at most `collateral`, or the smallest whose close pays at least it
pub fn amount_for_collateral<V: PerpVenue>(
    venue: &V,
    account: &Address,
    accountant: CollateralAccountant,
    side: Direction,
    collateral: u128,
    is_open: bool,
) -> Result<u128> {
    if collateral == 0 {
        return Err(WrapperError::ZeroAmount);
    }
    if is_open {
        amount_to_open(venue, account, accountant, side, collateral)
    } else {
        amount_to_close(venue, account, accountant, side, collateral)
    }
}

fn amount_to_open<V: PerpVenue>(
    venue: &V,
    account: &Address,
    accountant: CollateralAccountant,
    side: Direction,
    collateral: u128,
) -> Result<u128> {
    let unit = venue.quote(account, side, WAD)?;
    let budget = accountant.to_underlying18(collateral, Rounding::Down);
    let mut amount = mul_div_down(budget, WAD, unit.notional).ok_or(WrapperError::MathOverflow)?;

    for _ in 0..MAX_SEARCH_STEPS {
        if amount == 0 {
            break;
        }
        let required = required_collateral(venue, account, accountant, side, amount, true)?;
        if required <= collateral {
            return Ok(amount);
        }
        let scaled = mul_div_down(amount, collateral, required).ok_or(WrapperError::MathOverflow)?;
        amount = scaled.min(amount - 1);
    }
    Err(WrapperError::InsufficientCollateral {
        required: required_collateral(venue, account, accountant, side, amount.max(1), true)?,
        available: collateral,
    })
}

fn amount_to_close<V: PerpVenue>(
    venue: &V,
    account: &Address,
    accountant: CollateralAccountant,
    side: Direction,
    collateral: u128,
) -> Result<u128> {
    let size = venue.position_size(account);
    let held = if Direction::of(size) == Some(side) {
        size.unsigned_abs()
    } else {
        0
    };
    if held == 0 {
        return Err(WrapperError::InsufficientPosition {
            requested: 0,
            held,
        });
    }

    let unit = venue.quote(account, side.opposite(), held.min(WAD))?;
    let unit_proceeds = unit.notional.saturating_sub(unit.fee);
    let wanted = accountant.to_underlying18(collateral, Rounding::Up);
    let mut amount = mul_div_up(wanted, held.min(WAD), unit_proceeds).ok_or(WrapperError::MathOverflow)?;

    for _ in 0..MAX_SEARCH_STEPS {
        if amount > held {
            return Err(WrapperError::InsufficientPosition {
                requested: amount,
                held,
            });
        }
        let payout = required_collateral(venue, account, accountant, side, amount, false)?;
        if payout >= collateral {
            return Ok(amount);
        }
        let scaled = if payout == 0 {
            amount.saturating_mul(2)
        } else {
            mul_div_up(amount, collateral, payout).ok_or(WrapperError::MathOverflow)?
        };
        amount = scaled.max(amount + 1);
    }
    Err(WrapperError::InsufficientPosition {
        requested: amount,
        held,
    })
}

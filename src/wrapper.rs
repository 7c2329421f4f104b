//! Generic position wrapper core
//!
//! `LemmaWrapper` owns the ledger, collateral state, market lifecycle and
//! configuration, and is generic over the venue adapter and collateral token.
//! Every mutating call follows the same order: role check, read-only
//! validation against a projected market state, external calls through the
//! `TradeExecutor`, then local commit from the calls' results. Nothing local
//! changes on a failure path except booking venue fees a compensating trade
//! had to pay.

use crate::accountant::CollateralAccountant;
use crate::config::{Configuration, OwnerConfig};
use crate::error::{Result, WrapperError};
use crate::events::WrapperEvent;
use crate::executor::{self, TradeExecutor};
use crate::ledger::{Position, PositionLedger};
use crate::math::{mul_div_up, to_signed, wdiv};
use crate::rebalance::{self, RebalanceRequest};
use crate::settlement::SettlementHandler;
use crate::types::{wad_to_decimal, Address, Fill, MarketState, Rounding};
use crate::venue::{CollateralToken, PerpVenue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Operations every per-venue wrapper exposes to the minter and rebalancer
pub trait PositionWrapper {
    /// Native collateral needed to open (or released by closing) `amount`
    fn quote(&self, amount: u128, is_open: bool) -> Result<u128>;

    /// Returns the native collateral consumed
    fn open(&mut self, sender: &Address, amount: u128, max_collateral_in: u128) -> Result<u128>;

    /// Returns the native collateral paid to the sender
    fn close(&mut self, sender: &Address, amount: u128, min_collateral_out: u128) -> Result<u128>;

    /// Open as much as `collateral` buys; returns the position amount requested
    fn open_with_exact_collateral(&mut self, sender: &Address, collateral: u128) -> Result<u128>;

    /// Close just enough to pay out at least `collateral`; returns the
    /// position amount closed
    fn close_with_exact_collateral(&mut self, sender: &Address, collateral: u128) -> Result<u128>;

    fn re_balance(
        &mut self,
        sender: &Address,
        rebalancer: &Address,
        signed_amount: i128,
        encoded_bounds: &[u8],
    ) -> Result<Fill>;

    /// Returns the native margin pulled from the venue
    fn settle(&mut self, sender: &Address) -> Result<u128>;

    fn position(&self) -> Position;

    fn market_state(&self) -> MarketState;

    fn unrealized_funding_pnl(&self) -> Result<i128>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralState {
    pub token: Address,
    pub decimals: u8,
    /// Collateral held by the wrapper and not at the venue (native units)
    pub pending_balance: u128,
    /// Part of `pending_balance` backing the position in tail asset mode
    pub reserved: u128,
}

/// Persisted state, for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperSnapshot {
    pub address: Address,
    pub position: Position,
    pub realized_funding_pnl: i128,
    pub collateral: CollateralState,
    pub market_state: MarketState,
    pub settled_collateral: u128,
    pub config: Configuration,
}

pub struct LemmaWrapper<V, T> {
    address: Address,
    config: Configuration,
    ledger: PositionLedger,
    collateral: CollateralState,
    accountant: CollateralAccountant,
    settlement: SettlementHandler,
    venue: V,
    collateral_token: T,
    /// Venue-native token funding the margin in tail asset mode
    settlement_token: Option<T>,
    events: Vec<WrapperEvent>,
}

impl<V: PerpVenue, T: CollateralToken> LemmaWrapper<V, T> {
    pub fn new(address: Address, config: Configuration, venue: V, collateral_token: T) -> Result<Self> {
        let decimals = collateral_token.decimals();
        let accountant = CollateralAccountant::new(decimals)
            .ok_or_else(|| WrapperError::InvalidConfig(format!("unsupported collateral decimals {}", decimals)))?;
        let collateral = CollateralState {
            token: collateral_token.address().clone(),
            decimals,
            pending_balance: collateral_token.balance_of(&address),
            reserved: 0,
        };
        let mut settlement = SettlementHandler::new();
        settlement.observe(venue.market_status());

        info!(
            wrapper = %address,
            collateral = %collateral.token,
            decimals,
            side = ?config.side,
            tail_asset = config.tail_asset,
            "Position wrapper initialized"
        );

        Ok(Self {
            address,
            config,
            ledger: PositionLedger::new(),
            collateral,
            accountant,
            settlement,
            venue,
            collateral_token,
            settlement_token: None,
            events: Vec::new(),
        })
    }

    pub fn with_settlement_token(mut self, token: T) -> Self {
        self.settlement_token = Some(token);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn collateral_state(&self) -> &CollateralState {
        &self.collateral
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    pub fn settled_collateral(&self) -> u128 {
        self.settlement.settled_collateral()
    }

    pub fn events(&self) -> &[WrapperEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<WrapperEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> WrapperSnapshot {
        WrapperSnapshot {
            address: self.address.clone(),
            position: self.ledger.position(),
            realized_funding_pnl: self.ledger.realized_funding_pnl(),
            collateral: self.collateral.clone(),
            market_state: self.market_state(),
            settled_collateral: self.settlement.settled_collateral(),
            config: self.config.clone(),
        }
    }

    /// Record the venue's current market status without doing anything else
    pub fn sync_market(&mut self) -> MarketState {
        let before = self.settlement.state();
        let after = self.settlement.observe(self.venue.market_status());
        if after != before {
            info!(from = ?before, to = ?after, "market state recorded");
        }
        after
    }

    pub fn total_funding_pnl(&self) -> Result<i128> {
        self.ledger.total_funding_pnl(
            self.venue.funding_accumulator(),
            self.venue.margin_balance(&self.address),
        )
    }

    pub fn realized_funding_pnl(&self) -> i128 {
        self.ledger.realized_funding_pnl()
    }

    /// Venue trading fee in parts-per-million of notional
    pub fn fees(&self) -> u128 {
        self.venue.fee_ppm()
    }

    /// Fees the venue charged on the wrapper's trades (18 decimals)
    pub fn fees_paid(&self) -> u128 {
        self.ledger.fees_paid()
    }

    /// Signed exposure to the underlying in collateral units, truncated
    /// toward zero; negative while the wrapper is net short
    pub fn delta_exposure(&self) -> Result<i128> {
        let size = self.ledger.size();
        let native = to_signed(self.accountant.to_native(size.unsigned_abs(), Rounding::Down))
            .ok_or(WrapperError::MathOverflow)?;
        Ok(if size < 0 { -native } else { native })
    }

    /// Position notional over venue account value; `Decimal::MAX` when the
    /// account has no equity left
    pub fn leverage(&self) -> Result<Decimal> {
        let size = self.ledger.position().abs_size();
        if size == 0 {
            return Ok(Decimal::ZERO);
        }
        let notional = self
            .venue
            .quote(&self.address, self.config.side.opposite(), size)?
            .notional;
        let accrued = self.ledger.accrued_funding(self.venue.funding_accumulator())?;
        let equity = self
            .venue
            .margin_balance(&self.address)
            .checked_add(accrued)
            .ok_or(WrapperError::MathOverflow)?;
        if equity <= 0 {
            return Ok(Decimal::MAX);
        }
        let notional = to_signed(notional).ok_or(WrapperError::MathOverflow)?;
        let ratio = wdiv(notional, equity).ok_or(WrapperError::MathOverflow)?;
        Ok(wad_to_decimal(ratio))
    }

    pub fn set_max_position(&mut self, sender: &Address, max_position: u128) -> Result<()> {
        self.config.set_max_position(sender, max_position)?;
        self.emit(WrapperEvent::ConfigUpdated {
            field: "max_position".to_string(),
        });
        Ok(())
    }

    pub fn set_rebalancer(&mut self, sender: &Address, rebalancer: Address) -> Result<()> {
        self.config.set_rebalancer(sender, rebalancer)?;
        self.emit(WrapperEvent::ConfigUpdated {
            field: "rebalancer".to_string(),
        });
        Ok(())
    }

    pub fn set_minter(&mut self, sender: &Address, minter: Address) -> Result<()> {
        self.config.set_minter(sender, minter)?;
        self.emit(WrapperEvent::ConfigUpdated {
            field: "minter".to_string(),
        });
        Ok(())
    }

    pub fn set_referrer_code(&mut self, sender: &Address, code: String) -> Result<()> {
        self.config.set_referrer_code(sender, code)?;
        self.emit(WrapperEvent::ConfigUpdated {
            field: "referrer_code".to_string(),
        });
        Ok(())
    }

    /// Switching modes moves where collateral lives, so the position must be flat
    pub fn set_tail_asset_mode(&mut self, sender: &Address, enabled: bool) -> Result<()> {
        self.config.ensure_owner(sender)?;
        self.ensure_mode_switchable(enabled)?;
        self.config.set_tail_asset(sender, enabled)?;
        self.emit(WrapperEvent::ConfigUpdated {
            field: "tail_asset".to_string(),
        });
        Ok(())
    }

    pub fn set_owner_config(&mut self, sender: &Address, update: OwnerConfig) -> Result<()> {
        self.config.ensure_owner(sender)?;
        if let Some(enabled) = update.tail_asset {
            self.ensure_mode_switchable(enabled)?;
        }
        let fields: Vec<&'static str> = [
            ("owner", update.owner.is_some()),
            ("rebalancer", update.rebalancer.is_some()),
            ("minter", update.minter.is_some()),
            ("max_position", update.max_position.is_some()),
            ("referrer_code", update.referrer_code.is_some()),
            ("tail_asset", update.tail_asset.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect();

        self.config.apply(sender, update)?;
        for field in fields {
            self.emit(WrapperEvent::ConfigUpdated {
                field: field.to_string(),
            });
        }
        Ok(())
    }

    /// Pull venue settlement tokens from the owner into the wrapper's margin
    pub fn deposit_settlement_token(&mut self, sender: &Address, amount: u128) -> Result<()> {
        self.config.ensure_owner(sender)?;
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let token = self
            .settlement_token
            .as_mut()
            .ok_or_else(|| WrapperError::InvalidConfig("no settlement token configured".to_string()))?;

        let margin_before = self.venue.margin_balance(&self.address);
        token.transfer(sender, &self.address, amount)?;
        if let Err(e) = self.venue.deposit(&self.address, token, amount) {
            if let Err(refund) = token.transfer(&self.address, sender, amount) {
                warn!(error = %refund, amount, "failed to refund settlement token deposit");
            }
            return Err(e.into());
        }
        let margin_delta = self.venue.margin_balance(&self.address) - margin_before;

        self.ledger.record_margin(margin_delta)?;
        info!(%sender, amount, "settlement token deposited");
        Ok(())
    }

    /// Return venue settlement tokens to the owner
    pub fn withdraw_settlement_token(&mut self, sender: &Address, amount: u128) -> Result<()> {
        self.config.ensure_owner(sender)?;
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let token = self
            .settlement_token
            .as_mut()
            .ok_or_else(|| WrapperError::InvalidConfig("no settlement token configured".to_string()))?;

        // After settlement the margin already sits in the wrapper
        if self.settlement.is_settled() {
            token.transfer(&self.address, sender, amount)?;
            info!(%sender, amount, "settlement token withdrawn");
            return Ok(());
        }

        let margin_before = self.venue.margin_balance(&self.address);
        self.venue.withdraw(&self.address, token, amount)?;
        if let Err(e) = token.transfer(&self.address, sender, amount) {
            if let Err(redeposit) = self.venue.deposit(&self.address, token, amount) {
                warn!(error = %redeposit, amount, "failed to restore settlement token margin");
            }
            return Err(e.into());
        }
        let margin_delta = self.venue.margin_balance(&self.address) - margin_before;

        self.ledger.record_margin(margin_delta)?;
        info!(%sender, amount, "settlement token withdrawn");
        Ok(())
    }

    /// Hand back collateral sent to the wrapper but never used by an open
    pub fn recover_pending(&mut self, sender: &Address, amount: u128) -> Result<()> {
        self.config.ensure_minter(sender)?;
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let committed = self
            .collateral
            .reserved
            .saturating_add(self.settlement.settled_collateral());
        let available = self
            .collateral_token
            .balance_of(&self.address)
            .saturating_sub(committed);
        if amount > available {
            return Err(WrapperError::InsufficientCollateral {
                required: amount,
                available,
            });
        }
        self.collateral_token.transfer(&self.address, sender, amount)?;
        self.refresh_pending();
        info!(%sender, amount, "pending collateral recovered");
        Ok(())
    }

    fn market(&self) -> SettlementHandler {
        let mut market = self.settlement.clone();
        market.observe(self.venue.market_status());
        market
    }

    fn ensure_mode_switchable(&self, enabled: bool) -> Result<()> {
        if enabled != self.config.tail_asset && !self.ledger.position().is_flat() {
            return Err(WrapperError::InvalidConfig(
                "cannot switch tail asset mode with an open position".to_string(),
            ));
        }
        Ok(())
    }

    fn executor(&mut self) -> TradeExecutor<'_, V, T> {
        TradeExecutor::new(
            &mut self.venue,
            &mut self.collateral_token,
            &self.address,
            self.accountant,
            &self.config,
        )
    }

    fn redeem(&mut self, sender: &Address, mut market: SettlementHandler, amount: u128, min_collateral_out: u128) -> Result<u128> {
        if amount == 0 {
            return Err(WrapperError::ZeroAmount);
        }
        let size_before = self.ledger.size();
        let payout = market.redemption_for(amount, size_before.unsigned_abs())?;
        if payout < min_collateral_out {
            return Err(WrapperError::SlippageExceeded {
                limit: min_collateral_out,
                actual: payout,
            });
        }
        let mut ledger = self.ledger.clone();
        ledger.record_redemption(amount, market.settlement_accumulator())?;
        market.record_redemption(payout)?;
        let collateral_delta = -to_signed(payout).ok_or(WrapperError::MathOverflow)?;

        self.collateral_token.transfer(&self.address, sender, payout)?;

        self.ledger = ledger;
        self.settlement = market;
        self.refresh_pending();
        self.emit(WrapperEvent::PositionChanged {
            size_before,
            size_after: self.ledger.size(),
            collateral_delta,
            fee: 0,
        });
        Ok(payout)
    }

    /// Compensating trades after a failed close still cost venue fees; book
    /// them as margin so they are not read as funding
    fn absorb_unwind_fees(&mut self, margin_before: i128) -> Result<()> {
        let leaked = self.venue.margin_balance(&self.address) - margin_before;
        if leaked != 0 {
            warn!(leaked = %wad_to_decimal(leaked), "close failed after reaching the venue");
            self.ledger.record_margin(leaked)?;
        }
        Ok(())
    }

    fn refresh_pending(&mut self) {
        self.collateral.pending_balance = self.collateral_token.balance_of(&self.address);
    }

    fn emit(&mut self, event: WrapperEvent) {
        event.trace();
        self.events.push(event);
    }
}

fn shift(value: u128, delta: i128) -> Result<u128> {
    value.checked_add_signed(delta).ok_or(WrapperError::MathOverflow)
}

impl<V: PerpVenue, T: CollateralToken> PositionWrapper for LemmaWrapper<V, T> {
    fn quote(&self, amount: u128, is_open: bool) -> Result<u128> {
        executor::required_collateral(
            &self.venue,
            &self.address,
            self.accountant,
            self.config.side,
            amount,
            is_open,
        )
    }

    fn open(&mut self, sender: &Address, amount: u128, max_collateral_in: u128) -> Result<u128> {
        self.config.ensure_minter(sender)?;
        let market = self.market();
        market.ensure_open()?;

        let size_before = self.ledger.size();
        let reserved = self.collateral.reserved;
        let receipt = self.executor().open(size_before, reserved, amount, max_collateral_in)?;

        let mut ledger = self.ledger.clone();
        ledger.record_open(receipt.size_change, receipt.accumulator)?;
        ledger.record_margin(receipt.margin_delta)?;
        ledger.record_fee(receipt.fill.fee)?;
        let reserved = shift(reserved, receipt.reserve_delta)?;

        self.ledger = ledger;
        self.settlement = market;
        self.collateral.reserved = reserved;
        self.refresh_pending();
        self.emit(WrapperEvent::PositionChanged {
            size_before,
            size_after: self.ledger.size(),
            collateral_delta: receipt.collateral_delta,
            fee: receipt.fill.fee,
        });
        Ok(receipt.collateral_delta.unsigned_abs())
    }

    fn close(&mut self, sender: &Address, amount: u128, min_collateral_out: u128) -> Result<u128> {
        self.config.ensure_minter(sender)?;
        let market = self.market();
        if market.is_settled() {
            return self.redeem(sender, market, amount, min_collateral_out);
        }
        market.ensure_open()?;

        let size_before = self.ledger.size();
        let reserved = self.collateral.reserved;
        let margin_before = self.venue.margin_balance(&self.address);
        let result = self
            .executor()
            .close(size_before, reserved, amount, min_collateral_out, sender);
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                self.absorb_unwind_fees(margin_before)?;
                return Err(e);
            }
        };

        let mut ledger = self.ledger.clone();
        ledger.record_trade(receipt.size_change, receipt.accumulator)?;
        ledger.record_margin(receipt.margin_delta)?;
        ledger.record_fee(receipt.fill.fee)?;
        let reserved = shift(reserved, receipt.reserve_delta)?;

        self.ledger = ledger;
        self.settlement = market;
        self.collateral.reserved = reserved;
        self.refresh_pending();
        self.emit(WrapperEvent::PositionChanged {
            size_before,
            size_after: self.ledger.size(),
            collateral_delta: receipt.collateral_delta,
            fee: receipt.fill.fee,
        });
        Ok(receipt.collateral_delta.unsigned_abs())
    }

    fn open_with_exact_collateral(&mut self, sender: &Address, collateral: u128) -> Result<u128> {
        self.config.ensure_minter(sender)?;
        self.market().ensure_open()?;
        let amount = executor::amount_for_collateral(
            &self.venue,
            &self.address,
            self.accountant,
            self.config.side,
            collateral,
            true,
        )?;
        self.open(sender, amount, collateral)?;
        Ok(amount)
    }

    fn close_with_exact_collateral(&mut self, sender: &Address, collateral: u128) -> Result<u128> {
        self.config.ensure_minter(sender)?;
        let market = self.market();
        let amount = if market.is_settled() {
            let held = self.ledger.position().abs_size();
            let settled = market.settled_collateral();
            if held == 0 || settled == 0 {
                return Err(WrapperError::InsufficientCollateral {
                    required: collateral,
                    available: settled,
                });
            }
            mul_div_up(collateral, held, settled).ok_or(WrapperError::MathOverflow)?
        } else {
            market.ensure_open()?;
            executor::amount_for_collateral(
                &self.venue,
                &self.address,
                self.accountant,
                self.config.side,
                collateral,
                false,
            )?
        };
        self.close(sender, amount, collateral)?;
        Ok(amount)
    }

    fn re_balance(
        &mut self,
        sender: &Address,
        rebalancer: &Address,
        signed_amount: i128,
        encoded_bounds: &[u8],
    ) -> Result<Fill> {
        rebalance::authorize(&self.config, sender, rebalancer)?;
        let request = RebalanceRequest::decode(signed_amount, encoded_bounds)?;
        let market = self.market();
        market.ensure_open()?;

        let unrealized = self.unrealized_funding_pnl()?;
        request.validate(unrealized)?;
        debug!(signed_amount, unrealized, "rebalance accepted");

        let size_before = self.ledger.size();
        let receipt = self
            .executor()
            .trade(size_before, request.signed_amount, request.bounds)?;

        let mut ledger = self.ledger.clone();
        ledger.record_trade(receipt.size_change, receipt.accumulator)?;
        ledger.record_margin(receipt.margin_delta)?;
        ledger.realize_funding(request.signed_amount)?;
        ledger.record_fee(receipt.fill.fee)?;

        self.ledger = ledger;
        self.settlement = market;
        self.emit(WrapperEvent::Rebalanced {
            rebalancer: sender.clone(),
            size_before,
            size_after: self.ledger.size(),
            realized: request.signed_amount,
            margin_delta: receipt.margin_delta,
            fee: receipt.fill.fee,
        });
        Ok(receipt.fill)
    }

    fn settle(&mut self, sender: &Address) -> Result<u128> {
        self.config.ensure_minter(sender)?;
        let mut market = self.market();
        market.ensure_settleable()?;

        let accumulator = self.venue.funding_accumulator();
        let pulled = if self.config.tail_asset {
            let token = self.settlement_token.as_mut().ok_or_else(|| {
                WrapperError::InvalidConfig("tail asset mode needs a settlement token".to_string())
            })?;
            self.venue.withdraw_settled(&self.address, token)?
        } else {
            self.venue.withdraw_settled(&self.address, &mut self.collateral_token)?
        };

        // In tail mode holders are repaid from the collateral the wrapper kept
        let redeemable = if self.config.tail_asset {
            self.collateral.reserved
        } else {
            pulled
        };
        market.mark_settled(redeemable, accumulator)?;

        self.settlement = market;
        self.collateral.reserved = 0;
        self.refresh_pending();
        let size = self.ledger.size();
        self.emit(WrapperEvent::Settled {
            size_before: size,
            size_after: size,
            collateral_delta: to_signed(pulled).ok_or(WrapperError::MathOverflow)?,
            state: MarketState::Settled,
        });
        Ok(pulled)
    }

    fn position(&self) -> Position {
        self.ledger.position()
    }

    fn market_state(&self) -> MarketState {
        self.market().state()
    }

    fn unrealized_funding_pnl(&self) -> Result<i128> {
        self.ledger.unrealized_funding_pnl(
            self.venue.funding_accumulator(),
            self.venue.margin_balance(&self.address),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use crate::mock::{MockToken, MockVenue};
    use crate::types::{Direction, MarketStatus};

    const ONE: i128 = WAD as i128;

    struct Harness {
        wrapper: LemmaWrapper<MockVenue, MockToken>,
        venue: MockVenue,
        usdc: MockToken,
        owner: Address,
        minter: Address,
    }

    fn harness(tail_asset: bool) -> Harness {
        let venue = MockVenue::new("venue");
        let usdc = MockToken::new("usdc", 6);
        let owner = Address::new("owner");
        let minter = Address::new("minter");
        let mut config = Configuration::new(
            owner.clone(),
            minter.clone(),
            Address::new("bot"),
            Direction::Short,
            1_000 * WAD,
        );
        config.tail_asset = tail_asset;
        let wrapper = LemmaWrapper::new(Address::new("wrapper"), config, venue.clone(), usdc.clone()).unwrap();
        Harness {
            wrapper,
            venue,
            usdc,
            owner,
            minter,
        }
    }

    #[test]
    fn test_only_minter_trades() {
        let mut h = harness(false);
        let stranger = Address::new("stranger");
        assert!(matches!(
            h.wrapper.open(&stranger, WAD, u128::MAX),
            Err(WrapperError::Unauthorized(_))
        ));
        assert!(h.wrapper.close(&stranger, WAD, 0).is_err());
        assert!(h.wrapper.settle(&stranger).is_err());
        assert!(h.wrapper.events().is_empty());
    }

    #[test]
    fn test_open_and_close_move_collateral() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        h.usdc.mint(&wrapper_addr, h.usdc.units(10));

        let used = h.wrapper.open(&h.minter, 10 * WAD, u128::MAX).unwrap();
        assert_eq!(used, h.usdc.units(10));
        assert_eq!(h.wrapper.position().size, -10 * ONE);
        assert_eq!(h.wrapper.collateral_state().pending_balance, 0);

        let paid = h.wrapper.close(&h.minter, 4 * WAD, 0).unwrap();
        assert_eq!(paid, h.usdc.units(4));
        assert_eq!(h.usdc.balance_of(&h.minter), h.usdc.units(4));
        assert_eq!(h.wrapper.position().size, -6 * ONE);
        assert_eq!(h.wrapper.drain_events().len(), 2);
        assert!(h.wrapper.events().is_empty());
    }

    #[test]
    fn test_open_rejects_collateral_slippage() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        h.usdc.mint(&wrapper_addr, h.usdc.units(10));
        let err = h.wrapper.open(&h.minter, 10 * WAD, h.usdc.units(9)).unwrap_err();
        assert!(matches!(err, WrapperError::SlippageExceeded { .. }));
        assert_eq!(h.usdc.balance_of(&wrapper_addr), h.usdc.units(10));
    }

    #[test]
    fn test_owner_setters_emit_events() {
        let mut h = harness(false);
        let stranger = Address::new("stranger");
        assert!(h.wrapper.set_max_position(&stranger, 1).is_err());
        assert!(h.wrapper.events().is_empty());

        h.wrapper.set_max_position(&h.owner, 5 * WAD).unwrap();
        h.wrapper
            .set_owner_config(
                &h.owner,
                OwnerConfig {
                    rebalancer: Some(Address::new("bot2")),
                    referrer_code: Some("ref".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let names: Vec<String> = h
            .wrapper
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                WrapperEvent::ConfigUpdated { field } => Some(field),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["max_position", "rebalancer", "referrer_code"]);
        assert_eq!(h.wrapper.config().max_position, 5 * WAD);
    }

    #[test]
    fn test_tail_mode_keeps_collateral_in_wrapper() {
        let h = harness(true);
        let settlement = MockToken::new("usdc-settle", 18);
        settlement.mint(&h.owner, 100 * WAD);
        let mut wrapper = h.wrapper.with_settlement_token(settlement.clone());

        wrapper.deposit_settlement_token(&h.owner, 50 * WAD).unwrap();
        let wrapper_addr = wrapper.address().clone();
        h.usdc.mint(&wrapper_addr, h.usdc.units(20));

        wrapper.open(&h.minter, 20 * WAD, u128::MAX).unwrap();
        assert_eq!(wrapper.collateral_state().reserved, h.usdc.units(20));
        assert_eq!(wrapper.collateral_state().pending_balance, h.usdc.units(20));
        // Owner funding is not funding PnL
        assert_eq!(wrapper.total_funding_pnl().unwrap(), 0);

        let paid = wrapper.close(&h.minter, 5 * WAD, 0).unwrap();
        assert_eq!(paid, h.usdc.units(5));
        assert_eq!(wrapper.collateral_state().reserved, h.usdc.units(15));

        assert!(matches!(
            wrapper.set_tail_asset_mode(&h.owner, false),
            Err(WrapperError::InvalidConfig(_))
        ));
        wrapper.withdraw_settlement_token(&h.owner, 10 * WAD).unwrap();
        assert_eq!(settlement.balance_of(&h.owner), 60 * WAD);
    }

    #[test]
    fn test_recover_pending_excludes_reserve() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        h.usdc.mint(&wrapper_addr, h.usdc.units(3));
        assert!(h.wrapper.recover_pending(&h.minter, h.usdc.units(4)).is_err());
        h.wrapper.recover_pending(&h.minter, h.usdc.units(3)).unwrap();
        assert_eq!(h.usdc.balance_of(&h.minter), h.usdc.units(3));
        assert_eq!(h.wrapper.collateral_state().pending_balance, 0);
    }

    #[test]
    fn test_leverage_tracks_funding() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        assert_eq!(h.wrapper.leverage().unwrap(), Decimal::ZERO);
        h.usdc.mint(&wrapper_addr, h.usdc.units(100));
        h.wrapper.open(&h.minter, 100 * WAD, u128::MAX).unwrap();
        assert_eq!(h.wrapper.leverage().unwrap(), Decimal::ONE);

        // Short earns 0.25 per unit: equity 125 against notional 100
        h.venue.accrue_funding(ONE / 4);
        assert_eq!(h.wrapper.leverage().unwrap(), Decimal::new(8, 1));
    }

    #[test]
    fn test_pause_sticks_once_recorded() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        h.usdc.mint(&wrapper_addr, h.usdc.units(2));

        h.venue.set_status(MarketStatus::Paused);
        assert!(matches!(
            h.wrapper.open(&h.minter, WAD, u128::MAX),
            Err(WrapperError::MarketClosed(MarketState::Paused))
        ));
        assert_eq!(h.wrapper.market_state(), MarketState::Paused);
        assert_eq!(h.wrapper.sync_market(), MarketState::Paused);

        h.venue.set_status(MarketStatus::Open);
        assert_eq!(h.wrapper.sync_market(), MarketState::Paused);
        assert_eq!(h.wrapper.snapshot().market_state, MarketState::Paused);
        assert_eq!(
            h.wrapper.open(&h.minter, WAD, u128::MAX),
            Err(WrapperError::MarketClosed(MarketState::Paused))
        );
        assert!(h.wrapper.position().is_flat());
    }

    #[test]
    fn test_exposure_and_fee_views() {
        let mut h = harness(false);
        let wrapper_addr = h.wrapper.address().clone();
        h.venue.set_fee_ppm(10_000);
        assert_eq!(h.wrapper.fees(), 10_000);
        assert_eq!(h.wrapper.delta_exposure().unwrap(), 0);

        h.usdc.mint(&wrapper_addr, h.usdc.units(100));
        h.wrapper.open(&h.minter, 100 * WAD, u128::MAX).unwrap();
        assert_eq!(h.wrapper.delta_exposure().unwrap(), -(h.usdc.units(99) as i128));
        assert_eq!(h.wrapper.fees_paid(), WAD);

        h.wrapper.close(&h.minter, 9 * WAD, 0).unwrap();
        assert_eq!(h.wrapper.delta_exposure().unwrap(), -(h.usdc.units(90) as i128));
        assert_eq!(h.wrapper.fees_paid(), WAD + 9 * WAD / 100);
    }
}

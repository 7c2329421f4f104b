//! Off-chain rebalance keeper
//!
//! Reads wrapper state, sizes a rebalance that brings unrealized funding PnL
//! back toward zero, and submits it with a price limit and deadline derived
//! from the venue's current quote.

use crate::error::{Result, WrapperError};
use crate::math::{mul_div_down, mul_div_up, WAD};
use crate::rebalance::RebalanceRequest;
use crate::types::{wad_to_decimal, Address, Direction, Fill, MarketState, TradeBounds};
use crate::venue::{CollateralToken, PerpVenue};
use crate::wrapper::{LemmaWrapper, PositionWrapper};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BPS: u128 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Cap on a single rebalance (18 decimals); `None` rebalances everything
    pub max_step: Option<u128>,
    /// Unrealized PnL at or below this is left alone
    pub min_amount: u128,
    /// Allowed price move against the trade, in basis points
    pub price_slack_bps: u128,
    /// Seconds after the venue's clock the trade stays valid
    pub deadline_ttl_secs: u64,
    /// Plan and log without submitting
    pub dry_run: bool,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            max_step: None,
            min_amount: 1_000_000_000_000,
            price_slack_bps: 50,
            deadline_ttl_secs: 300,
            dry_run: false,
        }
    }
}

/// Next rebalance the keeper would submit, if any
pub fn plan<V: PerpVenue, T: CollateralToken>(
    wrapper: &LemmaWrapper<V, T>,
    config: &KeeperConfig,
) -> Result<Option<RebalanceRequest>> {
    if wrapper.market_state() != MarketState::Open {
        return Ok(None);
    }
    let unrealized = wrapper.unrealized_funding_pnl()?;
    if unrealized.unsigned_abs() <= config.min_amount {
        return Ok(None);
    }
    let Some(direction) = Direction::of(unrealized) else {
        return Ok(None);
    };

    let magnitude = match config.max_step {
        Some(step) => unrealized.unsigned_abs().min(step),
        None => unrealized.unsigned_abs(),
    };
    let signed_amount = direction.signed(magnitude).ok_or(WrapperError::MathOverflow)?;

    let venue = wrapper.venue();
    let fill = venue.quote(wrapper.address(), direction, magnitude)?;
    let price = mul_div_down(fill.notional, WAD, magnitude).ok_or(WrapperError::MathOverflow)?;
    let price_limit = match direction {
        Direction::Long => mul_div_up(price, BPS + config.price_slack_bps, BPS),
        Direction::Short => mul_div_down(price, BPS.saturating_sub(config.price_slack_bps), BPS),
    }
    .ok_or(WrapperError::MathOverflow)?;
    let deadline = venue.timestamp().saturating_add(config.deadline_ttl_secs);

    debug!(
        unrealized = %wad_to_decimal(unrealized),
        amount = %wad_to_decimal(signed_amount),
        price = %wad_to_decimal(price as i128),
        deadline,
        "rebalance planned"
    );
    Ok(Some(RebalanceRequest::new(
        signed_amount,
        TradeBounds::new(price_limit, deadline),
    )))
}

/// Record the venue's market status, then plan and, unless in dry-run mode,
/// submit one rebalance as `keeper`
pub fn run<V: PerpVenue, T: CollateralToken>(
    wrapper: &mut LemmaWrapper<V, T>,
    keeper: &Address,
    config: &KeeperConfig,
) -> Result<Option<Fill>> {
    wrapper.sync_market();
    let Some(request) = plan(wrapper, config)? else {
        debug!("nothing to rebalance");
        return Ok(None);
    };
    if config.dry_run {
        info!(amount = %wad_to_decimal(request.signed_amount), "dry run: rebalance skipped");
        return Ok(None);
    }
    let fill = wrapper.re_balance(keeper, keeper, request.signed_amount, &request.encoded_bounds())?;
    info!(
        amount = %wad_to_decimal(request.signed_amount),
        filled = %wad_to_decimal(fill.filled as i128),
        "rebalance submitted"
    );
    Ok(Some(fill))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::mock::{MockToken, MockVenue};
    use crate::types::MarketStatus;

    const ONE: i128 = WAD as i128;

    fn funded_short() -> (LemmaWrapper<MockVenue, MockToken>, MockVenue, Address) {
        let venue = MockVenue::new("venue");
        let usdc = MockToken::new("usdc", 18);
        let keeper = Address::new("keeper");
        let minter = Address::new("minter");
        let config = Configuration::new(
            Address::new("owner"),
            minter.clone(),
            keeper.clone(),
            Direction::Short,
            1_000 * WAD,
        );
        let mut wrapper = LemmaWrapper::new(Address::new("wrapper"), config, venue.clone(), usdc.clone()).unwrap();
        usdc.mint(wrapper.address(), 100 * WAD);
        wrapper.open(&minter, 100 * WAD, u128::MAX).unwrap();
        (wrapper, venue, keeper)
    }

    #[test]
    fn test_plan_follows_funding_sign() {
        let (wrapper, venue, _) = funded_short();
        assert_eq!(plan(&wrapper, &KeeperConfig::default()).unwrap(), None);

        venue.accrue_funding(ONE / 10);
        let request = plan(&wrapper, &KeeperConfig::default()).unwrap().unwrap();
        assert_eq!(request.signed_amount, 10 * ONE);
        assert_eq!(request.bounds.price_limit, WAD + WAD / 200);

        venue.accrue_funding(-ONE / 5);
        let request = plan(&wrapper, &KeeperConfig::default()).unwrap().unwrap();
        assert_eq!(request.signed_amount, -10 * ONE);
        assert_eq!(request.bounds.price_limit, WAD - WAD / 200);
    }

    #[test]
    fn test_max_step_caps_request() {
        let (wrapper, venue, _) = funded_short();
        venue.accrue_funding(ONE / 10);
        let config = KeeperConfig {
            max_step: Some(4 * WAD),
            ..Default::default()
        };
        let request = plan(&wrapper, &config).unwrap().unwrap();
        assert_eq!(request.signed_amount, 4 * ONE);
    }

    #[test]
    fn test_run_realizes_funding() {
        let (mut wrapper, venue, keeper) = funded_short();
        venue.accrue_funding(ONE / 10);

        let dry = KeeperConfig {
            dry_run: true,
            ..Default::default()
        };
        assert_eq!(run(&mut wrapper, &keeper, &dry).unwrap(), None);
        assert_eq!(wrapper.realized_funding_pnl(), 0);

        let fill = run(&mut wrapper, &keeper, &KeeperConfig::default()).unwrap().unwrap();
        assert_eq!(fill.filled, 10 * WAD);
        assert_eq!(wrapper.realized_funding_pnl(), 10 * ONE);
        assert_eq!(wrapper.unrealized_funding_pnl().unwrap(), 0);
        assert_eq!(run(&mut wrapper, &keeper, &KeeperConfig::default()).unwrap(), None);
    }

    #[test]
    fn test_run_records_pause() {
        let (mut wrapper, venue, keeper) = funded_short();
        venue.accrue_funding(ONE / 10);
        venue.set_status(MarketStatus::Paused);
        assert_eq!(run(&mut wrapper, &keeper, &KeeperConfig::default()).unwrap(), None);

        venue.set_status(MarketStatus::Open);
        assert_eq!(wrapper.market_state(), MarketState::Paused);
        assert_eq!(plan(&wrapper, &KeeperConfig::default()).unwrap(), None);
    }
}

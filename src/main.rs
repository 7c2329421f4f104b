//! Lemma Perp Wrapper - end-to-end simulation against the in-memory venue

use lemma_perp_wrapper::keeper::{self, KeeperConfig};
use lemma_perp_wrapper::math::WAD;
use lemma_perp_wrapper::{
    wad_to_decimal, Address, CollateralToken, LemmaWrapper, MarketStatus, MockToken, MockVenue, PositionWrapper,
    WrapperSettings,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FUNDING_INTERVAL_SECS: u64 = 8 * 3600;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lemma wrapper simulation");

    let settings = WrapperSettings::load()?;
    let config = settings.to_configuration()?;
    let owner = config.owner.clone();
    let minter = config.minter.clone();
    let rebalancer = config.rebalancer.clone();
    let tail_asset = config.tail_asset;

    let venue = MockVenue::new("0xvenue-vault").with_fee_ppm(settings.venue_fee_ppm);
    let collateral = MockToken::new("0xcollateral", settings.collateral_decimals);
    let settlement_token = MockToken::new("0xsettlement", 18);

    let mut wrapper = LemmaWrapper::new(Address::new("0xwrapper"), config, venue.clone(), collateral.clone())?
        .with_settlement_token(settlement_token.clone());

    if tail_asset {
        settlement_token.mint(&owner, 10_000 * WAD);
        wrapper.deposit_settlement_token(&owner, 1_000 * WAD)?;
        settlement_token.mint(&venue.vault(), 1_000 * WAD);
    }

    // Mint: the minter pre-funds the wrapper with the quoted collateral
    let amount = (1_000 * WAD).min(wrapper.config().max_position);
    let required = wrapper.quote(amount, true)?;
    collateral.mint(&minter, required);
    collateral.clone().transfer(&minter, wrapper.address(), required)?;
    wrapper.open(&minter, amount, required)?;
    tracing::info!(
        size = %wad_to_decimal(wrapper.position().size),
        collateral = required,
        leverage = %wrapper.leverage()?,
        "Position opened"
    );

    // One funding interval in favour of shorts
    venue.advance_time(FUNDING_INTERVAL_SECS);
    venue.accrue_funding((WAD / 1_000) as i128);
    tracing::info!(
        unrealized = %wad_to_decimal(wrapper.unrealized_funding_pnl()?),
        leverage = %wrapper.leverage()?,
        delta = wrapper.delta_exposure()?,
        fee_ppm = wrapper.fees(),
        "Funding accrued"
    );

    match keeper::run(&mut wrapper, &rebalancer, &KeeperConfig::default())? {
        Some(fill) => tracing::info!(
            filled = %wad_to_decimal(fill.filled as i128),
            leverage = %wrapper.leverage()?,
            "Rebalanced"
        ),
        None => tracing::info!("Keeper found nothing to rebalance"),
    }

    // Burn half through the live market
    let half = wrapper.position().abs_size() / 2;
    let paid = wrapper.close(&minter, half, 0)?;
    tracing::info!(paid, size = %wad_to_decimal(wrapper.position().size), "Half closed");

    // Venue shuts the market; the wrapper settles and redeems the rest
    collateral.mint(&venue.vault(), required);
    venue.set_status(MarketStatus::Closed);
    let pulled = wrapper.settle(&minter)?;
    let remaining = wrapper.position().abs_size();
    let redeemed = wrapper.close(&minter, remaining, 0)?;
    tracing::info!(pulled, redeemed, "Settled and redeemed");

    println!("{}", serde_json::to_string_pretty(&wrapper.snapshot())?);
    for event in wrapper.drain_events() {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}

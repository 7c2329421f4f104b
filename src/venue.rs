//! Boundary to the external trading venue and collateral token
//!
//! The wrapper core is generic over these traits. Each supported venue gets
//! its own adapter that only translates calls; margin math, funding tracking
//! and settlement rules live in the shared core.

use crate::error::VenueError;
use crate::types::{Address, Direction, Fill, MarketStatus, TradeBounds};

/// Fungible token with standard transfer/balance semantics
pub trait CollateralToken {
    fn address(&self) -> &Address;

    fn decimals(&self) -> u8;

    fn balance_of(&self, account: &Address) -> u128;

    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), VenueError>;
}

/// Perpetual-futures venue as consumed by the wrapper
pub trait PerpVenue {
    /// Venue clock in seconds; deadlines are compared against it
    fn timestamp(&self) -> u64;

    fn market_status(&self) -> MarketStatus;

    /// Trade `amount` of underlying in `direction` for `account`.
    /// Increasing exposure consumes margin for the notional and shrinks the
    /// fill by the fee; reducing exposure closes exactly `amount` and releases
    /// `notional - fee` as withdrawable margin.
    fn open_position(
        &mut self,
        account: &Address,
        direction: Direction,
        amount: u128,
        bounds: TradeBounds,
    ) -> Result<Fill, VenueError>;

    /// Dry-run of `open_position` without touching any state
    fn quote(&self, account: &Address, direction: Direction, amount: u128) -> Result<Fill, VenueError>;

    fn position_size(&self, account: &Address) -> i128;

    /// Cash held for `account` (18 decimals), excluding unsettled funding
    fn margin_balance(&self, account: &Address) -> i128;

    fn funding_accumulator(&self) -> i128;

    /// Trading fee in parts-per-million of notional
    fn fee_ppm(&self) -> u128;

    /// Cash the venue requires to hold a position of `size` (18 decimals)
    fn required_margin(&self, size: i128) -> Result<i128, VenueError>;

    /// Margin `account` may pull after the market closed, in `token` native units
    fn settleable_margin<T: CollateralToken>(&self, account: &Address, token: &T) -> Result<u128, VenueError>;

    fn deposit<T: CollateralToken>(&mut self, account: &Address, token: &mut T, amount: u128) -> Result<(), VenueError>;

    fn withdraw<T: CollateralToken>(&mut self, account: &Address, token: &mut T, amount: u128) -> Result<(), VenueError>;

    /// Close out `account` after the market closed and pay its margin in
    /// `token`; returns the native amount transferred
    fn withdraw_settled<T: CollateralToken>(&mut self, account: &Address, token: &mut T) -> Result<u128, VenueError>;
}

//! Deterministic in-memory venue and token
//!
//! Both types are cheap-clone handles over shared state: the wrapper owns one
//! handle, tests and the simulator keep another to drive the outside world
//! (mint tokens, move the funding accumulator, pause or close the market).
//!
//! The venue prices every trade at its index price. Fees are charged in
//! parts-per-million of notional. Positions carry funding through the same
//! linear basis scheme the wrapper uses; price PnL is not marked to market.

use crate::accountant::CollateralAccountant;
use crate::error::VenueError;
use crate::math::{mul_div_down, mul_div_up, to_signed, wmul, WAD};
use crate::types::{Address, Direction, Fill, MarketStatus, Rounding, TradeBounds};
use crate::venue::{CollateralToken, PerpVenue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

const PPM: u128 = 1_000_000;

#[derive(Debug, Default)]
struct TokenBook {
    balances: HashMap<Address, u128>,
}

/// In-memory fungible token
#[derive(Debug, Clone)]
pub struct MockToken {
    address: Address,
    decimals: u8,
    book: Rc<RefCell<TokenBook>>,
}

impl MockToken {
    pub fn new(address: impl Into<String>, decimals: u8) -> Self {
        Self {
            address: Address::new(address),
            decimals,
            book: Rc::new(RefCell::new(TokenBook::default())),
        }
    }

    pub fn mint(&self, to: &Address, amount: u128) {
        let mut book = self.book.borrow_mut();
        let balance = book.balances.entry(to.clone()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Whole tokens in native units
    pub fn units(&self, whole: u128) -> u128 {
        whole * 10u128.pow(self.decimals as u32)
    }
}

impl CollateralToken for MockToken {
    fn address(&self) -> &Address {
        &self.address
    }

    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn balance_of(&self, account: &Address) -> u128 {
        self.book.borrow().balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), VenueError> {
        let mut book = self.book.borrow_mut();
        let available = book.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(VenueError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        book.balances.insert(from.clone(), available - amount);
        let balance = book.balances.entry(to.clone()).or_insert(0);
        *balance += amount;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MarginAccount {
    cash: i128,
    size: i128,
    funding_basis: i128,
    settled: bool,
}

impl MarginAccount {
    fn pending_funding(&self, accumulator: i128) -> Result<i128, VenueError> {
        let implied = wmul(self.size, accumulator).ok_or(VenueError::Overflow)?;
        self.funding_basis.checked_sub(implied).ok_or(VenueError::Overflow)
    }
}

#[derive(Debug)]
struct VenueBook {
    vault: Address,
    now: u64,
    status: MarketStatus,
    index_price: u128,
    fee_ppm: u128,
    max_leverage: u128,
    funding_accumulator: i128,
    accounts: HashMap<Address, MarginAccount>,
    fail_next_trade: Option<VenueError>,
}

impl VenueBook {
    fn price_trade(&self, account: &MarginAccount, direction: Direction, amount: u128) -> Result<(Fill, bool), VenueError> {
        let reduces = matches!(
            (direction, Direction::of(account.size)),
            (Direction::Long, Some(Direction::Short)) | (Direction::Short, Some(Direction::Long))
        );
        if reduces && amount > account.size.unsigned_abs() {
            // Flipping through zero in one trade is not supported
            return Err(VenueError::InsufficientMargin {
                required: to_signed(amount).unwrap_or(i128::MAX),
                available: account.size.abs(),
            });
        }
        let notional = mul_div_down(amount, self.index_price, WAD).ok_or(VenueError::Overflow)?;
        let fee = mul_div_up(notional, self.fee_ppm, PPM).ok_or(VenueError::Overflow)?;
        let filled = if reduces {
            amount
        } else {
            mul_div_down(notional.saturating_sub(fee), WAD, self.index_price).ok_or(VenueError::Overflow)?
        };
        Ok((Fill { filled, notional, fee }, reduces))
    }

    fn required_margin(&self, size: i128) -> Result<i128, VenueError> {
        let notional = mul_div_up(size.unsigned_abs(), self.index_price, WAD).ok_or(VenueError::Overflow)?;
        let required = notional / self.max_leverage.max(1);
        to_signed(required).ok_or(VenueError::Overflow)
    }
}

/// In-memory perpetual venue with a single market
#[derive(Debug, Clone)]
pub struct MockVenue {
    book: Rc<RefCell<VenueBook>>,
}

impl MockVenue {
    /// Open market at price 1.0, no fee, 10x max leverage
    pub fn new(vault: impl Into<String>) -> Self {
        Self {
            book: Rc::new(RefCell::new(VenueBook {
                vault: Address::new(vault),
                now: chrono::Utc::now().timestamp().max(0) as u64,
                status: MarketStatus::Open,
                index_price: WAD,
                fee_ppm: 0,
                max_leverage: 10,
                funding_accumulator: 0,
                accounts: HashMap::new(),
                fail_next_trade: None,
            })),
        }
    }

    pub fn with_fee_ppm(self, fee_ppm: u128) -> Self {
        self.book.borrow_mut().fee_ppm = fee_ppm;
        self
    }

    pub fn vault(&self) -> Address {
        self.book.borrow().vault.clone()
    }

    pub fn set_status(&self, status: MarketStatus) {
        self.book.borrow_mut().status = status;
    }

    pub fn set_index_price(&self, price: u128) {
        self.book.borrow_mut().index_price = price.max(1);
    }

    pub fn set_fee_ppm(&self, fee_ppm: u128) {
        self.book.borrow_mut().fee_ppm = fee_ppm;
    }

    pub fn set_timestamp(&self, now: u64) {
        self.book.borrow_mut().now = now;
    }

    pub fn advance_time(&self, seconds: u64) {
        let mut book = self.book.borrow_mut();
        book.now = book.now.saturating_add(seconds);
    }

    pub fn set_funding_accumulator(&self, accumulator: i128) {
        self.book.borrow_mut().funding_accumulator = accumulator;
    }

    /// Move the accumulator; positive means longs pay shorts
    pub fn accrue_funding(&self, delta: i128) {
        let mut book = self.book.borrow_mut();
        book.funding_accumulator = book.funding_accumulator.saturating_add(delta);
    }

    /// Credit (or debit) cash outside of any trade, e.g. a venue-side payout
    pub fn credit_margin(&self, account: &Address, amount: i128) {
        let mut book = self.book.borrow_mut();
        let entry = book.accounts.entry(account.clone()).or_default();
        entry.cash = entry.cash.saturating_add(amount);
    }

    /// Make the next `open_position` fail with `error`
    pub fn fail_next_trade(&self, error: VenueError) {
        self.book.borrow_mut().fail_next_trade = Some(error);
    }

    pub fn status(&self) -> MarketStatus {
        self.book.borrow().status
    }

    fn account(&self, account: &Address) -> MarginAccount {
        self.book.borrow().accounts.get(account).copied().unwrap_or_default()
    }
}

impl PerpVenue for MockVenue {
    fn timestamp(&self) -> u64 {
        self.book.borrow().now
    }

    fn market_status(&self) -> MarketStatus {
        self.book.borrow().status
    }

    fn open_position(
        &mut self,
        account: &Address,
        direction: Direction,
        amount: u128,
        bounds: TradeBounds,
    ) -> Result<Fill, VenueError> {
        let mut book = self.book.borrow_mut();
        if book.status != MarketStatus::Open {
            return Err(VenueError::MarketNotOpen);
        }
        if book.now > bounds.deadline {
            return Err(VenueError::DeadlineExpired {
                now: book.now,
                deadline: bounds.deadline,
            });
        }
        if bounds.price_limit != 0 {
            let price = book.index_price;
            let breached = match direction {
                Direction::Long => price > bounds.price_limit,
                Direction::Short => price < bounds.price_limit,
            };
            if breached {
                return Err(VenueError::SlippageExceeded {
                    price,
                    limit: bounds.price_limit,
                });
            }
        }
        if let Some(error) = book.fail_next_trade.take() {
            return Err(error);
        }

        let mut state = book.accounts.get(account).copied().unwrap_or_default();
        let (fill, reduces) = book.price_trade(&state, direction, amount)?;
        let change = direction.signed(fill.filled).ok_or(VenueError::Overflow)?;
        let fee = to_signed(fill.fee).ok_or(VenueError::Overflow)?;

        state.size = state.size.checked_add(change).ok_or(VenueError::Overflow)?;
        let weighted = wmul(change, book.funding_accumulator).ok_or(VenueError::Overflow)?;
        state.funding_basis = state.funding_basis.checked_add(weighted).ok_or(VenueError::Overflow)?;
        state.cash = state.cash.checked_sub(fee).ok_or(VenueError::Overflow)?;

        if !reduces {
            let required = book.required_margin(state.size)?;
            if state.cash < required {
                return Err(VenueError::InsufficientMargin {
                    required,
                    available: state.cash,
                });
            }
        }

        debug!(
            account = %account,
            ?direction,
            filled = fill.filled,
            fee = fill.fee,
            size = state.size,
            "venue trade"
        );
        book.accounts.insert(account.clone(), state);
        Ok(fill)
    }

    fn quote(&self, account: &Address, direction: Direction, amount: u128) -> Result<Fill, VenueError> {
        let book = self.book.borrow();
        let state = book.accounts.get(account).copied().unwrap_or_default();
        book.price_trade(&state, direction, amount).map(|(fill, _)| fill)
    }

    fn position_size(&self, account: &Address) -> i128 {
        self.account(account).size
    }

    fn margin_balance(&self, account: &Address) -> i128 {
        self.account(account).cash
    }

    fn funding_accumulator(&self) -> i128 {
        self.book.borrow().funding_accumulator
    }

    fn fee_ppm(&self) -> u128 {
        self.book.borrow().fee_ppm
    }

    fn required_margin(&self, size: i128) -> Result<i128, VenueError> {
        self.book.borrow().required_margin(size)
    }

    fn settleable_margin<T: CollateralToken>(&self, account: &Address, token: &T) -> Result<u128, VenueError> {
        let book = self.book.borrow();
        if book.status != MarketStatus::Closed {
            return Err(VenueError::MarketNotClosed);
        }
        let state = book.accounts.get(account).copied().unwrap_or_default();
        if state.settled {
            return Ok(0);
        }
        let value = state
            .cash
            .checked_add(state.pending_funding(book.funding_accumulator)?)
            .ok_or(VenueError::Overflow)?;
        if value <= 0 {
            return Ok(0);
        }
        let accountant = CollateralAccountant::new(token.decimals()).ok_or(VenueError::Overflow)?;
        Ok(accountant.to_native(value.unsigned_abs(), Rounding::Down))
    }

    fn deposit<T: CollateralToken>(&mut self, account: &Address, token: &mut T, amount: u128) -> Result<(), VenueError> {
        let vault = self.vault();
        let accountant = CollateralAccountant::new(token.decimals()).ok_or(VenueError::Overflow)?;
        let credited = to_signed(accountant.to_underlying18(amount, Rounding::Down)).ok_or(VenueError::Overflow)?;
        token.transfer(account, &vault, amount)?;

        let mut book = self.book.borrow_mut();
        let state = book.accounts.entry(account.clone()).or_default();
        state.cash = state.cash.checked_add(credited).ok_or(VenueError::Overflow)?;
        Ok(())
    }

    fn withdraw<T: CollateralToken>(&mut self, account: &Address, token: &mut T, amount: u128) -> Result<(), VenueError> {
        let vault = self.vault();
        let accountant = CollateralAccountant::new(token.decimals()).ok_or(VenueError::Overflow)?;
        let debited = to_signed(accountant.to_underlying18(amount, Rounding::Up)).ok_or(VenueError::Overflow)?;
        {
            let book = self.book.borrow();
            let state = book.accounts.get(account).copied().unwrap_or_default();
            let remaining = state.cash.checked_sub(debited).ok_or(VenueError::Overflow)?;
            let required = book.required_margin(state.size)?;
            if remaining < required {
                return Err(VenueError::InsufficientMargin {
                    required: debited.saturating_add(required),
                    available: state.cash,
                });
            }
        }
        token.transfer(&vault, account, amount)?;

        let mut book = self.book.borrow_mut();
        let state = book.accounts.entry(account.clone()).or_default();
        state.cash -= debited;
        Ok(())
    }

    fn withdraw_settled<T: CollateralToken>(&mut self, account: &Address, token: &mut T) -> Result<u128, VenueError> {
        if self.account(account).settled {
            return Err(VenueError::NothingToSettle);
        }
        let payout = self.settleable_margin(account, token)?;
        let vault = self.vault();
        if payout > 0 {
            token.transfer(&vault, account, payout)?;
        }

        let mut book = self.book.borrow_mut();
        let state = book.accounts.entry(account.clone()).or_default();
        *state = MarginAccount {
            settled: true,
            ..MarginAccount::default()
        };
        Ok(payout)
    }
}

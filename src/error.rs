//! Error taxonomy for the wrapper and its external collaborators

use crate::types::MarketState;
use thiserror::Error;

/// Failures reported by the trading venue or a token contract.
/// These are surfaced to callers unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("Slippage exceeded: execution price {price} beyond limit {limit}")]
    SlippageExceeded { price: u128, limit: u128 },

    #[error("Deadline expired: now {now}, deadline {deadline}")]
    DeadlineExpired { now: u64, deadline: u64 },

    #[error("Market is not open")]
    MarketNotOpen,

    #[error("Market is not closed")]
    MarketNotClosed,

    #[error("Insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: i128, available: i128 },

    #[error("Insufficient token balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Nothing to settle")]
    NothingToSettle,

    #[error("Math overflow in venue accounting")]
    Overflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WrapperError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral { required: u128, available: u128 },

    #[error("Insufficient position: requested {requested}, held {held}")]
    InsufficientPosition { requested: u128, held: u128 },

    #[error("Max position reached: max {max}, resulting {resulting}")]
    MaxPositionReached { max: u128, resulting: u128 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rebalance direction not allowed for funding PnL {unrealized}")]
    DirectionNotAllowed { unrealized: i128 },

    #[error("Rebalance of {requested} exceeds unrealized funding PnL {unrealized}")]
    RebalanceTooLarge { requested: u128, unrealized: i128 },

    #[error("Market closed (state: {0:?})")]
    MarketClosed(MarketState),

    #[error("Market not closed at venue (state: {0:?})")]
    MarketNotClosed(MarketState),

    #[error("Already settled")]
    AlreadySettled,

    #[error("Collateral slippage: limit {limit}, actual {actual}")]
    SlippageExceeded { limit: u128, actual: u128 },

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Venue position {actual} left out of step with ledger {expected}")]
    PositionMismatch { expected: i128, actual: i128 },

    #[error("Math overflow")]
    MathOverflow,

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),
}

impl WrapperError {
    pub fn unauthorized(role: &str) -> Self {
        WrapperError::Unauthorized(format!("only {} is allowed", role))
    }
}

pub type Result<T> = std::result::Result<T, WrapperError>;

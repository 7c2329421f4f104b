//! Lemma Perp Wrapper - delta-targeted position wrapper and rebalance engine
//!
//! Backs a synthetic-asset minter with a position at an external perpetual
//! venue: converts collateral decimals, opens and closes proportionally to
//! mints and burns, tracks funding PnL through an entry funding basis,
//! validates rebalances, and settles once the venue market closes.

pub mod accountant;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod keeper;
pub mod ledger;
pub mod math;
pub mod mock;
pub mod rebalance;
pub mod settlement;
pub mod types;
pub mod venue;
pub mod wrapper;

pub use accountant::CollateralAccountant;
pub use config::{ConfigError, Configuration, OwnerConfig, WrapperSettings};
pub use error::{Result, VenueError, WrapperError};
pub use events::WrapperEvent;
pub use executor::{TradeExecutor, TradeReceipt};
pub use keeper::KeeperConfig;
pub use ledger::{Position, PositionLedger};
pub use mock::{MockToken, MockVenue};
pub use rebalance::RebalanceRequest;
pub use settlement::SettlementHandler;
pub use types::*;
pub use venue::{CollateralToken, PerpVenue};
pub use wrapper::{CollateralState, LemmaWrapper, PositionWrapper, WrapperSnapshot};

//! Audit events emitted after an operation fully succeeds

use crate::types::{wad_to_decimal, Address, MarketState};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WrapperEvent {
    PositionChanged {
        size_before: i128,
        size_after: i128,
        /// Native collateral in (+) or out (-) of the wrapper
        collateral_delta: i128,
        fee: u128,
    },
    Rebalanced {
        rebalancer: Address,
        size_before: i128,
        size_after: i128,
        /// Signed funding PnL moved into the realized bucket
        realized: i128,
        /// Observed change in venue cash (18 decimals)
        margin_delta: i128,
        fee: u128,
    },
    Settled {
        size_before: i128,
        size_after: i128,
        /// Native collateral pulled from the venue
        collateral_delta: i128,
        state: MarketState,
    },
    ConfigUpdated {
        field: String,
    },
}

impl WrapperEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WrapperEvent::PositionChanged { .. } => "PositionChanged",
            WrapperEvent::Rebalanced { .. } => "Rebalanced",
            WrapperEvent::Settled { .. } => "Settled",
            WrapperEvent::ConfigUpdated { .. } => "ConfigUpdated",
        }
    }

    pub(crate) fn trace(&self) {
        match self {
            WrapperEvent::PositionChanged {
                size_before,
                size_after,
                collateral_delta,
                fee,
            } => info!(
                size_before = %wad_to_decimal(*size_before),
                size_after = %wad_to_decimal(*size_after),
                collateral_delta,
                fee = %wad_to_decimal(*fee as i128),
                "PositionChanged"
            ),
            WrapperEvent::Rebalanced {
                rebalancer,
                size_before,
                size_after,
                realized,
                margin_delta,
                fee,
            } => info!(
                %rebalancer,
                size_before = %wad_to_decimal(*size_before),
                size_after = %wad_to_decimal(*size_after),
                realized = %wad_to_decimal(*realized),
                margin_delta = %wad_to_decimal(*margin_delta),
                fee = %wad_to_decimal(*fee as i128),
                "Rebalanced"
            ),
            WrapperEvent::Settled {
                size_before,
                size_after,
                collateral_delta,
                state,
            } => info!(
                size_before = %wad_to_decimal(*size_before),
                size_after = %wad_to_decimal(*size_after),
                collateral_delta,
                ?state,
                "Settled"
            ),
            WrapperEvent::ConfigUpdated { field } => info!(field = %field, "ConfigUpdated"),
        }
    }
}

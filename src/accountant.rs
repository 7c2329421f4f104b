//! Conversion between 18-decimal underlying amounts and collateral native units
//!
//! Rounding always favours the wrapper: amounts it must receive round up,
//! amounts it pays out round down. Dust therefore accrues to the protocol
//! over many operations, never to the counterparty.

use crate::math::{mul_div_down, mul_div_up, pow10, WAD};
use crate::types::Rounding;
use serde::{Deserialize, Serialize};

/// Largest supported token precision; keeps `10^decimals` inside u128
pub const MAX_DECIMALS: u8 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralAccountant {
    decimals: u8,
}

impl CollateralAccountant {
    /// `None` when the token precision is outside what u128 can rescale
    pub fn new(decimals: u8) -> Option<Self> {
        (decimals <= MAX_DECIMALS).then_some(Self { decimals })
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// 18-decimal amount to collateral native units
    pub fn to_native(&self, amount18: u128, rounding: Rounding) -> u128 {
        let native_unit = self.native_unit();
        let result = match rounding {
            Rounding::Up => mul_div_up(amount18, native_unit, WAD),
            Rounding::Down => mul_div_down(amount18, native_unit, WAD),
        };
        // Only reachable when decimals > 18 and the amount is near u128::MAX
        result.unwrap_or(u128::MAX)
    }

    /// Collateral native units to an 18-decimal amount
    pub fn to_underlying18(&self, native: u128, rounding: Rounding) -> u128 {
        let native_unit = self.native_unit();
        let result = match rounding {
            Rounding::Up => mul_div_up(native, WAD, native_unit),
            Rounding::Down => mul_div_down(native, WAD, native_unit),
        };
        result.unwrap_or(u128::MAX)
    }

    fn native_unit(&self) -> u128 {
        pow10(self.decimals as u32).unwrap_or(u128::MAX)
    }
}

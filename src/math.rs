//! 18-decimal fixed-point arithmetic
//!
//! Every amount the wrapper accounts in is a raw integer scaled by `WAD`.
//! Products of two scaled values are taken through a 256-bit intermediate so
//! `size * accumulator` cannot overflow before the rescale. All signed
//! results truncate toward zero, which is how the venue rounds its own books.

use primitive_types::U256;

/// One unit at 18 decimals
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// `a * b / denom`, rounded down
pub fn mul_div_down(a: u128, b: u128, denom: u128) -> Option<u128> {
    if denom == 0 {
        return None;
    }
    let product = U256::from(a) * U256::from(b);
    narrow(product / U256::from(denom))
}

/// `a * b / denom`, rounded up
pub fn mul_div_up(a: u128, b: u128, denom: u128) -> Option<u128> {
    if denom == 0 {
        return None;
    }
    let product = U256::from(a) * U256::from(b);
    let denom = U256::from(denom);
    let (quotient, remainder) = product.div_mod(denom);
    let quotient = if remainder.is_zero() {
        quotient
    } else {
        quotient + U256::one()
    };
    narrow(quotient)
}

/// Signed `a * b / WAD`, truncated toward zero
pub fn wmul(a: i128, b: i128) -> Option<i128> {
    let magnitude = mul_div_down(a.unsigned_abs(), b.unsigned_abs(), WAD)?;
    apply_sign(magnitude, (a < 0) != (b < 0))
}

/// Signed `a * WAD / b`, truncated toward zero
pub fn wdiv(a: i128, b: i128) -> Option<i128> {
    let magnitude = mul_div_down(a.unsigned_abs(), WAD, b.unsigned_abs())?;
    apply_sign(magnitude, (a < 0) != (b < 0))
}

/// Convert an unsigned amount into a signed one, failing above `i128::MAX`
pub fn to_signed(amount: u128) -> Option<i128> {
    i128::try_from(amount).ok()
}

/// `10^exp` for decimal rescaling
pub fn pow10(exp: u32) -> Option<u128> {
    10u128.checked_pow(exp)
}

fn narrow(value: U256) -> Option<u128> {
    if value > U256::from(u128::MAX) {
        None
    } else {
        Some(value.low_u128())
    }
}

fn apply_sign(magnitude: u128, negative: bool) -> Option<i128> {
    let value = i128::try_from(magnitude).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wmul_truncates_toward_zero() {
        // 1.5 * 0.000000000000000001 = 1.5e-18 -> 1 wei
        assert_eq!(wmul(15 * WAD as i128 / 10, 1), Some(1));
        assert_eq!(wmul(-(15 * WAD as i128 / 10), 1), Some(-1));
        assert_eq!(wmul(-3, 3 * WAD as i128 / 10), Some(0));
    }

    #[test]
    fn test_wmul_wide_intermediate() {
        // 1e12 units * 1e6 units would overflow i128 without the wide product
        let size = 1_000_000_000_000 * WAD as i128;
        let acc = 1_000_000 * WAD as i128;
        assert_eq!(wmul(size, acc), Some(1_000_000_000_000_000_000 * WAD as i128));
    }

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div_down(10, 1, 3), Some(3));
        assert_eq!(mul_div_up(10, 1, 3), Some(4));
        assert_eq!(mul_div_up(9, 1, 3), Some(3));
        assert_eq!(mul_div_down(1, 1, 0), None);
    }

    #[test]
    fn test_overflow_detected() {
        assert_eq!(mul_div_down(u128::MAX, u128::MAX, 1), None);
        assert_eq!(wmul(i128::MAX, 2 * WAD as i128), None);
        assert_eq!(to_signed(u128::MAX), None);
    }

    #[test]
    fn test_wdiv() {
        assert_eq!(wdiv(WAD as i128, 2 * WAD as i128), Some(WAD as i128 / 2));
        assert_eq!(wdiv(-(WAD as i128), 4 * WAD as i128), Some(-(WAD as i128) / 4));
        assert_eq!(wdiv(1, 0), None);
    }
}

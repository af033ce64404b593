//! Monetary rounding.
//!
//! Amounts are `rust_decimal::Decimal` throughout. Line-level amounts are
//! rounded to 2 decimals *before* aggregation, so document totals are sums of
//! already-rounded values.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to 2 decimals, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum of values each rounded to 2 decimals, saturating at the
/// `Decimal` bounds.
pub fn sum_rounded<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .map(round2)
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(round2(dec!(0.125)), dec!(0.13));
        assert_eq!(round2(dec!(-0.125)), dec!(-0.13));
        assert_eq!(round2(dec!(10.004)), dec!(10.00));
    }

    #[test]
    fn sum_rounds_each_term_first() {
        // 0.005 + 0.005 would be 0.01 unrounded; each rounds to 0.01 first.
        assert_eq!(sum_rounded([dec!(0.005), dec!(0.005)]), dec!(0.02));
    }

    #[test]
    fn sum_saturates_instead_of_overflowing() {
        assert_eq!(sum_rounded([Decimal::MAX, Decimal::MAX]), Decimal::MAX);
    }
}

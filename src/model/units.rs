use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-point integer as it crosses the ledger boundary.
pub type RawAmount = u128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,
    #[error("not a number: {0:?}")]
    NotNumeric(String),
    #[error("amount must not be negative")]
    Negative,
    #[error("too many decimal places ({scale}), token precision is {decimals}")]
    TooPrecise { scale: u32, decimals: u8 },
    #[error("amount does not fit in a ledger integer")]
    Overflow,
}

/// Parses a user-typed decimal string into a raw amount scaled by `decimals`.
pub fn parse_units(input: &str, decimals: u8) -> Result<RawAmount, UnitsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }

    let value = match Decimal::from_str_exact(trimmed) {
        Ok(value) => value,
        // Numeric, but too many significant digits to hold without rounding.
        Err(_) if Decimal::from_str(trimmed).is_ok() => {
            let scale = fractional_digits(trimmed);
            return Err(if scale > u32::from(decimals) {
                UnitsError::TooPrecise { scale, decimals }
            } else {
                UnitsError::Overflow
            });
        }
        Err(_) => return Err(UnitsError::NotNumeric(trimmed.to_string())),
    };
    if value.is_zero() {
        return Ok(0);
    }
    if value.is_sign_negative() {
        return Err(UnitsError::Negative);
    }

    let value = value.normalize();
    let scale = value.scale();
    if scale > u32::from(decimals) {
        return Err(UnitsError::TooPrecise { scale, decimals });
    }

    let factor = 10u128
        .checked_pow(u32::from(decimals) - scale)
        .ok_or(UnitsError::Overflow)?;
    value
        .mantissa()
        .unsigned_abs()
        .checked_mul(factor)
        .ok_or(UnitsError::Overflow)
}

fn fractional_digits(input: &str) -> u32 {
    input
        .split_once('.')
        .map(|(_, fraction)| fraction.trim_end_matches('0').len())
        .and_then(|len| u32::try_from(len).ok())
        .unwrap_or(0)
}

/// Basis points from a percentage string with at most two decimals ("2.5" -> 250).
pub fn percent_to_bps(input: &str) -> Result<u32, UnitsError> {
    let hundredths = parse_units(input, 2)?;
    u32::try_from(hundredths).map_err(|_| UnitsError::Overflow)
}

/// Renders a raw amount as a decimal string without trailing zeros.
pub fn format_units(raw: RawAmount, decimals: u8) -> String {
    let digits = raw.to_string();
    if decimals == 0 {
        return digits;
    }

    let places = usize::from(decimals);
    let padded = if digits.len() <= places {
        format!("{}{}", "0".repeat(places - digits.len() + 1), digits)
    } else {
        digits
    };

    let (whole, fraction) = padded.split_at(padded.len() - places);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}

/// One whole token (`10^decimals`) as a raw amount, if representable.
pub fn one_unit(decimals: u8) -> Option<RawAmount> {
    10u128.checked_pow(u32::from(decimals))
}

/// Basis points to a percentage with two decimal places (250 -> 2.50).
pub fn bps_to_percent(bps: u32) -> Decimal {
    Decimal::new(i64::from(bps), 2)
}

/// An amount tagged with the precision of the token it is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: RawAmount,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: RawAmount, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self { raw: 0, decimals }
    }

    pub fn parse(input: &str, decimals: u8) -> Result<Self, UnitsError> {
        parse_units(input, decimals).map(|raw| Self { raw, decimals })
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_with_token_precision() {
        assert_eq!(parse_units("100", 6), Ok(100_000_000));
        assert_eq!(parse_units("1.5", 18), Ok(1_500_000_000_000_000_000));
        assert_eq!(parse_units(" 0.000001 ", 6), Ok(1));
        assert_eq!(parse_units("2.500000", 6), Ok(2_500_000));
    }

    #[test]
    fn zero_is_accepted_by_the_parser() {
        assert_eq!(parse_units("0", 6), Ok(0));
        assert_eq!(parse_units("0.000", 6), Ok(0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_units("", 6), Err(UnitsError::Empty));
        assert_eq!(parse_units("   ", 6), Err(UnitsError::Empty));
        assert!(matches!(parse_units("12abc", 6), Err(UnitsError::NotNumeric(_))));
        assert_eq!(parse_units("-3", 6), Err(UnitsError::Negative));
    }

    #[test]
    fn rejects_more_places_than_the_token_has() {
        assert_eq!(
            parse_units("0.0000001", 6),
            Err(UnitsError::TooPrecise { scale: 7, decimals: 6 })
        );
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(format_units(100_000_000, 6), "100");
        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(1, 6), "0.000001");
        assert_eq!(format_units(0, 18), "0");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn formats_values_beyond_decimal_range() {
        let amount = TokenAmount::new(u128::MAX, 18);
        assert_eq!(amount.to_string(), "340282366920938463463.374607431768211455");
    }

    #[test]
    fn fee_basis_points_become_percentages() {
        assert_eq!(bps_to_percent(200), dec!(2.00));
        assert_eq!(bps_to_percent(1250), dec!(12.50));
        assert_eq!(bps_to_percent(0), dec!(0));
    }

    #[test]
    fn long_input_is_rejected_instead_of_rounded() {
        assert_eq!(
            parse_units("9.0000000000000000000000000001", 18),
            Err(UnitsError::TooPrecise { scale: 28, decimals: 18 })
        );
        assert_eq!(
            parse_units("1.000000000000000000000000000001", 36),
            Err(UnitsError::Overflow)
        );
        assert!(matches!(
            parse_units("9.00000000000000000000000000001x", 18),
            Err(UnitsError::NotNumeric(_))
        ));
    }

    #[test]
    fn percentages_become_basis_points() {
        assert_eq!(percent_to_bps("10"), Ok(1000));
        assert_eq!(percent_to_bps("2.5"), Ok(250));
        assert_eq!(percent_to_bps("0"), Ok(0));
        assert!(matches!(percent_to_bps("0.125"), Err(UnitsError::TooPrecise { .. })));
        assert_eq!(percent_to_bps("-1"), Err(UnitsError::Negative));
    }
}

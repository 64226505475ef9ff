//! Product price stored as `NUMERIC(8, 2)`.

use core::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when building a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The input is not a decimal number.
    #[error("enter a number")]
    Invalid,
    /// The amount is below zero.
    #[error("ensure this value is greater than or equal to 0")]
    Negative,
    /// More fractional digits than the column keeps.
    #[error("ensure that there are no more than {max} decimal places")]
    TooManyDecimalPlaces {
        /// Maximum allowed decimal places.
        max: u32,
    },
    /// More digits in total than the column keeps.
    #[error("ensure that there are no more than {max} digits in total")]
    TooManyDigits {
        /// Maximum allowed digits.
        max: u32,
    },
}

/// A non-negative amount with at most 8 digits, 2 of them after the point.
///
/// The value is always kept at scale 2, so `"10"` and `"10.00"` compare
/// equal and both display as `10.00`. Serialized as a decimal string.
///
/// ```
/// use mysite_core::Price;
///
/// assert_eq!(Price::parse("123.45").unwrap().to_string(), "123.45");
/// assert_eq!(Price::parse("7").unwrap().to_string(), "7.00");
/// assert!(Price::parse("-1").is_err());
/// assert!(Price::parse("1.005").is_err());
/// assert!(Price::parse("1234567.00").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub const MAX_DIGITS: u32 = 8;
    pub const DECIMAL_PLACES: u32 = 2;
    pub const ZERO: Self = Self(Decimal::from_parts(0, 0, 0, false, Self::DECIMAL_PLACES));

    /// Parse a price from user input.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a decimal number or the value
    /// does not fit the column.
    pub fn parse(s: &str) -> Result<Self, PriceError> {
        let amount = Decimal::from_str(s.trim()).map_err(|_| PriceError::Invalid)?;
        Self::try_from(amount)
    }

    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative);
        }
        if amount.normalize().scale() > Self::DECIMAL_PLACES {
            return Err(PriceError::TooManyDecimalPlaces {
                max: Self::DECIMAL_PLACES,
            });
        }

        let mut scaled = amount.abs();
        scaled.rescale(Self::DECIMAL_PLACES);
        if scaled.mantissa() >= 10_i128.pow(Self::MAX_DIGITS) {
            return Err(PriceError::TooManyDigits {
                max: Self::MAX_DIGITS,
            });
        }
        Ok(Self(scaled))
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl Default for Price {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Price {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Price {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let amount = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::try_from(amount)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Price {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_two_places() {
        assert_eq!(Price::parse("123.45").unwrap().to_string(), "123.45");
        assert_eq!(Price::parse("10").unwrap().to_string(), "10.00");
        assert_eq!(Price::parse("0.5").unwrap().to_string(), "0.50");
        assert_eq!(Price::parse(" 3.10 ").unwrap().to_string(), "3.10");
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Price::parse("abc"), Err(PriceError::Invalid));
        assert_eq!(Price::parse(""), Err(PriceError::Invalid));
    }

    #[test]
    fn test_parse_negative() {
        assert_eq!(Price::parse("-0.01"), Err(PriceError::Negative));
    }

    #[test]
    fn test_trailing_zeros_do_not_count_as_places() {
        assert_eq!(Price::parse("1.2300").unwrap().to_string(), "1.23");
        assert!(matches!(
            Price::parse("1.234"),
            Err(PriceError::TooManyDecimalPlaces { max: 2 })
        ));
    }

    #[test]
    fn test_digit_limit() {
        assert!(Price::parse("999999.99").is_ok());
        assert!(matches!(
            Price::parse("1000000"),
            Err(PriceError::TooManyDigits { max: 8 })
        ));
    }

    #[test]
    fn test_equal_regardless_of_input_scale() {
        assert_eq!(Price::parse("10").unwrap(), Price::parse("10.00").unwrap());
        assert_eq!(Price::default(), Price::parse("0").unwrap());
    }

    #[test]
    fn test_serializes_as_string() {
        let price = Price::parse("19.9").unwrap();
        assert_eq!(serde_json::to_string(&price).unwrap(), "\"19.90\"");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Price = serde_json::from_str("\"5.25\"").unwrap();
        assert_eq!(ok.to_string(), "5.25");
        assert!(serde_json::from_str::<Price>("\"-5\"").is_err());
        assert!(serde_json::from_str::<Price>("\"5.255\"").is_err());
    }
}

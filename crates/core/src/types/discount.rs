//! Percentage discount on a product.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors that can occur when building a [`Discount`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscountError {
    #[error("enter a whole number")]
    Invalid,
    #[error("ensure this value is between 0 and {max}")]
    OutOfRange {
        /// Maximum allowed percentage.
        max: i16,
    },
}

/// A whole percentage from 0 to 100, stored as `SMALLINT`.
///
/// ```
/// use mysite_core::Discount;
///
/// assert_eq!(Discount::parse("10").unwrap().percent(), 10);
/// assert_eq!(Discount::parse("").unwrap(), Discount::NONE);
/// assert!(Discount::parse("101").is_err());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i16", into = "i16")]
pub struct Discount(i16);

impl Discount {
    pub const MAX: i16 = 100;
    pub const NONE: Self = Self(0);

    /// Parse a discount from form or CSV text. Blank input means no discount.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not an integer in `0..=100`.
    pub fn parse(s: &str) -> Result<Self, DiscountError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::NONE);
        }
        let value = s.parse::<i16>().map_err(|_| DiscountError::Invalid)?;
        Self::try_from(value)
    }

    #[must_use]
    pub const fn percent(&self) -> i16 {
        self.0
    }
}

impl TryFrom<i16> for Discount {
    type Error = DiscountError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        if (0..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DiscountError::OutOfRange { max: Self::MAX })
        }
    }
}

impl From<Discount> for i16 {
    fn from(discount: Discount) -> Self {
        discount.0
    }
}

impl fmt::Display for Discount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Discount {
    type Err = DiscountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Discount {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <i16 as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Discount {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let value = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::try_from(value)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Discount {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounds() {
        assert_eq!(Discount::parse("0").unwrap().percent(), 0);
        assert_eq!(Discount::parse("100").unwrap().percent(), 100);
        assert!(matches!(
            Discount::parse("-1"),
            Err(DiscountError::OutOfRange { max: 100 })
        ));
        assert!(matches!(
            Discount::parse("250"),
            Err(DiscountError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_parse_blank_is_none() {
        assert_eq!(Discount::parse("  ").unwrap(), Discount::NONE);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Discount::parse("ten"), Err(DiscountError::Invalid));
        assert_eq!(Discount::parse("1.5"), Err(DiscountError::Invalid));
    }

    #[test]
    fn test_serde_is_plain_integer() {
        let json = serde_json::to_string(&Discount::parse("11").unwrap()).unwrap();
        assert_eq!(json, "11");
        assert!(serde_json::from_str::<Discount>("101").is_err());
    }
}

//! # Minor-Unit Money
//!
//! All monetary amounts in the platform are integer minor units (cents,
//! paise) carried by [`Amount`]. There is no floating-point money anywhere
//! in the core: the `Deserialize` implementation rejects JSON floats at
//! the boundary, so a payload carrying `"amount": 99.95` fails validation
//! before it can reach a ledger write.
//!
//! Arithmetic is checked. Overflow surfaces as [`CoreError::AmountOverflow`]
//! instead of wrapping, which would silently corrupt a balance.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors arising from monetary and currency validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The amount is not representable as integer minor units.
    #[error("invalid monetary amount: {0}")]
    InvalidAmount(String),

    /// Checked arithmetic overflowed.
    #[error("monetary amount overflow in {operation}")]
    AmountOverflow {
        /// The arithmetic operation that overflowed.
        operation: &'static str,
    },

    /// Currency code is not three ASCII uppercase letters.
    #[error("invalid currency code: \"{0}\"")]
    InvalidCurrency(String),
}

// ── Amount ─────────────────────────────────────────────────────────────

/// A monetary amount in integer minor units.
///
/// The sign is meaningful: ledger rows store magnitudes (non-negative),
/// while intermediate arithmetic may pass through negative values that
/// the caller then validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from raw minor units.
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// The raw minor-unit value.
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly greater than zero.
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is negative.
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Whether the amount is exactly zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmountOverflow`] if the sum exceeds `i64`.
    pub fn checked_add(self, other: Amount) -> Result<Amount, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(CoreError::AmountOverflow { operation: "add" })
    }

    /// Checked subtraction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmountOverflow`] if the difference exceeds `i64`.
    pub fn checked_sub(self, other: Amount) -> Result<Amount, CoreError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(CoreError::AmountOverflow { operation: "sub" })
    }

    /// Basis-point fraction of this amount, rounded down.
    ///
    /// Used for percentage fee computation: `amount.bps(1000)` is 10%.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmountOverflow`] if the intermediate product
    /// exceeds `i64`.
    pub fn bps(self, basis_points: u32) -> Result<Amount, CoreError> {
        self.0
            .checked_mul(i64::from(basis_points))
            .map(|product| Amount(product / 10_000))
            .ok_or(CoreError::AmountOverflow { operation: "bps" })
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MinorUnitVisitor;

        impl Visitor<'_> for MinorUnitVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integer amount in minor units")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
                Ok(Amount(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
                i64::try_from(value).map(Amount).map_err(|_| {
                    E::custom(format!("amount {value} exceeds the minor-unit range"))
                })
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Amount, E> {
                Err(E::custom(format!(
                    "monetary amounts must be integer minor units, got float {value}"
                )))
            }
        }

        deserializer.deserialize_i64(MinorUnitVisitor)
    }
}

// ── Currency ───────────────────────────────────────────────────────────

/// An ISO 4217 currency code, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// Parse and validate a currency code.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCurrency`] unless the input is exactly
    /// three ASCII uppercase letters.
    pub fn new(code: &str) -> Result<Self, CoreError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(CoreError::InvalidCurrency(code.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII uppercase.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CurrencyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CurrencyCode::new(&s).map_err(de::Error::custom)
    }
}

// ── Fees ───────────────────────────────────────────────────────────────

/// Fee breakdown attached to a wallet transaction.
///
/// Stored as a typed struct rather than loose JSON so that fee components
/// are validated at the ledger boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Platform commission.
    pub platform: Amount,
    /// Payment processor cost.
    pub processor: Amount,
}

impl FeeBreakdown {
    /// A zero-fee breakdown.
    pub const NONE: FeeBreakdown = FeeBreakdown {
        platform: Amount::ZERO,
        processor: Amount::ZERO,
    };

    /// Total of all fee components.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmountOverflow`] if the components overflow.
    pub fn total(&self) -> Result<Amount, CoreError> {
        self.platform.checked_add(self.processor)
    }
}

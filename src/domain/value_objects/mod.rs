//! Value objects shared by the inventory aggregates

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seller SKU, the key marketplaces use to match a listing to stock.
///
/// Stored upper-case. Only ASCII letters, digits, `-`, `_` and `.` are
/// accepted since Mercado Livre and Amazon reject anything else in
/// `seller_sku`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

pub const MAX_SKU_LEN: usize = 50;

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > MAX_SKU_LEN { return Err(SkuError::TooLong); }
        if let Some(c) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))) {
            return Err(SkuError::InvalidChar(c));
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SkuError { Empty, TooLong, InvalidChar(char) }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "SKU cannot be empty"),
            Self::TooLong => write!(f, "SKU is longer than {} characters", MAX_SKU_LEN),
            Self::InvalidChar(c) => write!(f, "SKU cannot contain '{}'", c),
        }
    }
}

/// Amount in reais, kept at centavo precision. Arithmetic saturates instead of overflowing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn brl(amount: Decimal) -> Self { Self(amount.round_dp(2)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_negative(&self) -> bool { self.0.is_sign_negative() && !self.0.is_zero() }
    pub fn plus(&self, other: Money) -> Money { Self(self.0.saturating_add(other.0)) }
    pub fn minus(&self, other: Money) -> Money { Self(self.0.saturating_sub(other.0)) }
    pub fn times(&self, qty: u32) -> Money { Self(self.0.saturating_mul(Decimal::from(qty))) }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self { iter.fold(Money::default(), |acc, m| acc.plus(m)) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "R$ {:.2}", self.0) }
}

/// Largest stock count a product or listing can hold (the range of the `stock` columns).
pub const MAX_STOCK: u32 = i32::MAX as u32;

/// Units on hand, bounded by [`MAX_STOCK`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value.min(MAX_STOCK)) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn checked_add(&self, other: u32) -> Option<Self> {
        self.0.checked_add(other).filter(|v| *v <= MAX_STOCK).map(Self)
    }
    pub fn checked_sub(&self, other: u32) -> Option<Self> { self.0.checked_sub(other).map(Self) }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

// =============================================================================
// EAN-13
// =============================================================================

/// GS1 prefix assigned to Brazil, used for internally generated codes.
pub const BRAZIL_GS1_PREFIX: &str = "789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarcodeError { InvalidLength(usize), NonDigit, BadCheckDigit }
impl std::error::Error for BarcodeError {}
impl fmt::Display for BarcodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(n) => write!(f, "Expected 12 or 13 digits, got {}", n),
            Self::NonDigit => write!(f, "Barcode must contain only digits"),
            Self::BadCheckDigit => write!(f, "Invalid EAN-13 check digit"),
        }
    }
}

/// Computes the EAN-13 check digit for a 12-digit prefix.
///
/// Digits at even positions (0-based) weigh 1, odd positions weigh 3; the
/// check digit brings the weighted sum up to the next multiple of ten.
pub fn generate_ean13_check_digit(prefix: &str) -> Result<u8, BarcodeError> {
    if prefix.len() != 12 { return Err(BarcodeError::InvalidLength(prefix.len())); }
    let mut sum: u32 = 0;
    for (i, c) in prefix.chars().enumerate() {
        let digit = c.to_digit(10).ok_or(BarcodeError::NonDigit)?;
        sum += if i % 2 == 0 { digit } else { digit * 3 };
    }
    Ok(((10 - sum % 10) % 10) as u8)
}

/// True when `code` is 13 digits and its last digit matches the checksum.
pub fn validate_ean13(code: &str) -> bool {
    if code.len() != 13 || !code.bytes().all(|b| b.is_ascii_digit()) { return false; }
    let (prefix, check) = code.split_at(12);
    match generate_ean13_check_digit(prefix) {
        Ok(expected) => check.as_bytes()[0] - b'0' == expected,
        Err(_) => false,
    }
}

/// A validated EAN-13 barcode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ean13(String);

impl Ean13 {
    pub fn parse(code: &str) -> Result<Self, BarcodeError> {
        let code = code.trim();
        if code.len() != 13 { return Err(BarcodeError::InvalidLength(code.len())); }
        if !code.bytes().all(|b| b.is_ascii_digit()) { return Err(BarcodeError::NonDigit); }
        if !validate_ean13(code) { return Err(BarcodeError::BadCheckDigit); }
        Ok(Self(code.to_string()))
    }

    pub fn from_prefix(prefix: &str) -> Result<Self, BarcodeError> {
        let check = generate_ean13_check_digit(prefix)?;
        Ok(Self(format!("{}{}", prefix, check)))
    }

    /// Random code under the Brazilian GS1 prefix.
    pub fn generate_internal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let body: String = (0..9).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect();
        let prefix = format!("{}{}", BRAZIL_GS1_PREFIX, body);
        let check = generate_ean13_check_digit(&prefix).unwrap_or(0);
        Self(format!("{}{}", prefix, check))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Ean13 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_sku() { let sku = Sku::new(" fone-jbl_510.bt ").unwrap(); assert_eq!(sku.as_str(), "FONE-JBL_510.BT"); }

    #[test]
    fn test_sku_rejects_blank_and_marketplace_unsafe_chars() {
        assert_eq!(Sku::new("   "), Err(SkuError::Empty));
        assert_eq!(Sku::new("FONE 01"), Err(SkuError::InvalidChar(' ')));
        assert_eq!(Sku::new("CAFÉ-1"), Err(SkuError::InvalidChar('É')));
        assert_eq!(Sku::new("X".repeat(51)), Err(SkuError::TooLong));
    }

    #[test]
    fn test_money_keeps_centavos_and_saturates() {
        let price = Money::brl(Decimal::new(199_999, 4));
        assert_eq!(price.amount(), Decimal::new(2000, 2));
        assert_eq!(price.times(3).amount(), Decimal::new(60, 0));
        assert_eq!(price.to_string(), "R$ 20.00");
        let total: Money = [price, Money::brl(Decimal::new(550, 2))].into_iter().sum();
        assert_eq!(total.amount(), Decimal::new(2550, 2));
        assert_eq!(Money::brl(Decimal::MAX).times(2).amount(), Decimal::MAX);
        assert!(Money::brl(Decimal::new(-1, 2)).is_negative());
        assert!(!Money::default().is_negative());
    }

    #[test]
    fn test_quantity_is_bounded_by_stock_column() {
        let q = Quantity::new(MAX_STOCK - 1);
        assert_eq!(q.checked_add(1).map(|q| q.value()), Some(MAX_STOCK));
        assert_eq!(q.checked_add(2), None);
        assert_eq!(Quantity::new(3).checked_sub(4), None);
        assert_eq!(Quantity::new(u32::MAX).value(), MAX_STOCK);
    }

    #[test]
    fn test_known_ean13() {
        assert_eq!(generate_ean13_check_digit("789100031550").unwrap(), 7);
        assert!(validate_ean13("7891000315507"));
        assert!(validate_ean13("4006381333931"));
        assert!(!validate_ean13("4006381333932"));
    }

    #[test]
    fn test_check_digit_and_validation_are_inverse() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let prefix: String = (0..12).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect();
            let check = generate_ean13_check_digit(&prefix).unwrap();
            for candidate in 0..10u8 {
                let code = format!("{}{}", prefix, candidate);
                assert_eq!(validate_ean13(&code), candidate == check, "code {}", code);
            }
        }
    }

    #[test]
    fn test_ean13_rejects_malformed_input() {
        assert_eq!(generate_ean13_check_digit("12345"), Err(BarcodeError::InvalidLength(5)));
        assert_eq!(generate_ean13_check_digit("78910003155a"), Err(BarcodeError::NonDigit));
        assert!(!validate_ean13("789100031550"));
        assert!(!validate_ean13("78910003155O7"));
        assert_eq!(Ean13::parse("7891000315508"), Err(BarcodeError::BadCheckDigit));
    }

    #[test]
    fn test_generated_internal_codes_are_valid() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let code = Ean13::generate_internal(&mut rng);
            assert!(code.as_str().starts_with(BRAZIL_GS1_PREFIX));
            assert!(validate_ean13(code.as_str()));
        }
    }
}

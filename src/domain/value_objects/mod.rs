//! Value Objects for the storefront

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Coupon code value object. Codes are case-insensitive and stored uppercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct CouponCode(String);

impl CouponCode {
    pub fn new(value: impl Into<String>) -> Result<Self, CouponCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(CouponCodeError::Empty); }
        if value.len() > 50 { return Err(CouponCodeError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for CouponCode {
    type Error = CouponCodeError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CouponCodeError { Empty, TooLong }
impl std::error::Error for CouponCodeError {}
impl fmt::Display for CouponCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "coupon code is empty"), Self::TooLong => write!(f, "coupon code is too long") }
    }
}

/// Ordered quantity of a single line. Always at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: i64) -> Option<Self> {
        u32::try_from(value).ok().filter(|v| *v > 0).map(Self)
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
    pub fn fits_in(&self, available: i64) -> bool { i64::from(self.0) <= available }
}

/// Decodes a boolean-like activation flag.
///
/// Rows written by older tooling carry the flag as `1`, `"1"`, `true` or
/// `"true"`; any of those is truthy. Everything else, including `null`,
/// `0`, `"yes"` and `2`, decodes to `false`. The lenience is intentional.
pub fn decode_flag(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1) || n.as_u64() == Some(1) || n.as_f64() == Some(1.0),
        Value::String(s) => s == "1" || s == "true",
        _ => false,
    }
}

/// Serde adapter for flags decoded through [`decode_flag`].
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(decode_flag(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coupon_code_normalized() {
        let code = CouponCode::new("  save10 ").unwrap();
        assert_eq!(code.as_str(), "SAVE10");
        assert_eq!(CouponCode::new("   "), Err(CouponCodeError::Empty));
        assert_eq!(CouponCode::new("x".repeat(51)), Err(CouponCodeError::TooLong));
    }

    #[test]
    fn test_quantity() {
        assert!(Quantity::new(0).is_none());
        assert!(Quantity::new(-3).is_none());
        let q = Quantity::new(2).unwrap();
        assert!(q.fits_in(2));
        assert!(!q.fits_in(1));
        assert_eq!(q.add(Quantity::new(3).unwrap()).value(), 5);
    }

    #[test]
    fn test_flag_encodings() {
        for truthy in [json!(1), json!("1"), json!(true), json!("true")] {
            assert!(decode_flag(&truthy), "{truthy} should be truthy");
        }
        for falsy in [json!(0), json!("0"), json!(false), json!("false"), json!("TRUE"), json!(2), json!(null), json!([1])] {
            assert!(!decode_flag(&falsy), "{falsy} should be falsy");
        }
    }

    #[test]
    fn test_flag_deserializer() {
        #[derive(Deserialize)]
        struct Row { #[serde(deserialize_with = "deserialize_flag")] is_valid: bool }
        let row: Row = serde_json::from_value(json!({ "is_valid": "1" })).unwrap();
        assert!(row.is_valid);
        let row: Row = serde_json::from_value(json!({ "is_valid": 0 })).unwrap();
        assert!(!row.is_valid);
    }
}

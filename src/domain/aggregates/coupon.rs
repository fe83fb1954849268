//! Coupon Aggregate
//!
//! A coupon is single-use: it moves from active to consumed exactly once, when
//! an order that applies it commits. Validation itself is pure; consumption is
//! performed by the order transaction.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{deserialize_flag, CouponCode};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: CouponCode,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_valid: bool,
    pub starting_date: Option<NaiveDateTime>,
    pub expiration_date: Option<NaiveDateTime>,
    pub discount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponReason { Valid, NotActive, NotYetValid, Expired }

impl CouponReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Valid => "Coupon valid",
            Self::NotActive => "Coupon is not active",
            Self::NotYetValid => "Coupon not yet valid",
            Self::Expired => "Coupon expired",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CouponVerdict {
    pub valid: bool,
    pub discount: Decimal,
    pub reason: CouponReason,
}

impl CouponVerdict {
    fn rejected(reason: CouponReason) -> Self { Self { valid: false, discount: Decimal::ZERO, reason } }
}

impl Coupon {
    /// Checks activation, start and expiry against `now`. The first failing rule wins.
    pub fn validate(&self, now: NaiveDateTime) -> CouponVerdict {
        if !self.is_valid {
            return CouponVerdict::rejected(CouponReason::NotActive);
        }
        if let Some(start) = self.starting_date {
            if now < start { return CouponVerdict::rejected(CouponReason::NotYetValid); }
        }
        if let Some(expiration) = self.expiration_date {
            if now > inclusive_expiration(expiration) { return CouponVerdict::rejected(CouponReason::Expired); }
        }
        CouponVerdict { valid: true, discount: self.discount, reason: CouponReason::Valid }
    }

    pub fn consume(&mut self) { self.is_valid = false; }
}

/// An expiration stamped exactly at midnight covers that whole calendar day.
fn inclusive_expiration(expiration: NaiveDateTime) -> NaiveDateTime {
    let at_midnight = expiration.hour() == 0 && expiration.minute() == 0 && expiration.second() == 0 && expiration.nanosecond() == 0;
    if !at_midnight { return expiration; }
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .map(|end| expiration.date().and_time(end))
        .unwrap_or(expiration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
    }

    fn coupon() -> Coupon {
        Coupon { id: 1, code: CouponCode::new("save10").unwrap(), is_valid: true, starting_date: None, expiration_date: None, discount: dec!(10.00) }
    }

    #[test]
    fn test_perpetual_coupon() {
        let verdict = coupon().validate(at(2031, 1, 1, 12, 0, 0));
        assert!(verdict.valid);
        assert_eq!(verdict.discount, dec!(10.00));
        assert_eq!(verdict.reason, CouponReason::Valid);
    }

    #[test]
    fn test_inactive_wins_over_dates() {
        let mut c = coupon();
        c.is_valid = false;
        c.starting_date = Some(at(2030, 1, 1, 0, 0, 0));
        c.expiration_date = Some(at(2020, 1, 1, 0, 0, 0));
        let verdict = c.validate(at(2025, 6, 1, 0, 0, 0));
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, CouponReason::NotActive);
        assert_eq!(verdict.discount, Decimal::ZERO);
    }

    #[test]
    fn test_not_yet_valid() {
        let mut c = coupon();
        c.starting_date = Some(at(2025, 3, 10, 9, 0, 0));
        assert_eq!(c.validate(at(2025, 3, 10, 8, 59, 59)).reason, CouponReason::NotYetValid);
        assert!(c.validate(at(2025, 3, 10, 9, 0, 0)).valid);
    }

    #[test]
    fn test_midnight_expiration_is_inclusive() {
        let mut c = coupon();
        c.expiration_date = Some(at(2025, 3, 10, 0, 0, 0));
        assert!(c.validate(at(2025, 3, 10, 23, 59, 59)).valid);
        assert_eq!(c.validate(at(2025, 3, 11, 0, 0, 1)).reason, CouponReason::Expired);
    }

    #[test]
    fn test_sub_second_past_midnight_is_exact() {
        let mut c = coupon();
        let expiration = at(2025, 3, 10, 0, 0, 0) + chrono::Duration::milliseconds(500);
        c.expiration_date = Some(expiration);
        assert!(c.validate(expiration).valid);
        assert_eq!(c.validate(at(2025, 3, 10, 0, 0, 1)).reason, CouponReason::Expired);
    }

    #[test]
    fn test_non_midnight_expiration_is_exact() {
        let mut c = coupon();
        c.expiration_date = Some(at(2025, 3, 10, 18, 30, 0));
        assert!(c.validate(at(2025, 3, 10, 18, 30, 0)).valid);
        assert_eq!(c.validate(at(2025, 3, 10, 18, 30, 1)).reason, CouponReason::Expired);
    }

    #[test]
    fn test_consumed_coupon_is_not_active() {
        let mut c = coupon();
        assert!(c.validate(at(2025, 1, 1, 0, 0, 0)).valid);
        c.consume();
        assert_eq!(c.validate(at(2025, 1, 1, 0, 0, 0)).reason, CouponReason::NotActive);
    }
}

//! Invoice Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    #[validate(length(min = 1, max = 255))]
    pub city: String,
    #[serde(alias = "cap")]
    #[validate(length(min = 1, max = 20))]
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 255))]
    pub province: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus { #[default] Pending, Paid, Cancelled, Refunded }

impl InvoiceStatus {
    pub const ALLOWED: [&'static str; 4] = ["pending", "paid", "cancelled", "refunded"];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Cancelled => "cancelled", Self::Refunded => "refunded" }
    }
}

impl FromStr for InvoiceStatus {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(InvoiceError::UnknownStatus(other.to_string())),
        }
    }
}

/// Invoice as persisted. Written once by the order transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub total_price: Decimal,
    pub payment_method: String,
    pub status: InvoiceStatus,
    pub username: String,
    pub user_email: String,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub coupon_id: Option<i64>,
    pub transaction_id: String,
    pub tracking_code: String,
    pub created_at: DateTime<Utc>,
}

/// Invoice fields known before the row exists.
#[derive(Clone, Debug, PartialEq)]
pub struct NewInvoice {
    pub total_price: Decimal,
    pub payment_method: String,
    pub status: InvoiceStatus,
    pub username: String,
    pub user_email: String,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub coupon_id: Option<i64>,
    pub transaction_id: String,
    pub tracking_code: String,
}

impl NewInvoice {
    pub fn persisted(self, id: i64, created_at: DateTime<Utc>) -> Invoice {
        Invoice {
            id, total_price: self.total_price, payment_method: self.payment_method, status: self.status,
            username: self.username, user_email: self.user_email, billing_address: self.billing_address,
            shipping_address: self.shipping_address, coupon_id: self.coupon_id,
            transaction_id: self.transaction_id, tracking_code: self.tracking_code, created_at,
        }
    }
}

/// Line snapshot. Prices and name are copied from the catalog at order time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: i64,
    pub product_id: i64,
    pub order_id: i64,
    pub quantity: i32,
    pub regular_price: Decimal,
    pub special_price: Option<Decimal>,
    pub product_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewInvoiceItem {
    pub product_id: i64,
    pub quantity: i32,
    pub regular_price: Decimal,
    pub special_price: Option<Decimal>,
    pub product_name: String,
}

impl NewInvoiceItem {
    pub fn persisted(self, id: i64, order_id: i64) -> InvoiceItem {
        InvoiceItem {
            id, product_id: self.product_id, order_id, quantity: self.quantity,
            regular_price: self.regular_price, special_price: self.special_price, product_name: self.product_name,
        }
    }
}

/// Price of one unit of a snapshot line.
fn unit_price(regular_price: Decimal, special_price: Option<Decimal>) -> Decimal {
    special_price.unwrap_or(regular_price)
}

impl InvoiceItem {
    pub fn unit_price(&self) -> Decimal { unit_price(self.regular_price, self.special_price) }
    pub fn line_total(&self) -> Decimal { self.unit_price() * Decimal::from(self.quantity) }
}

impl NewInvoiceItem {
    pub fn unit_price(&self) -> Decimal { unit_price(self.regular_price, self.special_price) }
    pub fn line_total(&self) -> Decimal { self.unit_price() * Decimal::from(self.quantity) }
}

/// Subtotal less discount, never below zero.
pub fn discounted_total(subtotal: Decimal, discount: Decimal) -> Decimal {
    (subtotal - discount).max(Decimal::ZERO)
}

/// Lifecycle of a single order attempt. Only the terminal states are ever observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderState { Started, ItemsValidated, StockReserved, Persisted, Committed, RolledBack }

impl OrderState {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Committed | Self::RolledBack) }

    pub fn advance(self, next: OrderState) -> Result<OrderState, InvoiceError> {
        use OrderState::*;
        let legal = match (self, next) {
            (Started, ItemsValidated) | (ItemsValidated, StockReserved) | (StockReserved, Persisted) | (Persisted, Committed) => true,
            (from, RolledBack) => !from.is_terminal(),
            _ => false,
        };
        if legal { Ok(next) } else { Err(InvoiceError::IllegalTransition { from: self, to: next }) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum InvoiceError { UnknownStatus(String), IllegalTransition { from: OrderState, to: OrderState } }
impl std::error::Error for InvoiceError {}
impl std::fmt::Display for InvoiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownStatus(s) => write!(f, "Invalid status '{}', allowed: {}", s, InvoiceStatus::ALLOWED.join(",")),
            Self::IllegalTransition { from, to } => write!(f, "Illegal order transition {:?} -> {:?}", from, to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_address_accepts_cap() {
        let a: Address = serde_json::from_value(json!({ "street": "Via Roma 10", "city": "Firenze", "cap": "50100", "province": "FI", "country": "IT" })).unwrap();
        assert_eq!(a.zip, "50100");
        assert!(a.validate().is_ok());
        let missing_city: Address = serde_json::from_value(json!({ "street": "x", "city": "", "zip": "1", "country": "IT" })).unwrap();
        assert!(missing_city.validate().is_err());
    }

    #[test]
    fn test_status() {
        assert_eq!("paid".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Paid);
        assert!("shipped".parse::<InvoiceStatus>().is_err());
        assert_eq!(InvoiceStatus::default().as_str(), "pending");
    }

    #[test]
    fn test_line_totals() {
        let item = NewInvoiceItem { product_id: 5, quantity: 2, regular_price: dec!(10.00), special_price: None, product_name: "W".into() }.persisted(1, 9);
        assert_eq!(item.line_total(), dec!(20.00));
        let special = InvoiceItem { special_price: Some(dec!(7.5)), ..item };
        assert_eq!(special.line_total(), dec!(15.0));
        assert_eq!(discounted_total(dec!(5), dec!(10)), Decimal::ZERO);
    }

    #[test]
    fn test_order_state_machine() {
        let s = OrderState::Started.advance(OrderState::ItemsValidated).unwrap();
        let s = s.advance(OrderState::StockReserved).unwrap();
        assert!(s.advance(OrderState::Committed).is_err());
        let s = s.advance(OrderState::Persisted).unwrap().advance(OrderState::Committed).unwrap();
        assert!(s.is_terminal());
        assert!(s.advance(OrderState::RolledBack).is_err());
        assert_eq!(OrderState::Started.advance(OrderState::RolledBack), Ok(OrderState::RolledBack));
    }
}

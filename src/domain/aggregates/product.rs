//! Product Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use super::invoice::NewInvoiceItem;
use crate::domain::value_objects::Quantity;

/// Authoritative catalog row as seen inside an order transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub regular_price: Decimal,
    pub special_price: Option<Decimal>,
    pub stock_quantity: i64,
}

impl Product {
    pub fn new(id: i64, name: impl Into<String>, regular_price: Decimal, stock_quantity: i64) -> Self {
        Self { id, name: name.into(), regular_price, special_price: None, stock_quantity }
    }

    pub fn with_special_price(mut self, price: Decimal) -> Self {
        self.special_price = Some(price);
        self
    }

    /// Line snapshot for an order. A special price supplied on the order line
    /// wins over the stored one; either wins over the regular price.
    pub fn snapshot(&self, quantity: Quantity, line_special_price: Option<Decimal>) -> NewInvoiceItem {
        NewInvoiceItem {
            product_id: self.id,
            quantity: quantity.value() as i32,
            regular_price: self.regular_price,
            special_price: line_special_price.or(self.special_price),
            product_name: self.name.clone(),
        }
    }

    pub fn remove_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        let qty = i64::from(qty);
        if qty > self.stock_quantity {
            return Err(ProductError::InsufficientStock { available: self.stock_quantity });
        }
        self.stock_quantity -= qty;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientStock { available: i64 } }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InsufficientStock { available } => write!(f, "Insufficient stock ({available} available)") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_price_precedence() {
        let two = Quantity::new(2).unwrap();
        let plain = Product::new(5, "Widget", dec!(10.00), 10);
        let item = plain.snapshot(two, None);
        assert_eq!((item.regular_price, item.special_price, item.unit_price()), (dec!(10.00), None, dec!(10.00)));
        assert_eq!(item.line_total(), dec!(20.00));
        assert_eq!(plain.snapshot(two, Some(dec!(7.50))).unit_price(), dec!(7.50));

        let discounted = plain.clone().with_special_price(dec!(8.00));
        assert_eq!(discounted.snapshot(two, None).special_price, Some(dec!(8.00)));
        assert_eq!(discounted.snapshot(two, Some(dec!(6.00))).unit_price(), dec!(6.00));
        assert_eq!(discounted.snapshot(two, None).product_name, "Widget");
    }

    #[test]
    fn test_stock() {
        let mut p = Product::new(1, "P", dec!(1), 3);
        p.remove_stock(2).unwrap();
        assert_eq!(p.remove_stock(2), Err(ProductError::InsufficientStock { available: 1 }));
        p.remove_stock(1).unwrap();
        assert_eq!(p.remove_stock(1), Err(ProductError::InsufficientStock { available: 0 }));
        assert_eq!(p.stock_quantity, 0);
    }
}

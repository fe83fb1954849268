//! Storage seam for the order transaction.
//!
//! An [`OrderStore`] hands out [`OrderTx`] handles. Every read and write of one
//! order attempt goes through a single handle. Dropping a handle without
//! calling [`OrderTx::commit`] discards all of its writes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use crate::domain::aggregates::{Coupon, Invoice, InvoiceItem, NewInvoice, NewInvoiceItem, Product};
use crate::domain::value_objects::CouponCode;
use crate::StoreError;

/// How an order refers to its coupon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CouponLookup {
    Id(i64),
    Code(CouponCode),
}

impl std::fmt::Display for CouponLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::Id(id) => write!(f, "{}", id), Self::Code(code) => write!(f, "{}", code) }
    }
}

/// Outcome of a conditional stock decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockUpdate {
    Decremented { remaining: i64 },
    /// Nothing changed; `available` is the stock the write found.
    Insufficient { available: i64 },
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderTx>, StoreError>;

    /// Read-only lookup outside any order transaction.
    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError>;
}

#[async_trait]
pub trait OrderTx: Send {
    /// Reads a product row and holds it against concurrent writers until the transaction ends.
    async fn lock_product(&mut self, id: i64) -> Result<Option<Product>, StoreError>;

    async fn find_coupon(&mut self, lookup: &CouponLookup) -> Result<Option<Coupon>, StoreError>;

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError>;

    async fn insert_item(&mut self, order_id: i64, item: NewInvoiceItem) -> Result<InvoiceItem, StoreError>;

    /// Decrements stock only if at least `qty` units remain.
    async fn decrement_stock(&mut self, product_id: i64, qty: u32) -> Result<StockUpdate, StoreError>;

    /// Flips an active coupon to consumed. Returns `false` if it was no longer active.
    async fn consume_coupon(&mut self, coupon_id: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

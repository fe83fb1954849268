use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use super::{CouponLookup, OrderStore, OrderTx, StockUpdate};
use crate::domain::aggregates::{Coupon, Invoice, InvoiceItem, NewInvoice, NewInvoiceItem, Product, ProductError};
use crate::domain::value_objects::CouponCode;
use crate::StoreError;

#[derive(Clone, Debug, Default)]
struct Tables {
    products: BTreeMap<i64, Product>,
    coupons: BTreeMap<i64, Coupon>,
    invoices: BTreeMap<i64, Invoice>,
    invoice_items: BTreeMap<i64, InvoiceItem>,
    next_invoice_id: i64,
    next_item_id: i64,
}

/// In-process store. A transaction holds the whole dataset exclusively and
/// works on a private copy that replaces the shared one on commit.
#[derive(Clone, Default)]
pub struct MemoryStore { tables: Arc<Mutex<Tables>> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.tables.lock().await.coupons.insert(coupon.id, coupon);
    }

    pub async fn product(&self, id: i64) -> Option<Product> {
        self.tables.lock().await.products.get(&id).cloned()
    }

    pub async fn coupon(&self, id: i64) -> Option<Coupon> {
        self.tables.lock().await.coupons.get(&id).cloned()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.tables.lock().await.invoices.values().cloned().collect()
    }

    pub async fn invoice_items(&self, order_id: i64) -> Vec<InvoiceItem> {
        self.tables.lock().await.invoice_items.values().filter(|i| i.order_id == order_id).cloned().collect()
    }

    pub async fn invoice_item_count(&self) -> usize {
        self.tables.lock().await.invoice_items.len()
    }
}

fn find_by_code<'a>(coupons: &'a BTreeMap<i64, Coupon>, code: &CouponCode) -> Option<&'a Coupon> {
    coupons.values().find(|c| c.code == *code)
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn OrderTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = Tables::clone(&guard);
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        Ok(find_by_code(&self.tables.lock().await.coupons, code).cloned())
    }
}

struct MemoryTx { guard: OwnedMutexGuard<Tables>, working: Tables }

#[async_trait]
impl OrderTx for MemoryTx {
    async fn lock_product(&mut self, id: i64) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn find_coupon(&mut self, lookup: &CouponLookup) -> Result<Option<Coupon>, StoreError> {
        let coupon = match lookup {
            CouponLookup::Id(id) => self.working.coupons.get(id),
            CouponLookup::Code(code) => find_by_code(&self.working.coupons, code),
        };
        Ok(coupon.cloned())
    }

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError> {
        if self.working.invoices.values().any(|i| i.transaction_id == invoice.transaction_id || i.tracking_code == invoice.tracking_code) {
            return Err(StoreError::UniqueViolation(format!("transaction_id {} or tracking_code {} already used", invoice.transaction_id, invoice.tracking_code)));
        }
        self.working.next_invoice_id += 1;
        let invoice = invoice.persisted(self.working.next_invoice_id, Utc::now());
        self.working.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn insert_item(&mut self, order_id: i64, item: NewInvoiceItem) -> Result<InvoiceItem, StoreError> {
        self.working.next_item_id += 1;
        let item = item.persisted(self.working.next_item_id, order_id);
        self.working.invoice_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn decrement_stock(&mut self, product_id: i64, qty: u32) -> Result<StockUpdate, StoreError> {
        let Some(product) = self.working.products.get_mut(&product_id) else { return Ok(StockUpdate::Insufficient { available: 0 }) };
        Ok(match product.remove_stock(qty) {
            Ok(()) => StockUpdate::Decremented { remaining: product.stock_quantity },
            Err(ProductError::InsufficientStock { available }) => StockUpdate::Insufficient { available },
        })
    }

    async fn consume_coupon(&mut self, coupon_id: i64) -> Result<bool, StoreError> {
        Ok(match self.working.coupons.get_mut(&coupon_id) {
            Some(coupon) if coupon.is_valid => { coupon.consume(); true }
            _ => false,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

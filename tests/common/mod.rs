#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use storefront_orders::domain::aggregates::{Coupon, Invoice, InvoiceItem, NewInvoice, NewInvoiceItem, Product};
use storefront_orders::domain::value_objects::CouponCode;
use storefront_orders::notify::{Notifier, NotifyError};
use storefront_orders::orders::{CreateOrderRequest, OrderService};
use storefront_orders::store::{CouponLookup, MemoryStore, OrderStore, OrderTx, StockUpdate};
use storefront_orders::StoreError;
use tokio::sync::mpsc;

/// Records the id of every invoice it is asked to confirm.
pub struct RecordingNotifier { sent: mpsc::UnboundedSender<i64> }

impl RecordingNotifier {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<i64>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { sent }), rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, invoice: &Invoice, _items: &[InvoiceItem]) -> Result<(), NotifyError> {
        self.sent.send(invoice.id).map_err(|e| NotifyError::Publish(e.to_string()))
    }
}

pub struct TestShop {
    pub store: MemoryStore,
    pub orders: OrderService,
    pub confirmations: mpsc::UnboundedReceiver<i64>,
}

impl TestShop {
    pub async fn seeded() -> Self {
        let store = MemoryStore::new();
        seed(&store).await;
        Self::with_backend(store.clone(), Arc::new(store), Duration::from_secs(5))
    }

    /// `backend` serves the transactions; `store` is the dataset behind it.
    pub fn with_backend(store: MemoryStore, backend: Arc<dyn OrderStore>, timeout: Duration) -> Self {
        let (notifier, confirmations) = RecordingNotifier::new();
        let orders = OrderService::new(backend, notifier, timeout);
        Self { store, orders, confirmations }
    }

    pub async fn faulty(faults: Faults, timeout: Duration) -> Self {
        let store = MemoryStore::new();
        seed(&store).await;
        let backend = FaultyStore { inner: store.clone(), faults };
        Self::with_backend(store, Arc::new(backend), timeout)
    }
}

pub async fn seed(store: &MemoryStore) {
    store.insert_product(Product::new(5, "Widget", Decimal::new(1000, 2), 10)).await;
    store.insert_product(Product::new(6, "Gadget", Decimal::new(2500, 2), 3).with_special_price(Decimal::new(2000, 2))).await;
    store.insert_product(Product::new(7, "Last One", Decimal::new(500, 2), 1)).await;
    store.insert_coupon(Coupon {
        id: 1, code: CouponCode::new("SAVE10").unwrap(), is_valid: true,
        starting_date: None, expiration_date: None, discount: Decimal::new(1000, 2),
    }).await;
}

pub fn order_payload(items: Value) -> Value {
    json!({
        "total_price": 0,
        "payment_method": "card",
        "username": "mrossi",
        "user_email": "mario@example.com",
        "billing_address": { "street": "Via Roma 10", "city": "Firenze", "cap": "50100", "province": "FI", "country": "IT" },
        "shipping_address": { "name": "Mario Rossi", "street": "Via Roma 10", "city": "Firenze", "zip": "50100", "country": "IT" },
        "items": items,
    })
}

pub fn order_request(items: Value) -> CreateOrderRequest {
    serde_json::from_value(order_payload(items)).unwrap()
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Faults {
    /// Product whose stock decrement reports nothing left.
    pub fail_decrement_of: Option<i64>,
    pub lose_coupon_race: bool,
    /// Delay between a durable commit and its acknowledgement.
    pub commit_ack_delay: Option<Duration>,
}

/// Store wrapper that injects failures into otherwise healthy transactions.
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub faults: Faults,
}

#[async_trait]
impl OrderStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn OrderTx>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTx { inner, faults: self.faults }))
    }

    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        self.inner.find_coupon_by_code(code).await
    }
}

struct FaultyTx { inner: Box<dyn OrderTx>, faults: Faults }

#[async_trait]
impl OrderTx for FaultyTx {
    async fn lock_product(&mut self, id: i64) -> Result<Option<Product>, StoreError> { self.inner.lock_product(id).await }
    async fn find_coupon(&mut self, lookup: &CouponLookup) -> Result<Option<Coupon>, StoreError> { self.inner.find_coupon(lookup).await }
    async fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError> { self.inner.insert_invoice(invoice).await }
    async fn insert_item(&mut self, order_id: i64, item: NewInvoiceItem) -> Result<InvoiceItem, StoreError> { self.inner.insert_item(order_id, item).await }

    async fn decrement_stock(&mut self, product_id: i64, qty: u32) -> Result<StockUpdate, StoreError> {
        if self.faults.fail_decrement_of == Some(product_id) { return Ok(StockUpdate::Insufficient { available: 0 }); }
        self.inner.decrement_stock(product_id, qty).await
    }

    async fn consume_coupon(&mut self, coupon_id: i64) -> Result<bool, StoreError> {
        if self.faults.lose_coupon_race { return Ok(false); }
        self.inner.consume_coupon(coupon_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let delay = self.faults.commit_ack_delay;
        self.inner.commit().await?;
        if let Some(delay) = delay { tokio::time::sleep(delay).await; }
        Ok(())
    }
    async fn rollback(self: Box<Self>) -> Result<(), StoreError> { self.inner.rollback().await }
}

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use super::{CouponLookup, OrderStore, OrderTx, StockUpdate};
use crate::domain::aggregates::{Coupon, Invoice, InvoiceItem, NewInvoice, NewInvoiceItem, Product};
use crate::domain::value_objects::{decode_flag, CouponCode};
use crate::StoreError;

const COUPON_COLUMNS: &str = "id, code, is_valid, starting_date, expiration_date, discount";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: i64, name: String, regular_price: Decimal, special_price: Option<Decimal>, stock_quantity: i32 }

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product { id: r.id, name: r.name, regular_price: r.regular_price, special_price: r.special_price, stock_quantity: i64::from(r.stock_quantity) }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    id: i64, code: String, is_valid: i16,
    starting_date: Option<NaiveDateTime>, expiration_date: Option<NaiveDateTime>, discount: Decimal,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;
    fn try_from(r: CouponRow) -> Result<Self, Self::Error> {
        let code = CouponCode::new(r.code).map_err(|e| StoreError::CorruptRow(format!("coupon {}: {}", r.id, e)))?;
        Ok(Coupon {
            id: r.id, code, is_valid: decode_flag(&serde_json::Value::from(r.is_valid)),
            starting_date: r.starting_date, expiration_date: r.expiration_date, discount: r.discount,
        })
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

/// Postgres-backed store. Owns the connection pool for the life of the process.
#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool, e.g. one prepared by the test harness.
    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) { self.pool.close().await }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn OrderTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_coupon_by_code(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE UPPER(code) = $1 LIMIT 1"))
            .bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()
    }
}

/// Rolls back on drop if neither committed nor rolled back explicitly.
struct PgTx { tx: Transaction<'static, Postgres> }

#[async_trait]
impl OrderTx for PgTx {
    async fn lock_product(&mut self, id: i64) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, regular_price, special_price, stock_quantity FROM products WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(Product::from))
    }

    async fn find_coupon(&mut self, lookup: &CouponLookup) -> Result<Option<Coupon>, StoreError> {
        let row = match lookup {
            CouponLookup::Id(id) => sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"))
                .bind(*id).fetch_optional(&mut *self.tx).await?,
            CouponLookup::Code(code) => sqlx::query_as::<_, CouponRow>(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE UPPER(code) = $1 LIMIT 1"))
                .bind(code.as_str()).fetch_optional(&mut *self.tx).await?,
        };
        row.map(Coupon::try_from).transpose()
    }

    async fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO invoices (total_price, payment_method, status, username, user_email, billing_address, shipping_address, coupon_id, transaction_id, tracking_code, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) RETURNING id, created_at")
            .bind(invoice.total_price).bind(&invoice.payment_method).bind(invoice.status.as_str())
            .bind(&invoice.username).bind(&invoice.user_email)
            .bind(Json(&invoice.billing_address)).bind(Json(&invoice.shipping_address))
            .bind(invoice.coupon_id).bind(&invoice.transaction_id).bind(&invoice.tracking_code)
            .fetch_one(&mut *self.tx).await.map_err(classify)?;
        Ok(invoice.persisted(id, created_at))
    }

    async fn insert_item(&mut self, order_id: i64, item: NewInvoiceItem) -> Result<InvoiceItem, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO invoice_items (product_id, order_id, quantity, regular_price, special_price, product_name) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id")
            .bind(item.product_id).bind(order_id).bind(item.quantity).bind(item.regular_price).bind(item.special_price).bind(&item.product_name)
            .fetch_one(&mut *self.tx).await?;
        Ok(item.persisted(id, order_id))
    }

    async fn decrement_stock(&mut self, product_id: i64, qty: u32) -> Result<StockUpdate, StoreError> {
        let qty = i32::try_from(qty).unwrap_or(i32::MAX);
        let remaining: Option<i32> = sqlx::query_scalar("UPDATE products SET stock_quantity = stock_quantity - $2 WHERE id = $1 AND stock_quantity >= $2 RETURNING stock_quantity")
            .bind(product_id).bind(qty).fetch_optional(&mut *self.tx).await?;
        if let Some(remaining) = remaining {
            return Ok(StockUpdate::Decremented { remaining: i64::from(remaining) });
        }
        let available: Option<i32> = sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
            .bind(product_id).fetch_optional(&mut *self.tx).await?;
        Ok(StockUpdate::Insufficient { available: available.map(i64::from).unwrap_or(0) })
    }

    async fn consume_coupon(&mut self, coupon_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE coupons SET is_valid = 0 WHERE id = $1 AND is_valid = 1")
            .bind(coupon_id).execute(&mut *self.tx).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

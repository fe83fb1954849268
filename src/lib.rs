//! Storefront Orders
//!
//! Storefront backend whose core is the order-creation transaction.
//!
//! ## Features
//! - Atomic order creation: stock check, price resolution, invoice + line
//!   snapshots, stock decrement and coupon consumption in one transaction
//! - Coupon validation (activation flag, start date, inclusive expiry)
//! - Best-effort order confirmation dispatch after commit
//! - Postgres storage via sqlx, with an in-memory backend for local runs and tests

pub mod catalog;
pub mod config;
pub mod domain;
pub mod http;
pub mod notify;
pub mod orders;
pub mod store;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// One rejected request field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Invalid order data")]
    Validation(Vec<FieldError>),

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Coupon {0} not found")]
    CouponNotFound(String),

    #[error("Insufficient stock for {product_name}: {available} available")]
    InsufficientStock { product_name: String, available: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Order timed out after {0:?}")]
    OrderTimeout(Duration),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for StorefrontError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(detail) => Self::Conflict(detail),
            other => Self::Storage(other),
        }
    }
}

impl StorefrontError {
    /// Whether the caller can fix the request and resubmit.
    pub fn is_caller_correctable(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::OrderTimeout(_))
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("duplicate value: {0}")]
    UniqueViolation(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, StorefrontError>;

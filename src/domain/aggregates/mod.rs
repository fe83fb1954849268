//! Aggregates module
pub mod product;
pub mod coupon;
pub mod invoice;

pub use product::{Product, ProductError};
pub use coupon::{Coupon, CouponReason, CouponVerdict};
pub use invoice::{discounted_total, Address, Invoice, InvoiceError, InvoiceItem, InvoiceStatus, NewInvoice, NewInvoiceItem, OrderState};

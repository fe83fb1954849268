//! Order creation.
//!
//! [`OrderService::create_order`] runs one order attempt as a single storage
//! transaction: resolve catalog rows, check stock, price the lines, apply the
//! coupon, write the invoice and its line snapshots, decrement stock, commit.
//! Any failure before commit rolls everything back. The order timeout bounds
//! the work up to the commit request; once the commit is sent the outcome is
//! awaited in full. The confirmation is sent after commit on a background task.

use chrono::{NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};
use crate::catalog;
use crate::domain::aggregates::{discounted_total, Address, Coupon, CouponVerdict, Invoice, InvoiceItem, InvoiceStatus, NewInvoice, NewInvoiceItem, OrderState, Product};
use crate::domain::value_objects::{CouponCode, Quantity};
use crate::notify::{self, Notifier};
use crate::store::{CouponLookup, OrderStore, OrderTx, StockUpdate};
use crate::{FieldError, Result, StorefrontError};

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(custom = "money")]
    pub total_price: Decimal,
    #[validate(length(min = 1, max = 100))]
    pub payment_method: String,
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(email, length(max = 255))]
    pub user_email: String,
    #[validate]
    pub billing_address: Address,
    #[validate]
    pub shipping_address: Address,
    #[validate(length(min = 1, message = "at least one item is required"))]
    #[validate]
    pub items: Vec<OrderItemRequest>,
    #[validate(range(min = 1))]
    pub coupon_id: Option<i64>,
    #[validate(length(min = 1, max = 50))]
    pub coupon_code: Option<String>,
    #[validate(custom = "known_status")]
    pub status: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub transaction_id: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub tracking_code: Option<String>,
    /// Accepted for the checkout form, never processed or stored.
    pub payment: Option<PaymentDetails>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    #[validate(range(min = 1))]
    pub product_id: i64,
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: i64,
    #[validate(custom = "money")]
    pub special_price: Option<Decimal>,
}

#[derive(Clone, Default, Deserialize)]
pub struct PaymentDetails {
    pub payment_method: Option<String>,
    pub card_number: Option<String>,
    pub cvc: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
}

impl std::fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentDetails")
            .field("payment_method", &self.payment_method)
            .field("card_number", &self.card_number.as_ref().map(|_| "<redacted>"))
            .field("cvc", &self.cvc.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Amounts are stored as NUMERIC(10,2): non-negative, at most two decimals.
fn money(value: &Decimal) -> std::result::Result<(), ValidationError> {
    let (code, message) = if value.is_sign_negative() && !value.is_zero() {
        ("range", "must be zero or greater")
    } else if value.normalize().scale() > 2 {
        ("precision", "must have at most 2 decimal places")
    } else {
        return Ok(());
    };
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    Err(err)
}

fn known_status(value: &str) -> std::result::Result<(), ValidationError> {
    value.parse::<InvoiceStatus>().map(|_| ()).map_err(|e| {
        let mut err = ValidationError::new("status");
        err.message = Some(e.to_string().into());
        err
    })
}

/// What happened to the coupon referenced by an order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CouponOutcome {
    NotRequested,
    Applied { coupon_id: i64, discount: Decimal },
    Rejected { coupon_id: i64, reason: String },
}

/// A committed order.
#[derive(Clone, Debug, Serialize)]
pub struct PlacedOrder {
    pub invoice: Invoice,
    pub invoice_items: Vec<InvoiceItem>,
    pub coupon: CouponOutcome,
}

/// Result of a read-only coupon check.
#[derive(Clone, Debug, Serialize)]
pub struct CouponCheck {
    pub valid: bool,
    pub discount: Decimal,
    pub id: i64,
    pub message: &'static str,
}

// =============================================================================
// Validation
// =============================================================================

struct Line { product_id: i64, quantity: Quantity, special_price: Option<Decimal> }

struct Draft {
    request: CreateOrderRequest,
    lines: Vec<Line>,
    status: InvoiceStatus,
    coupon: Option<CouponLookup>,
}

fn flatten_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };
        match kind {
            ValidationErrorsKind::Field(errs) => out.extend(errs.iter().map(|e| {
                let message = e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| format!("{} is invalid ({})", path, e.code));
                FieldError::new(path.clone(), message)
            })),
            ValidationErrorsKind::Struct(inner) => flatten_errors(&path, inner, out),
            ValidationErrorsKind::List(list) => {
                for (index, inner) in list {
                    flatten_errors(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

impl Draft {
    fn prepare(request: CreateOrderRequest) -> Result<Self> {
        let mut errors = Vec::new();
        if let Err(e) = request.validate() {
            flatten_errors("", &e, &mut errors);
        }

        let lines: Vec<Line> = request.items.iter().filter_map(|item| {
            Quantity::new(item.quantity).map(|quantity| Line { product_id: item.product_id, quantity, special_price: item.special_price })
        }).collect();

        let coupon = match (request.coupon_id, request.coupon_code.as_deref()) {
            (Some(_), Some(_)) => {
                errors.push(FieldError::new("coupon_code", "send either coupon_id or coupon_code, not both"));
                None
            }
            (Some(id), None) => Some(CouponLookup::Id(id)),
            (None, Some(code)) => match CouponCode::new(code) {
                Ok(code) => Some(CouponLookup::Code(code)),
                Err(e) => { errors.push(FieldError::new("coupon_code", e.to_string())); None }
            },
            (None, None) => None,
        };

        let status = request.status.as_deref().and_then(|s| s.parse::<InvoiceStatus>().ok()).unwrap_or_default();

        if !errors.is_empty() {
            errors.sort_by(|a, b| a.field.cmp(&b.field));
            return Err(StorefrontError::Validation(errors));
        }
        Ok(Self { request, lines, status, coupon })
    }
}

fn new_tracking_code() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect::<String>().to_uppercase()
}

fn transition(state: &mut OrderState, next: OrderState) {
    match state.advance(next) {
        Ok(s) => {
            tracing::debug!(from = ?*state, to = ?s, "Order state");
            *state = s;
        }
        Err(e) => tracing::error!("{}", e),
    }
}

// =============================================================================
// Service
// =============================================================================

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    clock: Clock,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { store, notifier, timeout, clock: Arc::new(|| Utc::now().naive_utc()) }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Places an order. Either everything is committed or nothing is.
    #[tracing::instrument(skip(self, request), fields(username = %request.username, items = request.items.len()))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder> {
        let draft = Draft::prepare(request)?;
        let placed = self.run_transaction(draft).await?;
        notify::dispatch(self.notifier.clone(), placed.invoice.clone(), placed.invoice_items.clone());
        Ok(placed)
    }

    /// Validates a coupon by code without consuming it. `None` when no coupon has that code.
    pub async fn check_coupon(&self, code: &str) -> Result<Option<CouponCheck>> {
        let code = CouponCode::new(code).map_err(|e| StorefrontError::Validation(vec![FieldError::new("code", e.to_string())]))?;
        let Some(coupon) = self.store.find_coupon_by_code(&code).await? else { return Ok(None) };
        let verdict = coupon.validate((self.clock)());
        Ok(Some(CouponCheck { valid: verdict.valid, discount: verdict.discount, id: coupon.id, message: verdict.reason.message() }))
    }

    async fn run_transaction(&self, draft: Draft) -> Result<PlacedOrder> {
        let mut state = OrderState::Started;
        let staged = match tokio::time::timeout(self.timeout, self.stage(draft, &mut state)).await {
            Ok(staged) => staged,
            Err(_) => Err(StorefrontError::OrderTimeout(self.timeout)),
        };
        let (tx, placed) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                transition(&mut state, OrderState::RolledBack);
                if e.is_caller_correctable() {
                    tracing::info!(error = %e, "Order rejected and rolled back");
                } else {
                    tracing::warn!(error = %e, "Order rolled back");
                }
                return Err(e);
            }
        };

        // The commit is awaited outside the order timeout.
        if let Err(e) = tx.commit().await {
            transition(&mut state, OrderState::RolledBack);
            tracing::error!(error = %e, "Order commit failed");
            return Err(e.into());
        }
        transition(&mut state, OrderState::Committed);
        tracing::info!(order_id = placed.invoice.id, transaction_id = %placed.invoice.transaction_id, total = %placed.invoice.total_price, "Order committed");
        Ok(placed)
    }

    /// Runs every write of the order and hands back the open transaction.
    /// Dropping the returned future before it completes rolls the transaction back.
    async fn stage(&self, draft: Draft, state: &mut OrderState) -> Result<(Box<dyn OrderTx>, PlacedOrder)> {
        let mut tx = self.store.begin().await?;
        let outcome = self.apply(tx.as_mut(), draft, state).await;
        match outcome {
            Ok(placed) => Ok((tx, placed)),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, tx: &mut dyn OrderTx, draft: Draft, state: &mut OrderState) -> Result<PlacedOrder> {
        let Draft { request, lines, status, coupon } = draft;
        let transaction_id = request.transaction_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let tracking_code = request.tracking_code.clone().unwrap_or_else(new_tracking_code);

        let products = catalog::resolve_many(tx, lines.iter().map(|l| l.product_id).collect::<Vec<_>>()).await?;
        transition(state, OrderState::ItemsValidated);

        check_stock(&lines, &products)?;
        transition(state, OrderState::StockReserved);

        let new_items: Vec<NewInvoiceItem> = lines.iter()
            .map(|line| products[&line.product_id].snapshot(line.quantity, line.special_price))
            .collect();
        let subtotal: Decimal = new_items.iter().map(NewInvoiceItem::line_total).sum();

        let coupon = match coupon {
            Some(lookup) => self.redeem_coupon(tx, &lookup).await?,
            None => CouponOutcome::NotRequested,
        };
        let (coupon_id, discount) = match &coupon {
            CouponOutcome::Applied { coupon_id, discount } => (Some(*coupon_id), *discount),
            _ => (None, Decimal::ZERO),
        };

        let total_price = discounted_total(subtotal, discount);
        if total_price != request.total_price {
            tracing::warn!(client_total = %request.total_price, total = %total_price, "Client total differs from catalog total; using catalog total");
        }

        let invoice = tx.insert_invoice(NewInvoice {
            total_price,
            payment_method: request.payment_method,
            status,
            username: request.username,
            user_email: request.user_email,
            billing_address: request.billing_address,
            shipping_address: request.shipping_address,
            coupon_id,
            transaction_id,
            tracking_code,
        }).await?;

        let mut invoice_items = Vec::with_capacity(new_items.len());
        for item in new_items {
            let (product_id, quantity) = (item.product_id, item.quantity as u32);
            invoice_items.push(tx.insert_item(invoice.id, item).await?);
            if let StockUpdate::Insufficient { available } = tx.decrement_stock(product_id, quantity).await? {
                return Err(StorefrontError::InsufficientStock { product_name: products[&product_id].name.clone(), available });
            }
        }
        transition(state, OrderState::Persisted);

        Ok(PlacedOrder { invoice, invoice_items, coupon })
    }

    /// Validates and consumes the coupon inside the order transaction.
    ///
    /// A coupon that fails validation, or that a concurrent order consumed
    /// first, leaves the order standing without the discount.
    async fn redeem_coupon(&self, tx: &mut dyn OrderTx, lookup: &CouponLookup) -> Result<CouponOutcome> {
        let coupon: Coupon = tx.find_coupon(lookup).await?.ok_or_else(|| StorefrontError::CouponNotFound(lookup.to_string()))?;
        let verdict: CouponVerdict = coupon.validate((self.clock)());
        if !verdict.valid {
            tracing::info!(coupon_id = coupon.id, reason = verdict.reason.message(), "Coupon not applied");
            return Ok(CouponOutcome::Rejected { coupon_id: coupon.id, reason: verdict.reason.message().to_string() });
        }
        if !tx.consume_coupon(coupon.id).await? {
            tracing::info!(coupon_id = coupon.id, "Coupon consumed by a concurrent order; discount not applied");
            return Ok(CouponOutcome::Rejected { coupon_id: coupon.id, reason: "Coupon already used".to_string() });
        }
        Ok(CouponOutcome::Applied { coupon_id: coupon.id, discount: verdict.discount })
    }
}

/// Checks combined quantities per product against the locked stock rows.
fn check_stock(lines: &[Line], products: &HashMap<i64, Product>) -> Result<()> {
    let mut wanted: HashMap<i64, Quantity> = HashMap::new();
    for line in lines {
        wanted.entry(line.product_id).and_modify(|q| *q = q.add(line.quantity)).or_insert(line.quantity);
    }
    let mut ids: Vec<_> = wanted.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let product = &products[&id];
        if !wanted[&id].fits_in(product.stock_quantity) {
            return Err(StorefrontError::InsufficientStock { product_name: product.name.clone(), available: product.stock_quantity });
        }
    }
    Ok(())
}

//! HTTP surface: order creation and coupon lookup.

use axum::{extract::{rejection::JsonRejection, Query, State}, http::StatusCode, response::{IntoResponse, Response}, routing::{get, post}, Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::orders::{CreateOrderRequest, OrderService};
use crate::{FieldError, StorefrontError};

#[derive(Clone)] pub struct AppState { pub orders: OrderService }

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-orders"})) }))
        .route("/api/orders", post(create_order))
        .route("/api/coupons/validate", get(validate_coupon_query).post(validate_coupon_body))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

impl IntoResponse for StorefrontError {
    fn into_response(self) -> Response {
        match self {
            StorefrontError::Validation(errors) => (StatusCode::BAD_REQUEST, Json(json!({"message": "Invalid order data", "errors": errors}))).into_response(),
            StorefrontError::ProductNotFound(_) | StorefrontError::CouponNotFound(_) => (StatusCode::BAD_REQUEST, Json(json!({"message": self.to_string()}))).into_response(),
            StorefrontError::InsufficientStock { available, .. } => (StatusCode::CONFLICT, Json(json!({"message": self.to_string(), "available": available}))).into_response(),
            StorefrontError::Conflict(_) => (StatusCode::CONFLICT, Json(json!({"message": self.to_string()}))).into_response(),
            StorefrontError::OrderTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "Order could not be completed in time, please retry"}))).into_response(),
            StorefrontError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "Internal Server Error"}))).into_response()
            }
        }
    }
}

async fn create_order(State(s): State<AppState>, body: Result<Json<CreateOrderRequest>, JsonRejection>) -> Result<(StatusCode, Json<serde_json::Value>), StorefrontError> {
    let Json(request) = body.map_err(|rejection| StorefrontError::Validation(vec![FieldError::new("body", rejection.body_text())]))?;
    let placed = s.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(json!({
        "message": "Order saved successfully",
        "invoice": placed.invoice,
        "invoice_items": placed.invoice_items,
        "coupon": placed.coupon,
    }))))
}

#[derive(Debug, Default, Deserialize)] pub struct CouponCodeParams { #[serde(default)] pub code: String }

async fn validate_coupon_query(State(s): State<AppState>, Query(p): Query<CouponCodeParams>) -> Response {
    coupon_response(&s, &p.code).await
}

async fn validate_coupon_body(State(s): State<AppState>, body: Option<Json<CouponCodeParams>>) -> Response {
    let code = body.map(|Json(p)| p.code).unwrap_or_default();
    coupon_response(&s, &code).await
}

async fn coupon_response(s: &AppState, code: &str) -> Response {
    match s.orders.check_coupon(code).await {
        Ok(Some(check)) => Json(check).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"valid": false, "discount": Decimal::ZERO, "id": null, "message": "Coupon not found"}))).into_response(),
        Err(StorefrontError::Validation(_)) => (StatusCode::BAD_REQUEST, Json(json!({"message": "Field \"code\" is required"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

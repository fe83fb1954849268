//! Order confirmation dispatch.
//!
//! Confirmations are rendered here and handed to a [`Notifier`]. Delivery
//! happens after the order has committed and never affects its outcome.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use crate::domain::aggregates::{Address, Invoice, InvoiceItem};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to encode confirmation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish confirmation: {0}")]
    Publish(String),
}

/// Rendered confirmation message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Confirmation {
    pub order_id: i64,
    pub transaction_id: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, invoice: &Invoice, items: &[InvoiceItem]) -> Result<(), NotifyError>;
}

/// Publishes rendered confirmations for the mail worker on a NATS subject.
///
/// The client is opened at startup and drained by [`NatsNotifier::close`] at shutdown.
pub struct NatsNotifier { client: async_nats::Client, subject: String }

impl NatsNotifier {
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, NotifyError> {
        let client = async_nats::connect(url).await.map_err(|e| NotifyError::Publish(e.to_string()))?;
        Ok(Self { client, subject: subject.into() })
    }

    pub async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            tracing::warn!("Flushing confirmation publisher failed: {}", e);
        }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn send(&self, invoice: &Invoice, items: &[InvoiceItem]) -> Result<(), NotifyError> {
        let confirmation = render_confirmation(invoice, items);
        let payload = serde_json::to_vec(&confirmation)?;
        self.client.publish(self.subject.clone(), payload.into()).await.map_err(|e| NotifyError::Publish(e.to_string()))?;
        tracing::info!(order_id = invoice.id, subject = %self.subject, "Order confirmation published");
        Ok(())
    }
}

/// Fallback when no message broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, invoice: &Invoice, items: &[InvoiceItem]) -> Result<(), NotifyError> {
        let confirmation = render_confirmation(invoice, items);
        tracing::info!(order_id = invoice.id, to = %confirmation.to, subject = %confirmation.subject, "Order confirmation ready (no broker configured)");
        Ok(())
    }
}

/// Sends the confirmation on a background task. Failures are logged only.
pub fn dispatch(notifier: Arc<dyn Notifier>, invoice: Invoice, items: Vec<InvoiceItem>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&invoice, &items).await {
            tracing::warn!(order_id = invoice.id, error = %e, "Order confirmation not sent");
        }
    })
}

pub fn format_currency(value: Decimal) -> String {
    format!("{:.2} €", value.round_dp(2)).replace('.', ",")
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn address_block(address: &Address) -> String {
    let mut lines = Vec::new();
    if let Some(name) = &address.name { lines.push(format!("<strong>{}</strong>", escape(name))); }
    lines.push(escape(&address.street));
    let province = address.province.as_deref().map(|p| format!(" ({})", escape(p))).unwrap_or_default();
    lines.push(format!("{} {}{}", escape(&address.zip), escape(&address.city), province));
    lines.push(escape(&address.country));
    lines.iter().map(|l| format!("<p style=\"margin:0;\">{}</p>", l)).collect::<Vec<_>>().join("\n")
}

pub fn render_confirmation(invoice: &Invoice, items: &[InvoiceItem]) -> Confirmation {
    let subtotal: Decimal = items.iter().map(InvoiceItem::line_total).sum();
    let discount = (subtotal - invoice.total_price).max(Decimal::ZERO);
    let customer = invoice.shipping_address.name.clone().unwrap_or_else(|| invoice.username.clone());

    let rows: String = items.iter().map(|item| format!(
        "<tr><td>{}</td><td style=\"text-align:center;\">{}</td><td style=\"text-align:right;\">{}</td><td style=\"text-align:right;\">{}</td></tr>\n",
        escape(&item.product_name), item.quantity, format_currency(item.unit_price()), format_currency(item.line_total()),
    )).collect();

    let billing = if invoice.billing_address == invoice.shipping_address {
        "<p style=\"margin:0;\">Uguale all'indirizzo di spedizione</p>".to_string()
    } else {
        address_block(&invoice.billing_address)
    };

    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"it\">\n<head><meta charset=\"UTF-8\" /><title>Conferma ordine #{id}</title></head>\n<body>\n\
         <h1>Grazie per il tuo ordine, {customer}!</h1>\n\
         <p>Ordine #{id} del {date} &middot; Pagamento: {payment} &middot; Tracking: {tracking}</p>\n\
         <table>\n<tr><th>Prodotto</th><th>Qt&agrave;</th><th>Prezzo</th><th>Totale</th></tr>\n{rows}</table>\n\
         <p>Subtotale: {subtotal}</p>\n<p>Sconto: {discount}</p>\n<p><strong>Totale: {total}</strong></p>\n\
         <h2>Spedizione</h2>\n{shipping}\n<h2>Fatturazione</h2>\n{billing}\n</body>\n</html>\n",
        id = invoice.id,
        customer = escape(&customer),
        date = invoice.created_at.format("%d/%m/%Y"),
        payment = escape(&invoice.payment_method),
        tracking = escape(&invoice.tracking_code),
        rows = rows,
        subtotal = format_currency(subtotal),
        discount = format_currency(discount),
        total = format_currency(invoice.total_price),
        shipping = address_block(&invoice.shipping_address),
        billing = billing,
    );

    Confirmation {
        order_id: invoice.id,
        transaction_id: invoice.transaction_id.clone(),
        to: invoice.user_email.clone(),
        subject: format!("Conferma ordine #{}", invoice.id),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::InvoiceStatus;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn address(name: Option<&str>) -> Address {
        Address { name: name.map(String::from), street: "Via Roma 10".into(), city: "Firenze".into(), zip: "50100".into(), province: Some("FI".into()), country: "Italia".into() }
    }

    fn invoice() -> Invoice {
        Invoice {
            id: 1234, total_price: dec!(39.97), payment_method: "card".into(), status: InvoiceStatus::Pending,
            username: "mrossi".into(), user_email: "mario@example.com".into(),
            billing_address: address(Some("Mario Rossi")), shipping_address: address(Some("Mario Rossi")),
            coupon_id: Some(3), transaction_id: "tx-1".into(), tracking_code: "TRK".into(),
            created_at: Utc.with_ymd_and_hms(2025, 11, 19, 10, 0, 0).unwrap(),
        }
    }

    fn items() -> Vec<InvoiceItem> {
        vec![
            InvoiceItem { id: 1, product_id: 1, order_id: 1234, quantity: 2, regular_price: dec!(19.99), special_price: None, product_name: "Prodotto A".into() },
            InvoiceItem { id: 2, product_id: 2, order_id: 1234, quantity: 1, regular_price: dec!(12.00), special_price: Some(dec!(9.99)), product_name: "Prodotto <B>".into() },
        ]
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(dec!(54.97)), "54,97 €");
        assert_eq!(format_currency(dec!(5)), "5,00 €");
    }

    #[test]
    fn test_render_confirmation() {
        let c = render_confirmation(&invoice(), &items());
        assert_eq!(c.to, "mario@example.com");
        assert_eq!(c.subject, "Conferma ordine #1234");
        assert!(c.html.contains("19/11/2025"));
        assert!(c.html.contains("Prodotto &lt;B&gt;"));
        assert!(c.html.contains("Subtotale: 49,97 €"));
        assert!(c.html.contains("Sconto: 10,00 €"));
        assert!(c.html.contains("Uguale all'indirizzo di spedizione"));
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn send(&self, _: &Invoice, _: &[InvoiceItem]) -> Result<(), NotifyError> {
            Err(NotifyError::Publish("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let handle = dispatch(Arc::new(Failing), invoice(), items());
        assert!(handle.await.is_ok());
    }
}

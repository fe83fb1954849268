//! Storefront Orders - order creation and coupon redemption service

use anyhow::Result;
use std::sync::Arc;
use storefront_orders::config::{Config, StoreBackend};
use storefront_orders::http::{router, AppState};
use storefront_orders::notify::{LogNotifier, NatsNotifier, Notifier};
use storefront_orders::orders::OrderService;
use storefront_orders::store::{MemoryStore, OrderStore, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let pg = match config.backend {
        StoreBackend::Postgres => {
            let pg = PgStore::connect(config.database_url.as_deref().unwrap_or_default(), config.max_connections).await?;
            pg.migrate().await?;
            Some(pg)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on exit");
            None
        }
    };
    let store: Arc<dyn OrderStore> = match &pg {
        Some(pg) => Arc::new(pg.clone()),
        None => Arc::new(MemoryStore::new()),
    };

    let nats = match &config.nats_url {
        Some(url) => match NatsNotifier::connect(url, config.notify_subject.clone()).await {
            Ok(n) => Some(Arc::new(n)),
            Err(e) => { tracing::warn!("NATS unavailable, confirmations will only be logged: {}", e); None }
        },
        None => None,
    };
    let notifier: Arc<dyn Notifier> = match &nats {
        Some(n) => n.clone(),
        None => Arc::new(LogNotifier),
    };

    let orders = OrderService::new(store, notifier, config.order_timeout);
    let app = router(AppState { orders });

    tracing::info!("Storefront orders listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app)
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
        .await?;

    if let Some(n) = nats { n.close().await; }
    if let Some(pg) = pg { pg.close().await; }
    tracing::info!("Shut down cleanly");
    Ok(())
}

//! Cashier API Server
//!
//! Receives Braintree webhooks and keeps local subscription rows in step.

use std::net::SocketAddr;
use std::sync::Arc;

use cashier_api::{create_router, AppState, Config};
use cashier_billing::PgBillingStore;
use cashier_shared::{create_pool, run_migrations, SystemClock};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cashier_api=debug,cashier_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Cashier API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(
        environment = %config.braintree.environment,
        merchant_id = %config.braintree.merchant_id,
        "Configuration loaded"
    );

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        run_migrations(&pool).await?;
    } else {
        tracing::info!("Database migrations skipped");
    }

    let store = Arc::new(PgBillingStore::new(pool));
    let state = AppState::new(config.clone(), store, Arc::new(SystemClock));

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

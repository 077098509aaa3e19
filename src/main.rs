//! Invoice Ledger Server - Main Application Entry Point
//!
//! REST API for merchants to issue invoices and for their customers to pay
//! them, in installments, through a payment provider or in cash.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Payments**: provider verify-by-reference API plus signed webhooks
//! - **Authentication**: API key with SHA-256 hashing for merchant routes
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Wire the ledger store, activity emitter and payment gateway
//! 4. Build the HTTP router
//! 5. Start server on configured port

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use invoice_ledger_server::{
    config, db,
    routes::{self, AppState},
    services::{
        activity::{ActivityEmitter, PgActivityEmitter},
        gateway::{HttpGateway, PaymentGateway},
        invoice_service::InvoiceService,
        payment_service::PaymentService,
        verification_service::GatewayVerifier,
    },
    store::{LedgerStore, PgLedgerStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity, "info" by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let http = reqwest::Client::new();

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let emitter: Arc<dyn ActivityEmitter> =
        Arc::new(PgActivityEmitter::new(pool.clone(), http.clone()));
    let gateway_config = config.gateway_config();
    tracing::info!(gateway = ?gateway_config, "Payment gateway configured");
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpGateway::new(http, gateway_config));

    let payments = PaymentService::new(store.clone(), emitter.clone(), config.payment_policy());
    let invoices = InvoiceService::new(
        store.clone(),
        payments.clone(),
        emitter.clone(),
        config.public_base_url.clone(),
    );
    let verifier = GatewayVerifier::new(
        gateway,
        payments,
        store,
        emitter,
        config.verification_settings(),
    );

    let app = routes::build_router(AppState {
        pool,
        invoices,
        verifier,
        gateway_webhook_secret: config.gateway_webhook_secret().into(),
        gateway_amount_divisor: config.gateway_amount_divisor,
    });

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! Router construction and shared application state.

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::DbPool;
use crate::handlers;
use crate::middleware;
use crate::services::invoice_service::InvoiceService;
use crate::services::verification_service::GatewayVerifier;

/// State shared by every handler.
///
/// Handlers extract the part they need (`State<DbPool>`,
/// `State<InvoiceService>`, `State<GatewayVerifier>`) through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub invoices: InvoiceService,
    pub verifier: GatewayVerifier,
    /// Shared secret for provider webhook signatures
    pub gateway_webhook_secret: Arc<str>,
    /// Provider subunits per invoice unit
    pub gateway_amount_divisor: i64,
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for InvoiceService {
    fn from_ref(state: &AppState) -> Self {
        state.invoices.clone()
    }
}

impl FromRef<AppState> for GatewayVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Build the HTTP router.
///
/// # Route Groups
///
/// - Owner routes: API key required (`Authorization: Bearer <key>`)
/// - Public routes: invoice link, checkout, health
/// - Provider webhook: authenticated by signature instead of API key
pub fn build_router(state: AppState) -> Router {
    let owner_routes = Router::new()
        // Invoices
        .route(
            "/api/v1/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/api/v1/invoices/{id}",
            get(handlers::invoices::get_invoice)
                .patch(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route(
            "/api/v1/invoices/{id}/payments",
            post(handlers::invoices::record_payment),
        )
        .route(
            "/api/v1/invoices/{id}/reminders",
            post(handlers::invoices::send_reminder),
        )
        .route(
            "/api/v1/invoices/{id}/reconcile",
            post(handlers::invoices::reconcile_payment),
        )
        // Merchant webhooks
        .route(
            "/api/v1/webhooks",
            post(handlers::webhooks::create_webhook).get(handlers::webhooks::list_webhooks),
        )
        .route(
            "/api/v1/webhooks/{id}",
            delete(handlers::webhooks::delete_webhook),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.pool.clone(),
            middleware::auth::auth_middleware,
        ));

    // Called from the customer's browser
    let public_routes = Router::new()
        .route(
            "/api/v1/public/invoices/{number}",
            get(handlers::public::get_invoice),
        )
        .route(
            "/api/v1/public/invoices/{number}/views",
            post(handlers::public::record_view),
        )
        .route(
            "/api/v1/public/invoices/{number}/confirm",
            post(handlers::public::confirm_invoice),
        )
        .route(
            "/api/v1/public/invoices/{number}/checkout",
            post(handlers::checkout::start_checkout),
        )
        .route(
            "/api/v1/public/checkout/{reference}/verify",
            post(handlers::checkout::verify_checkout),
        )
        .route(
            "/api/v1/public/checkout/{reference}/cancel",
            post(handlers::checkout::cancel_checkout),
        )
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/gateway/webhook",
            post(handlers::gateway_webhook::receive_gateway_event),
        )
        .merge(public_routes)
        .merge(owner_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

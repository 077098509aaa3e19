//! HTTP handlers for merchant webhook endpoints.
//!
//! Merchants register URLs that receive their invoice activity (created,
//! paid, confirmed, reminders, delayed verifications).

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::webhook::{WebhookEndpointRequest, WebhookEndpointResponse};
use crate::services::webhook_service;

/// Register a webhook endpoint.
///
/// # Request Body
///
/// ```json
/// { "url": "https://merchant.example/hooks/invoices" }
/// ```
///
/// # Response
///
/// 201 Created. The signing `secret` is returned here and never again.
///
/// # Security
///
/// HTTPS is required except for localhost.
pub async fn create_webhook(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<WebhookEndpointRequest>,
) -> Result<impl IntoResponse, AppError> {
    let endpoint =
        webhook_service::create_webhook_endpoint(&pool, auth.business_id, request).await?;

    tracing::info!(business_id = %auth.business_id, url = %endpoint.url, "Webhook endpoint registered");

    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// List active endpoints of the business, without secrets.
pub async fn list_webhooks(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<WebhookEndpointResponse>>, AppError> {
    let webhooks = webhook_service::list_webhook_endpoints(&pool, auth.business_id).await?;

    Ok(Json(webhooks))
}

/// Deactivate an endpoint. Delivery history is kept.
pub async fn delete_webhook(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    webhook_service::delete_webhook_endpoint(&pool, auth.business_id, webhook_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

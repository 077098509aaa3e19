//! Webhook service: merchant endpoints, signed delivery, signature checks.
//!
//! Outbound: every activity event on a merchant's invoices is POSTed to the
//! merchant's active endpoints with an HMAC-SHA256 signature.
//! Inbound: the payment provider's webhook is checked with the same scheme.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::activity::ActivityEvent;
use crate::models::webhook::{
    DeliveryRecord, WebhookEndpoint, WebhookEndpointRequest, WebhookEndpointResponse,
    WebhookPayload,
};

type HmacSha256 = Hmac<Sha256>;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Register a webhook endpoint for a business.
///
/// # Process
///
/// 1. Validate the URL
/// 2. Generate a 32-byte signing secret
/// 3. Store the endpoint
/// 4. Return it with the secret, which is never shown again
pub async fn create_webhook_endpoint(
    pool: &DbPool,
    business_id: Uuid,
    request: WebhookEndpointRequest,
) -> Result<WebhookEndpointResponse, AppError> {
    validate_webhook_url(&request.url)?;

    let endpoint = sqlx::query_as::<_, WebhookEndpoint>(
        r#"
        INSERT INTO webhook_endpoints (business_id, url, secret)
        VALUES ($1, $2, $3)
        RETURNING id, business_id, url, secret, is_active, created_at
        "#,
    )
    .bind(business_id)
    .bind(&request.url)
    .bind(generate_secret())
    .fetch_one(pool)
    .await?;

    Ok(WebhookEndpointResponse::registered(endpoint))
}

async fn active_endpoints(pool: &DbPool, business_id: Uuid) -> Result<Vec<WebhookEndpoint>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEndpoint>(
        r#"
        SELECT id, business_id, url, secret, is_active, created_at
        FROM webhook_endpoints
        WHERE business_id = $1 AND is_active = true
        ORDER BY created_at DESC
        "#,
    )
    .bind(business_id)
    .fetch_all(pool)
    .await
}

/// Active endpoints of a business, without secrets.
pub async fn list_webhook_endpoints(
    pool: &DbPool,
    business_id: Uuid,
) -> Result<Vec<WebhookEndpointResponse>, AppError> {
    let endpoints = active_endpoints(pool, business_id).await?;

    Ok(endpoints.into_iter().map(Into::into).collect())
}

/// Deactivate an endpoint; its delivery history stays.
pub async fn delete_webhook_endpoint(
    pool: &DbPool,
    business_id: Uuid,
    endpoint_id: Uuid,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE webhook_endpoints SET is_active = false WHERE id = $1 AND business_id = $2 AND is_active = true",
    )
    .bind(endpoint_id)
    .bind(business_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::WebhookNotFound);
    }

    Ok(())
}

/// Deliver an activity event to every active endpoint of its business.
///
/// A failing endpoint is logged and recorded; it never stops delivery to
/// the others and is never returned to the caller.
pub async fn notify_activity_webhooks(
    pool: &DbPool,
    client: &reqwest::Client,
    event: &ActivityEvent,
) -> Result<(), AppError> {
    for endpoint in active_endpoints(pool, event.business_id).await? {
        let record = deliver(client, &endpoint, event).await?;
        if record.response_status.is_none_or(|status| !(200..300).contains(&status)) {
            tracing::warn!(
                url = %endpoint.url,
                status = ?record.response_status,
                event_type = event.kind.as_str(),
                "Webhook delivery failed"
            );
        }
        if let Err(e) = record_delivery(pool, &record).await {
            tracing::error!(url = %endpoint.url, error = %e, "Failed to record webhook delivery");
        }
    }

    Ok(())
}

/// POST one signed event.
///
/// # Headers Sent
///
/// - `X-Webhook-Signature: sha256=<hex>` over the exact body
/// - `X-Webhook-Event-Id`, `X-Webhook-Event-Type`
async fn deliver(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    event: &ActivityEvent,
) -> Result<DeliveryRecord, AppError> {
    let event_id = Uuid::new_v4();
    let payload = serde_json::to_value(WebhookPayload::new(event_id, event))
        .map_err(|e| AppError::InvalidRequest(format!("Failed to encode payload: {}", e)))?;
    let body = payload.to_string();

    let response = client
        .post(&endpoint.url)
        .timeout(DELIVERY_TIMEOUT)
        .header("Content-Type", "application/json")
        .header("X-Webhook-Signature", generate_signature(&endpoint.secret, body.as_bytes()))
        .header("X-Webhook-Event-Id", event_id.to_string())
        .header("X-Webhook-Event-Type", event.kind.as_str())
        .body(body)
        .send()
        .await;

    let (response_status, response_body) = match response {
        Ok(resp) => (Some(i32::from(resp.status().as_u16())), resp.text().await.ok()),
        Err(e) => (None, Some(format!("Request failed: {}", e))),
    };

    Ok(DeliveryRecord {
        id: event_id,
        endpoint_id: endpoint.id,
        activity_id: event.id,
        payload,
        response_status,
        response_body,
    })
}

async fn record_delivery(pool: &DbPool, record: &DeliveryRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO webhook_events (id, webhook_endpoint_id, activity_id, payload, response_status, response_body)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record.id)
    .bind(record.endpoint_id)
    .bind(record.activity_id)
    .bind(&record.payload)
    .bind(record.response_status)
    .bind(&record.response_body)
    .execute(pool)
    .await?;

    Ok(())
}

/// Generate an HMAC-SHA256 signature in the form `sha256=<hex_encoded_hmac>`.
pub fn generate_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(payload);
    let result = mac.finalize();
    format!("sha256={}", hex::encode(result.into_bytes()))
}

/// Check a `sha256=<hex>` signature header against the payload.
///
/// Comparison is constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn generate_secret() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

const MAX_URL_LEN: usize = 2048;

/// Endpoints must be HTTPS; plain HTTP is accepted only for loopback hosts
/// so merchants can test against a local receiver.
fn validate_webhook_url(raw: &str) -> Result<(), AppError> {
    if raw.len() > MAX_URL_LEN {
        return Err(AppError::InvalidWebhookUrl(format!(
            "URL is longer than {MAX_URL_LEN} characters"
        )));
    }

    let url = url::Url::parse(raw)
        .map_err(|e| AppError::InvalidWebhookUrl(format!("cannot parse URL: {e}")))?;
    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "0.0.0.0"));

    match (url.scheme(), loopback) {
        ("https", _) | ("http", true) => Ok(()),
        ("http", false) => Err(AppError::InvalidWebhookUrl(
            "plain HTTP is only accepted for localhost receivers".to_string(),
        )),
        (scheme, _) => Err(AppError::InvalidWebhookUrl(format!(
            "unsupported scheme {scheme}, use https"
        ))),
    }
}

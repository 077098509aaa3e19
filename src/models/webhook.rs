//! Merchant webhook endpoints and delivery records.
//!
//! Merchants register a URL and receive every activity event on their
//! invoices as a signed JSON POST. The signing secret is generated on
//! registration and shown exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::activity::ActivityEvent;

/// Row of `webhook_endpoints`. The secret is kept in plaintext because it
/// keys the HMAC.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub business_id: Uuid,
    pub url: String,
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// ```json
/// { "url": "https://merchant.example/hooks/invoices" }
/// ```
#[derive(Debug, Deserialize)]
pub struct WebhookEndpointRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookEndpointResponse {
    pub id: Uuid,
    pub url: String,
    /// Present only in the registration response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpointResponse {
    /// Response for a fresh registration, secret included.
    pub fn registered(endpoint: WebhookEndpoint) -> Self {
        let secret = endpoint.secret.clone();
        Self {
            secret: Some(secret),
            ..Self::from(endpoint)
        }
    }
}

impl From<WebhookEndpoint> for WebhookEndpointResponse {
    fn from(endpoint: WebhookEndpoint) -> Self {
        Self {
            id: endpoint.id,
            url: endpoint.url,
            secret: None,
            is_active: endpoint.is_active,
            created_at: endpoint.created_at,
        }
    }
}

/// One delivery attempt, stored in `webhook_events`.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub activity_id: Uuid,
    pub payload: serde_json::Value,
    /// `None` when the request never got an HTTP answer
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
}

/// JSON body POSTed to merchant endpoints.
///
/// ```json
/// {
///   "event_type": "payment.recorded",
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "created_at": "2026-10-19T10:30:00Z",
///   "data": {
///     "invoice_id": "6f1c2d1e-0a43-4a8e-9d55-0d7c6a1d2b10",
///     "invoice_number": "INV-7K2Q9XDA",
///     "metadata": { "amount": 20000, "balance": 30000, "status": "partial" }
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data: WebhookData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookData {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub metadata: serde_json::Value,
}

impl WebhookPayload {
    pub fn new(event_id: Uuid, event: &ActivityEvent) -> Self {
        Self {
            event_type: event.kind.as_str().to_string(),
            event_id,
            created_at: event.occurred_at,
            data: WebhookData {
                invoice_id: event.invoice_id,
                invoice_number: event.invoice_number.clone(),
                metadata: event.metadata.clone(),
            },
        }
    }
}

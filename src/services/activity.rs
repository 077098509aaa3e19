//! Activity emitters.
//!
//! Emission is fire-and-forget: `emit` never blocks and never fails, so a
//! broken audit sink cannot roll back or delay a ledger write.

use std::sync::{Arc, Mutex};

use crate::db::DbPool;
use crate::models::activity::{ActivityEvent, ActivityKind};
use crate::services::webhook_service;

pub trait ActivityEmitter: Send + Sync {
    fn emit(&self, event: ActivityEvent);
}

/// Keeps events in memory; used by tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryEmitter {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, kind: ActivityKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl ActivityEmitter for MemoryEmitter {
    fn emit(&self, event: ActivityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Persists events to `activity_log` and forwards them to the merchant's
/// registered webhooks on a background task.
#[derive(Clone)]
pub struct PgActivityEmitter {
    pool: DbPool,
    client: reqwest::Client,
}

impl PgActivityEmitter {
    pub fn new(pool: DbPool, client: reqwest::Client) -> Self {
        Self { pool, client }
    }
}

impl ActivityEmitter for PgActivityEmitter {
    fn emit(&self, event: ActivityEvent) {
        let pool = self.pool.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            if let Err(e) = record_activity(&pool, &event).await {
                tracing::warn!(
                    event_type = event.kind.as_str(),
                    invoice_id = %event.invoice_id,
                    error = %e,
                    "Failed to record activity"
                );
            }
            if let Err(e) = webhook_service::notify_activity_webhooks(&pool, &client, &event).await
            {
                tracing::warn!(
                    event_type = event.kind.as_str(),
                    business_id = %event.business_id,
                    error = %e,
                    "Failed to dispatch activity webhooks"
                );
            }
        });
    }
}

async fn record_activity(pool: &DbPool, event: &ActivityEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO activity_log (id, business_id, invoice_id, invoice_number, event_type, metadata, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.id)
    .bind(event.business_id)
    .bind(event.invoice_id)
    .bind(&event.invoice_number)
    .bind(event.kind.as_str())
    .bind(&event.metadata)
    .bind(event.occurred_at)
    .execute(pool)
    .await?;

    Ok(())
}

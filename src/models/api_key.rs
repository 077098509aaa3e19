//! API key model for merchant authentication.
//!
//! Each active API key identifies one business. The key's `id` is the
//! `business_id` that owns invoices. Keys are stored as SHA-256 hashes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: business identifier (UUID)
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `business_name`: display name of the business
/// - `created_at`: when the key was created
/// - `is_active`: whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Business identifier; invoices reference it as `business_id`
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    pub key_hash: String,

    pub business_name: String,

    pub created_at: DateTime<Utc>,

    /// Inactive keys are rejected during authentication.
    pub is_active: bool,
}

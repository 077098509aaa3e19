//! API key authentication middleware.
//!
//! Every owner route runs through this middleware, which:
//! 1. Extracts the API key from the Authorization header
//! 2. Hashes it and looks it up among active keys
//! 3. Injects the owning business into the request
//! 4. Rejects unknown keys with HTTP 401

use crate::{db::DbPool, error::AppError, models::api_key::ApiKey};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The business behind an authenticated request.
///
/// Handlers extract it with `Extension<AuthContext>` and scope every invoice
/// query to `business_id`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub business_id: Uuid,
    pub business_name: String,
}

/// Hex-encoded SHA-256 of a raw API key, as stored in `api_keys.key_hash`.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Headers
///
/// ```text
/// Authorization: Bearer abc123xyz
/// ```
///
/// # Returns
///
/// - the next handler's response when the key is active
/// - `AppError::InvalidApiKey` (401) when the header is missing or the key
///   is unknown or inactive
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    let key_hash = hash_api_key(api_key.trim());

    let api_key_record = sqlx::query_as::<_, ApiKey>(
        "SELECT id, key_hash, business_name, created_at, is_active
         FROM api_keys
         WHERE key_hash = $1 AND is_active = true",
    )
    .bind(&key_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    tracing::debug!(
        business_id = %api_key_record.id,
        business = %api_key_record.business_name,
        "Authenticated request"
    );

    request.extensions_mut().insert(AuthContext {
        business_id: api_key_record.id,
        business_name: api_key_record.business_name,
    });

    Ok(next.run(request).await)
}

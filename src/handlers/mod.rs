//! HTTP request handlers.
//!
//! Each handler extracts request data, calls one service operation and maps
//! the result to a JSON response. Errors become [`AppError`](crate::error::AppError)
//! responses.

/// Customer checkout through the payment provider
pub mod checkout;
/// Payment provider webhook intake
pub mod gateway_webhook;
pub mod health;
/// Merchant invoice management
pub mod invoices;
/// Public invoice link
pub mod public;
/// Merchant webhook endpoint management
pub mod webhooks;

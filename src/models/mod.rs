//! Data models for the invoice ledger.
//!
//! This module contains the ledger entities, gateway checkout types and the
//! records that map to database tables.

/// Activity events emitted after ledger changes
pub mod activity;
/// API key authentication model
pub mod api_key;
/// Gateway checkout attempts and verification outcomes
pub mod checkout;
/// Invoice entity, payments and lifecycle rules
pub mod invoice;
/// Merchant webhook endpoints and delivery records
pub mod webhook;

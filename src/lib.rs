//! Invoice payment reconciliation server.
//!
//! Merchants issue invoices and share a public link; customers pay in one or
//! more installments through a payment provider while merchants record cash
//! payments. Every payment lands in an append-only ledger on the invoice,
//! applied exactly once per reference, and the invoice status is always the
//! projection of that ledger.
//!
//! # Layout
//!
//! - [`models`]: invoice ledger, checkout attempts, activity events
//! - [`store`]: [`LedgerStore`](store::LedgerStore) with PostgreSQL and in-memory backends
//! - [`services`]: payment application, gateway verification, invoice operations
//! - [`handlers`] / [`routes`]: the axum HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

//! Business logic services.
//!
//! Services contain the ledger rules separated from HTTP handlers. They talk
//! to storage through [`LedgerStore`](crate::store::LedgerStore) and report
//! what happened through an [`ActivityEmitter`](activity::ActivityEmitter).

pub mod activity;
pub mod gateway;
pub mod invoice_service;
pub mod payment_service;
pub mod verification_service;
pub mod webhook_service;

//! HTTP middleware.
//!
//! Owner routes are wrapped in [`auth::auth_middleware`], which rejects
//! requests without an active API key before any handler runs.

pub mod auth;

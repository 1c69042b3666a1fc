//! Online tuition payments: hosted-checkout intents, signed gateway
//! callbacks and an idempotent payer ledger.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

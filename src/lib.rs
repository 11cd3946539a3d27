//! Mystic Reading API Library
//!
//! Backend of a paid tarot reading funnel: lead capture, payment webhook
//! reconciliation, and the reading unlocked once payment clears, plus the
//! client-side payment-wait and recovery flow.
//!
//! # Modules
//!
//! - `api`: HTTP surface (router, handlers, webhook endpoint).
//! - `core`: Reconciliation, add-on inference, reading and chart generation.
//! - `integrations`: External services (card draw, text providers, email).
//! - `addons`: Add-on identifiers and product-name inference.
//! - `app`: Router construction.
//! - `circuit_breaker`: Per-provider circuit breaker.
//! - `client`: Payment polling and recovery state machine.
//! - `config`: Configuration management.
//! - `db`: Database connection and migrations.
//! - `db_storage`: Postgres lead store.
//! - `email_client`: Access email delivery.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `horoscope`: Natal chart and astral analysis for the horoscope add-on.
//! - `keyed_queue`: Per-key FIFO job execution.
//! - `lead_store`: Lead store trait and in-memory store.
//! - `models`: Core data models.
//! - `reading`: Reading chain and paid reading service.
//! - `reconcile`: Webhook-to-lead reconciliation.
//! - `services`: Card draw and text provider clients.
//! - `webhook_handler`: Payment webhook handler.
//! - `webhook_models`: Payment webhook payload accessors.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod addons;
pub mod app;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod email_client;
pub mod errors;
pub mod handlers;
pub mod horoscope;
pub mod keyed_queue;
pub mod lead_store;
pub mod models;
pub mod reading;
pub mod reconcile;
pub mod services;
pub mod webhook_handler;
pub mod webhook_models;

//! # Calendar Sync
//!
//! Links external calendar accounts (Google, Microsoft) to users, stores their
//! OAuth grants encrypted, and serves a unified, cached view of upcoming events.

pub mod auth;
pub mod calendar;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;

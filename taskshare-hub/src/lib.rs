//! `TaskShare` hub library.
//!
//! Exposes the enforcement layer, the fan-out hub, the storage contract and
//! the WebSocket server for use in tests and embedding.

pub mod auth;
pub mod config;
pub mod hub;
pub mod server;
pub mod service;
pub mod store;

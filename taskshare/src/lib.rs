//! `TaskShare` client library.
//!
//! Keeps a local cache of shared lists and tasks in step with the hub and
//! derives, for the signed-in user, which entities are accessible and at
//! which level.

pub mod cache;
pub mod client;
pub mod config;
pub mod projector;
pub mod session;

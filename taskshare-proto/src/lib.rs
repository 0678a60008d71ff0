//! Shared data model, permission resolution, and wire protocol for `TaskShare`.

pub mod access;
pub mod ids;
pub mod model;
pub mod wire;

//! HTTP handlers.

pub mod gate;
pub mod health;

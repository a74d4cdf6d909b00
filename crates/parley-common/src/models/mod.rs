//! Data models shared across Parley crates.

pub mod message;
pub mod user;

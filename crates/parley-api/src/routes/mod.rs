//! API route modules.

pub mod auth;
pub mod health;
pub mod messages;
pub mod users;

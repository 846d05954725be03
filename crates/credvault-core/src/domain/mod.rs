//! Domain layer
//!
//! Contains the core business logic and domain models.

pub mod audit;
pub mod credentials;
pub mod login;
pub mod security;

//! Audit domain module
//!
//! Two append-only logs: general events and request/response exchanges with
//! external APIs. Exchanges of one login or logout flow share a login
//! sequence id.

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{EventLogEntry, ExchangeRecord, LogLevel, RequestResponseLog};
pub use repository::AuditRepository;
pub use service::{AuditService, LOGIN_SEQ_ID_LEN};

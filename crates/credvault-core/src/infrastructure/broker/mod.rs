//! Broker API client

pub mod http_session_issuer;

pub use http_session_issuer::HttpSessionIssuer;

//! Broker login domain
//!
//! Password login, OTP exchange for session tokens, and logout against the
//! broker, with every call written to the exchange log.

pub mod issuer;
pub mod service;

pub use issuer::{FixedOtp, OtpSource, SessionIssuer, ensure_success, session_checksum};
pub use service::{LoginOutcome, LogoutOutcome, SESSION_ENV_KEYS, SessionService};

//! Credentials domain module
//!
//! One record per user: the broker password sealed by the envelope cipher,
//! the id of the key it was sealed under, the API key, and the broker
//! session state.

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{
    ApiKeyType, CredentialRecord, CredentialSummary, CredentialUpdate, NewCredential,
    SessionFields, SessionUpdate, UserCredentials,
};
pub use repository::CredentialRepository;
pub use service::{CredentialService, RewrapOutcome, RewrapReport};

//! Security domain module
//!
//! Versioned symmetric keys and the machinery that uses them.
//!
//! - **Entities**: `KeyMaterial`, `KeyRecord`, `Ciphertext`, `SecureString`
//! - **Cipher**: `EnvelopeCipher` (AES-256-GCM, nonce prepended)
//! - **Registry**: `KeyRegistry` trait, append-only
//! - **Resolver**: `KeyResolver` picks the key new encryptions use
//! - **Fallback**: `DecryptionEngine` recovers plaintext despite stale key ids
//! - **Service**: `KeyService` ties them together
//!
//! Key material and plaintext are zeroized on drop and redacted in `Debug`.

pub mod cipher;
pub mod entity;
pub mod fallback;
pub mod repository;
pub mod resolver;
pub mod service;

pub use cipher::{CipherError, EnvelopeCipher, decrypt, encrypt};
pub use entity::{Ciphertext, KEY_SIZE, KeyInfo, KeyMaterial, KeyRecord, SecureString};
pub use fallback::{Decrypted, DecryptionEngine};
pub use repository::KeyRegistry;
pub use resolver::{ActiveKey, KeyResolver, KeySource};
pub use service::{ActiveKeyInfo, GeneratedKey, KeyService, Sealed};

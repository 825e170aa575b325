//! # Credential Cryptography
//!
//! AES-256-GCM encryption of stored passwords and generation of random
//! usernames and passwords.

pub mod credentials;
pub mod encryption;

pub use credentials::{
    is_simple_identifier, is_valid_extension_name, random_password, random_username,
};
pub use encryption::{decrypt, encrypt, EncryptedSecret, EncryptionKey, KEY_SIZE, NONCE_SIZE};

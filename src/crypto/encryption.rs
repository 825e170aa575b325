//! Password encryption using AES-256-GCM
//!
//! Registry passwords are encrypted at rest with a 256-bit key supplied by the
//! operator as 64 hex characters. Every encryption draws a fresh 96-bit nonce
//! which is stored alongside the ciphertext. Decryption authenticates the
//! ciphertext, so a wrong key or a tampered row fails with a crypto error
//! instead of yielding garbage.

use crate::errors::{BrokerError, Result};
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

/// Size of AES-256-GCM key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AES-256-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// A validated 256-bit encryption key
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
}

impl EncryptionKey {
    /// Build a key from raw bytes, which must be exactly 32 bytes long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(BrokerError::crypto(format!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Parse a hex-encoded key (64 hex characters)
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(hex::decode(encoded.trim()).map_err(|e| {
            BrokerError::crypto(format!("Encryption key is not valid hex: {}", e))
        })?);
        Self::from_bytes(&decoded)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Ciphertext (with appended tag) and the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Generate a fresh random nonce
pub fn random_nonce() -> Result<[u8; NONCE_SIZE]> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    SystemRandom::new().fill(&mut nonce_bytes).map_err(|_| {
        error!("Failed to generate random nonce");
        BrokerError::crypto("Failed to generate random nonce for encryption")
    })?;
    Ok(nonce_bytes)
}

/// Encrypt plaintext under `key` with a freshly generated nonce
#[instrument(skip(plaintext, key), fields(plaintext_len = plaintext.len()))]
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<EncryptedSecret> {
    let nonce = random_nonce()?;
    let ciphertext = encrypt_with_nonce(plaintext, key, &nonce)?;
    Ok(EncryptedSecret { ciphertext, nonce: nonce.to_vec() })
}

/// Encrypt plaintext under `key` with a caller-provided nonce
///
/// The nonce must never be reused with the same key.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &EncryptionKey,
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| {
        error!("Failed to create encryption key");
        BrokerError::crypto("Failed to create encryption key")
    })?;

    let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(*nonce));

    let mut ciphertext = plaintext.to_vec();
    ciphertext.reserve(TAG_SIZE);

    sealing_key.seal_in_place_append_tag(Aad::empty(), &mut ciphertext).map_err(|_| {
        error!("Encryption failed");
        BrokerError::crypto("Failed to encrypt password")
    })?;

    debug!(ciphertext_len = ciphertext.len(), "Encrypted password");

    Ok(ciphertext)
}

/// Decrypt and authenticate ciphertext
///
/// The ciphertext must include the authentication tag appended.
/// The nonce must be the same 12-byte value used during encryption.
#[instrument(skip(ciphertext, key, nonce), fields(ciphertext_len = ciphertext.len()))]
pub fn decrypt(ciphertext: &[u8], key: &EncryptionKey, nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(BrokerError::crypto(format!(
            "Invalid nonce length: expected {} bytes, got {} bytes",
            NONCE_SIZE,
            nonce.len()
        )));
    }

    if ciphertext.len() < TAG_SIZE {
        return Err(BrokerError::crypto("Ciphertext too short (missing authentication tag)"));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce);

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes()).map_err(|_| {
        error!("Failed to create decryption key");
        BrokerError::crypto("Failed to create decryption key")
    })?;

    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut buffer = ciphertext.to_vec();
    let decrypted = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
        error!("Decryption failed - possible tampering or wrong key");
        BrokerError::crypto("message authentication failed")
    })?;

    Ok(decrypted.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[0x42u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let sealed = encrypt(b"correct horse battery staple", &key).unwrap();

        assert_eq!(sealed.nonce.len(), NONCE_SIZE);
        assert_eq!(sealed.ciphertext.len(), 28 + TAG_SIZE);

        let decrypted = decrypt(&sealed.ciphertext, &key, &sealed.nonce).unwrap();
        assert_eq!(decrypted, b"correct horse battery staple");
    }

    #[test]
    fn test_different_nonces_produce_different_ciphertext() {
        let key = test_key();
        let first = encrypt(b"same-plaintext", &key).unwrap();
        let second = encrypt(b"same-plaintext", &key).unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let sealed = encrypt(b"password", &test_key()).unwrap();
        let other = EncryptionKey::from_bytes(&[0x24u8; KEY_SIZE]).unwrap();

        let err = decrypt(&sealed.ciphertext, &other, &sealed.nonce).unwrap_err();
        assert!(matches!(err, BrokerError::Crypto { .. }));
        assert!(err.to_string().contains("message authentication failed"));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt(b"sensitive-data", &key).unwrap();
        sealed.ciphertext[0] ^= 0xFF;

        assert!(decrypt(&sealed.ciphertext, &key, &sealed.nonce).is_err());
    }

    #[test]
    fn test_invalid_nonce_length_fails() {
        let key = test_key();
        let sealed = encrypt(b"test", &key).unwrap();

        assert!(decrypt(&sealed.ciphertext, &key, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 33]).is_err());
        assert!(EncryptionKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_key_from_hex() {
        let key = EncryptionKey::from_hex(
            "0001020304050607080910111213141516171819202122232425262728293031",
        )
        .unwrap();
        assert_eq!(key.as_bytes()[1], 0x01);
        assert_eq!(key.as_bytes()[31], 0x31);

        assert!(EncryptionKey::from_hex("not-hex").is_err());
        assert!(EncryptionKey::from_hex("0001").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", test_key());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("66"));
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(
            plaintext in proptest::collection::vec(any::<u8>(), 0..256),
            key_bytes in proptest::array::uniform32(any::<u8>()),
            nonce in proptest::array::uniform12(any::<u8>()),
        ) {
            let key = EncryptionKey::from_bytes(&key_bytes).unwrap();
            let ciphertext = encrypt_with_nonce(&plaintext, &key, &nonce).unwrap();
            let decrypted = decrypt(&ciphertext, &key, &nonce).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}

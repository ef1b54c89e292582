/// Authenticated symmetric encryption for secrets at rest
///
/// Variable values flagged secret, credential tokens and database passwords
/// are persisted as sealed strings produced here. Layout of the sealed blob,
/// base64-encoded for text columns:
///
///   [ key_id (1 byte) | nonce (12 bytes) | ciphertext+tag ]
///
/// The key id lets a future rotation pass detect blobs sealed under an older
/// key. Any decode, key-id or tag failure collapses into SECRET_INTEGRITY;
/// plaintext never reaches the logs.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Current key identifier; bumped by a coordinated re-encryption pass
const KEY_ID: u8 = 1;

/// AES-GCM nonce width in bytes
const NONCE_LEN: usize = 12;

/// Process-wide secret box over a 256-bit master key
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
    key_id: u8,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must not leak through Debug formatting
        f.debug_struct("SecretBox").field("key_id", &self.key_id).finish()
    }
}

impl SecretBox {
    /// Build the box from configured key material (>= 32 bytes, enforced by
    /// config loading). The material is digested to the fixed AES-256 width.
    pub fn new(key_material: &str) -> Self {
        let digest = Sha256::digest(key_material.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self { cipher: Aes256Gcm::new(key), key_id: KEY_ID }
    }

    /// Seal plaintext bytes into a base64 blob with a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::SecretIntegrity)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(self.key_id);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Open a sealed blob back into plaintext bytes
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let blob = BASE64.decode(sealed).map_err(|_| Error::SecretIntegrity)?;
        if blob.len() < 1 + NONCE_LEN {
            return Err(Error::SecretIntegrity);
        }
        if blob[0] != self.key_id {
            // Sealed under a different key generation; rotation is a
            // restart-with-re-encryption operation, not an online path.
            return Err(Error::SecretIntegrity);
        }
        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &blob[1 + NONCE_LEN..])
            .map_err(|_| Error::SecretIntegrity)
    }

    /// Seal a UTF-8 string value
    pub fn seal_str(&self, plaintext: &str) -> Result<String> {
        self.seal(plaintext.as_bytes())
    }

    /// Open a sealed blob expected to hold UTF-8
    pub fn open_str(&self, sealed: &str) -> Result<String> {
        let bytes = self.open(sealed)?;
        String::from_utf8(bytes).map_err(|_| Error::SecretIntegrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box() -> SecretBox {
        SecretBox::new("test-encryption-key-0123456789abcdef")
    }

    #[test]
    fn round_trip_arbitrary_bytes() {
        let sb = test_box();
        for payload in [&b""[..], b"hunter2", &[0u8, 255, 10, 13, 0, 7][..]] {
            let sealed = sb.seal(payload).unwrap();
            assert_eq!(sb.open(&sealed).unwrap(), payload);
        }
    }

    #[test]
    fn seal_is_nondeterministic() {
        let sb = test_box();
        let a = sb.seal(b"same plaintext").unwrap();
        let b = sb.seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ciphertext_does_not_contain_plaintext() {
        let sb = test_box();
        let sealed = sb.seal_str("hunter2").unwrap();
        assert!(!sealed.contains("hunter2"));
    }

    #[test]
    fn tampering_any_byte_fails_integrity() {
        let sb = test_box();
        let sealed = sb.seal_str("hunter2").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = BASE64.encode(&raw);
            match sb.open(&tampered) {
                Err(Error::SecretIntegrity) => {}
                other => panic!("byte {} tamper not caught: {:?}", i, other),
            }
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn wrong_key_fails_integrity() {
        let sealed = test_box().seal_str("hunter2").unwrap();
        let other = SecretBox::new("another-encryption-key-fedcba9876543210");
        assert!(matches!(other.open(&sealed), Err(Error::SecretIntegrity)));
    }

    #[test]
    fn garbage_input_fails_integrity() {
        let sb = test_box();
        assert!(matches!(sb.open("not base64 !!!"), Err(Error::SecretIntegrity)));
        assert!(matches!(sb.open("QUJD"), Err(Error::SecretIntegrity)));
    }
}

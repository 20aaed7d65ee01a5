use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

const HKDF_SALT: &[u8] = b"formrelay-v1";
const HKDF_INFO: &[u8] = b"oauth-token-aes256gcm";
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for secrets at rest, keyed from the configured
/// encryption key through HKDF-SHA256.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm)),
        }
    }

    /// Nonce followed by ciphertext.
    pub fn seal(&self, plaintext: &str) -> Result<Vec<u8>, String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| format!("Encryption failed: {e}"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<String, String> {
        if sealed.len() < NONCE_LEN {
            return Err("Ciphertext too short".to_string());
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| format!("Decryption failed: {e}"))?;

        String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8: {e}"))
    }
}

pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, String> {
    SecretCipher::new(key).seal(plaintext)
}

pub fn decrypt(sealed: &[u8], key: &str) -> Result<String, String> {
    SecretCipher::new(key).open(sealed)
}

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};

const NONCE_SIZE: usize = 12;

/// Seals OAuth and bot tokens before they reach the database.
///
/// Stored form is base64(nonce || ciphertext) under a 256-bit key given as 64 hex characters.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(hex_key: &str) -> Result<Self> {
        let key_bytes = hex::decode(hex_key)
            .map_err(|_| anyhow!("Invalid encryption key format. Expected hex string."))?;

        if key_bytes.len() != 32 {
            return Err(anyhow!(
                "Encryption key must be 32 bytes (64 hex characters)"
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&combined))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let combined = STANDARD
            .decode(sealed)
            .map_err(|e| anyhow!("Invalid base64: {}", e))?;

        if combined.len() <= NONCE_SIZE {
            return Err(anyhow!("Invalid encrypted data"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
    }

    pub fn seal_optional(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.seal(p)).transpose()
    }

    pub fn open_optional(&self, sealed: Option<&str>) -> Result<Option<String>> {
        sealed.map(|s| self.open(s)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_seal_open() {
        let cipher = TokenCipher::new(KEY).unwrap();

        let sealed = cipher.seal("ya29.refresh-token").unwrap();
        assert_ne!(sealed, "ya29.refresh-token");
        assert_eq!(cipher.open(&sealed).unwrap(), "ya29.refresh-token");
    }

    #[test]
    fn test_nonces_differ() {
        let cipher = TokenCipher::new(KEY).unwrap();

        let first = cipher.seal("xoxb-bot-token").unwrap();
        let second = cipher.seal("xoxb-bot-token").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(TokenCipher::new("abcd").is_err());
        assert!(TokenCipher::new("not hex at all").is_err());
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let other = TokenCipher::new(&"f".repeat(64)).unwrap();

        let sealed = cipher.seal("secret").unwrap();
        assert!(other.open(&sealed).is_err());
        assert!(cipher.open("AAAA").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let cipher = TokenCipher::new(KEY).unwrap();
        assert_eq!(cipher.seal_optional(None).unwrap(), None);

        let sealed = cipher.seal_optional(Some("refresh")).unwrap();
        let opened = cipher.open_optional(sealed.as_deref()).unwrap();
        assert_eq!(opened.as_deref(), Some("refresh"));
    }
}

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};

/// Prefix identifying encrypted values at rest.
pub const ENCRYPTED_PREFIX: &str = "enc:";

const NONCE_LEN: usize = 12;

/// Derive the 256-bit AES key from the process secret.
fn derive_key(secret_key: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret_key.as_bytes());
    digest.into()
}

/// Encrypt a plaintext value.
///
/// Output format: `enc:<base64url(nonce || ciphertext)>`. The nonce is fresh
/// per call, so encrypting the same plaintext twice yields different stored
/// values.
pub fn encrypt_value(plaintext: &str, secret_key: &str) -> Result<String> {
    let key_bytes = derive_key(secret_key);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&ciphertext);

    Ok(format!("{ENCRYPTED_PREFIX}{}", URL_SAFE_NO_PAD.encode(packed)))
}

/// Decrypt a value produced by [`encrypt_value`]. Accepts input with or
/// without the `enc:` prefix.
pub fn decrypt_value(stored: &str, secret_key: &str) -> Result<String> {
    let encoded = stored.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(stored);
    let packed = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    if packed.len() <= NONCE_LEN {
        return Err(VaultError::Decryption("ciphertext too short".to_string()));
    }
    let (nonce, ciphertext) = packed.split_at(NONCE_LEN);

    let key_bytes = derive_key(secret_key);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| VaultError::Decryption(e.to_string()))
}

/// True when the value carries the `enc:` prefix.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Encrypt a value unless it is already encrypted. Idempotent.
pub fn encrypt_if_needed(value: &str, secret_key: &str) -> Result<String> {
    if is_encrypted(value) {
        return Ok(value.to_string());
    }
    encrypt_value(value, secret_key)
}

/// Decrypt a value if it is encrypted; plaintext passes through unchanged.
/// Read-through compatibility for values stored before encryption was enabled;
/// such values are re-encrypted on the next write.
pub fn decrypt_if_needed(value: &str, secret_key: &str) -> Result<String> {
    if !is_encrypted(value) {
        return Ok(value.to_string());
    }
    decrypt_value(value, secret_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn roundtrip() {
        let stored = encrypt_value("sk-or-v1-abc123", SECRET).unwrap();
        assert!(stored.starts_with(ENCRYPTED_PREFIX));
        assert_eq!(decrypt_value(&stored, SECRET).unwrap(), "sk-or-v1-abc123");
    }

    #[test]
    fn wrong_key_fails() {
        let stored = encrypt_value("secret-value", SECRET).unwrap();
        assert!(decrypt_value(&stored, "a-different-secret").is_err());
    }

    #[test]
    fn encrypt_if_needed_is_idempotent() {
        let once = encrypt_if_needed("plain", SECRET).unwrap();
        let twice = encrypt_if_needed(&once, SECRET).unwrap();
        assert_eq!(once, twice);
        assert_eq!(decrypt_if_needed(&twice, SECRET).unwrap(), "plain");
    }

    #[test]
    fn plaintext_passes_through_decrypt_if_needed() {
        assert_eq!(decrypt_if_needed("legacy-plain", SECRET).unwrap(), "legacy-plain");
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let a = encrypt_value("same", SECRET).unwrap();
        let b = encrypt_value("same", SECRET).unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt_value(&a, SECRET).unwrap(), decrypt_value(&b, SECRET).unwrap());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        assert!(decrypt_value("enc:AAAA", SECRET).is_err());
    }
}

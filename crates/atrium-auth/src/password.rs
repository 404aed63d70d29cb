use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

/// Hash a password with argon2id and a fresh salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Verify a password against a stored hash or plaintext.
///
/// Argon2 hashes carry the `$argon2` prefix. Anything else is treated as a
/// legacy development plaintext and compared constant-time.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    if stored.starts_with("$argon2") {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    } else {
        plain.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}

pub fn is_password_hashed(stored: &str) -> bool {
    stored.starts_with("$argon2")
}

/// Validate password strength: length bounds plus one character from each of
/// the four classes. The error names every missing class.
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }

    const SPECIAL: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?`~";
    let mut missing: Vec<&str> = Vec::new();
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        missing.push("at least 1 uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        missing.push("at least 1 lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("at least 1 digit");
    }
    if !password.chars().any(|c| SPECIAL.contains(c)) {
        missing.push("at least 1 special character");
    }

    if !missing.is_empty() {
        return Err(AuthError::WeakPassword(format!(
            "Password must contain {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("Sup3r$ecret").unwrap();
        assert!(is_password_hashed(&hash));
        assert!(verify_password("Sup3r$ecret", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn legacy_plaintext_verifies_constant_time() {
        assert!(verify_password("dev-password", "dev-password"));
        assert!(!verify_password("dev-password", "other"));
    }

    #[test]
    fn strength_errors_name_the_missing_class() {
        let err = validate_password_strength("alllowercase1!").unwrap_err();
        assert!(err.to_string().contains("uppercase"));
        assert!(!err.to_string().contains("digit"));

        let err = validate_password_strength("NoDigitsHere!").unwrap_err();
        assert!(err.to_string().contains("digit"));

        let err = validate_password_strength("NOLOWER1!").unwrap_err();
        assert!(err.to_string().contains("lowercase"));

        let err = validate_password_strength("NoSpecial1a").unwrap_err();
        assert!(err.to_string().contains("special"));

        assert!(validate_password_strength("").is_err());
        assert!(validate_password_strength("G00d$tuff").is_ok());
    }

    #[test]
    fn multiple_missing_classes_are_all_named() {
        let err = validate_password_strength("aaaaaaaa").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("uppercase"));
        assert!(msg.contains("digit"));
        assert!(msg.contains("special"));
    }
}

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use atrium_core::UserRole;

use crate::types::User;

/// The legacy admin principal: a token whose subject is this sentinel maps
/// to the admin role without a user row.
pub const ADMIN_SUBJECT: &str = "admin";

/// Signed session token claims. `csrf` is a fresh 256-bit value paired with
/// the token; mutating requests must echo it in a header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub csrf: String,
}

impl Claims {
    pub fn is_admin_sentinel(&self) -> bool {
        self.sub == ADMIN_SUBJECT
    }

    /// Effective role: the legacy admin sentinel is always admin; otherwise
    /// the embedded role claim.
    pub fn effective_role(&self) -> Option<UserRole> {
        if self.is_admin_sentinel() {
            return Some(UserRole::Admin);
        }
        self.role.as_deref().and_then(|r| r.parse().ok())
    }

    /// The user id behind this token, when the principal maps to a user row.
    pub fn user_id(&self) -> Option<&str> {
        if self.is_admin_sentinel() {
            None
        } else {
            Some(&self.sub)
        }
    }
}

/// Issues and verifies HS256 session tokens with paired CSRF secrets.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expire_hours: i64,
}

impl TokenIssuer {
    pub fn new(secret_key: &str, expire_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(secret_key.as_bytes()),
            expire_hours,
        }
    }

    fn issue(&self, claims: Claims) -> Option<String> {
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).ok()
    }

    /// Issue a token for a user. Returns (token, expiry, csrf).
    pub fn issue_user(&self, user: &User) -> Option<(String, DateTime<Utc>, String)> {
        let now = Utc::now();
        let expiry = now + Duration::hours(self.expire_hours);
        let csrf = generate_csrf_token();
        let claims = Claims {
            sub: user.id.clone(),
            email: Some(user.email.clone()),
            name: Some(user.name.clone()),
            role: Some(user.role.to_string()),
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            csrf: csrf.clone(),
        };
        self.issue(claims).map(|t| (t, expiry, csrf))
    }

    /// Issue a legacy admin token (no backing user row).
    pub fn issue_admin(&self) -> Option<(String, DateTime<Utc>, String)> {
        let now = Utc::now();
        let expiry = now + Duration::hours(self.expire_hours);
        let csrf = generate_csrf_token();
        let claims = Claims {
            sub: ADMIN_SUBJECT.to_string(),
            email: None,
            name: None,
            role: None,
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            csrf: csrf.clone(),
        };
        self.issue(claims).map(|t| (t, expiry, csrf))
    }

    /// Verify signature and expiry. `None` for anything invalid.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// Verify that the CSRF header matches the token's paired secret.
    /// Constant-time comparison.
    pub fn verify_csrf(&self, token: &str, csrf_header: &str) -> bool {
        let Some(claims) = self.verify(token) else {
            return false;
        };
        claims.csrf.as_bytes().ct_eq(csrf_header.as_bytes()).into()
    }
}

/// 256 bits of CSRF material, base64url-encoded.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            email: "a@example.com".to_string(),
            password_hash: String::new(),
            name: "A".to_string(),
            role: UserRole::Manager,
            is_active: true,
            is_verified: true,
            last_login_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn user_token_roundtrip() {
        let issuer = TokenIssuer::new("test-secret", 8);
        let (token, _expiry, csrf) = issuer.issue_user(&user()).unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert_eq!(claims.effective_role(), Some(UserRole::Manager));
        assert_eq!(claims.user_id(), Some("u-1"));
        assert!(issuer.verify_csrf(&token, &csrf));
        assert!(!issuer.verify_csrf(&token, "forged"));
    }

    #[test]
    fn admin_sentinel_maps_to_admin_role() {
        let issuer = TokenIssuer::new("test-secret", 8);
        let (token, _, _) = issuer.issue_admin().unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert!(claims.is_admin_sentinel());
        assert_eq!(claims.effective_role(), Some(UserRole::Admin));
        assert_eq!(claims.user_id(), None);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = TokenIssuer::new("secret-a", 8);
        let (token, _, _) = issuer.issue_admin().unwrap();
        let other = TokenIssuer::new("secret-b", 8);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = TokenIssuer::new("test-secret", -1);
        let (token, _, _) = issuer.issue_admin().unwrap();
        assert!(issuer.verify(&token).is_none());
    }

    #[test]
    fn csrf_tokens_are_unique_per_issue() {
        let issuer = TokenIssuer::new("test-secret", 8);
        let (_, _, a) = issuer.issue_admin().unwrap();
        let (_, _, b) = issuer.issue_admin().unwrap();
        assert_ne!(a, b);
    }
}

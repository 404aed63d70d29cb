use serde::{Deserialize, Serialize};

use atrium_core::UserRole;

/// A registered user. The password hash never leaves this crate except
/// through verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Stored lowercased; unique.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A programmatic-access key. Only the argon2 hash is stored; the raw key is
/// shown once at creation. The prefix narrows lookup and need not be unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First 8 characters of the raw key.
    pub key_prefix: String,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<String>,
    pub created_at: String,
}

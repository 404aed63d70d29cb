use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::password::{hash_password, verify_password};
use crate::types::UserApiKey;

/// Characters of the raw key used for candidate lookup. Not unique;
/// collisions just widen the candidate set.
const PREFIX_LEN: usize = 8;

const SELECT_COLS: &str = "id, user_id, name, key_hash, key_prefix, expires_at, is_active,
        last_used_at, created_at";

/// Programmatic-access keys: argon2-hashed at rest, located by prefix,
/// verified constant-time.
pub struct ApiKeyStore {
    db: Arc<Mutex<Connection>>,
}

impl ApiKeyStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a key for a user. The raw key is returned exactly once.
    #[instrument(skip(self))]
    pub fn create(
        &self,
        user_id: &str,
        name: &str,
        expires_in_days: Option<i64>,
    ) -> Result<(UserApiKey, String)> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let raw_key = URL_SAFE_NO_PAD.encode(bytes);
        let key_prefix: String = raw_key.chars().take(PREFIX_LEN).collect();
        let key_hash = hash_password(&raw_key)?;

        let expires_at = expires_in_days
            .map(|days| (chrono::Utc::now() + chrono::Duration::days(days)).to_rfc3339());

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_api_keys
             (id, user_id, name, key_hash, key_prefix, expires_at, is_active, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,1,?7)",
            rusqlite::params![id, user_id, name, key_hash, key_prefix, expires_at, now],
        )?;
        info!(key_id = %id, "api key created");

        let key = get_key(&db, &id)?;
        Ok((key, raw_key))
    }

    /// Verify a presented raw key.
    ///
    /// Candidates are narrowed by prefix, then each is checked by hash
    /// verification and expiry. A match bumps `last_used_at`.
    pub fn verify(&self, raw_key: &str) -> Result<Option<UserApiKey>> {
        if raw_key.len() < PREFIX_LEN {
            return Ok(None);
        }
        let prefix: String = raw_key.chars().take(PREFIX_LEN).collect();
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM user_api_keys
             WHERE key_prefix = ?1 AND is_active = 1"
        ))?;
        let candidates: Vec<UserApiKey> = stmt
            .query_map(rusqlite::params![prefix], row_to_key)?
            .filter_map(|r| r.ok())
            .collect();

        for key in candidates {
            if let Some(expires_at) = &key.expires_at {
                if expires_at < &now {
                    continue;
                }
            }
            if verify_password(raw_key, &key.key_hash) {
                db.execute(
                    "UPDATE user_api_keys SET last_used_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, key.id],
                )?;
                return get_key(&db, &key.id).map(Some);
            }
        }
        Ok(None)
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<UserApiKey>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM user_api_keys
             WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![user_id], row_to_key)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Deactivate a key. Ownership is enforced: only the owner's keys match.
    pub fn revoke(&self, key_id: &str, user_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE user_api_keys SET is_active = 0 WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![key_id, user_id],
        )?;
        Ok(n > 0)
    }
}

fn get_key(db: &Connection, id: &str) -> Result<UserApiKey> {
    match db.query_row(
        &format!("SELECT {SELECT_COLS} FROM user_api_keys WHERE id = ?1"),
        [id],
        row_to_key,
    ) {
        Ok(k) => Ok(k),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(AuthError::NotFound { id: id.to_string() }),
        Err(e) => Err(AuthError::Database(e)),
    }
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserApiKey> {
    Ok(UserApiKey {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        key_hash: row.get(3)?,
        key_prefix: row.get(4)?,
        expires_at: row.get(5)?,
        is_active: row.get(6)?,
        last_used_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApiKeyStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        // user_id has an FK to users(id); insert the parent row the tests reference.
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, role, is_active, is_verified, created_at, updated_at)
             VALUES ('u-1','u1@example.com','x','U1','user',1,0,'now','now')",
            [],
        )
        .unwrap();
        ApiKeyStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn create_and_verify_roundtrip() {
        let store = store();
        let (key, raw) = store.create("u-1", "ci", None).unwrap();
        assert_eq!(key.key_prefix, &raw[..8]);
        assert!(!key.key_hash.contains(&raw));

        let verified = store.verify(&raw).unwrap().unwrap();
        assert_eq!(verified.id, key.id);
        assert!(verified.last_used_at.is_some());
    }

    #[test]
    fn wrong_or_short_keys_fail() {
        let store = store();
        let (_, raw) = store.create("u-1", "ci", None).unwrap();
        assert!(store.verify("short").unwrap().is_none());
        // Same prefix, wrong remainder.
        let forged = format!("{}{}", &raw[..8], "X".repeat(35));
        assert!(store.verify(&forged).unwrap().is_none());
    }

    #[test]
    fn expired_keys_fail_verification() {
        let store = store();
        let (_, raw) = store.create("u-1", "old", Some(-1)).unwrap();
        assert!(store.verify(&raw).unwrap().is_none());
    }

    #[test]
    fn revoked_keys_fail_and_ownership_is_checked() {
        let store = store();
        let (key, raw) = store.create("u-1", "ci", None).unwrap();

        // Someone else's revoke attempt is a no-op.
        assert!(!store.revoke(&key.id, "u-2").unwrap());
        assert!(store.verify(&raw).unwrap().is_some());

        assert!(store.revoke(&key.id, "u-1").unwrap());
        assert!(store.verify(&raw).unwrap().is_none());
    }
}

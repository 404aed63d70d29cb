use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::encryption::{decrypt_value, encrypt_value};
use crate::error::{Result, VaultError};
use crate::probe::probe_key;
use crate::types::{Provider, ProviderKey, TestReport, TestStatus};

const SELECT_COLS: &str = "id, provider, name, encrypted_key, is_active, is_default,
        last_used_at, last_tested_at, test_status, test_error, rotated_from_id,
        created_at, updated_at";

/// Encrypted store for provider credentials.
///
/// Key material is encrypted with AES-256-GCM before it touches SQLite and is
/// only decrypted on `get_active` (for outbound calls) and `test` (probing).
pub struct KeyVault {
    db: Arc<Mutex<Connection>>,
    secret_key: String,
}

impl KeyVault {
    pub fn new(db: Arc<Mutex<Connection>>, secret_key: impl Into<String>) -> Self {
        Self {
            db,
            secret_key: secret_key.into(),
        }
    }

    /// List keys, newest first, optionally filtered by provider.
    pub fn list(&self, provider: Option<Provider>) -> Result<Vec<ProviderKey>> {
        let db = self.db.lock().unwrap();
        let mut keys = Vec::new();
        match provider {
            Some(p) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {SELECT_COLS} FROM provider_keys
                     WHERE provider = ?1 ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map(rusqlite::params![p.to_string()], row_to_key)?;
                keys.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {SELECT_COLS} FROM provider_keys ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map([], row_to_key)?;
                keys.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(keys)
    }

    pub fn get(&self, id: &str) -> Result<ProviderKey> {
        let db = self.db.lock().unwrap();
        get_key(&db, id)
    }

    /// Store a new key. When `is_default` is set, all other defaults for the
    /// same provider are cleared in the same transaction.
    #[instrument(skip(self, plaintext))]
    pub fn create(
        &self,
        provider: Provider,
        name: &str,
        plaintext: &str,
        is_default: bool,
    ) -> Result<ProviderKey> {
        let encrypted = encrypt_value(plaintext, &self.secret_key)?;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        if is_default {
            clear_defaults(&tx, provider)?;
        }
        tx.execute(
            "INSERT INTO provider_keys
             (id, provider, name, encrypted_key, is_active, is_default,
              test_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, 'untested', ?6, ?6)",
            rusqlite::params![id, provider.to_string(), name, encrypted, is_default, now],
        )?;
        let key = get_key(&tx, &id)?;
        tx.commit()?;

        info!(key_id = %id, "provider key created");
        Ok(key)
    }

    pub fn update(&self, id: &str, name: Option<&str>, is_active: Option<bool>) -> Result<ProviderKey> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        if let Some(name) = name {
            db.execute(
                "UPDATE provider_keys SET name = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![name, now, id],
            )?;
        }
        if let Some(active) = is_active {
            db.execute(
                "UPDATE provider_keys SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![active, now, id],
            )?;
        }
        get_key(&db, id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM provider_keys WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(VaultError::NotFound { id: id.to_string() });
        }
        info!(key_id = %id, "provider key deleted");
        Ok(())
    }

    /// Make this key the provider's default, clearing all others atomically.
    pub fn set_default(&self, id: &str) -> Result<ProviderKey> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let key = get_key(&tx, id)?;
        clear_defaults(&tx, key.provider)?;
        tx.execute(
            "UPDATE provider_keys SET is_default = 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        let key = get_key(&tx, id)?;
        tx.commit()?;
        Ok(key)
    }

    /// Replace a key's material. Creates a successor row pointing back via
    /// `rotated_from_id`, copies the default flag, and deactivates the
    /// predecessor — all in one transaction. Both rows remain queryable.
    #[instrument(skip(self, new_plaintext))]
    pub fn rotate(&self, id: &str, new_plaintext: &str) -> Result<ProviderKey> {
        let encrypted = encrypt_value(new_plaintext, &self.secret_key)?;
        let new_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let old = get_key(&tx, id)?;

        tx.execute(
            "INSERT INTO provider_keys
             (id, provider, name, encrypted_key, is_active, is_default,
              test_status, rotated_from_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, 'untested', ?6, ?7, ?7)",
            rusqlite::params![
                new_id,
                old.provider.to_string(),
                old.name,
                encrypted,
                old.is_default,
                old.id,
                now
            ],
        )?;
        tx.execute(
            "UPDATE provider_keys SET is_active = 0, is_default = 0, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, old.id],
        )?;
        let new_key = get_key(&tx, &new_id)?;
        tx.commit()?;

        info!(new_key_id = %new_id, "provider key rotated");
        Ok(new_key)
    }

    /// Probe the key against its provider and persist the outcome.
    /// Latency is reported but not persisted.
    pub async fn test(&self, id: &str) -> Result<TestReport> {
        let key = self.get(id)?;
        let api_key = decrypt_value(&key.encrypted_key, &self.secret_key)?;

        let started = Instant::now();
        let (valid, error) = probe_key(key.provider, &api_key).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = match valid {
            Some(true) => TestStatus::Valid,
            Some(false) => TestStatus::Invalid,
            None => TestStatus::Untested,
        };
        let persisted_error = match valid {
            Some(false) => error.clone(),
            _ => None,
        };

        let now = chrono::Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE provider_keys
                 SET last_tested_at = ?1, test_status = ?2, test_error = ?3, updated_at = ?1
                 WHERE id = ?4",
                rusqlite::params![now, status.to_string(), persisted_error, id],
            )?;
        }

        Ok(TestReport {
            valid,
            error,
            latency_ms: Some(latency_ms),
        })
    }

    /// Decrypted key for outbound calls: the default active key, or the most
    /// recently created active key when no default is set. Bumps
    /// `last_used_at` as a side effect.
    pub fn get_active(&self, provider: Provider) -> Result<String> {
        let db = self.db.lock().unwrap();

        let key = match query_one(
            &db,
            &format!(
                "SELECT {SELECT_COLS} FROM provider_keys
                 WHERE provider = ?1 AND is_active = 1 AND is_default = 1
                 LIMIT 1"
            ),
            provider,
        )? {
            Some(k) => Some(k),
            None => query_one(
                &db,
                &format!(
                    "SELECT {SELECT_COLS} FROM provider_keys
                     WHERE provider = ?1 AND is_active = 1
                     ORDER BY created_at DESC LIMIT 1"
                ),
                provider,
            )?,
        };

        let key = key.ok_or_else(|| VaultError::NoActiveKey {
            provider: provider.to_string(),
        })?;

        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "UPDATE provider_keys SET last_used_at = ?1 WHERE id = ?2",
            rusqlite::params![now, key.id],
        )?;

        decrypt_value(&key.encrypted_key, &self.secret_key)
    }
}

fn query_one(db: &Connection, sql: &str, provider: Provider) -> Result<Option<ProviderKey>> {
    match db.query_row(sql, rusqlite::params![provider.to_string()], row_to_key) {
        Ok(k) => Ok(Some(k)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(VaultError::Database(e)),
    }
}

fn get_key(db: &Connection, id: &str) -> Result<ProviderKey> {
    match db.query_row(
        &format!("SELECT {SELECT_COLS} FROM provider_keys WHERE id = ?1"),
        [id],
        row_to_key,
    ) {
        Ok(k) => Ok(k),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(VaultError::NotFound { id: id.to_string() }),
        Err(e) => Err(VaultError::Database(e)),
    }
}

fn clear_defaults(db: &Connection, provider: Provider) -> Result<()> {
    db.execute(
        "UPDATE provider_keys SET is_default = 0 WHERE provider = ?1 AND is_default = 1",
        rusqlite::params![provider.to_string()],
    )?;
    Ok(())
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderKey> {
    let provider_str: String = row.get(1)?;
    let status_str: String = row.get(8)?;
    Ok(ProviderKey {
        id: row.get(0)?,
        provider: provider_str.parse().unwrap_or(Provider::Custom),
        name: row.get(2)?,
        encrypted_key: row.get(3)?,
        is_active: row.get(4)?,
        is_default: row.get(5)?,
        last_used_at: row.get(6)?,
        last_tested_at: row.get(7)?,
        test_status: status_str.parse().unwrap_or(TestStatus::Untested),
        test_error: row.get(9)?,
        rotated_from_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "vault-test-secret";

    fn vault() -> KeyVault {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        KeyVault::new(Arc::new(Mutex::new(conn)), SECRET)
    }

    #[test]
    fn create_encrypts_at_rest() {
        let vault = vault();
        let key = vault
            .create(Provider::OpenRouter, "primary", "sk-or-plain", false)
            .unwrap();
        assert!(key.encrypted_key.starts_with("enc:"));
        assert!(!key.encrypted_key.contains("sk-or-plain"));
    }

    #[test]
    fn at_most_one_default_per_provider() {
        let vault = vault();
        let k1 = vault.create(Provider::OpenAi, "first", "sk-1", true).unwrap();
        let k2 = vault.create(Provider::OpenAi, "second", "sk-2", true).unwrap();
        // A default for another provider is unaffected.
        let other = vault.create(Provider::Anthropic, "ant", "sk-a", true).unwrap();

        let defaults: Vec<_> = vault
            .list(Some(Provider::OpenAi))
            .unwrap()
            .into_iter()
            .filter(|k| k.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, k2.id);
        assert!(vault.get(&other.id).unwrap().is_default);

        let k1_again = vault.set_default(&k1.id).unwrap();
        assert!(k1_again.is_default);
        assert!(!vault.get(&k2.id).unwrap().is_default);
    }

    #[test]
    fn rotation_deactivates_predecessor_and_links_back() {
        let vault = vault();
        let k1 = vault.create(Provider::OpenRouter, "main", "sk-old", true).unwrap();
        let k2 = vault.rotate(&k1.id, "sk-new").unwrap();

        let k1 = vault.get(&k1.id).unwrap();
        assert!(!k1.is_active);
        assert!(!k1.is_default);
        assert!(k2.is_active);
        assert!(k2.is_default);
        assert_eq!(k2.rotated_from_id.as_deref(), Some(k1.id.as_str()));

        // Both rows remain queryable for audit.
        assert_eq!(vault.list(Some(Provider::OpenRouter)).unwrap().len(), 2);
        assert_eq!(vault.get_active(Provider::OpenRouter).unwrap(), "sk-new");
    }

    #[test]
    fn get_active_falls_back_to_most_recent_active() {
        let vault = vault();
        vault.create(Provider::OpenRouter, "a", "sk-a", false).unwrap();
        vault.create(Provider::OpenRouter, "b", "sk-b", false).unwrap();
        // No default set: the most recently created active key wins.
        assert_eq!(vault.get_active(Provider::OpenRouter).unwrap(), "sk-b");
    }

    #[test]
    fn get_active_bumps_last_used() {
        let vault = vault();
        let key = vault.create(Provider::OpenRouter, "a", "sk-a", true).unwrap();
        assert!(key.last_used_at.is_none());
        vault.get_active(Provider::OpenRouter).unwrap();
        assert!(vault.get(&key.id).unwrap().last_used_at.is_some());
    }

    #[test]
    fn missing_key_is_not_found() {
        let vault = vault();
        assert!(matches!(vault.get("nope"), Err(VaultError::NotFound { .. })));
        assert!(matches!(
            vault.get_active(Provider::Google),
            Err(VaultError::NoActiveKey { .. })
        ));
    }
}

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use atrium_core::UserRole;

use crate::error::{AuthError, Result};
use crate::password::{hash_password, validate_password_strength, verify_password};
use crate::types::User;

const SELECT_COLS: &str = "id, email, password_hash, name, role, is_active, is_verified,
        last_login_at, created_at, updated_at";

/// Filters for `UserDirectory::list`.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Substring match against email or name.
    pub search: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    /// 1-indexed.
    pub page: usize,
    pub size: usize,
}

/// User CRUD and credential verification over SQLite.
pub struct UserDirectory {
    db: Arc<Mutex<Connection>>,
}

impl UserDirectory {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a user. Email is lowercased and must be unique; the password
    /// must pass strength validation.
    #[instrument(skip(self, password))]
    pub fn create(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: UserRole,
        is_verified: bool,
    ) -> Result<User> {
        let email = email.trim().to_lowercase();
        if self.get_by_email(&email)?.is_some() {
            return Err(AuthError::EmailExists { email });
        }
        validate_password_strength(password)?;

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let password_hash = hash_password(password)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO users
             (id, email, password_hash, name, role, is_active, is_verified, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,1,?6,?7,?7)",
            rusqlite::params![id, email, password_hash, name.trim(), role.to_string(), is_verified, now],
        )?;
        info!(user_id = %id, "user created");
        get_user(&db, &id)
    }

    pub fn get(&self, id: &str) -> Result<User> {
        let db = self.db.lock().unwrap();
        get_user(&db, id)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {SELECT_COLS} FROM users WHERE email = ?1"),
            rusqlite::params![email],
            row_to_user,
        ) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AuthError::Database(e)),
        }
    }

    /// List users with filters and paging. Returns (users, total).
    pub fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, u64)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(search) = &filter.search {
            clauses.push("(email LIKE ? OR name LIKE ?)".to_string());
            let pattern = format!("%{search}%");
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }
        if let Some(role) = filter.role {
            clauses.push("role = ?".to_string());
            args.push(Box::new(role.to_string()));
        }
        if let Some(active) = filter.is_active {
            clauses.push("is_active = ?".to_string());
            args.push(Box::new(active));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let db = self.db.lock().unwrap();
        let total: u64 = db.query_row(
            &format!("SELECT COUNT(*) FROM users{where_sql}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let size = if filter.size == 0 { 20 } else { filter.size };
        let offset = filter.page.saturating_sub(1) * size;
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM users{where_sql}
             ORDER BY created_at DESC LIMIT {size} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_user,
        )?;

        Ok((rows.filter_map(|r| r.ok()).collect(), total))
    }

    /// Update profile fields. A changed email must remain unique.
    pub fn update(
        &self,
        id: &str,
        email: Option<&str>,
        name: Option<&str>,
        role: Option<UserRole>,
    ) -> Result<User> {
        if let Some(email) = email {
            let email = email.trim().to_lowercase();
            if let Some(existing) = self.get_by_email(&email)? {
                if existing.id != id {
                    return Err(AuthError::EmailExists { email });
                }
            }
            let now = chrono::Utc::now().to_rfc3339();
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![email, now, id],
            )?;
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        if let Some(name) = name {
            db.execute(
                "UPDATE users SET name = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![name.trim(), now, id],
            )?;
        }
        if let Some(role) = role {
            db.execute(
                "UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![role.to_string(), now, id],
            )?;
        }
        get_user(&db, id)
    }

    pub fn set_active(&self, id: &str, is_active: bool) -> Result<User> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![is_active, now, id],
        )?;
        if n == 0 {
            return Err(AuthError::NotFound { id: id.to_string() });
        }
        get_user(&db, id)
    }

    /// Replace a user's password after strength validation.
    pub fn change_password(&self, id: &str, new_password: &str) -> Result<()> {
        validate_password_strength(new_password)?;
        let password_hash = hash_password(new_password)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![password_hash, now, id],
        )?;
        if n == 0 {
            return Err(AuthError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM users WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(AuthError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Verify email + password for an active user and stamp the login time.
    /// Returns `None` on any failure so callers cannot distinguish a wrong
    /// password from an unknown or disabled account.
    #[instrument(skip(self, password))]
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.get_by_email(email)? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        if !verify_password(password, &user.password_hash) {
            return Ok(None);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            rusqlite::params![now, user.id],
        )?;
        get_user(&db, &user.id).map(Some)
    }
}

fn get_user(db: &Connection, id: &str) -> Result<User> {
    match db.query_row(
        &format!("SELECT {SELECT_COLS} FROM users WHERE id = ?1"),
        [id],
        row_to_user,
    ) {
        Ok(u) => Ok(u),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(AuthError::NotFound { id: id.to_string() }),
        Err(e) => Err(AuthError::Database(e)),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        role: role_str.parse().unwrap_or(UserRole::User),
        is_active: row.get(5)?,
        is_verified: row.get(6)?,
        last_login_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        UserDirectory::new(Arc::new(Mutex::new(conn)))
    }

    const GOOD_PW: &str = "G00d$tuff";

    #[test]
    fn email_is_lowercased_and_unique() {
        let dir = directory();
        let user = dir
            .create("Alice@Example.COM", GOOD_PW, "Alice", UserRole::User, false)
            .unwrap();
        assert_eq!(user.email, "alice@example.com");

        let err = dir
            .create("alice@example.com", GOOD_PW, "Alice 2", UserRole::User, false)
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailExists { .. }));
    }

    #[test]
    fn weak_password_is_rejected_at_creation() {
        let dir = directory();
        let err = dir
            .create("bob@example.com", "weakpass", "Bob", UserRole::User, false)
            .unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
    }

    #[test]
    fn authenticate_happy_path_stamps_last_login() {
        let dir = directory();
        dir.create("a@b.c", GOOD_PW, "A", UserRole::User, true).unwrap();

        let user = dir.authenticate("a@b.c", GOOD_PW).unwrap().unwrap();
        assert!(user.last_login_at.is_some());

        assert!(dir.authenticate("a@b.c", "wrong-pass").unwrap().is_none());
        assert!(dir.authenticate("nobody@b.c", GOOD_PW).unwrap().is_none());
    }

    #[test]
    fn inactive_users_cannot_authenticate() {
        let dir = directory();
        let user = dir.create("a@b.c", GOOD_PW, "A", UserRole::User, true).unwrap();
        dir.set_active(&user.id, false).unwrap();
        assert!(dir.authenticate("a@b.c", GOOD_PW).unwrap().is_none());
    }

    #[test]
    fn list_filters_by_role_and_search() {
        let dir = directory();
        dir.create("admin@x.y", GOOD_PW, "Root", UserRole::Admin, true).unwrap();
        dir.create("carol@x.y", GOOD_PW, "Carol", UserRole::User, true).unwrap();

        let (users, total) = dir
            .list(&UserFilter {
                role: Some(UserRole::Admin),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].email, "admin@x.y");

        let (_, total) = dir
            .list(&UserFilter {
                search: Some("carol".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn password_change_requires_strength() {
        let dir = directory();
        let user = dir.create("a@b.c", GOOD_PW, "A", UserRole::User, true).unwrap();
        assert!(dir.change_password(&user.id, "short").is_err());
        dir.change_password(&user.id, "N3w$ecret").unwrap();
        assert!(dir.authenticate("a@b.c", "N3w$ecret").unwrap().is_some());
        assert!(dir.authenticate("a@b.c", GOOD_PW).unwrap().is_none());
    }
}

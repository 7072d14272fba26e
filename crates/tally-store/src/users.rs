use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Opaque session token handed to the browser in the session cookie.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// 32 random bytes, URL-safe base64 without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find or create the user called `name` (trimmed) and give them a fresh
    /// session token. Any previous token for that user stops working.
    #[instrument(skip(self))]
    pub fn create_session(&self, name: &str) -> Result<(UserRow, SessionToken), StoreError> {
        let name = name.trim();
        let token = SessionToken::generate();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                rusqlite::params![name, Utc::now().to_rfc3339()],
            )?;
            conn.execute(
                "UPDATE users SET session_id = ?1 WHERE name = ?2",
                rusqlite::params![token.as_str(), name],
            )?;
            let user = conn.query_row(
                "SELECT id, name, created_at FROM users WHERE name = ?1",
                [name],
                map_user,
            )?;
            Ok((user, token))
        })
    }

    #[instrument(skip(self, token))]
    pub fn find_by_session(&self, token: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, created_at FROM users WHERE session_id = ?1",
                    [token],
                    map_user,
                )
                .optional()?)
        })
    }

    /// Revoke a session token. Returns whether it was live.
    #[instrument(skip(self, token))]
    pub fn clear_session(&self, token: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("UPDATE users SET session_id = NULL WHERE session_id = ?1", [token])?;
            Ok(n > 0)
        })
    }
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

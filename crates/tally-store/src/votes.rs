use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::{
    constraint_code, StoreError, SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE,
};

/// A stored vote joined with the names it refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub id: i64,
    pub option_name: String,
    pub user_name: String,
    pub created_at: String,
}

pub struct VoteRepo {
    db: Database,
}

impl VoteRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn has_voted(&self, user_id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM votes WHERE user_id = ?1", [user_id], |row| {
                    row.get(0)
                })?;
            Ok(n > 0)
        })
    }

    /// Record `user_id`'s vote.
    ///
    /// A second vote by the same user is [`StoreError::Conflict`]; an option
    /// or user that does not exist is [`StoreError::NotFound`].
    #[instrument(skip(self))]
    pub fn cast(&self, user_id: i64, option_id: i64) -> Result<VoteRecord, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO votes (user_id, option_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, option_id, now],
            )
            .map_err(|e| match constraint_code(&e) {
                Some(SQLITE_CONSTRAINT_UNIQUE) => {
                    StoreError::Conflict(format!("user {user_id} already voted"))
                }
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
                    StoreError::NotFound(format!("option {option_id} or user {user_id}"))
                }
                _ => e.into(),
            })?;
            let id = conn.last_insert_rowid();

            let record = conn.query_row(
                "SELECT v.id, o.option_name, u.name, v.created_at
                 FROM votes v
                 JOIN options o ON o.id = v.option_id
                 JOIN users u ON u.id = v.user_id
                 WHERE v.id = ?1",
                [id],
                |row| {
                    Ok(VoteRecord {
                        id: row.get(0)?,
                        option_name: row.get(1)?,
                        user_name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )?;
            info!(vote_id = id, user_id, option_id, "vote recorded");
            Ok(record)
        })
    }
}

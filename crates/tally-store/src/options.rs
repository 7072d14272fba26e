use serde::Serialize;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRow {
    pub id: i64,
    pub option_name: String,
}

pub struct OptionRepo {
    db: Database,
}

impl OptionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert any of `names` that are not already present.
    /// Returns how many rows were added.
    #[instrument(skip(self, names), fields(count = names.len()))]
    pub fn seed<S: AsRef<str>>(&self, names: &[S]) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("INSERT OR IGNORE INTO options (option_name) VALUES (?1)")?;
            let mut added = 0;
            for name in names {
                added += stmt.execute([name.as_ref()])?;
            }
            debug!(added, "seeded poll options");
            Ok(added)
        })
    }

    /// All options in id order.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<OptionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, option_name FROM options ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(OptionRow {
                        id: row.get(0)?,
                        option_name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<OptionRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, option_name FROM options WHERE id = ?1",
                [id],
                |row| {
                    Ok(OptionRow {
                        id: row.get(0)?,
                        option_name: row.get(1)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("option {id}")),
                other => other.into(),
            })
        })
    }

    #[instrument(skip(self))]
    pub fn exists(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM options WHERE id = ?1", [id], |row| {
                row.get(0)
            })?;
            Ok(n > 0)
        })
    }
}

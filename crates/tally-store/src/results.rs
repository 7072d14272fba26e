use tally_core::ResultSnapshot;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Results aggregation query.
pub struct ResultsRepo {
    db: Database,
}

impl ResultsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Per-option counts (zero for options nobody picked), ordered by option id.
    #[instrument(skip(self))]
    pub fn current(&self) -> Result<ResultSnapshot, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.id, o.option_name, COUNT(v.id)
                 FROM options o
                 LEFT JOIN votes v ON v.option_id = o.id
                 GROUP BY o.id, o.option_name
                 ORDER BY o.id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let count: i64 = row.get(2)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        u64::try_from(count).unwrap_or(0),
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ResultSnapshot::from_counts(rows))
        })
    }
}

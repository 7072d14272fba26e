//! Result snapshot produced by the aggregation query and pushed to clients.

use serde::{Deserialize, Serialize};

/// Tally for one poll option.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    pub id: i64,
    pub name: String,
    pub count: u64,
    /// Share of all votes, rounded to the nearest integer.
    pub percentage: u32,
}

/// Immutable view of the poll at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    pub options: Vec<OptionTally>,
    pub total_votes: u64,
}

impl ResultSnapshot {
    /// Build a snapshot from `(id, name, count)` rows, filling in the total
    /// and per-option percentages. Row order is preserved.
    pub fn from_counts(rows: Vec<(i64, String, u64)>) -> Self {
        let total_votes = rows.iter().map(|(_, _, count)| count).sum();
        let options = rows
            .into_iter()
            .map(|(id, name, count)| OptionTally {
                id,
                name,
                count,
                percentage: percentage(count, total_votes),
            })
            .collect();
        Self {
            options,
            total_votes,
        }
    }

    pub fn option(&self, id: i64) -> Option<&OptionTally> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// `count / total` as a whole percent, rounding halves away from zero.
/// Zero when there are no votes at all.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn percentage(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let count = u128::from(count);
    let total = u128::from(total);
    ((count * 200 + total) / (2 * total)) as u32
}

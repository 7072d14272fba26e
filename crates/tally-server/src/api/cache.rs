use std::time::Duration;

use parking_lot::Mutex;
use tally_core::ResultSnapshot;
use tokio::time::Instant;

/// Short-lived cache in front of the results aggregation query.
pub struct ResultsCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, ResultSnapshot)>>,
}

impl ResultsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Return the cached snapshot if still fresh, otherwise compute and
    /// store a new one. The flag is `true` for a cache hit.
    pub fn get_or_compute<E>(
        &self,
        compute: impl FnOnce() -> Result<ResultSnapshot, E>,
    ) -> Result<(ResultSnapshot, bool), E> {
        let mut entry = self.entry.lock();
        if let Some((at, snapshot)) = entry.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok((snapshot.clone(), true));
            }
        }
        let fresh = compute()?;
        *entry = Some((Instant::now(), fresh.clone()));
        Ok((fresh, false))
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }
}

//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
}

pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        assert!(health_check(start, 0).uptime_secs >= 59);
    }

    #[test]
    fn serializes_camel_case() {
        let parsed = serde_json::to_value(health_check(Instant::now(), 4)).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 4);
        assert!(parsed["uptimeSecs"].is_number());
        assert!(parsed.get("uptime_secs").is_none());
    }
}

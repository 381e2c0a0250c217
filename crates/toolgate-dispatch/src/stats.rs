//! Per-tool dispatch statistics
//!
//! Counters the dispatcher updates on every call; read by the admin
//! status endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use toolgate_core::InvocationResult;

#[derive(Debug, Clone, Default)]
struct ToolStats {
    success: u64,
    failure: u64,
    total_elapsed_ns: u128,
    last_error: Option<String>,
}

/// Snapshot of one tool's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatsView {
    pub success: u64,
    pub failure: u64,
    pub calls: u64,
    pub average_latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// All per-tool counters
pub struct DispatchStats {
    per_tool: RwLock<HashMap<String, ToolStats>>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            per_tool: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, registry_id: &str, result: &InvocationResult) {
        let mut per_tool = self.per_tool.write().await;
        let stats = per_tool.entry(registry_id.to_string()).or_default();
        if result.success {
            stats.success += 1;
        } else {
            stats.failure += 1;
            stats.last_error = result.error_message.clone();
        }
        stats.total_elapsed_ns += result.elapsed_ns as u128;
    }

    pub async fn snapshot(&self) -> HashMap<String, ToolStatsView> {
        let per_tool = self.per_tool.read().await;
        per_tool
            .iter()
            .map(|(id, stats)| {
                let calls = stats.success + stats.failure;
                let average_latency_ms = if calls > 0 {
                    (stats.total_elapsed_ns as f64 / calls as f64) / 1_000_000.0
                } else {
                    0.0
                };
                (
                    id.clone(),
                    ToolStatsView {
                        success: stats.success,
                        failure: stats.failure,
                        calls,
                        average_latency_ms,
                        last_error: stats.last_error.clone(),
                    },
                )
            })
            .collect()
    }

    pub async fn totals(&self) -> (u64, u64) {
        let per_tool = self.per_tool.read().await;
        per_tool.values().fold((0, 0), |(ok, fail), s| {
            (ok + s.success, fail + s.failure)
        })
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use toolgate_core::ErrorKind;

    #[tokio::test]
    async fn test_record_and_snapshot() {
        let stats = DispatchStats::new();
        stats
            .record(
                "echo",
                &toolgate_core::InvocationResult::ok(serde_json::json!({}))
                    .with_elapsed(Duration::from_millis(4)),
            )
            .await;
        stats
            .record(
                "echo",
                &toolgate_core::InvocationResult::fail(ErrorKind::Timeout, "slow"),
            )
            .await;

        let snapshot = stats.snapshot().await;
        let echo = &snapshot["echo"];
        assert_eq!(echo.success, 1);
        assert_eq!(echo.failure, 1);
        assert_eq!(echo.calls, 2);
        assert_eq!(echo.last_error.as_deref(), Some("slow"));
        assert!(echo.average_latency_ms > 0.0);

        assert_eq!(stats.totals().await, (1, 1));
    }
}

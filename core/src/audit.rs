//! Append-only audit log for TPST analysis.
//!
//! Exactly one [`AuditRecord`] exists per tool call; the engine appends it
//! at finalisation on every exit path. Readers observe a monotonically
//! growing prefix; clearing is explicit.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ExecutionContext, ExecutionPhase};

/// Immutable snapshot of one finished tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tool: String,
    /// Furthest phase the call reached.
    pub phase: ExecutionPhase,
    /// Wall duration in seconds.
    pub duration: f64,
    /// Output tokens (coarse estimate).
    pub tokens: u64,
    pub success: bool,
    /// Constraint violations as JSON maps (empty on clean calls).
    pub constraints: Vec<Value>,
    pub batched: bool,
}

impl AuditRecord {
    /// Derive a record from a finalised context.
    #[must_use]
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            tool: ctx.tool_name().to_string(),
            phase: ctx.phase(),
            duration: ctx.duration().as_secs_f64(),
            tokens: ctx.actual_tokens(),
            success: ctx.succeeded(),
            constraints: ctx.constraint_violations().to_vec(),
            batched: ctx.should_batch(),
        }
    }
}

/// Aggregate view over the log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub total_executions: usize,
    /// Fraction in `0.0..=1.0`; zero when the log is empty.
    pub success_rate: f64,
    pub total_tokens: u64,
    /// `(tool, duration_seconds)` above the threshold, slowest first.
    pub slow_tools: Vec<(String, f64)>,
}

/// The engine's append-only record list.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records for one tool, in append order.
    #[must_use]
    pub fn records_for(&self, tool: &str) -> Vec<&AuditRecord> {
        self.records.iter().filter(|r| r.tool == tool).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Aggregate report; `slow_threshold` selects the slow-tool list.
    #[must_use]
    pub fn report(&self, slow_threshold: Duration) -> AuditReport {
        let total = self.records.len();
        let successes = self.records.iter().filter(|r| r.success).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            successes as f64 / total as f64
        };
        let total_tokens = self.records.iter().map(|r| r.tokens).sum();

        let mut slow_tools: Vec<(String, f64)> = self
            .records
            .iter()
            .filter(|r| r.duration > slow_threshold.as_secs_f64())
            .map(|r| (r.tool.clone(), r.duration))
            .collect();
        slow_tools.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        AuditReport {
            total_executions: total,
            success_rate,
            total_tokens,
            slow_tools,
        }
    }
}

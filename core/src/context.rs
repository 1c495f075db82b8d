//! Per-call execution state: phase tracking, runtime counters, and the
//! cooperative `check_limits` probe.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use evolvai_types::{ConstraintError, ExecutionPlan, ValidationResult};

/// The four phases a tool call moves through, strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    PreValidation,
    PreExecution,
    Execution,
    PostExecution,
}

impl ExecutionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ExecutionPhase::PreValidation => "pre_validation",
            ExecutionPhase::PreExecution => "pre_execution",
            ExecutionPhase::Execution => "execution",
            ExecutionPhase::PostExecution => "post_execution",
        }
    }
}

/// Mutable state for one tool call.
///
/// Owned by the engine for the duration of the call and discarded after the
/// audit record is emitted. Tools that iterate receive a mutable borrow so
/// they can bump the runtime counters and call [`ExecutionContext::check_limits`].
#[derive(Debug)]
pub struct ExecutionContext {
    tool_name: String,
    kwargs: Map<String, Value>,
    execution_plan: Option<ExecutionPlan>,

    start: Instant,
    end: Option<Instant>,
    phase: ExecutionPhase,

    files_processed: u64,
    changes_made: u64,
    constraint_violations: Vec<Value>,
    should_batch: bool,

    estimated_tokens: u64,
    actual_tokens: u64,

    result: Option<String>,
    error: Option<String>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, kwargs: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            kwargs,
            execution_plan: None,
            start: Instant::now(),
            end: None,
            phase: ExecutionPhase::PreValidation,
            files_processed: 0,
            changes_made: 0,
            constraint_violations: Vec::new(),
            should_batch: false,
            estimated_tokens: 0,
            actual_tokens: 0,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    #[must_use]
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    #[must_use]
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.execution_plan.as_ref()
    }

    pub fn set_plan(&mut self, plan: ExecutionPlan) {
        self.should_batch = plan.batch;
        self.execution_plan = Some(plan);
    }

    #[must_use]
    pub const fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Advance to a later phase. Transitions are strictly forward; the
    /// recorded phase is the furthest point reached.
    pub fn advance(&mut self, phase: ExecutionPhase) {
        debug_assert!(phase >= self.phase, "phases only move forward");
        if phase > self.phase {
            self.phase = phase;
        }
    }

    // ── Runtime counters ─────────────────────────────────────

    pub fn note_file_processed(&mut self) {
        self.files_processed += 1;
    }

    pub fn note_change_made(&mut self) {
        self.changes_made += 1;
    }

    #[must_use]
    pub const fn files_processed(&self) -> u64 {
        self.files_processed
    }

    #[must_use]
    pub const fn changes_made(&self) -> u64 {
        self.changes_made
    }

    /// Runtime constraint probe for tools that iterate.
    ///
    /// A no-op when no plan is attached. Checks file count, then change
    /// count, then elapsed time against the plan's limits.
    pub fn check_limits(&self) -> Result<(), ConstraintError> {
        let Some(plan) = &self.execution_plan else {
            return Ok(());
        };
        let limits = &plan.limits;

        if self.files_processed > u64::from(limits.max_files()) {
            return Err(ConstraintError::FileLimitExceeded {
                files_processed: self.files_processed,
                max_files: limits.max_files(),
            });
        }
        if self.changes_made > u64::from(limits.max_changes()) {
            return Err(ConstraintError::ChangeLimitExceeded {
                changes_made: self.changes_made,
                max_changes: limits.max_changes(),
            });
        }
        let limit = Duration::from_secs(limits.timeout_seconds());
        let elapsed = self.start.elapsed();
        if elapsed > limit {
            return Err(ConstraintError::Timeout { elapsed, limit });
        }
        Ok(())
    }

    // ── Tokens (coarse: byte length / 4) ─────────────────────

    pub fn estimate_input_tokens(&mut self) {
        let bytes = serde_json::to_string(&self.kwargs).map_or(0, |s| s.len());
        self.estimated_tokens = (bytes / 4) as u64;
    }

    pub fn record_output_tokens(&mut self, result: &str) {
        self.actual_tokens = (result.len() / 4) as u64;
    }

    #[must_use]
    pub const fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }

    #[must_use]
    pub const fn actual_tokens(&self) -> u64 {
        self.actual_tokens
    }

    // ── Outcome ──────────────────────────────────────────────

    pub fn record_violations(&mut self, result: &ValidationResult) {
        for violation in result.violations() {
            if let Ok(value) = serde_json::to_value(violation) {
                self.constraint_violations.push(value);
            }
        }
    }

    pub fn record_constraint_error(&mut self, error: &ConstraintError) {
        self.constraint_violations
            .push(Value::Object(error.details()));
    }

    #[must_use]
    pub fn constraint_violations(&self) -> &[Value] {
        &self.constraint_violations
    }

    #[must_use]
    pub const fn should_batch(&self) -> bool {
        self.should_batch
    }

    pub fn set_result(&mut self, result: String) {
        self.result = Some(result);
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Stamp the end time. Idempotent; the first stamp wins.
    pub fn finish(&mut self) {
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
    }

    /// Wall duration of the call. Zero until [`ExecutionContext::finish`].
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end
            .map_or(Duration::ZERO, |end| end.duration_since(self.start))
    }

    #[must_use]
    pub fn started(&self) -> Instant {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use evolvai_types::{
        ConstraintError, ExecutionLimits, ExecutionPlan, RollbackStrategy,
    };
    use serde_json::Map;

    use super::{ExecutionContext, ExecutionPhase};

    fn ctx_with_limits(max_files: u32, max_changes: u32, timeout: u64) -> ExecutionContext {
        let mut plan = ExecutionPlan::with_rollback(RollbackStrategy::git_revert());
        plan.limits = ExecutionLimits::new(max_files, max_changes, timeout).unwrap();
        let mut ctx = ExecutionContext::new("patch_editor", Map::new());
        ctx.set_plan(plan);
        ctx
    }

    #[test]
    fn phases_only_move_forward() {
        let mut ctx = ExecutionContext::new("search", Map::new());
        assert_eq!(ctx.phase(), ExecutionPhase::PreValidation);
        ctx.advance(ExecutionPhase::Execution);
        assert_eq!(ctx.phase(), ExecutionPhase::Execution);
        ctx.advance(ExecutionPhase::Execution);
        assert_eq!(ctx.phase(), ExecutionPhase::Execution);
        ctx.advance(ExecutionPhase::PostExecution);
        assert_eq!(ctx.phase(), ExecutionPhase::PostExecution);
    }

    #[test]
    fn check_limits_is_noop_without_plan() {
        let mut ctx = ExecutionContext::new("search", Map::new());
        for _ in 0..1000 {
            ctx.note_file_processed();
        }
        assert!(ctx.check_limits().is_ok());
    }

    #[test]
    fn file_limit_breach_is_detected() {
        let mut ctx = ctx_with_limits(2, 100, 300);
        ctx.note_file_processed();
        ctx.note_file_processed();
        assert!(ctx.check_limits().is_ok());
        ctx.note_file_processed();
        let err = ctx.check_limits().unwrap_err();
        assert!(matches!(
            err,
            ConstraintError::FileLimitExceeded {
                files_processed: 3,
                max_files: 2
            }
        ));
    }

    #[test]
    fn change_limit_checked_after_file_limit() {
        let mut ctx = ctx_with_limits(100, 1, 300);
        ctx.note_change_made();
        ctx.note_change_made();
        let err = ctx.check_limits().unwrap_err();
        assert_eq!(err.constraint_type(), "change_limit");
    }

    #[test]
    fn duration_is_zero_until_finished() {
        let mut ctx = ExecutionContext::new("search", Map::new());
        assert!(ctx.duration().is_zero());
        ctx.finish();
        assert!(ctx.duration() >= std::time::Duration::ZERO);
    }

    #[test]
    fn set_plan_copies_batch_flag() {
        let mut plan = ExecutionPlan::with_rollback(RollbackStrategy::git_revert());
        plan.batch = true;
        let mut ctx = ExecutionContext::new("search", Map::new());
        ctx.set_plan(plan);
        assert!(ctx.should_batch());
    }

    #[test]
    fn token_estimates_are_quarter_byte_length() {
        let mut kwargs = Map::new();
        kwargs.insert("pattern".into(), serde_json::json!("getUserData"));
        let serialized_len = serde_json::to_string(&kwargs).unwrap().len();

        let mut ctx = ExecutionContext::new("search", kwargs);
        ctx.estimate_input_tokens();
        assert_eq!(ctx.estimated_tokens(), (serialized_len / 4) as u64);

        ctx.record_output_tokens("12345678");
        assert_eq!(ctx.actual_tokens(), 2);
    }
}

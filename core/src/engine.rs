//! The tool execution engine: every tool call runs through four phases
//! with the audit record written exactly once on all exit paths.
//!
//! ```text
//!   pre_validation ──┬──► pre_execution ──► execution ──► post_execution ──► [audit]
//!                    │         (only if constraints enabled and plan present)
//!                    └── any failure ──► [audit as failure]
//! ```
//!
//! Failure semantics: plan rejections and runtime limit breaches propagate
//! to the caller as typed errors after the audit record is appended. Every
//! other failure is flattened into a human-readable string beginning with
//! `Error executing tool:` so the embedding always receives a predictable
//! result.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use evolvai_types::{ConstraintError, ConstraintViolation, ExecutionPlan};

use crate::audit::{AuditLog, AuditRecord, AuditReport};
use crate::context::{ExecutionContext, ExecutionPhase};
use crate::validator;

/// Key stripped from the kwargs map and parsed as an [`ExecutionPlan`].
const EXECUTION_PLAN_KEY: &str = "execution_plan";

// ── Tool-side contract ───────────────────────────────────────

/// Failure modes a tool's apply function may report.
#[derive(Debug, Error)]
pub enum ToolApplyError {
    /// The language server died mid-call. The engine restarts it and
    /// retries the apply exactly once.
    #[error("language server terminated: {0}")]
    LanguageServerTerminated(String),
    /// A runtime plan limit was breached; propagates to the caller verbatim.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    /// Anything else; flattened to a string at the engine boundary.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The capability record every embedded tool exposes.
///
/// Deliberately small: a name, an activation check, a handful of markers,
/// and the apply function. No deep inheritance.
pub trait Tool {
    fn name(&self) -> &str;

    fn is_active(&self) -> bool {
        true
    }

    /// Whether the tool needs an active project to run.
    fn requires_project(&self) -> bool {
        true
    }

    /// Whether the tool may edit files.
    fn can_edit(&self) -> bool {
        false
    }

    fn needs_language_server(&self) -> bool {
        false
    }

    /// Perform the tool's work. The context exposes the kwargs snapshot,
    /// the runtime counters, and the `check_limits` probe.
    fn apply(&self, ctx: &mut ExecutionContext) -> Result<String, ToolApplyError>;
}

/// What the engine needs from the host agent.
pub trait HostAgent {
    fn active_project(&self) -> Option<String>;
    fn known_projects(&self) -> Vec<String>;
    fn active_tool_names(&self) -> Vec<String>;

    fn language_server_running(&self) -> bool {
        true
    }

    fn restart_language_server(&self);

    /// Post-execution telemetry hook.
    fn record_tool_usage(&self, tool_name: &str);

    /// Flush the language-server cache, if one exists. Errors are logged
    /// and never mask the primary result.
    fn flush_language_server_cache(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Engine errors ────────────────────────────────────────────

/// Errors that propagate through [`ToolExecutionEngine::execute`].
///
/// Everything else is flattened to an `Error executing tool: …` string.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The execution plan failed validation (phase 2).
    #[error(transparent)]
    PlanRejected(#[from] ConstraintViolation),
    /// A runtime limit was breached during execution (phase 3).
    #[error(transparent)]
    Limit(#[from] ConstraintError),
}

/// Internal classification of a failed call: propagate typed, or flatten
/// to a string at the boundary.
enum CallFailure {
    Propagate(EngineError),
    Flatten(String),
}

impl CallFailure {
    fn message(&self) -> String {
        match self {
            CallFailure::Propagate(e) => e.to_string(),
            CallFailure::Flatten(msg) => msg.clone(),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────

/// Orchestrates every tool call and owns the audit log.
///
/// Not safely callable from multiple threads at once; callers serialise.
/// Separate engine instances have independent audit logs.
pub struct ToolExecutionEngine {
    agent: Arc<dyn HostAgent>,
    constraints_enabled: bool,
    audit: AuditLog,
}

impl ToolExecutionEngine {
    #[must_use]
    pub fn new(agent: Arc<dyn HostAgent>, enable_constraints: bool) -> Self {
        Self {
            agent,
            constraints_enabled: enable_constraints,
            audit: AuditLog::new(),
        }
    }

    /// Drive `tool` through the four phases.
    ///
    /// Returns the tool's result string, or a flattened
    /// `Error executing tool: …` string for generic failures. Plan
    /// rejections and runtime limit breaches come back as [`EngineError`].
    /// Exactly one audit record is appended per call, on every exit path.
    pub fn execute(
        &mut self,
        tool: &dyn Tool,
        mut kwargs: Map<String, Value>,
    ) -> Result<String, EngineError> {
        let plan_value = kwargs.remove(EXECUTION_PLAN_KEY);
        let mut ctx = ExecutionContext::new(tool.name(), kwargs);

        let outcome = self.run(tool, &mut ctx, plan_value);

        if let Err(failure) = &outcome {
            ctx.set_error(failure.message());
        }
        ctx.finish();
        self.audit.append(AuditRecord::from_context(&ctx));

        match outcome {
            Ok(result) => Ok(result),
            Err(CallFailure::Propagate(err)) => Err(err),
            Err(CallFailure::Flatten(msg)) => {
                error!(tool = tool.name(), "Error executing tool: {msg}");
                Ok(format!("Error executing tool: {msg}"))
            }
        }
    }

    fn run(
        &self,
        tool: &dyn Tool,
        ctx: &mut ExecutionContext,
        plan_value: Option<Value>,
    ) -> Result<String, CallFailure> {
        if let Some(value) = plan_value {
            let plan: ExecutionPlan = serde_json::from_value(value)
                .map_err(|e| CallFailure::Flatten(format!("invalid execution plan: {e}")))?;
            ctx.set_plan(plan);
        }

        // Phase 1: pre-validation.
        self.pre_validation(tool)?;

        // Phase 2: pre-execution constraints. Skipped when globally disabled
        // or when no plan was supplied (backward compatibility).
        if self.constraints_enabled && ctx.plan().is_some() {
            ctx.advance(ExecutionPhase::PreExecution);
            if let Some(result) = ctx.plan().map(validator::validate) {
                if !result.is_valid() {
                    ctx.record_violations(&result);
                    return Err(CallFailure::Propagate(EngineError::PlanRejected(
                        ConstraintViolation::new(result),
                    )));
                }
            }
        }

        // Phase 3: execution, with a single restart+retry on language-server
        // termination.
        ctx.advance(ExecutionPhase::Execution);
        ctx.estimate_input_tokens();
        let result = match tool.apply(ctx) {
            Ok(result) => result,
            Err(ToolApplyError::LanguageServerTerminated(msg)) => {
                warn!(
                    tool = tool.name(),
                    "language server terminated mid-call, restarting and retrying once: {msg}"
                );
                self.agent.restart_language_server();
                match tool.apply(ctx) {
                    Ok(result) => result,
                    Err(retry_err) => return Err(classify(ctx, retry_err)),
                }
            }
            Err(other) => return Err(classify(ctx, other)),
        };
        ctx.record_output_tokens(&result);
        ctx.set_result(result.clone());

        // Phase 4: post-execution. Errors here are logged, never masking
        // the primary result.
        ctx.advance(ExecutionPhase::PostExecution);
        self.agent.record_tool_usage(tool.name());
        if let Err(e) = self.agent.flush_language_server_cache() {
            warn!(tool = tool.name(), "language server cache flush failed: {e}");
        }

        Ok(result)
    }

    fn pre_validation(&self, tool: &dyn Tool) -> Result<(), CallFailure> {
        if !tool.is_active() {
            let active = self.agent.active_tool_names().join(", ");
            return Err(CallFailure::Flatten(format!(
                "Tool '{}' is not active. Active tools: [{active}]",
                tool.name()
            )));
        }

        if tool.requires_project() && self.agent.active_project().is_none() {
            let known = self.agent.known_projects().join(", ");
            return Err(CallFailure::Flatten(format!(
                "No active project. Known projects: [{known}]"
            )));
        }

        if tool.needs_language_server() && !self.agent.language_server_running() {
            debug!(
                tool = tool.name(),
                "language server not running, requesting restart before execution"
            );
            self.agent.restart_language_server();
        }

        Ok(())
    }

    // ── Audit access ─────────────────────────────────────────

    #[must_use]
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn clear_audit_log(&mut self) {
        self.audit.clear();
    }

    #[must_use]
    pub fn audit_report(&self, slow_threshold: Duration) -> AuditReport {
        self.audit.report(slow_threshold)
    }
}

/// Sort a failed apply into propagate-vs-flatten, recording constraint
/// breaches on the context for the audit record.
fn classify(ctx: &mut ExecutionContext, error: ToolApplyError) -> CallFailure {
    match error {
        ToolApplyError::Constraint(constraint) => {
            ctx.record_constraint_error(&constraint);
            CallFailure::Propagate(EngineError::Limit(constraint))
        }
        ToolApplyError::LanguageServerTerminated(msg) => {
            CallFailure::Flatten(format!("language server terminated: {msg}"))
        }
        ToolApplyError::Other(err) => CallFailure::Flatten(err.to_string()),
    }
}

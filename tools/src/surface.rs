//! The thin MCP-facing tool surface.
//!
//! Five functions mirroring the component signatures one-for-one, each
//! returning a JSON string: a success payload with the structured fields
//! of the corresponding result type, or an
//! `{"error": {"type", "message", "suggestion"}}` object.

use std::time::{Duration, Instant};

use serde_json::json;

use evolvai_types::{ExecutionLimits, ExecutionPlan, RollbackStrategy};

use crate::detector::AreaDetector;
use crate::patch_editor::{PatchEditor, PatchError};
use crate::safe_exec::{ExecError, SafeExec};
use crate::search::{SafeSearch, SearchOptions};

fn error_json(error_type: &str, message: &str, suggestion: &str) -> String {
    json!({
        "error": {
            "type": error_type,
            "message": message,
            "suggestion": suggestion,
        }
    })
    .to_string()
}

/// Generate an edit proposal (unified diff) without modifying files.
pub fn propose_edit(
    editor: &mut PatchEditor,
    pattern: &str,
    replacement: &str,
    scope: &str,
    language: Option<&str>,
) -> String {
    match editor.propose_edit(pattern, replacement, scope, language) {
        Ok(result) => json!({
            "success": true,
            "patch_id": result.patch_id,
            "affected_files": result.affected_files,
            "unified_diff": result.unified_diff,
            "statistics": result.statistics,
            "created_at": result.created_at.to_rfc3339(),
        })
        .to_string(),
        Err(err) => {
            let (error_type, suggestion) = match &err {
                PatchError::NoFilesInScope { .. } => (
                    "file_not_found",
                    "Widen the scope glob or check the path spelling",
                ),
                PatchError::NoChanges { .. } => (
                    "no_changes",
                    "The pattern matched no content; verify it against the current files",
                ),
                PatchError::InvalidPattern(_) => {
                    ("invalid_pattern", "Fix the regular expression syntax")
                }
                PatchError::InvalidScope { .. } => ("invalid_scope", "Fix the scope glob syntax"),
                _ => ("execution_error", "Check parameters and project structure"),
            };
            error_json(error_type, &err.to_string(), suggestion)
        }
    }
}

/// Apply a previously proposed patch under execution-plan constraints.
pub fn apply_edit(
    editor: &mut PatchEditor,
    patch_id: &str,
    max_files: u32,
    max_changes: u32,
    timeout_seconds: u64,
) -> String {
    let limits = match ExecutionLimits::new(max_files, max_changes, timeout_seconds) {
        Ok(limits) => limits,
        Err(err) => {
            return error_json(
                "invalid_limits",
                &err.to_string(),
                "Keep limits within 1..=100 files, 1..=1000 changes, 1..=300 seconds",
            );
        }
    };
    let mut plan = ExecutionPlan::with_rollback(RollbackStrategy::file_backup());
    plan.dry_run = false;
    plan.limits = limits;

    match editor.apply_edit(patch_id, Some(&plan)) {
        Ok(result) => json!({
            "success": result.success,
            "modified_files": result.modified_files,
            "worktree_path": result.worktree_path,
            "error_message": result.error_message,
        })
        .to_string(),
        Err(err) => {
            let (error_type, suggestion) = match &err {
                PatchError::NotFound { .. } => (
                    "patch_not_found".to_string(),
                    "Call propose_edit first and use the returned patch_id",
                ),
                PatchError::Conflict { .. } => (
                    "patch_conflict".to_string(),
                    "The tree changed since the proposal; re-run propose_edit",
                ),
                PatchError::Constraint(constraint) => (
                    format!("constraint_{}", constraint.constraint_type()),
                    "Raise the limits or split the patch into smaller edits",
                ),
                _ => (
                    "execution_error".to_string(),
                    "Check parameters and project structure",
                ),
            };
            error_json(&error_type, &err.to_string(), suggestion)
        }
    }
}

/// Budget-capped project search. The outcome embeds its own error
/// envelope, so this always serializes the full result shape.
pub fn safe_search(search: &mut SafeSearch, query: &str, options: &SearchOptions) -> String {
    let outcome = search.search(query, options);
    serde_json::to_string_pretty(&outcome).unwrap_or_else(|e| {
        error_json(
            "serialization_error",
            &e.to_string(),
            "Report this; the search result could not be serialized",
        )
    })
}

/// Execute a shell command behind the precondition gate.
pub fn safe_exec(executor: &mut SafeExec, command: &str, timeout_seconds: u64) -> String {
    match executor.execute(command, Duration::from_secs(timeout_seconds)) {
        Ok(result) => json!({
            "success": result.success,
            "exit_code": result.exit_code,
            "stdout": result.stdout,
            "stderr": result.stderr,
            "duration_ms": result.duration.as_secs_f64() * 1000.0,
            "precondition_passed": result.precondition_passed,
            "timeout_occurred": result.timeout_occurred,
            "error_message": result.error_message,
        })
        .to_string(),
        Err(ExecError::Precondition(violation)) => error_json(
            "constraint_violation",
            &violation.to_string(),
            "Fix the command or working directory and retry",
        ),
    }
}

/// Zero-cost project structure analysis.
pub fn get_language_hint(detector: &mut AreaDetector, sample_limit: usize) -> String {
    let cache_status = detector.cache_status(sample_limit);
    let start = Instant::now();
    let areas = detector.detect_areas(sample_limit);
    let analysis_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let areas_json: Vec<_> = areas
        .iter()
        .map(|area| {
            json!({
                "name": area.name,
                "language": area.language,
                "root": area.root_path,
                "confidence": area.confidence.to_string(),
                "evidence": area.evidence,
                "suggested_globs": area.include_globs,
                "exclude_globs": area.exclude_globs,
            })
        })
        .collect();

    json!({
        "areas": areas_json,
        "cache_status": cache_status,
        "analysis_time_ms": analysis_time_ms,
        "total_areas": areas.len(),
    })
    .to_string()
}

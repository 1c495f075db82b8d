//! Structured constraint errors.
//!
//! Two families: [`ConstraintViolation`] wraps a full plan-validation
//! result (the call was rejected before the tool ran), and
//! [`ConstraintError`] covers runtime breaches of the plan's limits
//! (raised mid-execution via the context's `check_limits` probe).

use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::validation::ValidationResult;

/// The execution plan failed validation; carries the full result for
/// programmatic handling.
#[derive(Debug, Clone, Error)]
#[error("{}", .result.summary().trim_end())]
pub struct ConstraintViolation {
    result: ValidationResult,
}

impl ConstraintViolation {
    #[must_use]
    pub fn new(result: ValidationResult) -> Self {
        Self { result }
    }

    /// A violation built from a single ERROR finding, for precondition
    /// gates that reject outside plan validation (working dir, command).
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        use crate::validation::{ValidationViolation, ViolationSeverity};
        Self {
            result: ValidationResult::new(vec![ValidationViolation::new(
                field,
                message,
                ViolationSeverity::Error,
            )]),
        }
    }

    #[must_use]
    pub fn result(&self) -> &ValidationResult {
        &self.result
    }
}

/// A runtime limit from the execution plan was breached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("file limit exceeded: processed {files_processed} files, plan allows {max_files}")]
    FileLimitExceeded {
        files_processed: u64,
        max_files: u32,
    },
    #[error("change limit exceeded: made {changes_made} changes, plan allows {max_changes}")]
    ChangeLimitExceeded { changes_made: u64, max_changes: u32 },
    #[error("execution timed out after {elapsed:.1?}, plan allows {limit:?}")]
    Timeout { elapsed: Duration, limit: Duration },
}

impl ConstraintError {
    /// Stable label used in audit records and feedback envelopes.
    #[must_use]
    pub const fn constraint_type(&self) -> &'static str {
        match self {
            ConstraintError::FileLimitExceeded { .. } => "file_limit",
            ConstraintError::ChangeLimitExceeded { .. } => "change_limit",
            ConstraintError::Timeout { .. } => "timeout",
        }
    }

    /// Violation details as a JSON map, keyed the way downstream
    /// consumers expect (`files_processed`, `max_files`, ...).
    #[must_use]
    pub fn details(&self) -> Map<String, Value> {
        let value = match self {
            ConstraintError::FileLimitExceeded {
                files_processed,
                max_files,
            } => json!({
                "constraint_type": self.constraint_type(),
                "files_processed": files_processed,
                "max_files": max_files,
            }),
            ConstraintError::ChangeLimitExceeded {
                changes_made,
                max_changes,
            } => json!({
                "constraint_type": self.constraint_type(),
                "changes_made": changes_made,
                "max_changes": max_changes,
            }),
            ConstraintError::Timeout { elapsed, limit } => json!({
                "constraint_type": self.constraint_type(),
                "elapsed_seconds": elapsed.as_secs_f64(),
                "timeout_seconds": limit.as_secs_f64(),
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => unreachable!("details are always objects"),
        }
    }
}

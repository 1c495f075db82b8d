//! Plan validation: pure business rules on top of the structural bounds.
//!
//! Bounds and required fields are already guaranteed by construction
//! ([`ExecutionPlan`] cannot hold out-of-range limits or a manual rollback
//! without commands), so nothing here re-checks them. The validator covers
//! the semantic rules: rollback advisories, validation-config consistency,
//! and cross-field sanity.

use std::collections::HashSet;

use evolvai_types::{ExecutionPlan, ValidationResult, ValidationViolation, ViolationSeverity};

/// Substrings that typically indicate catastrophic intent in a rollback
/// command. Matches are flagged INFO, never ERROR: this is reasoning-failure
/// signalling, not policy enforcement.
const SUSPICIOUS_ROLLBACK_PATTERNS: &[&str] = &["rm -rf /", "format c:", "del /f /s /q"];

/// Ratio of `max_files * max_changes` to `timeout_seconds` above which the
/// plan is unlikely to finish in time. Sized so the default limits
/// (10 files x 50 changes in 30s) stay clean.
const WORKLOAD_TIMEOUT_RATIO: u64 = 100;

/// Validate an execution plan. Pure and idempotent; no IO.
#[must_use]
pub fn validate(plan: &ExecutionPlan) -> ValidationResult {
    let mut violations = Vec::new();

    check_rollback_commands(plan, &mut violations);
    check_validation_config(plan, &mut violations);
    check_cross_field(plan, &mut violations);

    ValidationResult::new(violations)
}

fn check_rollback_commands(plan: &ExecutionPlan, violations: &mut Vec<ValidationViolation>) {
    for command in plan.rollback.commands() {
        let lowered = command.to_lowercase();
        for pattern in SUSPICIOUS_ROLLBACK_PATTERNS {
            if lowered.contains(pattern) {
                violations.push(
                    ValidationViolation::new(
                        "rollback.commands",
                        format!(
                            "Potentially destructive command: '{command}' contains '{pattern}'. \
                             This is a reminder, not a security check."
                        ),
                        ViolationSeverity::Info,
                    )
                    .with_current_value(command.clone()),
                );
            }
        }
    }
}

fn check_validation_config(plan: &ExecutionPlan, violations: &mut Vec<ValidationViolation>) {
    check_condition_list(
        "validation.pre_conditions",
        &plan.validation.pre_conditions,
        violations,
    );
    check_condition_list(
        "validation.expected_outcomes",
        &plan.validation.expected_outcomes,
        violations,
    );
}

fn check_condition_list(
    field: &str,
    entries: &[String],
    violations: &mut Vec<ValidationViolation>,
) {
    for (i, entry) in entries.iter().enumerate() {
        if entry.trim().is_empty() {
            violations.push(
                ValidationViolation::new(
                    format!("{field}[{i}]"),
                    format!("Empty string in {field} is not allowed"),
                    ViolationSeverity::Error,
                )
                .with_current_value(entry.clone()),
            );
        }
    }

    let unique: HashSet<&String> = entries.iter().collect();
    if unique.len() != entries.len() {
        violations.push(ValidationViolation::new(
            field,
            format!("Duplicate entries detected in {field}"),
            ViolationSeverity::Warning,
        ));
    }
}

fn check_cross_field(plan: &ExecutionPlan, violations: &mut Vec<ValidationViolation>) {
    let limits = &plan.limits;

    if plan.batch && limits.max_files() <= 1 {
        violations.push(
            ValidationViolation::new(
                "batch",
                "batch=true with max_files <= 1 defeats the purpose of batching",
                ViolationSeverity::Warning,
            )
            .with_current_value(limits.max_files()),
        );
    }

    let workload = u64::from(limits.max_files()) * u64::from(limits.max_changes());
    if workload > WORKLOAD_TIMEOUT_RATIO * limits.timeout_seconds() {
        violations.push(
            ValidationViolation::new(
                "limits",
                format!(
                    "max_files * max_changes ({workload}) is large relative to \
                     timeout_seconds ({}); the plan is unlikely to finish in time",
                    limits.timeout_seconds()
                ),
                ViolationSeverity::Warning,
            )
            .with_expected_range(format!(
                "<= {}",
                WORKLOAD_TIMEOUT_RATIO * limits.timeout_seconds()
            )),
        );
    }
}

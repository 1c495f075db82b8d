//! Plan validation results: violations with severities and a derived verdict.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a single validation violation.
///
/// Only `Error` blocks execution; `Warning` and `Info` are surfaced but
/// advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

impl ViolationSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ViolationSeverity::Error => "error",
            ViolationSeverity::Warning => "warning",
            ViolationSeverity::Info => "info",
        }
    }
}

/// One finding from plan validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationViolation {
    /// Dotted field path, e.g. `validation.pre_conditions[0]`.
    pub field: String,
    pub message: String,
    pub severity: ViolationSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_range: Option<String>,
}

impl ValidationViolation {
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        severity: ViolationSeverity,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity,
            current_value: None,
            expected_range: None,
        }
    }

    #[must_use]
    pub fn with_current_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.current_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_expected_range(mut self, range: impl Into<String>) -> Self {
        self.expected_range = Some(range.into());
        self
    }
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.severity.as_str().to_uppercase(),
            self.field,
            self.message
        )
    }
}

/// Result of validating an [`crate::ExecutionPlan`].
///
/// `is_valid` is derived, not stored independently: it is true iff no
/// ERROR-level violation is present. [`ValidationResult::new`] is the only
/// constructor and deserialization re-derives the verdict, so the two can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawValidationResult")]
pub struct ValidationResult {
    is_valid: bool,
    violations: Vec<ValidationViolation>,
}

#[derive(Deserialize)]
struct RawValidationResult {
    // Present on the wire but re-derived from the violations.
    #[serde(default)]
    #[allow(dead_code)]
    is_valid: bool,
    #[serde(default)]
    violations: Vec<ValidationViolation>,
}

impl From<RawValidationResult> for ValidationResult {
    fn from(raw: RawValidationResult) -> Self {
        Self::new(raw.violations)
    }
}

impl ValidationResult {
    #[must_use]
    pub fn new(violations: Vec<ValidationViolation>) -> Self {
        let is_valid = !violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error);
        Self {
            is_valid,
            violations,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[must_use]
    pub fn violations(&self) -> &[ValidationViolation] {
        &self.violations
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_with(ViolationSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_with(ViolationSeverity::Warning)
    }

    #[must_use]
    pub fn violations_with(&self, severity: ViolationSeverity) -> Vec<&ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .collect()
    }

    fn count_with(&self, severity: ViolationSeverity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    /// User-facing summary: verdict, counts, and up to five violation lines.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid {
            return "Validation passed".to_string();
        }

        let errors = self.error_count();
        let warnings = self.warning_count();
        let mut parts = Vec::new();
        if errors > 0 {
            parts.push(format!("{errors} error{}", plural(errors)));
        }
        if warnings > 0 {
            parts.push(format!("{warnings} warning{}", plural(warnings)));
        }

        let mut out = format!("Validation failed: {}\n", parts.join(", "));
        for violation in self.violations.iter().take(5) {
            out.push_str(&format!("  - {violation}\n"));
        }
        if self.violations.len() > 5 {
            out.push_str(&format!("  ... and {} more\n", self.violations.len() - 5));
        }
        out
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::{ValidationResult, ValidationViolation, ViolationSeverity};

    fn violation(severity: ViolationSeverity) -> ValidationViolation {
        ValidationViolation::new("limits.max_files", "out of range", severity)
    }

    #[test]
    fn empty_result_is_valid() {
        let result = ValidationResult::new(vec![]);
        assert!(result.is_valid());
        assert_eq!(result.summary(), "Validation passed");
    }

    #[test]
    fn warnings_do_not_block() {
        let result = ValidationResult::new(vec![
            violation(ViolationSeverity::Warning),
            violation(ViolationSeverity::Info),
        ]);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn any_error_invalidates() {
        let result = ValidationResult::new(vec![
            violation(ViolationSeverity::Warning),
            violation(ViolationSeverity::Error),
        ]);
        assert!(!result.is_valid());
        assert_eq!(result.error_count(), 1);
    }

    #[test]
    fn summary_lists_counts_and_violations() {
        let result = ValidationResult::new(vec![
            violation(ViolationSeverity::Error),
            violation(ViolationSeverity::Warning),
        ]);
        let summary = result.summary();
        assert!(summary.contains("1 error"));
        assert!(summary.contains("1 warning"));
        assert!(summary.contains("[ERROR] limits.max_files"));
    }

    #[test]
    fn summary_truncates_after_five() {
        let violations = (0..7).map(|_| violation(ViolationSeverity::Error)).collect();
        let result = ValidationResult::new(violations);
        assert!(result.summary().contains("... and 2 more"));
    }

    #[test]
    fn violation_display_format() {
        let v = ValidationViolation::new("rollback.commands", "suspicious", ViolationSeverity::Info);
        assert_eq!(v.to_string(), "[INFO] rollback.commands: suspicious");
    }

    #[test]
    fn filter_by_severity() {
        let result = ValidationResult::new(vec![
            violation(ViolationSeverity::Error),
            violation(ViolationSeverity::Info),
            violation(ViolationSeverity::Info),
        ]);
        assert_eq!(result.violations_with(ViolationSeverity::Info).len(), 2);
    }

    #[test]
    fn serde_roundtrip_preserves_verdict() {
        let result = ValidationResult::new(vec![violation(ViolationSeverity::Error)]);
        let json = serde_json::to_string(&result).unwrap();
        let back: ValidationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
        assert!(!back.is_valid());
    }

    #[test]
    fn deserialization_rederives_the_verdict() {
        // A document claiming validity despite an error-level violation.
        let doc = r#"{
            "is_valid": true,
            "violations": [{
                "field": "validation.pre_conditions[0]",
                "message": "empty",
                "severity": "error"
            }]
        }"#;
        let result: ValidationResult = serde_json::from_str(doc).unwrap();
        assert!(!result.is_valid());
    }
}

//! LLM-observable feedback: execution reports for successful searches and
//! a uniform error envelope for failures.
//!
//! Suggestions come from fixed templates keyed by error kind, so the
//! assistant always receives the same shape: a one-line summary, a fix
//! suggestion with a code example, and for constraint errors the
//! violation details.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use evolvai_types::{ConstraintError, QueryRouting};

/// Actionable repair advice attached to every error envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixSuggestion {
    pub summary: String,
    pub code_example: String,
    pub alternative_approaches: Vec<String>,
}

/// The uniform user-visible failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub summary: String,
    pub fix_suggestion: FixSuggestion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_details: Option<Map<String, Value>>,
}

/// Per-area coverage entry in an execution report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageEntry {
    pub scanned: u32,
    pub found: u32,
    pub duration_ms: f64,
}

/// Aggregate performance block of an execution report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_files_scanned: u32,
    pub total_matches_found: u32,
    pub total_duration_ms: f64,
    /// Matches per hundred scanned files; zero when nothing was scanned.
    pub efficiency_score: f64,
    pub areas_processed: usize,
}

/// What a search actually did: areas, budgets, coverage, performance.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub detected_areas: Vec<Value>,
    pub applied_areas: Vec<Value>,
    pub applied_patterns: Vec<String>,
    pub total_results: u32,
    pub execution_time_ms: f64,
    pub coverage: BTreeMap<String, CoverageEntry>,
    pub performance: PerformanceSummary,
}

impl ExecutionReport {
    /// An empty report for error paths.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            detected_areas: Vec::new(),
            applied_areas: Vec::new(),
            applied_patterns: Vec::new(),
            total_results: 0,
            execution_time_ms: 0.0,
            coverage: BTreeMap::new(),
            performance: PerformanceSummary {
                total_files_scanned: 0,
                total_matches_found: 0,
                total_duration_ms: 0.0,
                efficiency_score: 0.0,
                areas_processed: 0,
            },
        }
    }
}

/// Stateless feedback generator.
#[derive(Debug, Default)]
pub struct Feedback;

impl Feedback {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build an execution report from a routing decision whose applied
    /// areas have been filled in by the search executor.
    #[must_use]
    pub fn execution_report(&self, routing: &QueryRouting, execution_time_ms: f64) -> ExecutionReport {
        let detected_areas = routing
            .areas
            .iter()
            .map(|area| {
                serde_json::json!({
                    "name": area.name,
                    "language": area.language,
                    "root": area.root_path,
                    "confidence": area.confidence.to_string(),
                    "evidence": area.evidence,
                })
            })
            .collect();

        let applied_areas = routing
            .applied_areas
            .iter()
            .map(|applied| {
                serde_json::json!({
                    "name": applied.name,
                    "budget_files": applied.budget_files,
                    "scanned_files": applied.scanned_files,
                    "found_matches": applied.match_count,
                    "duration_ms": applied.duration_ms,
                    "score": applied.score,
                })
            })
            .collect();

        let coverage: BTreeMap<String, CoverageEntry> = routing
            .applied_areas
            .iter()
            .map(|applied| {
                (
                    applied.name.clone(),
                    CoverageEntry {
                        scanned: applied.scanned_files,
                        found: applied.match_count,
                        duration_ms: applied.duration_ms,
                    },
                )
            })
            .collect();

        let total_scanned: u32 = routing.applied_areas.iter().map(|a| a.scanned_files).sum();
        let total_matches: u32 = routing.applied_areas.iter().map(|a| a.match_count).sum();
        let total_duration: f64 = routing.applied_areas.iter().map(|a| a.duration_ms).sum();
        let efficiency_score = if total_scanned > 0 {
            f64::from(total_matches) / f64::from(total_scanned) * 100.0
        } else {
            0.0
        };

        ExecutionReport {
            detected_areas,
            applied_areas,
            applied_patterns: routing.final_patterns.clone(),
            total_results: total_matches,
            execution_time_ms,
            coverage,
            performance: PerformanceSummary {
                total_files_scanned: total_scanned,
                total_matches_found: total_matches,
                total_duration_ms: total_duration,
                efficiency_score,
                areas_processed: routing.applied_areas.len(),
            },
        }
    }

    /// Generic error envelope with template advice.
    #[must_use]
    pub fn error(&self, error_type: &str, message: &str) -> ErrorResponse {
        ErrorResponse {
            error_type: error_type.to_string(),
            summary: format!("Error: {message}"),
            fix_suggestion: FixSuggestion {
                summary: "Review and adjust your search parameters".to_string(),
                code_example: "# Example: safe_search(\"specific pattern\", max_files=30)"
                    .to_string(),
                alternative_approaches: vec![
                    "Check query syntax".to_string(),
                    "Verify file permissions".to_string(),
                ],
            },
            violation_details: None,
        }
    }

    /// Envelope for queries that violate business rules (e.g. bare
    /// catch-all patterns).
    #[must_use]
    pub fn business_conflict(&self, message: &str) -> ErrorResponse {
        ErrorResponse {
            error_type: "business_conflict".to_string(),
            summary: format!("Business rule violation: {message}"),
            fix_suggestion: FixSuggestion {
                summary: "Use a specific search pattern instead of a catch-all".to_string(),
                code_example: "# Too broad - AVOID\nsafe_search(\".*\")\n\n\
                               # Better - USE SPECIFIC PATTERNS\n\
                               safe_search(\"authentication\", area_selector=\"backend-go\")"
                    .to_string(),
                alternative_approaches: vec![
                    "Use more specific search patterns".to_string(),
                    "Restrict search scope with file patterns".to_string(),
                    "Use area_selector to target specific project areas".to_string(),
                ],
            },
            violation_details: None,
        }
    }

    /// Envelope for a runtime constraint breach, with violation details.
    #[must_use]
    pub fn constraint_violation(&self, error: &ConstraintError) -> ErrorResponse {
        let details = error.details();
        let (suggestion, example) = match error {
            ConstraintError::FileLimitExceeded {
                files_processed,
                max_files,
            } => (
                format!("Reduce search scope from {files_processed} to <= {max_files} files"),
                "# Reduce the max_files parameter\nsafe_search(\"pattern\", max_files=25)"
                    .to_string(),
            ),
            ConstraintError::ChangeLimitExceeded { max_changes, .. } => (
                format!("Limit changes to <= {max_changes} operations"),
                "# Split the edit into smaller patches\n\
                 propose_edit(\"pattern\", \"replacement\", scope=\"src/module/**\")"
                    .to_string(),
            ),
            ConstraintError::Timeout { .. } => (
                "Reduce search complexity or increase the timeout".to_string(),
                "# Increase the timeout or simplify the query\n\
                 safe_search(\"pattern\", timeout_seconds=60)"
                    .to_string(),
            ),
        };

        ErrorResponse {
            error_type: format!("constraint_{}", error.constraint_type()),
            summary: format!("Constraint violation: {error}"),
            fix_suggestion: FixSuggestion {
                summary: suggestion,
                code_example: example,
                alternative_approaches: vec![
                    "Use area_selector to focus the search".to_string(),
                    "Apply more specific file patterns".to_string(),
                    "Break complex queries into smaller parts".to_string(),
                ],
            },
            violation_details: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use evolvai_types::{AppliedArea, ConstraintError, QueryRouting};

    use super::Feedback;

    fn routing_with_applied(applied: Vec<AppliedArea>) -> QueryRouting {
        QueryRouting {
            areas: Vec::new(),
            applied_areas: applied,
            final_patterns: vec!["**/*.go".to_string()],
            query: "handler".to_string(),
        }
    }

    #[test]
    fn report_aggregates_coverage_and_performance() {
        let mut a = AppliedArea::allocated("backend-go", 30, 2);
        a.scanned_files = 20;
        a.match_count = 5;
        a.duration_ms = 12.0;
        let mut b = AppliedArea::allocated("frontend-ts", 20, 0);
        b.scanned_files = 5;
        b.match_count = 0;
        b.duration_ms = 3.0;

        let feedback = Feedback::new();
        let report = feedback.execution_report(&routing_with_applied(vec![a, b]), 20.0);

        assert_eq!(report.total_results, 5);
        assert_eq!(report.performance.total_files_scanned, 25);
        assert_eq!(report.performance.areas_processed, 2);
        assert!((report.performance.efficiency_score - 20.0).abs() < 1e-9);
        assert_eq!(report.coverage["backend-go"].found, 5);
        assert_eq!(report.applied_patterns, vec!["**/*.go"]);
    }

    #[test]
    fn empty_scan_has_zero_efficiency() {
        let feedback = Feedback::new();
        let report = feedback.execution_report(&routing_with_applied(vec![]), 1.0);
        assert!((report.performance.efficiency_score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn file_limit_envelope_carries_details() {
        let feedback = Feedback::new();
        let err = ConstraintError::FileLimitExceeded {
            files_processed: 60,
            max_files: 50,
        };
        let envelope = feedback.constraint_violation(&err);
        assert_eq!(envelope.error_type, "constraint_file_limit");
        let details = envelope.violation_details.unwrap();
        assert_eq!(details["files_processed"], 60);
        assert_eq!(details["max_files"], 50);
        assert!(envelope.fix_suggestion.summary.contains("50"));
    }

    #[test]
    fn timeout_envelope_suggests_longer_timeout() {
        let feedback = Feedback::new();
        let err = ConstraintError::Timeout {
            elapsed: Duration::from_secs(31),
            limit: Duration::from_secs(30),
        };
        let envelope = feedback.constraint_violation(&err);
        assert_eq!(envelope.error_type, "constraint_timeout");
        assert!(envelope.fix_suggestion.code_example.contains("timeout_seconds"));
    }

    #[test]
    fn business_conflict_keeps_fixed_shape() {
        let feedback = Feedback::new();
        let envelope = feedback.business_conflict("pattern '.*' matches everything");
        assert_eq!(envelope.error_type, "business_conflict");
        assert!(envelope.summary.contains("Business rule violation"));
        assert_eq!(envelope.fix_suggestion.alternative_approaches.len(), 3);
        assert!(envelope.violation_details.is_none());
    }

    #[test]
    fn envelopes_serialize_without_null_details() {
        let feedback = Feedback::new();
        let json = serde_json::to_string(&feedback.error("search_error", "boom")).unwrap();
        assert!(!json.contains("violation_details"));
        assert!(json.contains("fix_suggestion"));
    }
}

//! Project area model: detected regions, per-query budget decisions,
//! and the routing envelope that ties them together.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How sure the detector is about an area.
///
/// Ordered: `VeryHigh > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::Low => "Low",
            Confidence::Medium => "Medium",
            Confidence::High => "High",
            Confidence::VeryHigh => "VeryHigh",
        };
        f.write_str(label)
    }
}

/// A contiguous region of the repository associated with one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectArea {
    /// e.g. `go-area`, `typescript-frontend`, `detected-python`.
    pub name: String,
    pub language: String,
    pub root_path: String,
    pub confidence: Confidence,
    /// What the detector saw: sentinel file names or sampling notes.
    pub evidence: Vec<String>,
    /// Globs that select this area's files, e.g. `*.go`.
    pub include_globs: Vec<String>,
    /// Globs downstream search should skip.
    pub exclude_globs: Vec<String>,
}

/// Per-query budget decision for one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedArea {
    pub name: String,
    /// File quota assigned by the router.
    pub budget_files: u32,
    /// Files actually scanned (filled in by the search executor).
    pub scanned_files: u32,
    pub match_count: u32,
    pub duration_ms: f64,
    pub score: u32,
}

impl AppliedArea {
    /// A fresh allocation: quota assigned, nothing scanned yet.
    #[must_use]
    pub fn allocated(name: impl Into<String>, budget_files: u32, score: u32) -> Self {
        Self {
            name: name.into(),
            budget_files,
            scanned_files: 0,
            match_count: 0,
            duration_ms: 0.0,
            score,
        }
    }
}

/// The router's full answer for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRouting {
    pub areas: Vec<ProjectArea>,
    pub applied_areas: Vec<AppliedArea>,
    /// Search patterns derived from the applied areas, e.g. `**/*.go`.
    pub final_patterns: Vec<String>,
    pub query: String,
}

#[cfg(test)]
mod tests {
    use super::{AppliedArea, Confidence};

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::VeryHigh > Confidence::High);
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn confidence_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Confidence::VeryHigh).unwrap(),
            "\"very_high\""
        );
    }

    #[test]
    fn allocated_starts_unscanned() {
        let applied = AppliedArea::allocated("go-area", 37, 2);
        assert_eq!(applied.budget_files, 37);
        assert_eq!(applied.scanned_files, 0);
        assert_eq!(applied.match_count, 0);
    }
}

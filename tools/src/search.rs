//! Safe search wrapper: area detection, query routing, budget-capped
//! scanning, and an execution report the assistant can reason about.
//!
//! The wrapper never fails with a bare error: every failure is wrapped in
//! the feedback system's envelope so the caller always receives the same
//! shape.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use evolvai_types::{Confidence, ConstraintError, ExecutionPlan, ProjectArea};

use crate::detector::{AreaDetector, IGNORED_DIRS, include_globs_for};
use crate::feedback::{ErrorResponse, ExecutionReport, Feedback};
use crate::router::{DEFAULT_TOTAL_BUDGET, QueryRouter};

/// Bare catch-all patterns that waste the whole budget.
const CATCH_ALL_QUERIES: &[&str] = &[".*", "*", "**/*", ".+"];

/// Tuning knobs for the search wrapper.
#[derive(Debug, Clone)]
pub struct SafeSearchConfig {
    pub default_max_files: u32,
    pub default_max_results: usize,
    pub default_timeout: Duration,
    pub max_file_size_bytes: u64,
    pub sample_limit: usize,
}

impl Default for SafeSearchConfig {
    fn default() -> Self {
        Self {
            default_max_files: DEFAULT_TOTAL_BUDGET,
            default_max_results: 100,
            default_timeout: Duration::from_secs(30),
            max_file_size_bytes: 2_000_000,
            sample_limit: crate::detector::DEFAULT_SAMPLE_LIMIT,
        }
    }
}

/// How aggressively to spend the file budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Conservative,
    #[default]
    Balanced,
    Broad,
}

impl SearchMode {
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            SearchMode::Conservative => 0.6,
            SearchMode::Balanced => 1.0,
            SearchMode::Broad => 1.5,
        }
    }

    /// Parse a mode name; unknown names fall back to balanced.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "conservative" => SearchMode::Conservative,
            "broad" => SearchMode::Broad,
            _ => SearchMode::Balanced,
        }
    }
}

/// Explicitly configured area, bypassing detection.
#[derive(Debug, Clone)]
pub struct AreaDefinition {
    pub name: String,
    pub language: String,
    pub root: Option<String>,
    pub include_globs: Option<Vec<String>>,
}

/// Per-call options. `Default` matches the config defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub max_files: Option<u32>,
    pub max_results: Option<usize>,
    pub timeout: Option<Duration>,
    pub execution_plan: Option<ExecutionPlan>,
    /// Substring filter on area names; `None` means all areas.
    pub area_selector: Option<String>,
    pub include_areas: Option<Vec<AreaDefinition>>,
    pub mode: SearchMode,
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line_number: usize,
    pub line: String,
}

/// Search result envelope: either a filled execution report or an error
/// response, never both.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub query: String,
    pub total_results: u32,
    pub execution_report: ExecutionReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub raw_results: Vec<SearchMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl SearchOutcome {
    fn failure(query: &str, error: ErrorResponse) -> Self {
        Self {
            success: false,
            query: query.to_string(),
            total_results: 0,
            execution_report: ExecutionReport::empty(),
            raw_results: Vec::new(),
            error: Some(error),
        }
    }
}

/// The safe-search wrapper. Owns its detector (and therefore the area
/// cache), router, and feedback generator.
pub struct SafeSearch {
    project_root: PathBuf,
    detector: AreaDetector,
    router: QueryRouter,
    feedback: Feedback,
    config: SafeSearchConfig,
}

impl SafeSearch {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self::with_config(project_root, SafeSearchConfig::default())
    }

    #[must_use]
    pub fn with_config(project_root: impl Into<PathBuf>, config: SafeSearchConfig) -> Self {
        let project_root = project_root.into();
        Self {
            detector: AreaDetector::new(&project_root),
            project_root,
            router: QueryRouter::new(),
            feedback: Feedback::new(),
            config,
        }
    }

    /// Run a budget-capped search for `query`.
    pub fn search(&mut self, query: &str, options: &SearchOptions) -> SearchOutcome {
        let start = Instant::now();

        if query.trim().is_empty() {
            return SearchOutcome::failure(
                query,
                self.feedback.error("invalid_query", "query must not be empty"),
            );
        }
        if CATCH_ALL_QUERIES.contains(&query.trim()) {
            return SearchOutcome::failure(
                query,
                self.feedback.business_conflict(&format!(
                    "pattern '{query}' matches everything; use a specific pattern"
                )),
            );
        }

        // Area detection, or explicit definitions when supplied.
        let mut areas = match &options.include_areas {
            Some(definitions) => self.areas_from_definitions(definitions),
            None => self.detector.detect_areas(self.config.sample_limit),
        };
        if areas.is_empty() {
            return SearchOutcome::failure(
                query,
                self.feedback
                    .error("no_areas_detected", "no project areas could be detected"),
            );
        }

        if let Some(selector) = options.area_selector.as_deref() {
            let lowered = selector.to_lowercase();
            if lowered != "auto" {
                areas.retain(|area| area.name.to_lowercase().contains(&lowered));
                if areas.is_empty() {
                    return SearchOutcome::failure(
                        query,
                        self.feedback.error(
                            "no_matching_areas",
                            &format!("no areas matching selector '{selector}'"),
                        ),
                    );
                }
            }
        }

        // Budget allocation: mode scales the requested ceiling.
        let max_files = options.max_files.unwrap_or(self.config.default_max_files);
        let budget = ((f64::from(max_files) * options.mode.multiplier()).round() as u32).max(1);
        let mut routing = self.router.route_query(query, &areas, budget);

        // Scan each applied area within its budget.
        let max_results = options
            .max_results
            .unwrap_or(self.config.default_max_results);
        let timeout = options
            .execution_plan
            .as_ref()
            .map(|p| Duration::from_secs(p.limits.timeout_seconds()))
            .or(options.timeout)
            .unwrap_or(self.config.default_timeout);
        let scan_cap = options
            .execution_plan
            .as_ref()
            .map(|p| u64::from(p.limits.max_files()));

        let Ok(matcher) = build_matcher(query) else {
            return SearchOutcome::failure(
                query,
                self.feedback
                    .error("invalid_query", "query is not a valid pattern"),
            );
        };

        let mut raw_results = Vec::new();
        let mut total_scanned: u64 = 0;
        for applied in &mut routing.applied_areas {
            let Some(area) = areas.iter().find(|a| a.name == applied.name) else {
                continue;
            };
            let area_start = Instant::now();
            let scan = scan_area(
                area,
                applied.budget_files,
                &matcher,
                self.config.max_file_size_bytes,
                max_results.saturating_sub(raw_results.len()),
            );
            applied.scanned_files = scan.scanned;
            applied.match_count = scan.matches;
            applied.duration_ms = area_start.elapsed().as_secs_f64() * 1000.0;
            raw_results.extend(scan.results);

            total_scanned += u64::from(scan.scanned);
            if let Some(cap) = scan_cap {
                if total_scanned > cap {
                    return SearchOutcome::failure(
                        query,
                        self.feedback
                            .constraint_violation(&ConstraintError::FileLimitExceeded {
                                files_processed: total_scanned,
                                max_files: cap as u32,
                            }),
                    );
                }
            }
            let elapsed = start.elapsed();
            if elapsed > timeout {
                return SearchOutcome::failure(
                    query,
                    self.feedback
                        .constraint_violation(&ConstraintError::Timeout {
                            elapsed,
                            limit: timeout,
                        }),
                );
            }
        }

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let report = self.feedback.execution_report(&routing, execution_time_ms);
        debug!(
            query,
            total_results = report.total_results,
            scanned = report.performance.total_files_scanned,
            "search completed"
        );

        SearchOutcome {
            success: true,
            query: query.to_string(),
            total_results: report.total_results,
            execution_report: report,
            raw_results,
            error: None,
        }
    }

    fn areas_from_definitions(&self, definitions: &[AreaDefinition]) -> Vec<ProjectArea> {
        definitions
            .iter()
            .map(|def| ProjectArea {
                name: def.name.clone(),
                language: def.language.clone(),
                root_path: def
                    .root
                    .clone()
                    .unwrap_or_else(|| self.project_root.to_string_lossy().to_string()),
                confidence: Confidence::VeryHigh,
                evidence: vec!["explicit configuration".to_string()],
                include_globs: def
                    .include_globs
                    .clone()
                    .unwrap_or_else(|| include_globs_for(&def.language)),
                exclude_globs: IGNORED_DIRS.iter().map(|d| format!("**/{d}/**")).collect(),
            })
            .collect()
    }
}

struct AreaScan {
    scanned: u32,
    matches: u32,
    results: Vec<SearchMatch>,
}

/// Scan up to `budget_files` files in the area, collecting line matches.
fn scan_area(
    area: &ProjectArea,
    budget_files: u32,
    matcher: &Regex,
    max_file_size: u64,
    results_remaining: usize,
) -> AreaScan {
    let mut scan = AreaScan {
        scanned: 0,
        matches: 0,
        results: Vec::new(),
    };
    if budget_files == 0 {
        return scan;
    }
    let Ok(include) = build_name_globs(&area.include_globs) else {
        return scan;
    };
    let root = Path::new(&area.root_path);

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_some_and(|t| t.is_dir()) && IGNORED_DIRS.contains(&name.as_ref()))
        })
        .build();

    for entry in walker.flatten() {
        if scan.scanned >= budget_files {
            break;
        }
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !include.is_match(file_name.as_ref()) {
            continue;
        }
        if entry
            .metadata()
            .map(|m| m.len() > max_file_size)
            .unwrap_or(true)
        {
            continue;
        }

        scan.scanned += 1;
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (i, line) in content.lines().enumerate() {
            if matcher.is_match(line) {
                scan.matches += 1;
                if scan.results.len() < results_remaining {
                    scan.results.push(SearchMatch {
                        file: entry.path().to_string_lossy().to_string(),
                        line_number: i + 1,
                        line: line.to_string(),
                    });
                }
            }
        }
    }
    scan
}

/// Case-insensitive matcher from the query: a regex when it parses, the
/// escaped literal otherwise.
fn build_matcher(query: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?i){query}")).or_else(|_| Regex::new(&format!("(?i){}", regex::escape(query))))
}

fn build_name_globs(globs: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob)?);
    }
    builder.build()
}

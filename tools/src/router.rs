//! Query routing: keyword scoring per area and exact-sum budget allocation.
//!
//! Areas with the top score form the primary pool (75% of the budget);
//! lower-scoring areas split most of the remainder; unscored areas get a
//! small floor. The allocated budgets always sum exactly to
//! `total_budget`.

use std::collections::HashSet;

use evolvai_types::{AppliedArea, ProjectArea, QueryRouting};

/// Closed keyword dictionary. Areas whose names are absent score zero.
const AREA_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "backend-go",
        &[
            "goroutine",
            "context",
            "gin",
            "echo",
            "grpc",
            "handler",
            "repository",
            "service",
            "middleware",
            "interface",
            "struct",
            "func",
            "go",
            "golang",
        ],
    ),
    (
        "frontend-ts",
        &[
            "react",
            "component",
            "hook",
            "tsx",
            "vite",
            "next",
            "webpack",
            "usestate",
            "useeffect",
            "typescript",
            "interface",
            "type",
            "enum",
        ],
    ),
    (
        "ruby",
        &[
            "rails",
            "active_record",
            "controller",
            "model",
            "view",
            "erb",
            "rake",
            "gem",
            "ruby",
        ],
    ),
    (
        "python",
        &[
            "django",
            "flask",
            "fastapi",
            "pydantic",
            "asyncio",
            "class",
            "def",
            "import",
            "python",
        ],
    ),
];

/// Share of the budget reserved for the top-scoring areas.
const PRIMARY_SHARE_NUM: u32 = 3;
const PRIMARY_SHARE_DEN: u32 = 4;

/// Floor assigned to unscored areas when scored areas absorb the rest.
const UNSCORED_FLOOR: u32 = 2;

pub const DEFAULT_TOTAL_BUDGET: u32 = 50;

/// Routes queries to areas and allocates per-area file budgets.
#[derive(Debug, Default)]
pub struct QueryRouter;

impl QueryRouter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Score each area against the query and allocate `total_budget` files.
    #[must_use]
    pub fn route_query(
        &self,
        query: &str,
        areas: &[ProjectArea],
        total_budget: u32,
    ) -> QueryRouting {
        let query_lower = query.to_lowercase();
        let scores: Vec<u32> = areas
            .iter()
            .map(|area| keyword_score(&query_lower, &area.name))
            .collect();

        let applied_areas = allocate_budget(areas, &scores, total_budget);
        let final_patterns = generate_search_patterns(&applied_areas);

        QueryRouting {
            areas: areas.to_vec(),
            applied_areas,
            final_patterns,
            query: query.to_string(),
        }
    }
}

/// Count whitespace-separated query tokens present in the area's keyword
/// set. Zero for areas outside the dictionary.
fn keyword_score(query_lower: &str, area_name: &str) -> u32 {
    let Some((_, keywords)) = AREA_KEYWORDS.iter().find(|(name, _)| *name == area_name) else {
        return 0;
    };
    query_lower
        .split_whitespace()
        .filter(|token| keywords.contains(token))
        .count() as u32
}

fn allocate_budget(areas: &[ProjectArea], scores: &[u32], total_budget: u32) -> Vec<AppliedArea> {
    if areas.is_empty() {
        return Vec::new();
    }

    let max_score = scores.iter().copied().max().unwrap_or(0);

    // No keyword matched anywhere: divide evenly.
    if max_score == 0 {
        return split_evenly(
            areas.iter().map(|a| (a.name.as_str(), 0)).collect(),
            total_budget,
        );
    }

    let mut primaries: Vec<(&str, u32)> = Vec::new();
    let mut secondaries: Vec<(&str, u32)> = Vec::new();
    let mut unscored: Vec<(&str, u32)> = Vec::new();
    for (area, &score) in areas.iter().zip(scores) {
        if score == max_score {
            primaries.push((area.name.as_str(), score));
        } else if score > 0 {
            secondaries.push((area.name.as_str(), score));
        } else {
            unscored.push((area.name.as_str(), 0));
        }
    }

    // Primaries alone absorb everything.
    if secondaries.is_empty() && unscored.is_empty() {
        return split_evenly(primaries, total_budget);
    }

    let primary_pool = total_budget * PRIMARY_SHARE_NUM / PRIMARY_SHARE_DEN;
    let rest = total_budget - primary_pool;

    let mut applied = split_evenly(primaries, primary_pool);

    if secondaries.is_empty() {
        // Unscored areas split the whole remainder so the sum stays exact.
        applied.extend(split_evenly(unscored, rest));
    } else {
        // Unscored areas get a fixed floor, capped so every secondary still
        // receives at least one file.
        let floor_total = (UNSCORED_FLOOR * unscored.len() as u32)
            .min(rest.saturating_sub(secondaries.len() as u32));
        let secondary_pool = rest - floor_total;
        applied.extend(split_evenly(secondaries, secondary_pool));
        applied.extend(split_evenly(unscored, floor_total));
    }

    applied
}

/// Divide `pool` equally, spreading the remainder one-per-area in order.
fn split_evenly(areas: Vec<(&str, u32)>, pool: u32) -> Vec<AppliedArea> {
    if areas.is_empty() {
        return Vec::new();
    }
    let n = areas.len() as u32;
    let per_area = pool / n;
    let remainder = pool % n;

    areas
        .into_iter()
        .enumerate()
        .map(|(i, (name, score))| {
            let extra = u32::from((i as u32) < remainder);
            AppliedArea::allocated(name, per_area + extra, score)
        })
        .collect()
}

/// Derive search patterns from applied area names, deduplicated in order.
fn generate_search_patterns(applied: &[AppliedArea]) -> Vec<String> {
    let mut patterns = Vec::new();
    let mut seen = HashSet::new();
    for area in applied {
        let name = area.name.to_lowercase();
        let derived: &[&str] = if name.contains("backend") || name.contains("go") {
            &["**/*.go"]
        } else if name.contains("frontend") || name.contains("ts") {
            &["**/*.ts", "**/*.tsx"]
        } else if name.contains("ruby") {
            &["**/*.rb", "**/*.erb"]
        } else if name.contains("python") || name.contains("py") {
            &["**/*.py"]
        } else {
            &["**/*"]
        };
        for pattern in derived {
            if seen.insert(*pattern) {
                patterns.push((*pattern).to_string());
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use evolvai_types::{Confidence, ProjectArea};

    use super::{DEFAULT_TOTAL_BUDGET, QueryRouter};

    fn area(name: &str, language: &str) -> ProjectArea {
        ProjectArea {
            name: name.to_string(),
            language: language.to_string(),
            root_path: ".".to_string(),
            confidence: Confidence::High,
            evidence: vec![],
            include_globs: vec![],
            exclude_globs: vec![],
        }
    }

    fn budgets(routing: &evolvai_types::QueryRouting) -> Vec<(String, u32)> {
        routing
            .applied_areas
            .iter()
            .map(|a| (a.name.clone(), a.budget_files))
            .collect()
    }

    #[test]
    fn react_query_favors_frontend() {
        let router = QueryRouter::new();
        let areas = vec![area("backend-go", "go"), area("frontend-ts", "typescript")];
        let routing = router.route_query("find React login component", &areas, DEFAULT_TOTAL_BUDGET);

        let allocated = budgets(&routing);
        let frontend = allocated.iter().find(|(n, _)| n == "frontend-ts").unwrap().1;
        let backend = allocated.iter().find(|(n, _)| n == "backend-go").unwrap().1;

        assert!(frontend >= 35, "frontend got {frontend}");
        assert!(backend <= 15, "backend got {backend}");
        assert_eq!(frontend + backend, DEFAULT_TOTAL_BUDGET);
    }

    #[test]
    fn budgets_always_sum_to_total() {
        let router = QueryRouter::new();
        let cases: Vec<(Vec<ProjectArea>, &str)> = vec![
            (
                vec![area("backend-go", "go"), area("frontend-ts", "typescript")],
                "react component",
            ),
            (
                vec![
                    area("backend-go", "go"),
                    area("frontend-ts", "typescript"),
                    area("ruby", "ruby"),
                    area("unknown-area", "unknown"),
                ],
                "react component handler rails",
            ),
            (
                vec![area("unknown-area", "unknown"), area("other", "text")],
                "nothing matches here",
            ),
            (vec![area("backend-go", "go")], "goroutine handler"),
        ];

        for total in [7u32, 13, 50, 100] {
            for (areas, query) in &cases {
                let routing = router.route_query(query, areas, total);
                let sum: u32 = routing.applied_areas.iter().map(|a| a.budget_files).sum();
                assert_eq!(sum, total, "query={query} total={total}");
                assert_eq!(routing.applied_areas.len(), areas.len());
            }
        }
    }

    #[test]
    fn zero_scores_split_evenly_with_remainder_spread() {
        let router = QueryRouter::new();
        let areas = vec![
            area("alpha", "unknown"),
            area("beta", "unknown"),
            area("gamma", "unknown"),
        ];
        let routing = router.route_query("no keywords at all", &areas, 50);
        let allocated: Vec<u32> = routing.applied_areas.iter().map(|a| a.budget_files).collect();
        assert_eq!(allocated, vec![17, 17, 16]);
    }

    #[test]
    fn tied_primaries_share_the_primary_pool() {
        let router = QueryRouter::new();
        let areas = vec![
            area("backend-go", "go"),
            area("frontend-ts", "typescript"),
            area("unknown-area", "unknown"),
        ];
        // "interface" appears in both go and ts keyword sets: scores tie at 1.
        let routing = router.route_query("interface", &areas, 50);

        let allocated = budgets(&routing);
        let go = allocated.iter().find(|(n, _)| n == "backend-go").unwrap().1;
        let ts = allocated.iter().find(|(n, _)| n == "frontend-ts").unwrap().1;
        let unknown = allocated.iter().find(|(n, _)| n == "unknown-area").unwrap().1;

        assert_eq!(go + ts, 37); // floor(50 * 0.75) split across the tie
        assert!(go.abs_diff(ts) <= 1);
        assert_eq!(unknown, 13);
    }

    #[test]
    fn secondary_areas_split_remainder_after_unscored_floor() {
        let router = QueryRouter::new();
        let areas = vec![
            area("backend-go", "go"),
            area("ruby", "ruby"),
            area("unknown-area", "unknown"),
        ];
        // go scores 2 ("goroutine handler"), ruby scores 1 ("rails").
        let routing = router.route_query("goroutine handler rails", &areas, 50);

        let allocated = budgets(&routing);
        let go = allocated.iter().find(|(n, _)| n == "backend-go").unwrap().1;
        let ruby = allocated.iter().find(|(n, _)| n == "ruby").unwrap().1;
        let unknown = allocated.iter().find(|(n, _)| n == "unknown-area").unwrap().1;

        assert_eq!(go, 37);
        assert_eq!(ruby, 11);
        assert_eq!(unknown, 2);
    }

    #[test]
    fn scores_are_recorded_on_applied_areas() {
        let router = QueryRouter::new();
        let areas = vec![area("python", "python"), area("ruby", "ruby")];
        let routing = router.route_query("django pydantic rails", &areas, 50);

        let python = routing
            .applied_areas
            .iter()
            .find(|a| a.name == "python")
            .unwrap();
        let ruby = routing.applied_areas.iter().find(|a| a.name == "ruby").unwrap();
        assert_eq!(python.score, 2);
        assert_eq!(ruby.score, 1);
    }

    #[test]
    fn patterns_derived_from_area_names() {
        let router = QueryRouter::new();
        let areas = vec![
            area("backend-go", "go"),
            area("frontend-ts", "typescript"),
            area("unknown-area", "unknown"),
        ];
        let routing = router.route_query("react component", &areas, 50);

        assert!(routing.final_patterns.contains(&"**/*.ts".to_string()));
        assert!(routing.final_patterns.contains(&"**/*.tsx".to_string()));
        assert!(routing.final_patterns.contains(&"**/*.go".to_string()));
        assert!(routing.final_patterns.contains(&"**/*".to_string()));
    }

    #[test]
    fn empty_area_list_yields_empty_routing() {
        let router = QueryRouter::new();
        let routing = router.route_query("anything", &[], 50);
        assert!(routing.applied_areas.is_empty());
        assert!(routing.final_patterns.is_empty());
    }

    #[test]
    fn scoring_is_case_insensitive_on_the_query() {
        let router = QueryRouter::new();
        let areas = vec![area("frontend-ts", "typescript"), area("other", "unknown")];
        let routing = router.route_query("REACT Component", &areas, 50);
        let frontend = routing
            .applied_areas
            .iter()
            .find(|a| a.name == "frontend-ts")
            .unwrap();
        assert_eq!(frontend.score, 2);
    }
}

//! Zero-cost project area detection.
//!
//! Three-layer cascade, first non-empty layer wins:
//! 1. explicit configuration (reserved),
//! 2. sentinel-file scan of the root and immediate subdirectories,
//! 3. lightweight extension sampling capped at `sample_limit` files.
//!
//! Results are cached per `(project_root, sample_limit)`; the cache is
//! write-once, so a second call performs no filesystem IO.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

use evolvai_types::{Confidence, ProjectArea};

/// Directories skipped during sampling, in addition to dot-directories.
pub const IGNORED_DIRS: &[&str] = &["node_modules", "vendor", "target", "build", "__pycache__"];

/// Sentinel files and directories per language, scanned in this order.
/// Entries of the form `*.ext` match by extension.
const SENTINELS: &[(&str, &[&str])] = &[
    (
        "go",
        &["go.mod", "Makefile", "CMakeLists.txt", "src", "internal", "cmd"],
    ),
    ("ruby", &["Gemfile", "Rakefile", ".ruby-version", "*.gemspec"]),
    ("typescript", &["package.json", "tsconfig.json"]),
    ("python", &["pyproject.toml", "requirements.txt", "setup.py"]),
];

/// Extensions counted during sampling, per language.
const SAMPLING_EXTENSIONS: &[(&str, &[&str])] = &[
    ("go", &["go"]),
    ("python", &["py"]),
    ("typescript", &["ts", "tsx"]),
    ("ruby", &["rb"]),
    ("javascript", &["js", "jsx"]),
];

pub const DEFAULT_SAMPLE_LIMIT: usize = 200;

/// Project-layout classifier with a write-once result cache.
pub struct AreaDetector {
    project_root: PathBuf,
    cache: HashMap<usize, Vec<ProjectArea>>,
}

impl AreaDetector {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            cache: HashMap::new(),
        }
    }

    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Whether a result is already cached for this sample limit.
    #[must_use]
    pub fn cache_status(&self, sample_limit: usize) -> &'static str {
        if self.cache.contains_key(&sample_limit) {
            "hit"
        } else {
            "miss"
        }
    }

    /// Detect project areas, serving from the cache when possible.
    pub fn detect_areas(&mut self, sample_limit: usize) -> Vec<ProjectArea> {
        if let Some(cached) = self.cache.get(&sample_limit) {
            return cached.clone();
        }

        let areas = self
            .explicit_config()
            .or_else(|| self.match_sentinel_files())
            .unwrap_or_else(|| self.lightweight_sampling(sample_limit));

        debug!(
            root = %self.project_root.display(),
            count = areas.len(),
            "detected project areas"
        );
        self.cache.insert(sample_limit, areas.clone());
        areas
    }

    /// Layer 1: explicit project configuration. Reserved extension point.
    #[allow(clippy::unused_self)]
    fn explicit_config(&self) -> Option<Vec<ProjectArea>> {
        None
    }

    /// Layer 2: sentinel files in the root and immediate subdirectories.
    fn match_sentinel_files(&self) -> Option<Vec<ProjectArea>> {
        let root_names = list_names(&self.project_root)?;
        let mut areas = Vec::new();

        for (language, sentinels) in SENTINELS {
            let evidence = collect_evidence(&root_names, sentinels);
            if !evidence.is_empty() {
                areas.push(self.area(
                    format!("{language}-area"),
                    language,
                    &self.project_root,
                    evidence,
                ));
            }
        }

        // Mixed projects: one language per immediate subdirectory.
        if let Ok(entries) = fs::read_dir(&self.project_root) {
            let mut subdirs: Vec<PathBuf> = entries
                .flatten()
                .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| !n.starts_with('.'))
                })
                .collect();
            subdirs.sort();

            for subdir in subdirs {
                let Some(sub_names) = list_names(&subdir) else {
                    continue;
                };
                for (language, sentinels) in SENTINELS {
                    let evidence = collect_evidence(&sub_names, sentinels);
                    if !evidence.is_empty() {
                        let dir_name = subdir
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        areas.push(self.area(
                            format!("{language}-{dir_name}"),
                            language,
                            &subdir,
                            evidence,
                        ));
                        break; // first matching language per directory
                    }
                }
            }
        }

        if areas.is_empty() { None } else { Some(areas) }
    }

    /// Layer 3: count recognised file extensions until `sample_limit`.
    fn lightweight_sampling(&self, sample_limit: usize) -> Vec<ProjectArea> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut total = 0usize;

        let walker = WalkBuilder::new(&self.project_root)
            .standard_filters(false)
            .hidden(true)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|t| t.is_dir())
                    && IGNORED_DIRS.contains(&name.as_ref()))
            })
            .build();

        for entry in walker.flatten() {
            if total >= sample_limit {
                break;
            }
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let ext = ext.to_lowercase();
            for (language, extensions) in SAMPLING_EXTENSIONS {
                if extensions.contains(&ext.as_str()) {
                    *counts.entry(*language).or_insert(0) += 1;
                    total += 1;
                    break;
                }
            }
        }

        let mut areas = Vec::new();
        for (language, _) in SAMPLING_EXTENSIONS {
            let Some(&count) = counts.get(language) else {
                continue;
            };
            let confidence = if count > 10 {
                Confidence::High
            } else if count > 3 {
                Confidence::Medium
            } else {
                Confidence::Low
            };
            let mut area = self.area(
                format!("detected-{language}"),
                language,
                &self.project_root,
                vec![format!("sampled {count} files")],
            );
            area.confidence = confidence;
            areas.push(area);
        }

        if areas.is_empty() {
            let mut unknown = self.area(
                "unknown-area".to_string(),
                "unknown",
                &self.project_root,
                vec!["no recognizable files found".to_string()],
            );
            unknown.confidence = Confidence::Low;
            unknown.include_globs = vec!["*".to_string()];
            areas.push(unknown);
        }
        areas
    }

    fn area(
        &self,
        name: String,
        language: &str,
        root: &Path,
        evidence: Vec<String>,
    ) -> ProjectArea {
        ProjectArea {
            name,
            language: language.to_string(),
            root_path: root.to_string_lossy().to_string(),
            confidence: Confidence::High,
            evidence,
            include_globs: include_globs_for(language),
            exclude_globs: IGNORED_DIRS
                .iter()
                .map(|d| format!("**/{d}/**"))
                .collect(),
        }
    }
}

/// Language-appropriate include globs.
#[must_use]
pub fn include_globs_for(language: &str) -> Vec<String> {
    let globs: &[&str] = match language {
        "go" => &["*.go"],
        "ruby" => &["*.rb", "*.erb"],
        "typescript" => &["*.ts", "*.tsx"],
        "python" => &["*.py"],
        "javascript" => &["*.js", "*.jsx"],
        _ => return vec![format!("*.{language}")],
    };
    globs.iter().map(|g| (*g).to_string()).collect()
}

fn list_names(dir: &Path) -> Option<Vec<String>> {
    let entries = fs::read_dir(dir).ok()?;
    Some(
        entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
    )
}

fn collect_evidence(names: &[String], sentinels: &[&str]) -> Vec<String> {
    let mut evidence = Vec::new();
    for sentinel in sentinels {
        if let Some(ext) = sentinel.strip_prefix("*.") {
            evidence.extend(
                names
                    .iter()
                    .filter(|n| n.ends_with(&format!(".{ext}")))
                    .cloned(),
            );
        } else if names.iter().any(|n| n == sentinel) {
            evidence.push((*sentinel).to_string());
        }
    }
    evidence
}

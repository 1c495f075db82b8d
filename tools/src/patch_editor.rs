//! Patch-first editor: propose → store → validate → apply.
//!
//! `propose_edit` materialises an edit as a stored unified diff without
//! touching the source tree. `apply_edit` replays the stored edit in an
//! isolated worktree, enforces the execution plan's limits, and promotes
//! the result with write-temp-then-rename so each file transitions
//! atomically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use evolvai_types::{ConstraintError, ExecutionPlan};
use evolvai_utils::{atomic_write, compute_diff_stats, count_diff_changes, unified_diff};

/// Process-wide counter distinguishing editor instances in patch ids.
static EDITOR_NONCE: AtomicU64 = AtomicU64::new(1);

/// Directories never considered part of the editable tree.
const IGNORED_DIRS: &[&str] = &["node_modules", "vendor", "target", "build", "__pycache__"];

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch not found: {patch_id}")]
    NotFound { patch_id: String },
    #[error("patch conflict in {file}: {reason}")]
    Conflict { file: String, reason: String },
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("invalid scope '{scope}': {message}")]
    InvalidScope { scope: String, message: String },
    #[error("no files match scope '{scope}'")]
    NoFilesInScope { scope: String },
    #[error("no changes: pattern '{pattern}' left every file in scope unchanged")]
    NoChanges { pattern: String },
}

// ── Results ──────────────────────────────────────────────────

/// What the edit would do, summarised for the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchStatistics {
    pub files_modified: usize,
    /// Sum of added and removed line counts across all files.
    pub lines_changed: u64,
    pub pattern: String,
    pub replacement: String,
}

/// Inputs the patch was proposed from; replayed at apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMetadata {
    pub pattern: String,
    pub replacement: String,
    pub scope: String,
}

/// Result of `propose_edit`. The source tree is unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalResult {
    pub patch_id: String,
    pub unified_diff: String,
    /// Paths relative to the project root.
    pub affected_files: Vec<String>,
    pub statistics: PatchStatistics,
    pub created_at: DateTime<Utc>,
    pub metadata: PatchMetadata,
}

/// Result of `apply_edit`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    pub modified_files: Vec<String>,
    /// Where the isolated apply ran, kept for tracing. The directory
    /// itself is destroyed before this result is returned.
    pub worktree_path: Option<String>,
    pub audit_log_id: Option<String>,
    pub error_message: Option<String>,
}

/// Stored proposal, keyed by patch id. Process-local, not persisted.
#[derive(Debug, Clone)]
struct PatchContent {
    unified_diff: String,
    affected_files: Vec<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    metadata: PatchMetadata,
}

// ── Editor ───────────────────────────────────────────────────

/// The patch-first editor. Owns the patch store.
pub struct PatchEditor {
    project_root: PathBuf,
    store: HashMap<String, PatchContent>,
    nonce: u64,
    sequence: u64,
}

impl PatchEditor {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            store: HashMap::new(),
            nonce: EDITOR_NONCE.fetch_add(1, Ordering::Relaxed),
            sequence: 0,
        }
    }

    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Number of stored (not yet applied) patches.
    #[must_use]
    pub fn stored_patches(&self) -> usize {
        self.store.len()
    }

    /// Generate an edit proposal without modifying any file.
    ///
    /// Enumerates files under the project root whose relative path matches
    /// `scope`, applies `pattern` → `replacement` per file, and stores the
    /// concatenated unified diff under a fresh patch id. Non-regular and
    /// non-UTF-8 files are skipped silently.
    pub fn propose_edit(
        &mut self,
        pattern: &str,
        replacement: &str,
        scope: &str,
        language: Option<&str>,
    ) -> Result<ProposalResult, PatchError> {
        let regex = Regex::new(pattern)?;
        let scope_set = build_scope_set(scope)?;
        let extensions = language.map(language_extensions);

        let candidates = self.files_in_scope(&scope_set, extensions);
        if candidates.is_empty() {
            return Err(PatchError::NoFilesInScope {
                scope: scope.to_string(),
            });
        }

        let mut combined_diff = String::new();
        let mut affected_files = Vec::new();
        let mut lines_changed: u64 = 0;

        for relative in &candidates {
            let absolute = self.project_root.join(relative);
            let Ok(original) = fs::read_to_string(&absolute) else {
                continue; // non-UTF-8 or unreadable
            };
            let replaced = regex.replace_all(&original, replacement);
            if replaced == original {
                continue;
            }

            let rel_str = relative.to_string_lossy().replace('\\', "/");
            let diff = unified_diff(&rel_str, &original, &replaced);
            if diff.is_empty() {
                continue;
            }
            let (added, removed) = compute_diff_stats(&original, &replaced);
            lines_changed += u64::from(added) + u64::from(removed);
            combined_diff.push_str(&diff);
            affected_files.push(rel_str);
        }

        if affected_files.is_empty() {
            return Err(PatchError::NoChanges {
                pattern: pattern.to_string(),
            });
        }

        let created_at = Utc::now();
        let patch_id = self.generate_patch_id(created_at);
        let metadata = PatchMetadata {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            scope: scope.to_string(),
        };

        self.store.insert(
            patch_id.clone(),
            PatchContent {
                unified_diff: combined_diff.clone(),
                affected_files: affected_files.clone(),
                created_at,
                metadata: metadata.clone(),
            },
        );
        debug!(
            %patch_id,
            files = affected_files.len(),
            lines_changed,
            "stored edit proposal"
        );

        Ok(ProposalResult {
            patch_id,
            unified_diff: combined_diff,
            statistics: PatchStatistics {
                files_modified: affected_files.len(),
                lines_changed,
                pattern: pattern.to_string(),
                replacement: replacement.to_string(),
            },
            affected_files,
            created_at,
            metadata,
        })
    }

    /// Apply a stored patch.
    ///
    /// When a plan is supplied, the affected-file count and diff change
    /// count are checked against its limits before anything runs, and the
    /// timeout is re-checked between files during staging. The edit is
    /// staged in a throwaway worktree; only on full success are files
    /// promoted into the main tree, each via write-temp-then-rename.
    pub fn apply_edit(
        &mut self,
        patch_id: &str,
        plan: Option<&ExecutionPlan>,
    ) -> Result<ApplyResult, PatchError> {
        let patch = self
            .store
            .get(patch_id)
            .cloned()
            .ok_or_else(|| PatchError::NotFound {
                patch_id: patch_id.to_string(),
            })?;

        // Plan enforcement before any filesystem work.
        if let Some(plan) = plan {
            let limits = &plan.limits;
            if patch.affected_files.len() as u64 > u64::from(limits.max_files()) {
                return Err(ConstraintError::FileLimitExceeded {
                    files_processed: patch.affected_files.len() as u64,
                    max_files: limits.max_files(),
                }
                .into());
            }
            let changes = count_diff_changes(&patch.unified_diff);
            if changes > u64::from(limits.max_changes()) {
                return Err(ConstraintError::ChangeLimitExceeded {
                    changes_made: changes,
                    max_changes: limits.max_changes(),
                }
                .into());
            }
        }

        let regex = Regex::new(&patch.metadata.pattern)?;
        let timeout = plan.map(|p| Duration::from_secs(p.limits.timeout_seconds()));
        let start = Instant::now();

        let worktree = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return Ok(ApplyResult {
                    success: false,
                    modified_files: Vec::new(),
                    worktree_path: None,
                    audit_log_id: None,
                    error_message: Some(format!("failed to create worktree: {e}")),
                });
            }
        };
        let worktree_path = worktree.path().to_string_lossy().to_string();

        // Stage: read from the main tree, replay the edit into the worktree.
        // The main tree stays untouched until every file has staged cleanly.
        let mut staged: Vec<(String, String, String)> = Vec::new(); // (rel, original, new)
        for relative in &patch.affected_files {
            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed > limit {
                    return Err(ConstraintError::Timeout {
                        elapsed,
                        limit,
                    }
                    .into());
                }
            }

            let absolute = self.project_root.join(relative);
            let original = fs::read_to_string(&absolute).map_err(|e| PatchError::Conflict {
                file: relative.clone(),
                reason: format!("cannot read file: {e}"),
            })?;
            let replaced = regex.replace_all(&original, patch.metadata.replacement.as_str());
            if replaced == original {
                return Err(PatchError::Conflict {
                    file: relative.clone(),
                    reason: "pattern no longer matches; file changed since proposal".to_string(),
                });
            }

            let staged_path = worktree.path().join(relative);
            if let Err(e) = write_staged(&staged_path, replaced.as_bytes()) {
                return Ok(ApplyResult {
                    success: false,
                    modified_files: Vec::new(),
                    worktree_path: Some(worktree_path),
                    audit_log_id: None,
                    error_message: Some(format!("failed to stage {relative}: {e}")),
                });
            }
            let new_content = replaced.into_owned();
            staged.push((relative.clone(), original, new_content));
        }

        // Promote: atomic rename per file. On a mid-promote failure, restore
        // the files already promoted so the caller sees all-or-nothing.
        let mut promoted: Vec<(String, String)> = Vec::new();
        for (relative, original, new_content) in &staged {
            let absolute = self.project_root.join(relative);
            if let Err(e) = atomic_write(&absolute, new_content.as_bytes()) {
                for (done_rel, done_original) in &promoted {
                    let done_abs = self.project_root.join(done_rel);
                    if let Err(restore_err) = atomic_write(&done_abs, done_original.as_bytes()) {
                        warn!(
                            file = %done_rel,
                            "rollback after failed promote also failed: {restore_err}"
                        );
                    }
                }
                return Ok(ApplyResult {
                    success: false,
                    modified_files: Vec::new(),
                    worktree_path: Some(worktree_path),
                    audit_log_id: None,
                    error_message: Some(format!("failed to promote {relative}: {e}")),
                });
            }
            promoted.push((relative.clone(), original.clone()));
        }

        let modified_files: Vec<String> = staged.into_iter().map(|(rel, _, _)| rel).collect();
        self.store.remove(patch_id);
        drop(worktree); // destroy the isolated copy

        Ok(ApplyResult {
            success: true,
            modified_files,
            worktree_path: Some(worktree_path),
            audit_log_id: None,
            error_message: None,
        })
    }

    /// Files under the project root whose relative path matches the scope,
    /// in sorted order.
    fn files_in_scope(
        &self,
        scope_set: &GlobSet,
        extensions: Option<&'static [&'static str]>,
    ) -> Vec<PathBuf> {
        let mut files = Vec::new();
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
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.project_root) else {
                continue;
            };
            if !scope_set.is_match(relative) {
                continue;
            }
            if let Some(exts) = extensions {
                let matches_ext = relative
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| exts.contains(&e));
                if !matches_ext {
                    continue;
                }
            }
            files.push(relative.to_path_buf());
        }
        files.sort();
        files
    }

    /// `patch_<ms_timestamp>_<8-hex-digest>`, unique within the process.
    fn generate_patch_id(&mut self, created_at: DateTime<Utc>) -> String {
        self.sequence += 1;
        let millis = created_at.timestamp_millis();
        let mut hasher = Sha256::new();
        hasher.update(format!("{millis}_{}_{}", self.nonce, self.sequence));
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        format!("patch_{millis}_{hex}")
    }
}

fn build_scope_set(scope: &str) -> Result<GlobSet, PatchError> {
    let mut builder = GlobSetBuilder::new();
    let glob = Glob::new(scope).map_err(|e| PatchError::InvalidScope {
        scope: scope.to_string(),
        message: e.to_string(),
    })?;
    builder.add(glob);
    // "src/**" should also match files directly under "src".
    if let Some(prefix) = scope.strip_suffix("/**") {
        if let Ok(exact) = Glob::new(&format!("{prefix}/*")) {
            builder.add(exact);
        }
    }
    builder.build().map_err(|e| PatchError::InvalidScope {
        scope: scope.to_string(),
        message: e.to_string(),
    })
}

fn write_staged(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

fn language_extensions(language: &str) -> &'static [&'static str] {
    match language {
        "go" => &["go"],
        "python" => &["py"],
        "typescript" => &["ts", "tsx"],
        "javascript" => &["js", "jsx"],
        "ruby" => &["rb", "erb"],
        "rust" => &["rs"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use evolvai_types::{
        ConstraintError, ExecutionLimits, ExecutionPlan, RollbackStrategy,
    };

    use super::{PatchEditor, PatchError};

    fn fixture() -> (tempfile::TempDir, PatchEditor) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/user.go"),
            "func getUserData() string { return \"user\" }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("src/auth.go"),
            "func checkAuth() bool { return true }\n",
        )
        .unwrap();
        let editor = PatchEditor::new(dir.path());
        (dir, editor)
    }

    fn plan_with_limits(max_files: u32, max_changes: u32, timeout: u64) -> ExecutionPlan {
        let mut plan = ExecutionPlan::with_rollback(RollbackStrategy::file_backup());
        plan.limits = ExecutionLimits::new(max_files, max_changes, timeout).unwrap();
        plan
    }

    #[test]
    fn propose_leaves_tree_unchanged() {
        let (dir, mut editor) = fixture();
        let before = fs::read_to_string(dir.path().join("src/user.go")).unwrap();

        let proposal = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();

        let after = fs::read_to_string(dir.path().join("src/user.go")).unwrap();
        assert_eq!(before, after);
        assert_eq!(proposal.affected_files, vec!["src/user.go"]);
        assert!(
            proposal
                .unified_diff
                .contains("-func getUserData() string { return \"user\" }")
        );
        assert!(
            proposal
                .unified_diff
                .contains("+func fetchUserData() string { return \"user\" }")
        );
        assert!(proposal.unified_diff.contains("--- a/src/user.go"));
        assert!(proposal.unified_diff.contains("+++ b/src/user.go"));
    }

    #[test]
    fn propose_then_apply_happy_path() {
        let (dir, mut editor) = fixture();
        let proposal = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();

        let plan = plan_with_limits(10, 50, 30);
        let result = editor.apply_edit(&proposal.patch_id, Some(&plan)).unwrap();

        assert!(result.success);
        assert_eq!(result.modified_files, vec!["src/user.go"]);
        let content = fs::read_to_string(dir.path().join("src/user.go")).unwrap();
        assert!(content.contains("fetchUserData"));
        assert!(!content.contains("getUserData"));
    }

    #[test]
    fn patch_id_format_and_uniqueness() {
        let (_dir, mut editor) = fixture();
        let first = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();
        let second = editor
            .propose_edit("checkAuth", "verifyAuth", "src/**", None)
            .unwrap();

        for id in [&first.patch_id, &second.patch_id] {
            let parts: Vec<&str> = id.splitn(3, '_').collect();
            assert_eq!(parts[0], "patch");
            assert!(parts[1].parse::<i64>().is_ok());
            assert_eq!(parts[2].len(), 8);
            assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_ne!(first.patch_id, second.patch_id);
    }

    #[test]
    fn same_inputs_yield_identical_diffs_with_distinct_ids() {
        let (_dir, mut editor) = fixture();
        let a = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();
        let b = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();
        assert_eq!(a.unified_diff, b.unified_diff);
        assert_ne!(a.patch_id, b.patch_id);
    }

    #[test]
    fn empty_scope_fails_file_not_found() {
        let (_dir, mut editor) = fixture();
        let err = editor
            .propose_edit("anything", "else", "nonexistent/**", None)
            .unwrap_err();
        assert!(matches!(err, PatchError::NoFilesInScope { .. }));
    }

    #[test]
    fn no_matching_content_fails_no_changes() {
        let (_dir, mut editor) = fixture();
        let err = editor
            .propose_edit("doesNotAppearAnywhere", "x", "src/**", None)
            .unwrap_err();
        assert!(matches!(err, PatchError::NoChanges { .. }));
    }

    #[test]
    fn unknown_patch_id_fails_not_found() {
        let (_dir, mut editor) = fixture();
        let err = editor.apply_edit("patch_0_deadbeef", None).unwrap_err();
        assert!(matches!(err, PatchError::NotFound { .. }));
    }

    #[test]
    fn file_limit_rejects_before_any_write() {
        let (dir, mut editor) = fixture();
        // Pattern hits both files.
        let proposal = editor.propose_edit("func ", "fn ", "src/**", None).unwrap();
        assert_eq!(proposal.affected_files.len(), 2);

        let plan = plan_with_limits(1, 1000, 30);
        let err = editor
            .apply_edit(&proposal.patch_id, Some(&plan))
            .unwrap_err();
        assert!(matches!(
            err,
            PatchError::Constraint(ConstraintError::FileLimitExceeded {
                files_processed: 2,
                max_files: 1
            })
        ));
        // Tree is byte-identical.
        assert!(
            fs::read_to_string(dir.path().join("src/user.go"))
                .unwrap()
                .contains("func getUserData")
        );
    }

    #[test]
    fn change_limit_rejects_with_actual_and_limit() {
        let (dir, mut editor) = fixture();
        // Build a file producing 10 changed lines (5 deletions + 5 additions).
        fs::write(
            dir.path().join("src/many.go"),
            "alpha 1\nalpha 2\nalpha 3\nalpha 4\nalpha 5\n",
        )
        .unwrap();
        let proposal = editor.propose_edit("alpha", "beta", "src/many.go", None).unwrap();
        assert_eq!(evolvai_utils::count_diff_changes(&proposal.unified_diff), 10);

        let plan = plan_with_limits(10, 3, 30);
        let err = editor
            .apply_edit(&proposal.patch_id, Some(&plan))
            .unwrap_err();
        assert!(matches!(
            err,
            PatchError::Constraint(ConstraintError::ChangeLimitExceeded {
                changes_made: 10,
                max_changes: 3
            })
        ));
        let content = fs::read_to_string(dir.path().join("src/many.go")).unwrap();
        assert!(content.contains("alpha 1"));
    }

    #[test]
    fn conflict_when_file_changed_since_proposal() {
        let (dir, mut editor) = fixture();
        let proposal = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();

        // Someone else renames the function first.
        fs::write(
            dir.path().join("src/user.go"),
            "func loadUserData() string { return \"user\" }\n",
        )
        .unwrap();

        let err = editor.apply_edit(&proposal.patch_id, None).unwrap_err();
        assert!(matches!(err, PatchError::Conflict { .. }));
        // Unrelated edit is preserved.
        let content = fs::read_to_string(dir.path().join("src/user.go")).unwrap();
        assert!(content.contains("loadUserData"));
    }

    #[test]
    fn language_filter_narrows_scope() {
        let (dir, mut editor) = fixture();
        fs::write(dir.path().join("src/notes.txt"), "func getUserData\n").unwrap();

        let proposal = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", Some("go"))
            .unwrap();
        assert_eq!(proposal.affected_files, vec!["src/user.go"]);
    }

    #[test]
    fn applied_patch_is_dropped_from_store() {
        let (_dir, mut editor) = fixture();
        let proposal = editor
            .propose_edit("getUserData", "fetchUserData", "src/**", None)
            .unwrap();
        assert_eq!(editor.stored_patches(), 1);
        editor.apply_edit(&proposal.patch_id, None).unwrap();
        assert_eq!(editor.stored_patches(), 0);

        let err = editor.apply_edit(&proposal.patch_id, None).unwrap_err();
        assert!(matches!(err, PatchError::NotFound { .. }));
    }

    #[test]
    fn multi_file_apply_is_all_or_nothing_on_conflict() {
        let (dir, mut editor) = fixture();
        let proposal = editor.propose_edit("func ", "fn ", "src/**", None).unwrap();
        assert_eq!(proposal.affected_files.len(), 2);

        // Invalidate the second file in sorted order (auth.go, then user.go).
        fs::write(dir.path().join("src/user.go"), "nothing here\n").unwrap();

        let err = editor.apply_edit(&proposal.patch_id, None).unwrap_err();
        assert!(matches!(err, PatchError::Conflict { .. }));
        // First file must be untouched too.
        let auth = fs::read_to_string(dir.path().join("src/auth.go")).unwrap();
        assert!(auth.contains("func checkAuth"));
    }

    #[test]
    fn statistics_report_files_and_lines() {
        let (_dir, mut editor) = fixture();
        let proposal = editor.propose_edit("func ", "fn ", "src/**", None).unwrap();
        assert_eq!(proposal.statistics.files_modified, 2);
        // One line replaced per file: one deletion + one addition each.
        assert_eq!(proposal.statistics.lines_changed, 4);
        assert_eq!(proposal.statistics.pattern, "func ");
    }
}

//! Unified diff formatting and stats.
//!
//! Output follows the conventional `--- a/<path>` / `+++ b/<path>` header
//! form with standard `@@ -a,b +c,d @@` hunks, so any unified-diff reader
//! can consume it.

use similar::{ChangeTag, TextDiff};

/// Format a unified diff between old and new content for one file.
///
/// `path` is relative to the project root and appears as `a/<path>` /
/// `b/<path>`. Trailing newlines are normalised on both sides before
/// diffing. Returns an empty string when the contents are equal.
#[must_use]
pub fn unified_diff(path: &str, old_text: &str, new_text: &str) -> String {
    let old_text = normalize_trailing_newline(old_text);
    let new_text = normalize_trailing_newline(new_text);
    if old_text == new_text {
        return String::new();
    }

    let diff = TextDiff::from_lines(old_text.as_str(), new_text.as_str());
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Compute diff stats (additions and deletions) between old and new content.
#[must_use]
pub fn compute_diff_stats(old_text: &str, new_text: &str) -> (u32, u32) {
    let diff = TextDiff::from_lines(old_text, new_text);

    let mut additions: u32 = 0;
    let mut deletions: u32 = 0;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    (additions, deletions)
}

/// Count changed lines in a unified diff: every `+`/`-` line excluding the
/// `+++`/`---` file headers.
#[must_use]
pub fn count_diff_changes(unified: &str) -> u64 {
    unified
        .lines()
        .filter(|line| {
            (line.starts_with('+') && !line.starts_with("+++"))
                || (line.starts_with('-') && !line.starts_with("---"))
        })
        .count() as u64
}

fn normalize_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_diff_stats, count_diff_changes, unified_diff};

    #[test]
    fn equal_content_yields_empty_diff() {
        assert_eq!(unified_diff("src/a.rs", "same\n", "same\n"), "");
    }

    #[test]
    fn trailing_newline_is_normalized() {
        assert_eq!(unified_diff("src/a.rs", "same", "same\n"), "");
    }

    #[test]
    fn headers_use_a_b_prefixes() {
        let diff = unified_diff("src/user.go", "old line\n", "new line\n");
        assert!(diff.starts_with("--- a/src/user.go\n+++ b/src/user.go\n"));
        assert!(diff.contains("@@"));
        assert!(diff.contains("-old line"));
        assert!(diff.contains("+new line"));
    }

    #[test]
    fn single_line_replacement() {
        let old = "func getUserData() string { return \"user\" }\n";
        let new = "func fetchUserData() string { return \"user\" }\n";
        let diff = unified_diff("src/user.go", old, new);
        assert!(diff.contains("-func getUserData() string { return \"user\" }"));
        assert!(diff.contains("+func fetchUserData() string { return \"user\" }"));
    }

    #[test]
    fn stats_count_inserts_and_deletes() {
        let (add, del) = compute_diff_stats("a\nb\nc\n", "a\nx\nc\nd\n");
        assert_eq!(add, 2);
        assert_eq!(del, 1);
    }

    #[test]
    fn change_count_excludes_file_headers() {
        let diff = unified_diff("f.txt", "one\ntwo\n", "one\nthree\n");
        // One deletion + one addition; the ---/+++ headers must not count.
        assert_eq!(count_diff_changes(&diff), 2);
    }

    #[test]
    fn change_count_on_multifile_concatenation() {
        let a = unified_diff("a.txt", "x\n", "y\n");
        let b = unified_diff("b.txt", "p\n", "q\n");
        let combined = format!("{a}{b}");
        assert_eq!(count_diff_changes(&combined), 4);
    }
}

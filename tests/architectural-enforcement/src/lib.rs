//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`:
//! - no sleeping in place of waiting on I/O or timers
//! - no blocking I/O inside async code
//!
//! Scans stop at the `#[cfg(test)] mod tests` block of each file, since
//! unit test modules sit at the bottom of their files.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const SOURCE_ROOTS: &[&str] = &["panelsync/core/src", "panelsync/relay/src"];

/// One offending line
#[derive(Debug, Clone)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was found
    pub reason: &'static str,
    /// The trimmed line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.text
        )
    }
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Production lines of every `.rs` file under the source roots
///
/// Yields `(path, lines)` with the unit test module removed.
#[must_use]
pub fn production_sources() -> Vec<(PathBuf, Vec<String>)> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in SOURCE_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            files.push((entry.path().to_path_buf(), production_lines(&content)));
        }
    }

    files
}

/// Lines of `content` up to its `#[cfg(test)] mod ..`
#[must_use]
pub fn production_lines(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let end = lines
        .iter()
        .enumerate()
        .position(|(idx, line)| {
            line.trim_start().starts_with("#[cfg(test)]")
                && lines[idx + 1..]
                    .iter()
                    .find(|next| !next.trim().is_empty())
                    .is_some_and(|next| next.trim_start().starts_with("mod "))
        })
        .unwrap_or(lines.len());
    lines[..end].iter().map(|line| (*line).to_string()).collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the nearest enclosing `fn` above `idx` is `async`
#[must_use]
pub fn in_async_fn(lines: &[String], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        let code = code_part(line);
        if let Some(pos) = code.find("fn ") {
            let before = &code[..pos];
            let is_item = before.trim().is_empty()
                || before.trim_end().ends_with("async")
                || before.trim_start().starts_with("pub");
            if is_item {
                return before.contains("async");
            }
        }
    }
    false
}

/// Whether any of the `window` lines up to `idx` mentions one of `words`
#[must_use]
pub fn context_mentions(lines: &[String], idx: usize, window: usize, words: &[&str]) -> bool {
    let start = idx.saturating_sub(window);
    lines[start..=idx].iter().any(|line| {
        let lower = line.to_lowercase();
        words.iter().any(|w| lower.contains(w))
    })
}

/// Print violations and fail the calling test when there are any
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(title: &str, hints: &[&str], violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{title}\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    eprintln!();
    for hint in hints {
        eprintln!("  - {hint}");
    }
    panic!("\nFound {} violation(s). Fix these before merging!", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<String> {
        src.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_in_async_fn() {
        let src = lines("pub async fn a() {\n    x();\n}\nfn b() {\n    y();\n}");
        assert!(in_async_fn(&src, 1));
        assert!(!in_async_fn(&src, 4));
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n#[cfg(test)]\nfn helper() {}\n#[cfg(test)]\n\nmod tests {}\n";
        let kept = production_lines(src);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[2], "fn helper() {}");
    }

    #[test]
    fn test_context_mentions() {
        let src = lines("let delay = 3;\nfoo();\nbar();");
        assert!(context_mentions(&src, 2, 5, &["delay"]));
        assert!(!context_mentions(&src, 2, 0, &["delay"]));
    }

    #[test]
    fn test_sources_are_found() {
        assert!(!production_sources().is_empty());
    }
}

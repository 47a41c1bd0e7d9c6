//! Slash-separated virtual paths.
//!
//! Paths are always relative to the tree root: no leading `/`, no empty
//! segments, no `.` or `..`. The root itself is the empty string. A node's
//! parent is found by stripping the last segment, so nothing in the tree
//! needs a parent pointer.

use crate::error::{VfsError, VfsResult};

/// Normalize a path: drop leading/trailing `/`, collapse empty segments,
/// resolve `.` and `..` (never above the root).
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Parent of a normalized path (`""` for top-level entries and the root).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Segments of a normalized path (empty for the root).
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// True if `candidate` is `dir` itself or lives beneath it.
pub fn is_within(candidate: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    candidate == dir
        || (candidate.len() > dir.len()
            && candidate.starts_with(dir)
            && candidate.as_bytes()[dir.len()] == b'/')
}

/// Rewrite `path` (which must be within `from`) so that it lives under `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = &path[from.len() + 1..];
    join(to, rest)
}

/// Validate a single entry name for rename/create.
pub fn validate_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(VfsError::invalid_path(format!("invalid name {name:?}")));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(VfsError::invalid_path(format!(
            "name must not contain a separator: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/b/c.txt"), "a/b/c.txt");
        assert_eq!(normalize("a/./b//c.txt/"), "a/b/c.txt");
        assert_eq!(normalize("a/b/../b/c.txt"), "a/b/c.txt");
        assert_eq!(normalize("../../etc"), "etc");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("src\\main.rs"), "src/main.rs");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("src/util/helpers.js"), "src/util");
        assert_eq!(parent("README.md"), "");
        assert_eq!(file_name("src/util/helpers.js"), "helpers.js");
        assert_eq!(file_name("README.md"), "README.md");
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("docs", "docs"));
        assert!(is_within("docs/a.md", "docs"));
        assert!(!is_within("docs2/a.md", "docs"));
        assert!(!is_within("doc", "docs"));
        assert!(is_within("anything", ""));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("old/a/b.txt", "old", "new"), "new/a/b.txt");
        assert_eq!(rebase("old", "old", "new"), "new");
        assert_eq!(rebase("x/old/f", "x/old", "x/renamed"), "x/renamed/f");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ideas.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }
}

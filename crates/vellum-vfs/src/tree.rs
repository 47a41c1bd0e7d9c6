//! In-memory path tree with a flat path index.
//!
//! Every entry lives in a single `path → entry` map. Directories keep an
//! ordered list of child *names*; a child's full path is the directory path
//! joined with that name, and its parent is found by stripping the last
//! segment. There are no parent pointers, so the structure cannot form
//! cycles. [`Node`] trees are materialized from the map on demand.

use std::collections::HashMap;

use crate::error::{VfsError, VfsResult};
use crate::node::{Node, NodeKind};
use crate::path;

/// Entry in the path index.
#[derive(Debug, Clone)]
enum Entry {
    File { content: String },
    Directory { children: Vec<String> },
}

impl Entry {
    fn kind(&self) -> NodeKind {
        match self {
            Entry::File { .. } => NodeKind::File,
            Entry::Directory { .. } => NodeKind::Directory,
        }
    }

    fn empty_dir() -> Self {
        Entry::Directory {
            children: Vec::new(),
        }
    }
}

/// Hierarchy of files and directories, indexed by path.
#[derive(Debug)]
pub struct PathTree {
    entries: HashMap<String, Entry>,
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTree {
    /// Create a tree containing only the root directory.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(String::new(), Entry::empty_dir());
        Self { entries }
    }

    /// Number of indexed entries, excluding the root.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything but the root.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.entries.insert(String::new(), Entry::empty_dir());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&path::normalize(path))
    }

    /// Kind of the entry at `path`, if any.
    pub fn kind(&self, path: &str) -> Option<NodeKind> {
        self.entries.get(&path::normalize(path)).map(Entry::kind)
    }

    /// File content at `path`, if it is a file.
    pub fn content(&self, path: &str) -> Option<&str> {
        match self.entries.get(&path::normalize(path)) {
            Some(Entry::File { content }) => Some(content),
            _ => None,
        }
    }

    /// Look up a node. Directories are returned with their full subtree.
    pub fn get(&self, path: &str) -> Option<Node> {
        let path = path::normalize(path);
        self.entries
            .get(&path)
            .map(|entry| self.materialize(&path, entry))
    }

    /// The whole tree, rooted at the empty path.
    pub fn root(&self) -> Node {
        self.get("").unwrap_or_else(|| Node::Directory {
            name: String::new(),
            path: String::new(),
            children: Vec::new(),
        })
    }

    /// All file nodes, sorted by path.
    pub fn files(&self) -> Vec<Node> {
        let mut paths: Vec<&String> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::File { .. }))
            .map(|(p, _)| p)
            .collect();
        paths.sort();
        paths
            .into_iter()
            .filter_map(|p| self.get(p))
            .collect()
    }

    /// Every indexed path equal to or beneath `dir`, sorted.
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let dir = path::normalize(dir);
        let mut paths: Vec<String> = self
            .entries
            .keys()
            .filter(|p| !p.is_empty() && path::is_within(p, &dir))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Insert or replace a file, creating missing parent directories.
    ///
    /// Returns the normalized path.
    pub fn add_file(&mut self, path: &str, content: impl Into<String>) -> VfsResult<String> {
        let path = path::normalize(path);
        if path.is_empty() {
            return Err(VfsError::invalid_path("empty file path"));
        }

        match self.entries.get_mut(&path) {
            Some(Entry::File { content: existing }) => {
                *existing = content.into();
                return Ok(path);
            }
            Some(Entry::Directory { .. }) => return Err(VfsError::is_a_directory(path)),
            None => {}
        }

        self.ensure_dirs(path::parent(&path))?;
        self.attach(&path);
        self.entries.insert(
            path.clone(),
            Entry::File {
                content: content.into(),
            },
        );
        Ok(path)
    }

    /// Replace the content of an existing file.
    pub fn set_content(&mut self, path: &str, content: impl Into<String>) -> VfsResult<()> {
        let path = path::normalize(path);
        match self.entries.get_mut(&path) {
            Some(Entry::File { content: existing }) => {
                *existing = content.into();
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(path)),
            None => Err(VfsError::not_found(path)),
        }
    }

    /// Create a directory and any missing ancestors. Idempotent.
    pub fn create_directory(&mut self, path: &str) -> VfsResult<String> {
        let path = path::normalize(path);
        self.ensure_dirs(&path)?;
        Ok(path)
    }

    /// Remove a file or a directory subtree.
    ///
    /// Returns every removed path, sorted.
    pub fn remove(&mut self, path: &str) -> VfsResult<Vec<String>> {
        let path = path::normalize(path);
        if path.is_empty() {
            return Err(VfsError::invalid_path("cannot remove the root"));
        }
        let kind = self
            .entries
            .get(&path)
            .map(Entry::kind)
            .ok_or_else(|| VfsError::not_found(path.clone()))?;

        let mut removed = Vec::new();
        if kind.is_dir() {
            let descendants: Vec<String> = self
                .entries
                .keys()
                .filter(|k| *k != &path && path::is_within(k, &path))
                .cloned()
                .collect();
            for descendant in descendants {
                self.entries.remove(&descendant);
                removed.push(descendant);
            }
        }

        self.entries.remove(&path);
        self.detach(&path);
        removed.push(path);
        removed.sort();
        Ok(removed)
    }

    /// Validate a file move without changing anything.
    ///
    /// Returns the normalized `(source, target)` pair. Directories are
    /// rejected; renaming is the only way to relocate one.
    pub fn check_move(&self, source: &str, target: &str) -> VfsResult<(String, String)> {
        let source = path::normalize(source);
        let target = path::normalize(target);

        match self.entries.get(&source) {
            None => return Err(VfsError::not_found(source)),
            Some(Entry::Directory { .. }) => {
                return Err(VfsError::unsupported(format!(
                    "cannot move directory {source}; rename it instead"
                )));
            }
            Some(Entry::File { .. }) => {}
        }
        if target.is_empty() {
            return Err(VfsError::invalid_path("empty target path"));
        }
        if path::parent(&source) == path::parent(&target) {
            return Err(VfsError::invalid_path(format!(
                "{source} and {target} share a parent directory"
            )));
        }
        match self.entries.get(path::parent(&target)) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(VfsError::not_a_directory(path::parent(&target)));
            }
            None => return Err(VfsError::not_found(path::parent(&target))),
        }
        if self.entries.contains_key(&target) {
            return Err(VfsError::already_exists(target));
        }
        Ok((source, target))
    }

    /// Move a file to a new path under a different, existing directory.
    pub fn move_file(&mut self, source: &str, target: &str) -> VfsResult<String> {
        let (source, target) = self.check_move(source, target)?;
        let entry = self
            .entries
            .remove(&source)
            .ok_or_else(|| VfsError::not_found(source.clone()))?;
        self.detach(&source);
        self.attach(&target);
        self.entries.insert(target.clone(), entry);
        Ok(target)
    }

    /// Validate a rename without changing anything.
    ///
    /// Returns the normalized `(old, new)` pair; they are equal when the
    /// name is unchanged.
    pub fn check_rename(&self, path: &str, new_name: &str) -> VfsResult<(String, String)> {
        path::validate_name(new_name)?;
        let old_path = path::normalize(path);
        if old_path.is_empty() {
            return Err(VfsError::invalid_path("cannot rename the root"));
        }
        if !self.entries.contains_key(&old_path) {
            return Err(VfsError::not_found(old_path));
        }

        let new_path = path::join(path::parent(&old_path), new_name);
        if new_path != old_path && self.entries.contains_key(&new_path) {
            return Err(VfsError::already_exists(new_path));
        }
        Ok((old_path, new_path))
    }

    /// Rename a file or directory in place. Returns the new path.
    pub fn rename(&mut self, path: &str, new_name: &str) -> VfsResult<String> {
        let (old_path, new_path) = self.check_rename(path, new_name)?;
        if new_path == old_path {
            return Ok(new_path);
        }
        let parent = path::parent(&old_path).to_string();

        let affected: Vec<String> = self
            .entries
            .keys()
            .filter(|k| path::is_within(k, &old_path))
            .cloned()
            .collect();
        for old in affected {
            if let Some(entry) = self.entries.remove(&old) {
                self.entries
                    .insert(path::rebase(&old, &old_path, &new_path), entry);
            }
        }

        let old_name = path::file_name(&old_path);
        if let Some(Entry::Directory { children }) = self.entries.get_mut(&parent) {
            if let Some(slot) = children.iter_mut().find(|c| c.as_str() == old_name) {
                *slot = new_name.to_string();
            }
        }
        Ok(new_path)
    }

    /// Order every directory's children: directories first, then by name.
    pub fn sort_children(&mut self) {
        let dirs: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Directory { .. }))
            .map(|(p, _)| p.clone())
            .collect();

        for dir in dirs {
            let Some(Entry::Directory { children }) = self.entries.get(&dir) else {
                continue;
            };
            let mut sorted = children.clone();
            sorted.sort_by(|a, b| {
                let a_dir = self.is_dir(&path::join(&dir, a));
                let b_dir = self.is_dir(&path::join(&dir, b));
                b_dir.cmp(&a_dir).then_with(|| a.cmp(b))
            });
            if let Some(Entry::Directory { children }) = self.entries.get_mut(&dir) {
                *children = sorted;
            }
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.entries.get(path), Some(Entry::Directory { .. }))
    }

    /// Create every directory along `dir` that does not exist yet.
    fn ensure_dirs(&mut self, dir: &str) -> VfsResult<()> {
        let mut current = String::new();
        for segment in path::segments(dir) {
            current = path::join(&current, segment);
            match self.entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => return Err(VfsError::not_a_directory(current)),
                None => {
                    self.attach(&current);
                    self.entries.insert(current.clone(), Entry::empty_dir());
                }
            }
        }
        Ok(())
    }

    /// Append `path`'s name to its parent's child list.
    fn attach(&mut self, path: &str) {
        let name = path::file_name(path);
        if let Some(Entry::Directory { children }) = self.entries.get_mut(path::parent(path)) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }

    /// Remove `path`'s name from its parent's child list.
    fn detach(&mut self, path: &str) {
        let name = path::file_name(path);
        if let Some(Entry::Directory { children }) = self.entries.get_mut(path::parent(path)) {
            children.retain(|c| c != name);
        }
    }

    fn materialize(&self, path: &str, entry: &Entry) -> Node {
        let name = path::file_name(path).to_string();
        match entry {
            Entry::File { content } => Node::File {
                name,
                path: path.to_string(),
                content: content.clone(),
            },
            Entry::Directory { children } => Node::Directory {
                name,
                path: path.to_string(),
                children: children
                    .iter()
                    .filter_map(|child| {
                        let child_path = path::join(path, child);
                        self.entries
                            .get(&child_path)
                            .map(|e| self.materialize(&child_path, e))
                    })
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let mut tree = PathTree::new();
        tree.add_file("src/app.js", "a").unwrap();
        tree.add_file("src/util/helpers.js", "b").unwrap();

        let root = tree.root();
        let src = root.child("src", NodeKind::Directory).unwrap();
        assert_eq!(
            src.child("app.js", NodeKind::File).unwrap().content(),
            Some("a")
        );
        let util = src.child("util", NodeKind::Directory).unwrap();
        let helpers = util.child("helpers.js", NodeKind::File).unwrap();
        assert_eq!(helpers.path(), "src/util/helpers.js");
        assert_eq!(helpers.content(), Some("b"));
    }

    #[test]
    fn test_add_file_replaces_existing() {
        let mut tree = PathTree::new();
        tree.add_file("a.txt", "one").unwrap();
        tree.add_file("/a.txt", "two").unwrap();

        assert_eq!(tree.content("a.txt"), Some("two"));
        assert_eq!(tree.root().children().len(), 1);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_add_file_conflicts() {
        let mut tree = PathTree::new();
        tree.add_file("a.txt", "x").unwrap();
        assert!(matches!(
            tree.add_file("a.txt/b.txt", "y"),
            Err(VfsError::NotADirectory(_))
        ));

        tree.create_directory("docs").unwrap();
        assert!(matches!(
            tree.add_file("docs", "y"),
            Err(VfsError::IsADirectory(_))
        ));
        assert!(matches!(tree.add_file("", "y"), Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_remove_directory_is_recursive() {
        let mut tree = PathTree::new();
        tree.add_file("docs/a.md", "a").unwrap();
        tree.add_file("docs/deep/b.md", "b").unwrap();
        tree.add_file("docs2/c.md", "c").unwrap();

        let removed = tree.remove("docs").unwrap();
        assert_eq!(removed, vec!["docs", "docs/a.md", "docs/deep", "docs/deep/b.md"]);
        assert!(tree.paths_under("docs").is_empty());
        assert!(tree.contains("docs2/c.md"));
        assert!(tree.root().child("docs", NodeKind::Directory).is_none());
    }

    #[test]
    fn test_remove_missing_and_root() {
        let mut tree = PathTree::new();
        assert!(tree.remove("nope").unwrap_err().is_not_found());
        assert!(tree.remove("").is_err());
    }

    #[test]
    fn test_move_file_reparents() {
        let mut tree = PathTree::new();
        tree.add_file("src/main.rs", "fn main() {}").unwrap();
        tree.create_directory("bin").unwrap();

        let new_path = tree.move_file("src/main.rs", "bin/main.rs").unwrap();
        assert_eq!(new_path, "bin/main.rs");
        assert!(!tree.contains("src/main.rs"));
        assert_eq!(tree.content("bin/main.rs"), Some("fn main() {}"));
        assert!(tree.get("src").unwrap().children().is_empty());
    }

    #[test]
    fn test_move_file_same_parent_fails_without_change() {
        let mut tree = PathTree::new();
        tree.add_file("src/a.rs", "a").unwrap();

        assert!(tree.move_file("src/a.rs", "src/a.rs").is_err());
        assert!(tree.move_file("src/a.rs", "src/b.rs").is_err());
        assert_eq!(tree.content("src/a.rs"), Some("a"));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_move_directory_unsupported() {
        let mut tree = PathTree::new();
        tree.add_file("a/x.txt", "x").unwrap();
        tree.create_directory("b").unwrap();

        assert!(matches!(
            tree.move_file("a", "b/a"),
            Err(VfsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_move_into_missing_directory_fails() {
        let mut tree = PathTree::new();
        tree.add_file("a.txt", "x").unwrap();
        assert!(tree.move_file("a.txt", "nowhere/a.txt").unwrap_err().is_not_found());
        assert!(tree.contains("a.txt"));
    }

    #[test]
    fn test_rename_file() {
        let mut tree = PathTree::new();
        tree.add_file("notes.txt", "remember").unwrap();

        let new_path = tree.rename("notes.txt", "ideas.txt").unwrap();
        assert_eq!(new_path, "ideas.txt");
        assert!(tree.get("notes.txt").is_none());
        assert_eq!(tree.content("ideas.txt"), Some("remember"));
    }

    #[test]
    fn test_rename_directory_rewrites_descendants() {
        let mut tree = PathTree::new();
        tree.add_file("lib/a.rs", "a").unwrap();
        tree.add_file("lib/nested/b.rs", "b").unwrap();
        tree.add_file("z.rs", "z").unwrap();

        tree.rename("lib", "core").unwrap();
        assert_eq!(
            tree.paths_under("core"),
            vec!["core", "core/a.rs", "core/nested", "core/nested/b.rs"]
        );
        assert!(tree.paths_under("lib").is_empty());

        // Position among siblings is preserved
        let names: Vec<_> = tree.root().children().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["core", "z.rs"]);
    }

    #[test]
    fn test_rename_collision() {
        let mut tree = PathTree::new();
        tree.add_file("a.txt", "a").unwrap();
        tree.add_file("b.txt", "b").unwrap();
        assert!(matches!(
            tree.rename("a.txt", "b.txt"),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(tree.rename("a.txt", "x/y").is_err());
    }

    #[test]
    fn test_sort_children() {
        let mut tree = PathTree::new();
        tree.add_file("b.txt", "").unwrap();
        tree.add_file("zdir/file", "").unwrap();
        tree.add_file("a.txt", "").unwrap();
        tree.create_directory("adir").unwrap();

        tree.sort_children();
        let names: Vec<_> = tree.root().children().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["adir", "zdir", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_files_sorted_by_path() {
        let mut tree = PathTree::new();
        tree.add_file("b/2.txt", "").unwrap();
        tree.add_file("a.txt", "").unwrap();
        tree.create_directory("empty").unwrap();

        let paths: Vec<_> = tree.files().iter().map(|n| n.path().to_string()).collect();
        assert_eq!(paths, vec!["a.txt", "b/2.txt"]);
    }
}

//! Tree node types.
//!
//! [`Node`] is the materialized view handed to collaborators (tree views,
//! tab systems, packagers). The tree itself is stored flat in
//! [`PathTree`](crate::tree::PathTree); nodes are built from it on demand.

use serde::{Deserialize, Serialize};

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl NodeKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// A file or directory in the virtual tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    File {
        name: String,
        path: String,
        content: String,
    },
    Directory {
        name: String,
        path: String,
        children: Vec<Node>,
    },
}

impl Node {
    /// Entry name (last path segment; empty for the root).
    pub fn name(&self) -> &str {
        match self {
            Node::File { name, .. } | Node::Directory { name, .. } => name,
        }
    }

    /// Full path from the root.
    pub fn path(&self) -> &str {
        match self {
            Node::File { path, .. } | Node::Directory { path, .. } => path,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File { .. } => NodeKind::File,
            Node::Directory { .. } => NodeKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind().is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// File content, or `None` for directories.
    pub fn content(&self) -> Option<&str> {
        match self {
            Node::File { content, .. } => Some(content),
            Node::Directory { .. } => None,
        }
    }

    /// Direct children (empty for files).
    pub fn children(&self) -> &[Node] {
        match self {
            Node::File { .. } => &[],
            Node::Directory { children, .. } => children,
        }
    }

    /// Find a direct child by name and kind.
    pub fn child(&self, name: &str, kind: NodeKind) -> Option<&Node> {
        self.children()
            .iter()
            .find(|c| c.name() == name && c.kind() == kind)
    }

    /// Order children: directories first, then by name. Recursive.
    pub fn sort_children(&mut self) {
        if let Node::Directory { children, .. } = self {
            children.sort_by(|a, b| {
                b.is_dir()
                    .cmp(&a.is_dir())
                    .then_with(|| a.name().cmp(b.name()))
            });
            for child in children.iter_mut() {
                child.sort_children();
            }
        }
    }

    /// Count files in this subtree.
    pub fn file_count(&self) -> usize {
        match self {
            Node::File { .. } => 1,
            Node::Directory { children, .. } => children.iter().map(Node::file_count).sum(),
        }
    }
}

//! # vellum-vfs
//!
//! Virtual file system for client-side editors.
//!
//! A vellum tree holds a project's files and directories in memory and keeps
//! each path's durable copy in exactly one place:
//! - **Memory-only** paths are mirrored to a local SQLite store and
//!   rehydrated on the next start
//! - **Disk-backed** paths come from a bound directory and save through a
//!   revocable capability handle
//!
//! Key components:
//!
//! - [`PathTree`] - Flat `path → entry` index with on-demand [`Node`] trees
//! - [`RecordStore`] / [`SqliteStore`] - Durable records for memory-only paths
//! - [`DiskBridge`] - Directory binding, handle map and disk operations
//! - [`FileSystem`] - The facade that decides where each save goes
//!
//! ## Design Decisions
//!
//! - **No back-pointers**: a node's parent is its path minus the last
//!   segment. Renames rewrite the index, never a pointer graph.
//! - **Explicit context object**: [`FileSystem`] is constructed and shared
//!   as `Arc<FileSystem>`; there is no global instance.
//! - **Copy-then-delete on disk**: capability handles have no rename, so
//!   disk renames and moves copy content and remove the original.

pub mod config;
pub mod disk;
mod error;
pub mod facade;
pub mod handle;
pub mod node;
pub mod path;
pub mod store;
pub mod tree;

pub use config::VfsConfig;
pub use disk::{DiskBridge, DiskTree, DiskWrite};
pub use error::{VfsError, VfsResult};
pub use facade::{FileSystem, PathState, SaveOutcome};
pub use handle::{DirectoryHandle, FileHandle, HandleEntry, LocalDirectoryHandle, WritableFile};
pub use node::{Node, NodeKind};
pub use store::{PersistedRecord, RecordKind, RecordStore, SqliteStore};
pub use tree::PathTree;

//! The file system facade.
//!
//! [`FileSystem`] composes the in-memory [`PathTree`], a [`RecordStore`] and
//! the [`DiskBridge`]. It is the only component that decides where a path's
//! content is authoritative:
//!
//! - a path with a registered file handle is **disk-backed** and saves go
//!   through the bound directory;
//! - every other path is **memory-only** and saves are mirrored to the store.
//!
//! A disk write that fails with a permission error drops the path's handle,
//! so the path degrades to memory-only and later saves land in the store.
//! Other disk failures keep the handle and the next save retries.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::VfsConfig;
use crate::disk::DiskBridge;
use crate::error::{VfsError, VfsResult};
use crate::handle::DirectoryHandle;
use crate::node::{Node, NodeKind};
use crate::path;
use crate::store::{RecordKind, RecordStore, SqliteStore};
use crate::tree::PathTree;

/// Where a path's content currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    /// Not in the tree.
    Unbound,
    /// In memory, mirrored to the store.
    MemoryOnly,
    /// In memory, authoritative copy on disk.
    DiskBacked,
}

/// Result of [`FileSystem::update_file`].
///
/// The in-memory content is always updated; the outcome reports what
/// happened to the durable copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub saved_to_disk: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
}

impl SaveOutcome {
    /// True if the content reached either the disk or the store.
    pub fn is_durable(&self) -> bool {
        self.saved_to_disk || self.persisted
    }
}

/// Virtual file system with dual authority (store or bound directory).
///
/// Cheap to share as `Arc<FileSystem>`. Locks are never held across `.await`.
pub struct FileSystem {
    tree: RwLock<PathTree>,
    store: Arc<dyn RecordStore>,
    disk: DiskBridge,
    initialized: OnceCell<()>,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("entries", &self.tree.read().len())
            .field("disk", &self.disk)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl FileSystem {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            tree: RwLock::new(PathTree::new()),
            store,
            disk: DiskBridge::new(),
            initialized: OnceCell::new(),
        }
    }

    /// Open the SQLite store named by the config.
    pub fn open(config: &VfsConfig) -> VfsResult<Self> {
        let store_path = config.store_path()?;
        info!(path = %store_path.display(), "opening store");
        Ok(Self::new(Arc::new(SqliteStore::open(store_path)?)))
    }

    /// Facade over an in-memory store (for testing).
    pub fn in_memory() -> VfsResult<Self> {
        Ok(Self::new(Arc::new(SqliteStore::in_memory()?)))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn disk(&self) -> &DiskBridge {
        &self.disk
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Hydrate the tree from the store. Runs once; later calls are no-ops.
    ///
    /// Placeholder records recreate their directory without a visible file.
    pub async fn init(&self) -> VfsResult<()> {
        self.initialized
            .get_or_try_init(|| async { self.hydrate() })
            .await?;
        Ok(())
    }

    fn hydrate(&self) -> VfsResult<()> {
        let records = self.store.load_records()?;
        let mut tree = self.tree.write();
        let mut files = 0usize;
        for record in &records {
            let result = match record.kind {
                RecordKind::File => tree.add_file(&record.path, record.content.as_str()),
                RecordKind::Placeholder => tree.create_directory(&record.path),
            };
            match result {
                Ok(_) if record.kind == RecordKind::File => files += 1,
                Ok(_) => {}
                Err(e) => warn!(path = %record.path, error = %e, "skipping persisted record"),
            }
        }
        tree.sort_children();
        info!(files, records = records.len(), "hydrated from store");
        Ok(())
    }

    /// Drop the in-memory tree and every file handle. The store is untouched.
    pub fn clear(&self) {
        self.tree.write().clear();
        self.disk.clear_handles();
        debug!("cleared in-memory tree");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_file(&self, path: &str) -> Option<Node> {
        self.tree.read().get(path)
    }

    /// Sorted snapshot of the whole tree.
    pub fn get_tree(&self) -> Node {
        let mut root = self.tree.read().root();
        root.sort_children();
        root
    }

    /// Every file, sorted by path.
    pub fn get_all_files(&self) -> Vec<Node> {
        self.tree.read().files()
    }

    pub fn state_of(&self, path: &str) -> PathState {
        let path = path::normalize(path);
        if !self.tree.read().contains(&path) {
            PathState::Unbound
        } else if self.disk.is_bound(&path) {
            PathState::DiskBacked
        } else {
            PathState::MemoryOnly
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or replace a file in the tree.
    ///
    /// With `persist`, a memory-only path is mirrored to the store. With
    /// `has_handle`, the caller asserts the content came from disk, so no
    /// record is written and any stale one is removed. Store failures are
    /// logged; the tree is updated regardless.
    pub fn add_file(
        &self,
        path: &str,
        content: &str,
        persist: bool,
        has_handle: bool,
    ) -> VfsResult<String> {
        let path = self.tree.write().add_file(path, content)?;
        let disk_backed = has_handle || self.disk.is_bound(&path);

        if disk_backed {
            if let Err(e) = self.store.delete_file(&path) {
                warn!(path = %path, error = %e, "failed to drop stale record");
            }
        } else if persist {
            if let Err(e) = self.store.save_file(&path, content) {
                warn!(path = %path, error = %e, "failed to persist file");
            }
        }
        debug!(path = %path, persist, disk_backed, "added file");
        Ok(path)
    }

    /// Save new content for an existing file.
    ///
    /// Disk-backed paths write through their handle; everything else goes to
    /// the store. The in-memory content is updated first and never rolled
    /// back.
    pub async fn update_file(&self, path: &str, content: &str) -> VfsResult<SaveOutcome> {
        let path = path::normalize(path);
        self.tree.write().set_content(&path, content)?;

        if self.disk.is_bound(&path) {
            let write = self.disk.write_file(&path, content).await;
            if write.saved_to_disk {
                if let Err(e) = self.store.delete_file(&path) {
                    warn!(path = %path, error = %e, "failed to drop stale record");
                }
                return Ok(SaveOutcome {
                    saved_to_disk: true,
                    ..SaveOutcome::default()
                });
            }

            let error = write.error.unwrap_or(VfsError::NotBound);
            if error.is_permission() {
                warn!(path = %path, error = %error, "disk access lost; path is now memory-only");
                self.disk.unregister(&path);
            }
            return Ok(SaveOutcome {
                disk_error: Some(error.to_string()),
                ..SaveOutcome::default()
            });
        }

        match self.store.save_file(&path, content) {
            Ok(()) => {
                debug!(path = %path, bytes = content.len(), "saved to store");
                Ok(SaveOutcome {
                    persisted: true,
                    ..SaveOutcome::default()
                })
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to persist file");
                Ok(SaveOutcome {
                    store_error: Some(e.to_string()),
                    ..SaveOutcome::default()
                })
            }
        }
    }

    /// Create a new file. On disk when a directory is bound, else in memory
    /// and the store.
    pub async fn create_file(&self, path: &str, content: &str) -> VfsResult<String> {
        let path = path::normalize(path);
        if self.tree.read().contains(&path) {
            return Err(VfsError::already_exists(path));
        }

        if self.disk.is_active() {
            self.disk.create_file(&path, content).await?;
            self.add_file(&path, content, false, true)
        } else {
            self.add_file(&path, content, true, false)
        }
    }

    /// Create a directory and any missing ancestors.
    ///
    /// In memory mode an empty directory is kept alive across reloads by a
    /// placeholder record.
    pub async fn create_directory(&self, path: &str) -> VfsResult<String> {
        let path = path::normalize(path);
        if path.is_empty() {
            return Err(VfsError::invalid_path("empty directory path"));
        }

        if self.disk.is_active() {
            self.disk.create_directory(&path).await?;
            return self.tree.write().create_directory(&path);
        }

        let path = self.tree.write().create_directory(&path)?;
        if let Err(e) = self.store.save_placeholder(&path) {
            warn!(path = %path, error = %e, "failed to persist placeholder");
        }
        debug!(path = %path, "created directory");
        Ok(path)
    }

    /// Remove a file or directory subtree from memory, the store and the
    /// HandleMap. Returns false if nothing was there.
    ///
    /// The disk copy is left alone; see [`delete_file_from_disk`](Self::delete_file_from_disk).
    pub fn delete_file(&self, path: &str) -> bool {
        let path = path::normalize(path);
        let parent = path::parent(&path).to_string();

        let (removed, parent_now_empty) = {
            let mut tree = self.tree.write();
            let removed = match tree.remove(&path) {
                Ok(removed) => removed,
                Err(e) => {
                    debug!(path = %path, error = %e, "nothing to delete");
                    return false;
                }
            };
            let empty = !parent.is_empty()
                && tree
                    .get(&parent)
                    .is_some_and(|node| node.children().is_empty());
            (removed, empty)
        };

        if let Err(e) = self.store.delete_prefix(&path) {
            warn!(path = %path, error = %e, "failed to delete persisted records");
        }
        self.disk.unregister_prefix(&path);

        if parent_now_empty && !self.disk.is_active() {
            if let Err(e) = self.store.save_placeholder(&parent) {
                warn!(path = %parent, error = %e, "failed to persist placeholder");
            }
        }
        debug!(path = %path, removed = removed.len(), "deleted");
        true
    }

    /// Remove an entry from the bound directory. Returns false when no
    /// directory is bound.
    pub async fn delete_file_from_disk(&self, path: &str) -> VfsResult<bool> {
        self.disk.delete_from_disk(path).await
    }

    /// Rename a file or directory in place. Returns the new path.
    pub async fn rename_entry(&self, path: &str, new_name: &str) -> VfsResult<String> {
        let (old_path, new_path, kind) = {
            let tree = self.tree.read();
            let (old_path, new_path) = tree.check_rename(path, new_name)?;
            let kind = tree
                .kind(&old_path)
                .ok_or_else(|| VfsError::not_found(old_path.clone()))?;
            (old_path, new_path, kind)
        };
        if old_path == new_path {
            return Ok(new_path);
        }

        let on_disk = self.disk.is_active()
            && match kind {
                NodeKind::File => self.disk.is_bound(&old_path),
                NodeKind::Directory => true,
            };

        if on_disk {
            self.disk.rename(&old_path, new_name, kind.is_dir()).await?;
        }
        self.tree.write().rename(&old_path, new_name)?;
        self.repersist(&old_path, &new_path);

        debug!(from = %old_path, to = %new_path, "renamed");
        Ok(new_path)
    }

    /// Move a file to a different, existing directory. Directories are rejected.
    pub async fn move_file(&self, source: &str, target: &str) -> VfsResult<()> {
        let (source, target) = self.tree.read().check_move(source, target)?;

        if self.disk.is_bound(&source) {
            self.disk.move_file(&source, &target).await?;
            self.tree.write().move_file(&source, &target)?;
        } else {
            let content = {
                let mut tree = self.tree.write();
                tree.move_file(&source, &target)?;
                tree.content(&target).unwrap_or_default().to_string()
            };
            if let Err(e) = self.store.save_file(&target, &content) {
                warn!(path = %target, error = %e, "failed to persist moved file");
            }
            if let Err(e) = self.store.delete_file(&source) {
                warn!(path = %source, error = %e, "failed to drop moved record");
            }
        }

        debug!(from = %source, to = %target, "moved");
        Ok(())
    }

    /// Rewrite the store after renaming `old` to `new`.
    ///
    /// Only memory-only entries get records: disk-backed files are skipped,
    /// and placeholders are written only while no directory is bound.
    fn repersist(&self, old: &str, new: &str) {
        if let Err(e) = self.store.delete_prefix(old) {
            warn!(path = %old, error = %e, "failed to drop renamed records");
        }

        let tree = self.tree.read();
        for entry in tree.paths_under(new) {
            let result = match tree.kind(&entry) {
                Some(NodeKind::File) if !self.disk.is_bound(&entry) => {
                    self.store
                        .save_file(&entry, tree.content(&entry).unwrap_or_default())
                }
                Some(NodeKind::Directory)
                    if !self.disk.is_active()
                        && tree.get(&entry).is_some_and(|n| n.children().is_empty()) =>
                {
                    self.store.save_placeholder(&entry)
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(path = %entry, error = %e, "failed to persist renamed entry");
            }
        }
    }

    // ========================================================================
    // Directory binding
    // ========================================================================

    /// Bind a directory without loading it. Replaces any prior binding.
    pub fn set_directory_handle(&self, handle: Arc<dyn DirectoryHandle>) {
        self.disk.set_directory_handle(handle);
    }

    pub fn directory_handle(&self) -> Option<Arc<dyn DirectoryHandle>> {
        self.disk.directory_handle()
    }

    /// Release the binding. Disk-backed paths stay in memory as memory-only.
    pub fn release_directory_handle(&self) -> Option<Arc<dyn DirectoryHandle>> {
        self.disk.release_directory_handle()
    }

    /// Bind a directory, replace the tree with its contents and register a
    /// handle for every file. Returns the number of files loaded.
    ///
    /// Loaded paths are disk-authoritative, so any record the store still
    /// holds for them is dropped.
    pub async fn open_directory(&self, handle: Arc<dyn DirectoryHandle>) -> VfsResult<usize> {
        self.disk.set_directory_handle(handle);
        self.tree.write().clear();

        let loaded = self.disk.load_tree().await?;
        {
            let mut tree = self.tree.write();
            for dir in &loaded.directories {
                tree.create_directory(dir)?;
            }
            for (file_path, content) in &loaded.files {
                tree.add_file(file_path, content.as_str())?;
            }
            tree.sort_children();
        }

        for (file_path, _) in &loaded.files {
            if let Err(e) = self.store.delete_file(file_path) {
                warn!(path = %file_path, error = %e, "failed to drop stale record");
            }
        }
        Ok(loaded.files.len())
    }
}

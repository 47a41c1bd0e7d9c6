//! Bridge between virtual paths and a bound directory on disk.
//!
//! The bridge owns the optional root [`DirectoryHandle`] and the HandleMap:
//! one [`FileHandle`] per disk-backed virtual path. A path present in the
//! map is disk-authoritative. Navigation walks parent segments from the
//! root on every call; only leaf file handles are cached.
//!
//! Locks are never held across `.await`: handles are cloned out of the maps
//! before any disk I/O starts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{VfsError, VfsResult};
use crate::handle::{DirectoryHandle, FileHandle, HandleEntry};
use crate::node::NodeKind;
use crate::path;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a disk write. Failures are reported, never raised.
#[derive(Debug)]
pub struct DiskWrite {
    pub saved_to_disk: bool,
    pub error: Option<VfsError>,
}

impl DiskWrite {
    fn saved() -> Self {
        Self {
            saved_to_disk: true,
            error: None,
        }
    }

    fn failed(error: VfsError) -> Self {
        Self {
            saved_to_disk: false,
            error: Some(error),
        }
    }
}

/// Snapshot of a bound directory, produced by [`DiskBridge::load_tree`].
#[derive(Debug, Default)]
pub struct DiskTree {
    /// `(path, content)` for every readable text file, in walk order.
    pub files: Vec<(String, String)>,
    /// Every directory below the root, in walk order.
    pub directories: Vec<String>,
}

/// Binding and handle bookkeeping for disk-backed paths.
#[derive(Default)]
pub struct DiskBridge {
    root: RwLock<Option<Arc<dyn DirectoryHandle>>>,
    handles: RwLock<HashMap<String, Arc<dyn FileHandle>>>,
}

impl std::fmt::Debug for DiskBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBridge")
            .field("bound", &self.is_active())
            .field("handles", &self.handles.read().len())
            .finish()
    }
}

impl DiskBridge {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Bind a root directory. Replaces any prior binding and clears the HandleMap.
    pub fn set_directory_handle(&self, handle: Arc<dyn DirectoryHandle>) {
        info!(name = %handle.name(), "directory bound");
        *self.root.write() = Some(handle);
        self.handles.write().clear();
    }

    pub fn directory_handle(&self) -> Option<Arc<dyn DirectoryHandle>> {
        self.root.read().clone()
    }

    /// Drop the binding and every file handle.
    pub fn release_directory_handle(&self) -> Option<Arc<dyn DirectoryHandle>> {
        let released = self.root.write().take();
        self.handles.write().clear();
        if let Some(handle) = &released {
            info!(name = %handle.name(), "directory released");
        }
        released
    }

    /// True while a root directory is bound.
    pub fn is_active(&self) -> bool {
        self.root.read().is_some()
    }

    fn bound_root(&self) -> VfsResult<Arc<dyn DirectoryHandle>> {
        self.directory_handle().ok_or(VfsError::NotBound)
    }

    // ========================================================================
    // HandleMap
    // ========================================================================

    pub fn register(&self, path: &str, handle: Arc<dyn FileHandle>) {
        self.handles.write().insert(path::normalize(path), handle);
    }

    pub fn file_handle(&self, path: &str) -> Option<Arc<dyn FileHandle>> {
        self.handles.read().get(&path::normalize(path)).cloned()
    }

    pub fn is_bound(&self, path: &str) -> bool {
        self.handles.read().contains_key(&path::normalize(path))
    }

    pub fn unregister(&self, path: &str) -> Option<Arc<dyn FileHandle>> {
        self.handles.write().remove(&path::normalize(path))
    }

    /// Drop every handle at or beneath `dir`. Returns the dropped paths, sorted.
    pub fn unregister_prefix(&self, dir: &str) -> Vec<String> {
        let dir = path::normalize(dir);
        let mut handles = self.handles.write();
        let mut dropped: Vec<String> = handles
            .keys()
            .filter(|p| path::is_within(p, &dir))
            .cloned()
            .collect();
        for p in &dropped {
            handles.remove(p);
        }
        dropped.sort();
        dropped
    }

    /// Every disk-backed path, sorted.
    pub fn bound_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handles.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Forget every file handle but keep the binding.
    pub fn clear_handles(&self) {
        self.handles.write().clear();
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Walk from the root to `dir`, one segment at a time.
    async fn navigate(&self, dir: &str, create: bool) -> VfsResult<Arc<dyn DirectoryHandle>> {
        let mut current = self.bound_root()?;
        for segment in path::segments(dir) {
            current = current.get_directory_handle(segment, create).await?;
        }
        Ok(current)
    }

    /// Kind of `name` inside `dir`, checking file first, then directory.
    async fn entry_kind(dir: &Arc<dyn DirectoryHandle>, name: &str) -> VfsResult<Option<NodeKind>> {
        match dir.get_file_handle(name, false).await {
            Ok(_) => return Ok(Some(NodeKind::File)),
            Err(VfsError::IsADirectory(_)) => return Ok(Some(NodeKind::Directory)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        match dir.get_directory_handle(name, false).await {
            Ok(_) => Ok(Some(NodeKind::Directory)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Write content through the path's handle: open stream, write, close.
    ///
    /// If `write` fails the stream is dropped without `close()`, which
    /// discards the staged data and leaves the file as it was.
    pub async fn write_file(&self, path: &str, content: &str) -> DiskWrite {
        let Some(handle) = self.file_handle(path) else {
            return DiskWrite::failed(VfsError::NotBound);
        };
        match write_through(handle.as_ref(), content).await {
            Ok(()) => {
                debug!(path = %path, bytes = content.len(), "wrote to disk");
                DiskWrite::saved()
            }
            Err(e) => {
                warn!(path = %path, error = %e, "disk write failed");
                DiskWrite::failed(e)
            }
        }
    }

    pub async fn read_file(&self, path: &str) -> VfsResult<String> {
        let handle = self
            .file_handle(path)
            .ok_or_else(|| VfsError::not_found(path.to_string()))?;
        handle.read_text().await
    }

    /// Create a file on disk (with parents), write it and register its handle.
    pub async fn create_file(&self, path: &str, content: &str) -> VfsResult<()> {
        let path = path::normalize(path);
        let name = path::file_name(&path);
        path::validate_name(name)?;

        let dir = self.navigate(path::parent(&path), true).await?;
        let handle = dir.get_file_handle(name, true).await?;
        write_through(handle.as_ref(), content).await?;
        self.register(&path, handle);
        debug!(path = %path, "created file on disk");
        Ok(())
    }

    /// Create a directory (and any missing parents) on disk.
    pub async fn create_directory(&self, path: &str) -> VfsResult<()> {
        let path = path::normalize(path);
        if path.is_empty() {
            return Err(VfsError::invalid_path("empty directory path"));
        }
        self.navigate(&path, true).await?;
        debug!(path = %path, "created directory on disk");
        Ok(())
    }

    /// Remove a file or directory from disk, recursively.
    ///
    /// Returns `Ok(false)` when no directory is bound.
    pub async fn delete_from_disk(&self, path: &str) -> VfsResult<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        let path = path::normalize(path);
        if path.is_empty() {
            return Err(VfsError::invalid_path("cannot delete the bound root"));
        }
        let name = path::file_name(&path);
        let dir = self.navigate(path::parent(&path), false).await?;
        if Self::entry_kind(&dir, name).await?.is_none() {
            return Err(VfsError::not_found(path));
        }

        dir.remove_entry(name, true).await?;
        self.unregister_prefix(&path);
        debug!(path = %path, "deleted from disk");
        Ok(true)
    }

    /// Recursively copy every file and sub-directory of `source` into `target`.
    pub fn copy_directory<'a>(
        &'a self,
        source: Arc<dyn DirectoryHandle>,
        target: Arc<dyn DirectoryHandle>,
    ) -> BoxFuture<'a, VfsResult<()>> {
        Box::pin(async move {
            for entry in source.entries().await? {
                match entry {
                    HandleEntry::File(file) => {
                        let content = file.read_text().await?;
                        let copy = target.get_file_handle(file.name(), true).await?;
                        write_through(copy.as_ref(), &content).await?;
                    }
                    HandleEntry::Directory(dir) => {
                        let copy = target.get_directory_handle(dir.name(), true).await?;
                        self.copy_directory(dir, copy).await?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Rename an entry in place by copying to a sibling and removing the original.
    ///
    /// Handles under the old path are dropped and re-registered under the
    /// new one. Returns the new path.
    pub async fn rename(&self, path: &str, new_name: &str, is_dir: bool) -> VfsResult<String> {
        path::validate_name(new_name)?;
        let old_path = path::normalize(path);
        if old_path.is_empty() {
            return Err(VfsError::invalid_path("cannot rename the bound root"));
        }
        let old_name = path::file_name(&old_path);
        let new_path = path::join(path::parent(&old_path), new_name);
        if new_path == old_path {
            return Ok(new_path);
        }

        let parent = self.navigate(path::parent(&old_path), false).await?;
        if Self::entry_kind(&parent, new_name).await?.is_some() {
            return Err(VfsError::already_exists(new_path));
        }

        if is_dir {
            let source = parent.get_directory_handle(old_name, false).await?;
            let target = parent.get_directory_handle(new_name, true).await?;
            self.copy_directory(source, Arc::clone(&target)).await?;
            parent.remove_entry(old_name, true).await?;

            self.unregister_prefix(&old_path);
            let mut files = Vec::new();
            self.walk(new_path.clone(), target, false, &mut files, &mut Vec::new())
                .await?;
            for (file_path, handle, _) in files {
                self.register(&file_path, handle);
            }
        } else {
            let source = parent.get_file_handle(old_name, false).await?;
            let content = source.read_text().await?;
            let target = parent.get_file_handle(new_name, true).await?;
            write_through(target.as_ref(), &content).await?;
            parent.remove_entry(old_name, false).await?;

            self.unregister(&old_path);
            self.register(&new_path, target);
        }

        debug!(from = %old_path, to = %new_path, "renamed on disk");
        Ok(new_path)
    }

    /// Move a file to another directory: create at target, copy, remove source.
    pub async fn move_file(&self, source: &str, target: &str) -> VfsResult<()> {
        let source = path::normalize(source);
        let target = path::normalize(target);
        let source_name = path::file_name(&source);
        let target_name = path::file_name(&target);
        path::validate_name(target_name)?;

        let source_dir = self.navigate(path::parent(&source), false).await?;
        let target_dir = self.navigate(path::parent(&target), false).await?;
        if Self::entry_kind(&target_dir, target_name).await?.is_some() {
            return Err(VfsError::already_exists(target));
        }

        let from = match self.file_handle(&source) {
            Some(handle) => handle,
            None => source_dir.get_file_handle(source_name, false).await?,
        };
        let content = from.read_text().await?;
        let to = target_dir.get_file_handle(target_name, true).await?;
        write_through(to.as_ref(), &content).await?;
        source_dir.remove_entry(source_name, false).await?;

        self.unregister(&source);
        self.register(&target, to);
        debug!(from = %source, to = %target, "moved on disk");
        Ok(())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Read the whole bound directory and register a handle for every file.
    pub async fn load_tree(&self) -> VfsResult<DiskTree> {
        let root = self.bound_root()?;
        let mut files = Vec::new();
        let mut directories = Vec::new();
        self.walk(String::new(), root, true, &mut files, &mut directories)
            .await?;

        let mut tree = DiskTree {
            files: Vec::with_capacity(files.len()),
            directories,
        };
        for (file_path, handle, content) in files {
            self.register(&file_path, handle);
            if let Some(content) = content {
                tree.files.push((file_path, content));
            }
        }
        info!(
            files = tree.files.len(),
            directories = tree.directories.len(),
            "loaded directory tree"
        );
        Ok(tree)
    }

    /// Visit one directory level: read its files concurrently, then recurse
    /// into sub-directories depth-first.
    #[allow(clippy::type_complexity)]
    fn walk<'a>(
        &'a self,
        prefix: String,
        dir: Arc<dyn DirectoryHandle>,
        read_content: bool,
        files: &'a mut Vec<(String, Arc<dyn FileHandle>, Option<String>)>,
        directories: &'a mut Vec<String>,
    ) -> BoxFuture<'a, VfsResult<()>> {
        Box::pin(async move {
            let mut file_handles = Vec::new();
            let mut subdirs = Vec::new();
            for entry in dir.entries().await? {
                let entry_path = path::join(&prefix, entry.name());
                match entry {
                    HandleEntry::File(handle) => file_handles.push((entry_path, handle)),
                    HandleEntry::Directory(handle) => subdirs.push((entry_path, handle)),
                }
            }

            if read_content {
                let reads = file_handles.iter().map(|(_, handle)| handle.read_text());
                let contents = join_all(reads).await;
                for ((file_path, handle), content) in file_handles.into_iter().zip(contents) {
                    match content {
                        Ok(text) => files.push((file_path, handle, Some(text))),
                        Err(e) if e.is_permission() => return Err(e),
                        Err(e) => {
                            warn!(path = %file_path, error = %e, "skipping unreadable file");
                        }
                    }
                }
            } else {
                files.extend(file_handles.into_iter().map(|(p, h)| (p, h, None)));
            }

            for (dir_path, handle) in subdirs {
                directories.push(dir_path.clone());
                self.walk(dir_path, handle, read_content, files, directories)
                    .await?;
            }
            Ok(())
        })
    }
}

/// Open a stream, write, close. A failed write drops the stream unclosed.
async fn write_through(handle: &dyn FileHandle, content: &str) -> VfsResult<()> {
    let mut stream = handle.create_writable().await?;
    stream.write(content).await.map_err(partial)?;
    stream.close().await.map_err(partial)
}

fn partial(e: VfsError) -> VfsError {
    if e.is_permission() {
        e
    } else {
        VfsError::partial_write(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::LocalDirectoryHandle;
    use tempfile::TempDir;

    fn setup() -> (DiskBridge, LocalDirectoryHandle, TempDir) {
        let dir = TempDir::new().unwrap();
        let handle = LocalDirectoryHandle::open(dir.path()).unwrap();
        let bridge = DiskBridge::new();
        bridge.set_directory_handle(Arc::new(handle.clone()));
        (bridge, handle, dir)
    }

    #[tokio::test]
    async fn test_load_tree_registers_handles() {
        let (bridge, _handle, dir) = setup();
        std::fs::create_dir_all(dir.path().join("src/util")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();
        std::fs::write(dir.path().join("src/app.js"), "a").unwrap();
        std::fs::write(dir.path().join("src/util/helpers.js"), "b").unwrap();

        let tree = bridge.load_tree().await.unwrap();
        let mut files: Vec<_> = tree.files.iter().map(|(p, _)| p.as_str()).collect();
        files.sort();
        assert_eq!(files, vec!["README.md", "src/app.js", "src/util/helpers.js"]);
        assert_eq!(tree.directories, vec!["empty", "src", "src/util"]);

        assert_eq!(
            bridge.bound_paths(),
            vec!["README.md", "src/app.js", "src/util/helpers.js"]
        );
        assert_eq!(bridge.read_file("src/util/helpers.js").await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_load_tree_skips_binary_files() {
        let (bridge, _handle, dir) = setup();
        std::fs::write(dir.path().join("ok.txt"), "text").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let tree = bridge.load_tree().await.unwrap();
        assert_eq!(tree.files, vec![("ok.txt".to_string(), "text".to_string())]);
        assert!(!bridge.is_bound("blob.bin"));
    }

    #[tokio::test]
    async fn test_write_file_through_handle() {
        let (bridge, _handle, dir) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        bridge.load_tree().await.unwrap();

        let outcome = bridge.write_file("a.txt", "new").await;
        assert!(outcome.saved_to_disk);
        assert!(outcome.error.is_none());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_write_file_unbound_path_reports_failure() {
        let (bridge, _handle, _dir) = setup();
        let outcome = bridge.write_file("nowhere.txt", "x").await;
        assert!(!outcome.saved_to_disk);
        assert!(matches!(outcome.error, Some(VfsError::NotBound)));
    }

    #[tokio::test]
    async fn test_write_file_revoked_is_permission() {
        let (bridge, handle, dir) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        bridge.load_tree().await.unwrap();

        handle.revoke();
        let outcome = bridge.write_file("a.txt", "new").await;
        assert!(!outcome.saved_to_disk);
        assert!(outcome.error.unwrap().is_permission());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_create_file_makes_parents() {
        let (bridge, _handle, dir) = setup();
        bridge.create_file("docs/guide/intro.md", "hello").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("docs/guide/intro.md")).unwrap(),
            "hello"
        );
        assert!(bridge.is_bound("docs/guide/intro.md"));
    }

    #[tokio::test]
    async fn test_delete_from_disk_file_and_directory() {
        let (bridge, _handle, dir) = setup();
        std::fs::create_dir_all(dir.path().join("d/e")).unwrap();
        std::fs::write(dir.path().join("d/e/f.txt"), "f").unwrap();
        std::fs::write(dir.path().join("top.txt"), "t").unwrap();
        bridge.load_tree().await.unwrap();

        assert!(bridge.delete_from_disk("top.txt").await.unwrap());
        assert!(!dir.path().join("top.txt").exists());

        assert!(bridge.delete_from_disk("d").await.unwrap());
        assert!(!dir.path().join("d").exists());
        assert!(bridge.bound_paths().is_empty());

        assert!(bridge.delete_from_disk("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_without_binding() {
        let bridge = DiskBridge::new();
        assert!(!bridge.delete_from_disk("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_directory_rebinds_handles() {
        let (bridge, _handle, dir) = setup();
        std::fs::create_dir_all(dir.path().join("lib/nested")).unwrap();
        std::fs::write(dir.path().join("lib/a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("lib/nested/b.rs"), "b").unwrap();
        bridge.load_tree().await.unwrap();

        let new_path = bridge.rename("lib", "core", true).await.unwrap();
        assert_eq!(new_path, "core");
        assert!(!dir.path().join("lib").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("core/nested/b.rs")).unwrap(),
            "b"
        );
        assert_eq!(bridge.bound_paths(), vec!["core/a.rs", "core/nested/b.rs"]);

        let outcome = bridge.write_file("core/a.rs", "changed").await;
        assert!(outcome.saved_to_disk);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("core/a.rs")).unwrap(),
            "changed"
        );
    }

    #[tokio::test]
    async fn test_rename_file_collision() {
        let (bridge, _handle, dir) = setup();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        bridge.load_tree().await.unwrap();

        assert!(matches!(
            bridge.rename("a.txt", "b.txt", false).await,
            Err(VfsError::AlreadyExists(_))
        ));

        bridge.rename("a.txt", "c.txt", false).await.unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert!(bridge.is_bound("c.txt"));
        assert!(!bridge.is_bound("a.txt"));
    }

    #[tokio::test]
    async fn test_move_file_between_directories() {
        let (bridge, _handle, dir) = setup();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        bridge.load_tree().await.unwrap();

        bridge.move_file("src/main.rs", "bin/main.rs").await.unwrap();
        assert!(!dir.path().join("src/main.rs").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bin/main.rs")).unwrap(),
            "fn main() {}"
        );
        assert_eq!(bridge.bound_paths(), vec!["bin/main.rs"]);
    }

    #[tokio::test]
    async fn test_release_clears_handles() {
        let (bridge, _handle, dir) = setup();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        bridge.load_tree().await.unwrap();
        assert!(bridge.is_bound("a.txt"));

        assert!(bridge.release_directory_handle().is_some());
        assert!(!bridge.is_active());
        assert!(bridge.bound_paths().is_empty());
        assert!(matches!(bridge.load_tree().await, Err(VfsError::NotBound)));
    }
}

//! Capability handles for a real directory.
//!
//! A [`DirectoryHandle`] is a host-granted, revocable token scoped to one
//! directory. It can hand out child handles by name, enumerate entries and
//! remove children, but it cannot rename anything: there is no atomic
//! rename primitive, so callers copy and delete instead. Writes go through a
//! [`WritableFile`] stream that only becomes visible on `close()`.
//!
//! [`LocalDirectoryHandle`] implements the traits over `tokio::fs`. Every
//! handle derived from the same root shares one permission flag, so
//! [`LocalDirectoryHandle::revoke`] cuts off the whole tree at once.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;

use crate::error::{VfsError, VfsResult};
use crate::path;

/// Write stream for one file. Dropping it without `close()` discards the data.
#[async_trait]
pub trait WritableFile: Send {
    /// Append text to the pending content.
    async fn write(&mut self, data: &str) -> VfsResult<()>;

    /// Commit the pending content to the file.
    async fn close(&mut self) -> VfsResult<()>;
}

/// Handle to one file inside a bound directory.
#[async_trait]
pub trait FileHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Read the whole file as UTF-8 text.
    async fn read_text(&self) -> VfsResult<String>;

    /// Open a write stream that replaces the content on close.
    async fn create_writable(&self) -> VfsResult<Box<dyn WritableFile>>;
}

/// A child of a directory handle.
#[derive(Debug, Clone)]
pub enum HandleEntry {
    File(Arc<dyn FileHandle>),
    Directory(Arc<dyn DirectoryHandle>),
}

impl HandleEntry {
    pub fn name(&self) -> &str {
        match self {
            HandleEntry::File(f) => f.name(),
            HandleEntry::Directory(d) => d.name(),
        }
    }
}

/// Handle to a directory inside (or at the root of) a binding.
#[async_trait]
pub trait DirectoryHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Get a child file, optionally creating it empty.
    async fn get_file_handle(&self, name: &str, create: bool) -> VfsResult<Arc<dyn FileHandle>>;

    /// Get a child directory, optionally creating it.
    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> VfsResult<Arc<dyn DirectoryHandle>>;

    /// Remove a child. Non-empty directories need `recursive`.
    async fn remove_entry(&self, name: &str, recursive: bool) -> VfsResult<()>;

    /// List children, sorted by name.
    async fn entries(&self) -> VfsResult<Vec<HandleEntry>>;
}

/// Shared grant state for one binding.
#[derive(Debug)]
struct Grant {
    root: PathBuf,
    granted: AtomicBool,
}

impl Grant {
    fn check(&self, path: &Path) -> VfsResult<()> {
        if self.granted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VfsError::permission_denied(path.display().to_string()))
        }
    }

    /// Resolve `name` under `dir`, refusing anything that leaves the root.
    async fn child(&self, dir: &Path, name: &str) -> VfsResult<PathBuf> {
        path::validate_name(name)?;
        let full = dir.join(name);
        if fs::try_exists(&full).await? {
            let canonical = dunce::canonicalize(&full)?;
            if !canonical.starts_with(&self.root) {
                return Err(VfsError::path_escapes_root(format!(
                    "{} is not under {}",
                    canonical.display(),
                    self.root.display()
                )));
            }
        }
        Ok(full)
    }
}

/// Directory handle backed by the local filesystem.
#[derive(Clone)]
pub struct LocalDirectoryHandle {
    dir: PathBuf,
    name: String,
    grant: Arc<Grant>,
}

impl fmt::Debug for LocalDirectoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDirectoryHandle")
            .field("dir", &self.dir)
            .field("granted", &self.is_granted())
            .finish()
    }
}

impl LocalDirectoryHandle {
    /// Grant access to an existing directory.
    ///
    /// The root is canonicalized so symlinked temp dirs compare correctly.
    pub fn open(root: impl AsRef<Path>) -> VfsResult<Self> {
        let root = dunce::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(VfsError::not_a_directory(root.display().to_string()));
        }
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            dir: root.clone(),
            name,
            grant: Arc::new(Grant {
                root,
                granted: AtomicBool::new(true),
            }),
        })
    }

    /// Revoke access for this handle and everything derived from it.
    pub fn revoke(&self) {
        self.grant.granted.store(false, Ordering::SeqCst);
    }

    /// Restore a previously revoked grant.
    pub fn restore(&self) {
        self.grant.granted.store(true, Ordering::SeqCst);
    }

    pub fn is_granted(&self) -> bool {
        self.grant.granted.load(Ordering::SeqCst)
    }

    /// Real location of this directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn derive(&self, dir: PathBuf, name: &str) -> Self {
        Self {
            dir,
            name: name.to_string(),
            grant: Arc::clone(&self.grant),
        }
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirectoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_file_handle(&self, name: &str, create: bool) -> VfsResult<Arc<dyn FileHandle>> {
        self.grant.check(&self.dir)?;
        let full = self.grant.child(&self.dir, name).await?;
        match fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(VfsError::is_a_directory(full.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                fs::write(&full, b"").await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Arc::new(LocalFileHandle {
            path: full,
            name: name.to_string(),
            grant: Arc::clone(&self.grant),
        }))
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> VfsResult<Arc<dyn DirectoryHandle>> {
        self.grant.check(&self.dir)?;
        let full = self.grant.child(&self.dir, name).await?;
        match fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(VfsError::not_a_directory(full.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                fs::create_dir(&full).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Arc::new(self.derive(full, name)))
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> VfsResult<()> {
        self.grant.check(&self.dir)?;
        let full = self.grant.child(&self.dir, name).await?;
        let meta = fs::symlink_metadata(&full).await?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).await?;
            } else {
                fs::remove_dir(&full).await?;
            }
        } else {
            fs::remove_file(&full).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> VfsResult<Vec<HandleEntry>> {
        self.grant.check(&self.dir)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                entries.push(HandleEntry::Directory(Arc::new(
                    self.derive(entry.path(), &name),
                )));
            } else if file_type.is_file() {
                entries.push(HandleEntry::File(Arc::new(LocalFileHandle {
                    path: entry.path(),
                    name,
                    grant: Arc::clone(&self.grant),
                })));
            } else {
                tracing::debug!(path = %entry.path().display(), "skipping non-regular entry");
            }
        }

        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(entries)
    }
}

/// File handle backed by the local filesystem.
#[derive(Debug)]
pub struct LocalFileHandle {
    path: PathBuf,
    name: String,
    grant: Arc<Grant>,
}

#[async_trait]
impl FileHandle for LocalFileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_text(&self) -> VfsResult<String> {
        self.grant.check(&self.path)?;
        Ok(fs::read_to_string(&self.path).await?)
    }

    async fn create_writable(&self) -> VfsResult<Box<dyn WritableFile>> {
        self.grant.check(&self.path)?;
        let meta = fs::metadata(&self.path).await?;
        if !meta.is_file() {
            return Err(VfsError::is_a_directory(self.path.display().to_string()));
        }
        Ok(Box::new(LocalWritable {
            target: self.path.clone(),
            pending: String::new(),
            grant: Arc::clone(&self.grant),
            closed: false,
        }))
    }
}

/// Staged write: content goes to a swap file and is renamed over the target on close.
struct LocalWritable {
    target: PathBuf,
    pending: String,
    grant: Arc<Grant>,
    closed: bool,
}

impl LocalWritable {
    fn swap_path(&self) -> PathBuf {
        let name = self
            .target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.target.with_file_name(format!(".{name}.swp"))
    }
}

#[async_trait]
impl WritableFile for LocalWritable {
    async fn write(&mut self, data: &str) -> VfsResult<()> {
        self.grant.check(&self.target)?;
        if self.closed {
            return Err(VfsError::other("write after close"));
        }
        self.pending.push_str(data);
        Ok(())
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.grant.check(&self.target)?;
        if self.closed {
            return Ok(());
        }
        let swap = self.swap_path();
        if let Err(e) = fs::write(&swap, self.pending.as_bytes()).await {
            let _ = fs::remove_file(&swap).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&swap, &self.target).await {
            let _ = fs::remove_file(&swap).await;
            return Err(e.into());
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalDirectoryHandle, TempDir) {
        let dir = TempDir::new().unwrap();
        let handle = LocalDirectoryHandle::open(dir.path()).unwrap();
        (handle, dir)
    }

    #[tokio::test]
    async fn test_write_commits_on_close() {
        let (root, dir) = setup();
        let file = root.get_file_handle("a.txt", true).await.unwrap();

        let mut stream = file.create_writable().await.unwrap();
        stream.write("hello ").await.unwrap();
        stream.write("world").await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "");

        stream.close().await.unwrap();
        assert_eq!(file.read_text().await.unwrap(), "hello world");
        assert!(!dir.path().join(".a.txt.swp").exists());
    }

    #[tokio::test]
    async fn test_dropped_stream_leaves_file_untouched() {
        let (root, dir) = setup();
        std::fs::write(dir.path().join("keep.txt"), "original").unwrap();
        let file = root.get_file_handle("keep.txt", false).await.unwrap();

        {
            let mut stream = file.create_writable().await.unwrap();
            stream.write("discarded").await.unwrap();
        }
        assert_eq!(file.read_text().await.unwrap(), "original");
    }

    #[tokio::test]
    async fn test_missing_without_create() {
        let (root, _dir) = setup();
        let err = root.get_file_handle("nope.txt", false).await.unwrap_err();
        assert!(err.is_not_found());
        let err = root.get_directory_handle("nope", false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let (root, dir) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();

        assert!(matches!(
            root.get_file_handle("sub", false).await,
            Err(VfsError::IsADirectory(_))
        ));
        assert!(matches!(
            root.get_directory_handle("f.txt", false).await,
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let (root, dir) = setup();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("c.txt"), "").unwrap();

        let entries = root.entries().await.unwrap();
        let names: Vec<_> = entries.iter().map(HandleEntry::name).collect();
        assert_eq!(names, vec!["a", "b.txt", "c.txt"]);
        assert!(matches!(entries[0], HandleEntry::Directory(_)));
    }

    #[tokio::test]
    async fn test_remove_entry_recursive() {
        let (root, dir) = setup();
        std::fs::create_dir_all(dir.path().join("d/e")).unwrap();
        std::fs::write(dir.path().join("d/e/f.txt"), "x").unwrap();

        assert!(root.remove_entry("d", false).await.is_err());
        root.remove_entry("d", true).await.unwrap();
        assert!(!dir.path().join("d").exists());
    }

    #[tokio::test]
    async fn test_revoke_applies_to_derived_handles() {
        let (root, _dir) = setup();
        let sub = root.get_directory_handle("sub", true).await.unwrap();
        let file = sub.get_file_handle("x.txt", true).await.unwrap();

        root.revoke();
        assert!(file.read_text().await.unwrap_err().is_permission());
        assert!(sub.entries().await.unwrap_err().is_permission());

        root.restore();
        assert_eq!(file.read_text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_names_cannot_escape() {
        let (root, _dir) = setup();
        assert!(root.get_file_handle("../etc", false).await.is_err());
        assert!(root.get_directory_handle("a/b", true).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_outside_root_rejected() {
        let (root, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();

        let err = root.get_file_handle("link.txt", false).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
        assert!(root.get_file_handle("fresh.txt", true).await.is_ok());
    }
}

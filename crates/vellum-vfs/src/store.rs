//! Durable file records in SQLite.
//!
//! The store only ever holds memory-authoritative content. Paths that are
//! backed by a bound directory on disk must never be written here; the
//! [`FileSystem`](crate::FileSystem) facade is the one place that decides.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::VfsResult;
use crate::path;

/// Kind of persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    File,
    /// Marker for an otherwise empty directory, keyed by the directory's
    /// own path. Never surfaced as a file.
    Placeholder,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::File => "file",
            RecordKind::Placeholder => "placeholder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(RecordKind::File),
            "placeholder" => Some(RecordKind::Placeholder),
            _ => None,
        }
    }
}

/// One durable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub path: String,
    pub name: String,
    pub content: String,
    pub kind: RecordKind,
    pub size: i64,
    /// Unix milliseconds.
    pub modified_at: i64,
    pub parent_path: String,
}

impl PersistedRecord {
    /// Directory this record keeps alive, for placeholders.
    pub fn placeholder_dir(&self) -> Option<&str> {
        match self.kind {
            RecordKind::Placeholder => Some(&self.path),
            RecordKind::File => None,
        }
    }
}

/// Persistence adapter used to rehydrate the tree across restarts.
pub trait RecordStore: Send + Sync {
    /// Upsert a file record.
    fn save_file(&self, path: &str, content: &str) -> VfsResult<()>;

    /// Write the placeholder record for `dir`.
    fn save_placeholder(&self, dir: &str) -> VfsResult<()>;

    /// All file records as `path → content` (placeholders excluded).
    fn load_all_files(&self) -> VfsResult<BTreeMap<String, String>>;

    /// Every record, ordered by path.
    fn load_records(&self) -> VfsResult<Vec<PersistedRecord>>;

    /// Fetch a single record.
    fn record(&self, path: &str) -> VfsResult<Option<PersistedRecord>>;

    /// Remove one record. Missing records are not an error.
    fn delete_file(&self, path: &str) -> VfsResult<()>;

    /// Remove `dir` and every record beneath it. Returns the count.
    fn delete_prefix(&self, dir: &str) -> VfsResult<usize>;

    /// Remove every record.
    fn clear(&self) -> VfsResult<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    type TEXT NOT NULL,
    size INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    parent_path TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_path);
"#;

/// SQLite-backed [`RecordStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> VfsResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> VfsResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn upsert(&self, path: &str, content: &str, kind: RecordKind) -> VfsResult<()> {
        let name = path::file_name(path);
        let parent_path = path::parent(path);
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO files (path, name, content, type, size, modified_at, parent_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                path,
                name,
                content,
                kind.as_str(),
                content.len() as i64,
                now_millis(),
                parent_path,
            ],
        )?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedRecord> {
    let kind: String = row.get(3)?;
    Ok(PersistedRecord {
        path: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        kind: RecordKind::parse(&kind).unwrap_or(RecordKind::File),
        size: row.get(4)?,
        modified_at: row.get(5)?,
        parent_path: row.get(6)?,
    })
}

impl RecordStore for SqliteStore {
    fn save_file(&self, path: &str, content: &str) -> VfsResult<()> {
        self.upsert(path, content, RecordKind::File)
    }

    fn save_placeholder(&self, dir: &str) -> VfsResult<()> {
        self.upsert(dir, "", RecordKind::Placeholder)
    }

    fn load_all_files(&self) -> VfsResult<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, content FROM files WHERE type = ?1")?;
        let rows = stmt.query_map(params![RecordKind::File.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
    }

    fn load_records(&self) -> VfsResult<Vec<PersistedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path, name, content, type, size, modified_at, parent_path
             FROM files ORDER BY path",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record(&self, path: &str) -> VfsResult<Option<PersistedRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT path, name, content, type, size, modified_at, parent_path
                 FROM files WHERE path = ?1",
                params![path],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_file(&self, path: &str) -> VfsResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    fn delete_prefix(&self, dir: &str) -> VfsResult<usize> {
        let count = self.conn.lock().execute(
            "DELETE FROM files
             WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
            params![dir],
        )?;
        Ok(count)
    }

    fn clear(&self) -> VfsResult<()> {
        self.conn.lock().execute("DELETE FROM files", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("src/app.js", "console.log(1)").unwrap();
        store.save_file("README.md", "# hi").unwrap();

        let files = store.load_all_files().unwrap();
        assert_eq!(files.get("src/app.js").map(String::as_str), Some("console.log(1)"));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_record_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("src/util/helpers.js", "abc").unwrap();

        let record = store.record("src/util/helpers.js").unwrap().unwrap();
        assert_eq!(record.name, "helpers.js");
        assert_eq!(record.parent_path, "src/util");
        assert_eq!(record.size, 3);
        assert_eq!(record.kind, RecordKind::File);
        assert!(record.modified_at > 0);
    }

    #[test]
    fn test_upsert_replaces() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("a.txt", "one").unwrap();
        store.save_file("a.txt", "three").unwrap();

        let record = store.record("a.txt").unwrap().unwrap();
        assert_eq!(record.content, "three");
        assert_eq!(record.size, 5);
        assert_eq!(store.load_records().unwrap().len(), 1);
    }

    #[test]
    fn test_placeholders_excluded_from_files() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_placeholder("docs").unwrap();

        assert!(store.load_all_files().unwrap().is_empty());
        let records = store.load_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "docs");
        assert_eq!(records[0].placeholder_dir(), Some("docs"));
    }

    #[test]
    fn test_placeholder_does_not_clobber_dotfile() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("docs/.keep", "user content").unwrap();
        store.save_placeholder("docs").unwrap();

        let files = store.load_all_files().unwrap();
        assert_eq!(files.get("docs/.keep").map(String::as_str), Some("user content"));
        assert_eq!(
            store.record("docs").unwrap().unwrap().kind,
            RecordKind::Placeholder
        );
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(RecordKind::parse("file"), Some(RecordKind::File));
        assert_eq!(RecordKind::parse("placeholder"), Some(RecordKind::Placeholder));
        assert_eq!(RecordKind::parse("directory"), None);
    }

    #[test]
    fn test_delete_prefix_respects_segment_boundary() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("docs/a.md", "a").unwrap();
        store.save_file("docs/deep/b.md", "b").unwrap();
        store.save_placeholder("docs/empty").unwrap();
        store.save_file("docs2/c.md", "c").unwrap();

        let removed = store.delete_prefix("docs").unwrap();
        assert_eq!(removed, 3);

        let files = store.load_all_files().unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["docs2/c.md"]);
    }

    #[test]
    fn test_delete_file_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_file("a.txt", "a").unwrap();
        store.save_file("b.txt", "b").unwrap();

        store.delete_file("a.txt").unwrap();
        store.delete_file("missing.txt").unwrap();
        assert!(store.record("a.txt").unwrap().is_none());

        store.clear().unwrap();
        assert!(store.load_records().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("files.db");
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.save_file("keep.txt", "persisted").unwrap();
        }
        let store = SqliteStore::open(&db_path).unwrap();
        let files = store.load_all_files().unwrap();
        assert_eq!(files.get("keep.txt").map(String::as_str), Some("persisted"));
    }
}

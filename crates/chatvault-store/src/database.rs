use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Thread-safe SQLite connection wrapper for the archive database.
/// Uses parking_lot::Mutex for synchronous access (rusqlite is not Sync).
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create the archive database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        init_archive_schema(&conn)?;

        info!(path = %path.display(), "archive database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory archive database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        init_archive_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
        }
    }
}

fn init_archive_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;

    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
    }

    Ok(())
}

/// Read-only handle onto the protocol client's contact directory.
/// The directory is owned and written by the client; the archive only
/// consults it when building an identity cache, and its absence degrades
/// name resolution rather than failing anything.
pub struct Directory {
    conn: Arc<Mutex<Connection>>,
}

impl Directory {
    /// Open the directory database read-only.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        info!(path = %path.display(), "contact directory opened read-only");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Writable in-memory directory carrying the client's schema.
    /// Stands in for the client's database in tests and fixtures.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute_batch(schema::DIRECTORY_TABLES)
            .map_err(|e| StoreError::Database(format!("directory schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a closure with the directory connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl Clone for Directory {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn schema_version_set() {
        let db = Database::in_memory().unwrap();
        let version: u32 = db
            .with_conn(|conn| {
                conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
                    .map_err(|e| StoreError::Database(e.to_string()))
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn tables_created() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let tables: Vec<String> = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            assert!(tables.contains(&"chats".to_string()));
            assert!(tables.contains(&"messages".to_string()));
            assert!(tables.contains(&"schema_version".to_string()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn open_file_database() {
        let dir = std::env::temp_dir().join(format!("chatvault-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("messages.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        // Open again — should not fail
        let db2 = Database::open(&path).unwrap();
        drop(db);
        drop(db2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wal_mode_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            // In-memory databases report "memory"; file databases use "wal"
            assert!(mode == "memory" || mode == "wal", "got: {mode}");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn wal_allows_second_connection_while_first_writes() {
        let dir = std::env::temp_dir().join(format!("chatvault-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("messages.db");
        let writer = Database::open(&path).unwrap();
        let reader = Database::open(&path).unwrap();

        writer
            .with_conn(|conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)",
                    rusqlite::params!["111@s.whatsapp.net", "Bob", "2026-03-01T10:00:00+00:00"],
                )?;
                Ok(())
            })
            .unwrap();

        let count: i64 = reader
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chats", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);

        drop(writer);
        drop(reader);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_in_memory_has_contact_tables() {
        let dir = Directory::in_memory().unwrap();
        dir.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contacts (jid, full_name, push_name) VALUES (?1, ?2, ?3)",
                rusqlite::params!["111@s.whatsapp.net", "Bob Smith", "bob"],
            )?;
            conn.execute(
                "INSERT INTO lid_map (lid, pn) VALUES (?1, ?2)",
                rusqlite::params!["203984751", "111"],
            )?;
            Ok(())
        })
        .unwrap();
    }
}

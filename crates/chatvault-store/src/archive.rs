use std::path::Path;

use tracing::warn;

use crate::chats::ChatRepo;
use crate::database::{Database, Directory};
use crate::error::StoreError;
use crate::ingest::Ingestor;
use crate::messages::MessageRepo;

/// Archive database file inside the store directory.
pub const MESSAGES_DB_FILE: &str = "messages.db";

/// The protocol client's contact directory, if it lives alongside.
pub const DIRECTORY_DB_FILE: &str = "directory.db";

/// Entry point for embedding the archive: owns the message database,
/// holds the optional read-only contact directory, and hands out repos.
pub struct Archive {
    db: Database,
    directory: Option<Directory>,
}

impl Archive {
    /// Open (creating if needed) the archive under the given directory.
    /// The contact directory is attached read-only when present; its
    /// absence or unreadability only degrades identity resolution.
    pub fn open(store_dir: &Path) -> Result<Self, StoreError> {
        let db = Database::open(&store_dir.join(MESSAGES_DB_FILE))?;

        let directory_path = store_dir.join(DIRECTORY_DB_FILE);
        let directory = if directory_path.exists() {
            match Directory::open(&directory_path) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    warn!(
                        path = %directory_path.display(),
                        error = %e,
                        "contact directory unavailable, name resolution degraded"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { db, directory })
    }

    /// In-memory archive without a contact directory (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory()?,
            directory: None,
        })
    }

    /// In-memory archive with a writable in-memory contact directory.
    pub fn in_memory_with_directory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory()?,
            directory: Some(Directory::in_memory()?),
        })
    }

    pub fn chats(&self) -> ChatRepo {
        ChatRepo::new(self.db.clone(), self.directory.clone())
    }

    pub fn messages(&self) -> MessageRepo {
        MessageRepo::new(self.db.clone(), self.directory.clone())
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.db.clone(), self.directory.clone())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }
}

use std::collections::HashMap;

use tracing::warn;

use chatvault_core::ids::{local_part, LID_SUFFIX, USER_SUFFIX};

use crate::database::{Database, Directory};

/// Request-scoped mapping from raw sender identifier to display name.
///
/// Built fresh for each query that resolves names; never persisted.
/// Sources are applied in ascending priority so later ones overwrite:
/// chat-table names (often just phone numbers), then the protocol
/// client's contact directory, then the linked-identifier map resolved
/// through the directory's entries. Every name is indexed under both the
/// full identifier and its local-part.
pub struct IdentityCache {
    names: HashMap<String, String>,
}

impl IdentityCache {
    /// Build the cache from whatever sources are available. Never fails:
    /// an unreadable source logs a warning and contributes no entries.
    pub fn build(db: &Database, directory: Option<&Directory>) -> Self {
        let mut cache = Self {
            names: HashMap::new(),
        };

        cache.load_chat_names(db);
        if let Some(dir) = directory {
            cache.load_contacts(dir);
            cache.load_lid_map(dir);
        }

        cache
    }

    /// Look up a display name: full identifier first, then local-part.
    pub fn lookup(&self, id: &str) -> Option<&str> {
        if let Some(name) = self.names.get(id) {
            return Some(name);
        }
        local_part(id).and_then(|lp| self.names.get(lp).map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn insert(&mut self, id: &str, name: &str) {
        self.names.insert(id.to_owned(), name.to_owned());
        if let Some(lp) = local_part(id) {
            self.names.insert(lp.to_owned(), name.to_owned());
        }
    }

    fn load_chat_names(&mut self, db: &Database) {
        let result = db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT jid, name FROM chats WHERE name IS NOT NULL AND name != ''")?;
            let mut rows = stmt.query([])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let jid: String = row.get(0)?;
                let name: String = row.get(1)?;
                entries.push((jid, name));
            }
            Ok(entries)
        });

        match result {
            Ok(entries) => {
                for (jid, name) in entries {
                    self.insert(&jid, &name);
                }
            }
            Err(e) => warn!(error = %e, "could not read chat names for identity cache"),
        }
    }

    fn load_contacts(&mut self, directory: &Directory) {
        let result = directory.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT jid, full_name, push_name FROM contacts")?;
            let mut rows = stmt.query([])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let jid: String = row.get(0)?;
                let full_name: Option<String> = row.get(1)?;
                let push_name: Option<String> = row.get(2)?;
                entries.push((jid, full_name, push_name));
            }
            Ok(entries)
        });

        match result {
            Ok(entries) => {
                for (jid, full_name, push_name) in entries {
                    let name = full_name
                        .filter(|n| !n.is_empty())
                        .or(push_name.filter(|n| !n.is_empty()));
                    if let Some(name) = name {
                        self.insert(&jid, &name);
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not read contact directory"),
        }
    }

    /// Linked identifiers carry no name of their own; resolve each one's
    /// phone number against the entries accumulated so far and register
    /// the name under the lid's full and bare forms.
    fn load_lid_map(&mut self, directory: &Directory) {
        let result = directory.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT lid, pn FROM lid_map")?;
            let mut rows = stmt.query([])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let lid: String = row.get(0)?;
                let pn: String = row.get(1)?;
                entries.push((lid, pn));
            }
            Ok(entries)
        });

        match result {
            Ok(entries) => {
                for (lid, pn) in entries {
                    let name = self
                        .lookup(&format!("{pn}{USER_SUFFIX}"))
                        .map(str::to_owned);
                    if let Some(name) = name {
                        // insert() also registers the bare lid via local-part
                        self.insert(&format!("{lid}{LID_SUFFIX}"), &name);
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not read linked-identifier map"),
        }
    }
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use chatvault_core::ids::{ChatJid, MessageId};
use chatvault_core::media::MediaDescriptor;
use chatvault_core::views::MessageView;

use crate::context;
use crate::database::{Database, Directory};
use crate::error::StoreError;
use crate::identity::IdentityCache;
use crate::project::{self, MESSAGE_COLUMNS};
use crate::row_helpers;

/// A message record as delivered by the protocol client.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub chat_jid: ChatJid,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media: Option<MediaDescriptor>,
}

/// Filters and pagination for [`MessageRepo::list`]. Filters are
/// conjunctive; the limit/page window is applied to the filtered,
/// sorted set before any context expansion.
#[derive(Clone, Debug)]
pub struct ListMessagesOpts {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub sender: Option<String>,
    pub chat_jid: Option<ChatJid>,
    pub query: Option<String>,
    pub limit: u32,
    pub page: u32,
    pub include_context: bool,
    pub context_before: u32,
    pub context_after: u32,
}

impl Default for ListMessagesOpts {
    fn default() -> Self {
        Self {
            after: None,
            before: None,
            sender: None,
            chat_jid: None,
            query: None,
            limit: 20,
            page: 0,
            include_context: true,
            context_before: 1,
            context_after: 1,
        }
    }
}

pub struct MessageRepo {
    pub(crate) db: Database,
    pub(crate) directory: Option<Directory>,
}

impl MessageRepo {
    pub fn new(db: Database, directory: Option<Directory>) -> Self {
        Self { db, directory }
    }

    pub(crate) fn identity_cache(&self) -> IdentityCache {
        IdentityCache::build(&self.db, self.directory.as_ref())
    }

    /// Insert or replace a message on its (id, chat_jid) composite key.
    /// A message with neither text content nor media is silently dropped;
    /// returns whether a row was written.
    #[instrument(skip(self, msg), fields(message_id = %msg.id, chat_jid = %msg.chat_jid))]
    pub fn upsert(&self, msg: &IncomingMessage) -> Result<bool, StoreError> {
        if msg.content.is_empty() && msg.media.is_none() {
            return Ok(false);
        }

        self.db.with_conn(|conn| {
            let media = msg.media.as_ref();
            conn.execute(
                "INSERT OR REPLACE INTO messages
                 (id, chat_jid, sender, content, timestamp, is_from_me,
                  media_type, filename, url, media_key, file_sha256, file_enc_sha256, file_length)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    msg.id.as_str(),
                    msg.chat_jid.as_str(),
                    msg.sender,
                    msg.content,
                    msg.timestamp.to_rfc3339(),
                    msg.is_from_me,
                    media.map(|m| m.media_type.as_str()),
                    media.map(|m| m.filename.as_str()),
                    media.map(|m| m.url.as_str()),
                    media.map(|m| m.media_key.as_slice()),
                    media.map(|m| m.file_sha256.as_slice()),
                    media.map(|m| m.file_enc_sha256.as_slice()),
                    media.map(|m| m.file_length as i64),
                ],
            )?;
            Ok(true)
        })
    }

    /// List messages matching the filters, newest first. When
    /// `include_context` is set, each match is expanded into its
    /// chronological window and message ids are de-duplicated across
    /// windows, first occurrence wins — the output stays in match order,
    /// chronological within each window, and is NOT re-sorted globally.
    #[instrument(skip(self, opts), fields(limit = opts.limit, page = opts.page))]
    pub fn list(&self, opts: &ListMessagesOpts) -> Result<Vec<MessageView>, StoreError> {
        let matches = self.db.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON m.chat_jid = c.jid"
            );
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(after) = &opts.after {
                params.push(Box::new(after.to_rfc3339()));
                clauses.push(format!("m.timestamp > ?{}", params.len()));
            }
            if let Some(before) = &opts.before {
                params.push(Box::new(before.to_rfc3339()));
                clauses.push(format!("m.timestamp < ?{}", params.len()));
            }
            if let Some(sender) = &opts.sender {
                params.push(Box::new(sender.clone()));
                clauses.push(format!("m.sender = ?{}", params.len()));
            }
            if let Some(chat_jid) = &opts.chat_jid {
                params.push(Box::new(chat_jid.as_str().to_owned()));
                clauses.push(format!("m.chat_jid = ?{}", params.len()));
            }
            if let Some(query) = &opts.query {
                params.push(Box::new(format!("%{query}%")));
                let n = params.len();
                clauses.push(format!(
                    "(LOWER(m.content) LIKE LOWER(?{n}) OR LOWER(m.media_type) LIKE LOWER(?{n}))"
                ));
            }

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }

            sql.push_str(" ORDER BY m.timestamp DESC");
            params.push(Box::new(opts.limit as i64));
            let limit_idx = params.len();
            params.push(Box::new(opts.page as i64 * opts.limit as i64));
            let offset_idx = params.len();
            sql.push_str(&format!(" LIMIT ?{limit_idx} OFFSET ?{offset_idx}"));

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(project::scan_raw_message(row)?);
            }
            Ok(out)
        })?;

        let cache = self.identity_cache();

        if opts.include_context && !matches.is_empty() {
            let mut seen: HashSet<String> = HashSet::new();
            let mut result = Vec::new();
            for matched in &matches {
                let window = self.db.with_conn(|conn| {
                    context::context_raw(conn, &matched.id, opts.context_before, opts.context_after)
                });
                let window = match window {
                    Ok(w) => w,
                    // One bad expansion must not fail the whole list
                    Err(e) => {
                        warn!(message_id = %matched.id, error = %e, "skipping context expansion");
                        continue;
                    }
                };
                for raw in window {
                    if seen.insert(raw.id.clone()) {
                        result.push(project::project_message(raw, &cache));
                    }
                }
            }
            return Ok(result);
        }

        Ok(matches
            .into_iter()
            .map(|m| project::project_message(m, &cache))
            .collect())
    }

    /// Most recent message where the identifier is the sender or the
    /// chat key.
    #[instrument(skip(self), fields(contact = %jid))]
    pub fn last_interaction(&self, jid: &str) -> Result<MessageView, StoreError> {
        let raw = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON m.chat_jid = c.jid
                 WHERE m.sender = ?1 OR c.jid = ?1
                 ORDER BY m.timestamp DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query([jid])?;
            match rows.next()? {
                Some(row) => project::scan_raw_message(row),
                None => Err(StoreError::NotFound(format!("no interaction with {jid}"))),
            }
        })?;

        let cache = self.identity_cache();
        Ok(project::project_message(raw, &cache))
    }

    /// The stored media descriptor, verbatim. `NotFound` when the message
    /// does not exist or carries no media.
    #[instrument(skip(self), fields(message_id = %message_id, chat_jid = %chat_jid))]
    pub fn media_descriptor(
        &self,
        message_id: &MessageId,
        chat_jid: &ChatJid,
    ) -> Result<MediaDescriptor, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT media_type, filename, url, media_key, file_sha256, file_enc_sha256, file_length
                 FROM messages WHERE id = ?1 AND chat_jid = ?2",
            )?;
            let mut rows = stmt.query([message_id.as_str(), chat_jid.as_str()])?;
            let row = match rows.next()? {
                Some(row) => row,
                None => {
                    return Err(StoreError::NotFound(format!(
                        "message {message_id} in chat {chat_jid}"
                    )))
                }
            };

            let media_type: Option<String> =
                row_helpers::get_opt(row, 0, "messages", "media_type")?;
            let media_type = match media_type.filter(|t| !t.is_empty()) {
                Some(t) => t,
                None => {
                    return Err(StoreError::NotFound(format!(
                        "message {message_id} carries no media"
                    )))
                }
            };

            Ok(MediaDescriptor {
                media_type,
                filename: row_helpers::get_opt::<String>(row, 1, "messages", "filename")?
                    .unwrap_or_default(),
                url: row_helpers::get_opt::<String>(row, 2, "messages", "url")?
                    .unwrap_or_default(),
                media_key: row_helpers::get_opt::<Vec<u8>>(row, 3, "messages", "media_key")?
                    .unwrap_or_default(),
                file_sha256: row_helpers::get_opt::<Vec<u8>>(row, 4, "messages", "file_sha256")?
                    .unwrap_or_default(),
                file_enc_sha256: row_helpers::get_opt::<Vec<u8>>(
                    row,
                    5,
                    "messages",
                    "file_enc_sha256",
                )?
                .unwrap_or_default(),
                file_length: row_helpers::get_opt::<i64>(row, 6, "messages", "file_length")?
                    .unwrap_or_default() as u64,
            })
        })
    }
}

//! Write side of the archive: single-message upserts driven by live
//! protocol events, and bulk ingestion of history-sync batches.

use tracing::{info, instrument, warn};

use chatvault_core::ids::ChatJid;

use crate::chats::ChatRepo;
use crate::database::{Database, Directory};
use crate::error::StoreError;
use crate::messages::{IncomingMessage, MessageRepo};

/// The two name fields a synced conversation may carry, resolved by
/// explicit priority: `display_name` wins over `name`; empty strings
/// count as absent.
#[derive(Clone, Debug, Default)]
pub struct ConversationName {
    pub display_name: Option<String>,
    pub name: Option<String>,
}

impl ConversationName {
    pub fn resolve(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.is_empty()))
    }
}

/// One conversation from a history-sync batch.
#[derive(Clone, Debug)]
pub struct HistoryConversation {
    pub jid: ChatJid,
    pub name: ConversationName,
    pub messages: Vec<IncomingMessage>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub conversations: u32,
    pub stored: u32,
    pub skipped: u32,
}

pub struct Ingestor {
    db: Database,
    chats: ChatRepo,
    messages: MessageRepo,
}

impl Ingestor {
    pub fn new(db: Database, directory: Option<Directory>) -> Self {
        let chats = ChatRepo::new(db.clone(), directory.clone());
        let messages = MessageRepo::new(db.clone(), directory);
        Self {
            db,
            chats,
            messages,
        }
    }

    /// Ingest one live message event: stamp the chat with the message's
    /// timestamp, then upsert the message itself. The chat is stamped
    /// even when the message ends up dropped for being empty — the
    /// network considered the chat active. Returns whether a message row
    /// was written.
    #[instrument(skip(self, msg), fields(chat_jid = %msg.chat_jid, message_id = %msg.id))]
    pub fn ingest_message(&self, msg: &IncomingMessage) -> Result<bool, StoreError> {
        let name = self.chat_display_name(
            &msg.chat_jid,
            &ConversationName::default(),
            Some(msg.sender.as_str()),
        )?;
        self.chats.upsert(&msg.chat_jid, &name, msg.timestamp)?;
        self.messages.upsert(msg)
    }

    /// Ingest a history-sync batch. Each conversation is stamped with
    /// its newest message's timestamp; empty messages are skipped; a
    /// failing conversation is logged and does not abort the batch.
    #[instrument(skip(self, conversations), fields(conversations = conversations.len()))]
    pub fn ingest_history(&self, conversations: &[HistoryConversation]) -> IngestStats {
        let mut stats = IngestStats::default();

        for conv in conversations {
            let Some(latest) = conv
                .messages
                .iter()
                .max_by_key(|m| m.timestamp)
            else {
                continue;
            };

            let name = match self.chat_display_name(&conv.jid, &conv.name, None) {
                Ok(name) => name,
                Err(e) => {
                    warn!(chat_jid = %conv.jid, error = %e, "skipping conversation");
                    continue;
                }
            };
            if let Err(e) = self.chats.upsert(&conv.jid, &name, latest.timestamp) {
                warn!(chat_jid = %conv.jid, error = %e, "skipping conversation");
                continue;
            }
            stats.conversations += 1;

            for msg in &conv.messages {
                match self.messages.upsert(msg) {
                    Ok(true) => stats.stored += 1,
                    Ok(false) => stats.skipped += 1,
                    Err(e) => {
                        warn!(message_id = %msg.id, error = %e, "failed to store history message");
                        stats.skipped += 1;
                    }
                }
            }
        }

        info!(
            conversations = stats.conversations,
            stored = stats.stored,
            skipped = stats.skipped,
            "history ingestion complete"
        );
        stats
    }

    /// Resolve the name to stamp on a chat at ingest time: a name the
    /// archive already holds wins, then the conversation's own fields,
    /// then a deterministic fallback. Live group-info lookups belong to
    /// the protocol client, not the archive.
    fn chat_display_name(
        &self,
        jid: &ChatJid,
        conversation: &ConversationName,
        sender: Option<&str>,
    ) -> Result<String, StoreError> {
        let existing: Option<String> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM chats WHERE jid = ?1")?;
            let mut rows = stmt.query([jid.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(row.get(0)?),
                None => Ok(None),
            }
        })?;
        if let Some(name) = existing.filter(|n| !n.is_empty()) {
            return Ok(name);
        }

        if let Some(name) = conversation.resolve() {
            return Ok(name.to_owned());
        }

        if jid.is_group() {
            return Ok(format!("Group {}", jid.local_part()));
        }

        Ok(sender
            .filter(|s| !s.is_empty())
            .unwrap_or(jid.local_part())
            .to_owned())
    }
}

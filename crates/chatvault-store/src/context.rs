//! Context assembly: the bounded chronological window of messages
//! around a target message within the same chat.

use rusqlite::Connection;
use tracing::instrument;

use chatvault_core::ids::MessageId;
use chatvault_core::views::MessageContext;

use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::project::{self, RawMessage, MESSAGE_COLUMNS};

/// Window sizes for the dedicated context operation. The implicit
/// expansion done by `MessageRepo::list` uses its own 1/1 defaults.
pub const DEFAULT_CONTEXT_BEFORE: u32 = 5;
pub const DEFAULT_CONTEXT_AFTER: u32 = 5;

fn fetch_target(conn: &Connection, message_id: &str) -> Result<RawMessage, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON m.chat_jid = c.jid
         WHERE m.id = ?1"
    ))?;
    let mut rows = stmt.query([message_id])?;
    match rows.next()? {
        Some(row) => project::scan_raw_message(row),
        None => Err(StoreError::NotFound(format!("message {message_id}"))),
    }
}

/// Nearest `limit` messages strictly earlier than `timestamp`, returned
/// nearest-first (descending) — callers reverse into chronological order.
fn neighbors_before(
    conn: &Connection,
    chat_jid: &str,
    timestamp: &str,
    limit: u32,
) -> Result<Vec<RawMessage>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON m.chat_jid = c.jid
         WHERE m.chat_jid = ?1 AND m.timestamp < ?2
         ORDER BY m.timestamp DESC LIMIT ?3"
    ))?;
    let mut rows = stmt.query(rusqlite::params![chat_jid, timestamp, limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(project::scan_raw_message(row)?);
    }
    Ok(out)
}

fn neighbors_after(
    conn: &Connection,
    chat_jid: &str,
    timestamp: &str,
    limit: u32,
) -> Result<Vec<RawMessage>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN chats c ON m.chat_jid = c.jid
         WHERE m.chat_jid = ?1 AND m.timestamp > ?2
         ORDER BY m.timestamp ASC LIMIT ?3"
    ))?;
    let mut rows = stmt.query(rusqlite::params![chat_jid, timestamp, limit])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(project::scan_raw_message(row)?);
    }
    Ok(out)
}

/// Raw window in chronological order: reversed-before + target + after.
/// Used by `MessageRepo::list` for its per-match expansion.
pub(crate) fn context_raw(
    conn: &Connection,
    message_id: &str,
    before: u32,
    after: u32,
) -> Result<Vec<RawMessage>, StoreError> {
    let target = fetch_target(conn, message_id)?;

    let mut before_msgs = neighbors_before(conn, &target.chat_jid, &target.timestamp, before)?;
    before_msgs.reverse();

    let after_msgs = neighbors_after(conn, &target.chat_jid, &target.timestamp, after)?;

    let mut out = before_msgs;
    out.push(target);
    out.extend(after_msgs);
    Ok(out)
}

impl MessageRepo {
    /// The target message with its chronological neighborhood.
    /// `NotFound` when the id resolves to no message; omitted counts
    /// default to 5 before and 5 after.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn context(
        &self,
        message_id: &MessageId,
        before: Option<u32>,
        after: Option<u32>,
    ) -> Result<MessageContext, StoreError> {
        let before = before.unwrap_or(DEFAULT_CONTEXT_BEFORE);
        let after = after.unwrap_or(DEFAULT_CONTEXT_AFTER);

        let (target, mut before_msgs, after_msgs) = self.db.with_conn(|conn| {
            let target = fetch_target(conn, message_id.as_str())?;
            let before_msgs =
                neighbors_before(conn, &target.chat_jid, &target.timestamp, before)?;
            let after_msgs = neighbors_after(conn, &target.chat_jid, &target.timestamp, after)?;
            Ok((target, before_msgs, after_msgs))
        })?;
        before_msgs.reverse();

        let cache = self.identity_cache();
        Ok(MessageContext {
            message: project::project_message(target, &cache),
            before: before_msgs
                .into_iter()
                .map(|m| project::project_message(m, &cache))
                .collect(),
            after: after_msgs
                .into_iter()
                .map(|m| project::project_message(m, &cache))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::messages::IncomingMessage;
    use chatvault_core::ids::ChatJid;
    use chrono::{TimeZone, Utc};

    const CHAT: &str = "111@s.whatsapp.net";
    const OTHER_CHAT: &str = "222@s.whatsapp.net";

    fn ts(offset: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + offset, 0).unwrap()
    }

    fn setup() -> (Archive, MessageRepo) {
        let archive = Archive::in_memory().unwrap();
        let chats = archive.chats();
        chats.upsert(&ChatJid::from_raw(CHAT), "Bob", ts(0)).unwrap();
        chats
            .upsert(&ChatJid::from_raw(OTHER_CHAT), "Carol", ts(0))
            .unwrap();
        let messages = archive.messages();
        (archive, messages)
    }

    fn store(repo: &MessageRepo, chat: &str, id: &str, content: &str, offset: i64) {
        repo.upsert(&IncomingMessage {
            id: MessageId::from_raw(id),
            chat_jid: ChatJid::from_raw(chat),
            sender: "111".into(),
            content: content.into(),
            timestamp: ts(offset),
            is_from_me: false,
            media: None,
        })
        .unwrap();
    }

    #[test]
    fn window_surrounds_the_target_chronologically() {
        let (_, repo) = setup();
        store(&repo, CHAT, "T1", "hi", 10);
        store(&repo, CHAT, "T2", "middle", 20);
        store(&repo, CHAT, "T3", "bye", 30);

        let ctx = repo
            .context(&MessageId::from_raw("T2"), Some(1), Some(1))
            .unwrap();
        assert_eq!(ctx.message.id.as_str(), "T2");
        assert_eq!(ctx.before.len(), 1);
        assert_eq!(ctx.before[0].id.as_str(), "T1");
        assert_eq!(ctx.after.len(), 1);
        assert_eq!(ctx.after[0].id.as_str(), "T3");
    }

    #[test]
    fn before_ascending_and_strictly_earlier() {
        let (_, repo) = setup();
        for i in 0..6 {
            store(&repo, CHAT, &format!("M{i}"), "tick", 10 * (i as i64 + 1));
        }

        let ctx = repo
            .context(&MessageId::from_raw("M4"), Some(3), Some(3))
            .unwrap();
        let before_ids: Vec<&str> = ctx.before.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(before_ids, vec!["M1", "M2", "M3"]);
        for m in &ctx.before {
            assert!(m.timestamp < ctx.message.timestamp);
        }
        for m in &ctx.after {
            assert!(m.timestamp > ctx.message.timestamp);
        }
    }

    #[test]
    fn counts_bound_the_window() {
        let (_, repo) = setup();
        for i in 0..10 {
            store(&repo, CHAT, &format!("M{i}"), "tick", 10 * (i as i64 + 1));
        }

        let ctx = repo
            .context(&MessageId::from_raw("M5"), Some(2), Some(2))
            .unwrap();
        assert_eq!(ctx.before.len(), 2);
        assert_eq!(ctx.after.len(), 2);
        // Nearest neighbors, not the oldest ones
        assert_eq!(ctx.before[0].id.as_str(), "M3");
        assert_eq!(ctx.after[1].id.as_str(), "M7");
    }

    #[test]
    fn defaults_to_five_on_each_side() {
        let (_, repo) = setup();
        for i in 0..15 {
            store(&repo, CHAT, &format!("M{i}"), "tick", 10 * (i as i64 + 1));
        }

        let ctx = repo.context(&MessageId::from_raw("M7"), None, None).unwrap();
        assert_eq!(ctx.before.len(), 5);
        assert_eq!(ctx.after.len(), 5);
    }

    #[test]
    fn window_stays_within_the_chat() {
        let (_, repo) = setup();
        store(&repo, CHAT, "T1", "target", 20);
        store(&repo, OTHER_CHAT, "N1", "noise before", 10);
        store(&repo, OTHER_CHAT, "N2", "noise after", 30);

        let ctx = repo.context(&MessageId::from_raw("T1"), None, None).unwrap();
        assert!(ctx.before.is_empty());
        assert!(ctx.after.is_empty());
    }

    #[test]
    fn missing_target_is_not_found() {
        let (_, repo) = setup();
        let result = repo.context(&MessageId::from_raw("NOPE"), None, None);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn shorter_history_yields_shorter_window() {
        let (_, repo) = setup();
        store(&repo, CHAT, "T1", "only", 10);
        store(&repo, CHAT, "T2", "pair", 20);

        let ctx = repo.context(&MessageId::from_raw("T1"), None, None).unwrap();
        assert!(ctx.before.is_empty());
        assert_eq!(ctx.after.len(), 1);
    }
}

use chatvault_core::ids::{ChatJid, MessageId};
use chatvault_core::views::{ChatView, MessageView};

use crate::error::StoreError;
use crate::identity::IdentityCache;
use crate::row_helpers;

/// Display name used for the caller's own messages, overriding any
/// cache entry for the sender identifier.
pub(crate) const SELF_SENDER_NAME: &str = "Me";

/// Shared SELECT list for message-shaped queries; must stay in column
/// order with [`scan_raw_message`]. Aliases: `m` = messages, `c` = chats.
pub(crate) const MESSAGE_COLUMNS: &str =
    "m.timestamp, m.sender, c.name, m.content, m.is_from_me, c.jid, m.id, m.media_type";

/// Raw message row as scanned from storage, before identity resolution.
/// Column order: timestamp, sender, chat name, content, is_from_me,
/// chat jid, id, media_type — shared by every message-shaped query.
pub(crate) struct RawMessage {
    pub timestamp: String,
    pub sender: String,
    pub chat_name: Option<String>,
    pub content: Option<String>,
    pub is_from_me: bool,
    pub chat_jid: String,
    pub id: String,
    pub media_type: Option<String>,
}

/// Raw chat row, optionally joined with its last message.
pub(crate) struct RawChat {
    pub jid: String,
    pub name: Option<String>,
    pub last_time: Option<String>,
    pub last_msg: Option<String>,
    pub last_sender: Option<String>,
    pub last_is_from_me: Option<bool>,
}

pub(crate) fn scan_raw_message(row: &rusqlite::Row<'_>) -> Result<RawMessage, StoreError> {
    Ok(RawMessage {
        timestamp: row_helpers::get(row, 0, "messages", "timestamp")?,
        sender: row_helpers::get(row, 1, "messages", "sender")?,
        chat_name: row_helpers::get_opt(row, 2, "chats", "name")?,
        content: row_helpers::get_opt(row, 3, "messages", "content")?,
        is_from_me: row_helpers::get(row, 4, "messages", "is_from_me")?,
        chat_jid: row_helpers::get(row, 5, "chats", "jid")?,
        id: row_helpers::get(row, 6, "messages", "id")?,
        media_type: row_helpers::get_opt(row, 7, "messages", "media_type")?,
    })
}

pub(crate) fn scan_raw_chat(row: &rusqlite::Row<'_>) -> Result<RawChat, StoreError> {
    Ok(RawChat {
        jid: row_helpers::get(row, 0, "chats", "jid")?,
        name: row_helpers::get_opt(row, 1, "chats", "name")?,
        last_time: row_helpers::get_opt(row, 2, "chats", "last_message_time")?,
        last_msg: row_helpers::get_opt(row, 3, "messages", "content")?,
        last_sender: row_helpers::get_opt(row, 4, "messages", "sender")?,
        last_is_from_me: row_helpers::get_opt(row, 5, "messages", "is_from_me")?,
    })
}

/// Resolve a sender identifier to a display name. Own messages are
/// always "Me"; otherwise the cache (full id, then local-part), falling
/// back to the raw identifier unresolved.
pub(crate) fn display_name(sender: &str, is_from_me: bool, cache: &IdentityCache) -> String {
    if is_from_me {
        return SELF_SENDER_NAME.to_owned();
    }
    cache
        .lookup(sender)
        .map(str::to_owned)
        .unwrap_or_else(|| sender.to_owned())
}

/// Pure projection of a raw message row into the external view.
/// Empty-string columns project to absent fields, not empty ones.
pub(crate) fn project_message(raw: RawMessage, cache: &IdentityCache) -> MessageView {
    MessageView {
        id: MessageId::from_raw(raw.id),
        timestamp: raw.timestamp,
        sender: display_name(&raw.sender, raw.is_from_me, cache),
        sender_jid: raw.sender,
        content: raw.content.unwrap_or_default(),
        is_from_me: raw.is_from_me,
        chat_jid: ChatJid::from_raw(raw.chat_jid),
        chat_name: raw.chat_name.filter(|n| !n.is_empty()),
        media_type: raw.media_type.filter(|m| !m.is_empty()),
    }
}

/// Pure projection of a raw chat row into the external view, resolving
/// the last sender's display name when the join produced one.
pub(crate) fn project_chat(raw: RawChat, cache: &IdentityCache) -> ChatView {
    let jid = ChatJid::from_raw(raw.jid);
    let is_group = jid.is_group();
    let last_sender = raw
        .last_sender
        .map(|s| display_name(&s, raw.last_is_from_me.unwrap_or(false), cache));

    ChatView {
        jid,
        name: raw.name.filter(|n| !n.is_empty()),
        is_group,
        last_message_time: raw.last_time,
        last_message: raw.last_msg,
        last_sender,
        last_is_from_me: raw.last_is_from_me,
    }
}

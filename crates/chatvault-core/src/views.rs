use serde::{Deserialize, Serialize};

use crate::ids::{local_part, ChatJid, MessageId};

/// A message as returned to callers: identity-resolved, with optional
/// fields omitted when the underlying column was null or empty.
/// `sender` is the resolved display name; `sender_jid` the raw identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub timestamp: String,
    pub sender: String,
    pub sender_jid: String,
    pub content: String,
    pub is_from_me: bool,
    pub chat_jid: ChatJid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// A chat as returned to callers. The `last_*` fields are populated only
/// when the caller asked for the last-message join and the join matched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatView {
    pub jid: ChatJid,
    pub name: Option<String>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_is_from_me: Option<bool>,
}

/// A contact surfaced by `search_contacts`: a distinct non-group chat
/// key, split into its phone-bearing local-part and full JID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactView {
    pub phone_number: String,
    pub name: Option<String>,
    pub jid: ChatJid,
}

impl ContactView {
    pub fn from_chat_row(jid: ChatJid, name: Option<String>) -> Self {
        let phone_number = local_part(jid.as_str()).unwrap_or(jid.as_str()).to_owned();
        Self {
            phone_number,
            name,
            jid,
        }
    }
}

/// A target message with its chronological neighborhood. Both `before`
/// and `after` are ordered ascending by timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    pub message: MessageView,
    pub before: Vec<MessageView>,
    pub after: Vec<MessageView>,
}

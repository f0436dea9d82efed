use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use chatvault_core::ids::{ChatJid, GROUP_SUFFIX};
use chatvault_core::views::{ChatView, ContactView};

use crate::database::{Database, Directory};
use crate::error::StoreError;
use crate::identity::IdentityCache;
use crate::project;
use crate::row_helpers;

/// Contact search is capped regardless of how broad the query is.
const SEARCH_CONTACTS_LIMIT: u32 = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSort {
    /// Most recently active first; chats that never saw a message last.
    #[default]
    LastActive,
    /// Lexicographic by chat name.
    Name,
}

impl std::fmt::Display for ChatSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LastActive => write!(f, "last_active"),
            Self::Name => write!(f, "name"),
        }
    }
}

impl std::str::FromStr for ChatSort {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_active" => Ok(Self::LastActive),
            "name" => Ok(Self::Name),
            other => Err(format!("unknown chat sort: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListChatsOpts {
    pub query: Option<String>,
    pub limit: u32,
    pub page: u32,
    pub include_last_message: bool,
    pub sort_by: ChatSort,
}

impl Default for ListChatsOpts {
    fn default() -> Self {
        Self {
            query: None,
            limit: 20,
            page: 0,
            include_last_message: true,
            sort_by: ChatSort::LastActive,
        }
    }
}

/// SELECT prefix for chat-shaped queries. The last-message columns come
/// from a LEFT JOIN on the chat's recorded last_message_time; when the
/// join is not requested they are NULL placeholders so every chat query
/// scans through the same raw row shape.
fn chat_select(include_last_message: bool) -> String {
    if include_last_message {
        "SELECT c.jid, c.name, c.last_message_time, m.content, m.sender, m.is_from_me
         FROM chats c
         LEFT JOIN messages m ON c.jid = m.chat_jid AND c.last_message_time = m.timestamp"
            .to_owned()
    } else {
        "SELECT c.jid, c.name, c.last_message_time, NULL, NULL, NULL FROM chats c".to_owned()
    }
}

pub struct ChatRepo {
    pub(crate) db: Database,
    pub(crate) directory: Option<Directory>,
}

impl ChatRepo {
    pub fn new(db: Database, directory: Option<Directory>) -> Self {
        Self { db, directory }
    }

    pub(crate) fn identity_cache(&self) -> IdentityCache {
        IdentityCache::build(&self.db, self.directory.as_ref())
    }

    /// Insert or replace a chat record; name and timestamp always take
    /// the latest-known values. An empty name is stored as NULL.
    #[instrument(skip(self), fields(chat_jid = %jid))]
    pub fn upsert(
        &self,
        jid: &ChatJid,
        name: &str,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    jid.as_str(),
                    (!name.is_empty()).then_some(name),
                    last_message_time.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Get a single chat by JID; `NotFound` when it does not exist.
    #[instrument(skip(self), fields(chat_jid = %jid))]
    pub fn get(&self, jid: &ChatJid, include_last_message: bool) -> Result<ChatView, StoreError> {
        let raw = self.db.with_conn(|conn| {
            let sql = format!("{} WHERE c.jid = ?1", chat_select(include_last_message));
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([jid.as_str()])?;
            match rows.next()? {
                Some(row) => project::scan_raw_chat(row),
                None => Err(StoreError::NotFound(format!("chat {jid}"))),
            }
        })?;

        let cache = self.identity_cache();
        Ok(project::project_chat(raw, &cache))
    }

    /// List chats matching the criteria.
    #[instrument(skip(self, opts), fields(limit = opts.limit, page = opts.page, sort = %opts.sort_by))]
    pub fn list(&self, opts: &ListChatsOpts) -> Result<Vec<ChatView>, StoreError> {
        let raws = self.db.with_conn(|conn| {
            let mut sql = chat_select(opts.include_last_message);
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(query) = &opts.query {
                params.push(Box::new(format!("%{query}%")));
                let n = params.len();
                sql.push_str(&format!(
                    " WHERE (LOWER(c.name) LIKE LOWER(?{n}) OR c.jid LIKE ?{n})"
                ));
            }

            match opts.sort_by {
                ChatSort::LastActive => sql.push_str(" ORDER BY c.last_message_time DESC"),
                ChatSort::Name => sql.push_str(" ORDER BY c.name"),
            }

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
                out.push(project::scan_raw_chat(row)?);
            }
            Ok(out)
        })?;

        let cache = self.identity_cache();
        Ok(raws
            .into_iter()
            .map(|r| project::project_chat(r, &cache))
            .collect())
    }

    /// First non-group chat whose JID contains the given substring, in
    /// storage order; `NotFound` when none matches.
    #[instrument(skip(self))]
    pub fn direct_chat_by_contact(&self, phone: &str) -> Result<ChatView, StoreError> {
        let raw = self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.jid LIKE ?1 AND c.jid NOT LIKE ?2 LIMIT 1",
                chat_select(true)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params![format!("%{phone}%"), format!("%{GROUP_SUFFIX}")])?;
            match rows.next()? {
                Some(row) => project::scan_raw_chat(row),
                None => Err(StoreError::NotFound(format!(
                    "no direct chat matching {phone}"
                ))),
            }
        })?;

        let cache = self.identity_cache();
        Ok(project::project_chat(raw, &cache))
    }

    /// Chats involving a contact: the identifier is the chat key itself
    /// or appears as a message sender within the chat.
    #[instrument(skip(self), fields(contact = %jid))]
    pub fn contact_chats(
        &self,
        jid: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<ChatView>, StoreError> {
        let raws = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT c.jid, c.name, c.last_message_time, NULL, NULL, NULL
                 FROM chats c
                 JOIN messages m ON c.jid = m.chat_jid
                 WHERE m.sender = ?1 OR c.jid = ?1
                 ORDER BY c.last_message_time DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let mut rows = stmt.query(rusqlite::params![
                jid,
                limit as i64,
                page as i64 * limit as i64
            ])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(project::scan_raw_chat(row)?);
            }
            Ok(out)
        })?;

        let cache = self.identity_cache();
        Ok(raws
            .into_iter()
            .map(|r| project::project_chat(r, &cache))
            .collect())
    }

    /// Distinct non-group chats whose name or JID contains the query,
    /// case-insensitively. Capped at 50, sorted by name then JID.
    #[instrument(skip(self))]
    pub fn search_contacts(&self, query: &str) -> Result<Vec<ContactView>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT jid, name FROM chats
                 WHERE (LOWER(name) LIKE LOWER(?1) OR LOWER(jid) LIKE LOWER(?1))
                 AND jid NOT LIKE ?2
                 ORDER BY name, jid
                 LIMIT ?3",
            )?;
            let mut rows = stmt.query(rusqlite::params![
                format!("%{query}%"),
                format!("%{GROUP_SUFFIX}"),
                SEARCH_CONTACTS_LIMIT
            ])?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let jid: String = row_helpers::get(row, 0, "chats", "jid")?;
                let name: Option<String> = row_helpers::get_opt(row, 1, "chats", "name")?;
                out.push(ContactView::from_chat_row(
                    ChatJid::from_raw(jid),
                    name.filter(|n| !n.is_empty()),
                ));
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;
    use crate::messages::{IncomingMessage, MessageRepo};
    use chatvault_core::ids::MessageId;
    use chrono::TimeZone;

    fn ts(offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + offset, 0).unwrap()
    }

    fn setup() -> (Archive, ChatRepo, MessageRepo) {
        let archive = Archive::in_memory().unwrap();
        let chats = archive.chats();
        let messages = archive.messages();
        (archive, chats, messages)
    }

    fn jid(s: &str) -> ChatJid {
        ChatJid::from_raw(s)
    }

    fn store_msg(repo: &MessageRepo, chat: &str, id: &str, content: &str, offset: i64) {
        repo.upsert(&IncomingMessage {
            id: MessageId::from_raw(id),
            chat_jid: jid(chat),
            sender: "111".into(),
            content: content.into(),
            timestamp: ts(offset),
            is_from_me: false,
            media: None,
        })
        .unwrap();
    }

    #[test]
    fn upsert_overwrites_name_and_timestamp() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Old", ts(10)).unwrap();
        chats.upsert(&jid("111@s.whatsapp.net"), "New", ts(20)).unwrap();

        let view = chats.get(&jid("111@s.whatsapp.net"), false).unwrap();
        assert_eq!(view.name.as_deref(), Some("New"));
        assert_eq!(view.last_message_time, Some(ts(20).to_rfc3339()));
    }

    #[test]
    fn get_missing_chat_is_not_found() {
        let (_, chats, _) = setup();
        let result = chats.get(&jid("999@s.whatsapp.net"), true);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn get_joins_the_last_message_on_exact_timestamp() {
        let (_, chats, messages) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob", ts(30)).unwrap();
        store_msg(&messages, "111@s.whatsapp.net", "A1", "older", 10);
        store_msg(&messages, "111@s.whatsapp.net", "A2", "latest", 30);

        let view = chats.get(&jid("111@s.whatsapp.net"), true).unwrap();
        assert_eq!(view.last_message.as_deref(), Some("latest"));
        assert_eq!(view.last_is_from_me, Some(false));
        assert!(view.last_sender.is_some());
    }

    #[test]
    fn get_without_join_leaves_last_fields_unset() {
        let (_, chats, messages) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob", ts(30)).unwrap();
        store_msg(&messages, "111@s.whatsapp.net", "A1", "latest", 30);

        let view = chats.get(&jid("111@s.whatsapp.net"), false).unwrap();
        assert!(view.last_message.is_none());
        assert!(view.last_sender.is_none());
        assert_eq!(view.last_message_time, Some(ts(30).to_rfc3339()));
    }

    #[test]
    fn list_sorts_by_last_active_desc() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Older", ts(10)).unwrap();
        chats.upsert(&jid("222@s.whatsapp.net"), "Newer", ts(20)).unwrap();

        let listed = chats
            .list(&ListChatsOpts {
                include_last_message: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed[0].name.as_deref(), Some("Newer"));
        assert_eq!(listed[1].name.as_deref(), Some("Older"));
    }

    #[test]
    fn list_sorts_by_name_ascending() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Zoe", ts(20)).unwrap();
        chats.upsert(&jid("222@s.whatsapp.net"), "Anna", ts(10)).unwrap();

        let listed = chats
            .list(&ListChatsOpts {
                sort_by: ChatSort::Name,
                include_last_message: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed[0].name.as_deref(), Some("Anna"));
        assert_eq!(listed[1].name.as_deref(), Some("Zoe"));
    }

    #[test]
    fn list_filters_by_name_or_jid_substring() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob Smith", ts(10)).unwrap();
        chats.upsert(&jid("222@s.whatsapp.net"), "Carol", ts(20)).unwrap();

        let by_name = chats
            .list(&ListChatsOpts {
                query: Some("smith".into()),
                include_last_message: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].jid.as_str(), "111@s.whatsapp.net");

        let by_jid = chats
            .list(&ListChatsOpts {
                query: Some("222".into()),
                include_last_message: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_jid.len(), 1);
        assert_eq!(by_jid[0].jid.as_str(), "222@s.whatsapp.net");
    }

    #[test]
    fn list_paginates() {
        let (_, chats, _) = setup();
        for i in 0..5 {
            chats
                .upsert(&jid(&format!("{i}@s.whatsapp.net")), "Chat", ts(i as i64))
                .unwrap();
        }

        let page = |page: u32| {
            chats
                .list(&ListChatsOpts {
                    limit: 2,
                    page,
                    include_last_message: false,
                    ..Default::default()
                })
                .unwrap()
        };
        assert_eq!(page(0).len(), 2);
        assert_eq!(page(1).len(), 2);
        assert_eq!(page(2).len(), 1);
    }

    #[test]
    fn list_returns_empty_not_error_when_nothing_matches() {
        let (_, chats, _) = setup();
        let listed = chats
            .list(&ListChatsOpts {
                query: Some("nobody".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn direct_chat_by_contact_skips_groups() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("49170111@g.us"), "Group", ts(10)).unwrap();
        chats.upsert(&jid("49170111@s.whatsapp.net"), "Bob", ts(20)).unwrap();

        let view = chats.direct_chat_by_contact("49170111").unwrap();
        assert_eq!(view.jid.as_str(), "49170111@s.whatsapp.net");
        assert!(!view.is_group);
    }

    #[test]
    fn direct_chat_by_contact_not_found() {
        let (_, chats, _) = setup();
        let result = chats.direct_chat_by_contact("777");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn contact_chats_covers_sender_and_chat_key() {
        let (_, chats, messages) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob", ts(10)).unwrap();
        chats.upsert(&jid("12345@g.us"), "Climbing", ts(20)).unwrap();
        chats.upsert(&jid("222@s.whatsapp.net"), "Carol", ts(30)).unwrap();

        // Bob's own direct chat (matched by chat key)
        store_msg(&messages, "111@s.whatsapp.net", "D1", "hi", 10);
        // Bob posting in the group (matched by sender)
        store_msg(&messages, "12345@g.us", "G1", "hello group", 20);
        // Unrelated chat
        let other = IncomingMessage {
            id: MessageId::from_raw("C1"),
            chat_jid: jid("222@s.whatsapp.net"),
            sender: "222".into(),
            content: "unrelated".into(),
            timestamp: ts(30),
            is_from_me: false,
            media: None,
        };
        messages.upsert(&other).unwrap();

        let involved = chats.contact_chats("111@s.whatsapp.net", 20, 0).unwrap();
        let jids: Vec<&str> = involved.iter().map(|c| c.jid.as_str()).collect();
        assert!(jids.contains(&"111@s.whatsapp.net"));
        assert!(!jids.contains(&"222@s.whatsapp.net"));

        let by_sender = chats.contact_chats("111", 20, 0).unwrap();
        let jids: Vec<&str> = by_sender.iter().map(|c| c.jid.as_str()).collect();
        assert!(jids.contains(&"12345@g.us"));
    }

    #[test]
    fn contact_chats_deduplicates_chats_with_many_messages() {
        let (_, chats, messages) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob", ts(10)).unwrap();
        for i in 0..5 {
            store_msg(&messages, "111@s.whatsapp.net", &format!("D{i}"), "hi", i as i64);
        }

        let involved = chats.contact_chats("111", 20, 0).unwrap();
        assert_eq!(involved.len(), 1);
    }

    #[test]
    fn search_contacts_excludes_groups_and_caps_results() {
        let (_, chats, _) = setup();
        for i in 0..60 {
            chats
                .upsert(&jid(&format!("4917{i:04}@s.whatsapp.net")), "Match", ts(i as i64))
                .unwrap();
        }
        chats.upsert(&jid("4917grp@g.us"), "Match Group", ts(0)).unwrap();

        let found = chats.search_contacts("4917").unwrap();
        assert_eq!(found.len(), 50);
        assert!(found.iter().all(|c| !c.jid.as_str().ends_with("@g.us")));
    }

    #[test]
    fn search_contacts_matches_name_case_insensitively() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("111@s.whatsapp.net"), "Bob Smith", ts(10)).unwrap();

        let found = chats.search_contacts("SMITH").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].phone_number, "111");
        assert_eq!(found[0].name.as_deref(), Some("Bob Smith"));
    }

    #[test]
    fn search_contacts_sorted_by_name_then_jid() {
        let (_, chats, _) = setup();
        chats.upsert(&jid("333@s.whatsapp.net"), "Anna", ts(10)).unwrap();
        chats.upsert(&jid("111@s.whatsapp.net"), "Zoe", ts(10)).unwrap();
        chats.upsert(&jid("222@s.whatsapp.net"), "Anna", ts(10)).unwrap();

        let found = chats.search_contacts("@s.whatsapp.net").unwrap();
        let pairs: Vec<(&str, Option<&str>)> = found
            .iter()
            .map(|c| (c.jid.as_str(), c.name.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("222@s.whatsapp.net", Some("Anna")),
                ("333@s.whatsapp.net", Some("Anna")),
                ("111@s.whatsapp.net", Some("Zoe")),
            ]
        );
    }
}

/// SQL DDL for the message archive.
/// WAL mode + foreign keys enabled at connection time so a history-sync
/// writer never blocks concurrent readers.
pub const SCHEMA_VERSION: u32 = 1;

/// Timestamps are RFC3339 UTC strings; their lexicographic order is their
/// chronological order, which the range filters and sorts rely on.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    jid TEXT PRIMARY KEY,
    name TEXT,
    last_message_time TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT,
    chat_jid TEXT,
    sender TEXT,
    content TEXT,
    timestamp TEXT,
    is_from_me INTEGER,
    media_type TEXT,
    filename TEXT,
    url TEXT,
    media_key BLOB,
    file_sha256 BLOB,
    file_enc_sha256 BLOB,
    file_length INTEGER,
    PRIMARY KEY (id, chat_jid),
    FOREIGN KEY (chat_jid) REFERENCES chats(jid)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_jid);
CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_jid, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender);
CREATE INDEX IF NOT EXISTS idx_chats_last_time ON chats(last_message_time);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Contact-directory tables as the companion protocol client lays them
/// out. The archive only ever reads these; the DDL exists so in-memory
/// fixtures can stand in for the client's database.
pub const DIRECTORY_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    jid TEXT PRIMARY KEY,
    full_name TEXT,
    push_name TEXT
);

CREATE TABLE IF NOT EXISTS lid_map (
    lid TEXT PRIMARY KEY,
    pn TEXT
);
"#;

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use chatvault_core::ids::{ChatJid, MessageId};
use chatvault_store::{Archive, ChatSort, ListChatsOpts, ListMessagesOpts};
use chatvault_telemetry::{init_telemetry, TelemetryConfig};

/// Local inspection CLI for a chatvault archive: each subcommand maps
/// onto one query-engine call and prints the result as JSON.
#[derive(Parser)]
#[command(name = "chatvault", version, about)]
struct Cli {
    /// Directory holding messages.db (and optionally directory.db)
    #[arg(long, default_value_os_t = default_store_dir())]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List chats
    Chats {
        /// Substring match against chat name or JID
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Skip the last-message join
        #[arg(long)]
        no_last_message: bool,
        #[arg(long, default_value_t = ChatSort::LastActive)]
        sort_by: ChatSort,
    },
    /// List messages matching the given filters
    Messages {
        /// Only messages after this RFC3339 timestamp
        #[arg(long)]
        after: Option<String>,
        /// Only messages before this RFC3339 timestamp
        #[arg(long)]
        before: Option<String>,
        /// Exact sender identifier
        #[arg(long)]
        sender: Option<String>,
        /// Restrict to one chat JID
        #[arg(long)]
        chat: Option<String>,
        /// Substring match against content or media type
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Skip expanding each match into its chronological window
        #[arg(long)]
        no_context: bool,
        #[arg(long, default_value_t = 1)]
        context_before: u32,
        #[arg(long, default_value_t = 1)]
        context_after: u32,
    },
    /// Search contacts by name or phone number
    Contacts { query: String },
    /// Get a single chat by JID
    Chat {
        jid: String,
        #[arg(long)]
        no_last_message: bool,
    },
    /// Find the first direct chat whose JID contains the phone number
    DirectChat { phone: String },
    /// List all chats involving a contact
    ContactChats {
        jid: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
    /// Most recent message involving a contact
    LastInteraction { jid: String },
    /// A message with its surrounding context window
    Context {
        message_id: String,
        #[arg(long)]
        before: Option<u32>,
        #[arg(long)]
        after: Option<u32>,
    },
    /// Stored media descriptor for a message
    Media { message_id: String, chat_jid: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry = init_telemetry(TelemetryConfig {
        log_db_path: cli.store_dir.join("logs.db"),
        ..Default::default()
    });

    let archive = Archive::open(&cli.store_dir)
        .with_context(|| format!("opening archive in {}", cli.store_dir.display()))?;
    tracing::debug!(store_dir = %cli.store_dir.display(), "archive opened");

    let output = match cli.command {
        Command::Chats {
            query,
            limit,
            page,
            no_last_message,
            sort_by,
        } => {
            let chats = archive.chats().list(&ListChatsOpts {
                query,
                limit,
                page,
                include_last_message: !no_last_message,
                sort_by,
            })?;
            serde_json::to_value(chats)?
        }
        Command::Messages {
            after,
            before,
            sender,
            chat,
            query,
            limit,
            page,
            no_context,
            context_before,
            context_after,
        } => {
            let messages = archive.messages().list(&ListMessagesOpts {
                after: after.as_deref().map(parse_timestamp).transpose()?,
                before: before.as_deref().map(parse_timestamp).transpose()?,
                sender,
                chat_jid: chat.map(ChatJid::from_raw),
                query,
                limit,
                page,
                include_context: !no_context,
                context_before,
                context_after,
            })?;
            serde_json::to_value(messages)?
        }
        Command::Contacts { query } => {
            serde_json::to_value(archive.chats().search_contacts(&query)?)?
        }
        Command::Chat {
            jid,
            no_last_message,
        } => serde_json::to_value(
            archive
                .chats()
                .get(&ChatJid::from_raw(jid), !no_last_message)?,
        )?,
        Command::DirectChat { phone } => {
            serde_json::to_value(archive.chats().direct_chat_by_contact(&phone)?)?
        }
        Command::ContactChats { jid, limit, page } => {
            serde_json::to_value(archive.chats().contact_chats(&jid, limit, page)?)?
        }
        Command::LastInteraction { jid } => {
            serde_json::to_value(archive.messages().last_interaction(&jid)?)?
        }
        Command::Context {
            message_id,
            before,
            after,
        } => serde_json::to_value(archive.messages().context(
            &MessageId::from_raw(message_id),
            before,
            after,
        )?)?,
        Command::Media {
            message_id,
            chat_jid,
        } => serde_json::to_value(archive.messages().media_descriptor(
            &MessageId::from_raw(message_id),
            &ChatJid::from_raw(chat_jid),
        )?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC3339 timestamp: {s}"))
}

fn default_store_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".chatvault")
}

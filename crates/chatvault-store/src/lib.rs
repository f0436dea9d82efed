pub mod archive;
pub mod chats;
pub mod context;
pub mod database;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod messages;
mod project;
mod row_helpers;
pub mod schema;

pub use archive::Archive;
pub use chats::{ChatRepo, ChatSort, ListChatsOpts};
pub use database::{Database, Directory};
pub use error::StoreError;
pub use identity::IdentityCache;
pub use ingest::{ConversationName, HistoryConversation, IngestStats, Ingestor};
pub use messages::{IncomingMessage, ListMessagesOpts, MessageRepo};

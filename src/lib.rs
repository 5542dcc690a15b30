//! Chat client core: sign-in, chat completions, and chat history kept in a
//! local file with a best-effort copy on a companion backup service.

pub mod auth;
pub mod backup;
pub mod backup_server;
pub mod chat;
pub mod completion;
pub mod config;
pub mod history;
pub mod logging;
pub mod store;
pub mod sync;

pub use history::{ConversationHistory, HistoryDocument, Message, Sender};
pub use sync::HistorySync;

//! Chat session: in-memory conversation plus the send/reply cycle.
use crate::auth::UserIdentity;
use crate::completion::{CompletionBackend, CompletionError};
use crate::history::{ConversationHistory, Message, Sender};
use crate::sync::{HistorySync, RemoteOutcome};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("no user is signed in")]
    NotSignedIn,
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl ChatError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage => "Type a message first",
            ChatError::NotSignedIn => "Please sign in again",
            ChatError::Completion(e) => e.user_message(),
        }
    }
}

pub struct ChatSession {
    sync: Arc<HistorySync>,
    completion: Arc<dyn CompletionBackend>,
    user_id: String,
    messages: ConversationHistory,
    pending_backup: Option<JoinHandle<RemoteOutcome>>,
}

impl ChatSession {
    /// Opens a session for whoever `identity` says is signed in.
    pub async fn start(
        sync: Arc<HistorySync>,
        completion: Arc<dyn CompletionBackend>,
        identity: &dyn UserIdentity,
    ) -> Result<Self, ChatError> {
        let user_id = identity.current_user_id().await.ok_or(ChatError::NotSignedIn)?;
        Ok(Self::for_user(sync, completion, user_id).await)
    }

    pub async fn for_user(
        sync: Arc<HistorySync>,
        completion: Arc<dyn CompletionBackend>,
        user_id: impl Into<String>,
    ) -> Self {
        let messages = sync.load_history().await;
        Self {
            sync,
            completion,
            user_id: user_id.into(),
            messages,
            pending_backup: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_own(&self, message: &Message) -> bool {
        matches!(&message.sender, Sender::User(id) if *id == self.user_id)
    }

    /// Replaces the in-memory conversation with what is on disk.
    pub async fn refresh(&mut self) {
        self.messages = self.sync.load_history().await;
    }

    /// Appends `text` as a user message, asks the model, and appends the reply.
    /// The user message stays in the history even when the model call fails.
    ///
    /// Only the local writes are awaited. Backups run in the background, in
    /// send order; see [`ChatSession::flush_backups`].
    #[instrument(skip(self, text), fields(user_id = %self.user_id))]
    pub async fn send(&mut self, text: &str) -> Result<Message, ChatError> {
        let user_message =
            Message::from_user(self.user_id.clone(), text).map_err(|_| ChatError::EmptyMessage)?;
        let prompt = user_message.message.clone();

        self.messages.push(user_message);
        self.persist().await;

        let reply = match self.completion.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Error sending message: {}", e);
                return Err(e.into());
            }
        };
        let ai_message = Message::from_ai(&reply)
            .map_err(|_| CompletionError::Malformed("empty completion".to_string()))?;

        self.messages.push(ai_message.clone());
        self.persist().await;
        info!(num_messages = self.messages.len(), "Reply received");
        Ok(ai_message)
    }

    /// Waits for the newest background backup. Earlier ones are either done
    /// or superseded by it.
    pub async fn flush_backups(&mut self) -> Option<RemoteOutcome> {
        let handle = self.pending_backup.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Backup task did not finish: {}", e);
                None
            }
        }
    }

    async fn persist(&mut self) {
        if let Some(handle) = self.sync.save_history_local_first(self.messages.clone()).await {
            self.pending_backup = Some(handle);
        }
    }
}

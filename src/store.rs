//! Local, authoritative copy of the chat history.
//!
//! The whole conversation lives in a single JSON file that is overwritten on
//! every save. Writes go through a temp file and an atomic rename, so a reader
//! sees either the previous document or the new one, never a torn write.

use crate::history::{ConversationHistory, HistoryDocument, Message};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

pub const HISTORY_FILE_NAME: &str = "chat_history.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed history document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct LocalHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store rooted at `<data_dir>/chat_history.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted history. Never fails: a missing or corrupt file
    /// yields an empty conversation.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> ConversationHistory {
        match self.try_load().await {
            Ok(messages) => {
                info!(num_messages = messages.len(), "Chat history loaded");
                messages
            }
            Err(e) => {
                error!("Failed to load chat history: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn try_load(&self) -> Result<ConversationHistory, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No chat history file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let doc: HistoryDocument = serde_json::from_str(&content)?;
        Ok(doc.messages)
    }

    /// Overwrites the persisted history with `history`.
    #[instrument(skip(self, history), fields(path = %self.path.display(), num_messages = history.len()))]
    pub async fn save(&self, history: &[Message]) -> Result<(), StoreError> {
        let json = HistoryDocument::new(history.to_vec()).to_json()?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, json.as_bytes()).await?;
        info!("Chat history saved");
        Ok(())
    }
}

/// Writes `contents` to a sibling temp file, fsyncs it, and renames it over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| StoreError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| HISTORY_FILE_NAME.to_string());
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        let mut tmp_file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp_file
            .write_all(contents)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp_file
            .sync_all()
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(tmp_file);

        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

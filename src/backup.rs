//! Remote backup of the chat history: a liveness prober and a writer.
//!
//! The backup service is a write-only mirror. Nothing here ever reads history
//! back, and nothing here retries.

use crate::history::{HistoryDocument, Message};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const HEALTH_PATH: &str = "/test";
pub const SAVE_PATH: &str = "/save-chat-history";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backup server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to serialize chat history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Answers "can the backup service take a write right now?".
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn is_available(&self) -> bool;
}

/// Receives a full copy of the conversation.
#[async_trait]
pub trait BackupTarget: Send + Sync {
    async fn backup(&self, history: &[Message]) -> Result<(), BackupError>;
}

// --- HTTP endpoint ---

/// Base address of the backup service plus the HTTP client used to reach it.
#[derive(Debug, Clone)]
pub struct BackupEndpoint {
    client: Client,
    base_url: String,
}

impl BackupEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackupError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// --- Prober ---

pub struct RemoteAvailabilityProber {
    endpoint: BackupEndpoint,
}

impl RemoteAvailabilityProber {
    pub fn new(endpoint: BackupEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl AvailabilityProbe for RemoteAvailabilityProber {
    #[instrument(skip(self), fields(base_url = %self.endpoint.base_url()))]
    async fn is_available(&self) -> bool {
        match self.endpoint.client.get(self.endpoint.url(HEALTH_PATH)).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                info!(status = response.status().as_u16(), "Backup server not accessible");
                false
            }
            Err(e) => {
                info!("Backup server not accessible: {}", e);
                false
            }
        }
    }
}

// --- Writer ---

pub struct RemoteBackupWriter {
    endpoint: BackupEndpoint,
}

impl RemoteBackupWriter {
    pub fn new(endpoint: BackupEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl BackupTarget for RemoteBackupWriter {
    #[instrument(
        skip(self, history),
        fields(base_url = %self.endpoint.base_url(), num_messages = history.len())
    )]
    async fn backup(&self, history: &[Message]) -> Result<(), BackupError> {
        let body = HistoryDocument::new(history.to_vec()).to_json()?;
        let url = self.endpoint.url(SAVE_PATH);
        debug!(%url, "Posting chat history backup");

        let response = self
            .endpoint
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackupError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup_server;
    use crate::store::HISTORY_FILE_NAME;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn spawn(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn endpoint(base_url: &str) -> BackupEndpoint {
        BackupEndpoint::new(base_url, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_backup_server() {
        let dir = TempDir::new().unwrap();
        let base = spawn(backup_server::router(dir.path().to_path_buf())).await;
        let prober = RemoteAvailabilityProber::new(endpoint(&base));
        assert!(prober.is_available().await);
    }

    #[tokio::test]
    async fn test_probe_false_on_non_2xx() {
        let router = Router::new().route("/test", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let base = spawn(router).await;
        let prober = RemoteAvailabilityProber::new(endpoint(&base));
        assert!(!prober.is_available().await);
    }

    #[tokio::test]
    async fn test_probe_false_when_unreachable() {
        let base = unreachable_url().await;
        let prober = RemoteAvailabilityProber::new(endpoint(&base));
        assert!(!prober.is_available().await);
    }

    #[tokio::test]
    async fn test_probe_false_on_timeout() {
        let router = Router::new().route(
            "/test",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let base = spawn(router).await;
        let prober = RemoteAvailabilityProber::new(
            BackupEndpoint::new(&base, Duration::from_millis(200)).unwrap(),
        );
        assert!(!prober.is_available().await);
    }

    #[tokio::test]
    async fn test_backup_writes_document_on_server() {
        let dir = TempDir::new().unwrap();
        let base = spawn(backup_server::router(dir.path().to_path_buf())).await;
        let writer = RemoteBackupWriter::new(endpoint(&format!("{base}/")));
        let history = vec![
            Message::from_user("u1", "Hello").unwrap(),
            Message::from_ai("Hi there").unwrap(),
        ];

        writer.backup(&history).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join(HISTORY_FILE_NAME)).unwrap();
        let doc: HistoryDocument = serde_json::from_str(&written).unwrap();
        assert_eq!(doc.messages, history);
    }

    #[tokio::test]
    async fn test_backup_reports_server_error() {
        let router = Router::new().route(
            "/save-chat-history",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
        );
        let base = spawn(router).await;
        let writer = RemoteBackupWriter::new(endpoint(&base));

        match writer.backup(&[Message::from_ai("x").unwrap()]).await {
            Err(BackupError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "disk full");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backup_reports_transport_error() {
        let base = unreachable_url().await;
        let writer = RemoteBackupWriter::new(endpoint(&base));
        let result = writer.backup(&[Message::from_ai("x").unwrap()]).await;
        assert!(matches!(result, Err(BackupError::Transport(_))));
    }
}

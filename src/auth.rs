//! Sign-in against a static user list and the signed-in user's session.
//!
//! Credentials are compared in plaintext. This is a convenience gate for a
//! local client, not a security boundary.

use crate::history::AI_SENDER;
use crate::store::{write_atomic, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};

pub const SESSION_FILE_NAME: &str = "session.json";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("user id {0:?} is reserved for model replies")]
    ReservedUserId(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub password: String,
}

pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, email: &str, password: &str) -> Option<UserRecord>;
}

/// Source of the signed-in user's id.
#[async_trait]
pub trait UserIdentity: Send + Sync {
    async fn current_user_id(&self) -> Option<String>;
}

// --- Static user list ---

#[derive(Debug, Default, Deserialize)]
struct UserListFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: Vec<UserRecord>,
}

impl StaticUserDirectory {
    /// Fails if any user id is `"ai"`: stored messages from that user would
    /// read back as model replies.
    pub fn new(users: Vec<UserRecord>) -> Result<Self, AuthError> {
        if let Some(user) = users.iter().find(|u| u.user_id == AI_SENDER) {
            return Err(AuthError::ReservedUserId(user.user_id.clone()));
        }
        Ok(Self { users })
    }

    /// Loads `{"users": [{"userId", "email", "password"}, ...]}`.
    pub async fn from_file(path: &Path) -> Result<Self, AuthError> {
        let content = fs::read_to_string(path).await.map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let list: UserListFile = serde_json::from_str(&content)?;
        let directory = Self::new(list.users)?;
        info!(num_users = directory.users.len(), path = %path.display(), "User list loaded");
        Ok(directory)
    }
}

impl CredentialVerifier for StaticUserDirectory {
    fn verify(&self, email: &str, password: &str) -> Option<UserRecord> {
        self.users
            .iter()
            .find(|u| u.email == email && u.password == password)
            .cloned()
    }
}

// --- Session ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user_id: Option<String>,
    pub remembered_email: Option<String>,
}

/// Persists who is signed in. Passwords are never written.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SESSION_FILE_NAME))
    }

    /// A missing file is a signed-out session; any other failure is an error.
    pub async fn try_state(&self) -> Result<SessionState, AuthError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionState::default()),
            Err(source) => Err(AuthError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.try_state().await.unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "Error reading session file: {}", e);
            SessionState::default()
        })
    }

    pub async fn remembered_email(&self) -> Option<String> {
        self.state().await.remembered_email
    }

    #[instrument(skip(self, verifier, password))]
    pub async fn sign_in(
        &self,
        verifier: &dyn CredentialVerifier,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<String, AuthError> {
        let user = verifier
            .verify(email, password)
            .ok_or(AuthError::InvalidCredentials)?;

        let state = SessionState {
            user_id: Some(user.user_id.clone()),
            remembered_email: remember.then(|| email.to_string()),
        };
        self.write(&state).await?;
        info!(user_id = %user.user_id, "Signed in");
        Ok(user.user_id)
    }

    /// Clears the user id but keeps a remembered email.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.state().await;
        state.user_id = None;
        self.write(&state).await
    }

    async fn write(&self, state: &SessionState) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl UserIdentity for SessionStore {
    async fn current_user_id(&self) -> Option<String> {
        self.state().await.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn directory() -> StaticUserDirectory {
        StaticUserDirectory::new(vec![UserRecord {
            user_id: "u1".to_string(),
            email: "ann@example.com".to_string(),
            password: "secret".to_string(),
        }])
        .unwrap()
    }

    #[test]
    fn test_verify_requires_exact_match() {
        let dir = directory();
        assert_eq!(dir.verify("ann@example.com", "secret").unwrap().user_id, "u1");
        assert!(dir.verify("ann@example.com", "Secret").is_none());
        assert!(dir.verify("ANN@example.com", "secret").is_none());
    }

    #[tokio::test]
    async fn test_user_list_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"users":[{"userId":"u7","email":"bo@example.com","password":"pw"}]}"#,
        )
        .unwrap();

        let dir = StaticUserDirectory::from_file(&path).await.unwrap();
        assert_eq!(dir.verify("bo@example.com", "pw").unwrap().user_id, "u7");
    }

    #[tokio::test]
    async fn test_user_list_rejects_ai_user_id() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"users":[{"userId":"u1","email":"ann@example.com","password":"pw"},
                         {"userId":"ai","email":"al@example.com","password":"pw"}]}"#,
        )
        .unwrap();

        let err = StaticUserDirectory::from_file(&path).await.unwrap_err();
        assert!(matches!(err, AuthError::ReservedUserId(ref id) if id == "ai"));
    }

    #[tokio::test]
    async fn test_unreadable_session_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let session = SessionStore::in_dir(tmp.path());
        assert_eq!(session.try_state().await.unwrap(), SessionState::default());

        std::fs::create_dir(tmp.path().join(SESSION_FILE_NAME)).unwrap();

        assert!(matches!(session.try_state().await, Err(AuthError::Io { .. })));
        assert!(session.current_user_id().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_records_user_and_remembered_email() {
        let tmp = TempDir::new().unwrap();
        let session = SessionStore::in_dir(tmp.path());
        assert!(session.current_user_id().await.is_none());

        let user_id = session
            .sign_in(&directory(), "ann@example.com", "secret", true)
            .await
            .unwrap();

        assert_eq!(user_id, "u1");
        assert_eq!(session.current_user_id().await.as_deref(), Some("u1"));
        assert_eq!(session.remembered_email().await.as_deref(), Some("ann@example.com"));
        let raw = std::fs::read_to_string(tmp.path().join(SESSION_FILE_NAME)).unwrap();
        assert!(!raw.contains("secret"));
    }

    #[tokio::test]
    async fn test_failed_sign_in_leaves_session_untouched() {
        let tmp = TempDir::new().unwrap();
        let session = SessionStore::in_dir(tmp.path());

        let err = session
            .sign_in(&directory(), "ann@example.com", "wrong", false)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(session.current_user_id().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_keeps_remembered_email() {
        let tmp = TempDir::new().unwrap();
        let session = SessionStore::in_dir(tmp.path());
        session
            .sign_in(&directory(), "ann@example.com", "secret", true)
            .await
            .unwrap();

        session.sign_out().await.unwrap();

        assert!(session.current_user_id().await.is_none());
        assert_eq!(session.remembered_email().await.as_deref(), Some("ann@example.com"));
    }
}

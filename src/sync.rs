//! History synchronization: local store as primary, remote backup as a
//! best-effort secondary.
//!
//! Reads only ever come from the local store. Saves always hit the local store
//! first; the remote copy is attempted only after a successful local write and
//! a positive availability probe. Nothing in the save path is surfaced to the
//! caller.

use crate::backup::{AvailabilityProbe, BackupTarget};
use crate::history::{ConversationHistory, Message};
use crate::store::LocalHistoryStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Local save failed, so the remote path never ran.
    Skipped,
    /// A later save already reached this store.
    Superseded,
    Unavailable,
    BackedUp,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The local file holds this history or a later one.
    pub local_saved: bool,
    pub remote: RemoteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalStep {
    Saved,
    Superseded,
    Failed,
}

/// Each save takes a sequence number when it is issued. A store only accepts
/// a save newer than the last one it took, so saves that finish out of order
/// never roll either copy back.
pub struct HistorySync {
    store: LocalHistoryStore,
    probe: Arc<dyn AvailabilityProbe>,
    backup: Arc<dyn BackupTarget>,
    next_seq: AtomicU64,
    local_seq: Mutex<u64>,
    remote_seq: Mutex<u64>,
}

impl HistorySync {
    pub fn new(
        store: LocalHistoryStore,
        probe: Arc<dyn AvailabilityProbe>,
        backup: Arc<dyn BackupTarget>,
    ) -> Self {
        Self {
            store,
            probe,
            backup,
            next_seq: AtomicU64::new(0),
            local_seq: Mutex::new(0),
            remote_seq: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &LocalHistoryStore {
        &self.store
    }

    pub async fn load_history(&self) -> ConversationHistory {
        self.store.load().await
    }

    pub async fn save_history(&self, history: &[Message]) {
        self.save_history_with_outcome(history).await;
    }

    #[instrument(skip(self, history), fields(num_messages = history.len()))]
    pub async fn save_history_with_outcome(&self, history: &[Message]) -> SaveOutcome {
        let seq = self.issue_seq();
        match self.save_local(seq, history).await {
            LocalStep::Failed => SaveOutcome {
                local_saved: false,
                remote: RemoteOutcome::Skipped,
            },
            LocalStep::Superseded => SaveOutcome {
                local_saved: true,
                remote: RemoteOutcome::Superseded,
            },
            LocalStep::Saved => SaveOutcome {
                local_saved: true,
                remote: self.save_remote(seq, history).await,
            },
        }
    }

    /// Waits for the local write only; the probe and backup run on a
    /// background task whose handle is returned. `None` means the remote path
    /// has nothing to do (local write failed or was superseded).
    #[instrument(skip(self, history), fields(num_messages = history.len()))]
    pub async fn save_history_local_first(
        self: &Arc<Self>,
        history: ConversationHistory,
    ) -> Option<JoinHandle<RemoteOutcome>> {
        let seq = self.issue_seq();
        if self.save_local(seq, &history).await != LocalStep::Saved {
            return None;
        }
        let sync = Arc::clone(self);
        Some(tokio::spawn(async move { sync.save_remote(seq, &history).await }))
    }

    /// Runs `save_history` on the runtime without holding up the caller.
    /// The task is not cancelled if the handle is dropped.
    pub fn save_history_detached(self: &Arc<Self>, history: ConversationHistory) -> JoinHandle<()> {
        let seq = self.issue_seq();
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            if sync.save_local(seq, &history).await == LocalStep::Saved {
                sync.save_remote(seq, &history).await;
            }
        })
    }

    fn issue_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn save_local(&self, seq: u64, history: &[Message]) -> LocalStep {
        let mut last = self.local_seq.lock().await;
        if seq <= *last {
            debug!(seq, last = *last, "Newer history already saved locally");
            return LocalStep::Superseded;
        }
        match self.store.save(history).await {
            Ok(()) => {
                *last = seq;
                LocalStep::Saved
            }
            Err(e) => {
                error!("Failed to save chat history: {}", e);
                LocalStep::Failed
            }
        }
    }

    /// Holds the remote lock across probe and backup so cycles never overlap.
    async fn save_remote(&self, seq: u64, history: &[Message]) -> RemoteOutcome {
        let mut last = self.remote_seq.lock().await;
        if seq <= *last {
            debug!(seq, last = *last, "Newer history already sent to backup");
            return RemoteOutcome::Superseded;
        }
        *last = seq;

        if !self.probe.is_available().await {
            info!("Backup server not available, skipping backup");
            return RemoteOutcome::Unavailable;
        }

        match self.backup.backup(history).await {
            Ok(()) => {
                info!("Chat history backed up");
                RemoteOutcome::BackedUp
            }
            Err(e) => {
                warn!("Failed to back up chat history: {}", e);
                RemoteOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::backup::BackupError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct FixedProbe {
        pub available: bool,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FixedProbe {
        pub fn new(available: bool) -> Arc<Self> {
            Self::slow(available, Duration::ZERO)
        }

        pub fn slow(available: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                available,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AvailabilityProbe for FixedProbe {
        async fn is_available(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.available
        }
    }

    pub struct RecordingBackup {
        pub fail: bool,
        pub delay: Duration,
        pub received: Mutex<Vec<ConversationHistory>>,
    }

    impl RecordingBackup {
        pub fn new(fail: bool) -> Arc<Self> {
            Self::slow(fail, Duration::ZERO)
        }

        pub fn slow(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail,
                delay,
                received: Mutex::new(Vec::new()),
            })
        }

        pub fn last(&self) -> Option<ConversationHistory> {
            self.received.lock().unwrap().last().cloned()
        }

        pub fn calls(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BackupTarget for RecordingBackup {
        async fn backup(&self, history: &[Message]) -> Result<(), BackupError> {
            tokio::time::sleep(self.delay).await;
            self.received.lock().unwrap().push(history.to_vec());
            if self.fail {
                Err(BackupError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

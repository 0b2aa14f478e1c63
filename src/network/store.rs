//! Durable Record Store
//!
//! Two keyed tables, both keyed by host: the lobby directory and the game
//! session records. Game records also have a change feed so a participant
//! that missed live broadcasts can catch up.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::identity::{Participant, ParticipantId};
use super::protocol::GameRecord;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend did not accept the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored bytes could not be (de)serialized.
    #[error("Record encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Lobby directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyRecord {
    /// Host, also the key.
    pub host: Participant,
    /// Hex digest of the lobby password, if any.
    pub password_digest: Option<String>,
    /// Admitted members (host included).
    pub members: Vec<Participant>,
    /// When the lobby was opened.
    pub created_at: DateTime<Utc>,
}

impl LobbyRecord {
    /// Whether joining requires a password.
    pub fn has_password(&self) -> bool {
        self.password_digest.is_some()
    }
}

/// Keyed record storage.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace a lobby.
    async fn upsert_lobby(&self, record: LobbyRecord) -> Result<(), StoreError>;
    /// Read a lobby.
    async fn get_lobby(&self, host: ParticipantId) -> Result<Option<LobbyRecord>, StoreError>;
    /// Remove a lobby. Removing a missing lobby is not an error.
    async fn delete_lobby(&self, host: ParticipantId) -> Result<(), StoreError>;
    /// Lobbies created at or after `since`, oldest first.
    async fn list_lobbies(&self, since: DateTime<Utc>) -> Result<Vec<LobbyRecord>, StoreError>;

    /// Insert or replace a game record.
    async fn upsert_game(&self, record: GameRecord) -> Result<(), StoreError>;
    /// Read a game record.
    async fn get_game(&self, host: ParticipantId) -> Result<Option<GameRecord>, StoreError>;
    /// Remove a game record. Watchers see `None`.
    async fn delete_game(&self, host: ParticipantId) -> Result<(), StoreError>;
    /// Change feed for one game record, starting at its current value.
    async fn watch_game(&self, host: ParticipantId) -> Result<watch::Receiver<Option<GameRecord>>, StoreError>;
}

#[derive(Default)]
struct StoreState {
    lobbies: BTreeMap<ParticipantId, LobbyRecord>,
    games: BTreeMap<ParticipantId, Vec<u8>>,
    feeds: BTreeMap<ParticipantId, watch::Sender<Option<GameRecord>>>,
    failing_writes: u32,
}

impl StoreState {
    fn check_write(&mut self) -> Result<(), StoreError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            warn!(remaining = self.failing_writes, "Injected write failure");
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn notify(&mut self, host: ParticipantId, value: Option<GameRecord>) {
        if let Some(feed) = self.feeds.get(&host) {
            feed.send_replace(value);
        }
    }
}

/// In-memory store. Game records are kept bincode-encoded.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail.
    pub async fn fail_next_writes(&self, n: u32) {
        self.state.lock().await.failing_writes = n;
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_lobby(&self, record: LobbyRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.lobbies.insert(record.host.uid, record);
        Ok(())
    }

    async fn get_lobby(&self, host: ParticipantId) -> Result<Option<LobbyRecord>, StoreError> {
        Ok(self.state.lock().await.lobbies.get(&host).cloned())
    }

    async fn delete_lobby(&self, host: ParticipantId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.lobbies.remove(&host);
        Ok(())
    }

    async fn list_lobbies(&self, since: DateTime<Utc>) -> Result<Vec<LobbyRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut lobbies: Vec<LobbyRecord> = state
            .lobbies
            .values()
            .filter(|l| l.created_at >= since)
            .cloned()
            .collect();
        lobbies.sort_by_key(|l| l.created_at);
        Ok(lobbies)
    }

    async fn upsert_game(&self, record: GameRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        let bytes = record.to_bytes()?;
        debug!(host = %record.host.short(), revision = record.revision, bytes = bytes.len(), "Game record written");
        state.games.insert(record.host, bytes);
        state.notify(record.host, Some(record));
        Ok(())
    }

    async fn get_game(&self, host: ParticipantId) -> Result<Option<GameRecord>, StoreError> {
        let state = self.state.lock().await;
        match state.games.get(&host) {
            Some(bytes) => Ok(Some(GameRecord::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_game(&self, host: ParticipantId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.games.remove(&host);
        state.notify(host, None);
        // Watchers keep the final None; the sender is not needed any more.
        state.feeds.remove(&host);
        Ok(())
    }

    async fn watch_game(&self, host: ParticipantId) -> Result<watch::Receiver<Option<GameRecord>>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(feed) = state.feeds.get(&host) {
            return Ok(feed.subscribe());
        }
        let current = match state.games.get(&host) {
            Some(bytes) => Some(GameRecord::from_bytes(bytes)?),
            None => None,
        };
        let (tx, rx) = watch::channel(current);
        state.feeds.insert(host, tx);
        Ok(rx)
    }
}

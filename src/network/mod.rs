//! Network Module
//!
//! Host-authoritative multiplayer on top of a broadcast/presence channel
//! and a durable record store.
//!
//! - `identity`: Participant ids and names
//! - `protocol`: Broadcast events and the game record
//! - `channel`: Transport seam and the in-memory hub
//! - `store`: Record store seam and the in-memory store
//! - `lobby`: Admission, kicks, presence, membership freeze
//! - `session`: Authoritative game session and guest replicas
//! - `client`: Async lobby and game clients
//! - `config`: Timeouts and retry policy

pub mod identity;
pub mod protocol;
pub mod channel;
pub mod store;
pub mod lobby;
pub mod session;
pub mod client;
pub mod config;

pub use identity::{Participant, ParticipantId};
pub use protocol::{Action, Broadcast, GameRecord, JoinRequest, JoinResponse, RejectReason};
pub use channel::{Channel, ChannelEvent, MemoryHub, Subscription, Transport, TransportError};
pub use store::{LobbyRecord, MemoryStore, RecordStore, StoreError};
pub use lobby::{Admission, Lobby, LobbyError};
pub use session::{DropReason, GameSession, IntentOutcome, Replica, SessionSnapshot};
pub use client::{
    Claim, GameClient, JoinOutcome, LobbyClient, LobbyEvent, ProtocolError, Role, SessionContext,
    SessionNotice,
};
pub use config::ProtocolConfig;

//! Protocol Messages
//!
//! Broadcast events exchanged on lobby and game channels, plus the game
//! record that is both persisted and broadcast. Broadcasts are JSON;
//! game records can also be encoded with bincode for storage.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::triad::TriadIndices;
use super::identity::{Participant, ParticipantId};

// =============================================================================
// LOBBY MESSAGES
// =============================================================================

/// Guest asks the host to be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Requesting participant.
    pub uid: ParticipantId,
    /// Display name.
    pub name: String,
    /// Lobby password, if the lobby has one.
    pub password: Option<String>,
}

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Password missing or wrong.
    WrongPassword,
    /// Requester is already present in the lobby.
    AlreadyPresent,
    /// Requester was kicked from this lobby.
    Kicked,
    /// Display name or password fails validation.
    InvalidInput,
}

/// Host's answer, addressed to `uid`. Everyone else ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Recipient.
    pub uid: ParticipantId,
    /// Admitted or not.
    pub admitted: bool,
    /// Reason when not admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

// =============================================================================
// GAME MESSAGES
// =============================================================================

/// A participant's intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Claim a triad. `cards` are the tokens the sender saw in `slots`.
    Triad {
        /// Visible slots.
        slots: TriadIndices,
        /// Card tokens at those slots on the sender's board.
        cards: [String; 3],
    },
    /// Sender believes the board is dead.
    GameOver,
}

/// Persisted and broadcast session state.
///
/// `deck` and `visible` are table tokens in order; `collected` is keyed by
/// participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Session host (also the record key).
    pub host: ParticipantId,
    /// Frozen membership, host first.
    pub participants: Vec<Participant>,
    /// Increments on every host commit.
    pub revision: u64,
    /// Deck tokens in draw order.
    pub deck: Vec<String>,
    /// Visible tokens in slot order.
    pub visible: Vec<String>,
    /// Per-participant collected tokens.
    pub collected: BTreeMap<ParticipantId, Vec<String>>,
    /// Set by the host when no triad remains.
    pub game_over: bool,
}

impl GameRecord {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary (bincode).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// =============================================================================
// BROADCAST ENVELOPE
// =============================================================================

/// Named broadcast events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Broadcast {
    /// Lobby: join request.
    Join(JoinRequest),
    /// Lobby: admission decision.
    JoinResponse(JoinResponse),
    /// Lobby: targeted member must leave.
    Kick {
        /// Kicked participant.
        uid: ParticipantId,
    },
    /// Lobby: game is starting with this membership.
    Start {
        /// Frozen membership, host first.
        participants: Vec<Participant>,
    },
    /// Game: intent sent to the host.
    Action {
        /// Sending participant.
        sender: ParticipantId,
        /// Intent.
        action: Action,
    },
    /// Game: full state from the host.
    State(GameRecord),
}

impl Broadcast {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Broadcast::Join(_) => "join",
            Broadcast::JoinResponse(_) => "join_response",
            Broadcast::Kick { .. } => "kick",
            Broadcast::Start { .. } => "start",
            Broadcast::Action { .. } => "action",
            Broadcast::State(_) => "state",
        }
    }
}

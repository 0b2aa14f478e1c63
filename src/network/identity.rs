//! Participant Identity
//!
//! Identities are issued by an external provider. The protocol only
//! carries them around and compares them.

use std::fmt;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Stable participant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier from the identity provider.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex form for logs (first 4 bytes).
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity plus display name. Also the presence payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Identifier.
    pub uid: ParticipantId,
    /// Display name.
    pub name: String,
}

impl Participant {
    /// Create a participant.
    pub fn new(uid: ParticipantId, name: impl Into<String>) -> Self {
        Self { uid, name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id = ParticipantId::from_uuid(Uuid::from_bytes([0xab, 0xcd, 0x01, 0x02, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9]));
        assert_eq!(id.short(), "abcd0102");
    }

    #[test]
    fn test_participant_json_shape() {
        let id = ParticipantId::new();
        let p = Participant::new(id, "ada");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, format!(r#"{{"uid":"{}","name":"ada"}}"#, id));
        let back: Participant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}

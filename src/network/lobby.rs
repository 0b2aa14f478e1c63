//! Lobby Admission State
//!
//! Host-side lobby bookkeeping, free of any I/O. Membership (who was
//! admitted) and presence (who is connected now) are tracked separately;
//! a member can be admitted but momentarily absent.

use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::hash::{digest, HashDomain};
use super::identity::{Participant, ParticipantId};
use super::protocol::{JoinRequest, RejectReason};
use super::store::LobbyRecord;

/// Minimum display name length (characters, after trimming).
pub const NAME_MIN_LEN: usize = 3;

/// Maximum display name length.
pub const NAME_MAX_LEN: usize = 16;

/// Maximum password length.
pub const PASSWORD_MAX_LEN: usize = 32;

/// Lobby contract violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// Display name is empty, too short or too long.
    #[error("Display name must be 3-16 characters")]
    InvalidName,

    /// Password is too long.
    #[error("Password must be at most 32 characters")]
    PasswordTooLong,

    /// The host cannot kick itself.
    #[error("Host cannot be kicked")]
    CannotKickHost,

    /// Target is neither admitted nor present.
    #[error("Participant {0} is not in the lobby")]
    NotMember(ParticipantId),
}

/// Trim and check a display name.
pub fn validate_name(name: &str) -> Result<String, LobbyError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(LobbyError::InvalidName);
    }
    Ok(trimmed.to_string())
}

/// Check a password. Empty means none.
pub fn validate_password(password: Option<&str>) -> Result<Option<&str>, LobbyError> {
    match password {
        None | Some("") => Ok(None),
        Some(p) if p.chars().count() > PASSWORD_MAX_LEN => Err(LobbyError::PasswordTooLong),
        Some(p) => Ok(Some(p)),
    }
}

fn password_digest(host: ParticipantId, password: &str) -> String {
    hex::encode(digest(HashDomain::LobbyPassword, &[host.as_bytes(), password.as_bytes()]))
}

/// Host's decision on a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Requester is now a member.
    Admitted,
    /// Requester was turned away.
    Rejected(RejectReason),
}

/// A lobby, as seen by its host.
#[derive(Debug, Clone)]
pub struct Lobby {
    host: Participant,
    password_digest: Option<String>,
    members: Vec<Participant>,
    kicked: BTreeSet<ParticipantId>,
    present: Vec<Participant>,
    created_at: DateTime<Utc>,
}

impl Lobby {
    /// Open a lobby. The host is its first member.
    pub fn open(host: Participant, password: Option<&str>) -> Result<Self, LobbyError> {
        let name = validate_name(&host.name)?;
        let host = Participant::new(host.uid, name);
        let password_digest = validate_password(password)?.map(|p| password_digest(host.uid, p));
        info!(host = %host.uid.short(), protected = password_digest.is_some(), "Lobby opened");
        Ok(Self {
            members: vec![host.clone()],
            host,
            password_digest,
            kicked: BTreeSet::new(),
            present: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// The host.
    pub fn host(&self) -> &Participant {
        &self.host
    }

    /// Admitted members, host first.
    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    /// Last presence list, deduplicated.
    pub fn present(&self) -> &[Participant] {
        &self.present
    }

    /// Whether `uid` was kicked.
    pub fn is_kicked(&self, uid: ParticipantId) -> bool {
        self.kicked.contains(&uid)
    }

    fn is_present(&self, uid: ParticipantId) -> bool {
        self.present.iter().any(|p| p.uid == uid)
    }

    /// Decide on a join request.
    ///
    /// Checks run in a fixed order: kicked, input validity, password,
    /// presence. A kicked identity is refused even with the right password.
    pub fn review_join(&mut self, request: &JoinRequest) -> Admission {
        let decision = self.decide(request);
        debug!(uid = %request.uid.short(), ?decision, "Join reviewed");
        decision
    }

    fn decide(&mut self, request: &JoinRequest) -> Admission {
        if self.is_kicked(request.uid) {
            return Admission::Rejected(RejectReason::Kicked);
        }
        let Ok(name) = validate_name(&request.name) else {
            return Admission::Rejected(RejectReason::InvalidInput);
        };
        if let Some(expected) = &self.password_digest {
            let offered = request.password.as_deref().map(|p| password_digest(self.host.uid, p));
            if offered.as_ref() != Some(expected) {
                return Admission::Rejected(RejectReason::WrongPassword);
            }
        }
        if request.uid == self.host.uid || self.is_present(request.uid) {
            return Admission::Rejected(RejectReason::AlreadyPresent);
        }

        // Re-admission after a disconnect refreshes the name.
        match self.members.iter_mut().find(|m| m.uid == request.uid) {
            Some(member) => member.name = name,
            None => self.members.push(Participant::new(request.uid, name)),
        }
        Admission::Admitted
    }

    /// Remove a member and refuse them for the rest of the lobby's life.
    pub fn kick(&mut self, uid: ParticipantId) -> Result<(), LobbyError> {
        if uid == self.host.uid {
            return Err(LobbyError::CannotKickHost);
        }
        let known = self.members.iter().any(|m| m.uid == uid) || self.is_present(uid);
        if !known {
            return Err(LobbyError::NotMember(uid));
        }
        self.members.retain(|m| m.uid != uid);
        self.present.retain(|m| m.uid != uid);
        self.kicked.insert(uid);
        info!(uid = %uid.short(), "Member kicked");
        Ok(())
    }

    /// Replace the presence list. Duplicate entries for one identity collapse.
    pub fn sync_presence(&mut self, list: Vec<Participant>) {
        let mut seen = BTreeSet::new();
        self.present = list
            .into_iter()
            .filter(|p| !self.kicked.contains(&p.uid) && seen.insert(p.uid))
            .collect();
    }

    /// Membership for the game: the host, then every admitted member that
    /// is present right now, in presence order.
    pub fn freeze(&self) -> Vec<Participant> {
        let mut frozen = vec![self.host.clone()];
        for p in &self.present {
            if p.uid == self.host.uid {
                continue;
            }
            if let Some(member) = self.members.iter().find(|m| m.uid == p.uid) {
                frozen.push(member.clone());
            }
        }
        frozen
    }

    /// Directory entry for this lobby.
    pub fn to_record(&self) -> LobbyRecord {
        LobbyRecord {
            host: self.host.clone(),
            password_digest: self.password_digest.clone(),
            members: self.members.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Participant {
        Participant::new(ParticipantId::new(), "hostess")
    }

    fn request(uid: ParticipantId, password: Option<&str>) -> JoinRequest {
        JoinRequest { uid, name: "guest".into(), password: password.map(String::from) }
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  ada  ").unwrap(), "ada");
        assert_eq!(validate_name("ab"), Err(LobbyError::InvalidName));
        assert_eq!(validate_name("   "), Err(LobbyError::InvalidName));
        assert_eq!(validate_name("a-very-long-name-indeed"), Err(LobbyError::InvalidName));
        assert!(validate_name("sixteen-chars-ok").is_ok());
    }

    #[test]
    fn test_validate_password() {
        assert_eq!(validate_password(Some("")), Ok(None));
        assert_eq!(validate_password(Some("pw")), Ok(Some("pw")));
        let long = "x".repeat(33);
        assert_eq!(validate_password(Some(&long)), Err(LobbyError::PasswordTooLong));
    }

    #[test]
    fn test_open_public_lobby_admits() {
        let mut lobby = Lobby::open(host(), None).unwrap();
        let guest = ParticipantId::new();
        assert_eq!(lobby.review_join(&request(guest, None)), Admission::Admitted);
        assert_eq!(lobby.members().len(), 2);
        assert!(!lobby.to_record().has_password());
    }

    #[test]
    fn test_wrong_password_always_rejected() {
        let mut lobby = Lobby::open(host(), Some("secret")).unwrap();
        let guest = ParticipantId::new();

        for password in [None, Some("Secret"), Some(""), Some("secret ")] {
            assert_eq!(
                lobby.review_join(&request(guest, password)),
                Admission::Rejected(RejectReason::WrongPassword)
            );
        }
        assert_eq!(lobby.review_join(&request(guest, Some("secret"))), Admission::Admitted);
    }

    #[test]
    fn test_password_stored_as_digest() {
        let lobby = Lobby::open(host(), Some("secret")).unwrap();
        let record = lobby.to_record();
        let digest = record.password_digest.unwrap();
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("secret"));
    }

    #[test]
    fn test_kicked_rejected_regardless_of_presence() {
        let mut lobby = Lobby::open(host(), Some("pw")).unwrap();
        let guest = ParticipantId::new();
        assert_eq!(lobby.review_join(&request(guest, Some("pw"))), Admission::Admitted);
        lobby.sync_presence(vec![lobby.host().clone(), Participant::new(guest, "guest")]);

        lobby.kick(guest).unwrap();
        assert!(lobby.is_kicked(guest));

        // Presence flapping back in does not matter.
        lobby.sync_presence(vec![Participant::new(guest, "guest")]);
        assert!(lobby.present().is_empty());
        lobby.sync_presence(Vec::new());
        assert_eq!(
            lobby.review_join(&request(guest, Some("pw"))),
            Admission::Rejected(RejectReason::Kicked)
        );
    }

    #[test]
    fn test_present_member_rejected_absent_member_readmitted() {
        let mut lobby = Lobby::open(host(), None).unwrap();
        let guest = ParticipantId::new();
        assert_eq!(lobby.review_join(&request(guest, None)), Admission::Admitted);

        lobby.sync_presence(vec![Participant::new(guest, "guest")]);
        assert_eq!(
            lobby.review_join(&request(guest, None)),
            Admission::Rejected(RejectReason::AlreadyPresent)
        );

        lobby.sync_presence(Vec::new());
        assert_eq!(lobby.review_join(&request(guest, None)), Admission::Admitted);
        assert_eq!(lobby.members().len(), 2);
    }

    #[test]
    fn test_host_cannot_join_or_be_kicked() {
        let h = host();
        let mut lobby = Lobby::open(h.clone(), None).unwrap();
        assert_eq!(
            lobby.review_join(&request(h.uid, None)),
            Admission::Rejected(RejectReason::AlreadyPresent)
        );
        assert_eq!(lobby.kick(h.uid), Err(LobbyError::CannotKickHost));
        let stranger = ParticipantId::new();
        assert_eq!(lobby.kick(stranger), Err(LobbyError::NotMember(stranger)));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut lobby = Lobby::open(host(), None).unwrap();
        let req = JoinRequest { uid: ParticipantId::new(), name: "x".into(), password: None };
        assert_eq!(lobby.review_join(&req), Admission::Rejected(RejectReason::InvalidInput));
    }

    #[test]
    fn test_freeze_takes_present_members_host_first() {
        let h = host();
        let mut lobby = Lobby::open(h.clone(), None).unwrap();
        let (a, b, stranger) = (ParticipantId::new(), ParticipantId::new(), ParticipantId::new());
        lobby.review_join(&request(a, None));
        lobby.review_join(&request(b, None));

        // b is admitted but absent; stranger is present but never admitted.
        lobby.sync_presence(vec![
            Participant::new(a, "guest"),
            Participant::new(a, "guest"),
            h.clone(),
            Participant::new(stranger, "lurker"),
        ]);

        let frozen = lobby.freeze();
        let ids: Vec<ParticipantId> = frozen.iter().map(|p| p.uid).collect();
        assert_eq!(ids, vec![h.uid, a]);
    }
}

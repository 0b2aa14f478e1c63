//! Snapshot Hashing
//!
//! Domain-separated SHA-256 over encoded game state. Save files carry one
//! as a checksum, sessions expose one as a convergence fingerprint, and
//! lobby passwords are stored only as a digest.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type SnapshotHash = [u8; 32];

/// What a hash is for. Each purpose gets its own prefix, so a save-file
/// checksum can never collide with a session fingerprint over the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDomain {
    /// Solo save-file checksum.
    SaveFile,
    /// Replicated session fingerprint.
    Session,
    /// Seed derivation for a multiplayer deal.
    SessionSeed,
    /// Stored lobby password.
    LobbyPassword,
}

impl HashDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            HashDomain::SaveFile => b"TRIAD_SAVE_V1",
            HashDomain::Session => b"TRIAD_SESSION_V1",
            HashDomain::SessionSeed => b"TRIAD_SESSION_SEED_V1",
            HashDomain::LobbyPassword => b"TRIAD_LOBBY_PASSWORD_V1",
        }
    }
}

/// Incremental hasher over snapshot fields.
///
/// Order of updates is significant. Token lists and text are
/// length-prefixed, so `["ab", "c"]` and `["a", "bc"]` hash differently.
///
/// ```
/// use triad::core::hash::{HashDomain, SnapshotHasher};
///
/// let mut hasher = SnapshotHasher::new(HashDomain::Session);
/// hasher.u64(3).tokens(&["r1cf", "g2th", "b3so"]).flag(false);
/// let fingerprint = hasher.finalize();
/// assert_eq!(fingerprint.len(), 32);
/// ```
pub struct SnapshotHasher {
    inner: Sha256,
}

impl SnapshotHasher {
    /// Start a hash in `domain`.
    pub fn new(domain: HashDomain) -> Self {
        let mut inner = Sha256::new();
        inner.update(domain.tag());
        Self { inner }
    }

    /// Raw bytes, no length prefix. Only for fixed-size fields.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Little-endian u64.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    /// One byte, 0 or 1.
    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.bytes(&[value as u8])
    }

    /// Length-prefixed text.
    pub fn text(&mut self, value: &str) -> &mut Self {
        self.u64(value.len() as u64).bytes(value.as_bytes())
    }

    /// Length-prefixed list of card tokens (or any strings).
    pub fn tokens<S: AsRef<str>>(&mut self, values: &[S]) -> &mut Self {
        self.u64(values.len() as u64);
        for value in values {
            self.text(value.as_ref());
        }
        self
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> SnapshotHash {
        self.inner.finalize().into()
    }
}

/// One-shot digest of `parts`, concatenated, in `domain`.
pub fn digest(domain: HashDomain, parts: &[&[u8]]) -> SnapshotHash {
    let mut hasher = SnapshotHasher::new(domain);
    for part in parts {
        hasher.bytes(part);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_hash(tokens: &[&str]) -> SnapshotHash {
        let mut hasher = SnapshotHasher::new(HashDomain::Session);
        hasher.u64(1).tokens(tokens).flag(false);
        hasher.finalize()
    }

    #[test]
    fn test_same_board_same_hash() {
        let board = ["r1cf", "g2th", "b3so"];
        assert_eq!(board_hash(&board), board_hash(&board));
    }

    #[test]
    fn test_card_order_matters() {
        assert_ne!(board_hash(&["r1cf", "g2th"]), board_hash(&["g2th", "r1cf"]));
    }

    #[test]
    fn test_length_prefix_separates_tokens() {
        assert_ne!(board_hash(&["ab", "c"]), board_hash(&["a", "bc"]));
        assert_ne!(board_hash(&["r1cf"]), board_hash(&["r1cf", ""]));
    }

    #[test]
    fn test_domains_differ() {
        let data: &[&[u8]] = &[b"same", b"bytes"];
        assert_ne!(digest(HashDomain::SaveFile, data), digest(HashDomain::Session, data));
        assert_ne!(
            digest(HashDomain::SessionSeed, data),
            digest(HashDomain::LobbyPassword, data),
        );
    }

    #[test]
    fn test_digest_concatenates() {
        assert_eq!(
            digest(HashDomain::LobbyPassword, &[b"host", b"pw"]),
            digest(HashDomain::LobbyPassword, &[b"hostpw"]),
        );
    }
}

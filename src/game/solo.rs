//! Single-Player Game
//!
//! Wraps a [`Table`] with the player's stats and a local save file.
//! A save that fails any check (version, checksum, token domain, card
//! count) is never loaded; the caller gets a fresh game instead.

use std::path::{Path, PathBuf};
use std::time::Instant;
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::core::hash::{HashDomain, SnapshotHasher};
use crate::core::rng::DeterministicRng;
use super::card::DECK_SIZE;
use super::codec::{CodecError, TableRecord};
use super::table::{AttemptOutcome, Table, TableError};
use super::triad::TriadIndices;

/// Save file format version.
pub const SAVE_VERSION: u32 = 1;

/// Solo configuration.
#[derive(Debug, Clone)]
pub struct SoloConfig {
    /// Where the game is saved.
    pub save_path: PathBuf,
    /// Fixed seed for new games. Entropy if None.
    pub seed: Option<u64>,
}

impl Default for SoloConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("triad-save.json"),
            seed: None,
        }
    }
}

impl SoloConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            save_path: std::env::var("TRIAD_SAVE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.save_path),
            seed: std::env::var("TRIAD_SEED").ok().and_then(|s| s.parse().ok()),
        }
    }
}

/// Running player stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoloStats {
    /// Hints requested.
    pub hints: u32,
    /// Attempts that were not triads.
    pub mistakes: u32,
    /// Seconds played before the current run (from earlier sessions).
    pub elapsed_secs: u64,
}

/// Final result of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSummary {
    /// Hints requested.
    pub hints: u32,
    /// Mistakes made.
    pub mistakes: u32,
    /// Total play time in seconds.
    pub elapsed_secs: u64,
    /// Cards collected.
    pub collected: usize,
}

/// Save file errors.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error("Malformed save: {0}")]
    Json(#[from] serde_json::Error),

    /// Save was written by an incompatible version.
    #[error("Unsupported save version {0}")]
    Version(u32),

    /// Contents do not match the stored checksum.
    #[error("Save checksum mismatch")]
    Checksum,

    /// Card data is corrupt.
    #[error("Corrupt card data: {0}")]
    Codec(#[from] CodecError),
}

/// On-disk snapshot of a solo game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFile {
    /// Format version.
    pub version: u32,
    /// Encoded table.
    pub table: TableRecord,
    /// Stats at save time.
    pub stats: SoloStats,
    /// Whether the game had ended.
    pub game_over: bool,
    /// Hex SHA-256 over everything above.
    pub checksum: String,
}

impl SaveFile {
    fn compute_checksum(version: u32, table: &TableRecord, stats: &SoloStats, game_over: bool) -> String {
        let mut hasher = SnapshotHasher::new(HashDomain::SaveFile);
        hasher
            .u64(u64::from(version))
            .tokens(&table.deck)
            .tokens(&table.visible)
            .tokens(&table.collected)
            .u64(u64::from(stats.hints))
            .u64(u64::from(stats.mistakes))
            .u64(stats.elapsed_secs)
            .flag(game_over);
        hex::encode(hasher.finalize())
    }

    /// Check version and checksum.
    pub fn verify(&self) -> Result<(), SaveError> {
        if self.version != SAVE_VERSION {
            return Err(SaveError::Version(self.version));
        }
        let expected = Self::compute_checksum(self.version, &self.table, &self.stats, self.game_over);
        if expected != self.checksum {
            return Err(SaveError::Checksum);
        }
        Ok(())
    }
}

/// A single-player game in progress.
#[derive(Debug)]
pub struct SoloGame {
    table: Table,
    stats: SoloStats,
    game_over: bool,
    resumed_at: Instant,
}

impl SoloGame {
    /// Start a new game.
    pub fn new(seed: Option<u64>) -> Self {
        let table = match seed {
            Some(seed) => Table::with_seed(seed),
            None => Table::new(),
        };
        Self::from_table(table, SoloStats::default(), false)
    }

    fn from_table(table: Table, stats: SoloStats, game_over: bool) -> Self {
        Self { table, stats, game_over, resumed_at: Instant::now() }
    }

    /// Current table (read-only).
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.game_over
    }

    /// Current stats, with elapsed time including this run.
    pub fn stats(&self) -> SoloStats {
        SoloStats {
            elapsed_secs: self.stats.elapsed_secs + self.resumed_at.elapsed().as_secs(),
            ..self.stats
        }
    }

    /// Attempt a triad. A miss counts as a mistake.
    pub fn attempt(&mut self, slots: TriadIndices) -> Result<AttemptOutcome, TableError> {
        if self.game_over {
            return Ok(AttemptOutcome { success: false, game_over: true });
        }
        let outcome = self.table.attempt_remove_triad(slots)?;
        if !outcome.success {
            self.stats.mistakes += 1;
        }
        if outcome.game_over {
            self.game_over = true;
            let summary = self.summary();
            info!(?summary, "Solo game finished");
        }
        Ok(outcome)
    }

    /// Request a hint. Counted even if the board is dead.
    pub fn hint(&mut self) -> Option<usize> {
        self.stats.hints += 1;
        self.table.hint()
    }

    /// Cosmetic reshuffle of the face-up cards.
    pub fn shuffle_visible(&mut self) {
        self.table.shuffle_visible();
    }

    /// Summary of the game so far.
    pub fn summary(&self) -> GameSummary {
        let stats = self.stats();
        GameSummary {
            hints: stats.hints,
            mistakes: stats.mistakes,
            elapsed_secs: stats.elapsed_secs,
            collected: self.table.collected().len(),
        }
    }

    /// Snapshot the game for saving.
    pub fn to_save(&self) -> SaveFile {
        let table = self.table.to_record();
        let stats = self.stats();
        let checksum = SaveFile::compute_checksum(SAVE_VERSION, &table, &stats, self.game_over);
        SaveFile { version: SAVE_VERSION, table, stats, game_over: self.game_over, checksum }
    }

    /// Restore a game from a verified save.
    pub fn from_save(save: &SaveFile, rng: DeterministicRng) -> Result<Self, SaveError> {
        save.verify()?;
        let table = Table::from_record(&save.table, rng)?;
        if table.card_count() != DECK_SIZE {
            return Err(CodecError::CardCount { expected: DECK_SIZE, found: table.card_count() }.into());
        }
        Ok(Self::from_table(table, save.stats, save.game_over))
    }

    /// Write the save file.
    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let json = serde_json::to_string_pretty(&self.to_save())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a save file.
    pub fn load(path: &Path) -> Result<Self, SaveError> {
        let json = std::fs::read_to_string(path)?;
        let save: SaveFile = serde_json::from_str(&json)?;
        let (rng, _) = DeterministicRng::from_entropy();
        Self::from_save(&save, rng)
    }

    /// Resume the saved game, or start fresh if there is none or it is unusable.
    pub fn resume_or_new(config: &SoloConfig) -> Self {
        match Self::load(&config.save_path) {
            Ok(game) if !game.is_over() => {
                info!(path = %config.save_path.display(), "Resumed saved game");
                game
            }
            Ok(_) => Self::new(config.seed),
            Err(SaveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::new(config.seed),
            Err(e) => {
                warn!(path = %config.save_path.display(), error = %e, "Discarding unusable save");
                Self::new(config.seed)
            }
        }
    }
}

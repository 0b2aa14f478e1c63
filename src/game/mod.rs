//! Game Logic Module
//!
//! The card engine. Deterministic given a seed.
//!
//! ## Module Structure
//!
//! - `card`: Card type and attribute enums
//! - `triad`: Triad rule and board search
//! - `deck`: Ordered draw pile
//! - `table`: Deck, visible cards, collected pile and replenishment
//! - `codec`: Card tokens and table records
//! - `solo`: Single-player wrapper with stats and save files

pub mod card;
pub mod triad;
pub mod deck;
pub mod table;
pub mod codec;
pub mod solo;

// Re-export key types
pub use card::{Card, Color, Count, Shape, Fill, DECK_SIZE};
pub use triad::{is_triad, find_all_triads, has_triad, TriadIndices, TRIAD_SIZE};
pub use deck::Deck;
pub use table::{Table, TableError, AttemptOutcome, VISIBLE_SIZE};
pub use codec::{CodecError, TableRecord, encode_cards, decode_cards};
pub use solo::{SoloGame, SoloConfig, SoloStats, GameSummary, SaveError, SaveFile};

//! # Triad
//!
//! Card engine for the triad pattern game, plus a host-authoritative
//! multiplayer protocol built on a broadcast channel and a record store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TRIAD                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  └── hash.rs     - SHA-256 fingerprints and checksums        │
//! │                                                              │
//! │  game/           - Engine (deterministic given a seed)       │
//! │  ├── card.rs     - Cards and attributes                      │
//! │  ├── triad.rs    - Triad rule and board search               │
//! │  ├── deck.rs     - Draw pile                                 │
//! │  ├── table.rs    - Deal, remove, replenish, hint             │
//! │  ├── codec.rs    - Card tokens and table records             │
//! │  └── solo.rs     - Single player stats and save files        │
//! │                                                              │
//! │  network/        - Multiplayer (non-deterministic)           │
//! │  ├── protocol.rs - Broadcast events, game record             │
//! │  ├── channel.rs  - Broadcast/presence seam, in-memory hub    │
//! │  ├── store.rs    - Record store seam, in-memory store        │
//! │  ├── lobby.rs    - Admission and membership                  │
//! │  ├── session.rs  - Authoritative session, replicas           │
//! │  └── client.rs   - Async lobby and game clients              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - Cards are conserved: deck + visible + collected is always the full
//!   81-card set, in solo play and across all participants' piles.
//! - After every successful removal the board holds a triad, or the game
//!   is over.
//! - Only the host mutates shared state. Guests replace their replica
//!   wholesale with each newer host snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::card::Card;
pub use game::table::{AttemptOutcome, Table, TableError};
pub use game::solo::SoloGame;
pub use network::client::{GameClient, LobbyClient, SessionContext};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

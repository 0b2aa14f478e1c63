//! Core deterministic primitives.
//!
//! Seeded randomness and domain-separated hashing, shared by the engine
//! and the protocol. Nothing here does I/O.

pub mod rng;
pub mod hash;

pub use rng::{derive_session_seed, DeterministicRng};
pub use hash::{digest, HashDomain, SnapshotHash, SnapshotHasher};

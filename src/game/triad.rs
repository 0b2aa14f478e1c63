//! Triad Detection
//!
//! Three cards form a triad when every attribute is either identical
//! across all three or pairwise distinct across all three.
//!
//! Search is O(n^3) over the visible cards. The table never holds more
//! than ~15 cards, so this stays cheap; it is not meant for larger n.

use super::card::{Card, DOMAIN_SIZE};

/// Number of cards in a triad.
pub const TRIAD_SIZE: usize = 3;

/// Index triple into a card slice, ascending when produced by [`find_all_triads`].
pub type TriadIndices = [usize; TRIAD_SIZE];

/// Check whether three cards form a triad.
///
/// With attribute values in {0, 1, 2}, three values are all-equal or
/// all-distinct exactly when their sum is divisible by 3.
#[inline]
pub fn is_triad(a: &Card, b: &Card, c: &Card) -> bool {
    let (x, y, z) = (a.attributes(), b.attributes(), c.attributes());
    (0..4).all(|i| (x[i] + y[i] + z[i]) % DOMAIN_SIZE == 0)
}

/// Enumerate every triad in `cards`, in ascending index-tuple order.
///
/// The ordering is part of the contract: hint selection draws from this
/// list with a seeded RNG and must be reproducible.
pub fn find_all_triads(cards: &[Card]) -> Vec<TriadIndices> {
    let n = cards.len();
    let mut triads = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if is_triad(&cards[i], &cards[j], &cards[k]) {
                    triads.push([i, j, k]);
                }
            }
        }
    }
    triads
}

/// True if `cards` contains at least one triad. Stops at the first hit.
pub fn has_triad(cards: &[Card]) -> bool {
    let n = cards.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if is_triad(&cards[i], &cards[j], &cards[k]) {
                    return true;
                }
            }
        }
    }
    false
}

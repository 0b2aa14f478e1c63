//! Table State Machine
//!
//! The live game: a deck, the face-up cards and the collected pile.
//!
//! After every mutation the visible cards either contain a triad or the
//! game is over. Cards are never created or destroyed, only moved between
//! deck, visible and collected, so the three always total 81.

use tracing::{debug, trace};

use crate::core::rng::DeterministicRng;
use super::card::Card;
use super::deck::Deck;
use super::triad::{find_all_triads, has_triad, is_triad, TriadIndices, TRIAD_SIZE};

/// Nominal number of face-up cards.
pub const VISIBLE_SIZE: usize = 12;

/// Result of a triad attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// The three cards formed a triad and were removed.
    pub success: bool,
    /// Replenishment could not restore a playable table.
    pub game_over: bool,
}

impl AttemptOutcome {
    /// A rejected attempt. State is unchanged.
    pub const MISS: AttemptOutcome = AttemptOutcome { success: false, game_over: false };
}

/// Caller contract violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Index does not refer to a visible card.
    #[error("Slot {index} out of range ({len} visible cards)")]
    IndexOutOfRange {
        /// Offending index
        index: usize,
        /// Visible card count
        len: usize,
    },

    /// The same slot appears twice in the triple.
    #[error("Slot {0} given more than once")]
    DuplicateIndex(usize),
}

/// The game table.
#[derive(Clone, Debug)]
pub struct Table {
    deck: Deck,
    visible: Vec<Card>,
    collected: Vec<Card>,
    rng: DeterministicRng,
}

impl Table {
    /// New game seeded from entropy.
    pub fn new() -> Self {
        let (rng, seed) = DeterministicRng::from_entropy();
        debug!(seed, "Dealing new table");
        Self::deal(rng)
    }

    /// New game with a fixed seed. Same seed, same deal.
    pub fn with_seed(seed: u64) -> Self {
        Self::deal(DeterministicRng::new(seed))
    }

    /// Deal `VISIBLE_SIZE` cards from a fresh deck, redealing from scratch
    /// until the opening board contains a triad.
    pub fn deal(mut rng: DeterministicRng) -> Self {
        let mut redeals = 0u32;
        loop {
            let mut deck = Deck::shuffled(&mut rng);
            let visible = deck.draw(VISIBLE_SIZE);
            if has_triad(&visible) {
                if redeals > 0 {
                    debug!(redeals, "Opening deal needed redeals");
                }
                return Self { deck, visible, collected: Vec::new(), rng };
            }
            redeals += 1;
        }
    }

    /// Rebuild a table from its parts, preserving deck and visible order.
    pub fn from_parts(
        deck: Deck,
        visible: Vec<Card>,
        collected: Vec<Card>,
        rng: DeterministicRng,
    ) -> Self {
        Self { deck, visible, collected, rng }
    }

    /// Face-up cards in slot order.
    pub fn visible(&self) -> &[Card] {
        &self.visible
    }

    /// Remaining deck.
    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    /// Cards collected through this table's own pile.
    pub fn collected(&self) -> &[Card] {
        &self.collected
    }

    /// Deck + visible + collected. 81 for a solo game.
    pub fn card_count(&self) -> usize {
        self.deck.len() + self.visible.len() + self.collected.len()
    }

    /// All triads on the board, ascending.
    pub fn find_all_triads(&self) -> Vec<TriadIndices> {
        find_all_triads(&self.visible)
    }

    /// True if no triad remains on the board.
    pub fn is_exhausted(&self) -> bool {
        !has_triad(&self.visible)
    }

    /// Cards in the given slots, after validating them.
    pub fn cards_at(&self, slots: TriadIndices) -> Result<[Card; TRIAD_SIZE], TableError> {
        self.validate(slots)?;
        Ok([self.visible[slots[0]], self.visible[slots[1]], self.visible[slots[2]]])
    }

    fn validate(&self, slots: TriadIndices) -> Result<(), TableError> {
        let len = self.visible.len();
        for (n, &index) in slots.iter().enumerate() {
            if index >= len {
                return Err(TableError::IndexOutOfRange { index, len });
            }
            if slots[..n].contains(&index) {
                return Err(TableError::DuplicateIndex(index));
            }
        }
        Ok(())
    }

    /// Try to remove a triad into this table's collected pile.
    pub fn attempt_remove_triad(&mut self, slots: TriadIndices) -> Result<AttemptOutcome, TableError> {
        let mut pile = std::mem::take(&mut self.collected);
        let outcome = self.remove_triad_into(slots, &mut pile);
        self.collected = pile;
        outcome
    }

    /// Try to remove a triad, moving the cards into `pile` instead of the
    /// table's own collected pile. Multiplayer hosts use this to credit the
    /// participant who submitted the triad.
    pub fn remove_triad_into(
        &mut self,
        slots: TriadIndices,
        pile: &mut Vec<Card>,
    ) -> Result<AttemptOutcome, TableError> {
        let [a, b, c] = self.cards_at(slots)?;
        if !is_triad(&a, &b, &c) {
            return Ok(AttemptOutcome::MISS);
        }

        pile.extend([a, b, c]);
        let playable = self.replenish(slots);

        Ok(AttemptOutcome { success: true, game_over: !playable })
    }

    /// Refill the vacated slots and make sure the board is playable.
    ///
    /// Draws three cards into the slots. If that leaves no triad, each
    /// further deck card is tried in place of each drawn card in turn. The
    /// first swap that shows a triad is kept and the displaced card goes to
    /// the bottom of the deck; a card that fits nowhere goes back to the
    /// bottom itself. Every deck card is tried at most once. Only single
    /// swaps against the fresh draw are searched, so a board reachable only
    /// by swapping two cards is reported as unplayable.
    fn replenish(&mut self, slots: TriadIndices) -> bool {
        let drawn = self.deck.draw(TRIAD_SIZE);
        for (slot, card) in slots.iter().zip(&drawn) {
            self.visible[*slot] = *card;
        }

        if drawn.len() < TRIAD_SIZE {
            // Deck exhausted: drop the slots that could not be filled.
            let mut vacated = slots[drawn.len()..].to_vec();
            vacated.sort_unstable_by(|x, y| y.cmp(x));
            for slot in vacated {
                self.visible.remove(slot);
            }
            debug!(visible = self.visible.len(), "Deck exhausted");
            return has_triad(&self.visible);
        }

        if has_triad(&self.visible) {
            return true;
        }

        let max_redraws = self.deck.len();
        debug!(max_redraws, "No triad after draw, searching deck");
        for attempt in 0..max_redraws {
            let Some(candidate) = self.deck.draw_one() else {
                break;
            };
            for &slot in &slots {
                let displaced = std::mem::replace(&mut self.visible[slot], candidate);
                if has_triad(&self.visible) {
                    self.deck.reinsert(displaced);
                    trace!(attempt, slot, "Substitution restored a triad");
                    return true;
                }
                self.visible[slot] = displaced;
            }
            self.deck.reinsert(candidate);
        }
        false
    }

    /// A random slot belonging to a random triad, or None on a dead board.
    pub fn hint(&mut self) -> Option<usize> {
        let triads = self.find_all_triads();
        let triad = *self.rng.choose(&triads)?;
        Some(triad[self.rng.next_int(TRIAD_SIZE as u32) as usize])
    }

    /// Reorder the face-up cards. Deck and collected are untouched.
    pub fn shuffle_visible(&mut self) {
        self.rng.shuffle(&mut self.visible);
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

//! Deck
//!
//! An ordered sequence of not-yet-drawn cards. Draws come off the front,
//! reinserted cards go to the back.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use super::card::Card;

/// Shuffled draw pile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    cards: VecDeque<Card>,
}

impl Deck {
    /// Full 81-card deck in a uniformly random order.
    pub fn shuffled(rng: &mut DeterministicRng) -> Self {
        let mut cards: Vec<Card> = Card::all().collect();
        rng.shuffle(&mut cards);
        Self { cards: cards.into() }
    }

    /// Deck with an exact draw order (front first). Used when restoring snapshots.
    pub fn from_cards(cards: impl IntoIterator<Item = Card>) -> Self {
        Self { cards: cards.into_iter().collect() }
    }

    /// Remove and return up to `n` cards from the front.
    ///
    /// A short result means the deck ran out; that is the exhaustion
    /// signal, not an error.
    pub fn draw(&mut self, n: usize) -> Vec<Card> {
        let n = n.min(self.cards.len());
        self.cards.drain(..n).collect()
    }

    /// Draw a single card from the front.
    pub fn draw_one(&mut self) -> Option<Card> {
        self.cards.pop_front()
    }

    /// Return a card to the bottom of the deck.
    pub fn reinsert(&mut self, card: Card) {
        self.cards.push_back(card);
    }

    /// Cards remaining.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True if no cards remain.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Remaining cards in draw order.
    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::game::card::DECK_SIZE;

    #[test]
    fn test_shuffled_deck_has_every_card_once() {
        let mut rng = DeterministicRng::new(3);
        let deck = Deck::shuffled(&mut rng);

        assert_eq!(deck.len(), DECK_SIZE);
        let unique: BTreeSet<Card> = deck.iter().copied().collect();
        assert_eq!(unique.len(), DECK_SIZE);
    }

    #[test]
    fn test_shuffle_depends_on_seed() {
        let a = Deck::shuffled(&mut DeterministicRng::new(1));
        let b = Deck::shuffled(&mut DeterministicRng::new(1));
        let c = Deck::shuffled(&mut DeterministicRng::new(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_draw_from_front() {
        let cards: Vec<Card> = Card::all().take(5).collect();
        let mut deck = Deck::from_cards(cards.clone());

        assert_eq!(deck.draw(2), cards[..2].to_vec());
        assert_eq!(deck.len(), 3);
        assert_eq!(deck.draw_one(), Some(cards[2]));
    }

    #[test]
    fn test_short_draw_returns_remaining() {
        let cards: Vec<Card> = Card::all().take(2).collect();
        let mut deck = Deck::from_cards(cards.clone());

        assert_eq!(deck.draw(3), cards);
        assert!(deck.is_empty());
        assert!(deck.draw(3).is_empty());
        assert_eq!(deck.draw_one(), None);
    }

    #[test]
    fn test_reinsert_goes_to_bottom() {
        let cards: Vec<Card> = Card::all().take(3).collect();
        let mut deck = Deck::from_cards(cards.clone());

        let top = deck.draw_one().unwrap();
        deck.reinsert(top);

        let order: Vec<Card> = deck.iter().copied().collect();
        assert_eq!(order, vec![cards[1], cards[2], cards[0]]);
    }
}

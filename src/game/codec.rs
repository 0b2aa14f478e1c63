//! Card and Table Codec
//!
//! Cards travel as fixed 4-character tokens, one character per attribute:
//!
//! | position | attribute | values            |
//! |----------|-----------|-------------------|
//! | 0        | color     | `r` `g` `b`       |
//! | 1        | count     | `1` `2` `3`       |
//! | 2        | shape     | `c` `t` `s`       |
//! | 3        | fill      | `f` `h` `o`       |
//!
//! A table travels as a plain record of token lists. Decoding never
//! substitutes a default card: an unknown character or a repeated card is
//! rejected, since either would break card conservation.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use super::card::{Card, Color, Count, Fill, Shape};
use super::deck::Deck;
use super::table::Table;

/// Characters per token.
pub const TOKEN_LEN: usize = 4;

/// Per-position alphabets, indexed by attribute value.
const ALPHABETS: [[char; 3]; TOKEN_LEN] = [
    ['r', 'g', 'b'],
    ['1', '2', '3'],
    ['c', 't', 's'],
    ['f', 'h', 'o'],
];

/// Codec errors. All of them mean corrupted or incompatible data.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Token is not exactly four characters.
    #[error("Card token {0:?} must be 4 characters")]
    BadLength(String),

    /// Character outside the domain for its position.
    #[error("Card token {token:?} has invalid character at position {position}")]
    BadChar {
        /// Offending token
        token: String,
        /// Character position (0-3)
        position: usize,
    },

    /// The same card appears more than once in a record.
    #[error("Card {0} appears more than once")]
    DuplicateCard(String),

    /// Record does not hold the expected number of cards.
    #[error("Expected {expected} cards, found {found}")]
    CardCount {
        /// Expected total
        expected: usize,
        /// Actual total
        found: usize,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization failed.
    #[error("Binary error: {0}")]
    Binary(#[from] bincode::Error),
}

impl Card {
    /// Encode as a 4-character token.
    pub fn to_token(&self) -> String {
        self.attributes()
            .iter()
            .zip(ALPHABETS.iter())
            .map(|(value, alphabet)| alphabet[*value as usize])
            .collect()
    }

    /// Decode a 4-character token.
    pub fn from_token(token: &str) -> Result<Card, CodecError> {
        let chars: Vec<char> = token.chars().collect();
        if chars.len() != TOKEN_LEN {
            return Err(CodecError::BadLength(token.to_string()));
        }

        // Each position decodes straight into its attribute.
        let attribute = |position: usize| {
            ALPHABETS[position]
                .iter()
                .position(|a| *a == chars[position])
                .map(|value| value as u8)
                .ok_or_else(|| CodecError::BadChar {
                    token: token.to_string(),
                    position,
                })
        };
        let out_of_domain = |position: usize| CodecError::BadChar {
            token: token.to_string(),
            position,
        };

        Ok(Card::new(
            Color::from_index(attribute(0)?).ok_or_else(|| out_of_domain(0))?,
            Count::from_index(attribute(1)?).ok_or_else(|| out_of_domain(1))?,
            Shape::from_index(attribute(2)?).ok_or_else(|| out_of_domain(2))?,
            Fill::from_index(attribute(3)?).ok_or_else(|| out_of_domain(3))?,
        ))
    }
}

/// Encode cards to tokens, preserving order.
pub fn encode_cards(cards: &[Card]) -> Vec<String> {
    cards.iter().map(Card::to_token).collect()
}

/// Decode tokens to cards, preserving order.
pub fn decode_cards<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Card>, CodecError> {
    tokens.iter().map(|t| Card::from_token(t.as_ref())).collect()
}

/// Reject any card seen twice across the given groups.
pub fn ensure_distinct<'a>(groups: impl IntoIterator<Item = &'a [Card]>) -> Result<usize, CodecError> {
    let mut seen = BTreeSet::new();
    for card in groups.into_iter().flatten() {
        if !seen.insert(*card) {
            return Err(CodecError::DuplicateCard(card.to_token()));
        }
    }
    Ok(seen.len())
}

/// Plain-record form of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    /// Deck tokens in draw order.
    pub deck: Vec<String>,
    /// Visible tokens in slot order.
    pub visible: Vec<String>,
    /// Collected tokens in collection order.
    pub collected: Vec<String>,
}

impl TableRecord {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl Table {
    /// Encode the full table state.
    pub fn to_record(&self) -> TableRecord {
        TableRecord {
            deck: self.deck().iter().map(Card::to_token).collect(),
            visible: encode_cards(self.visible()),
            collected: encode_cards(self.collected()),
        }
    }

    /// Rebuild a table with identical deck order, visible order and collected pile.
    ///
    /// The RNG is not part of the record; hints and shuffles after a
    /// restore follow `rng`.
    pub fn from_record(record: &TableRecord, rng: DeterministicRng) -> Result<Table, CodecError> {
        let deck = decode_cards(&record.deck)?;
        let visible = decode_cards(&record.visible)?;
        let collected = decode_cards(&record.collected)?;
        ensure_distinct([&deck[..], &visible[..], &collected[..]])?;

        Ok(Table::from_parts(Deck::from_cards(deck), visible, collected, rng))
    }
}

//! Card Definitions
//!
//! A card is an immutable 4-tuple of attribute values. Each attribute
//! domain has exactly three values, giving 3^4 = 81 distinct cards.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Number of distinct cards.
pub const DECK_SIZE: usize = 81;

/// Number of values in every attribute domain.
pub const DOMAIN_SIZE: u8 = 3;

macro_rules! attribute {
    (
        $(#[$meta:meta])*
        $name:ident { $first:ident = 0, $second:ident = 1, $third:ident = 2 }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            #[allow(missing_docs)]
            $first = 0,
            #[allow(missing_docs)]
            $second = 1,
            #[allow(missing_docs)]
            $third = 2,
        }

        impl $name {
            /// All values in domain order.
            pub const ALL: [$name; 3] = [$name::$first, $name::$second, $name::$third];

            /// Position of this value in its domain (0-2).
            #[inline]
            pub const fn index(self) -> u8 {
                self as u8
            }

            /// Value at a domain position.
            #[inline]
            pub fn from_index(index: u8) -> Option<$name> {
                Self::ALL.get(index as usize).copied()
            }
        }
    };
}

attribute! {
    /// Card color.
    Color { Red = 0, Green = 1, Blue = 2 }
}

attribute! {
    /// Number of symbols on the card.
    Count { One = 0, Two = 1, Three = 2 }
}

attribute! {
    /// Symbol shape.
    Shape { Circle = 0, Triangle = 1, Square = 2 }
}

attribute! {
    /// Symbol fill pattern.
    Fill { Solid = 0, Striped = 1, Outlined = 2 }
}

/// A single card. Compared by value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Card {
    /// Color attribute
    pub color: Color,
    /// Count attribute
    pub count: Count,
    /// Shape attribute
    pub shape: Shape,
    /// Fill attribute
    pub fill: Fill,
}

impl Card {
    /// Create a card from its four attributes.
    pub const fn new(color: Color, count: Count, shape: Shape, fill: Fill) -> Self {
        Self { color, count, shape, fill }
    }

    /// Attribute indices in (color, count, shape, fill) order.
    #[inline]
    pub const fn attributes(&self) -> [u8; 4] {
        [self.color.index(), self.count.index(), self.shape.index(), self.fill.index()]
    }

    /// Build a card from attribute indices. Returns None if any index is >= 3.
    pub fn from_attributes(attrs: [u8; 4]) -> Option<Self> {
        Some(Self {
            color: Color::from_index(attrs[0])?,
            count: Count::from_index(attrs[1])?,
            shape: Shape::from_index(attrs[2])?,
            fill: Fill::from_index(attrs[3])?,
        })
    }

    /// Dense index in [0, 81), base-3 over the attributes.
    pub const fn index(&self) -> u8 {
        let [a, b, c, d] = self.attributes();
        ((a * DOMAIN_SIZE + b) * DOMAIN_SIZE + c) * DOMAIN_SIZE + d
    }

    /// Inverse of [`Card::index`].
    pub fn from_index(index: u8) -> Option<Self> {
        if index as usize >= DECK_SIZE {
            return None;
        }
        let d = index % DOMAIN_SIZE;
        let c = (index / DOMAIN_SIZE) % DOMAIN_SIZE;
        let b = (index / (DOMAIN_SIZE * DOMAIN_SIZE)) % DOMAIN_SIZE;
        let a = index / (DOMAIN_SIZE * DOMAIN_SIZE * DOMAIN_SIZE);
        Self::from_attributes([a, b, c, d])
    }

    /// Every card, in index order.
    pub fn all() -> impl Iterator<Item = Card> {
        (0..DECK_SIZE as u8).filter_map(Card::from_index)
    }

    /// The unique card that forms a triad with `a` and `b`.
    ///
    /// Per attribute: the shared value if `a` and `b` agree, otherwise the
    /// remaining third value. If `a == b` the result is that same card.
    pub fn complete(a: &Card, b: &Card) -> Card {
        let x = a.attributes();
        let y = b.attributes();
        let mut out = [0u8; 4];
        for i in 0..4 {
            // Values sum to 0 mod 3 exactly when all-same or all-different.
            out[i] = (2 * DOMAIN_SIZE - x[i] - y[i]) % DOMAIN_SIZE;
        }
        // Indices stay in 0..3 by construction.
        Card::from_attributes(out).unwrap_or(*a)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{:?}/{:?}", self.color, self.count, self.shape, self.fill)
    }
}

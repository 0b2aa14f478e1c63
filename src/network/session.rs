//! Game Session State
//!
//! The shared game, free of any I/O. The host owns one authoritative
//! [`GameSession`] and is the only one that applies intents to it.
//! Everyone else holds a [`Replica`]: the last confirmed state from the
//! host plus an optional local speculative copy for instant feedback.
//! A newer confirmed state replaces both wholesale.

use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::core::hash::{HashDomain, SnapshotHash, SnapshotHasher};
use crate::core::rng::DeterministicRng;
use crate::game::card::{Card, DECK_SIZE};
use crate::game::codec::{decode_cards, encode_cards, ensure_distinct, CodecError};
use crate::game::deck::Deck;
use crate::game::table::{Table, TableError};
use crate::game::triad::TriadIndices;
use super::identity::{Participant, ParticipantId};
use super::protocol::{Action, GameRecord};

/// Why the host ignored an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The game already ended.
    GameOver,
    /// Sender is not in the frozen membership.
    NotParticipant,
    /// Slots out of range or repeated.
    InvalidSlots(TableError),
    /// The slots no longer hold the cards the sender saw.
    Stale,
    /// The cards do not form a triad.
    NotTriad,
    /// A game-over claim while the board still has a triad.
    BoardPlayable,
}

/// Result of applying an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    /// State changed.
    Applied {
        /// The game ended with this change.
        game_over: bool,
    },
    /// State unchanged.
    Dropped(DropReason),
}

impl IntentOutcome {
    /// Whether the intent changed state.
    pub fn is_applied(&self) -> bool {
        matches!(self, IntentOutcome::Applied { .. })
    }
}

/// The shared game.
#[derive(Debug, Clone)]
pub struct GameSession {
    host: ParticipantId,
    participants: Vec<Participant>,
    table: Table,
    collected: BTreeMap<ParticipantId, Vec<Card>>,
    game_over: bool,
    revision: u64,
}

impl GameSession {
    /// Deal a new game for a frozen membership.
    pub fn deal(host: ParticipantId, participants: Vec<Participant>, seed: u64) -> Self {
        let table = Table::deal(DeterministicRng::new(seed));
        let collected = participants.iter().map(|p| (p.uid, Vec::new())).collect();
        debug!(host = %host.short(), players = participants.len(), "Session dealt");
        Self { host, participants, table, collected, game_over: false, revision: 1 }
    }

    /// Session host.
    pub fn host(&self) -> ParticipantId {
        self.host
    }

    /// Frozen membership, host first.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// The table. Its own collected pile stays empty; cards go to participants.
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Cards collected by `uid`.
    pub fn collected(&self, uid: ParticipantId) -> &[Card] {
        self.collected.get(&uid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Commit counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.game_over
    }

    /// Deck + visible + every participant's pile. Always 81.
    pub fn card_count(&self) -> usize {
        self.table.card_count() + self.collected.values().map(Vec::len).sum::<usize>()
    }

    fn is_participant(&self, uid: ParticipantId) -> bool {
        self.participants.iter().any(|p| p.uid == uid)
    }

    /// Build a triad intent for the given slots from this board.
    pub fn intent(&self, slots: TriadIndices) -> Result<Action, TableError> {
        let cards = self.table.cards_at(slots)?;
        Ok(Action::Triad { slots, cards: cards.map(|c| c.to_token()) })
    }

    /// Validate and apply an intent from `sender`.
    ///
    /// Nothing the sender claims is trusted: slots are range-checked, the
    /// cards are compared with what the sender saw, and the triad rule is
    /// re-checked here. Anything that fails is dropped without touching
    /// state.
    pub fn apply_intent(&mut self, sender: ParticipantId, action: &Action) -> IntentOutcome {
        let outcome = self.apply(sender, action);
        trace!(sender = %sender.short(), ?outcome, revision = self.revision, "Intent processed");
        outcome
    }

    fn apply(&mut self, sender: ParticipantId, action: &Action) -> IntentOutcome {
        if self.game_over {
            return IntentOutcome::Dropped(DropReason::GameOver);
        }
        if !self.is_participant(sender) {
            return IntentOutcome::Dropped(DropReason::NotParticipant);
        }

        match action {
            Action::Triad { slots, cards } => {
                let seen = match self.table.cards_at(*slots) {
                    Ok(seen) => seen,
                    Err(e) => return IntentOutcome::Dropped(DropReason::InvalidSlots(e)),
                };
                if seen.iter().zip(cards).any(|(card, token)| card.to_token() != *token) {
                    return IntentOutcome::Dropped(DropReason::Stale);
                }

                let pile = self.collected.entry(sender).or_default();
                match self.table.remove_triad_into(*slots, pile) {
                    Ok(attempt) if attempt.success => {
                        self.game_over = attempt.game_over;
                        self.revision += 1;
                        IntentOutcome::Applied { game_over: attempt.game_over }
                    }
                    Ok(_) => IntentOutcome::Dropped(DropReason::NotTriad),
                    Err(e) => IntentOutcome::Dropped(DropReason::InvalidSlots(e)),
                }
            }
            Action::GameOver => {
                if !self.table.is_exhausted() {
                    return IntentOutcome::Dropped(DropReason::BoardPlayable);
                }
                self.game_over = true;
                self.revision += 1;
                IntentOutcome::Applied { game_over: true }
            }
        }
    }

    /// Encode for storage and broadcast.
    pub fn to_record(&self) -> GameRecord {
        let record = self.table.to_record();
        GameRecord {
            host: self.host,
            participants: self.participants.clone(),
            revision: self.revision,
            deck: record.deck,
            visible: record.visible,
            collected: self.collected.iter().map(|(uid, cards)| (*uid, encode_cards(cards))).collect(),
            game_over: self.game_over,
        }
    }

    /// Decode a record, checking that all 81 cards are accounted for once.
    pub fn from_record(record: &GameRecord) -> Result<Self, CodecError> {
        let deck = decode_cards(&record.deck)?;
        let visible = decode_cards(&record.visible)?;
        let collected = record
            .collected
            .iter()
            .map(|(uid, tokens)| Ok((*uid, decode_cards(tokens)?)))
            .collect::<Result<BTreeMap<_, _>, CodecError>>()?;

        let groups = [&deck[..], &visible[..]]
            .into_iter()
            .chain(collected.values().map(Vec::as_slice));
        let found = ensure_distinct(groups)?;
        if found != DECK_SIZE {
            return Err(CodecError::CardCount { expected: DECK_SIZE, found });
        }

        let rng = DeterministicRng::new(record.revision);
        Ok(Self {
            host: record.host,
            participants: record.participants.clone(),
            table: Table::from_parts(Deck::from_cards(deck), visible, Vec::new(), rng),
            collected,
            game_over: record.game_over,
            revision: record.revision,
        })
    }

    /// Fingerprint of the replicated state. Equal on every converged replica.
    pub fn fingerprint(&self) -> SnapshotHash {
        let record = self.to_record();
        let mut hasher = SnapshotHasher::new(HashDomain::Session);
        hasher.u64(record.revision).tokens(&record.deck).tokens(&record.visible);
        for (uid, tokens) in &record.collected {
            hasher.bytes(uid.as_bytes()).tokens(tokens);
        }
        hasher.flag(record.game_over);
        hasher.finalize()
    }

    /// Read-only view for observers.
    pub fn snapshot(&self, speculative: bool) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision,
            participants: self.participants.clone(),
            visible: self.table.visible().to_vec(),
            deck_remaining: self.table.deck().len(),
            collected: self.collected.clone(),
            game_over: self.game_over,
            speculative,
        }
    }
}

/// What subscribers see after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Revision of the confirmed state this was built from.
    pub revision: u64,
    /// Frozen membership, host first.
    pub participants: Vec<Participant>,
    /// Face-up cards in slot order.
    pub visible: Vec<Card>,
    /// Cards left in the deck.
    pub deck_remaining: usize,
    /// Per-participant collected cards.
    pub collected: BTreeMap<ParticipantId, Vec<Card>>,
    /// Game has ended.
    pub game_over: bool,
    /// Includes local moves the host has not confirmed yet.
    pub speculative: bool,
}

impl SessionSnapshot {
    /// Triads collected by `uid`.
    pub fn score(&self, uid: ParticipantId) -> usize {
        self.collected.get(&uid).map_or(0, |c| c.len() / 3)
    }
}

/// A non-authoritative copy of the session.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    confirmed: Option<GameSession>,
    speculative: Option<GameSession>,
}

impl Replica {
    /// Empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a host record if it is newer than the confirmed state.
    ///
    /// Returns whether the replica changed. Local speculation is discarded
    /// on every accepted record.
    pub fn accept(&mut self, record: &GameRecord) -> Result<bool, CodecError> {
        if let Some(current) = &self.confirmed {
            if record.revision <= current.revision() {
                return Ok(false);
            }
        }
        self.confirmed = Some(GameSession::from_record(record)?);
        self.speculative = None;
        Ok(true)
    }

    /// Forget everything (the host ended the session).
    pub fn clear(&mut self) {
        self.confirmed = None;
        self.speculative = None;
    }

    /// Last state confirmed by the host.
    pub fn confirmed(&self) -> Option<&GameSession> {
        self.confirmed.as_ref()
    }

    /// What the local player should see: speculation if any, else confirmed.
    pub fn view(&self) -> Option<&GameSession> {
        self.speculative.as_ref().or(self.confirmed.as_ref())
    }

    /// Whether the view includes unconfirmed local moves.
    pub fn is_speculative(&self) -> bool {
        self.speculative.is_some()
    }

    /// Apply a local intent to the speculative copy only. Dropped if
    /// nothing has been received from the host yet.
    pub fn speculate(&mut self, me: ParticipantId, action: &Action) -> IntentOutcome {
        let base = match (&self.speculative, &self.confirmed) {
            (Some(pending), _) => pending.clone(),
            (None, Some(confirmed)) => confirmed.clone(),
            (None, None) => return IntentOutcome::Dropped(DropReason::GameOver),
        };
        let mut next = base;
        let outcome = next.apply_intent(me, action);
        if outcome.is_applied() {
            self.speculative = Some(next);
        }
        outcome
    }

    /// Snapshot of the current view.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.view().map(|s| s.snapshot(self.is_speculative()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        host: Participant,
        alice: Participant,
        bob: Participant,
    }

    fn fixture() -> Fixture {
        Fixture {
            host: Participant::new(ParticipantId::new(), "host"),
            alice: Participant::new(ParticipantId::new(), "alice"),
            bob: Participant::new(ParticipantId::new(), "bob"),
        }
    }

    fn session(f: &Fixture, seed: u64) -> GameSession {
        GameSession::deal(f.host.uid, vec![f.host.clone(), f.alice.clone(), f.bob.clone()], seed)
    }

    #[test]
    fn test_deal_conserves_cards() {
        let f = fixture();
        let s = session(&f, 1);
        assert_eq!(s.card_count(), DECK_SIZE);
        assert_eq!(s.revision(), 1);
        assert!(!s.table().find_all_triads().is_empty());
    }

    #[test]
    fn test_racing_guests_one_winner() {
        let f = fixture();
        let mut s = session(&f, 9);
        let triad = s.table().find_all_triads()[0];
        let intent = s.intent(triad).unwrap();

        // Both guests saw the same board and claim the same triad.
        let first = s.apply_intent(f.alice.uid, &intent);
        let second = s.apply_intent(f.bob.uid, &intent);

        assert!(first.is_applied());
        assert!(matches!(second, IntentOutcome::Dropped(_)));
        assert_eq!(s.collected(f.alice.uid).len(), 3);
        assert!(s.collected(f.bob.uid).is_empty());

        // Same as applying only the winner's action.
        let mut expected = session(&f, 9);
        expected.apply_intent(f.alice.uid, &intent);
        assert_eq!(s.fingerprint(), expected.fingerprint());
    }

    #[test]
    fn test_stale_intent_dropped() {
        let f = fixture();
        let mut s = session(&f, 9);
        let triad = s.table().find_all_triads()[0];
        let mut intent = s.intent(triad).unwrap();
        // Sender claims to have seen a card that is still in the deck.
        let unseen = s.table().deck().iter().next().unwrap().to_token();
        if let Action::Triad { cards, .. } = &mut intent {
            cards[0] = unseen;
        }

        let before = s.fingerprint();
        assert_eq!(s.apply_intent(f.alice.uid, &intent), IntentOutcome::Dropped(DropReason::Stale));
        assert_eq!(s.fingerprint(), before);
    }

    #[test]
    fn test_not_triad_and_bad_slots_dropped() {
        let f = fixture();
        let mut s = session(&f, 2);
        let triads = s.table().find_all_triads();
        let mut miss = None;
        'search: for i in 0..12 {
            for j in (i + 1)..12 {
                for k in (j + 1)..12 {
                    if !triads.contains(&[i, j, k]) {
                        miss = Some([i, j, k]);
                        break 'search;
                    }
                }
            }
        }

        let intent = s.intent(miss.unwrap()).unwrap();
        assert_eq!(s.apply_intent(f.alice.uid, &intent), IntentOutcome::Dropped(DropReason::NotTriad));

        let bogus = Action::Triad { slots: [0, 0, 1], cards: ["r1cf".into(), "r1cf".into(), "r1cf".into()] };
        assert!(matches!(
            s.apply_intent(f.alice.uid, &bogus),
            IntentOutcome::Dropped(DropReason::InvalidSlots(TableError::DuplicateIndex(0)))
        ));
        assert_eq!(s.revision(), 1);
    }

    #[test]
    fn test_outsider_dropped() {
        let f = fixture();
        let mut s = session(&f, 3);
        let intent = s.intent(s.table().find_all_triads()[0]).unwrap();
        let outsider = ParticipantId::new();
        assert_eq!(s.apply_intent(outsider, &intent), IntentOutcome::Dropped(DropReason::NotParticipant));
    }

    #[test]
    fn test_game_over_claim_is_advisory() {
        let f = fixture();
        let mut s = session(&f, 3);
        assert_eq!(
            s.apply_intent(f.bob.uid, &Action::GameOver),
            IntentOutcome::Dropped(DropReason::BoardPlayable)
        );
        assert!(!s.is_over());
    }

    #[test]
    fn test_play_to_end_conserves_cards() {
        let f = fixture();
        let mut s = session(&f, 17);
        let players = [f.host.uid, f.alice.uid, f.bob.uid];
        let mut turn = 0;
        while !s.is_over() {
            let intent = s.intent(s.table().find_all_triads()[0]).unwrap();
            assert!(s.apply_intent(players[turn % 3], &intent).is_applied());
            assert_eq!(s.card_count(), DECK_SIZE);
            turn += 1;
        }
        let collected: usize = players.iter().map(|p| s.collected(*p).len()).sum();
        assert_eq!(collected, turn * 3);
        assert_eq!(s.revision(), 1 + turn as u64);

        let intent = Action::GameOver;
        assert_eq!(s.apply_intent(f.bob.uid, &intent), IntentOutcome::Dropped(DropReason::GameOver));
    }

    #[test]
    fn test_record_roundtrip() {
        let f = fixture();
        let mut s = session(&f, 5);
        let intent = s.intent(s.table().find_all_triads()[0]).unwrap();
        s.apply_intent(f.alice.uid, &intent);

        let restored = GameSession::from_record(&s.to_record()).unwrap();
        assert_eq!(restored.fingerprint(), s.fingerprint());
        assert_eq!(restored.table().visible(), s.table().visible());
        assert_eq!(restored.collected(f.alice.uid), s.collected(f.alice.uid));
    }

    #[test]
    fn test_torn_record_rejected() {
        let f = fixture();
        let s = session(&f, 5);
        let mut record = s.to_record();
        record.deck.pop();
        assert!(matches!(
            GameSession::from_record(&record),
            Err(CodecError::CardCount { expected: 81, found: 80 })
        ));

        let mut record = s.to_record();
        let dup = record.visible[0].clone();
        record.collected.insert(f.bob.uid, vec![dup]);
        assert!(matches!(GameSession::from_record(&record), Err(CodecError::DuplicateCard(_))));
    }

    #[test]
    fn test_replica_ignores_older_revisions() {
        let f = fixture();
        let mut host = session(&f, 6);
        let r1 = host.to_record();
        let intent = host.intent(host.table().find_all_triads()[0]).unwrap();
        host.apply_intent(f.alice.uid, &intent);
        let r2 = host.to_record();

        let mut replica = Replica::new();
        assert!(replica.accept(&r2).unwrap());
        assert!(!replica.accept(&r1).unwrap());
        assert!(!replica.accept(&r2).unwrap());
        assert_eq!(replica.confirmed().unwrap().revision(), 2);
    }

    #[test]
    fn test_speculation_replaced_by_confirmed_state() {
        let f = fixture();
        let mut host = session(&f, 11);
        let mut replica = Replica::new();
        replica.accept(&host.to_record()).unwrap();

        // Alice claims a triad locally; Bob's claim for the same cards wins at the host.
        let triad = replica.view().unwrap().table().find_all_triads()[0];
        let intent = replica.view().unwrap().intent(triad).unwrap();
        assert!(replica.speculate(f.alice.uid, &intent).is_applied());
        assert!(replica.is_speculative());
        assert_eq!(replica.snapshot().unwrap().score(f.alice.uid), 1);

        host.apply_intent(f.bob.uid, &intent);
        assert!(!host.apply_intent(f.alice.uid, &intent).is_applied());
        assert!(replica.accept(&host.to_record()).unwrap());

        let snap = replica.snapshot().unwrap();
        assert!(!snap.speculative);
        assert_eq!(snap.score(f.alice.uid), 0);
        assert_eq!(snap.score(f.bob.uid), 1);
        assert_eq!(replica.confirmed().unwrap().fingerprint(), host.fingerprint());
    }

    #[test]
    fn test_speculation_matches_host_when_uncontested() {
        let f = fixture();
        let mut host = session(&f, 12);
        let mut replica = Replica::new();
        replica.accept(&host.to_record()).unwrap();

        let intent = replica.view().unwrap().intent(replica.view().unwrap().table().find_all_triads()[0]).unwrap();
        replica.speculate(f.alice.uid, &intent);
        host.apply_intent(f.alice.uid, &intent);

        // Replenishment is deterministic in deck order, so the guess was right.
        assert_eq!(replica.view().unwrap().table().visible(), host.table().visible());
    }
}

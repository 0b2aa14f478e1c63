//! Lobby and Game Clients
//!
//! Async drivers that run the pure [`Lobby`] and [`GameSession`] state
//! machines over a [`Transport`] and a [`RecordStore`]. One client per
//! participant; each processes its events one at a time, so the host never
//! applies two intents concurrently.
//!
//! ## Flow
//!
//! ```text
//! host                         guest
//! LobbyClient::create          LobbyClient::request_join ── join ──▶ host
//!   next_event (admit)  ◀──────────────── join_response ◀──┘
//!   start_game ─────────── start ────────▶ next_event → Started
//! GameClient::deal_when_present ◀─ presence ─ LobbyClient::join_game
//!   commit: store write, then state broadcast ──▶ replica.accept
//!   next_event (apply intents) ◀── action ── submit_action
//! ```

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::core::rng::derive_session_seed;
use crate::game::codec::CodecError;
use crate::game::table::TableError;
use crate::game::triad::TriadIndices;
use super::channel::{Channel, ChannelEvent, Subscription, Transport, TransportError};
use super::config::ProtocolConfig;
use super::identity::{Participant, ParticipantId};
use super::lobby::{validate_name, validate_password, Admission, Lobby, LobbyError};
use super::protocol::{Action, Broadcast, GameRecord, JoinRequest, JoinResponse, RejectReason};
use super::session::{DropReason, GameSession, IntentOutcome, Replica, SessionSnapshot};
use super::store::{LobbyRecord, RecordStore, StoreError};

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Host-only operation called by a guest.
    #[error("Only the host can do that")]
    NotHost,

    /// No game state received yet.
    #[error("Session not initialized")]
    NotInitialized,

    /// Not every participant showed up in time.
    #[error("Participants did not arrive within {0:?}")]
    PresenceTimeout(Duration),

    /// The host kicked us.
    #[error("Kicked from lobby")]
    Kicked,

    /// Lobby or session no longer exists.
    #[error("Session closed")]
    SessionClosed,

    /// Host could not persist authoritative state. Fatal to the session.
    #[error("Authoritative state could not be stored: {0}")]
    StateDesync(StoreError),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Lobby contract violation.
    #[error("Lobby error: {0}")]
    Lobby(#[from] LobbyError),

    /// Bad slots.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// Corrupt state received.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Who this client is in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Lobby creator and sole writer of game state.
    Host,
    /// Everyone else.
    Guest,
}

/// Everything a client needs, built once and passed around.
#[derive(Clone)]
pub struct SessionContext {
    /// Local participant.
    pub identity: Participant,
    /// Broadcast/presence transport.
    pub transport: Arc<dyn Transport>,
    /// Durable record store.
    pub store: Arc<dyn RecordStore>,
    /// Timeouts and retry policy.
    pub config: ProtocolConfig,
}

impl SessionContext {
    /// Create a context.
    pub fn new(
        identity: Participant,
        transport: Arc<dyn Transport>,
        store: Arc<dyn RecordStore>,
        config: ProtocolConfig,
    ) -> Self {
        Self { identity, transport, store, config }
    }

    fn me(&self) -> ParticipantId {
        self.identity.uid
    }

    /// Subscribe, retrying with backoff.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, ProtocolError> {
        let mut attempt = 0;
        loop {
            match self.transport.subscribe(topic, self.me()) {
                Ok(sub) => return Ok(sub),
                Err(e) if attempt + 1 < self.config.store_retry_attempts => {
                    let delay = self.config.retry_delay(&mut rand::thread_rng(), attempt);
                    warn!(topic, attempt, ?delay, error = %e, "Subscribe failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(topic, error = %e, "Subscribe failed");
                    return Err(e.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext").field("identity", &self.identity).finish()
    }
}

fn lobby_topic(host: ParticipantId) -> String {
    format!("lobby:{host}")
}

fn game_topic(host: ParticipantId) -> String {
    format!("game:{host}")
}

// =============================================================================
// LOBBY
// =============================================================================

/// Result of a join request.
#[derive(Debug)]
pub enum JoinOutcome {
    /// Admitted; the client is now in the lobby.
    Admitted(Box<LobbyClient>),
    /// Refused by the host.
    Rejected(RejectReason),
    /// No answer within the join timeout.
    TimedOut,
}

/// Something that happened in the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    /// Host: a join request was decided.
    JoinReviewed {
        /// Requester.
        uid: ParticipantId,
        /// Decision.
        admission: Admission,
    },
    /// Presence changed.
    MembersChanged(Vec<Participant>),
    /// Guest: the host started the game with this membership.
    Started(Vec<Participant>),
}

/// A participant's view of one lobby.
pub struct LobbyClient {
    ctx: SessionContext,
    host: ParticipantId,
    role: Role,
    lobby: Option<Lobby>,
    present: Vec<Participant>,
    sub: Subscription,
    channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for LobbyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyClient")
            .field("host", &self.host)
            .field("role", &self.role)
            .field("present", &self.present.len())
            .finish()
    }
}

impl LobbyClient {
    /// Open a lobby as host.
    pub async fn create(ctx: SessionContext, password: Option<&str>) -> Result<Self, ProtocolError> {
        let lobby = Lobby::open(ctx.identity.clone(), password)?;
        ctx.store.upsert_lobby(lobby.to_record()).await?;

        let host = ctx.me();
        let sub = ctx.subscribe(&lobby_topic(host)).await?;
        let channel = sub.channel();
        channel.track(lobby.host().clone())?;

        Ok(Self { ctx, host, role: Role::Host, lobby: Some(lobby), present: Vec::new(), sub, channel })
    }

    /// Open lobbies created within the listing window.
    pub async fn list(ctx: &SessionContext) -> Result<Vec<LobbyRecord>, ProtocolError> {
        let window = chrono::Duration::from_std(ctx.config.lobby_listing_window)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        Ok(ctx.store.list_lobbies(Utc::now() - window).await?)
    }

    /// Ask `host` to be admitted and wait for the answer.
    #[instrument(skip(ctx, password), fields(me = %ctx.identity.uid.short(), host = %host.short()))]
    pub async fn request_join(
        ctx: SessionContext,
        host: ParticipantId,
        password: Option<&str>,
    ) -> Result<JoinOutcome, ProtocolError> {
        let name = validate_name(&ctx.identity.name)?;
        let password = validate_password(password)?;
        if ctx.store.get_lobby(host).await?.is_none() {
            return Err(ProtocolError::SessionClosed);
        }

        let mut sub = ctx.subscribe(&lobby_topic(host)).await?;
        let channel = sub.channel();
        let me = ctx.me();
        channel.broadcast(&Broadcast::Join(JoinRequest {
            uid: me,
            name: name.clone(),
            password: password.map(String::from),
        }))?;

        let answer = tokio::time::timeout(ctx.config.join_timeout, async {
            while let Some(event) = sub.recv().await {
                if let ChannelEvent::Broadcast { from, message: Broadcast::JoinResponse(response) } = event {
                    if from == host && response.uid == me {
                        return Some(response);
                    }
                }
            }
            None
        })
        .await;

        match answer {
            Ok(Some(JoinResponse { admitted: true, .. })) => {
                info!("Admitted to lobby");
                let identity = Participant::new(me, name);
                channel.track(identity.clone())?;
                let ctx = SessionContext { identity, ..ctx };
                Ok(JoinOutcome::Admitted(Box::new(Self {
                    ctx,
                    host,
                    role: Role::Guest,
                    lobby: None,
                    present: Vec::new(),
                    sub,
                    channel,
                })))
            }
            Ok(Some(JoinResponse { reason, .. })) => {
                let reason = reason.unwrap_or(RejectReason::InvalidInput);
                info!(?reason, "Join rejected");
                Ok(JoinOutcome::Rejected(reason))
            }
            Ok(None) => Err(ProtocolError::SessionClosed),
            Err(_) => {
                info!(timeout = ?ctx.config.join_timeout, "Join request timed out");
                Ok(JoinOutcome::TimedOut)
            }
        }
    }

    /// Our role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Lobby host.
    pub fn host(&self) -> ParticipantId {
        self.host
    }

    /// Last known presence list.
    pub fn members_present(&self) -> &[Participant] {
        &self.present
    }

    fn lobby_mut(&mut self) -> Result<&mut Lobby, ProtocolError> {
        self.lobby.as_mut().ok_or(ProtocolError::NotHost)
    }

    /// Wait for the next lobby event, answering join requests on the way
    /// when hosting. A guest that gets kicked receives `Err(Kicked)`.
    pub async fn next_event(&mut self) -> Result<LobbyEvent, ProtocolError> {
        loop {
            let event = self.sub.recv().await.ok_or(ProtocolError::SessionClosed)?;
            if let Some(out) = self.handle(event).await? {
                return Ok(out);
            }
        }
    }

    async fn handle(&mut self, event: ChannelEvent) -> Result<Option<LobbyEvent>, ProtocolError> {
        match event {
            ChannelEvent::PresenceSync(list) => {
                if let Some(lobby) = self.lobby.as_mut() {
                    lobby.sync_presence(list);
                    self.present = lobby.present().to_vec();
                } else {
                    self.present = list;
                }
                Ok(Some(LobbyEvent::MembersChanged(self.present.clone())))
            }
            ChannelEvent::Broadcast { from, message } => match (self.role, message) {
                (Role::Host, Broadcast::Join(request)) => {
                    let lobby = self.lobby_mut()?;
                    let admission = lobby.review_join(&request);
                    let record = lobby.to_record();
                    let (admitted, reason) = match admission {
                        Admission::Admitted => (true, None),
                        Admission::Rejected(reason) => (false, Some(reason)),
                    };
                    self.channel.broadcast(&Broadcast::JoinResponse(JoinResponse {
                        uid: request.uid,
                        admitted,
                        reason,
                    }))?;
                    if admitted {
                        if let Err(e) = self.ctx.store.upsert_lobby(record).await {
                            warn!(error = %e, "Lobby membership not persisted");
                        }
                    }
                    Ok(Some(LobbyEvent::JoinReviewed { uid: request.uid, admission }))
                }
                (Role::Guest, Broadcast::Kick { uid }) if from == self.host && uid == self.ctx.me() => {
                    info!(host = %self.host.short(), "Kicked from lobby");
                    let _ = self.channel.untrack();
                    Err(ProtocolError::Kicked)
                }
                (Role::Guest, Broadcast::Start { participants }) if from == self.host => {
                    Ok(Some(LobbyEvent::Started(participants)))
                }
                (_, other) => {
                    debug!(event = other.name(), from = %from.short(), "Ignoring lobby broadcast");
                    Ok(None)
                }
            },
        }
    }

    /// Host: remove a member and tell them.
    pub async fn kick(&mut self, uid: ParticipantId) -> Result<(), ProtocolError> {
        let lobby = self.lobby_mut()?;
        lobby.kick(uid)?;
        let record = lobby.to_record();
        let present = lobby.present().to_vec();
        self.present = present;
        self.channel.broadcast(&Broadcast::Kick { uid })?;
        // The kick already took effect locally and on the wire.
        if let Err(e) = self.ctx.store.upsert_lobby(record).await {
            warn!(error = %e, uid = %uid.short(), "Kick not persisted");
        }
        Ok(())
    }

    /// Host: freeze membership to who is present now and move to the game.
    ///
    /// The lobby record is removed after `lobby_teardown_delay`.
    #[instrument(skip(self), fields(host = %self.host.short()))]
    pub async fn start_game(mut self) -> Result<GameClient, ProtocolError> {
        // Freeze against live presence, not the last drained sync.
        let live = self.channel.presence();
        let lobby = self.lobby_mut()?;
        lobby.sync_presence(live);
        let participants = lobby.freeze();
        self.present = participants.clone();

        // Subscribe to the game topic before guests are told to move there.
        let game = GameClient::open(self.ctx.clone(), self.host, Role::Host, participants.clone()).await?;
        self.channel.broadcast(&Broadcast::Start { participants: participants.clone() })?;
        info!(players = participants.len(), "Game started");

        let store = Arc::clone(&self.ctx.store);
        let host = self.host;
        let delay = self.ctx.config.lobby_teardown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.delete_lobby(host).await {
                Ok(()) => debug!(host = %host.short(), "Lobby torn down"),
                Err(e) => warn!(host = %host.short(), error = %e, "Lobby teardown failed"),
            }
        });

        Ok(game)
    }

    /// Guest: follow the host into the game after [`LobbyEvent::Started`].
    pub async fn join_game(self, participants: Vec<Participant>) -> Result<GameClient, ProtocolError> {
        GameClient::open(self.ctx.clone(), self.host, Role::Guest, participants).await
    }

    /// Leave the lobby. A host leaving closes it.
    pub async fn exit(self) -> Result<(), ProtocolError> {
        let _ = self.channel.untrack();
        if self.role == Role::Host {
            self.ctx.store.delete_lobby(self.host).await?;
            info!(host = %self.host.short(), "Lobby closed");
        }
        Ok(())
    }
}

// =============================================================================
// GAME
// =============================================================================

/// A direct triad or game-over claim from the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Claim the triad in these visible slots.
    Triad(TriadIndices),
    /// Claim that no triad remains.
    GameOver,
}

/// Something that happened in the game.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Replicated state changed.
    StateChanged(Arc<SessionSnapshot>),
    /// Presence changed.
    PresenceChanged(Vec<Participant>),
    /// Host: an intent was applied.
    IntentApplied {
        /// Who sent it.
        sender: ParticipantId,
        /// The game ended with it.
        game_over: bool,
    },
    /// Host: an intent was dropped.
    IntentDropped {
        /// Who sent it.
        sender: ParticipantId,
        /// Why.
        reason: DropReason,
    },
    /// The host ended the session.
    Ended,
}

/// A participant's connection to a running game.
pub struct GameClient {
    ctx: SessionContext,
    host: ParticipantId,
    role: Role,
    participants: Vec<Participant>,
    sub: Subscription,
    channel: Arc<dyn Channel>,
    authority: Option<GameSession>,
    replica: Replica,
    feed: Option<watch::Receiver<Option<GameRecord>>>,
    state_tx: watch::Sender<Option<Arc<SessionSnapshot>>>,
    present: Vec<Participant>,
    closed: bool,
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("host", &self.host)
            .field("role", &self.role)
            .field("closed", &self.closed)
            .finish()
    }
}

impl GameClient {
    async fn open(
        ctx: SessionContext,
        host: ParticipantId,
        role: Role,
        participants: Vec<Participant>,
    ) -> Result<Self, ProtocolError> {
        let sub = ctx.subscribe(&game_topic(host)).await?;
        let channel = sub.channel();
        let (state_tx, _) = watch::channel(None);

        let mut client = Self {
            host,
            role,
            participants,
            channel,
            sub,
            authority: None,
            replica: Replica::new(),
            feed: None,
            state_tx,
            present: Vec::new(),
            closed: false,
            ctx,
        };

        if role == Role::Guest {
            // Change feed first, then pull, so no write falls between the two.
            let feed = client.ctx.store.watch_game(host).await?;
            client.feed = Some(feed);
            if let Some(record) = client.ctx.store.get_game(host).await? {
                client.accept(&record)?;
            }
        }

        client.channel.track(client.ctx.identity.clone())?;
        client.present = client.channel.presence();
        Ok(client)
    }

    /// Reconnect to a running game using the stored record alone.
    pub async fn rejoin(ctx: SessionContext, host: ParticipantId) -> Result<Self, ProtocolError> {
        let record = ctx.store.get_game(host).await?.ok_or(ProtocolError::SessionClosed)?;
        if !record.participants.iter().any(|p| p.uid == ctx.me()) {
            return Err(ProtocolError::SessionClosed);
        }
        info!(host = %host.short(), revision = record.revision, "Rejoining session");
        Self::open(ctx, host, Role::Guest, record.participants).await
    }

    /// Our role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Frozen membership, host first.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Whether the session is over for this client.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Option<Arc<SessionSnapshot>> {
        self.state_tx.borrow().clone()
    }

    /// Watch replicated state. Fires on every change with the full state.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SessionSnapshot>>> {
        self.state_tx.subscribe()
    }

    fn publish(&self, snapshot: SessionSnapshot) -> Arc<SessionSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.state_tx.send_replace(Some(Arc::clone(&snapshot)));
        snapshot
    }

    fn all_present(&self) -> bool {
        self.participants
            .iter()
            .all(|p| self.present.iter().any(|q| q.uid == p.uid))
    }

    /// Host: wait until every participant is present, then deal and commit.
    #[instrument(skip(self), fields(host = %self.host.short()))]
    pub async fn deal_when_present(&mut self) -> Result<(), ProtocolError> {
        if self.role != Role::Host {
            return Err(ProtocolError::NotHost);
        }

        let limit = self.ctx.config.presence_timeout;
        let waited = tokio::time::timeout(limit, async {
            while !self.all_present() {
                match self.sub.recv().await {
                    Some(ChannelEvent::PresenceSync(list)) => self.present = list,
                    Some(ChannelEvent::Broadcast { message, .. }) => {
                        debug!(event = message.name(), "Ignoring broadcast before deal");
                    }
                    None => return Err(ProtocolError::SessionClosed),
                }
            }
            Ok(())
        })
        .await;
        match waited {
            Ok(result) => result?,
            Err(_) => {
                warn!(?limit, present = self.present.len(), expected = self.participants.len(), "Presence timeout");
                return Err(ProtocolError::PresenceTimeout(limit));
            }
        }

        let ids: Vec<[u8; 16]> = self.participants.iter().map(|p| *p.uid.as_bytes()).collect();
        let seed = derive_session_seed(self.host.as_bytes(), &ids, rand::random());
        self.authority = Some(GameSession::deal(self.host, self.participants.clone(), seed));
        info!(players = ids.len(), "Table dealt");
        self.commit().await
    }

    /// Make a claim as the local player.
    ///
    /// The host applies it to the authoritative state and commits. A guest
    /// checks it against its replica first; only a locally valid claim is
    /// sent to the host, and the local board updates speculatively until
    /// the host's next state arrives.
    pub async fn submit_action(&mut self, claim: Claim) -> Result<IntentOutcome, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::SessionClosed);
        }
        let me = self.ctx.me();

        match self.role {
            Role::Host => {
                let session = self.authority.as_mut().ok_or(ProtocolError::NotInitialized)?;
                let action = match claim {
                    Claim::Triad(slots) => session.intent(slots)?,
                    Claim::GameOver => Action::GameOver,
                };
                let outcome = session.apply_intent(me, &action);
                if outcome.is_applied() {
                    self.commit().await?;
                }
                Ok(outcome)
            }
            Role::Guest => {
                let view = self.replica.view().ok_or(ProtocolError::NotInitialized)?;
                let action = match claim {
                    Claim::Triad(slots) => view.intent(slots)?,
                    Claim::GameOver => Action::GameOver,
                };
                let outcome = self.replica.speculate(me, &action);
                if outcome.is_applied() {
                    self.channel.broadcast(&Broadcast::Action { sender: me, action })?;
                    if let Some(snapshot) = self.replica.snapshot() {
                        self.publish(snapshot);
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// Host: persist the authoritative state, then broadcast it.
    ///
    /// The write is retried with backoff. If it keeps failing the session
    /// is closed with [`ProtocolError::StateDesync`].
    #[instrument(skip(self), fields(host = %self.host.short()))]
    async fn commit(&mut self) -> Result<(), ProtocolError> {
        let session = self.authority.as_ref().ok_or(ProtocolError::NotInitialized)?;
        let record = session.to_record();
        let snapshot = session.snapshot(false);

        let attempts = self.ctx.config.store_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.ctx.store.upsert_game(record.clone()).await {
                Ok(()) => break,
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.ctx.config.retry_delay(&mut rand::thread_rng(), attempt);
                    warn!(revision = record.revision, attempt, ?delay, error = %e, "Session health: state write failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(revision = record.revision, error = %e, "Session health: state write failed, session out of sync");
                    self.closed = true;
                    return Err(ProtocolError::StateDesync(e));
                }
            }
        }

        if let Err(e) = self.channel.broadcast(&Broadcast::State(record.clone())) {
            // Stored state is still reachable through the change feed.
            warn!(revision = record.revision, error = %e, "State broadcast failed");
        }
        debug!(revision = record.revision, game_over = record.game_over, "Committed");
        self.publish(snapshot);
        Ok(())
    }

    fn accept(&mut self, record: &GameRecord) -> Result<Option<Arc<SessionSnapshot>>, ProtocolError> {
        if record.host != self.host {
            return Ok(None);
        }
        if !self.replica.accept(record)? {
            return Ok(None);
        }
        Ok(self.replica.snapshot().map(|s| self.publish(s)))
    }

    async fn feed_changed(feed: &mut Option<watch::Receiver<Option<GameRecord>>>) -> Option<Option<GameRecord>> {
        match feed {
            Some(rx) => match rx.changed().await {
                Ok(()) => Some(rx.borrow_and_update().clone()),
                Err(_) => None,
            },
            None => std::future::pending().await,
        }
    }

    /// Wait for the next notable event.
    ///
    /// On the host this is where guest intents are applied, strictly one
    /// at a time. On a guest this is where host state arrives, from either
    /// the live broadcast or the store's change feed.
    pub async fn next_event(&mut self) -> Result<SessionNotice, ProtocolError> {
        loop {
            if self.closed {
                return Err(ProtocolError::SessionClosed);
            }

            tokio::select! {
                event = self.sub.recv() => {
                    let event = event.ok_or(ProtocolError::SessionClosed)?;
                    if let Some(notice) = self.handle_channel(event).await? {
                        return Ok(notice);
                    }
                }
                change = Self::feed_changed(&mut self.feed) => {
                    match change {
                        Some(Some(record)) => {
                            if let Some(snapshot) = self.accept(&record)? {
                                return Ok(SessionNotice::StateChanged(snapshot));
                            }
                        }
                        Some(None) | None => {
                            info!(host = %self.host.short(), "Session record removed by host");
                            self.replica.clear();
                            self.closed = true;
                            self.state_tx.send_replace(None);
                            return Ok(SessionNotice::Ended);
                        }
                    }
                }
            }
        }
    }

    async fn handle_channel(&mut self, event: ChannelEvent) -> Result<Option<SessionNotice>, ProtocolError> {
        match event {
            ChannelEvent::PresenceSync(list) => {
                self.present = list.clone();
                Ok(Some(SessionNotice::PresenceChanged(list)))
            }
            ChannelEvent::Broadcast { from, message } => match (self.role, message) {
                (Role::Host, Broadcast::Action { sender, action }) => {
                    if sender != from {
                        warn!(from = %from.short(), claimed = %sender.short(), "Intent with forged sender");
                        return Ok(Some(SessionNotice::IntentDropped { sender, reason: DropReason::NotParticipant }));
                    }
                    let session = self.authority.as_mut().ok_or(ProtocolError::NotInitialized)?;
                    match session.apply_intent(sender, &action) {
                        IntentOutcome::Applied { game_over } => {
                            self.commit().await?;
                            Ok(Some(SessionNotice::IntentApplied { sender, game_over }))
                        }
                        IntentOutcome::Dropped(reason) => {
                            debug!(sender = %sender.short(), ?reason, "Intent dropped");
                            Ok(Some(SessionNotice::IntentDropped { sender, reason }))
                        }
                    }
                }
                (Role::Guest, Broadcast::State(record)) if from == self.host => {
                    Ok(self.accept(&record)?.map(SessionNotice::StateChanged))
                }
                (_, other) => {
                    debug!(event = other.name(), from = %from.short(), "Ignoring game broadcast");
                    Ok(None)
                }
            },
        }
    }

    /// Leave the game. A host leaving deletes the session record, which ends
    /// the game for everyone.
    pub async fn exit_session(mut self) -> Result<(), ProtocolError> {
        let _ = self.channel.untrack();
        self.closed = true;
        if self.role == Role::Host {
            self.ctx.store.delete_game(self.host).await?;
            info!(host = %self.host.short(), "Session ended by host");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::MemoryHub;
    use crate::network::store::MemoryStore;

    struct World {
        hub: Arc<MemoryHub>,
        store: Arc<MemoryStore>,
    }

    impl World {
        fn new() -> Self {
            Self { hub: Arc::new(MemoryHub::new()), store: Arc::new(MemoryStore::new()) }
        }

        fn ctx(&self, name: &str) -> SessionContext {
            let config = ProtocolConfig {
                join_timeout: Duration::from_millis(200),
                presence_timeout: Duration::from_millis(500),
                lobby_teardown_delay: Duration::from_millis(10),
                store_retry_backoff: Duration::from_millis(1),
                ..ProtocolConfig::default()
            };
            SessionContext::new(
                Participant::new(ParticipantId::new(), name),
                self.hub.clone(),
                self.store.clone(),
                config,
            )
        }
    }

    /// Run the host's event loop until it has decided one join request.
    async fn review(host: &mut LobbyClient) -> Admission {
        loop {
            if let LobbyEvent::JoinReviewed { admission, .. } = host.next_event().await.unwrap() {
                return admission;
            }
        }
    }

    async fn admit(host: &mut LobbyClient, ctx: SessionContext, password: Option<&str>) -> LobbyClient {
        let host_id = host.host();
        let (admission, outcome) = tokio::join!(review(host), LobbyClient::request_join(ctx, host_id, password));
        assert_eq!(admission, Admission::Admitted);
        match outcome.unwrap() {
            JoinOutcome::Admitted(client) => *client,
            other => panic!("not admitted: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_rejected_with_wrong_password() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), Some("pw")).await.unwrap();
        let host_id = host.host();

        let (admission, outcome) = tokio::join!(
            review(&mut host),
            LobbyClient::request_join(world.ctx("guest"), host_id, Some("nope"))
        );
        assert_eq!(admission, Admission::Rejected(RejectReason::WrongPassword));
        assert!(matches!(outcome.unwrap(), JoinOutcome::Rejected(RejectReason::WrongPassword)));
    }

    #[tokio::test]
    async fn test_join_times_out_without_host() {
        let world = World::new();
        let host = LobbyClient::create(world.ctx("host"), None).await.unwrap();

        // Host never processes its events.
        let outcome = LobbyClient::request_join(world.ctx("guest"), host.host(), None).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_join_unknown_lobby() {
        let world = World::new();
        let result = LobbyClient::request_join(world.ctx("guest"), ParticipantId::new(), None).await;
        assert!(matches!(result, Err(ProtocolError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_kick_notifies_target() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let guest_ctx = world.ctx("guest");
        let guest_id = guest_ctx.identity.uid;
        let mut guest = admit(&mut host, guest_ctx.clone(), None).await;

        host.kick(guest_id).await.unwrap();
        loop {
            match guest.next_event().await {
                Err(ProtocolError::Kicked) => break,
                Ok(_) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        // Re-joining is refused.
        let host_id = host.host();
        let (_, outcome) = tokio::join!(review(&mut host), LobbyClient::request_join(guest_ctx, host_id, None));
        assert!(matches!(outcome.unwrap(), JoinOutcome::Rejected(RejectReason::Kicked)));
    }

    #[tokio::test]
    async fn test_kick_survives_store_failure() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let guest_ctx = world.ctx("guest");
        let guest_id = guest_ctx.identity.uid;
        let mut guest = admit(&mut host, guest_ctx, None).await;

        world.store.fail_next_writes(1).await;
        host.kick(guest_id).await.unwrap();
        assert!(host.members_present().iter().all(|m| m.uid != guest_id));
        loop {
            match guest.next_event().await {
                Err(ProtocolError::Kicked) => break,
                Ok(_) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_guest_cannot_use_host_operations() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let mut guest = admit(&mut host, world.ctx("guest"), None).await;

        assert!(matches!(guest.kick(host.host()).await, Err(ProtocolError::NotHost)));
        assert!(matches!(guest.start_game().await, Err(ProtocolError::NotHost)));
    }

    #[tokio::test]
    async fn test_lobby_listing_and_teardown() {
        let world = World::new();
        let ctx = world.ctx("host");
        let host = LobbyClient::create(ctx.clone(), Some("pw")).await.unwrap();

        let listed = LobbyClient::list(&ctx).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].has_password());

        let game = host.start_game().await.unwrap();
        assert_eq!(game.participants().len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(LobbyClient::list(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deal_times_out_when_guest_missing() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let _guest = admit(&mut host, world.ctx("guest"), None).await;
        // Pick up the guest's presence.
        while host.members_present().len() < 2 {
            host.next_event().await.unwrap();
        }

        let mut game = host.start_game().await.unwrap();
        // Guest never follows.
        assert!(matches!(game.deal_when_present().await, Err(ProtocolError::PresenceTimeout(_))));
    }

    #[tokio::test]
    async fn test_start_drops_guest_who_left_after_last_sync() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let stays = world.ctx("stays");
        let stays_id = stays.identity.uid;
        let _stays = admit(&mut host, stays, None).await;
        let leaves = admit(&mut host, world.ctx("leaves"), None).await;
        while host.members_present().len() < 3 {
            host.next_event().await.unwrap();
        }

        // Host does not drain the presence change before starting.
        leaves.exit().await.unwrap();
        let game = host.start_game().await.unwrap();

        let frozen: Vec<ParticipantId> = game.participants().iter().map(|p| p.uid).collect();
        assert_eq!(frozen, vec![game.participants()[0].uid, stays_id]);
    }

    #[tokio::test]
    async fn test_start_includes_guest_not_yet_synced() {
        let world = World::new();
        let mut host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let guest = world.ctx("guest");
        let guest_id = guest.identity.uid;
        let _guest = admit(&mut host, guest, None).await;

        // Presence sync for the guest is still queued.
        let game = host.start_game().await.unwrap();
        assert_eq!(game.participants().len(), 2);
        assert_eq!(game.participants()[1].uid, guest_id);
    }

    #[tokio::test]
    async fn test_commit_retries_then_desyncs() {
        let world = World::new();
        let host = LobbyClient::create(world.ctx("host"), None).await.unwrap();
        let mut game = host.start_game().await.unwrap();

        world.store.fail_next_writes(2).await;
        game.deal_when_present().await.unwrap();
        assert_eq!(game.snapshot().unwrap().revision, 1);

        world.store.fail_next_writes(10).await;
        let triad = game.authority.as_ref().unwrap().table().find_all_triads()[0];
        let result = game.submit_action(Claim::Triad(triad)).await;
        assert!(matches!(result, Err(ProtocolError::StateDesync(_))));
        assert!(game.is_closed());
        assert!(matches!(game.next_event().await, Err(ProtocolError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_subscribe_retries() {
        let world = World::new();
        world.hub.fail_next_subscribes(2);
        assert!(LobbyClient::create(world.ctx("host"), None).await.is_ok());

        world.hub.fail_next_subscribes(5);
        assert!(matches!(
            LobbyClient::create(world.ctx("other"), None).await,
            Err(ProtocolError::Transport(TransportError::SubscribeFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_guest_submit_before_state() {
        let world = World::new();
        let host_ctx = world.ctx("host");
        let host_id = host_ctx.identity.uid;
        let participants = vec![host_ctx.identity.clone()];
        let mut guest = GameClient::open(world.ctx("guest"), host_id, Role::Guest, participants).await.unwrap();
        assert!(matches!(
            guest.submit_action(Claim::Triad([0, 1, 2])).await,
            Err(ProtocolError::NotInitialized)
        ));
    }
}

//! Triad Demo Runner
//!
//! Plays a solo game to completion, then runs a three-player session
//! in-process over the memory hub and store.

use std::sync::Arc;
use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triad::{
    VERSION,
    game::{find_all_triads, SoloConfig, SoloGame},
    network::{
        Claim, GameClient, JoinOutcome, LobbyClient, LobbyEvent, MemoryHub, MemoryStore,
        Participant, ParticipantId, ProtocolConfig, SessionContext, SessionNotice,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Triad v{}", VERSION);

    demo_solo().context("solo demo")?;
    demo_multiplayer().await.context("multiplayer demo")?;
    Ok(())
}

/// Play a solo game, saving and resuming halfway.
fn demo_solo() -> anyhow::Result<()> {
    info!("=== Solo Game ===");
    let config = SoloConfig::from_env();
    let mut game = SoloGame::resume_or_new(&config);

    let mut found = 0;
    while !game.is_over() {
        if found % 4 == 0 {
            let _ = game.hint();
        }
        let Some(triad) = game.table().find_all_triads().first().copied() else {
            bail!("board without a triad before game over");
        };
        game.attempt(triad)?;
        found += 1;

        if found == 5 {
            game.save(&config.save_path)?;
            game = SoloGame::load(&config.save_path)?;
            info!(path = %config.save_path.display(), "Saved and reloaded");
        }
    }

    let summary = game.summary();
    info!(
        triads = found,
        collected = summary.collected,
        hints = summary.hints,
        mistakes = summary.mistakes,
        left_on_table = game.table().visible().len(),
        "Solo game over"
    );
    if let Err(e) = std::fs::remove_file(&config.save_path) {
        warn!(error = %e, "Could not remove save file");
    }
    Ok(())
}

/// Host plus two guests racing for triads.
async fn demo_multiplayer() -> anyhow::Result<()> {
    info!("=== Multiplayer Session ===");
    let hub = Arc::new(MemoryHub::new());
    let store = Arc::new(MemoryStore::new());
    let config = ProtocolConfig::from_env();
    let ctx = |name: &str| {
        SessionContext::new(
            Participant::new(ParticipantId::new(), name),
            hub.clone(),
            store.clone(),
            config.clone(),
        )
    };

    let mut lobby = LobbyClient::create(ctx("host"), Some("triad")).await?;
    let host = lobby.host();

    let guests: Vec<_> = ["alice", "bob"]
        .into_iter()
        .map(|name| tokio::spawn(run_guest(ctx(name), host)))
        .collect();

    while lobby.members_present().len() < 3 {
        lobby.next_event().await?;
    }
    let mut game = lobby.start_game().await?;
    game.deal_when_present().await?;

    let mut applied = 0;
    let mut dropped = 0;
    loop {
        match game.next_event().await? {
            SessionNotice::IntentApplied { game_over, .. } => {
                applied += 1;
                if game_over {
                    break;
                }
            }
            SessionNotice::IntentDropped { .. } => dropped += 1,
            _ => {}
        }
    }

    if let Some(snapshot) = game.snapshot() {
        for p in &snapshot.participants {
            info!(player = %p.name, triads = snapshot.score(p.uid), "Final score");
        }
    }
    info!(applied, dropped, "Host processed intents");
    game.exit_session().await?;

    for guest in guests {
        guest.await??;
    }
    Ok(())
}

/// Join, follow the host into the game, and claim the first triad seen
/// after every state change.
async fn run_guest(ctx: SessionContext, host: ParticipantId) -> anyhow::Result<()> {
    let name = ctx.identity.name.clone();
    let mut lobby = match LobbyClient::request_join(ctx, host, Some("triad")).await? {
        JoinOutcome::Admitted(lobby) => *lobby,
        other => bail!("{name} could not join: {other:?}"),
    };

    let participants = loop {
        if let LobbyEvent::Started(participants) = lobby.next_event().await? {
            break participants;
        }
    };
    let mut game = lobby.join_game(participants).await?;

    if game.snapshot().is_some() {
        claim_first(&mut game).await?;
    }
    loop {
        match game.next_event().await? {
            SessionNotice::StateChanged(snapshot) if snapshot.game_over => break,
            SessionNotice::StateChanged(_) => claim_first(&mut game).await?,
            SessionNotice::Ended => break,
            _ => {}
        }
    }
    info!(player = %name, "Leaving session");
    game.exit_session().await?;
    Ok(())
}

async fn claim_first(game: &mut GameClient) -> anyhow::Result<()> {
    let Some(snapshot) = game.snapshot() else {
        return Ok(());
    };
    if let Some(triad) = find_all_triads(&snapshot.visible).first() {
        game.submit_action(Claim::Triad(*triad)).await?;
    }
    Ok(())
}

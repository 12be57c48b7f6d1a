//! TCP connection layer: accept loop, handshake, per-connection reader
//! and writer tasks.
//!
//! Inbound traffic is newline-delimited lines read by one task per
//! connection; outbound traffic is length-prefixed frames written by one
//! task per connection, so writes to a socket never interleave. Reader
//! errors and EOF surface as `ParticipantClosed`.

use log::{debug, info, warn};
use shared::{
    write_frame, Handshake, Mode, Player, PokemonInstance, RoamCommand, SETTLE_DELAY,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::sleep;

use crate::battle::BattleSeat;
use crate::catalog::SpeciesCatalog;
use crate::dispatcher::{broadcast, unicast, ConnId, Event};
use crate::store::PlayerStore;
use crate::world::{MoveOutcome, World};

type ConnResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handles shared by every connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub events: mpsc::UnboundedSender<Event>,
    pub seats: mpsc::UnboundedSender<BattleSeat>,
    pub world: Arc<Mutex<World>>,
    pub store: Arc<PlayerStore>,
    pub catalog: Arc<SpeciesCatalog>,
}

/// Accept loop. Failure here is the one unrecoverable server error; every
/// per-connection failure is contained in its own task.
pub async fn serve(listener: TcpListener, ctx: ServerContext) -> std::io::Result<()> {
    let mut next_conn: ConnId = 1;
    loop {
        let (stream, addr) = listener.accept().await?;
        let conn = next_conn;
        next_conn += 1;
        info!("connection {} accepted from {}", conn, addr);

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(conn, write_half, outbound_rx));
        let _ = ctx.events.send(Event::NewConnection {
            conn,
            outbound: outbound_tx,
        });

        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(conn, read_half, &ctx).await {
                debug!("connection {} ended: {}", conn, e);
            }
            let _ = ctx.events.send(Event::ParticipantClosed { conn });
        });
    }
}

/// Drains the outbound queue into length-prefixed frames. Ends when the
/// dispatcher drops the sender or the peer goes away.
async fn write_loop(
    conn: ConnId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload).await {
            debug!("write to connection {} failed: {}", conn, e);
            break;
        }
    }
}

async fn handle_connection(conn: ConnId, read_half: OwnedReadHalf, ctx: &ServerContext) -> ConnResult {
    let mut lines = BufReader::new(read_half).lines();

    // Handshake loop: a malformed line closes the connection, a name
    // conflict re-prompts.
    let handshake = loop {
        let line = lines
            .next_line()
            .await?
            .ok_or("connection closed during handshake")?;
        let handshake = match Handshake::parse(&line) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("connection {}: bad handshake {:?}: {}", conn, line, e);
                return Err(e.into());
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        ctx.events.send(Event::Register {
            conn,
            name: handshake.name.clone(),
            mode: handshake.mode,
            reply: reply_tx,
        })?;
        match reply_rx.await {
            Ok(true) => break handshake,
            Ok(false) => unicast(
                &ctx.events,
                conn,
                format!(
                    "The name {} is already in use. Enter \"<name> <mode>\" again.",
                    handshake.name
                ),
            ),
            Err(_) => return Err("dispatcher unavailable".into()),
        }
    };

    match handshake.mode {
        Mode::Roam => roam_loop(conn, &handshake.name, &mut lines, ctx).await,
        Mode::Battle => battle_loop(conn, &handshake.name, &mut lines, ctx).await,
    }
}

/// Broadcasts a fresh world snapshot to every roam participant.
async fn broadcast_snapshot(ctx: &ServerContext) {
    let snapshot = ctx.world.lock().await.render();
    broadcast(&ctx.events, snapshot, Some(Mode::Roam));
}

async fn roam_loop(
    conn: ConnId,
    name: &str,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    ctx: &ServerContext,
) -> ConnResult {
    let record = ctx.store.find(name).unwrap_or_else(|| Player::new(name));
    {
        let mut world = ctx.world.lock().await;
        if world.add_player(name, record.roster, 0, 0).is_none() {
            unicast(&ctx.events, conn, "The world is full, try again later.");
            return Err("no free cell for new player".into());
        }
    }
    unicast(
        &ctx.events,
        conn,
        "Welcome! Commands: up / down / left / right / leave.",
    );
    broadcast_snapshot(ctx).await;

    while let Some(line) = lines.next_line().await? {
        let command = match RoamCommand::parse(&line) {
            Some(command) => command,
            None => {
                debug!("connection {}: ignoring roam input {:?}", conn, line.trim());
                continue;
            }
        };
        let direction = match command {
            RoamCommand::Leave => break,
            RoamCommand::Move(direction) => direction,
        };

        let (dx, dy) = direction.delta();
        let outcome = ctx.world.lock().await.move_player(name, dx, dy);
        match outcome {
            MoveOutcome::Moved(_) => {}
            MoveOutcome::BlockedByPlayer(_) => {
                unicast(
                    &ctx.events,
                    conn,
                    "There's another player at that position, you can't move there.",
                );
                sleep(SETTLE_DELAY).await;
            }
            MoveOutcome::Captured { pokemon, .. } => {
                unicast(&ctx.events, conn, format!("You captured {}!", pokemon));
                let record = ctx.world.lock().await.player(name).cloned();
                if let Some(record) = record {
                    ctx.store.upsert(&record);
                }
                sleep(SETTLE_DELAY).await;
            }
            MoveOutcome::RosterFull { pokemon, .. } => {
                unicast(
                    &ctx.events,
                    conn,
                    format!(
                        "Your roster is full, you can't capture {}.",
                        pokemon
                    ),
                );
                sleep(SETTLE_DELAY).await;
            }
            MoveOutcome::UnknownPlayer => break,
        }
        broadcast_snapshot(ctx).await;
    }
    Ok(())
}

/// Seats the player with the matchmaker, then forwards every numeric line
/// into the battle session's choice channel. Dropping the sender (EOF or
/// read error) is what the session observes as a forfeit.
async fn battle_loop(
    conn: ConnId,
    name: &str,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    ctx: &ServerContext,
) -> ConnResult {
    let player = match ctx.store.find(name) {
        Some(player) => player,
        None => {
            unicast(
                &ctx.events,
                conn,
                "Player does not exist. Created a new player with starter pokemon.",
            );
            let mut player = Player::new(name);
            for species in ctx.catalog.starters() {
                player.roster.push(PokemonInstance::from_species(species));
            }
            ctx.store.upsert(&player);
            player
        }
    };
    if player.roster.is_empty() {
        unicast(&ctx.events, conn, "You have no pokemon to battle with.");
        return Err("empty roster on battle entry".into());
    }

    let (choice_tx, choice_rx) = mpsc::unbounded_channel();
    ctx.seats.send(BattleSeat {
        conn,
        player,
        choices: choice_rx,
    })?;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.parse::<i32>() {
            Ok(choice) => {
                // Session over; nothing left to route.
                if choice_tx.send(choice).is_err() {
                    break;
                }
            }
            Err(_) => debug!(
                "connection {}: ignoring non-numeric battle input {:?}",
                conn, trimmed
            ),
        }
    }
    Ok(())
}

//! The event dispatcher: a single task that owns the connection map and
//! the participant registry.
//!
//! Every registry-affecting event flows through one queue and is fully
//! applied before the next is read, which gives linearizable updates to
//! participant/connection state without per-field locking. Nothing else
//! in the server mutates these collections.

use log::{debug, info, warn};
use shared::Mode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::world::World;

/// Server-assigned connection identifier.
pub type ConnId = u64;

#[derive(Debug)]
pub enum Event {
    /// A socket was accepted; `outbound` feeds its writer task.
    NewConnection {
        conn: ConnId,
        outbound: mpsc::UnboundedSender<String>,
    },
    /// Handshake completed; claim the name or reject on conflict.
    Register {
        conn: ConnId,
        name: String,
        mode: Mode,
        reply: oneshot::Sender<bool>,
    },
    /// Deliver a payload to one connection.
    Unicast { conn: ConnId, payload: String },
    /// Deliver a payload to every registered participant, optionally
    /// filtered by mode (world snapshots go only to roam participants).
    Broadcast {
        payload: String,
        mode: Option<Mode>,
    },
    /// A session ended; tear down its registry and world state.
    ParticipantClosed { conn: ConnId },
}

/// A session binding a player name to a live connection and a mode. The
/// mode is fixed for the participant's lifetime.
#[derive(Debug, Clone)]
pub struct Participant {
    pub name: String,
    pub mode: Mode,
    pub conn: ConnId,
}

/// Queues a payload for one connection. Send failures mean the dispatcher
/// is gone and the server is shutting down; they are ignored.
pub fn unicast(events: &mpsc::UnboundedSender<Event>, conn: ConnId, payload: impl Into<String>) {
    let _ = events.send(Event::Unicast {
        conn,
        payload: payload.into(),
    });
}

/// Queues a payload for every participant in the given mode (or all).
pub fn broadcast(
    events: &mpsc::UnboundedSender<Event>,
    payload: impl Into<String>,
    mode: Option<Mode>,
) {
    let _ = events.send(Event::Broadcast {
        payload: payload.into(),
        mode,
    });
}

pub struct Dispatcher {
    conns: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    participants: HashMap<ConnId, Participant>,
    world: Arc<Mutex<World>>,
}

impl Dispatcher {
    pub fn new(world: Arc<Mutex<World>>) -> Self {
        Self {
            conns: HashMap::new(),
            participants: HashMap::new(),
            world,
        }
    }

    /// Consumes events strictly in arrival order until every sender is
    /// dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        info!("event channel closed, dispatcher stopping");
    }

    /// Applies one event to completion.
    pub async fn apply(&mut self, event: Event) {
        match event {
            Event::NewConnection { conn, outbound } => {
                debug!("connection {} registered", conn);
                self.conns.insert(conn, outbound);
            }
            Event::Register {
                conn,
                name,
                mode,
                reply,
            } => {
                let taken = self
                    .participants
                    .values()
                    .any(|p| p.name.eq_ignore_ascii_case(&name));
                if taken {
                    warn!("connection {} tried to claim active name {}", conn, name);
                    let _ = reply.send(false);
                } else {
                    info!(
                        "{} joined on connection {} ({:?} mode), {} participants active",
                        name,
                        conn,
                        mode,
                        self.participants.len() + 1
                    );
                    self.participants
                        .insert(conn, Participant { name, mode, conn });
                    let _ = reply.send(true);
                }
            }
            Event::Unicast { conn, payload } => {
                match self.conns.get(&conn) {
                    Some(tx) => {
                        let _ = tx.send(payload);
                    }
                    None => debug!("unicast to unknown connection {}", conn),
                }
            }
            Event::Broadcast { payload, mode } => {
                for participant in self.participants.values() {
                    if let Some(wanted) = mode {
                        if participant.mode != wanted {
                            continue;
                        }
                    }
                    if let Some(tx) = self.conns.get(&participant.conn) {
                        let _ = tx.send(payload.clone());
                    }
                }
            }
            Event::ParticipantClosed { conn } => {
                // Dropping the sender ends the writer task, closing the
                // socket's write half.
                self.conns.remove(&conn);
                if let Some(participant) = self.participants.remove(&conn) {
                    info!("{} exited", participant.name);
                    if participant.mode == Mode::Roam {
                        self.world.lock().await.remove_player(&participant.name);
                    }
                }
            }
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

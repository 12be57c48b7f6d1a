//! Turn-based combat: SelectStarter -> RoundExchange -> (SwitchOnFaint |
//! BattleEnd).
//!
//! The round mechanics are pure functions over two [`BattleSide`]s and a
//! caller-supplied rng, so tests drive them with a seeded generator. The
//! async session wrapper owns its two participants' choice channels
//! exclusively; independent sessions run concurrently without sharing any
//! state beyond the dispatcher queue and the player store.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Player, PokemonInstance, BATTLE_TURNS, CHOICE_DEADLINE, STARTER_SLOTS};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::dispatcher::{unicast, ConnId, Event};
use crate::store::PlayerStore;

/// Attack category, drawn uniformly at random for every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    Normal,
    Special,
}

/// Damage dealt by one attack. Clamped at zero, never negative.
pub fn damage(attacker: &PokemonInstance, defender: &PokemonInstance, kind: AttackKind) -> i32 {
    match kind {
        AttackKind::Normal => (attacker.attack - defender.defense).max(0),
        AttackKind::Special => {
            ((attacker.sp_attack as f64 * 1.75).round() as i32 - defender.sp_defense).max(0)
        }
    }
}

/// Outcome of applying a 1-based roster choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Selected,
    NotDeployable,
    OutOfRange,
    Surrender,
}

/// One participant's battle state: roster, remaining faint budget, and the
/// currently-deployed roster slot.
#[derive(Debug)]
pub struct BattleSide {
    pub name: String,
    pub roster: Vec<PokemonInstance>,
    pub turns: u32,
    pub active: usize,
}

impl BattleSide {
    /// Enters battle with a player's roster. Every entry is re-marked
    /// deployable on entry.
    pub fn new(player: Player) -> Self {
        let mut roster = player.roster;
        for entry in &mut roster {
            entry.deployable = true;
        }
        Self {
            name: player.name,
            roster,
            turns: BATTLE_TURNS,
            active: 0,
        }
    }

    pub fn active(&self) -> &PokemonInstance {
        &self.roster[self.active]
    }

    pub fn active_mut(&mut self) -> &mut PokemonInstance {
        &mut self.roster[self.active]
    }

    /// Applies a 1-based roster index, or `-1` for surrender.
    pub fn choose(&mut self, index: i32) -> Choice {
        if index == -1 {
            return Choice::Surrender;
        }
        if index < 1 || index as usize > self.roster.len() {
            return Choice::OutOfRange;
        }
        let slot = index as usize - 1;
        if !self.roster[slot].deployable {
            return Choice::NotDeployable;
        }
        self.active = slot;
        Choice::Selected
    }

    /// Total remaining experience pool across the roster.
    pub fn total_exp(&self) -> i32 {
        self.roster.iter().map(|p| p.exp).sum()
    }

    /// 1-based roster listing for a selection prompt.
    pub fn roster_listing(&self) -> String {
        self.roster
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {} (HP {})\n", i + 1, p.name, p.hp))
            .collect()
    }
}

// A pairing where neither side can deal damage would exchange forever;
// cap the swing count and fault the standing defender.
const MAX_EXCHANGES: usize = 1000;

/// Runs one round: exchanges alternate between the sides until a
/// deployed creature faints. The faster creature attacks first (speed tie
/// broken by coin flip) and roles swap after every exchange.
///
/// On faint the defender's turn counter decrements, the fainted roster
/// entry is pinned to 0 HP and marked non-deployable. Returns whether the
/// first side won, plus the report lines.
pub fn run_round(
    first: &mut BattleSide,
    second: &mut BattleSide,
    rng: &mut impl Rng,
) -> (bool, Vec<String>) {
    let mut log = vec!["------------BATTLE REPORT------------".to_string()];

    let mut first_attacking = match first.active().speed.cmp(&second.active().speed) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => rng.gen_bool(0.5),
    };

    for _ in 0..MAX_EXCHANGES {
        let (attacker, defender) = if first_attacking {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let kind = if rng.gen_bool(0.5) {
            AttackKind::Normal
        } else {
            AttackKind::Special
        };
        let dmg = damage(attacker.active(), defender.active(), kind);
        defender.active_mut().hp -= dmg;
        log.push(format!(
            "{} attacked {} with a {} attack dealing {} damage.",
            attacker.active().name,
            defender.active().name,
            match kind {
                AttackKind::Normal => "normal",
                AttackKind::Special => "special",
            },
            dmg
        ));

        if defender.active().hp <= 0 {
            faint_active(defender, &mut log);
            return (first_attacking, log);
        }
        first_attacking = !first_attacking;
    }

    warn!(
        "exchange cap reached between {} and {}",
        first.name, second.name
    );
    let defender = if first_attacking { second } else { first };
    faint_active(defender, &mut log);
    (first_attacking, log)
}

fn faint_active(side: &mut BattleSide, log: &mut Vec<String>) {
    side.turns -= 1;
    let entry = side.active_mut();
    entry.hp = 0;
    entry.deployable = false;
    log.push(format!("{} fainted.", entry.name));
}

/// Splits the loser's total remaining experience pool evenly (integer
/// division) across the winner's first three roster slots, as an additive
/// accumulator. Returns the per-slot share.
pub fn award_experience(winner: &mut BattleSide, loser: &BattleSide) -> i32 {
    let share = loser.total_exp() / STARTER_SLOTS as i32;
    for entry in winner.roster.iter_mut().take(STARTER_SLOTS) {
        entry.accum_exp += share;
    }
    share
}

/// A battle-ready participant handed from the connection layer to the
/// matchmaker. The session becomes the sole consumer of `choices`.
#[derive(Debug)]
pub struct BattleSeat {
    pub conn: ConnId,
    pub player: Player,
    pub choices: mpsc::UnboundedReceiver<i32>,
}

/// Pairs battle-mode participants first-come-first-served. Each pair runs
/// as an independent concurrent session.
pub async fn run_matchmaker(
    mut seats: mpsc::UnboundedReceiver<BattleSeat>,
    events: mpsc::UnboundedSender<Event>,
    store: Arc<PlayerStore>,
) {
    let mut waiting: Option<BattleSeat> = None;
    while let Some(seat) = seats.recv().await {
        match waiting.take() {
            None => {
                unicast(&events, seat.conn, "Waiting for an opponent...");
                waiting = Some(seat);
            }
            Some(first) => {
                info!("pairing battle: {} vs {}", first.player.name, seat.player.name);
                tokio::spawn(run_session(first, seat, events.clone(), store.clone()));
            }
        }
    }
}

/// How a selection prompt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Picked,
    Surrendered,
    Gone,
}

/// Prompts one side for a roster choice and applies it. Non-deployable or
/// out-of-range picks re-prompt; a closed channel or an expired deadline
/// counts as a forfeit.
async fn select_pokemon(
    side: &mut BattleSide,
    conn: ConnId,
    choices: &mut mpsc::UnboundedReceiver<i32>,
    events: &mpsc::UnboundedSender<Event>,
    header: &str,
) -> Selection {
    unicast(
        events,
        conn,
        format!(
            "{}\n{}Your choice (-1 to surrender): ",
            header,
            side.roster_listing()
        ),
    );
    loop {
        let choice = match timeout(CHOICE_DEADLINE, choices.recv()).await {
            Err(_) => {
                warn!("{} missed the choice deadline", side.name);
                return Selection::Gone;
            }
            Ok(None) => return Selection::Gone,
            Ok(Some(choice)) => choice,
        };
        match side.choose(choice) {
            Choice::Selected => {
                unicast(events, conn, format!("You sent out {}.", side.active().name));
                return Selection::Picked;
            }
            Choice::Surrender => return Selection::Surrendered,
            Choice::NotDeployable => unicast(
                events,
                conn,
                "This pokemon lost the ability to fight. Please choose another one.",
            ),
            Choice::OutOfRange => unicast(events, conn, "No such roster slot, pick again."),
        }
    }
}

/// Delivers a payload to both participants of one session. Reports stay
/// private to the pair; other concurrent battles never see them.
fn announce(events: &mpsc::UnboundedSender<Event>, conn1: ConnId, conn2: ConnId, payload: &str) {
    unicast(events, conn1, payload);
    unicast(events, conn2, payload);
}

/// Runs one battle to completion and tears both sessions down.
pub async fn run_session(
    seat1: BattleSeat,
    seat2: BattleSeat,
    events: mpsc::UnboundedSender<Event>,
    store: Arc<PlayerStore>,
) {
    let BattleSeat {
        conn: conn1,
        player: player1,
        choices: mut choices1,
    } = seat1;
    let BattleSeat {
        conn: conn2,
        player: player2,
        choices: mut choices2,
    } = seat2;
    let mut side1 = BattleSide::new(player1);
    let mut side2 = BattleSide::new(player2);

    let opener = format!("A battle is starting: {} vs {}!", side1.name, side2.name);
    unicast(&events, conn1, opener.clone());
    unicast(&events, conn2, opener);

    let (picked1, picked2) = tokio::join!(
        select_pokemon(&mut side1, conn1, &mut choices1, &events, "Choose a pokemon:"),
        select_pokemon(&mut side2, conn2, &mut choices2, &events, "Choose a pokemon:"),
    );

    match (picked1, picked2) {
        (Selection::Picked, Selection::Picked) => {}
        (Selection::Picked, _) => {
            finish(&mut side1, &side2, conn1, conn2, &events, &store, "withdrew").await;
            return;
        }
        (_, Selection::Picked) => {
            finish(&mut side2, &side1, conn2, conn1, &events, &store, "withdrew").await;
            return;
        }
        _ => {
            info!("battle abandoned before the first round");
            let _ = events.send(Event::ParticipantClosed { conn: conn1 });
            let _ = events.send(Event::ParticipantClosed { conn: conn2 });
            return;
        }
    }

    let mut rng = StdRng::from_entropy();
    loop {
        let mut report = vec![format!(
            "---{} chose {}, {} chose {}",
            side1.name,
            side1.active().name,
            side2.name,
            side2.active().name
        )];
        let (side1_won, round_log) = run_round(&mut side1, &mut side2, &mut rng);
        report.extend(round_log);
        report.push(format!("{} has {} turns left.", side1.name, side1.turns));
        report.push(format!("{} has {} turns left.", side2.name, side2.turns));
        report.push("------END BATTLE REPORT-----".to_string());
        announce(&events, conn1, conn2, &report.join("\n"));

        let (winner, loser, w_conn, l_conn, l_choices) = if side1_won {
            (&mut side1, &mut side2, conn1, conn2, &mut choices2)
        } else {
            (&mut side2, &mut side1, conn2, conn1, &mut choices1)
        };
        announce(
            &events,
            conn1,
            conn2,
            &format!("{} wins the round - {} lost", winner.name, loser.name),
        );

        if loser.turns == 0 {
            finish(winner, loser, w_conn, l_conn, &events, &store, "has no turns left").await;
            return;
        }

        let picked = select_pokemon(
            loser,
            l_conn,
            l_choices,
            &events,
            "You lost the round, choose another pokemon:",
        )
        .await;
        match picked {
            Selection::Picked => {}
            Selection::Surrendered => {
                finish(winner, loser, w_conn, l_conn, &events, &store, "surrendered").await;
                return;
            }
            Selection::Gone => {
                finish(winner, loser, w_conn, l_conn, &events, &store, "disconnected").await;
                return;
            }
        }
    }
}

/// Ends the battle: distributes the loser's experience pool, persists the
/// winner, announces the result, and closes both sessions.
async fn finish(
    winner: &mut BattleSide,
    loser: &BattleSide,
    winner_conn: ConnId,
    loser_conn: ConnId,
    events: &mpsc::UnboundedSender<Event>,
    store: &PlayerStore,
    reason: &str,
) {
    let share = award_experience(winner, loser);
    store.upsert(&Player {
        name: winner.name.clone(),
        roster: winner.roster.clone(),
        pos: None,
        avatar: String::new(),
    });

    announce(
        events,
        winner_conn,
        loser_conn,
        &format!(
            "BATTLE END!!! {} {}. {} wins the battle and gains {} exp per starter slot!",
            loser.name, reason, winner.name, share
        ),
    );
    info!(
        "battle over: {} beat {} ({})",
        winner.name, loser.name, reason
    );
    let _ = events.send(Event::ParticipantClosed { conn: winner_conn });
    let _ = events.send(Event::ParticipantClosed { conn: loser_conn });
}

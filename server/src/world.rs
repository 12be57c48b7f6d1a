//! The shared toroidal grid world for roam mode.
//!
//! The world is guarded by one exclusive lock (an `Arc<tokio::sync::Mutex>`
//! held by every caller); cell-level locking is insufficient because a
//! capture or move touches two cells atomically. Grid cells are a tagged
//! variant over arenas that own the actual records, so a creature is owned
//! by either the wild set or a roster, never both.

use log::{debug, info};
use rand::Rng;
use shared::{
    PokemonInstance, Player, Position, Species, DESPAWN_AFTER, DESPAWN_GRACE, EMPTY_GLYPH,
    MAX_ROSTER, POKEMON_PER_WAVE,
};
use std::collections::HashMap;
use std::time::Instant;

/// Avatars handed out to roaming players, cycled in join order.
const PLAYER_AVATARS: [&str; 6] = [
    "\u{1f3c3}",
    "\u{1f64e}",
    "\u{1f9db}",
    "\u{1f977}",
    "\u{1f468}",
    "\u{1f6b6}",
];

/// One grid cell. Holds at most one occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Empty,
    PlayerRef(String),
    PokemonRef(u64),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// Result of a movement attempt. Blocked and roster-full moves leave the
/// mover at its old cell and cause no other state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(Position),
    BlockedByPlayer(Position),
    Captured { pokemon: String, pos: Position },
    RosterFull { pokemon: String, pos: Position },
    UnknownPlayer,
}

pub struct World {
    size: usize,
    grid: Vec<Cell>,
    players: HashMap<String, Player>,
    wild: HashMap<u64, PokemonInstance>,
    next_wild_id: u64,
    avatar_cursor: usize,
}

impl World {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            grid: vec![Cell::Empty; size * size],
            players: HashMap::new(),
            wild: HashMap::new(),
            next_wild_id: 1,
            avatar_cursor: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cell(&self, pos: Position) -> &Cell {
        &self.grid[pos.x * self.size + pos.y]
    }

    fn set_cell(&mut self, pos: Position, cell: Cell) {
        self.grid[pos.x * self.size + pos.y] = cell;
    }

    /// Resolves a free cell by the diagonal linear probe
    /// `(x, y) -> (x+1 mod N, y+1 mod N)`, falling back to a full scan if
    /// the probed diagonal is saturated. `None` means the grid is full.
    fn probe_free(&self, start: Position) -> Option<Position> {
        let mut pos = start;
        for _ in 0..self.size {
            if self.cell(pos).is_empty() {
                return Some(pos);
            }
            pos = pos.step(1, 1, self.size);
        }
        self.grid.iter().position(Cell::is_empty).map(|i| Position {
            x: i / self.size,
            y: i % self.size,
        })
    }

    /// Registers a player at the first free cell probed from `(x, y)`,
    /// with the roster previously loaded from the player store. Returns
    /// `None` only when the grid has no free cell.
    pub fn add_player(
        &mut self,
        name: &str,
        roster: Vec<PokemonInstance>,
        x: usize,
        y: usize,
    ) -> Option<&Player> {
        let pos = self.probe_free(Position::wrapped(x as i64, y as i64, self.size))?;
        let avatar = PLAYER_AVATARS[self.avatar_cursor % PLAYER_AVATARS.len()];
        self.avatar_cursor += 1;

        let player = Player {
            name: name.to_string(),
            roster,
            pos: Some(pos),
            avatar: avatar.to_string(),
        };
        info!("{} joined the world at ({}, {})", name, pos.x, pos.y);
        self.set_cell(pos, Cell::PlayerRef(name.to_string()));
        self.players.insert(name.to_string(), player);
        self.players.get(name)
    }

    /// Removes a player and clears its grid cell. Used when a roam
    /// participant leaves or disconnects.
    pub fn remove_player(&mut self, name: &str) -> bool {
        match self.players.remove(name) {
            Some(player) => {
                if let Some(pos) = player.pos {
                    if *self.cell(pos) == Cell::PlayerRef(name.to_string()) {
                        self.set_cell(pos, Cell::Empty);
                    }
                }
                info!("{} left the world", name);
                true
            }
            None => false,
        }
    }

    /// Moves a player by `(dx, dy)` with wraparound.
    ///
    /// A destination held by another player rejects the move. A wild
    /// occupant is captured if the roster has room (ownership transfer out
    /// of the wild set, never a re-clone); a full roster rejects the move
    /// and leaves the wild instance in place.
    pub fn move_player(&mut self, name: &str, dx: i64, dy: i64) -> MoveOutcome {
        let (old, roster_len) = match self.players.get(name) {
            Some(player) => match player.pos {
                Some(pos) => (pos, player.roster.len()),
                None => return MoveOutcome::UnknownPlayer,
            },
            None => return MoveOutcome::UnknownPlayer,
        };
        let dest = old.step(dx, dy, self.size);

        match self.cell(dest).clone() {
            Cell::PlayerRef(_) => MoveOutcome::BlockedByPlayer(old),
            Cell::PokemonRef(id) => {
                if roster_len >= MAX_ROSTER {
                    let pokemon = self
                        .wild
                        .get(&id)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    return MoveOutcome::RosterFull { pokemon, pos: old };
                }
                // Ownership transfer: out of the wild set, into the roster.
                let mut instance = match self.wild.remove(&id) {
                    Some(instance) => instance,
                    None => return MoveOutcome::UnknownPlayer,
                };
                instance.pos = None;
                instance.spawned_at = None;
                let pokemon = instance.name.clone();

                self.set_cell(old, Cell::Empty);
                self.set_cell(dest, Cell::PlayerRef(name.to_string()));
                let player = self.players.get_mut(name).expect("checked above");
                player.pos = Some(dest);
                player.roster.push(instance);
                info!("{} captured {} at ({}, {})", name, pokemon, dest.x, dest.y);
                MoveOutcome::Captured { pokemon, pos: dest }
            }
            Cell::Empty => {
                self.set_cell(old, Cell::Empty);
                self.set_cell(dest, Cell::PlayerRef(name.to_string()));
                self.players.get_mut(name).expect("checked above").pos = Some(dest);
                MoveOutcome::Moved(dest)
            }
        }
    }

    /// Places one wild instance, probing from the requested cell. The
    /// caller must have stamped position-independent state; this assigns
    /// the cell and arena id.
    pub fn place_wild(&mut self, mut instance: PokemonInstance, at: Position) -> Option<u64> {
        let pos = self.probe_free(at)?;
        let id = self.next_wild_id;
        self.next_wild_id += 1;
        instance.pos = Some(pos);
        self.set_cell(pos, Cell::PokemonRef(id));
        self.wild.insert(id, instance);
        Some(id)
    }

    /// Spawns one wave of wild creatures cloned from uniformly-random
    /// species, each with a fresh EV multiplier in [0.5, 1.0] rounded to
    /// two decimals. Returns how many were placed.
    pub fn spawn_wave(&mut self, species: &[Species], rng: &mut impl Rng) -> usize {
        if species.is_empty() {
            return 0;
        }
        let mut spawned = 0;
        for _ in 0..POKEMON_PER_WAVE {
            let template = &species[rng.gen_range(0..species.len())];
            let mut instance = PokemonInstance::from_species(template);
            instance.ev_points = ((0.5 + rng.gen::<f64>() / 2.0) * 100.0).round() / 100.0;
            instance.spawned_at = Some(Instant::now());

            let at = Position {
                x: rng.gen_range(0..self.size),
                y: rng.gen_range(0..self.size),
            };
            match self.place_wild(instance, at) {
                Some(_) => spawned += 1,
                None => break,
            }
        }
        debug!("spawn wave placed {} wild pokemon", spawned);
        spawned
    }

    /// Removes every wild instance whose age has reached the despawn
    /// threshold minus the grace window. Returns how many were removed.
    pub fn despawn_expired(&mut self, now: Instant) -> usize {
        let cutoff = DESPAWN_AFTER - DESPAWN_GRACE;
        let expired: Vec<u64> = self
            .wild
            .iter()
            .filter(|(_, p)| {
                p.spawned_at
                    .map(|t| now.duration_since(t) >= cutoff)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(instance) = self.wild.remove(id) {
                if let Some(pos) = instance.pos {
                    if *self.cell(pos) == Cell::PokemonRef(*id) {
                        self.set_cell(pos, Cell::Empty);
                    }
                }
                debug!("{} despawned", instance.name);
            }
        }
        expired.len()
    }

    /// Text snapshot of the grid, one glyph per cell, one row per line.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.size * self.size * 4);
        for x in 0..self.size {
            for y in 0..self.size {
                match self.cell(Position { x, y }) {
                    Cell::Empty => out.push_str(EMPTY_GLYPH),
                    Cell::PlayerRef(name) => match self.players.get(name) {
                        Some(player) => out.push_str(&player.avatar),
                        None => out.push_str(EMPTY_GLYPH),
                    },
                    Cell::PokemonRef(id) => match self.wild.get(id) {
                        Some(instance) => out.push_str(&instance.glyph),
                        None => out.push_str(EMPTY_GLYPH),
                    },
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(name)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn wild_count(&self) -> usize {
        self.wild.len()
    }

    /// Number of non-empty grid cells. Always equals
    /// `player_count() + wild_count()`.
    pub fn occupant_count(&self) -> usize {
        self.grid.iter().filter(|c| !c.is_empty()).count()
    }
}

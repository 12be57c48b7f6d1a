//! Durable player roster storage.
//!
//! The store is a single pretty-printed JSON file with full-file
//! read/replace semantics, keyed by player name. A mutex serializes every
//! read-modify-write so concurrent sessions cannot interleave upserts.
//! Persistence failures are logged and the caller proceeds best-effort;
//! they are never fatal to a session.

use log::{error, info, warn};
use shared::Player;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct PlayerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PlayerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every player record. A missing file reads as an empty roster
    /// list; a malformed file is logged and treated the same.
    pub fn load(&self) -> Vec<Player> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_all()
    }

    /// Replaces the whole store file with the given records.
    pub fn save(&self, players: &[Player]) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_all(players)
    }

    /// Case-insensitive lookup of a single player record.
    pub fn find(&self, name: &str) -> Option<Player> {
        self.load()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Inserts or replaces one player record. Errors are logged; the
    /// in-memory game state stays authoritative either way.
    pub fn upsert(&self, player: &Player) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut players = self.read_all();
        match players
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&player.name))
        {
            Some(existing) => *existing = player.clone(),
            None => players.push(player.clone()),
        }
        if let Err(e) = self.write_all(&players) {
            error!("failed to persist player {}: {}", player.name, e);
        } else {
            info!("Player {} saved", player.name);
        }
    }

    fn read_all(&self) -> Vec<Player> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("failed to read player store {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&data) {
            Ok(players) => players,
            Err(e) => {
                warn!(
                    "player store {} is malformed, starting empty: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    fn write_all(&self, players: &[Player]) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(players)?;
        std::fs::write(&self.path, json)
    }
}

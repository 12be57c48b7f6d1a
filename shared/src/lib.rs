//! Data model and wire protocol shared by the game server, the probe
//! client, and the integration tests.
//!
//! Clients talk to the server in newline-delimited UTF-8 lines; the server
//! answers with length-prefixed frames (4-byte big-endian length, then the
//! payload) so payload text never needs in-band escaping.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Side length of the toroidal world grid.
pub const WORLD_SIZE: usize = 25;
/// Interval between wild spawn waves.
pub const SPAWN_INTERVAL: Duration = Duration::from_secs(5);
/// Wild instances placed per spawn wave.
pub const POKEMON_PER_WAVE: usize = 10;
/// Age at which a wild instance is eligible for despawn, before grace.
pub const DESPAWN_AFTER: Duration = Duration::from_secs(10);
/// Grace window subtracted from the despawn threshold.
pub const DESPAWN_GRACE: Duration = Duration::from_secs(2);
/// Maximum roster size per player.
pub const MAX_ROSTER: usize = 10;
/// Faint budget per battle participant.
pub const BATTLE_TURNS: u32 = 3;
/// Roster slots that share a defeated opponent's experience pool.
pub const STARTER_SLOTS: usize = 3;
/// Pause after a capture or rejected-move notice before the next command.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Deadline for a battle participant's next roster choice.
pub const CHOICE_DEADLINE: Duration = Duration::from_secs(60);
/// Species granted to a player created on first battle entry.
pub const STARTER_NAMES: [&str; 3] = ["Charmander", "Bulbasaur", "Squirtle"];
/// Glyph rendered for an empty grid cell.
pub const EMPTY_GLYPH: &str = "\u{ffed} ";

/// Integer coordinates on the toroidal grid. `x` is the row index, so
/// moving "up" is `(-1, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    /// Wraps arbitrary signed coordinates onto a grid of the given size.
    pub fn wrapped(x: i64, y: i64, size: usize) -> Self {
        let n = size as i64;
        Self {
            x: x.rem_euclid(n) as usize,
            y: y.rem_euclid(n) as usize,
        }
    }

    /// Returns the position offset by `(dx, dy)` with wraparound.
    pub fn step(&self, dx: i64, dy: i64, size: usize) -> Self {
        Self::wrapped(self.x as i64 + dx, self.y as i64 + dy, size)
    }
}

/// Immutable creature template from the species catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub index: String,
    pub name: String,
    #[serde(default)]
    pub exp: i32,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub sp_attack: i32,
    pub sp_defense: i32,
    pub speed: i32,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Species {
    /// Display glyph for the species' primary type tag.
    pub fn glyph(&self) -> &'static str {
        match self.types.first().map(String::as_str) {
            Some("fire") => "\u{1f525}",
            Some("grass") => "\u{1f33f}",
            Some("water") => "\u{1f4a7}",
            Some("rock") => "\u{26f0}\u{fe0f}",
            Some("flying") => "\u{1fabd}",
            Some("electric") => "\u{26a1}\u{fe0f}",
            _ => "\u{2753}",
        }
    }
}

/// A concrete creature, either wild (owned by the world) or captured
/// (owned by exactly one roster). Cloned from a [`Species`] at creation;
/// the catalog entry itself is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokemonInstance {
    pub name: String,
    pub exp: i32,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub sp_attack: i32,
    pub sp_defense: i32,
    pub speed: i32,
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub accum_exp: i32,
    #[serde(default = "default_deployable")]
    pub deployable: bool,
    #[serde(default)]
    pub ev_points: f64,
    #[serde(skip)]
    pub glyph: String,
    #[serde(skip)]
    pub pos: Option<Position>,
    #[serde(skip)]
    pub spawned_at: Option<Instant>,
}

fn default_deployable() -> bool {
    true
}

impl PokemonInstance {
    /// Clones a species template into a fresh instance with independent
    /// identity and mutable state.
    pub fn from_species(species: &Species) -> Self {
        Self {
            name: species.name.clone(),
            exp: species.exp,
            hp: species.hp,
            attack: species.attack,
            defense: species.defense,
            sp_attack: species.sp_attack,
            sp_defense: species.sp_defense,
            speed: species.speed,
            types: species.types.clone(),
            accum_exp: 0,
            deployable: true,
            ev_points: 0.0,
            glyph: species.glyph().to_string(),
            pos: None,
            spawned_at: None,
        }
    }
}

/// A player record as persisted by the player store. Position and avatar
/// exist only while the player is connected in roam mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(rename = "pokemon_list", default)]
    pub roster: Vec<PokemonInstance>,
    #[serde(skip)]
    pub pos: Option<Position>,
    #[serde(skip)]
    pub avatar: String,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            roster: Vec::new(),
            pos: None,
            avatar: String::new(),
        }
    }
}

/// Session mode, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Battle,
    Roam,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Mode::Battle),
            "2" => Some(Mode::Roam),
            _ => None,
        }
    }
}

/// Parsed first line of a connection: `"<name> <mode>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub name: String,
    pub mode: Mode,
}

/// Malformed handshake line. Closes the connection.
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    MissingField,
    BadMode(String),
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::MissingField => write!(f, "expected \"<name> <mode>\""),
            HandshakeError::BadMode(m) => write!(f, "unknown mode {:?} (expected 1 or 2)", m),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl Handshake {
    pub fn parse(line: &str) -> Result<Self, HandshakeError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or(HandshakeError::MissingField)?;
        let mode = parts.next().ok_or(HandshakeError::MissingField)?;
        let mode = Mode::parse(mode).ok_or_else(|| HandshakeError::BadMode(mode.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            mode,
        })
    }
}

/// Movement direction in roam mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Row/column delta for this direction.
    pub fn delta(&self) -> (i64, i64) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
        }
    }
}

/// A roam-mode client command. Unknown words parse to `None` and are
/// ignored by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoamCommand {
    Move(Direction),
    Leave,
}

impl RoamCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "up" => Some(RoamCommand::Move(Direction::Up)),
            "down" => Some(RoamCommand::Move(Direction::Down)),
            "left" => Some(RoamCommand::Move(Direction::Left)),
            "right" => Some(RoamCommand::Move(Direction::Right)),
            "leave" => Some(RoamCommand::Leave),
            _ => None,
        }
    }
}

/// Writes one length-prefixed frame: 4-byte big-endian payload length,
/// then the UTF-8 payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &str,
) -> std::io::Result<()> {
    let bytes = payload.as_bytes();
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame and returns its UTF-8 payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    String::from_utf8(payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_species() -> Species {
        Species {
            index: "#004".to_string(),
            name: "Charmander".to_string(),
            exp: 62,
            hp: 39,
            attack: 52,
            defense: 43,
            sp_attack: 60,
            sp_defense: 50,
            speed: 65,
            types: vec!["fire".to_string()],
            description: "A small fire lizard.".to_string(),
        }
    }

    #[test]
    fn test_wraparound_negative_row() {
        let pos = Position { x: 0, y: 0 };
        assert_eq!(pos.step(-1, 0, 25), Position { x: 24, y: 0 });
    }

    #[test]
    fn test_wraparound_positive_overflow() {
        let pos = Position { x: 24, y: 24 };
        assert_eq!(pos.step(1, 1, 25), Position { x: 0, y: 0 });
    }

    #[test]
    fn test_wraparound_identity() {
        let pos = Position { x: 12, y: 7 };
        assert_eq!(pos.step(0, 0, 25), pos);
    }

    #[test]
    fn test_instance_clone_is_independent() {
        let species = sample_species();
        let mut instance = PokemonInstance::from_species(&species);
        instance.hp = 0;
        instance.deployable = false;
        assert_eq!(species.hp, 39);
        assert_eq!(instance.glyph, "\u{1f525}");
    }

    #[test]
    fn test_handshake_parse() {
        let hs = Handshake::parse("ash 1").unwrap();
        assert_eq!(hs.name, "ash");
        assert_eq!(hs.mode, Mode::Battle);

        let hs = Handshake::parse("  misty   2 ").unwrap();
        assert_eq!(hs.name, "misty");
        assert_eq!(hs.mode, Mode::Roam);
    }

    #[test]
    fn test_handshake_parse_errors() {
        assert_eq!(Handshake::parse("ash"), Err(HandshakeError::MissingField));
        assert_eq!(Handshake::parse(""), Err(HandshakeError::MissingField));
        assert_eq!(
            Handshake::parse("ash 3"),
            Err(HandshakeError::BadMode("3".to_string()))
        );
    }

    #[test]
    fn test_roam_command_parse() {
        assert_eq!(
            RoamCommand::parse("up"),
            Some(RoamCommand::Move(Direction::Up))
        );
        assert_eq!(
            RoamCommand::parse("  LEFT \n"),
            Some(RoamCommand::Move(Direction::Left))
        );
        assert_eq!(RoamCommand::parse("leave"), Some(RoamCommand::Leave));
        assert_eq!(RoamCommand::parse("sideways"), None);
    }

    #[test]
    fn test_direction_deltas() {
        assert_eq!(Direction::Up.delta(), (-1, 0));
        assert_eq!(Direction::Down.delta(), (1, 0));
        assert_eq!(Direction::Left.delta(), (0, -1));
        assert_eq!(Direction::Right.delta(), (0, 1));
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);

        write_frame(&mut a, "hello # world\nwith newline")
            .await
            .unwrap();
        let payload = read_frame(&mut b).await.unwrap();
        assert_eq!(payload, "hello # world\nwith newline");
    }

    #[tokio::test]
    async fn test_frame_preserves_order() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, "first").await.unwrap();
        write_frame(&mut a, "second").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), "first");
        assert_eq!(read_frame(&mut b).await.unwrap(), "second");
    }

    #[test]
    fn test_player_record_json_shape() {
        let json = r#"{
            "name": "ash",
            "pokemon_list": [{
                "name": "Charmander",
                "exp": 62,
                "hp": 39,
                "attack": 52,
                "defense": 43,
                "sp_attack": 60,
                "sp_defense": 50,
                "speed": 65,
                "type": ["fire"]
            }]
        }"#;

        let player: Player = serde_json::from_str(json).unwrap();
        assert_eq!(player.name, "ash");
        assert_eq!(player.roster.len(), 1);
        assert!(player.roster[0].deployable);
        assert_eq!(player.roster[0].accum_exp, 0);
    }
}

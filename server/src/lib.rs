//! # Pokegrid Game Server
//!
//! Authoritative server for a two-mode multiplayer text game: a shared
//! toroidal grid world with a spawn/capture/despawn lifecycle (roam mode)
//! and a turn-based combat resolver (battle mode).
//!
//! ## Concurrency model
//!
//! Many per-connection reader tasks feed a single event-dispatcher task
//! that is the only writer to the participant and connection registries;
//! events are applied strictly in arrival order. The world grid is guarded
//! by one exclusive lock shared between player actions and the background
//! spawn/despawn timers, because a capture or move touches two cells
//! atomically. Each battle runs as an independent session task that owns
//! its two participants' choice channels exclusively.
//!
//! ## Modules
//!
//! - [`catalog`]: read-only species templates loaded once at startup.
//! - [`store`]: durable player rosters, full-file JSON read/replace.
//! - [`world`]: the toroidal grid, movement, capture, spawn and despawn.
//! - [`battle`]: round resolution, experience awards, session pairing.
//! - [`dispatcher`]: the single-consumer event loop owning the registry.
//! - [`net`]: TCP accept loop, handshake, framed per-connection I/O.

pub mod battle;
pub mod catalog;
pub mod dispatcher;
pub mod net;
pub mod store;
pub mod world;

//! End-to-end tests that run the full server stack on an ephemeral port
//! and talk to it over real TCP sockets, the way a client binary would.
//!
//! The background spawn and despawn timers are deliberately not started
//! here so the only frames on the wire are the ones the tests provoke.

use server::battle::run_matchmaker;
use server::catalog::SpeciesCatalog;
use server::dispatcher::{Dispatcher, Event};
use server::net::{serve, ServerContext};
use server::store::PlayerStore;
use server::world::World;
use shared::{read_frame, Player, PokemonInstance, Species, EMPTY_GLYPH, WORLD_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

fn species(
    name: &str,
    exp: i32,
    hp: i32,
    attack: i32,
    defense: i32,
    sp_attack: i32,
    sp_defense: i32,
    speed: i32,
) -> Species {
    Species {
        index: format!("#{}", name.len()),
        name: name.to_string(),
        exp,
        hp,
        attack,
        defense,
        sp_attack,
        sp_defense,
        speed,
        types: vec!["fire".to_string()],
        description: String::new(),
    }
}

fn test_catalog() -> SpeciesCatalog {
    SpeciesCatalog::from_species(vec![
        species("Charmander", 62, 39, 52, 43, 60, 50, 65),
        species("Bulbasaur", 64, 45, 49, 49, 65, 65, 45),
        species("Squirtle", 63, 44, 48, 65, 50, 64, 43),
    ])
    .unwrap()
}

/// Starts the dispatcher, matchmaker and accept loop on an ephemeral port.
async fn start_server(store: Arc<PlayerStore>) -> SocketAddr {
    let catalog = Arc::new(test_catalog());
    let world = Arc::new(Mutex::new(World::new(WORLD_SIZE)));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let (seat_tx, seat_rx) = mpsc::unbounded_channel();
    tokio::spawn(Dispatcher::new(world.clone()).run(event_rx));
    tokio::spawn(run_matchmaker(seat_rx, event_tx.clone(), store.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = ServerContext {
        events: event_tx,
        seats: seat_tx,
        world,
        store,
        catalog,
    };
    tokio::spawn(async move {
        let _ = serve(listener, ctx).await;
    });
    addr
}

fn temp_store() -> (tempfile::TempDir, Arc<PlayerStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(PlayerStore::new(dir.path().join("players.json")));
    (dir, store)
}

async fn connect(addr: SocketAddr) -> (OwnedReadHalf, OwnedWriteHalf) {
    TcpStream::connect(addr).await.unwrap().into_split()
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) {
    writer
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .unwrap();
}

async fn recv_frame(reader: &mut OwnedReadHalf) -> String {
    timeout(Duration::from_secs(5), read_frame(reader))
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed while waiting for a frame")
}

/// Reads frames until one contains `needle`, with a bounded frame budget
/// so a chatty failure mode can't loop forever.
async fn recv_frame_containing(reader: &mut OwnedReadHalf, needle: &str) -> String {
    for _ in 0..50 {
        let frame = recv_frame(reader).await;
        if frame.contains(needle) {
            return frame;
        }
    }
    panic!("no frame containing {:?} within 50 frames", needle);
}

#[tokio::test]
async fn test_roam_session_streams_snapshots() {
    let (_dir, store) = temp_store();
    let addr = start_server(store).await;

    let (mut reader, mut writer) = connect(addr).await;
    send_line(&mut writer, "ash 2").await;

    recv_frame_containing(&mut reader, "Welcome").await;
    let snapshot = recv_frame_containing(&mut reader, EMPTY_GLYPH).await;
    assert!(snapshot.lines().count() >= WORLD_SIZE);

    // Every accepted move triggers a fresh snapshot broadcast.
    send_line(&mut writer, "up").await;
    recv_frame_containing(&mut reader, EMPTY_GLYPH).await;

    send_line(&mut writer, "leave").await;
}

#[tokio::test]
async fn test_duplicate_name_is_reprompted() {
    let (_dir, store) = temp_store();
    let addr = start_server(store).await;

    let (mut reader1, mut writer1) = connect(addr).await;
    send_line(&mut writer1, "ash 2").await;
    recv_frame_containing(&mut reader1, "Welcome").await;

    let (mut reader2, mut writer2) = connect(addr).await;
    send_line(&mut writer2, "ash 2").await;
    recv_frame_containing(&mut reader2, "already in use").await;

    // The connection stays open; a fresh handshake gets through.
    send_line(&mut writer2, "misty 2").await;
    recv_frame_containing(&mut reader2, "Welcome").await;
}

#[tokio::test]
async fn test_malformed_handshake_closes_connection() {
    let (_dir, store) = temp_store();
    let addr = start_server(store).await;

    let (mut reader, mut writer) = connect(addr).await;
    send_line(&mut writer, "nomode").await;

    let result = timeout(Duration::from_secs(5), read_frame(&mut reader))
        .await
        .expect("timed out waiting for the server to close the connection");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_battle_first_entry_creates_starter_roster() {
    let (_dir, store) = temp_store();
    let addr = start_server(store.clone()).await;

    let (mut reader, mut writer) = connect(addr).await;
    send_line(&mut writer, "newbie 1").await;

    recv_frame_containing(&mut reader, "Created a new player").await;
    recv_frame_containing(&mut reader, "Waiting for an opponent").await;

    let record = store.find("newbie").expect("player persisted on creation");
    let names: Vec<&str> = record.roster.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Charmander", "Bulbasaur", "Squirtle"]);
}

#[tokio::test]
async fn test_battle_runs_to_completion_and_awards_experience() {
    let (_dir, store) = temp_store();

    // One side can't be scratched and always one-shots the other, so the
    // outcome is fixed no matter which attack kinds the rng draws.
    let bruiser = species("Bruiser", 10, 200, 60, 100, 40, 100, 99);
    let fodder = species("Fodder", 30, 40, 10, 10, 10, 10, 1);

    let mut red = Player::new("red");
    red.roster.push(PokemonInstance::from_species(&bruiser));
    store.upsert(&red);

    let mut blue = Player::new("blue");
    for _ in 0..3 {
        blue.roster.push(PokemonInstance::from_species(&fodder));
    }
    store.upsert(&blue);

    let addr = start_server(store.clone()).await;

    let (mut red_reader, mut red_writer) = connect(addr).await;
    send_line(&mut red_writer, "red 1").await;
    send_line(&mut red_writer, "1").await;

    let (_blue_reader, mut blue_writer) = connect(addr).await;
    send_line(&mut blue_writer, "blue 1").await;
    for choice in ["1", "2", "3"] {
        send_line(&mut blue_writer, choice).await;
    }

    let verdict = recv_frame_containing(&mut red_reader, "BATTLE END").await;
    assert!(verdict.contains("red wins the battle"), "verdict: {verdict}");

    // floor(3 * 30 / 3) shared into the winner's starter slots.
    let record = store.find("red").expect("winner persisted");
    assert_eq!(record.roster[0].accum_exp, 30);
    assert_eq!(record.roster[0].hp, 200, "winner was never scratched");
}

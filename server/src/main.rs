use clap::Parser;
use log::{error, info};
use rand::thread_rng;
use server::battle::run_matchmaker;
use server::catalog::SpeciesCatalog;
use server::dispatcher::{broadcast, Dispatcher, Event};
use server::net::{serve, ServerContext};
use server::store::PlayerStore;
use server::world::World;
use shared::{Mode, DESPAWN_AFTER, DESPAWN_GRACE, SPAWN_INTERVAL, WORLD_SIZE};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};

/// Parses command-line arguments, wires the dispatcher, matchmaker and
/// world timers, then runs the accept loop. Only an accept-loop failure
/// terminates the process.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "3012")]
        port: u16,
        /// Path to the species catalog JSON
        #[clap(long, default_value = "server/assets/pokedex.json")]
        catalog: String,
        /// Path to the player store JSON
        #[clap(long, default_value = "server/assets/players.json")]
        store: String,
    }

    env_logger::init();
    let args = Args::parse();

    let catalog = Arc::new(SpeciesCatalog::load(Path::new(&args.catalog))?);
    let store = Arc::new(PlayerStore::new(&args.store));
    let world = Arc::new(Mutex::new(World::new(WORLD_SIZE)));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let (seat_tx, seat_rx) = mpsc::unbounded_channel();

    tokio::spawn(Dispatcher::new(world.clone()).run(event_rx));
    tokio::spawn(run_matchmaker(seat_rx, event_tx.clone(), store.clone()));

    // Spawn-wave timer: a fresh wave of wild pokemon while anyone roams.
    {
        let world = world.clone();
        let catalog = catalog.clone();
        let events = event_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SPAWN_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = {
                    let mut world = world.lock().await;
                    if world.player_count() == 0 {
                        None
                    } else {
                        world.spawn_wave(catalog.all(), &mut thread_rng());
                        Some(world.render())
                    }
                };
                if let Some(snapshot) = snapshot {
                    broadcast(&events, snapshot, Some(Mode::Roam));
                }
            }
        });
    }

    // Despawn sweep: wild pokemon age out at threshold minus grace.
    {
        let world = world.clone();
        let events = event_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot = {
                    let mut world = world.lock().await;
                    if world.despawn_expired(Instant::now()) > 0 {
                        Some(world.render())
                    } else {
                        None
                    }
                };
                if let Some(snapshot) = snapshot {
                    broadcast(&events, snapshot, Some(Mode::Roam));
                }
            }
        });
    }

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    info!(
        "Server listening on {} ({} species, despawn after {:?})",
        address,
        catalog.len(),
        DESPAWN_AFTER - DESPAWN_GRACE
    );

    let ctx = ServerContext {
        events: event_tx,
        seats: seat_tx,
        world,
        store,
        catalog,
    };
    if let Err(e) = serve(listener, ctx).await {
        error!("accept loop failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

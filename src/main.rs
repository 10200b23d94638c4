//! Movement simulation - drives the movement core against a loopback server
//!
//! Runs a scripted session on a small demo floor:
//! - a few predicted manual steps, one of them into a wall the client has
//!   not loaded yet
//! - a long auto-walk searched in the background
//! - a full-field search around the final position

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_game_client::config::Config;
use tile_game_client::map::{Direction, GridPosition, WorldMap};
use tile_game_client::movement::{ActorId, Movable};
use tile_game_client::pathfinding::{FieldSearchOption, FieldSearchParams};
use tile_game_client::runtime::{ClientEvent, Timeline, TimelineHandle};
use tile_game_client::sim::{LoopbackActor, LoopbackConfig, LoopbackServer};
use tile_game_client::util::time::Timer;

const FLOOR: u8 = 7;
const LOCAL_ACTOR: ActorId = ActorId(1);

/// What the server knows
const SERVER_LAYOUT: &str = "\
########################
#......................#
#...#.......,,,,.......#
#...#..######..........#
#...#.......#..........#
#...........#....####..#
#######.....#.......#..#
#...........#.......#..#
#..,,,,.....#..........#
########################";

/// What the client has loaded: the wall at x=4, y=2..4 is missing
const CLIENT_LAYOUT: &str = "\
########################
#......................#
#...........,,,,.......#
#......######..........#
#...........#..........#
#...........#....####..#
#######.....#.......#..#
#...........#.......#..#
#..,,,,.....#..........#
########################";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting movement simulation");
    info!(
        client_version = config.protocol.client_version,
        new_walking = config.protocol.new_walking,
        max_prewalk = config.prediction.step_limit(&config.protocol),
        "Protocol profile"
    );

    let start = GridPosition::new(2, 2, FLOOR);
    let speed = 220;

    let client_map = WorldMap::from_ascii(FLOOR, CLIENT_LAYOUT).into_shared();
    let (timeline, handle, requests) = Timeline::new(&config, client_map, Movable::new(LOCAL_ACTOR, start, speed));

    let server = LoopbackServer::new(
        LoopbackConfig::default(),
        WorldMap::from_ascii(FLOOR, SERVER_LAYOUT),
        LoopbackActor {
            id: LOCAL_ACTOR,
            position: start,
            speed,
        },
        config.protocol.clone(),
        requests,
        handle.clone(),
    );

    let events = handle.subscribe();
    let timeline_task = tokio::spawn(timeline.run());
    tokio::spawn(server.run());
    tokio::spawn(log_client_events(events));

    let timer = Timer::new();
    tokio::select! {
        result = run_script(&handle) => result?,
        _ = shutdown_signal() => {}
    }

    handle.shutdown()?;
    timeline_task.await?;

    info!(elapsed_ms = timer.elapsed_ms(), "Simulation complete");
    Ok(())
}

/// Scripted player input
async fn run_script(handle: &TimelineHandle) -> anyhow::Result<()> {
    for direction in [Direction::South, Direction::South, Direction::East] {
        handle.step(direction)?;
        tokio::time::sleep(Duration::from_millis(550)).await;
    }

    // Walks into the wall the client has not seen
    handle.step(Direction::East)?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    handle.auto_walk(GridPosition::new(21, 8, FLOOR))?;
    tokio::time::sleep(Duration::from_secs(15)).await;

    let params = FieldSearchParams::default()
        .with(FieldSearchOption::IgnoreCreatures)
        .with_destination(GridPosition::new(18, 1, FLOOR));
    let request = handle.field_search(GridPosition::new(21, 8, FLOOR), 12, params)?;
    debug!(request, "Field search requested");
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}

async fn log_client_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::FieldSearchCompleted { request, result }) => {
                info!(
                    request,
                    cells = result.len(),
                    expansions = result.expansions(),
                    "Field search completed"
                );
            }
            Ok(ClientEvent::AutoWalkFailed { destination, reason }) => {
                warn!(destination = %destination, ?reason, "Auto-walk failed");
            }
            Ok(event) => info!(?event, "Client event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Client event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}

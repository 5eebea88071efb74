use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chess_party::auth::{JwtConfig, JwtManager};
use chess_party::game::StandardChess;
use chess_party::logging::{setup_logging, Environment, LogConfig};
use chess_party::storage::{MatchStore, MemoryMatchStore, SqliteMatchStore};
use chess_party::{GameServer, GameServerConfig, HeartbeatConfig, MatchOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "chess_party", version, about)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 8000)]
    port: u16,

    /// Path to the SQLite match database
    #[arg(long, default_value = "data/chess_party.db")]
    db_path: String,

    /// Keep matches in memory only (lost on exit)
    #[arg(long, default_value_t = false)]
    in_memory_store: bool,

    /// Deployment profile, controls log output
    #[arg(long, value_enum, default_value = "local")]
    env: Environment,

    /// Directory for log files (dev and prod)
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Seconds between websocket pings
    #[arg(long, default_value_t = 15)]
    ping_interval_secs: u64,

    /// Seconds without any frame before a socket is closed
    #[arg(long, default_value_t = 30)]
    pong_timeout_secs: u64,
}

fn open_store(args: &ServerArgs) -> chess_party::Result<Arc<dyn MatchStore>> {
    if args.in_memory_store {
        log::warn!("using the in-memory store; matches will not survive a restart");
        return Ok(Arc::new(MemoryMatchStore::new()));
    }

    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(&args.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteMatchStore::new(&args.db_path)?;
    log::info!("match store: {}", args.db_path);
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();

    let _logger = setup_logging(&LogConfig {
        env: args.env,
        directory: args.log_dir.clone(),
        ..LogConfig::default()
    })?;

    log::info!("{} {} starting ({:?})", chess_party::NAME, chess_party::VERSION, args.env);

    let store = open_store(&args)?;
    let orchestrator = MatchOrchestrator::new(store, Arc::new(StandardChess));
    let _pairing = orchestrator.spawn_pairing_worker();

    let config = GameServerConfig {
        host: args.host.clone(),
        port: args.port,
        heartbeat: HeartbeatConfig {
            ping_interval: Duration::from_secs(args.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(args.pong_timeout_secs.max(1)),
        },
    };
    let jwt = JwtManager::new(JwtConfig::from_env());

    if let Err(e) = GameServer::new(config, orchestrator, jwt).start().await {
        log::error!("game server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

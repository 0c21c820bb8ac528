use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use atelier_collab::identity::StaticTokenVerifier;
use atelier_collab::server::{ServerConfig, SyncServer};
use atelier_collab::store::{JsonFileThemeStore, MemoryThemeStore, ThemeStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "atelier-server")]
#[command(about = "Real-time collaborative theme editing server", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ATELIER_BIND", default_value = "127.0.0.1:9090")]
    bind: String,

    /// Accepted credentials as `token=subject:role,...`
    #[arg(long, env = "ATELIER_TOKENS")]
    tokens: String,

    /// Directory of persisted themes; themes live in memory when omitted
    #[arg(long, env = "ATELIER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Events buffered per room member before it lags
    #[arg(long, env = "ATELIER_BROADCAST_CAPACITY", default_value_t = 256)]
    broadcast_capacity: usize,

    #[arg(long, env = "ATELIER_MAX_MEMBERS", default_value_t = 100)]
    max_members_per_room: usize,

    #[arg(long, env = "ATELIER_MAX_ROOMS", default_value_t = 1024)]
    max_rooms: usize,

    #[arg(long, env = "ATELIER_MAX_SESSIONS", default_value_t = 4096)]
    max_sessions: usize,

    /// Undo levels kept per theme
    #[arg(long, env = "ATELIER_HISTORY_DEPTH", default_value_t = 100)]
    history_depth: usize,

    /// Seconds a connection may stay without joining a theme
    #[arg(long, env = "ATELIER_JOIN_TIMEOUT", default_value_t = 30)]
    join_timeout_secs: u64,

    #[arg(long, env = "ATELIER_CURSOR_INTERVAL_MS", default_value_t = 33)]
    cursor_interval_ms: u64,

    #[arg(long, env = "ATELIER_HEARTBEAT", default_value_t = 30)]
    heartbeat_interval_secs: u64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            broadcast_capacity: self.broadcast_capacity,
            max_members_per_room: self.max_members_per_room,
            max_rooms: self.max_rooms,
            max_sessions: self.max_sessions,
            history_depth: self.history_depth,
            join_timeout_secs: self.join_timeout_secs,
            cursor_interval_ms: self.cursor_interval_ms,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
        }
    }

    fn store(&self) -> Result<Arc<dyn ThemeStore>, BoxError> {
        match &self.data_dir {
            Some(dir) => {
                let store = JsonFileThemeStore::open(dir.clone())?;
                info!("Persisting themes under {}", store.dir().display());
                Ok(Arc::new(store))
            }
            None => {
                info!("No data directory given, themes are kept in memory");
                Ok(Arc::new(MemoryThemeStore::new()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let verifier = StaticTokenVerifier::parse(&args.tokens)?;
    info!("Starting atelier-server with {} credential(s)", verifier.len());

    let server = SyncServer::new(args.server_config(), Arc::new(verifier), args.store()?);
    server.run().await
}

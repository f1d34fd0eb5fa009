//! Real-time presence and messaging client.
//!
//! Keeps a reconnecting channel to the messaging endpoint, shows which peers
//! are online and opens a chat with one peer.
//!
//! Run with:
//! ```not_rust
//! KIZUNA_TOKEN=... cargo run --bin kizuna-client -- --user-id alice --peer bob
//! cargo run --bin kizuna-client -- -i alice -p bob --cookie "token=..."
//! cargo run --bin kizuna-client -- -i alice -p bob --store ./local-storage.json
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::FixedOffset;
use clap::Parser;

use kizuna_client::{
    MessagingClient,
    config::{ClientConfig, DEFAULT_API_BASE_URL, DEFAULT_SOCKET_URL},
    credential::{CookieJar, EnvStore, JsonFileStore, KeyValueStore, MemoryStore, TokenResolver},
    domain::{UserId, UserProfile},
    error::ClientError,
    runner::run_client,
};
use kizuna_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kizuna-client")]
#[command(about = "Real-time presence and messaging client", long_about = None)]
struct Args {
    /// Id of the logged-in user
    #[arg(short = 'i', long)]
    user_id: String,

    #[arg(long, default_value = "")]
    first_name: String,

    #[arg(long, default_value = "")]
    last_name: String,

    /// Id of the peer to chat with
    #[arg(short = 'p', long)]
    peer: String,

    /// WebSocket endpoint
    #[arg(short = 'u', long, default_value = DEFAULT_SOCKET_URL)]
    url: String,

    /// Base URL of the REST API
    #[arg(short = 'a', long, default_value = DEFAULT_API_BASE_URL)]
    api: String,

    /// Cookie header, e.g. "token=abc; theme=dark"
    #[arg(long)]
    cookie: Option<String>,

    /// JSON file used as local storage
    #[arg(long)]
    store: Option<PathBuf>,

    /// Prefix of the environment variables used as session storage
    #[arg(long, default_value = "KIZUNA_")]
    env_prefix: String,

    /// REST request timeout in seconds
    #[arg(long, default_value_t = 10)]
    request_timeout: u64,

    /// WebSocket handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    handshake_timeout: u64,

    /// Offset from UTC in minutes for displayed times (defaults to the local time zone)
    #[arg(long, allow_hyphen_values = true)]
    utc_offset: Option<i32>,
}

fn build_resolver(args: &Args) -> Result<TokenResolver, ClientError> {
    let cookies: Arc<dyn KeyValueStore> = match &args.cookie {
        Some(header) => Arc::new(CookieJar::parse(header)),
        None => Arc::new(MemoryStore::new()),
    };
    let local: Arc<dyn KeyValueStore> = match &args.store {
        Some(path) => Arc::new(JsonFileStore::load(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let session = Arc::new(EnvStore::new(args.env_prefix.clone()));
    Ok(TokenResolver::standard(cookies, local, session))
}

async fn run(args: Args) -> Result<(), ClientError> {
    let local_id =
        UserId::new(args.user_id.clone()).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
    let peer = UserId::new(args.peer.clone()).map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
    if local_id == peer {
        return Err(ClientError::InvalidArgument(
            "peer must differ from the local user".to_string(),
        ));
    }

    let resolver = Arc::new(build_resolver(&args)?);
    if resolver.resolve().is_none() {
        return Err(ClientError::MissingCredential);
    }

    let local_user = UserProfile::new(local_id, args.first_name.clone(), args.last_name.clone());
    let mut config = ClientConfig::new(args.url.clone(), args.api.clone());
    config.request_timeout = Duration::from_secs(args.request_timeout);
    config.handshake_timeout = Duration::from_secs(args.handshake_timeout);
    if let Some(minutes) = args.utc_offset {
        config.display_offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ClientError::InvalidArgument(format!("invalid UTC offset: {}", minutes)))?;
    }

    tracing::info!("Connecting to {} as '{}'", config.socket_url, local_user.id);
    let client = MessagingClient::with_websocket(config, resolver, Some(local_user))?;
    run_client(client, peer).await
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}

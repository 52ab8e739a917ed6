//! peerlink server
//!
//! Accepts TCP connections, authenticates every client with the secret
//! handshake and echoes each message it receives back over the encrypted
//! channel.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use peerlink::{
    config::{Config, HandshakeConfig, LoggingConfig},
    transport::{TcpTransport, TransportConfig},
    Keypair, NetworkId, PublicKey, SecureConnection,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// peerlink server - authenticated echo endpoint
#[derive(Parser, Debug)]
#[command(name = "peerlink-server")]
#[command(about = "peerlink server - mutually authenticated encrypted echo")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Generate new keypair and exit
    #[arg(long)]
    generate_key: bool,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

/// Server state shared across connections
struct ServerState {
    keypair: Arc<Keypair>,
    network_id: NetworkId,
    /// Empty means any authenticated client is accepted
    allowed_clients: HashSet<PublicKey>,
    handshake: HandshakeConfig,
    conn_semaphore: Semaphore,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_key {
        return generate_keypair();
    }

    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    init_logging(args.log_level.as_deref(), &config.logging)?;

    let server_config = config
        .server
        .clone()
        .ok_or_else(|| anyhow!("No [server] section in config file"))?;

    let keypair = if server_config.secret_key.is_empty() {
        info!("No keypair configured - generating new keypair...");
        let keypair = Keypair::generate()?;

        if let Some(ref mut server) = config.server {
            server.secret_key = keypair.secret_to_base64();
            server.public_key = keypair.public.to_base64();
        }
        config.save(&args.config).context("Failed to save config with new keypair")?;
        info!("Generated and saved new keypair to config file");

        keypair
    } else {
        server_config.keypair().context("Invalid server key")?
    };

    let allowed_clients: HashSet<PublicKey> = server_config
        .allowed_clients()
        .context("Invalid allowed_clients entry")?
        .into_iter()
        .collect();

    if allowed_clients.is_empty() {
        warn!("No allowed_clients configured - any authenticated client may connect");
    } else {
        info!("Loaded {} allowed client(s)", allowed_clients.len());
    }

    let state = Arc::new(ServerState {
        keypair: Arc::new(keypair),
        network_id: config.network_id()?,
        allowed_clients,
        handshake: config.handshake.clone(),
        conn_semaphore: Semaphore::new(server_config.max_connections),
    });

    let listen_addr = args.listen.unwrap_or(server_config.listen);

    info!("peerlink server v{}", peerlink::VERSION);
    info!("Listening on {}", listen_addr);
    info!("Server public key: {}", state.keypair.public.to_base64());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .context("Failed to bind to address")?;

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);

                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                debug!("Connection from {} ended: {:#}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}

fn init_logging(level: Option<&str>, logging: &LoggingConfig) -> Result<()> {
    let level = level.unwrap_or(logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (&logging.file, logging.format.as_str()) {
        (Some(path), _) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        (None, "compact") => builder.compact().init(),
        (None, _) => builder.init(),
    }
    Ok(())
}

/// Generate and print a new keypair
fn generate_keypair() -> Result<()> {
    let keypair = Keypair::generate()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 peerlink Keypair Generated                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ PUBLIC KEY (share with clients):                             ║");
    println!("║ {}  ║", keypair.public.to_base64());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ SECRET KEY (keep secret, add to server config):              ║");
    println!("║ {}  ║", keypair.secret_to_base64());
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Add to your server config.toml:");
    println!("  secret_key = \"{}\"", keypair.secret_to_base64());
    println!("  public_key = \"{}\"", keypair.public.to_base64());
    println!();
    println!("Share with clients:");
    println!("  server_public_key = \"{}\"", keypair.public.to_base64());

    Ok(())
}

/// Handle a single client connection
async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let _permit = state
        .conn_semaphore
        .acquire()
        .await
        .context("Failed to acquire connection permit")?;

    let transport = TcpTransport::from_stream(stream, TransportConfig::default());
    let mut conn = SecureConnection::accept(
        transport,
        Arc::clone(&state.keypair),
        state.network_id,
        &state.handshake,
    )
    .await
    .context("Handshake failed")?;

    let client = *conn.remote_identity();
    if !state.allowed_clients.is_empty() && !state.allowed_clients.contains(&client) {
        warn!("Rejected client {:?}: not in allowed_clients", client);
        conn.close().await.ok();
        return Ok(());
    }
    info!("Client {:?} connected", client);

    let mut echoed = 0usize;
    while let Some(message) = conn.recv().await.context("Receive failed")? {
        conn.send(&message).await.context("Send failed")?;
        echoed += 1;
    }

    conn.close().await.ok();
    info!("Client {:?} disconnected after {} message(s)", client, echoed);
    Ok(())
}

//! peerlink client
//!
//! Connects to a peerlink server, proves its identity, then sends every line
//! read from stdin as one encrypted message and prints whatever comes back.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use peerlink::{
    config::{Config, LoggingConfig},
    transport::{TcpTransport, Transport, TransportConfig},
    Keypair, SecureConnection,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// peerlink client - talk to a peerlink server over an authenticated channel
#[derive(Parser, Debug)]
#[command(name = "peerlink-client")]
#[command(about = "peerlink client - send stdin lines over an authenticated channel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "client.toml")]
    config: String,

    /// Generate new keypair and exit
    #[arg(long)]
    generate_key: bool,

    /// Server address (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Log level (overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_key {
        return generate_keypair();
    }

    let mut config = Config::load(&args.config).context("Failed to load configuration")?;
    init_logging(args.log_level.as_deref(), &config.logging)?;

    let client_config = config
        .client
        .clone()
        .ok_or_else(|| anyhow!("No [client] section in config file"))?;

    let keypair = if client_config.secret_key.is_empty() {
        info!("No keypair configured - generating new keypair...");
        let keypair = Keypair::generate()?;

        if let Some(ref mut client) = config.client {
            client.secret_key = keypair.secret_to_base64();
            client.public_key = keypair.public.to_base64();
        }
        config.save(&args.config).context("Failed to save config with new keypair")?;
        info!("Generated and saved new keypair to config file");
        info!("Share this public key with the server admin: {}", keypair.public.to_base64());

        keypair
    } else {
        client_config.keypair().context("Invalid client key")?
    };

    let server_public = client_config
        .server_public_key()
        .context("Invalid server_public_key")?;
    let server_addr = args.server.unwrap_or(client_config.server);

    info!("peerlink client v{}", peerlink::VERSION);
    info!("Connecting to {}", server_addr);

    let mut transport = TcpTransport::new(TransportConfig::default());
    transport
        .connect(&server_addr)
        .await
        .context("Failed to connect to server")?;

    let mut conn = SecureConnection::connect(
        transport,
        Arc::new(keypair),
        config.network_id()?,
        server_public,
        &config.handshake,
    )
    .await
    .context("Handshake failed")?;

    info!("Connected to {}", conn.remote_identity());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        conn.send(line.as_bytes()).await.context("Send failed")?;
        match conn.recv().await.context("Receive failed")? {
            Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
            None => {
                warn!("Server closed the channel");
                break;
            }
        }
    }

    conn.close().await.ok();
    Ok(())
}

fn init_logging(level: Option<&str>, logging: &LoggingConfig) -> Result<()> {
    let level = level.unwrap_or(logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

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

    println!("Client keypair generated");
    println!();
    println!("Add to your client.toml:");
    println!("  secret_key = \"{}\"", keypair.secret_to_base64());
    println!("  public_key = \"{}\"", keypair.public.to_base64());
    println!();
    println!("Give the server admin your public key for allowed_clients:");
    println!("  \"{}\"", keypair.public.to_base64());

    Ok(())
}

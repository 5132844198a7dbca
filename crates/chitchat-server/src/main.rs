//! ChitChat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with self-signed certificate (development)
//! chitchat-server --bind 0.0.0.0:50051
//!
//! # Start with TLS certificate (production)
//! chitchat-server --bind 0.0.0.0:50051 --cert cert.pem --key key.pem
//! ```

use chitchat_server::{EngineConfig, MAX_MESSAGE_LEN, Server, ServerConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// ChitChat broadcast server
#[derive(Parser, Debug)]
#[command(name = "chitchat-server")]
#[command(about = "ChitChat broadcast chat server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:50051")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long, requires = "key")]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, requires = "cert")]
    key: Option<String>,

    /// Events buffered per subscriber before new ones are dropped
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(bind = %args.bind, "ChitChat server starting");

    let config = ServerConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        engine: EngineConfig {
            max_message_len: MAX_MESSAGE_LEN,
            outbound_capacity: args.outbound_capacity,
        },
    };

    let server = Server::bind(config).await?;

    tracing::info!(addr = %server.local_addr()?, "server listening");

    server.run().await?;

    Ok(())
}

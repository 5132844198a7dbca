//! ChitChat interactive client.
//!
//! Reads lines from stdin and publishes each one. `/leave` leaves the chat
//! and exits. Every broadcast received is logged with its logical time.
//!
//! ```bash
//! chitchat-client --id alice --server 127.0.0.1:50051
//! ```

use std::{net::SocketAddr, time::Duration};

use chitchat_client::{ChatClient, Subscription};
use chitchat_proto::{BroadcastEvent, EventKind};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period after `/leave` so the Leave broadcast reaches the terminal.
const LEAVE_GRACE: Duration = Duration::from_millis(200);

/// ChitChat terminal client
#[derive(Parser, Debug)]
#[command(name = "chitchat-client")]
#[command(about = "Interactive client for the ChitChat broadcast server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    server: String,

    /// Client id to chat as
    #[arg(short, long, value_parser = non_empty)]
    id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn non_empty(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        Err("client id must not be empty".to_string())
    } else {
        Ok(raw.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let server: SocketAddr = tokio::net::lookup_host(&args.server)
        .await?
        .next()
        .ok_or_else(|| format!("could not resolve '{}'", args.server))?;

    let client = ChatClient::connect(server, args.id).await?;
    let subscription = client.subscribe().await?;
    let printer = tokio::spawn(log_events(subscription));

    tracing::info!("type messages and press Enter to publish, '/leave' to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "/leave" {
            if let Err(e) = client.leave().await {
                tracing::warn!(error = %e, "leave failed");
            }
            tracing::info!(id = client.client_id(), "leaving");
            tokio::time::sleep(LEAVE_GRACE).await;
            break;
        }

        match client.publish(line).await {
            Ok(ack) if ack.ack => {
                tracing::info!(id = client.client_id(), content = ?line, "published");
            },
            Ok(ack) => tracing::warn!(reason = %ack.error, "publish rejected"),
            Err(e) => tracing::warn!(error = %e, "publish failed"),
        }
    }

    printer.abort();
    client.close().await;

    Ok(())
}

async fn log_events(mut subscription: Subscription) {
    while let Some(event) = subscription.next().await {
        log_event(&event);
    }
    tracing::info!("subscription closed");
}

fn log_event(event: &BroadcastEvent) {
    let BroadcastEvent { kind, client_id, timestamp, message } = event;
    match kind {
        EventKind::Chat => {
            tracing::info!(logical_time = timestamp, from = %client_id, content = ?message, "CHAT");
        },
        EventKind::Join => {
            tracing::info!(logical_time = timestamp, "JOIN {client_id} joined the chat");
        },
        EventKind::Leave => {
            tracing::info!(logical_time = timestamp, "LEAVE {client_id} left the chat");
        },
    }
}

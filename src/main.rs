//! CLI for the Bayeux client
//!
//! Subcommands:
//! - `subscribe`: print every message published to the given channels
//! - `publish`: publish one JSON payload and print the server's reply

use bayeux_client::config::load_config;
use bayeux_client::utils::logging;
use bayeux_client::{Client, Listener, Message};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "bayeux")]
struct Cli {
    /// Broker endpoint, overriding the configured one
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Subscribe to channels (glob patterns allowed) until interrupted
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },
    /// Publish a JSON payload on a channel
    Publish { channel: String, data: String },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&settings.log_level);

    let endpoint = cli.endpoint.unwrap_or(settings.endpoint);
    let client = match Client::new(&endpoint, settings.client) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid client configuration: {}", e);
            std::process::exit(2);
        }
    };

    let outcome = match cli.command {
        Command::Subscribe { channels } => run_subscribe(&client, channels).await,
        Command::Publish { channel, data } => run_publish(&client, &channel, &data).await,
    };
    if let Err(e) = client.disconnect().await {
        error!("Disconnect failed: {}", e);
    }
    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_subscribe(
    client: &Client,
    channels: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::new(print_message);
    for channel in &channels {
        client.subscribe(channel, listener.clone()).await?;
        info!("Subscribed to {}", channel);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    Ok(())
}

async fn run_publish(
    client: &Client,
    channel: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data: serde_json::Value = serde_json::from_str(data)?;
    let reply = client.publish(channel, data).await?;
    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

fn print_message(message: &Message) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Could not print message: {}", e),
    }
}

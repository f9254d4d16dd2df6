//! # bayeux-client
//!
//! `bayeux_client` is an asynchronous Bayeux (CometD/Faye) client built on
//! tokio. It keeps a logical session with a broker over whichever transport
//! works (WebSocket, long-polling or callback-polling), multiplexes channel
//! subscriptions and publications over it, and recovers on its own from
//! handshake failures and dropped connections.
//!
//! ## Core Modules
//!
//! - `client`: The public [`Client`] and its connection state machine.
//! - `dispatcher`: Gives outgoing messages ids, retries them and routes replies.
//! - `scheduler`: Per-message retry and deadline policies.
//! - `transport`: The transport contract, the shipped transports and the pool that picks one.
//! - `channels`: Channel subscriptions and glob matching of publications.
//! - `extensions`: Interceptors for incoming and outgoing messages.
//! - `protocol`: Wire messages, meta channels and server error strings.
//! - `config`: Client options and the `bayeux` binary's settings.
//! - `utils`: Errors, logging and the cancellable [`Task`] handle.
//!
//! ```no_run
//! use bayeux_client::{Client, ClientOptions, Listener};
//!
//! # async fn run() -> bayeux_client::Result<()> {
//! let client = Client::new("http://localhost:8000/bayeux", ClientOptions::default())?;
//! client
//!     .subscribe("/chat/*", Listener::new(|m| println!("{:?}", m.data)))
//!     .await?;
//! client.publish("/chat/lobby", serde_json::json!({"text": "hi"})).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod extensions;
pub mod protocol;
pub mod scheduler;
pub mod transport;
pub mod utils;

pub use channels::Listener;
pub use client::{Client, ClientBuilder, ClientEvent, PublishOptions, State, Subscription};
pub use config::ClientOptions;
pub use protocol::{Message, ProtocolError};
pub use utils::{Error, Result, Task};

#[cfg(test)]
mod tests;

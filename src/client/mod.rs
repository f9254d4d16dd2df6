//! The `client` module holds the Bayeux client: the connection state
//! machine, the meta message exchanges it drives and the public
//! subscribe/publish/disconnect operations.

mod client;
mod state;
mod subscription;

pub use client::{Client, ClientBuilder, ClientEvent, PublishOptions};
pub use state::{Event, State};
pub use subscription::Subscription;

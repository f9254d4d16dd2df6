//! The `transport` module moves Bayeux messages between the client and the
//! server.
//!
//! Every connection type implements [`Transport`] and is built by a
//! [`TransportFactory`] held in an ordered [`TransportRegistry`]. The
//! [`TransportPool`] picks among the allowed types for the dispatcher.
//! Transports report replies and unsolicited messages, as well as an
//! unexpected loss of their connection, as [`TransportEvent`]s.

pub mod batching;
pub mod callback_polling;
pub mod endpoint;
pub mod http_client;
pub mod long_polling;
pub mod pool;
pub mod registry;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::config::ClientOptions;
use crate::protocol::Message;
use crate::utils::TransportError;

pub use endpoint::Endpoint;
pub use pool::TransportPool;
pub use registry::TransportRegistry;

/// Process-unique identity of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A message received from the server.
    Message(Message),
    /// The connection dropped outside of a request.
    Down(TransportId),
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// What a factory needs to build a transport.
#[derive(Clone)]
pub struct TransportContext {
    pub options: Arc<ClientOptions>,
    pub events: EventSink,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> TransportId;

    fn connection_type(&self) -> &str;

    fn endpoint(&self) -> &Url;

    /// Establish the underlying connection. Request/response transports are
    /// ready immediately.
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Hand `message` to the server. Replies arrive as
    /// [`TransportEvent::Message`] on the event sink, never through the
    /// return value.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    async fn close(&self);
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id())
            .field("connection_type", &self.connection_type())
            .field("endpoint", &self.endpoint().as_str())
            .finish()
    }
}

pub trait TransportFactory: Send + Sync {
    fn connection_type(&self) -> &str;

    /// Cheap check with no side effects.
    fn is_usable(&self, endpoint: &Url, options: &ClientOptions) -> bool;

    fn create(
        &self,
        endpoint: Url,
        context: TransportContext,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

//! In-memory transport driven by a scripted server, for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use super::{EventSink, Transport, TransportContext, TransportEvent, TransportFactory, TransportId};
use crate::config::ClientOptions;
use crate::protocol::{Advice, Message, Reconnect, channel};
use crate::utils::TransportError;

pub const MOCK: &str = "mock";

/// What the scripted server does with one message.
pub enum Reply {
    Now(Vec<Message>),
    After(Duration, Vec<Message>),
    Fail(TransportError),
    Silent,
}

type Handler = Box<dyn FnMut(&Message, &MockHub) -> Option<Reply> + Send>;

pub struct MockHub {
    sent: Mutex<Vec<Message>>,
    handler: Mutex<Option<Handler>>,
    clients: AtomicU32,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    pub connect_hold: Duration,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            clients: AtomicU32::new(0),
            transports: Mutex::new(Vec::new()),
            connect_hold: Duration::from_secs(1),
        })
    }

    /// Override replies. Returning `None` falls back to the standard server.
    pub fn respond_with<F>(&self, handler: F)
    where
        F: FnMut(&Message, &MockHub) -> Option<Reply> + Send + 'static,
    {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.sent_on(channel).len()
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn handshakes(&self) -> u32 {
        self.clients.load(Ordering::SeqCst)
    }

    /// Deliver an unsolicited message through the newest open transport.
    pub fn push(&self, message: Message) {
        if let Some(transport) = self.live() {
            let _ = transport.events.send(TransportEvent::Message(message));
        }
    }

    /// Simulate the server dropping the newest open transport.
    pub fn drop_connection(&self) -> Option<TransportId> {
        let transport = self.live()?;
        transport.closed.store(true, Ordering::SeqCst);
        let _ = transport.events.send(TransportEvent::Down(transport.id));
        Some(transport.id)
    }

    fn live(&self) -> Option<Arc<MockTransport>> {
        self.transports()
            .into_iter()
            .rev()
            .find(|t| !t.closed.load(Ordering::SeqCst))
    }

    fn reply(&self, message: &Message) -> Reply {
        let custom = {
            let mut handler = self.handler.lock().unwrap();
            handler.as_mut().and_then(|h| h(message, self))
        };
        custom.unwrap_or_else(|| self.standard(message))
    }

    /// A well behaved Bayeux server.
    pub fn standard(&self, message: &Message) -> Reply {
        match message.channel.as_str() {
            channel::HANDSHAKE => {
                let n = self.clients.fetch_add(1, Ordering::SeqCst) + 1;
                let mut reply = ack(message);
                reply.client_id = Some(format!("client-{n}"));
                reply.version = Some("1.0".to_string());
                reply.supported_connection_types = Some(vec![MOCK.to_string()]);
                reply.advice = Some(Advice {
                    reconnect: Some(Reconnect::Retry),
                    interval: Some(0.0),
                    timeout: Some(1000.0),
                });
                Reply::Now(vec![reply])
            }
            channel::CONNECT => Reply::After(self.connect_hold, vec![ack(message)]),
            _ => Reply::Now(vec![ack(message)]),
        }
    }
}

/// A successful reply to `message`.
pub fn ack(message: &Message) -> Message {
    Message {
        channel: message.channel.clone(),
        id: message.id.clone(),
        client_id: message.client_id.clone(),
        subscription: message.subscription.clone(),
        successful: Some(true),
        ..Message::default()
    }
}

/// An unsuccessful reply to `message`.
pub fn nack(message: &Message, error: &str) -> Message {
    Message {
        successful: Some(false),
        error: Some(error.to_string()),
        ..ack(message)
    }
}

pub fn publication(channel: &str, data: serde_json::Value) -> Message {
    Message {
        data: Some(data),
        ext: Some(json!({"source": "mock"})),
        ..Message::new(channel)
    }
}

pub struct MockTransport {
    id: TransportId,
    connection_type: String,
    url: Url,
    hub: Arc<MockHub>,
    events: EventSink,
    connect_delay: Duration,
    connect_error: Option<TransportError>,
    stalled: bool,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connection_type(&self) -> &str {
        &self.connection_type
    }

    fn endpoint(&self) -> &Url {
        &self.url
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.connect_delay).await;
        match &self.connect_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.hub.sent.lock().unwrap().push(message.clone());
        match self.hub.reply(&message) {
            Reply::Now(replies) => {
                for reply in replies {
                    let _ = self.events.send(TransportEvent::Message(reply));
                }
                Ok(())
            }
            Reply::After(delay, replies) => {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for reply in replies {
                        let _ = events.send(TransportEvent::Message(reply));
                    }
                });
                Ok(())
            }
            Reply::Fail(error) => Err(error),
            Reply::Silent => Ok(()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    name: String,
    hub: Arc<MockHub>,
    connect_delay: Duration,
    connect_error: Option<TransportError>,
    stall_first: AtomicBool,
    usable: bool,
}

impl MockFactory {
    pub fn new(name: &str, hub: Arc<MockHub>) -> Self {
        Self {
            name: name.to_string(),
            hub,
            connect_delay: Duration::ZERO,
            connect_error: None,
            stall_first: AtomicBool::new(false),
            usable: true,
        }
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connect_error(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// The first transport created never finishes connecting.
    pub fn stall_first(self) -> Self {
        self.stall_first.store(true, Ordering::SeqCst);
        self
    }

    pub fn unusable(mut self) -> Self {
        self.usable = false;
        self
    }
}

impl TransportFactory for MockFactory {
    fn connection_type(&self) -> &str {
        &self.name
    }

    fn is_usable(&self, _endpoint: &Url, _options: &ClientOptions) -> bool {
        self.usable
    }

    fn create(
        &self,
        endpoint: Url,
        context: TransportContext,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = Arc::new(MockTransport {
            id: TransportId::next(),
            connection_type: self.name.clone(),
            url: endpoint,
            hub: self.hub.clone(),
            events: context.events,
            connect_delay: self.connect_delay,
            connect_error: self.connect_error.clone(),
            stalled: self.stall_first.swap(false, Ordering::SeqCst),
            closed: AtomicBool::new(false),
        });
        self.hub.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

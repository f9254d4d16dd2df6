//! Message dispatch
//!
//! The [`Dispatcher`] sits between the client and the transport pool. It
//! gives every outgoing message an id, retries it under a per-message
//! [`Scheduler`](crate::scheduler::Scheduler) and routes incoming messages:
//! replies to the delivery waiting on their id, everything else to the
//! client through [`DispatcherEvent`]s.

mod envelope;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::extensions::{Extensions, Stage};
use crate::protocol::Message;
use crate::scheduler::{Scheduler, SchedulerFactory, SchedulerOptions};
use crate::transport::{
    Endpoint, Transport, TransportEvent, TransportId, TransportPool, TransportRegistry,
};
use crate::utils::error::{Error, Result};
use crate::utils::{Task, TransportError, after};

pub use envelope::{Delivery, SendOptions};
use envelope::Envelope;

/// Applies when the caller sets no deadline of its own.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// An incoming message that does not answer an in-flight request.
    Message(Message),
    TransportUp,
    TransportDown,
}

#[derive(Default)]
struct DispatcherState {
    client_id: Option<String>,
    envelopes: HashMap<String, Envelope>,
    message_id: u32,
    serial: u64,
    up: Option<bool>,
    disconnecting: bool,
}

pub struct Dispatcher {
    pool: TransportPool,
    scheduler: SchedulerFactory,
    extensions: Extensions,
    retry: Duration,
    state: Mutex<DispatcherState>,
    outbound: mpsc::UnboundedSender<DispatcherEvent>,
}

impl Dispatcher {
    /// Build a dispatcher and start its inbound loop. Events for the client
    /// arrive on the returned receiver in the order transports produced
    /// them.
    pub fn new(
        endpoint: Endpoint,
        options: Arc<ClientOptions>,
        registry: TransportRegistry,
        scheduler: SchedulerFactory,
        extensions: Extensions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DispatcherEvent>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (outbound, events) = mpsc::unbounded_channel();
        let retry = options.retry();

        let dispatcher = Arc::new(Self {
            pool: TransportPool::new(registry, endpoint, options, transport_tx),
            scheduler,
            extensions,
            retry,
            state: Mutex::new(DispatcherState::default()),
            outbound,
        });
        tokio::spawn(inbound(Arc::downgrade(&dispatcher), transport_rx));
        (dispatcher, events)
    }

    pub fn client_id(&self) -> Option<String> {
        self.state.lock().ok()?.client_id.clone()
    }

    pub fn set_client_id(&self, client_id: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.client_id = client_id;
        }
    }

    pub fn is_up(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.up == Some(true))
            .unwrap_or(false)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.envelopes.len()).unwrap_or(0)
    }

    pub fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.pool.current()
    }

    /// Connection type of the selected transport, selecting one if needed.
    pub async fn connection_type(&self) -> std::result::Result<String, TransportError> {
        Ok(self.pool.get().await?.connection_type().to_string())
    }

    /// Restrict transports to `types` and start selecting one.
    pub fn select_transport(&self, types: Vec<String>, cleanup: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.disconnecting = false;
        }
        debug!(?types, cleanup, "selecting transport");
        self.pool.set_allowed(types, cleanup);

        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(error) = pool.get().await {
                debug!(%error, "transport selection failed");
            }
        });
    }

    /// Stop replacing transports that go down.
    pub fn set_disconnecting(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.disconnecting = true;
        }
    }

    /// Send `message`, retrying until a reply arrives or the scheduler gives
    /// up. A message whose id is already in flight returns the existing
    /// delivery.
    pub fn send_message(
        self: &Arc<Self>,
        mut message: Message,
        timeout: Duration,
        options: SendOptions,
    ) -> Delivery {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return Task::ready(Err(Error::Cancelled)),
        };

        let id = match &message.id {
            Some(id) => id.clone(),
            None => {
                state.message_id = state.message_id.wrapping_add(1);
                let id = base36(state.message_id);
                message.id = Some(id.clone());
                id
            }
        };
        if let Some(envelope) = state.envelopes.get(&id) {
            debug!(id, "message already in flight");
            return envelope.delivery.clone();
        }

        state.serial += 1;
        let serial = state.serial;
        let token = options
            .token
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let delivery = Task::spawn(
            token,
            self.clone().deliver(id.clone(), message, timeout, options),
        );
        state.envelopes.insert(
            id.clone(),
            Envelope {
                serial,
                delivery: delivery.clone(),
                reply: None,
                transport: None,
            },
        );
        drop(state);

        let dispatcher = Arc::downgrade(self);
        after(delivery, move |_| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.settle(&id, serial);
            }
        })
    }

    async fn deliver(
        self: Arc<Self>,
        id: String,
        message: Message,
        timeout: Duration,
        options: SendOptions,
    ) -> Result<Message> {
        let Some(message) = self.extensions.pipe(Stage::Outgoing, message).await else {
            debug!(id, "outgoing message dropped by extension");
            return Err(Error::Dropped);
        };

        let mut scheduler = (self.scheduler)(SchedulerOptions {
            timeout,
            interval: self.retry,
            attempts: options.attempts,
            deadline: options.deadline,
        });
        let deadline = options.deadline.unwrap_or(DEFAULT_DEADLINE);
        let room = match options.attempts {
            Some(1) => None,
            _ => Some(deadline),
        };
        let outcome =
            tokio::time::timeout(deadline, self.attempt(&id, &message, scheduler.as_mut(), room))
                .await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                scheduler.abort();
                warn!(id, channel = message.channel, "delivery deadline exceeded");
                Err(Error::Timeout(deadline))
            }
        }
    }

    async fn attempt(
        &self,
        id: &str,
        message: &Message,
        scheduler: &mut dyn Scheduler,
        room: Option<Duration>,
    ) -> Result<Message> {
        loop {
            if !scheduler.is_deliverable() {
                return Err(Error::DeliveryExpired {
                    attempts: scheduler.attempts(),
                });
            }
            scheduler.send();

            let (tx, rx) = oneshot::channel();
            self.await_reply(id, tx);
            let limit = attempt_limit(scheduler.timeout(), room);
            let exchange = async {
                let transport = self.pool.get().await?;
                self.sent_on(id, transport.id());
                transport.send(message.clone()).await?;
                rx.await.map_err(|_| TransportError::Closed)
            };

            let error = match tokio::time::timeout(limit, exchange).await {
                Ok(Ok(reply)) => {
                    scheduler.succeed();
                    return Ok(reply);
                }
                Ok(Err(error)) => Error::Transport(error),
                Err(_) => Error::Timeout(limit),
            };

            scheduler.fail();
            self.set_up(false);
            debug!(id, attempts = scheduler.attempts(), %error, "delivery attempt failed");
            if !scheduler.is_deliverable() {
                return Err(error);
            }
            tokio::time::sleep(scheduler.interval()).await;
        }
    }

    fn await_reply(&self, id: &str, reply: oneshot::Sender<Message>) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(envelope) = state.envelopes.get_mut(id) {
                envelope.reply = Some(reply);
            }
        }
    }

    fn sent_on(&self, id: &str, transport: TransportId) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(envelope) = state.envelopes.get_mut(id) {
                envelope.transport = Some(transport);
            }
        }
    }

    fn settle(&self, id: &str, serial: u64) {
        if let Ok(mut state) = self.state.lock() {
            if state.envelopes.get(id).is_some_and(|e| e.serial == serial) {
                state.envelopes.remove(id);
            }
        }
    }

    async fn handle_response(&self, message: Message) {
        let Some(message) = self.extensions.pipe(Stage::Incoming, message).await else {
            debug!("incoming message dropped by extension");
            return;
        };
        self.set_up(true);

        if message.is_reply() {
            let waiter = message.id.as_ref().and_then(|id| {
                let mut state = self.state.lock().ok()?;
                let waiter = state.envelopes.get_mut(id)?.reply.take();
                waiter
            });
            if let Some(waiter) = waiter {
                let _ = waiter.send(message);
                return;
            }
        }
        let _ = self.outbound.send(DispatcherEvent::Message(message));
    }

    /// A transport reported that its connection dropped.
    pub fn transport_down(&self, id: TransportId) {
        if !self.pool.down(id) {
            return;
        }
        self.set_up(false);
        self.abandon_attempts(id);

        let disconnecting = self.state.lock().map(|s| s.disconnecting).unwrap_or(true);
        if disconnecting {
            return;
        }
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(error) = pool.get().await {
                debug!(%error, "reselection after transport loss failed");
            }
        });
    }

    /// Fail the current attempt of every message sent through `transport`.
    /// Dropping the reply sender wakes the attempt with `Closed`.
    fn abandon_attempts(&self, transport: TransportId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let mut abandoned = 0;
        for envelope in state.envelopes.values_mut() {
            if envelope.transport == Some(transport) {
                envelope.transport = None;
                abandoned += usize::from(envelope.reply.take().is_some());
            }
        }
        if abandoned > 0 {
            debug!(%transport, abandoned, "failing attempts on lost transport");
        }
    }

    fn set_up(&self, up: bool) {
        let changed = match self.state.lock() {
            Ok(mut state) if state.up != Some(up) => {
                state.up = Some(up);
                true
            }
            _ => false,
        };
        if !changed {
            return;
        }
        if up {
            info!("transport up");
            let _ = self.outbound.send(DispatcherEvent::TransportUp);
        } else {
            warn!("transport down");
            let _ = self.outbound.send(DispatcherEvent::TransportDown);
        }
    }

    /// Cancel every in-flight delivery and close all transports.
    pub fn close(&self) {
        let deliveries: Vec<Delivery> = match self.state.lock() {
            Ok(mut state) => {
                state.disconnecting = true;
                state.envelopes.drain().map(|(_, e)| e.delivery).collect()
            }
            Err(_) => Vec::new(),
        };
        if !deliveries.is_empty() {
            debug!(count = deliveries.len(), "cancelling in-flight messages");
        }
        for delivery in deliveries {
            delivery.cancel();
        }
        self.pool.close();
    }
}

async fn inbound(
    dispatcher: Weak<Dispatcher>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Message(message) => dispatcher.handle_response(message).await,
            TransportEvent::Down(id) => dispatcher.transport_down(id),
        }
    }
}

/// Per-attempt limit. When retries are possible an attempt never spans the
/// whole deadline, so a silent attempt still leaves room for another.
fn attempt_limit(timeout: Duration, deadline: Option<Duration>) -> Duration {
    match deadline {
        Some(deadline) if timeout >= deadline => deadline / 2,
        _ => timeout,
    }
}

fn base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(char::from(DIGITS[(n % 36) as usize]));
        n /= 36;
    }
    digits.iter().rev().collect()
}

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{Event, Machine, State, Transition};
use super::subscription::{Phase, Subscription};
use crate::channels::{ChannelSet, Listener};
use crate::config::ClientOptions;
use crate::dispatcher::{Delivery, Dispatcher, DispatcherEvent, SendOptions};
use crate::extensions::{Extension, Extensions};
use crate::protocol::{Message, Reconnect, channel};
use crate::scheduler::{SchedulerFactory, default_factory};
use crate::transport::{Endpoint, TransportRegistry};
use crate::utils::error::{Error, Result, StateError};
use crate::utils::{Task, after};

/// Observable changes in the client's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged { from: State, to: State },
    TransportUp,
    TransportDown,
}

/// Per-publish delivery limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct ClientAdvice {
    interval: Duration,
    timeout: Duration,
}

/// A Bayeux client.
///
/// Cloning is cheap and every clone drives the same connection. The
/// connection is opened lazily by the first `subscribe`, `publish` or
/// `connect` and recovers on its own from handshake and transport failures.
/// Dropping the last clone closes every transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

pub(super) struct Inner {
    me: Weak<Inner>,
    options: Arc<ClientOptions>,
    allowed: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    extensions: Extensions,
    channels: Mutex<ChannelSet>,
    machine: Mutex<Machine>,
    entered: broadcast::Sender<State>,
    events: broadcast::Sender<ClientEvent>,
    advice: Mutex<ClientAdvice>,
    stage: Mutex<CancellationToken>,
}

impl Client {
    /// Build a client with the default transports. Must be called from
    /// within a tokio runtime.
    pub fn new(endpoint: &str, options: ClientOptions) -> Result<Self> {
        Self::builder(endpoint).options(options).build()
    }

    pub fn builder(endpoint: &str) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.dispatcher.client_id()
    }

    /// Connection state changes and transport up/down notifications.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.inner.extensions
    }

    /// Channels with at least one listener.
    pub fn channels(&self) -> Vec<String> {
        let mut names = self
            .inner
            .channels
            .lock()
            .map(|c| c.names())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Connection type of the transport in use, if one has been selected.
    pub fn connection_type(&self) -> Option<String> {
        self.inner
            .dispatcher
            .current_transport()
            .map(|t| t.connection_type().to_string())
    }

    /// Start connecting. Resolves once the client is connected and fails
    /// if it falls back to unconnected first.
    pub fn connect(&self) -> Task<()> {
        let wait = self.inner.wait_for_state(State::Connected, State::Unconnected);
        self.inner.transition(Event::Connect);
        Task::spawn(CancellationToken::new(), wait)
    }

    /// Attach `listener` to `channel`, which may be a glob pattern.
    ///
    /// The listener is registered at once. Only the first listener of a
    /// channel causes a `/meta/subscribe` round trip; later ones resolve
    /// immediately.
    pub fn subscribe(&self, channel: &str, listener: Listener) -> Subscription {
        self.inner.subscribe(channel, listener)
    }

    /// Detach `listener`. The server is told only when it was the last one.
    pub fn unsubscribe(&self, channel: &str, listener: &Listener) -> Task<()> {
        self.inner.unsubscribe(channel, listener)
    }

    /// Publish `data` on `channel`. Resolves with the server's reply.
    pub fn publish(&self, channel: &str, data: Value) -> Task<Message> {
        self.publish_with(channel, data, PublishOptions::default())
    }

    pub fn publish_with(&self, channel: &str, data: Value, options: PublishOptions) -> Task<Message> {
        self.inner.publish(channel, data, options)
    }

    /// Leave the server. Always completes locally, whatever the server
    /// answers, and drops every subscription.
    pub fn disconnect(&self) -> Task<()> {
        let wait = self.inner.wait_for_state(State::Unconnected, State::Connected);
        self.inner.transition(Event::Disconnect);
        Task::spawn(CancellationToken::new(), wait)
    }

    /// Drop the current session and handshake again. Acknowledged
    /// subscriptions are replayed under the new client id.
    pub fn reset(&self) {
        self.inner.transition(Event::Reset);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .field("allowed", &self.inner.allowed)
            .finish()
    }
}

impl Inner {
    fn state(&self) -> State {
        self.machine
            .lock()
            .map(|m| m.state())
            .unwrap_or(State::Unconnected)
    }

    fn advice(&self) -> ClientAdvice {
        self.advice.lock().map(|a| *a).unwrap_or(ClientAdvice {
            interval: self.options.interval(),
            timeout: self.options.timeout(),
        })
    }

    /// Queue `event` and, unless another caller is already doing so, apply
    /// queued events until none is left.
    fn transition(&self, event: Event) {
        let drive = match self.machine.lock() {
            Ok(mut machine) => machine.push(event),
            Err(_) => return,
        };
        if !drive {
            return;
        }
        loop {
            let step = match self.machine.lock() {
                Ok(mut machine) => machine.step(),
                Err(_) => None,
            };
            let Some(Transition { from, to, event }) = step else {
                break;
            };
            debug!(?from, ?to, ?event, "client transition");
            let stage = self.next_stage();
            self.enter(to, stage);
            let _ = self.entered.send(to);
            let _ = self.events.send(ClientEvent::StateChanged { from, to });
        }
    }

    /// Cancel whatever the previous state started and hand out a token for
    /// the state being entered.
    fn next_stage(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut stage) = self.stage.lock() {
            let previous = std::mem::replace(&mut *stage, token.clone());
            previous.cancel();
        }
        token
    }

    fn enter(&self, state: State, stage: CancellationToken) {
        match state {
            State::Unconnected => self.enter_unconnected(),
            State::Handshaking => self.handshake(stage),
            State::HandshakeWait => self.wait_to_handshake(stage),
            State::Connected => {
                tokio::spawn(connect_loop(self.me.clone(), self.dispatcher.clone(), stage));
            }
            State::ResetWait | State::Disconnecting => self.leave_server(stage),
        }
    }

    fn enter_unconnected(&self) {
        self.dispatcher.set_client_id(None);
        self.dispatcher.close();
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
        info!("disconnected");
    }

    fn handshake(&self, stage: CancellationToken) {
        self.dispatcher.set_client_id(None);
        self.dispatcher.select_transport(self.allowed.clone(), false);

        let timeout = self.options.timeout();
        let delivery = self.dispatcher.send_message(
            Message::handshake(self.allowed.clone()),
            timeout,
            SendOptions::default().deadline(timeout).token(stage.clone()),
        );
        let me = self.me.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = stage.cancelled() => return,
                outcome = delivery => outcome,
            };
            if let Some(client) = me.upgrade() {
                client.handshake_settled(outcome);
            }
        });
    }

    fn handshake_settled(&self, outcome: Result<Message>) {
        let reply = match outcome {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "handshake failed");
                self.transition(Event::Rehandshake);
                return;
            }
        };
        self.handle_advice(&reply);
        if !reply.is_successful() {
            warn!(error = %reply.protocol_error(), "handshake rejected");
            self.transition(Event::Rehandshake);
            return;
        }

        let supported = reply.supported_connection_types.unwrap_or_default();
        let mut types: Vec<String> = self
            .allowed
            .iter()
            .filter(|t| supported.contains(t))
            .cloned()
            .collect();
        if types.is_empty() {
            types = self.allowed.clone();
        }
        info!(client_id = ?reply.client_id, ?types, "handshake succeeded");
        self.dispatcher.set_client_id(reply.client_id);
        self.dispatcher.select_transport(types, true);
        self.resubscribe_all();
        self.transition(Event::HandshakeSuccess);
    }

    fn wait_to_handshake(&self, stage: CancellationToken) {
        let interval = self.advice().interval;
        debug!(?interval, "waiting before the next handshake");
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stage.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    if let Some(client) = me.upgrade() {
                        client.transition(Event::Timeout);
                    }
                }
            }
        });
    }

    fn leave_server(&self, stage: CancellationToken) {
        self.dispatcher.set_disconnecting();
        let timeout = self.options.timeout();
        let delivery = self.dispatcher.client_id().map(|client_id| {
            self.dispatcher.send_message(
                Message::disconnect(&client_id),
                timeout,
                SendOptions::attempts(1).deadline(timeout).token(stage.clone()),
            )
        });

        let me = self.me.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let acknowledged = match delivery {
                Some(delivery) => tokio::select! {
                    biased;
                    _ = stage.cancelled() => return,
                    outcome = settle(&me, delivery) => match outcome {
                        Ok(reply) => reply.is_successful(),
                        Err(error) => {
                            debug!(%error, "disconnect was not acknowledged");
                            false
                        }
                    },
                },
                None => false,
            };
            if stage.is_cancelled() {
                return;
            }
            dispatcher.close();
            if let Some(client) = me.upgrade() {
                client.transition(if acknowledged {
                    Event::DisconnectSuccess
                } else {
                    Event::DisconnectFailure
                });
            }
        });
    }

    /// Subscribe again to every channel the server had acknowledged, under
    /// the current client id.
    fn resubscribe_all(&self) {
        let names = self
            .channels
            .lock()
            .map(|c| c.established())
            .unwrap_or_default();
        let Some(client_id) = self.dispatcher.client_id() else {
            return;
        };
        for name in names {
            debug!(channel = name, "resubscribing");
            let delivery = self.dispatcher.send_message(
                Message::subscribe(&client_id, &name),
                self.options.timeout(),
                SendOptions::default(),
            );
            let me = self.me.clone();
            tokio::spawn(async move {
                match settle(&me, delivery).await {
                    Ok(reply) if !reply.is_successful() => {
                        warn!(channel = name, error = %reply.protocol_error(), "resubscribe rejected");
                    }
                    Err(error) if !error.is_cancelled() => {
                        warn!(channel = name, %error, "resubscribe failed");
                    }
                    _ => {}
                }
            });
        }
    }

    /// Merge the advice `message` carries and act on its reconnect field.
    fn handle_advice(&self, message: &Message) {
        let Some(advice) = &message.advice else {
            return;
        };
        if let Ok(mut current) = self.advice.lock() {
            if let Some(interval) = advice.interval() {
                current.interval = interval;
            }
            if let Some(timeout) = advice.timeout() {
                current.timeout = timeout;
            }
        }
        match advice.reconnect {
            Some(Reconnect::Handshake) => {
                info!("server advised a new handshake");
                self.transition(Event::Rehandshake);
            }
            Some(Reconnect::None) => {
                info!("server advised against reconnecting");
                self.transition(Event::Disconnect);
            }
            _ => {}
        }
    }

    /// An unsolicited message from the server.
    fn receive(&self, message: Message) {
        self.handle_advice(&message);
        if message.data.is_none() {
            return;
        }
        let listeners = match self.channels.lock() {
            Ok(channels) => channels.listeners_for(&message.channel),
            Err(_) => return,
        };
        debug!(channel = message.channel, listeners = listeners.len(), "distributing message");
        for listener in listeners {
            listener.call(&message);
        }
    }

    /// Resolves once `target` is entered, or at once if the client is
    /// already there. Fails if `reject` is entered first.
    fn wait_for_state(
        &self,
        target: State,
        reject: State,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let mut entered = self.entered.subscribe();
        let current = self.state();
        let me = self.me.clone();
        async move {
            if current == target {
                return Ok(());
            }
            loop {
                match entered.recv().await {
                    Ok(state) if state == target => return Ok(()),
                    Ok(state) if state == reject => {
                        return Err(StateError {
                            expected: target,
                            actual: state,
                        }
                        .into());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        let now = me.upgrade().ok_or(Error::Cancelled)?.state();
                        if now == target {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => return Err(Error::Cancelled),
                }
            }
        }
    }

    fn session(&self) -> Result<String> {
        self.dispatcher.client_id().ok_or_else(|| {
            StateError {
                expected: State::Connected,
                actual: self.state(),
            }
            .into()
        })
    }

    fn subscribe(&self, name: &str, listener: Listener) -> Subscription {
        let phase = Arc::new(Mutex::new(Phase::Pending));
        if !channel::is_valid(name) {
            let task = Task::ready(Err(Error::InvalidChannel(name.to_string())));
            return Subscription::new(self.me.clone(), name, listener, task, phase);
        }

        let created = match self.channels.lock() {
            Ok(mut channels) => channels.subscribe(name, listener.clone()),
            Err(_) => false,
        };
        if !created {
            if let Ok(mut p) = phase.lock() {
                *p = Phase::Established;
            }
            debug!(channel = name, "added listener to existing subscription");
            return Subscription::new(self.me.clone(), name, listener, Task::ready(Ok(())), phase);
        }

        let wait = self.wait_for_state(State::Connected, State::Unconnected);
        self.transition(Event::Connect);

        let token = CancellationToken::new();
        let me = self.me.clone();
        let channel = name.to_string();
        let subscriber = listener.clone();
        let progress = phase.clone();
        let request = token.clone();
        let task = Task::spawn(token, async move {
            wait.await?;
            let (dispatcher, client_id, timeout) = {
                let client = me.upgrade().ok_or(Error::Cancelled)?;
                (client.dispatcher.clone(), client.session()?, client.options.timeout())
            };
            let delivery = dispatcher.send_message(
                Message::subscribe(&client_id, &channel),
                timeout,
                SendOptions::default().token(request),
            );
            let reply = settle(&me, delivery).await?;
            if !reply.is_successful() {
                return Err(reply.protocol_error().into());
            }

            let cancelled = match progress.lock() {
                Ok(phase) if *phase == Phase::Cancelled => true,
                Ok(mut phase) => {
                    *phase = Phase::Established;
                    false
                }
                Err(_) => false,
            };
            let client = me.upgrade().ok_or(Error::Cancelled)?;
            if cancelled {
                debug!(channel, "subscription cancelled while in flight");
                let _ = client.unsubscribe(&channel, &subscriber);
                return Ok(());
            }
            if let Ok(mut channels) = client.channels.lock() {
                channels.set_established(&channel, true);
            }
            info!(channel, "subscribed");
            Ok(())
        });

        let me = self.me.clone();
        let channel = name.to_string();
        let subscriber = listener.clone();
        let task = after(task, move |outcome| {
            let Err(error) = outcome else {
                return;
            };
            if !error.is_cancelled() {
                warn!(channel, %error, "subscribe failed");
            }
            if let Some(client) = me.upgrade() {
                if let Ok(mut channels) = client.channels.lock() {
                    channels.unsubscribe(&channel, &subscriber);
                }
            }
        });
        Subscription::new(self.me.clone(), name, listener, task, phase)
    }

    pub(super) fn unsubscribe(&self, name: &str, listener: &Listener) -> Task<()> {
        let last = match self.channels.lock() {
            Ok(mut channels) => channels.unsubscribe(name, listener),
            Err(_) => false,
        };
        if !last {
            return Task::ready(Ok(()));
        }
        let Some(client_id) = self.dispatcher.client_id() else {
            return Task::ready(Ok(()));
        };

        let token = CancellationToken::new();
        let delivery = self.dispatcher.send_message(
            Message::unsubscribe(&client_id, name),
            self.options.timeout(),
            SendOptions::default().token(token.clone()),
        );
        let me = self.me.clone();
        let channel = name.to_string();
        Task::spawn(token, async move {
            let reply = settle(&me, delivery).await?;
            if !reply.is_successful() {
                return Err(reply.protocol_error().into());
            }
            info!(channel, "unsubscribed");
            Ok(())
        })
    }

    fn publish(&self, name: &str, data: Value, options: PublishOptions) -> Task<Message> {
        if !channel::is_valid(name) || channel::is_pattern(name) || channel::is_meta(name) {
            return Task::ready(Err(Error::InvalidChannel(name.to_string())));
        }

        let wait = self.wait_for_state(State::Connected, State::Unconnected);
        self.transition(Event::Connect);

        let token = CancellationToken::new();
        let request = token.clone();
        let me = self.me.clone();
        let channel = name.to_string();
        Task::spawn(token, async move {
            wait.await?;
            let (dispatcher, client_id, timeout) = {
                let client = me.upgrade().ok_or(Error::Cancelled)?;
                (client.dispatcher.clone(), client.session()?, client.options.timeout())
            };
            let delivery = dispatcher.send_message(
                Message::publish(&channel, Some(&client_id), data),
                timeout,
                SendOptions {
                    attempts: options.attempts,
                    deadline: options.deadline,
                    token: Some(request),
                },
            );
            let reply = settle(&me, delivery).await?;
            if !reply.is_successful() {
                return Err(reply.protocol_error().into());
            }
            Ok(reply)
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(stage) = self.stage.lock() {
            stage.cancel();
        }
        self.dispatcher.close();
    }
}

/// Await a reply and apply any advice it carries.
async fn settle(client: &Weak<Inner>, delivery: Delivery) -> Result<Message> {
    let reply = delivery.await?;
    if let Some(client) = client.upgrade() {
        client.handle_advice(&reply);
    }
    Ok(reply)
}

/// Keeps one `/meta/connect` outstanding for as long as the client stays
/// connected.
async fn connect_loop(client: Weak<Inner>, dispatcher: Arc<Dispatcher>, stage: CancellationToken) {
    let run = async {
        loop {
            let Some(inner) = client.upgrade() else {
                return;
            };
            let advice = inner.advice();
            let retry = inner.options.retry();
            drop(inner);

            let Some(client_id) = dispatcher.client_id() else {
                return;
            };
            let connection_type = match dispatcher.connection_type().await {
                Ok(connection_type) => connection_type,
                Err(error) => {
                    debug!(%error, "no transport for connect");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };

            let limit = advice.timeout.mul_f64(1.2).max(retry);
            let delivery = dispatcher.send_message(
                Message::connect(&client_id, &connection_type),
                limit,
                SendOptions::attempts(1)
                    .deadline(limit + retry)
                    .token(stage.clone()),
            );
            match settle(&client, delivery).await {
                Ok(reply) if reply.is_successful() => {
                    let interval = client
                        .upgrade()
                        .map_or(advice.interval, |c| c.advice().interval);
                    tokio::time::sleep(interval).await;
                }
                Ok(reply) => {
                    warn!(error = %reply.protocol_error(), "connect rejected");
                    tokio::time::sleep(retry).await;
                }
                Err(error) => {
                    debug!(%error, "connect failed");
                    tokio::time::sleep(retry).await;
                }
            }
        }
    };
    tokio::select! {
        _ = stage.cancelled() => {}
        _ = run => {}
    }
}

async fn run_events(client: Weak<Inner>, mut events: mpsc::UnboundedReceiver<DispatcherEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        match event {
            DispatcherEvent::Message(message) => client.receive(message),
            DispatcherEvent::TransportUp => {
                let _ = client.events.send(ClientEvent::TransportUp);
            }
            DispatcherEvent::TransportDown => {
                let _ = client.events.send(ClientEvent::TransportDown);
            }
        }
    }
}

pub struct ClientBuilder {
    endpoint: String,
    options: ClientOptions,
    registry: TransportRegistry,
    scheduler: SchedulerFactory,
    extensions: Extensions,
}

impl ClientBuilder {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            options: ClientOptions::default(),
            registry: TransportRegistry::default(),
            scheduler: default_factory(),
            extensions: Extensions::new(),
        }
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the transports the client may choose from.
    pub fn registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerFactory) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn extension(self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.add(extension);
        self
    }

    /// Validate the configuration and start the client's background
    /// loops. Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Client> {
        let options = self.options;
        options.validate()?;
        if let Some(types) = &options.connection_types {
            if let Some(unknown) = types.iter().find(|t| !self.registry.contains(t)) {
                return Err(Error::Config(format!("unknown connection type '{unknown}'")));
            }
        }
        let endpoint = Endpoint::parse(&self.endpoint, &options.endpoints)?;

        let allowed: Vec<String> = options
            .connection_types
            .clone()
            .unwrap_or_else(|| self.registry.connection_types())
            .into_iter()
            .filter(|t| !options.disabled.contains(t))
            .collect();
        if allowed.is_empty() {
            return Err(Error::Config("every connection type is disabled".to_string()));
        }

        let advice = ClientAdvice {
            interval: options.interval(),
            timeout: options.timeout(),
        };
        let options = Arc::new(options);
        let (dispatcher, events) = Dispatcher::new(
            endpoint,
            options.clone(),
            self.registry,
            self.scheduler,
            self.extensions.clone(),
        );
        let (entered, _) = broadcast::channel(64);
        let (notifications, _) = broadcast::channel(256);

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            options,
            allowed,
            dispatcher,
            extensions: self.extensions,
            channels: Mutex::new(ChannelSet::new()),
            machine: Mutex::new(Machine::new()),
            entered,
            events: notifications,
            advice: Mutex::new(advice),
            stage: Mutex::new(CancellationToken::new()),
        });
        tokio::spawn(run_events(Arc::downgrade(&inner), events));
        debug!(endpoint = %self.endpoint, allowed = ?inner.allowed, "client created");
        Ok(Client { inner })
    }
}

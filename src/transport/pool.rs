//! Transport selection
//!
//! The pool keeps at most one transport per connection type and resolves
//! "the best usable transport" as a shared future. Candidates race; the
//! first one to connect wins, and losing connects keep running so their
//! transports stay cached for a later reselection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use super::{EventSink, Transport, TransportContext, TransportId};
use crate::config::ClientOptions;
use crate::transport::{Endpoint, TransportRegistry};
use crate::utils::TransportError;

type Selection = Shared<BoxFuture<'static, Result<Arc<dyn Transport>, TransportError>>>;
type Ready = Shared<BoxFuture<'static, Result<(), TransportError>>>;

const PENDING: u8 = 0;
const CONNECTED: u8 = 1;
const FAILED: u8 = 2;

struct Entry {
    transport: Arc<dyn Transport>,
    ready: Ready,
    status: Arc<AtomicU8>,
}

#[derive(Default)]
struct PoolState {
    allowed: Vec<String>,
    entries: HashMap<String, Entry>,
    selection: Option<(u64, Selection)>,
    generation: u64,
}

struct PoolInner {
    registry: TransportRegistry,
    endpoint: Endpoint,
    context: TransportContext,
    state: Mutex<PoolState>,
}

#[derive(Clone)]
pub struct TransportPool {
    inner: Arc<PoolInner>,
}

impl TransportPool {
    pub fn new(
        registry: TransportRegistry,
        endpoint: Endpoint,
        options: Arc<ClientOptions>,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                registry,
                endpoint,
                context: TransportContext { options, events },
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn allowed(&self) -> Vec<String> {
        self.lock().map(|s| s.allowed.clone()).unwrap_or_default()
    }

    /// Replace the allowed connection types. With `cleanup`, transports of
    /// types no longer allowed are closed.
    pub fn set_allowed(&self, types: Vec<String>, cleanup: bool) {
        let evicted: Vec<Arc<dyn Transport>> = match self.lock() {
            Ok(mut state) => {
                state.allowed = types;
                state.selection = None;
                if cleanup {
                    let allowed = state.allowed.clone();
                    let stale: Vec<String> = state
                        .entries
                        .keys()
                        .filter(|t| !allowed.contains(t))
                        .cloned()
                        .collect();
                    stale
                        .iter()
                        .filter_map(|t| state.entries.remove(t))
                        .map(|e| e.transport)
                        .collect()
                } else {
                    Vec::new()
                }
            }
            Err(_) => return,
        };
        close_all(evicted);
    }

    /// The selected transport, selecting one first if needed.
    pub async fn get(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let (generation, selection) = {
            let mut state = self.lock()?;
            if let Some(selected) = state.selection.clone() {
                selected
            } else {
                let selection = self.reselect(&mut state);
                state.generation += 1;
                let generation = state.generation;
                state.selection = Some((generation, selection.clone()));
                (generation, selection)
            }
        };

        let result = selection.await;
        if result.is_err() {
            if let Ok(mut state) = self.lock() {
                if matches!(&state.selection, Some((g, _)) if *g == generation) {
                    state.selection = None;
                }
            }
        }
        result
    }

    /// The selected transport, if selection has already succeeded.
    pub fn current(&self) -> Option<Arc<dyn Transport>> {
        let state = self.lock().ok()?;
        let (_, selection) = state.selection.as_ref()?;
        selection.peek()?.as_ref().ok().cloned()
    }

    /// Evict the transport with `id`. Returns `true` when it was pooled.
    pub fn down(&self, id: TransportId) -> bool {
        let evicted = match self.lock() {
            Ok(mut state) => {
                let Some(connection_type) = state
                    .entries
                    .iter()
                    .find(|(_, e)| e.transport.id() == id)
                    .map(|(t, _)| t.clone())
                else {
                    return false;
                };
                let entry = state.entries.remove(&connection_type);
                let selected_elsewhere = matches!(
                    state.selection.as_ref().and_then(|(_, s)| s.peek()),
                    Some(Ok(t)) if t.id() != id
                );
                if !selected_elsewhere {
                    state.selection = None;
                }
                entry
            }
            Err(_) => return false,
        };
        if let Some(entry) = evicted {
            warn!(%id, connection_type = entry.transport.connection_type(), "transport down");
            close_all(vec![entry.transport]);
        }
        true
    }

    /// Close every pooled transport and forget the selection.
    pub fn close(&self) {
        let transports: Vec<Arc<dyn Transport>> = match self.lock() {
            Ok(mut state) => {
                state.selection = None;
                state.entries.drain().map(|(_, e)| e.transport).collect()
            }
            Err(_) => return,
        };
        if !transports.is_empty() {
            debug!(count = transports.len(), "closing pooled transports");
        }
        close_all(transports);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolState>, TransportError> {
        self.inner.state.lock().map_err(|_| TransportError::Closed)
    }

    fn reselect(&self, state: &mut PoolState) -> Selection {
        let options = &self.inner.context.options;
        let mut candidates = Vec::new();

        for connection_type in state.allowed.clone() {
            if options.disabled.contains(&connection_type) {
                continue;
            }
            let Some(factory) = self.inner.registry.get(&connection_type) else {
                continue;
            };
            let url = self.inner.endpoint.url_for(&connection_type);
            if !factory.is_usable(url, options) {
                debug!(connection_type, %url, "transport not usable");
                continue;
            }

            let reusable = state
                .entries
                .get(&connection_type)
                .is_some_and(|e| e.status.load(Ordering::SeqCst) != FAILED);
            if !reusable {
                if let Some(stale) = state.entries.remove(&connection_type) {
                    close_all(vec![stale.transport]);
                }
                match factory.create(url.clone(), self.inner.context.clone()) {
                    Ok(transport) => {
                        let entry = Entry::start(transport, options.timeout());
                        state.entries.insert(connection_type.clone(), entry);
                    }
                    Err(error) => {
                        warn!(connection_type, %error, "could not create transport");
                        continue;
                    }
                }
            }
            if let Some(entry) = state.entries.get(&connection_type) {
                candidates.push((
                    entry.transport.clone(),
                    entry.ready.clone(),
                    entry.status.clone(),
                ));
            }
        }

        let allowed = state.allowed.join(", ");
        async move {
            if candidates.is_empty() {
                return Err(TransportError::NoTransport(format!(
                    "none of [{allowed}] is usable"
                )));
            }
            if let Some((transport, _, _)) = candidates
                .iter()
                .find(|(_, _, status)| status.load(Ordering::SeqCst) == CONNECTED)
            {
                return Ok(transport.clone());
            }

            let count = candidates.len();
            let mut racing: FuturesUnordered<_> = candidates
                .into_iter()
                .enumerate()
                .map(|(rank, (transport, ready, _))| async move {
                    (rank, transport, ready.await)
                })
                .collect();

            let mut errors: Vec<Option<TransportError>> = vec![None; count];
            while let Some((rank, transport, outcome)) = racing.next().await {
                match outcome {
                    Ok(()) => {
                        info!(
                            connection_type = transport.connection_type(),
                            id = %transport.id(),
                            "selected transport"
                        );
                        return Ok(transport);
                    }
                    Err(error) => errors[rank] = Some(error),
                }
            }
            Err(errors
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_else(|| TransportError::NoTransport(allowed)))
        }
        .boxed()
        .shared()
    }
}

impl Entry {
    /// Start connecting `transport` in the background. A connect still
    /// pending after `limit` fails, so the next selection builds a fresh
    /// transport.
    fn start(transport: Arc<dyn Transport>, limit: Duration) -> Self {
        let status = Arc::new(AtomicU8::new(PENDING));
        let connecting = transport.clone();
        let flag = status.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::time::timeout(limit, connecting.connect())
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Connect(format!(
                        "no connection after {}s",
                        limit.as_secs_f64()
                    )))
                });
            let value = if outcome.is_ok() { CONNECTED } else { FAILED };
            flag.store(value, Ordering::SeqCst);
            if let Err(error) = &outcome {
                warn!(
                    connection_type = connecting.connection_type(),
                    %error,
                    "transport failed to connect"
                );
            }
            outcome
        });
        let ready = async move { handle.await.unwrap_or(Err(TransportError::Closed)) }
            .boxed()
            .shared();
        Self {
            transport,
            ready,
            status,
        }
    }
}

fn close_all(transports: Vec<Arc<dyn Transport>>) {
    if transports.is_empty() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        for transport in transports {
            transport.close().await;
        }
    });
}

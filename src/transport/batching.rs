//! Outbox shared by the request/response transports.
//!
//! Messages handed to [`Batcher::send`] accumulate in an outbox that is
//! flushed as one request once a short delay expires. A batch that would
//! reach the maximum request size is flushed at once, minus the message
//! that pushed it over, which starts the next batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{EventSink, TransportEvent};
use crate::protocol::{Advice, Message, channel, encode_messages};
use crate::utils::TransportError;

/// Delay before flushing an outbox holding a handshake.
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(10);

/// Performs one HTTP exchange for a batch of messages.
#[async_trait]
pub trait BatchRequest: Send + Sync + 'static {
    async fn request(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError>;

    /// Size of the request that would carry `messages`.
    fn encoded_len(&self, messages: &[Message]) -> usize {
        encode_messages(messages).map_or(usize::MAX, |body| body.len())
    }
}

type Waiter = oneshot::Sender<Result<(), TransportError>>;

#[derive(Default)]
struct Outbox {
    messages: Vec<Message>,
    waiters: Vec<Waiter>,
    flush_scheduled: bool,
}

struct Inner<R> {
    request: R,
    events: EventSink,
    max_request_size: usize,
    max_delay: Duration,
    outbox: Mutex<Outbox>,
    closed: AtomicBool,
}

pub struct Batcher<R> {
    inner: Arc<Inner<R>>,
}

impl<R: BatchRequest> Batcher<R> {
    pub fn new(request: R, events: EventSink, max_request_size: usize, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                request,
                events,
                max_request_size,
                max_delay,
                outbox: Mutex::new(Outbox::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn request(&self) -> &R {
        &self.inner.request
    }

    /// Queue `message` and wait until the request carrying it completes.
    ///
    /// Replies are pushed to the event sink before this returns. Dropping
    /// the returned future withdraws the message if its batch has not left
    /// yet.
    pub async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let overflow = self.enqueue(message, tx)?;

        if let Some((messages, waiters)) = overflow {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.dispatch(messages, waiters).await });
        }

        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    fn enqueue(
        &self,
        message: Message,
        waiter: Waiter,
    ) -> Result<Option<(Vec<Message>, Vec<Waiter>)>, TransportError> {
        let mut outbox = self
            .inner
            .outbox
            .lock()
            .map_err(|_| TransportError::Closed)?;
        let delay = if message.channel == channel::HANDSHAKE {
            HANDSHAKE_DELAY
        } else {
            self.inner.max_delay
        };
        outbox.messages.push(message);
        outbox.waiters.push(waiter);

        let mut overflow = None;
        if outbox.messages.len() > 1
            && self.inner.request.encoded_len(&outbox.messages) >= self.inner.max_request_size
        {
            if let (Some(last), Some(last_waiter)) = (outbox.messages.pop(), outbox.waiters.pop()) {
                let messages = std::mem::take(&mut outbox.messages);
                let waiters = std::mem::take(&mut outbox.waiters);
                debug!(size = messages.len(), "request size limit reached, flushing early");
                outbox.messages.push(last);
                outbox.waiters.push(last_waiter);
                overflow = Some((messages, waiters));
            }
        }

        if !outbox.flush_scheduled {
            outbox.flush_scheduled = true;
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(flush_after(weak, delay));
        }
        Ok(overflow)
    }

    /// Fail every queued message and refuse new ones.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut outbox) = self.inner.outbox.lock() {
            outbox.messages.clear();
            for waiter in outbox.waiters.drain(..) {
                let _ = waiter.send(Err(TransportError::Closed));
            }
        }
    }
}

async fn flush_after<R: BatchRequest>(inner: Weak<Inner<R>>, delay: Duration) {
    tokio::time::sleep(delay).await;
    if let Some(inner) = inner.upgrade() {
        inner.flush().await;
    }
}

impl<R: BatchRequest> Inner<R> {
    async fn flush(&self) {
        let (messages, waiters) = match self.outbox.lock() {
            Ok(mut outbox) => {
                outbox.flush_scheduled = false;
                (
                    std::mem::take(&mut outbox.messages),
                    std::mem::take(&mut outbox.waiters),
                )
            }
            Err(_) => return,
        };
        self.dispatch(messages, waiters).await;
    }

    async fn dispatch(&self, messages: Vec<Message>, waiters: Vec<Waiter>) {
        let (mut messages, waiters): (Vec<Message>, Vec<Waiter>) = messages
            .into_iter()
            .zip(waiters)
            .filter(|(_, waiter)| !waiter.is_closed())
            .unzip();
        if messages.is_empty() {
            return;
        }

        if messages.len() > 1 {
            for message in messages.iter_mut().filter(|m| m.channel == channel::CONNECT) {
                message.advice = Some(Advice {
                    timeout: Some(0.0),
                    ..Advice::default()
                });
            }
        }

        debug!(count = messages.len(), "sending batch");
        match self.request.request(messages).await {
            Ok(replies) => {
                for reply in replies {
                    let _ = self.events.send(TransportEvent::Message(reply));
                }
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(error) => {
                warn!(%error, "batch request failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }
}

//! Cancellable, cloneable handles for the client's asynchronous operations.
//!
//! A [`Task`] owns a spawned future and a [`CancellationToken`]. Cancelling
//! the token settles the task with [`Error::Cancelled`] and drops the
//! future, which in turn lets any child operations started under
//! `token.child_token()` observe the cancellation.
//!
//! Two combinators control how cancellation and settlement travel between
//! composed tasks:
//! - [`barrier`] isolates a future from its caller's cancellation.
//! - [`after`] runs a continuation once a task settles, whatever the outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::utils::error::{Error, Result};

pub struct Task<T: Clone> {
    result: Shared<BoxFuture<'static, Result<T>>>,
    token: CancellationToken,
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `fut` on the runtime, racing it against `token`.
    pub fn spawn<F>(token: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let guard = token.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = guard.cancelled() => Err(Error::Cancelled),
                result = fut => result,
            };
            let _ = tx.send(outcome);
        });

        Self {
            result: rx
                .map(|received| received.unwrap_or(Err(Error::Cancelled)))
                .boxed()
                .shared(),
            token,
        }
    }

    /// A task that has already settled.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            result: futures::future::ready(result).boxed().shared(),
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The outcome, if the task has settled and been polled since.
    pub fn peek(&self) -> Option<&Result<T>> {
        self.result.peek()
    }
}

impl<T: Clone> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            token: self.token.clone(),
        }
    }
}

impl<T: Clone> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl<T: Clone> Future for Task<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx)
    }
}

/// Run `fut` so that it settles on its own terms.
///
/// Cancelling the returned handle settles the handle with
/// [`Error::Cancelled`] but leaves `fut` running to completion.
pub fn barrier<T, F>(fut: F) -> Task<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let inner = Task::spawn(CancellationToken::new(), fut);
    Task::spawn(CancellationToken::new(), inner)
}

/// Run `cont` once `task` settles, including when it was cancelled.
///
/// Returns `task` unchanged so calls can be chained.
pub fn after<T, C>(task: Task<T>, cont: C) -> Task<T>
where
    T: Clone + Send + Sync + 'static,
    C: FnOnce(&Result<T>) + Send + 'static,
{
    let watched = task.clone();
    tokio::spawn(async move {
        let outcome = watched.await;
        cont(&outcome);
    });
    task
}

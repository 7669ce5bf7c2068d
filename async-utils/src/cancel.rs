//! Cooperative cancellation scopes.
//!
//! A [`CancelScope`] pairs a [`CancellationToken`] with the optional reason
//! supplied by whoever requested the cancellation. Every task spawned through
//! [`crate::spawn_cancellable`] runs with its own scope installed as the
//! task-local *current* scope, which is what lets [`crate::cancel_and_wait`]
//! tell "my caller was cancelled" apart from "the task I cancelled ended".

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static CURRENT_SCOPE: CancelScope;
}

/// Raised at a suspend point once the surrounding scope has been cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("operation cancelled{}", reason_suffix(.reason))]
pub struct Cancelled {
    reason: Option<String>,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

impl Cancelled {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Cancellation flag shared between a task and whoever owns its handle.
#[derive(Clone, Debug, Default)]
pub struct CancelScope {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The first reason supplied is kept.
    pub fn cancel(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    /// Whether a cancellation request is pending against this scope.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The signal a task should return once it observes the cancellation.
    pub fn error(&self) -> Cancelled {
        Cancelled::new(self.reason())
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Non-suspending check: `Err` if a cancellation is pending.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless the scope gets cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::time::sleep(duration).or_cancel(self).await
    }
}

/// Returns the scope of the task currently executing, if it was started via
/// [`crate::spawn_cancellable`] or wrapped in [`with_scope`].
///
/// `None` means the caller's cancellation state cannot be inspected.
pub fn current_scope() -> Option<CancelScope> {
    CURRENT_SCOPE.try_with(CancelScope::clone).ok()
}

/// Runs `fut` with `scope` installed as the current scope.
pub fn with_scope<F: Future>(scope: CancelScope, fut: F) -> impl Future<Output = F::Output> {
    CURRENT_SCOPE.scope(scope, fut)
}

#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Races `self` against `scope`. A scope that is already cancelled wins
    /// without polling `self`.
    async fn or_cancel(self, scope: &CancelScope) -> Result<Self::Output, Cancelled>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, scope: &CancelScope) -> Result<Self::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(scope.error()),
            output = self => Ok(output),
        }
    }
}

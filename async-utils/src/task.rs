use std::any::Any;
use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use tracing::Instrument;
use tracing::trace;

use crate::cancel::CancelScope;
use crate::cancel::Cancelled;
use crate::cancel::current_scope;
use crate::cancel::with_scope;

/// Terminal state of a task spawned with [`spawn_cancellable`].
#[derive(Debug)]
pub enum TaskExit<T> {
    /// The task returned a value.
    Completed(T),
    /// The task unwound with the cancellation signal.
    Cancelled(Cancelled),
    /// The task panicked; carries the panic message.
    Panicked(String),
}

/// Handle to a cooperatively cancellable task. Dropping it aborts the task.
pub struct TaskHandle<T> {
    name: String,
    scope: CancelScope,
    join: AbortOnDropHandle<Result<T, Cancelled>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Signals cancellation without waiting. See [`cancel_and_wait`].
    pub fn cancel(&self, reason: Option<String>) {
        self.scope.cancel(reason);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task to terminate.
    pub async fn join(self) -> TaskExit<T> {
        exit_from(self.join.await)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("cancelled", &self.scope.is_cancelled())
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

/// Spawns `f` on the tokio scheduler with a fresh [`CancelScope`].
///
/// The scope is handed to `f` and also installed as the task's current scope.
/// The task acknowledges a cancellation by returning `Err(Cancelled)`.
pub fn spawn_cancellable<F, Fut, T>(name: impl Into<String>, f: F) -> TaskHandle<T>
where
    F: FnOnce(CancelScope) -> Fut,
    Fut: Future<Output = Result<T, Cancelled>> + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    let scope = CancelScope::new();
    let fut = with_scope(scope.clone(), f(scope.clone()));
    let join = tokio::spawn(fut.instrument(tracing::Span::current()));
    trace!(task = %name, "spawned cancellable task");
    TaskHandle {
        name,
        scope,
        join: AbortOnDropHandle::new(join),
    }
}

#[derive(Debug, Error)]
pub enum CancelAndWaitError {
    /// The caller itself was cancelled while waiting; propagate it.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("cancelled task `{task}` did not end with a cancellation")]
    NotCancelled { task: String },

    #[error("cancelled task `{task}` panicked: {message}")]
    TaskFailed { task: String, message: String },
}

/// Cancels `task` and waits until it terminates.
///
/// Returns `Ok(())` when the task acknowledged the cancellation. If the
/// caller's own scope was cancelled in the meantime, that cancellation is
/// returned instead so it keeps propagating. A task that swallows the signal
/// and returns normally is reported as [`CancelAndWaitError::NotCancelled`].
///
/// When the caller runs outside any [`CancelScope`] its cancellation state is
/// unknown and the call returns `Ok(())` as soon as the target acknowledged.
///
/// A scope's cancellation cannot be consumed or reset. Once the caller's
/// scope is cancelled, every later call made from it returns
/// [`CancelAndWaitError::Cancelled`], even if the caller already handled the
/// first one. A caller that recovers and keeps working should do so inside a
/// fresh scope, e.g. `with_scope(CancelScope::new(), ...)`.
pub async fn cancel_and_wait<T>(
    task: TaskHandle<T>,
    reason: Option<String>,
) -> Result<(), CancelAndWaitError> {
    let TaskHandle { name, scope, join } = task;
    scope.cancel(reason);

    match exit_from(join.await) {
        TaskExit::Cancelled(_) => match current_scope() {
            Some(caller) if caller.is_cancelled() => {
                trace!(task = %name, "caller was cancelled while waiting");
                Err(CancelAndWaitError::Cancelled(caller.error()))
            }
            _ => Ok(()),
        },
        TaskExit::Completed(_) => Err(CancelAndWaitError::NotCancelled { task: name }),
        TaskExit::Panicked(message) => Err(CancelAndWaitError::TaskFailed {
            task: name,
            message,
        }),
    }
}

fn exit_from<T>(result: Result<Result<T, Cancelled>, JoinError>) -> TaskExit<T> {
    match result {
        Ok(Ok(value)) => TaskExit::Completed(value),
        Ok(Err(cancelled)) => TaskExit::Cancelled(cancelled),
        Err(err) => match err.try_into_panic() {
            Ok(payload) => TaskExit::Panicked(panic_message(payload.as_ref())),
            // Aborted through the join handle rather than the scope.
            Err(_) => TaskExit::Cancelled(Cancelled::new(Some("aborted".to_string()))),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

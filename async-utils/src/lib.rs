//! Cooperative task cancellation on top of tokio.

mod cancel;
mod task;

pub use cancel::CancelScope;
pub use cancel::Cancelled;
pub use cancel::OrCancelExt;
pub use cancel::current_scope;
pub use cancel::with_scope;
pub use task::CancelAndWaitError;
pub use task::TaskExit;
pub use task::TaskHandle;
pub use task::cancel_and_wait;
pub use task::spawn_cancellable;

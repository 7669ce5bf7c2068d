//! Scoped start/finish logging.
//!
//! A [`ContextLogger`] wraps a block of work and logs one line when the block
//! starts and exactly one line when it ends, whether it succeeded or not:
//!
//! ```text
//! [STARTED    ] lint
//! [IN PROGRESS] lint [1m 0s]
//! [FINISHED   ] lint 3 files [1m 12s]
//! ```
//!
//! In status mode only the final line is logged, tagged `STATUS`. The async
//! variant additionally pings an `IN PROGRESS` line every `ping` interval
//! while the block is running.

use std::borrow::Cow;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use devkit_async_utils::CancelAndWaitError;
use devkit_async_utils::CancelScope;
use devkit_async_utils::Cancelled;
use devkit_async_utils::TaskHandle;
use devkit_async_utils::cancel_and_wait;
use devkit_async_utils::spawn_cancellable;
use thiserror::Error;
use tracing::Level;

use crate::elapsed::format_elapsed;
use crate::short_type_name;

const TAG_STARTED: &str = "STARTED";
const TAG_IN_PROGRESS: &str = "IN PROGRESS";
const TAG_FINISHED: &str = "FINISHED";
const TAG_EXCEPTION: &str = "EXCEPTION";
const TAG_STATUS: &str = "STATUS";

const DEFAULT_PING: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ContextLoggerError {
    #[error("cannot enter context logger `{0}` while it is already in progress")]
    AlreadyRunning(String),

    #[error("failed to stop the progress ping: {0}")]
    Ping(#[from] CancelAndWaitError),
}

/// Writes one rendered line at `level`, attributed to `caller`.
#[doc(hidden)]
pub type Emitter = fn(Level, &str, &str);

/// Builds a [`ContextLogger`] attributed to the invoking module: its lines
/// use that module as their `tracing` target.
///
/// ```ignore
/// let log = context_logger!("lint {}", path.display());
/// ```
#[macro_export]
macro_rules! context_logger {
    ($($arg:tt)+) => {
        $crate::ContextLogger::new(format!($($arg)+))
            .caller(module_path!())
            .emitter(|level, caller, line| $crate::emit!(level, caller, "{}", line))
    };
}

/// Logs a single `STATUS` line with the invoking module as its target.
///
/// ```ignore
/// context_status!(&rendered, "- skipped");
/// ```
#[macro_export]
macro_rules! context_status {
    ($message:expr $(, $postfix:expr)* $(,)?) => {
        $crate::ContextLogger::status_with(
            |level, caller, line| $crate::emit!(level, caller, "{}", line),
            $crate::__tracing::Level::INFO,
            module_path!(),
            $message,
            &[$($postfix),*],
        )
    };
}

/// See the [module documentation](self).
///
/// Clones share the same scope state, so a clone handed to the body of
/// [`ContextLogger::scope_async`] can add postfixes to the final line.
#[derive(Clone, Debug)]
pub struct ContextLogger {
    line: Arc<LineFormat>,
    status_mode: bool,
    ping: Duration,
    state: Arc<Mutex<ScopeState>>,
}

#[derive(Clone, Debug)]
struct LineFormat {
    msg: String,
    level: Level,
    caller: Cow<'static, str>,
    emitter: Emitter,
}

#[derive(Debug)]
struct ScopeState {
    running: bool,
    start: DateTime<Utc>,
    postfixes: Vec<String>,
    ping_task: Option<TaskHandle<()>>,
}

impl ContextLogger {
    /// Logger for `msg` at `INFO`, attributed to the calling source location.
    #[track_caller]
    pub fn new(msg: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            line: Arc::new(LineFormat {
                msg: msg.into(),
                level: Level::INFO,
                caller: Cow::Owned(format!("{}:{}", location.file(), location.line())),
                emitter: emit_here,
            }),
            status_mode: false,
            ping: DEFAULT_PING,
            state: Arc::new(Mutex::new(ScopeState {
                running: false,
                start: Utc::now(),
                postfixes: Vec::new(),
                ping_task: None,
            })),
        }
    }

    /// Only log once, on exit, tagged `STATUS`.
    pub fn status_mode(mut self, status_mode: bool) -> Self {
        self.status_mode = status_mode;
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        Arc::make_mut(&mut self.line).level = level;
        self
    }

    /// Attribute the records to `caller` instead of the construction site.
    pub fn caller(mut self, caller: impl Into<Cow<'static, str>>) -> Self {
        Arc::make_mut(&mut self.line).caller = caller.into();
        self
    }

    /// Routes the lines through `emitter`, which decides their `tracing`
    /// target. Set by [`context_logger!`](crate::context_logger).
    #[doc(hidden)]
    pub fn emitter(mut self, emitter: Emitter) -> Self {
        Arc::make_mut(&mut self.line).emitter = emitter;
        self
    }

    /// Ping interval for the async variant. Zero disables pinging.
    pub fn ping(mut self, ping: Duration) -> Self {
        self.ping = ping;
        self
    }

    /// Changes the ping interval; takes effect on the next async entry.
    pub fn set_ping(&mut self, ping: Duration) {
        self.ping = ping;
    }

    /// Logs a single `STATUS` line outside of any scope.
    #[track_caller]
    pub fn status(message: &str, postfixes: &[&str]) {
        Self::status_at(Level::INFO, message, postfixes);
    }

    #[track_caller]
    pub fn status_at(level: Level, message: &str, postfixes: &[&str]) {
        let location = Location::caller();
        let caller = format!("{}:{}", location.file(), location.line());
        Self::status_with(emit_here, level, &caller, message, postfixes);
    }

    /// Backs [`context_status!`](crate::context_status).
    #[doc(hidden)]
    pub fn status_with(
        emitter: Emitter,
        level: Level,
        caller: &str,
        message: &str,
        postfixes: &[&str],
    ) {
        emitter(level, caller, &format_line(message, TAG_STATUS, postfixes, None));
    }

    /// Appends `postfix` to the line logged on exit.
    pub fn add_postfix(&self, postfix: impl Into<String>) {
        self.lock_state().postfixes.push(postfix.into());
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Marks the scope as running and logs `STARTED` (unless in status mode).
    pub fn enter(&self) -> Result<(), ContextLoggerError> {
        let mut state = self.lock_state();
        if state.running {
            return Err(ContextLoggerError::AlreadyRunning(self.line.msg.clone()));
        }
        state.running = true;
        state.start = Utc::now();
        state.postfixes.clear();
        drop(state);

        if !self.status_mode {
            self.line.log(TAG_STARTED, &[] as &[String], None);
        }
        Ok(())
    }

    /// Logs the terminal line. `failure` names the kind of error that ended
    /// the scope, if any.
    pub fn exit(&self, failure: Option<&str>) {
        let mut state = self.lock_state();
        state.running = false;
        // Dropping a leftover ping handle aborts the task.
        state.ping_task = None;

        let (mut tag, mut elapsed) = (TAG_FINISHED, Some(format_elapsed(state.start)));
        if self.status_mode {
            tag = TAG_STATUS;
            elapsed = None;
        }
        if let Some(kind) = failure {
            tag = TAG_EXCEPTION;
            state.postfixes.push(format!("- [{kind}]"));
        }
        let postfixes = std::mem::take(&mut state.postfixes);
        drop(state);

        self.line.log(tag, &postfixes, elapsed.as_deref());
    }

    /// Like [`ContextLogger::enter`], and starts the `IN PROGRESS` ping when
    /// the interval is non-zero and not in status mode.
    pub async fn enter_async(&self) -> Result<(), ContextLoggerError> {
        self.enter()?;
        if self.ping.is_zero() || self.status_mode {
            return Ok(());
        }

        let task = spawn_cancellable(format!("ping `{}`", self.line.msg), {
            let line = Arc::clone(&self.line);
            let state = Arc::downgrade(&self.state);
            let every = self.ping;
            move |scope| ping_loop(scope, line, state, every)
        });
        self.lock_state().ping_task = Some(task);
        Ok(())
    }

    /// Stops the ping (waiting for it to finish) and then logs the terminal
    /// line, so no `IN PROGRESS` line can follow it.
    pub async fn exit_async(&self, failure: Option<&str>) -> Result<(), ContextLoggerError> {
        let ping_task = self.lock_state().ping_task.take();
        let stopped = match ping_task {
            Some(task) => cancel_and_wait(task, None).await,
            None => Ok(()),
        };
        self.exit(failure);
        stopped.map_err(ContextLoggerError::from)
    }

    /// Runs `body` inside the scope. An `Err` from the body is logged as
    /// `EXCEPTION` and returned untouched; so is a panic.
    pub fn scope<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<ContextLoggerError>,
    {
        self.enter()?;
        let guard = ExitGuard::arm(self);
        let result = body(self);
        guard.disarm();
        self.exit(result.as_ref().err().map(|_| short_type_name::<E>()));
        result
    }

    /// Async counterpart of [`ContextLogger::scope`]; pings while `body` runs.
    ///
    /// If the returned future is dropped before it completes (a timeout, a
    /// losing `select!` branch) the scope still ends, logged as `EXCEPTION`
    /// with `- [cancelled]`.
    pub async fn scope_async<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(ContextLogger) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ContextLoggerError>,
    {
        self.enter_async().await?;
        let guard = ExitGuard::arm(self);
        let result = body(self.clone()).await;
        let exited = self
            .exit_async(result.as_ref().err().map(|_| short_type_name::<E>()))
            .await;
        guard.disarm();
        match (result, exited) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err.into()),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LineFormat {
    fn log<S: AsRef<str>>(&self, tag: &str, postfixes: &[S], elapsed: Option<&str>) {
        (self.emitter)(
            self.level,
            &self.caller,
            &format_line(&self.msg, tag, postfixes, elapsed),
        );
    }
}

fn emit_here(level: Level, caller: &str, line: &str) {
    crate::emit!(level, caller, "{}", line);
}

/// Ends the scope if the body never handed control back: it panicked, or its
/// future was dropped mid-flight.
struct ExitGuard<'a> {
    logger: &'a ContextLogger,
    armed: bool,
}

impl<'a> ExitGuard<'a> {
    fn arm(logger: &'a ContextLogger) -> Self {
        Self {
            logger,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let kind = if std::thread::panicking() {
            "panic"
        } else {
            "cancelled"
        };
        self.logger.exit(Some(kind));
    }
}

async fn ping_loop(
    scope: CancelScope,
    line: Arc<LineFormat>,
    state: Weak<Mutex<ScopeState>>,
    every: Duration,
) -> Result<(), Cancelled> {
    loop {
        scope.sleep(every).await?;
        let Some(state) = state.upgrade() else {
            // The logger is gone; nobody is left to wait for us.
            return Ok(());
        };
        let (start, postfixes) = {
            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.start, state.postfixes.clone())
        };
        line.log(TAG_IN_PROGRESS, &postfixes, Some(&format_elapsed(start)));
    }
}

fn format_line<S: AsRef<str>>(
    message: &str,
    tag: &str,
    postfixes: &[S],
    elapsed: Option<&str>,
) -> String {
    let mut line = format!("[{tag:<11}] {}", message.trim_start());
    for postfix in postfixes {
        line.push(' ');
        line.push_str(postfix.as_ref());
    }
    if let Some(elapsed) = elapsed {
        line.push_str(" [");
        line.push_str(elapsed);
        line.push(']');
    }
    line.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing::Instrument;
    use tracing_test::traced_test;

    #[derive(Debug, Error)]
    enum BodyError {
        #[error("body failed")]
        Failed,
        #[error(transparent)]
        Logger(#[from] ContextLoggerError),
    }

    #[test]
    fn line_layout() {
        assert_eq!(
            format_line("  task", TAG_FINISHED, &["postinfo"], Some("3s")),
            "[FINISHED   ] task postinfo [3s]"
        );
        assert_eq!(
            format_line("task", TAG_IN_PROGRESS, &[] as &[&str], None),
            "[IN PROGRESS] task"
        );
        assert_eq!(format_line("", TAG_STATUS, &[] as &[&str], None), "[STATUS     ]");
    }

    #[test]
    #[traced_test]
    fn simple_context() {
        let logger = ContextLogger::new("task");
        logger
            .scope(|log| {
                log.add_postfix("postinfo");
                Ok::<(), BodyError>(())
            })
            .unwrap();

        assert!(logs_contain("[STARTED    ] task"));
        assert!(logs_contain("[FINISHED   ] task postinfo [0s]"));
        assert!(!logs_contain("[EXCEPTION"));
    }

    #[test]
    #[traced_test]
    fn status_context() {
        ContextLogger::new("task")
            .status_mode(true)
            .scope(|_| Ok::<(), BodyError>(()))
            .unwrap();

        assert!(!logs_contain("[STARTED"));
        assert!(!logs_contain("[FINISHED"));
        assert!(logs_contain("[STATUS     ] task"));
    }

    #[test]
    #[traced_test]
    fn one_shot_status() {
        ContextLogger::status("task", &["postinfo"]);

        assert!(logs_contain("[STATUS     ] task postinfo"));
    }

    #[test]
    #[traced_test]
    fn exception_context() {
        let result = ContextLogger::new("task").scope(|_| Err::<(), _>(BodyError::Failed));

        assert!(matches!(result, Err(BodyError::Failed)));
        assert!(logs_contain("[STARTED    ] task"));
        assert!(logs_contain("[EXCEPTION  ] task - [BodyError]"));
        assert!(!logs_contain("[FINISHED"));
    }

    #[test]
    #[traced_test]
    fn exception_in_status_mode() {
        let result = ContextLogger::new("task")
            .status_mode(true)
            .scope(|_| Err::<(), _>(BodyError::Failed));

        assert!(result.is_err());
        assert!(!logs_contain("[STARTED"));
        assert!(logs_contain("[EXCEPTION  ] task"));
        assert!(!logs_contain("[STATUS"));
    }

    #[test]
    #[traced_test]
    fn panic_still_logs_exception() {
        let logger = ContextLogger::new("task");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            logger.scope(|_| -> Result<(), BodyError> { panic!("kaboom") })
        }));

        assert!(outcome.is_err());
        assert!(!logger.is_running());
        assert!(logs_contain("[EXCEPTION  ] task - [panic]"));
    }

    #[test]
    fn double_entrance_is_rejected() {
        let logger = ContextLogger::new("task");
        logger.enter().unwrap();

        let err = logger.enter().unwrap_err();

        assert!(matches!(err, ContextLoggerError::AlreadyRunning(ref msg) if msg == "task"));
        logger.exit(None);
        logger.enter().unwrap();
    }

    #[test]
    #[traced_test]
    fn caller_defaults_to_construction_site_and_macro_uses_module() {
        ContextLogger::new("located").scope(|_| Ok::<(), BodyError>(())).unwrap();
        crate::context_logger!("by {}", "macro")
            .scope(|_| Ok::<(), BodyError>(()))
            .unwrap();

        assert!(logs_contain("context_logger.rs:"));
        assert!(logs_contain(
            "devkit_common::context_logger::tests: [STARTED    ] by macro"
        ));
        assert!(logs_contain(
            "devkit_common::context_logger::tests: [FINISHED   ] by macro"
        ));
    }

    #[test]
    #[traced_test]
    fn status_macro_targets_the_invoking_module() {
        crate::context_status!("checked", "- skipped");
        crate::context_status!("bare");

        assert!(logs_contain(
            "devkit_common::context_logger::tests: [STATUS     ] checked - skipped"
        ));
        assert!(logs_contain("devkit_common::context_logger::tests: [STATUS     ] bare"));
    }

    #[tokio::test]
    #[traced_test]
    async fn async_context_pings_between_start_and_finish() {
        let logger = ContextLogger::new("task").ping(Duration::from_millis(100));
        logger
            .scope_async(|log| async move {
                tokio::time::sleep(Duration::from_millis(350)).await;
                log.add_postfix("postinfo");
                Ok::<(), BodyError>(())
            })
            .await
            .unwrap();

        logs_assert(|lines: &[&str]| {
            let position = |needle: &str| lines.iter().position(|line| line.contains(needle));
            let started = position("[STARTED    ] task").ok_or("missing STARTED")?;
            let ping = position("[IN PROGRESS] task").ok_or("missing IN PROGRESS")?;
            let finished = position("[FINISHED   ] task postinfo").ok_or("missing FINISHED")?;
            let last_ping = lines
                .iter()
                .rposition(|line| line.contains("[IN PROGRESS] task"))
                .ok_or("missing IN PROGRESS")?;
            if started < ping && last_ping < finished {
                Ok(())
            } else {
                Err(format!("unexpected order: {lines:?}"))
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn async_exception_context() {
        let logger = ContextLogger::new("task").ping(Duration::from_millis(100));
        let result = logger
            .scope_async(|_| async {
                tokio::time::sleep(Duration::from_millis(350)).await;
                Err::<(), _>(BodyError::Failed)
            })
            .await;

        assert!(matches!(result, Err(BodyError::Failed)));
        assert!(logs_contain("[STARTED    ] task"));
        assert!(logs_contain("[IN PROGRESS] task"));
        assert!(logs_contain("[EXCEPTION  ] task - [BodyError]"));
        assert!(!logs_contain("[FINISHED"));
    }

    #[tokio::test]
    #[traced_test]
    async fn dropped_async_scope_still_exits() {
        let logger = ContextLogger::new("slow").ping(Duration::from_millis(20));

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            logger.scope_async(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), BodyError>(())
            }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(outcome.is_err());
        assert!(!logger.is_running());
        assert!(logs_contain("[EXCEPTION  ] slow - [cancelled]"));
        logs_assert(|lines: &[&str]| {
            let exception = lines
                .iter()
                .position(|line| line.contains("[EXCEPTION  ] slow"))
                .ok_or("missing EXCEPTION")?;
            if lines[exception..]
                .iter()
                .any(|line| line.contains("[IN PROGRESS] slow"))
            {
                Err(format!("ping outlived the scope: {lines:?}"))
            } else {
                Ok(())
            }
        });
        logger.enter().unwrap();
        logger.exit(None);
    }

    async fn explode(_: ContextLogger) -> Result<(), BodyError> {
        panic!("kaboom")
    }

    #[tokio::test]
    #[traced_test]
    async fn async_panic_still_logs_exception() {
        let logger = ContextLogger::new("fragile").ping(Duration::from_millis(20));

        let joined = tokio::spawn({
            let logger = logger.clone();
            async move { logger.scope_async(explode).await }
                .instrument(tracing::Span::current())
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert!(!logger.is_running());
        assert!(logs_contain("[EXCEPTION  ] fragile - [panic]"));
    }

    #[tokio::test]
    #[traced_test]
    async fn async_status_mode_never_pings() {
        let logger = ContextLogger::new("quiet")
            .status_mode(true)
            .ping(Duration::from_millis(20));
        logger
            .scope_async(|_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<(), BodyError>(())
            })
            .await
            .unwrap();

        assert!(!logs_contain("[IN PROGRESS] quiet"));
        assert!(logs_contain("[STATUS     ] quiet"));
    }

    #[tokio::test]
    #[traced_test]
    async fn zero_ping_disables_the_background_task() {
        let mut logger = ContextLogger::new("still");
        logger.set_ping(Duration::ZERO);

        logger.enter_async().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        logger.exit_async(None).await.unwrap();

        assert!(!logs_contain("[IN PROGRESS] still"));
        assert!(logs_contain("[FINISHED   ] still"));
    }
}

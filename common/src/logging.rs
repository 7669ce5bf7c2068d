//! Logger installation and level-styled output shared by the devkit binaries.

use std::fmt;
use std::io::IsTerminal;

use owo_colors::OwoColorize;
use tracing::Event;
use tracing::Level;
use tracing::Subscriber;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::registry::LookupSpan;

/// Installs the global subscriber: stderr output, [`LevelStyledFormat`],
/// `RUST_LOG` when set and valid, `level` otherwise.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn setup_logger(level: LevelFilter) {
    let _ = tracing_subscriber::fmt()
        // Fallback to `level` if the environment variable is not set _or_
        // contains an invalid value.
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into())),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .event_format(LevelStyledFormat)
        .try_init();
}

/// Emits an event at a level only known at runtime. The event's target is
/// the module that expands the macro, unless given with `target:`, so
/// `RUST_LOG` directives filter it like any other record of that module.
///
/// ```ignore
/// devkit_common::emit!(level, "[RUNNING IN SHELL]: {rendered}");
/// ```
#[macro_export]
macro_rules! emit {
    (target: $target:expr, $level:expr, $($arg:tt)+) => {{
        let level: $crate::__tracing::Level = $level;
        match level {
            $crate::__tracing::Level::TRACE => $crate::__tracing::trace!(target: $target, $($arg)+),
            $crate::__tracing::Level::DEBUG => $crate::__tracing::debug!(target: $target, $($arg)+),
            $crate::__tracing::Level::INFO => $crate::__tracing::info!(target: $target, $($arg)+),
            $crate::__tracing::Level::WARN => $crate::__tracing::warn!(target: $target, $($arg)+),
            _ => $crate::__tracing::error!(target: $target, $($arg)+),
        }
    }};
    ($level:expr, $($arg:tt)+) => {
        $crate::emit!(target: module_path!(), $level, $($arg)+)
    };
}

/// Prints only the message of an event, coloured by level. Warnings and
/// errors additionally get a `[WARNING]: ` / `[ERROR]: ` prefix so they stay
/// recognisable without colours.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevelStyledFormat;

impl<S, N> FormatEvent<S, N> for LevelStyledFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = style_line(
            *event.metadata().level(),
            &visitor.message,
            writer.has_ansi_escapes(),
        );
        writeln!(writer, "{line}")
    }
}

fn level_prefix(level: Level) -> &'static str {
    match level {
        Level::WARN => "[WARNING]: ",
        Level::ERROR => "[ERROR]: ",
        _ => "",
    }
}

fn style_line(level: Level, message: &str, ansi: bool) -> String {
    let text = format!("{}{message}", level_prefix(level));
    if !ansi {
        return text;
    }
    match level {
        Level::TRACE | Level::DEBUG => text.bright_black().to_string(),
        Level::INFO => text.green().to_string(),
        Level::WARN => text.yellow().to_string(),
        _ => text.red().to_string(),
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

pub mod context_logger;
pub mod elapsed;
pub mod logging;
mod merge;
pub mod retry;

#[cfg(any(feature = "cli", test))]
mod log_level_cli_arg;

#[cfg(any(feature = "cli", test))]
pub use log_level_cli_arg::LogLevelCliArg;

#[cfg(any(feature = "cli", test))]
mod config_override;

#[cfg(any(feature = "cli", test))]
pub use config_override::CliConfigOverrides;
#[cfg(any(feature = "cli", test))]
pub use config_override::OverrideError;

pub use context_logger::ContextLogger;
pub use context_logger::ContextLoggerError;
pub use merge::merge_maps;
pub use retry::RetryError;
pub use retry::RetryPolicy;
pub use retry::Retrying;
pub use retry::retry;

#[doc(hidden)]
pub use tracing as __tracing;

/// Last path segment of `T`'s type name without generic arguments, e.g.
/// `ShellError` for `devkit_shell::error::ShellError`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

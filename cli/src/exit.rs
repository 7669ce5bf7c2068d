//! Process exit handling shared by the devkit binaries.

use std::process::ExitCode;

/// Turns the outcome of a command into the process exit code.
///
/// An error is logged once, as a single line holding the whole context
/// chain, and mapped to `code` (at least 1). Nothing is ever printed as a
/// panic or backtrace.
pub fn exit_on_error<T>(result: anyhow::Result<T>, code: u8) -> ExitCode {
    ExitCode::from(report(result, code))
}

fn report<T>(result: anyhow::Result<T>, code: u8) -> u8 {
    match result {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!("{err:#}");
            code.max(1)
        }
    }
}

use std::process::ExitCode;

use clap::Parser;
use devkit_cli::exit_on_error;
use devkit_common::LogLevelCliArg;
use devkit_common::logging::setup_logger;

/// Developer tooling command line.
#[derive(Debug, Parser)]
#[clap(author, version)]
struct DevkitCli {
    /// Logging level.
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevelCliArg::Info,
        global = true
    )]
    log_level: LogLevelCliArg,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Do nothing; checks that logging and exit handling are wired up.
    Pass,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = DevkitCli::parse();
    setup_logger(cli.log_level.into());
    exit_on_error(run(cli).await, 1)
}

async fn run(cli: DevkitCli) -> anyhow::Result<()> {
    tracing::debug!("log level set to {:?}", cli.log_level);
    match cli.subcommand {
        Subcommand::Pass => Ok(()),
    }
}

use std::process::ExitCode;

use clap::Parser;
use devkit_cli::exit_on_error;
use devkit_cli::repo::RepoCli;
use devkit_cli::repo::run_main;
use devkit_common::logging::setup_logger;
use tracing::level_filters::LevelFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = RepoCli::parse();
    setup_logger(LevelFilter::INFO);
    exit_on_error(run_main(cli).await, 1)
}

use std::process::ExitCode;

use clap::Parser;
use ip_reputation_daemon::cli_app::{self, Cli};
use ip_reputation_daemon::logger;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.log_json);
    match cli_app::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(code = err.code(), "{err}");
            ExitCode::FAILURE
        }
    }
}

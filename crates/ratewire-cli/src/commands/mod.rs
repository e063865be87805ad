mod check_config;
mod run;
mod simulate;

use std::process::ExitCode;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::CheckConfig(args) => check_config::execute(args),
        Command::Simulate(args) => simulate::execute(args),
    }
}

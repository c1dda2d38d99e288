//! CLI entry point.

use clap::Parser;
use std::process::ExitCode;

use gantry_cli::{Cli, CliError, Commands, handlers, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => handlers::run::execute(args).await,
        Commands::Tail(args) => handlers::tail::execute(&args).await,
        Commands::Signals => handlers::signals::execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(code)
        }
    }
}

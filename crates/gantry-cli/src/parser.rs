//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Run and inspect managed server environments.
#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Run a managed server process with console, logs and resource polling")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_verbose_after_subcommand() {
        let cli = Cli::parse_from(["gantry", "signals", "--verbose"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Signals));
    }
}

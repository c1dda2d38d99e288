//! Tail command handler.

use anyhow::Result;
use gantry_runtime::read_log_tail;

use crate::commands::TailArgs;
use crate::error::CliError;

/// Print the trailing lines of the log sink.
///
/// Works whether or not the server is running; the sink is read directly.
pub async fn execute(args: &TailArgs) -> Result<()> {
    let path = args.log_path();
    let lines = read_log_tail(&path, args.bytes)
        .await
        .map_err(CliError::from)?;

    for line in lines {
        println!("{line}");
    }
    Ok(())
}

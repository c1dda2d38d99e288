//! Signals command handler.

use anyhow::Result;
use gantry_core::TerminateSignal;

/// Print the supported signal set with numbers.
pub fn execute() -> Result<()> {
    println!("{:<8} {:>6}", "Signal", "Number");
    for signal in TerminateSignal::ALL {
        println!("{:<8} {:>6}", signal.name(), signal.number());
    }
    Ok(())
}

//! Signal delivery to a spawned child.
//!
//! Unix delivers every `TerminateSignal` through `kill(2)`. Elsewhere the
//! only primitive available is a hard kill, so anything but `Kill` is
//! reported as unsupported.

use gantry_core::{DriverError, TerminateSignal};
use tokio::process::Child;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Deliver `sig` to `child` without waiting for it to exit.
pub fn deliver(child: &mut Child, sig: TerminateSignal) -> Result<(), DriverError> {
    #[cfg(unix)]
    {
        deliver_unix(child, sig)
    }

    #[cfg(not(unix))]
    {
        deliver_other(child, sig)
    }
}

#[cfg(unix)]
fn deliver_unix(child: &Child, sig: TerminateSignal) -> Result<(), DriverError> {
    // `id()` is None once the child has been reaped.
    let pid = child.id().ok_or(DriverError::NotRunning)?;
    let pid = i32::try_from(pid).map_err(|_| DriverError::Signal(format!("pid {pid} out of range")))?;

    match signal::kill(Pid::from_raw(pid), to_nix(sig)) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(DriverError::NotRunning),
        Err(e) => Err(DriverError::Signal(format!("{sig}: {e}"))),
    }
}

#[cfg(unix)]
const fn to_nix(sig: TerminateSignal) -> Signal {
    match sig {
        TerminateSignal::Interrupt => Signal::SIGINT,
        TerminateSignal::Terminate => Signal::SIGTERM,
        TerminateSignal::Kill => Signal::SIGKILL,
        TerminateSignal::Hangup => Signal::SIGHUP,
        TerminateSignal::Quit => Signal::SIGQUIT,
        TerminateSignal::User1 => Signal::SIGUSR1,
        TerminateSignal::User2 => Signal::SIGUSR2,
    }
}

#[cfg(not(unix))]
fn deliver_other(child: &mut Child, sig: TerminateSignal) -> Result<(), DriverError> {
    if sig != TerminateSignal::Kill {
        return Err(DriverError::UnsupportedSignal(sig));
    }
    child.start_kill().map_err(DriverError::from)
}

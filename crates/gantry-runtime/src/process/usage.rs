//! Resource usage of a child process.
//!
//! CPU and memory come from `sysinfo`; disk is the size of the working
//! directory. Per-process network counters are not exposed by the host, so
//! they are reported as zero.

use gantry_core::{DriverError, ResourceUsage};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use walkdir::WalkDir;

/// Sample `pid`. Blocking; run it off the async executor.
///
/// `system` must be reused between calls: CPU usage is computed from the
/// delta since the previous refresh, so the first sample reports 0%.
pub fn sample(system: &Mutex<System>, pid: u32, working_dir: &Path) -> Result<ResourceUsage, DriverError> {
    let (cpu_percent, memory_bytes) = {
        let mut system = system.lock().unwrap();
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = system.process(pid).ok_or(DriverError::NotRunning)?;
        (f64::from(process.cpu_usage()), process.memory())
    };

    Ok(ResourceUsage {
        cpu_percent,
        memory_bytes,
        disk_bytes: directory_size(working_dir)?,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
    })
}

/// Total size of regular files under `root`. Symlinks are not followed.
///
/// Entries that vanish during the walk are skipped; a missing `root` is an error.
pub fn directory_size(root: &Path) -> io::Result<u64> {
    let mut total = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 && is_vanished(&e) => continue,
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => total += metadata.len(),
            Err(e) if is_vanished(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(total)
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == ErrorKind::NotFound)
}

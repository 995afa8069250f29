//! Best-effort CPU affinity.
//!
//! Migration between cores is part of the workload: moving a worker makes
//! the line it owns travel between caches.  Failure to migrate never
//! affects the run, so [`try_pin_current_thread`] swallows errors.
//!
//! # Platform Support
//!
//! - **Linux**: `sched_setaffinity(0, ..)` on the calling thread
//! - **Other**: [`pin_current_thread`] returns `Unsupported`

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest CPU index the affinity mask can express.
#[cfg(target_os = "linux")]
pub const CPU_SET_CAPACITY: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

#[cfg(not(target_os = "linux"))]
pub const CPU_SET_CAPACITY: usize = 1024;

/// Pin the calling thread to one CPU.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
    if cpu >= CPU_SET_CAPACITY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu index {cpu} exceeds CPU_SET_CAPACITY ({CPU_SET_CAPACITY})"),
        ));
    }

    // SAFETY: a zeroed cpu_set_t is valid, cpu is in bounds for CPU_SET,
    // and pid 0 names the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU affinity is not supported on this platform",
    ))
}

/// Pin the calling thread, ignoring any failure.
pub fn try_pin_current_thread(cpu: usize) {
    let _ = pin_current_thread(cpu);
}

/// Wall-clock time in hundredths of a second, truncated to 32 bits.
pub fn now_hundredths() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_millis() / 10) as u32)
        .unwrap_or(0)
}

/// CPU a worker should migrate to.
///
/// Mixes the clock with the instance ordinal and worker role so the two
/// workers of a pair land on different CPUs whenever `cpus > 1`.
pub fn migration_target(instance: usize, primary: bool, now_hundredths: u32, cpus: usize) -> usize {
    let cpus = cpus.max(1) as u32;
    let mixed = (instance as u32)
        .wrapping_add(u32::from(primary))
        .wrapping_add(now_hundredths);
    (mixed % cpus) as usize
}

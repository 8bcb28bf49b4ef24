//! Best-effort scheduling priority for the output thread
//!
//! Real-time priority reduces jitter in the deadline sleep. It usually
//! needs privileges (CAP_SYS_NICE on Linux); callers log the error and
//! carry on at normal priority.

use serde::{Deserialize, Serialize};
use std::io;

/// Requested priority for the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    /// Leave the scheduler alone
    Normal,
    /// `SCHED_FIFO` at the given priority (time-critical on Windows)
    Realtime(i32),
}

impl Default for ThreadPriority {
    fn default() -> Self {
        ThreadPriority::Realtime(crate::constants::DEFAULT_RT_PRIORITY)
    }
}

impl ThreadPriority {
    /// Apply to the current thread.
    pub fn apply_to_current_thread(&self) -> io::Result<()> {
        match *self {
            ThreadPriority::Normal => Ok(()),
            ThreadPriority::Realtime(priority) => set_realtime(priority),
        }
    }

    /// Apply, downgrading failure to a warning.
    pub fn apply_or_warn(&self) -> bool {
        match self.apply_to_current_thread() {
            Ok(()) => {
                if let ThreadPriority::Realtime(priority) = self {
                    tracing::debug!("Output thread running at real-time priority {}", priority);
                }
                true
            }
            Err(e) => {
                tracing::warn!("Could not raise output thread priority ({}), continuing", e);
                false
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn set_realtime(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // SAFETY: param is valid for the call; pid 0 is the calling thread
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret == -1 {
        return Err(io::Error::other(format!(
            "sched_setscheduler failed: {} (requires CAP_SYS_NICE or root)",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn set_realtime(_priority: i32) -> io::Result<()> {
    use windows::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
    };

    // SAFETY: GetCurrentThread returns a pseudo-handle valid for this thread
    unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) }
        .map_err(|e| io::Error::other(e.to_string()))
}

#[cfg(not(any(target_os = "linux", windows)))]
fn set_realtime(_priority: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time priority not supported on this platform",
    ))
}

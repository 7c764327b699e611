//! OS-specific process and thread primitives

use std::io;
use std::process::ExitStatus;

/// Block until the process has exited without reaping it.
///
/// Lets a waiter sleep without holding the child lock, so a concurrent
/// `close()` can still kill the process. Retries across `EINTR`.
#[cfg(unix)]
pub(crate) fn wait_exited(pid: u32) -> io::Result<()> {
    // SAFETY: an all-zero siginfo_t is a valid out-parameter for waitid
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: `info` is a valid, writable siginfo_t for the whole call
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Whether a wait error means another thread already reaped the child.
#[cfg(unix)]
pub(crate) fn already_reaped(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ECHILD)
}

/// Kill a process by pid, for when the `Child` handle is busy in another thread.
#[cfg(windows)]
pub(crate) fn kill_pid(pid: u32) -> io::Result<()> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    // SAFETY: the handle is checked by `?` and closed before returning
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(io::Error::other)?;
        let result = TerminateProcess(handle, 1).map_err(io::Error::other);
        let _ = CloseHandle(handle);
        result
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn kill_pid(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "killing by pid is not supported on this platform",
    ))
}

/// Drop the calling thread to the lowest scheduling priority.
///
/// Best effort: only Linux supports per-thread niceness, elsewhere this is a no-op.
pub(crate) fn lower_current_thread_priority() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid has no preconditions
        let tid = unsafe { libc::gettid() };
        // SAFETY: PRIO_PROCESS with a thread id only affects that thread on Linux
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, 19) };
        if rc != 0 {
            tracing::debug!(
                error = %io::Error::last_os_error(),
                "could not lower relay thread priority"
            );
        }
    }
}

/// Exit code of a finished process.
///
/// A Unix signal death maps to `128 + signal`, the shell convention; `-1`
/// when neither a code nor a signal is available.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

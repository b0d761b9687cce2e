//! Rendezvous between a tracee about to install its syscall filter and the
//! tracer that must be attached first, via a named POSIX counting semaphore.
//!
//! The protocol is one-shot: the tracee creates `/<pid>` with an initial
//! count of zero and waits on it with a deadline; the tracer opens the same
//! name and posts once its attach is complete. Whatever happens, the tracee
//! closes and unlinks the name before it continues or dies, so a crashed
//! pair never leaks a semaphore.

use libc::{c_uint, sem_t, CLOCK_REALTIME, O_CREAT};
use nix::errno::Errno;
use nix::unistd::Pid;
use simple_error::{bail, try_with};
use std::ffi::CString;
use std::time::Duration;

use crate::result::Result;

/// Name of the latch a tracee with `pid` waits on.
pub fn latch_name(pid: Pid) -> String {
    format!("/{}", pid)
}

pub struct RendezvousLatch {
    name: CString,
    sem: *mut sem_t,
    // creator unlinks the name on drop, opener only closes
    owned: bool,
}

impl RendezvousLatch {
    /// Create (tracee side). The name must be process-namespace unique;
    /// the per-pid scheme of [`latch_name`] guarantees that.
    pub fn create(name: &str) -> Result<Self> {
        Self::open_with(name, true)
    }

    /// Open for posting (tracer side). `O_CREAT` keeps this immune to the
    /// attach racing ahead of the tracee's own `create`.
    pub fn open(name: &str) -> Result<Self> {
        Self::open_with(name, false)
    }

    fn open_with(name: &str, owned: bool) -> Result<Self> {
        let c_name = try_with!(CString::new(name), "latch name contains a NUL byte");
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), O_CREAT, 0o644 as c_uint, 0 as c_uint) };
        if sem == libc::SEM_FAILED {
            bail!("cannot open semaphore {}: {}", name, Errno::last());
        }
        Ok(Self {
            name: c_name,
            sem,
            owned,
        })
    }

    /// Block until posted or until `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let mut deadline = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let res = unsafe { libc::clock_gettime(CLOCK_REALTIME, &mut deadline) };
        try_with!(Errno::result(res), "cannot read the realtime clock");

        deadline.tv_sec += timeout.as_secs() as libc::time_t;
        deadline.tv_nsec += libc::c_long::from(timeout.subsec_nanos());
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        let res = unsafe { libc::sem_timedwait(self.sem, &deadline) };
        if res != 0 {
            bail!("wait on semaphore failed: {}", Errno::last());
        }
        Ok(())
    }

    /// Increment the count, releasing one waiter.
    pub fn post(&self) -> Result<()> {
        let res = unsafe { libc::sem_post(self.sem) };
        try_with!(Errno::result(res), "cannot post semaphore");
        Ok(())
    }
}

impl Drop for RendezvousLatch {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
            if self.owned {
                libc::sem_unlink(self.name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use nix::unistd::getpid;

    fn unique_name(tag: &str) -> String {
        format!("/fstrace-latch-{}-{}", tag, getpid())
    }

    #[test]
    fn post_then_wait_succeeds() {
        let name = unique_name("roundtrip");
        let latch = RendezvousLatch::create(&name).unwrap();
        let poster = RendezvousLatch::open(&name).unwrap();
        poster.post().unwrap();
        latch.wait(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn wait_times_out_when_nobody_posts() {
        let name = unique_name("timeout");
        let latch = RendezvousLatch::create(&name).unwrap();
        assert!(latch.wait(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn latch_names_are_per_pid() {
        assert_eq!(latch_name(Pid::from_raw(4321)), "/4321");
    }
}

use libc::{c_long, c_void};
use nix::errno::Errno;
use nix::sys::ptrace::{self, AddressType, Request, RequestType};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use simple_error::try_with;
use std::{mem, ptr};

use crate::cpu::Regs;
use crate::result::Result;

/// Trace options requested on seize: syscall-number tagging, classifier
/// stops, child stops for every spawn flavor, and exit stops.
fn trace_options() -> ptrace::Options {
    ptrace::Options::PTRACE_O_TRACESYSGOOD
        | ptrace::Options::PTRACE_O_TRACESECCOMP
        | ptrace::Options::PTRACE_O_TRACECLONE
        | ptrace::Options::PTRACE_O_TRACEFORK
        | ptrace::Options::PTRACE_O_TRACEVFORK
        | ptrace::Options::PTRACE_O_TRACEEXIT
}

/// Stop tracee while being attached, as with `ptrace(PTRACE_INTERRUPT, ...)`
fn interrupt(pid: Pid) -> nix::Result<()> {
    let res = unsafe {
        libc::ptrace(
            Request::PTRACE_INTERRUPT as RequestType,
            libc::pid_t::from(pid),
            ptr::null_mut::<c_void>(),
            ptr::null_mut::<c_void>(),
        )
    };
    Errno::result(res).map(drop)
}

/// Function for ptrace requests that return values from the data field.
/// Some ptrace get requests populate structs or larger elements than `c_long`
/// and therefore use the data field to return values. This function handles these
/// requests.
fn ptrace_get_data<T>(request: Request, pid: Pid) -> nix::Result<T> {
    let mut data = mem::MaybeUninit::uninit();
    let res = unsafe {
        libc::ptrace(
            request as RequestType,
            libc::pid_t::from(pid),
            ptr::null_mut::<T>(),
            data.as_mut_ptr() as *const _ as *const c_void,
        )
    };
    Errno::result(res)?;
    Ok(unsafe { data.assume_init() })
}

/// Seize the tracee, then interrupt it to verify the attach took effect.
/// Leaves the tracee in a stop, ready for the first resume.
pub fn attach_seize(pid: Pid) -> Result<()> {
    try_with!(
        ptrace::seize(pid, trace_options()),
        "cannot seize process {}",
        pid
    );
    try_with!(interrupt(pid), "cannot interrupt/stop the tracee");
    try_with!(
        waitpid(pid, Some(WaitPidFlag::WSTOPPED)),
        "tracee did not enter the attach stop"
    );
    Ok(())
}

pub fn getregs(pid: Pid) -> Result<Regs> {
    Ok(try_with!(
        ptrace_get_data::<Regs>(Request::PTRACE_GETREGS, pid),
        "cannot get registers with ptrace"
    ))
}

/// Peek one word of the tracee's user area. `PTRACE_PEEKUSER` reports its
/// result in-band, so a legitimate `-1` word has to be told apart from a
/// failure via errno.
pub fn peek_user(pid: Pid, offset: usize) -> nix::Result<c_long> {
    let res = unsafe {
        Errno::clear();
        libc::ptrace(
            Request::PTRACE_PEEKUSER as RequestType,
            libc::pid_t::from(pid),
            offset as *mut c_void,
            ptr::null_mut::<c_void>(),
        )
    };
    match Errno::last() {
        Errno::UnknownErrno => Ok(res),
        err => Err(err),
    }
}

/// Peek one word of the tracee's text/data memory at `addr`.
pub fn peek_data(pid: Pid, addr: u64) -> nix::Result<c_long> {
    ptrace::read(pid, addr as AddressType)
}

pub fn getevent(pid: Pid) -> nix::Result<c_long> {
    ptrace::getevent(pid)
}

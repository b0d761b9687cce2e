//! Tracee-side setup: rendezvous with the tracer, drop privilege
//! escalation, arm the kernel filter, become the target program.

use libc::c_int;
use nix::unistd::{self, getpid};
use simple_error::try_with;
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::filter::{self, FilterProgram};
use crate::latch::{latch_name, RendezvousLatch};
use crate::result::Result;

/// How long the tracee waits for the tracer to attach before giving up.
pub const ATTACH_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment variable carrying the file-access-manifest handle to the
/// sink inside the target environment. Opaque to the tracer.
pub const FAM_ENV: &str = "FSTRACE_FAM";

/// Prepare the calling process for tracing and replace it with `file`.
///
/// Returns only if the final image replacement fails, with the errno it
/// failed with; every earlier failure is an error. The interval between
/// filter installation and exec is kept free of incidental work: once the
/// filter is armed, every surfaced syscall this process makes is delivered
/// to the tracer, so everything (environment, argument vectors) is
/// materialized up front.
pub fn execute_with_sandbox(
    file: &CStr,
    argv: &[CString],
    envp: &[CString],
    fam: Option<&CStr>,
) -> Result<c_int> {
    let program = FilterProgram::surfaced();

    let mut env: Vec<CString> = envp.to_vec();
    if let Some(fam) = fam {
        let entry = format!("{}={}", FAM_ENV, fam.to_string_lossy());
        env.push(try_with!(CString::new(entry), "manifest path contains a NUL byte"));
    }
    let argv_ref: Vec<&CStr> = argv.iter().map(CString::as_c_str).collect();
    let env_ref: Vec<&CStr> = env.iter().map(CString::as_c_str).collect();

    let name = latch_name(getpid());
    let latch = try_with!(
        RendezvousLatch::create(&name),
        "cannot create rendezvous latch {}",
        name
    );
    let waited = latch.wait(ATTACH_TIMEOUT);
    // closed and unlinked whether the tracer showed up or not
    drop(latch);
    try_with!(waited, "tracer did not attach within {:?}", ATTACH_TIMEOUT);

    try_with!(filter::no_new_privs(), "cannot drop privilege escalation");
    try_with!(program.install(), "cannot arm the syscall filter");

    // from here on, only the exec below may run
    match unistd::execvpe(file, &argv_ref, &env_ref) {
        Err(errno) => Ok(errno as c_int),
        Ok(infallible) => match infallible {},
    }
}

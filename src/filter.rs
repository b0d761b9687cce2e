//! The in-kernel decision program: a classic-BPF seccomp filter that
//! surfaces exactly the registered syscalls to the tracer and lets
//! everything else through untouched.

use libc::{c_ulong, sock_filter, sock_fprog};
use nix::errno::Errno;
use simple_error::try_with;

use crate::result::Result;
use crate::tracer::registry;

// Classic BPF opcode fields (linux/bpf_common.h).
const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

// offsetof(struct seccomp_data, nr)
const SECCOMP_DATA_NR: u32 = 0;

const fn stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

/// An immutable seccomp decision table: one equality arm per surfaced
/// syscall, each returning trace, and a final allow arm for everything else.
pub struct FilterProgram {
    insns: Vec<sock_filter>,
}

impl FilterProgram {
    /// Build the program from the surfaced-syscall registry, so the kernel
    /// side and the dispatcher can never disagree about the set.
    pub fn surfaced() -> Self {
        let mut insns = Vec::with_capacity(2 * registry::SURFACED.len() + 2);
        insns.push(stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR));
        for entry in registry::SURFACED {
            // fall through to the trace return on match, skip it otherwise
            insns.push(jump(BPF_JMP | BPF_JEQ | BPF_K, entry.nr as u32, 0, 1));
            insns.push(stmt(BPF_RET | BPF_K, SECCOMP_RET_TRACE));
        }
        insns.push(stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
        Self { insns }
    }

    pub fn instructions(&self) -> &[sock_filter] {
        &self.insns
    }

    /// Hand the program to the kernel for the calling thread. Requires
    /// [`no_new_privs`] to have been applied first.
    pub fn install(&self) -> Result<()> {
        let prog = sock_fprog {
            len: self.insns.len() as u16,
            filter: self.insns.as_ptr() as *mut sock_filter,
        };
        let res = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER as c_ulong,
                &prog as *const sock_fprog,
            )
        };
        try_with!(Errno::result(res), "cannot install seccomp filter");
        Ok(())
    }
}

/// Give up the ability to gain privileges, which is what lets an
/// unprivileged process install a seccomp filter at all.
pub fn no_new_privs() -> Result<()> {
    let res = unsafe {
        libc::prctl(
            libc::PR_SET_NO_NEW_PRIVS,
            1 as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
            0 as c_ulong,
        )
    };
    try_with!(Errno::result(res), "prctl(PR_SET_NO_NEW_PRIVS) failed");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn program_is_one_arm_per_surfaced_syscall() {
        let program = FilterProgram::surfaced();
        let insns = program.instructions();
        assert_eq!(insns.len(), 2 * registry::SURFACED.len() + 2);

        // loads the syscall number first
        assert_eq!(insns[0].code, BPF_LD | BPF_W | BPF_ABS);
        assert_eq!(insns[0].k, SECCOMP_DATA_NR);

        // equality test + trace return per registered syscall, in order
        for (i, entry) in registry::SURFACED.iter().enumerate() {
            let test = &insns[1 + 2 * i];
            let ret = &insns[2 + 2 * i];
            assert_eq!(test.code, BPF_JMP | BPF_JEQ | BPF_K);
            assert_eq!(test.k, entry.nr as u32);
            assert_eq!((test.jt, test.jf), (0, 1));
            assert_eq!(ret.code, BPF_RET | BPF_K);
            assert_eq!(ret.k, SECCOMP_RET_TRACE);
        }

        // default arm allows
        let last = insns.last().unwrap();
        assert_eq!(last.code, BPF_RET | BPF_K);
        assert_eq!(last.k, SECCOMP_RET_ALLOW);
    }

    #[test]
    fn vfork_is_never_surfaced() {
        let program = FilterProgram::surfaced();
        assert!(!program
            .instructions()
            .iter()
            .any(|insn| insn.code == (BPF_JMP | BPF_JEQ | BPF_K) && insn.k == libc::SYS_vfork as u32));
    }

    #[test]
    fn process_spawns_and_execs_are_surfaced() {
        let program = FilterProgram::surfaced();
        for nr in [libc::SYS_fork, libc::SYS_clone, libc::SYS_execve, libc::SYS_openat].iter() {
            assert!(program
                .instructions()
                .iter()
                .any(|insn| insn.code == (BPF_JMP | BPF_JEQ | BPF_K) && insn.k == *nr as u32));
        }
    }
}

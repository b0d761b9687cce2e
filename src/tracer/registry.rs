//! The single source of truth for which syscalls are surfaced.
//!
//! The kernel-side filter is generated from this table and the dispatcher
//! looks handlers up in it, so the two can never drift apart. `vfork` is
//! deliberately absent: its parent stays suspended until the child execs,
//! and waiting on the parent here would wedge the only tracer thread. The
//! exec handler repairs the table when such a child shows up (see
//! `Tracer::update_table_for_exec`).

use libc::c_long;

use crate::result::Result;
use crate::tracer::{handlers, Tracer};

pub type HandlerFn = fn(&mut Tracer) -> Result<()>;

pub struct Registration {
    pub nr: c_long,
    pub name: &'static str,
    pub handler: HandlerFn,
}

pub const SURFACED: &[Registration] = &[
    Registration { nr: libc::SYS_execveat, name: "execveat", handler: handlers::execveat },
    Registration { nr: libc::SYS_execve, name: "execve", handler: handlers::execve },
    Registration { nr: libc::SYS_stat, name: "stat", handler: handlers::stat },
    Registration { nr: libc::SYS_lstat, name: "lstat", handler: handlers::lstat },
    Registration { nr: libc::SYS_fstat, name: "fstat", handler: handlers::fstat },
    Registration { nr: libc::SYS_newfstatat, name: "newfstatat", handler: handlers::newfstatat },
    Registration { nr: libc::SYS_access, name: "access", handler: handlers::access },
    Registration { nr: libc::SYS_faccessat, name: "faccessat", handler: handlers::faccessat },
    Registration { nr: libc::SYS_creat, name: "creat", handler: handlers::creat },
    Registration { nr: libc::SYS_open, name: "open", handler: handlers::open },
    Registration { nr: libc::SYS_openat, name: "openat", handler: handlers::openat },
    Registration { nr: libc::SYS_write, name: "write", handler: handlers::write },
    Registration { nr: libc::SYS_writev, name: "writev", handler: handlers::writev },
    Registration { nr: libc::SYS_pwritev, name: "pwritev", handler: handlers::pwritev },
    Registration { nr: libc::SYS_pwritev2, name: "pwritev2", handler: handlers::pwritev2 },
    Registration { nr: libc::SYS_pwrite64, name: "pwrite64", handler: handlers::pwrite64 },
    Registration { nr: libc::SYS_truncate, name: "truncate", handler: handlers::truncate },
    Registration { nr: libc::SYS_ftruncate, name: "ftruncate", handler: handlers::ftruncate },
    Registration { nr: libc::SYS_rmdir, name: "rmdir", handler: handlers::rmdir },
    Registration { nr: libc::SYS_rename, name: "rename", handler: handlers::rename },
    Registration { nr: libc::SYS_renameat, name: "renameat", handler: handlers::renameat },
    Registration { nr: libc::SYS_renameat2, name: "renameat2", handler: handlers::renameat2 },
    Registration { nr: libc::SYS_link, name: "link", handler: handlers::link },
    Registration { nr: libc::SYS_linkat, name: "linkat", handler: handlers::linkat },
    Registration { nr: libc::SYS_unlink, name: "unlink", handler: handlers::unlink },
    Registration { nr: libc::SYS_unlinkat, name: "unlinkat", handler: handlers::unlinkat },
    Registration { nr: libc::SYS_symlink, name: "symlink", handler: handlers::symlink },
    Registration { nr: libc::SYS_symlinkat, name: "symlinkat", handler: handlers::symlinkat },
    Registration { nr: libc::SYS_readlink, name: "readlink", handler: handlers::readlink },
    Registration { nr: libc::SYS_readlinkat, name: "readlinkat", handler: handlers::readlinkat },
    Registration { nr: libc::SYS_utime, name: "utime", handler: handlers::utime },
    Registration { nr: libc::SYS_utimes, name: "utimes", handler: handlers::utimes },
    Registration { nr: libc::SYS_utimensat, name: "utimensat", handler: handlers::utimensat },
    Registration { nr: libc::SYS_futimesat, name: "futimesat", handler: handlers::futimesat },
    Registration { nr: libc::SYS_mkdir, name: "mkdir", handler: handlers::mkdir },
    Registration { nr: libc::SYS_mkdirat, name: "mkdirat", handler: handlers::mkdirat },
    Registration { nr: libc::SYS_mknod, name: "mknod", handler: handlers::mknod },
    Registration { nr: libc::SYS_mknodat, name: "mknodat", handler: handlers::mknodat },
    Registration { nr: libc::SYS_chmod, name: "chmod", handler: handlers::chmod },
    Registration { nr: libc::SYS_fchmod, name: "fchmod", handler: handlers::fchmod },
    Registration { nr: libc::SYS_fchmodat, name: "fchmodat", handler: handlers::fchmodat },
    Registration { nr: libc::SYS_chown, name: "chown", handler: handlers::chown },
    Registration { nr: libc::SYS_fchown, name: "fchown", handler: handlers::fchown },
    Registration { nr: libc::SYS_lchown, name: "lchown", handler: handlers::lchown },
    Registration { nr: libc::SYS_fchownat, name: "fchownat", handler: handlers::fchownat },
    Registration { nr: libc::SYS_sendfile, name: "sendfile", handler: handlers::sendfile },
    Registration { nr: libc::SYS_copy_file_range, name: "copy_file_range", handler: handlers::copy_file_range },
    Registration { nr: libc::SYS_name_to_handle_at, name: "name_to_handle_at", handler: handlers::name_to_handle_at },
    Registration { nr: libc::SYS_fork, name: "fork", handler: handlers::fork },
    Registration { nr: libc::SYS_clone, name: "clone", handler: handlers::clone },
];

pub fn lookup(nr: c_long) -> Option<&'static Registration> {
    SURFACED.iter().find(|entry| entry.nr == nr)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn every_surfaced_syscall_dispatches_to_exactly_one_handler() {
        let mut numbers = BTreeSet::new();
        for entry in SURFACED {
            assert!(numbers.insert(entry.nr), "{} registered twice", entry.name);
            let found = lookup(entry.nr).unwrap();
            assert_eq!(found.name, entry.name);
        }
        assert_eq!(SURFACED.len(), 50);
    }

    #[test]
    fn vfork_is_not_registered() {
        assert!(lookup(libc::SYS_vfork).is_none());
    }

    #[test]
    fn unknown_numbers_do_not_dispatch() {
        assert!(lookup(-1).is_none());
    }
}

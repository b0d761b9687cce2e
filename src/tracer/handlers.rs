//! One handler per surfaced syscall. Handlers decode arguments, derive the
//! canonical access event(s) and push them to the sink; they never alter
//! tracee register state. The mapping from syscall number to handler lives
//! in [`crate::tracer::registry`].

use libc::{c_int, c_ulong, mode_t};

use crate::event::EventKind;
use crate::result::Result;
use crate::tracer::Tracer;

/// Pass/fail shape of a syscall return read at syscall exit: `0` stays `0`,
/// a negative return becomes the non-zero result of subtracting it from
/// `~0`. Consumers must only test this against zero.
pub(crate) fn pass_fail(ret: c_ulong) -> i64 {
    if ret == 0 {
        0
    } else {
        (u64::MAX - ret) as i64
    }
}

/// Classify an open-flavored access against the path's pre-call mode.
pub(crate) fn open_kind(mode: mode_t, oflag: c_int) -> EventKind {
    let exists = mode != 0;
    if !exists && oflag & (libc::O_CREAT | libc::O_TRUNC) != 0 {
        return EventKind::Create;
    }
    let accmode = oflag & libc::O_ACCMODE;
    if exists && (accmode == libc::O_WRONLY || accmode == libc::O_RDWR) {
        EventKind::Write
    } else {
        EventKind::Open
    }
}

fn nofollow_from_at_flags(flags: c_int) -> c_int {
    if flags & libc::AT_SYMLINK_NOFOLLOW != 0 {
        libc::O_NOFOLLOW
    } else {
        0
    }
}

pub(crate) fn execve(t: &mut Tracer) -> Result<()> {
    let file = t.read_string_arg("execve", 1)?;
    let exe = t.normalize_path(&file, 0);
    t.update_table_for_exec(&exe);
    t.report_exec("execve", &exe, 2)
}

pub(crate) fn execveat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("execveat", 2)?;
    let flags = t.read_arg(5)? as c_int;

    let exe = t.normalize_path_at(dirfd, &pathname, nofollow_from_at_flags(flags));
    t.update_table_for_exec(&exe);
    t.report_exec("execveat", &exe, 3)
}

pub(crate) fn stat(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("stat", 1)?;
    t.report_path_access("stat", EventKind::Stat, &pathname, 0, libc::O_NOFOLLOW, 0, true);
    Ok(())
}

pub(crate) fn lstat(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("lstat", 1)?;
    t.report_path_access("lstat", EventKind::Stat, &pathname, 0, libc::O_NOFOLLOW, 0, true);
    Ok(())
}

pub(crate) fn fstat(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("fstat", fd, EventKind::Stat);
    Ok(())
}

// The libc stat wrappers bottom out here on current kernels, so this is the
// variant most stats arrive as.
pub(crate) fn newfstatat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("newfstatat", 2)?;
    let flags = t.read_arg(4)? as c_int;

    t.report_access_at(
        "newfstatat",
        EventKind::Stat,
        dirfd,
        &pathname,
        0,
        nofollow_from_at_flags(flags),
        0,
        true,
    );
    Ok(())
}

pub(crate) fn access(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("access", 1)?;
    t.report_path_access("access", EventKind::Access, &pathname, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn faccessat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("faccessat", 2)?;
    t.report_access_at("faccessat", EventKind::Access, dirfd, &pathname, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn creat(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("creat", 1)?;
    let path = t.normalize_path(&pathname, 0);
    t.report_open("creat", path, libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC);
    Ok(())
}

pub(crate) fn open(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("open", 1)?;
    let path = t.normalize_path(&pathname, 0);
    let oflag = t.read_arg(2)? as c_int;
    t.report_open("open", path, oflag);
    Ok(())
}

pub(crate) fn openat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("openat", 2)?;
    let path = t.normalize_path_at(dirfd, &pathname, 0);
    let flags = t.read_arg(3)? as c_int;
    t.report_open("openat", path, flags);
    Ok(())
}

pub(crate) fn write(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("write", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn writev(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("writev", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn pwritev(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("pwritev", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn pwritev2(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("pwritev2", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn pwrite64(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("pwrite64", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn truncate(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("truncate", 1)?;
    t.report_path_access("truncate", EventKind::Write, &path, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn ftruncate(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("ftruncate", fd, EventKind::Write);
    Ok(())
}

pub(crate) fn rmdir(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("rmdir", 1)?;

    // The sink needs to know whether the removal succeeded, so step to
    // syscall exit first. Repeated create/remove cycles on the same
    // directory must all be visible, hence no cache.
    t.advance_to_syscall_exit()?;
    let error = t.return_error()?;

    t.report_path_access(
        "rmdir",
        EventKind::Unlink,
        &path,
        libc::S_IFDIR,
        0,
        error,
        false,
    );
    Ok(())
}

pub(crate) fn rename(t: &mut Tracer) -> Result<()> {
    let oldpath = t.read_string_arg("rename", 1)?;
    let newpath = t.read_string_arg("rename", 2)?;
    t.handle_rename("rename", libc::AT_FDCWD, &oldpath, libc::AT_FDCWD, &newpath);
    Ok(())
}

pub(crate) fn renameat(t: &mut Tracer) -> Result<()> {
    let olddirfd = t.read_arg(1)? as c_int;
    let oldpath = t.read_string_arg("renameat", 2)?;
    let newdirfd = t.read_arg(3)? as c_int;
    let newpath = t.read_string_arg("renameat", 4)?;
    t.handle_rename("renameat", olddirfd, &oldpath, newdirfd, &newpath);
    Ok(())
}

pub(crate) fn renameat2(t: &mut Tracer) -> Result<()> {
    let olddirfd = t.read_arg(1)? as c_int;
    let oldpath = t.read_string_arg("renameat2", 2)?;
    let newdirfd = t.read_arg(3)? as c_int;
    let newpath = t.read_string_arg("renameat2", 4)?;
    t.handle_rename("renameat2", olddirfd, &oldpath, newdirfd, &newpath);
    Ok(())
}

pub(crate) fn link(t: &mut Tracer) -> Result<()> {
    let oldpath = t.read_string_arg("link", 1)?;
    let newpath = t.read_string_arg("link", 2)?;
    t.report_link("link", libc::AT_FDCWD, &oldpath, libc::AT_FDCWD, &newpath);
    Ok(())
}

pub(crate) fn linkat(t: &mut Tracer) -> Result<()> {
    let olddirfd = t.read_arg(1)? as c_int;
    let oldpath = t.read_string_arg("linkat", 2)?;
    let newdirfd = t.read_arg(3)? as c_int;
    let newpath = t.read_string_arg("linkat", 4)?;
    t.report_link("linkat", olddirfd, &oldpath, newdirfd, &newpath);
    Ok(())
}

pub(crate) fn unlink(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("unlink", 1)?;
    if path.is_empty() {
        return Ok(());
    }
    t.report_path_access("unlink", EventKind::Unlink, &path, 0, libc::O_NOFOLLOW, 0, true);
    Ok(())
}

pub(crate) fn unlinkat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let path = t.read_string_arg("unlinkat", 2)?;
    let flags = t.read_arg(3)? as c_int;
    if path.is_empty() {
        return Ok(());
    }

    // removing a directory never follows a symlink anyway
    let oflags = if flags & libc::AT_REMOVEDIR != 0 {
        0
    } else {
        libc::O_NOFOLLOW
    };
    t.report_access_at("unlinkat", EventKind::Unlink, dirfd, &path, 0, oflags, 0, true);
    Ok(())
}

pub(crate) fn symlink(t: &mut Tracer) -> Result<()> {
    // the link target (argument 1) is not an access, only the new link is
    let linkpath = t.read_string_arg("symlink", 2)?;
    t.report_path_access(
        "symlink",
        EventKind::Create,
        &linkpath,
        libc::S_IFLNK,
        libc::O_NOFOLLOW,
        0,
        true,
    );
    Ok(())
}

pub(crate) fn symlinkat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(2)? as c_int;
    let linkpath = t.read_string_arg("symlinkat", 3)?;
    t.report_access_at(
        "symlinkat",
        EventKind::Create,
        dirfd,
        &linkpath,
        libc::S_IFLNK,
        libc::O_NOFOLLOW,
        0,
        true,
    );
    Ok(())
}

pub(crate) fn readlink(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("readlink", 1)?;
    t.report_path_access(
        "readlink",
        EventKind::Readlink,
        &path,
        0,
        libc::O_NOFOLLOW,
        0,
        true,
    );
    Ok(())
}

pub(crate) fn readlinkat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let path = t.read_string_arg("readlinkat", 2)?;
    t.report_access_at(
        "readlinkat",
        EventKind::Readlink,
        dirfd,
        &path,
        0,
        libc::O_NOFOLLOW,
        0,
        true,
    );
    Ok(())
}

pub(crate) fn utime(t: &mut Tracer) -> Result<()> {
    let filename = t.read_string_arg("utime", 1)?;
    t.report_path_access("utime", EventKind::SetTime, &filename, 0, 0, 0, true);
    Ok(())
}

// same handler shape as utime
pub(crate) fn utimes(t: &mut Tracer) -> Result<()> {
    utime(t)
}

pub(crate) fn utimensat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("utimensat", 2)?;
    t.report_access_at("utimensat", EventKind::SetTime, dirfd, &pathname, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn futimesat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("futimesat", 2)?;
    t.report_access_at("futimesat", EventKind::SetTime, dirfd, &pathname, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn mkdir(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("mkdir", 1)?;

    // The sink distinguishes directories created by the traced build from
    // pre-existing ones, so it needs the syscall's outcome: step to syscall
    // exit before reporting, and skip the cache so creation and removal of
    // the same directory stay distinguishable.
    t.advance_to_syscall_exit()?;
    let error = t.return_error()?;

    t.report_create("mkdir", libc::AT_FDCWD, &path, libc::S_IFDIR, error, false);
    Ok(())
}

pub(crate) fn mkdirat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let path = t.read_string_arg("mkdirat", 2)?;

    // see mkdir for why this waits for the return value
    t.advance_to_syscall_exit()?;
    let error = t.return_error()?;

    t.report_create("mkdirat", dirfd, &path, libc::S_IFDIR, error, false);
    Ok(())
}

pub(crate) fn mknod(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("mknod", 1)?;
    t.report_create("mknod", libc::AT_FDCWD, &path, libc::S_IFREG, 0, true);
    Ok(())
}

pub(crate) fn mknodat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let path = t.read_string_arg("mknodat", 2)?;
    t.report_create("mknodat", dirfd, &path, libc::S_IFREG, 0, true);
    Ok(())
}

pub(crate) fn chmod(t: &mut Tracer) -> Result<()> {
    let path = t.read_string_arg("chmod", 1)?;
    t.report_path_access("chmod", EventKind::SetMode, &path, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn fchmod(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("fchmod", fd, EventKind::SetMode);
    Ok(())
}

pub(crate) fn fchmodat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("fchmodat", 2)?;
    let flags = t.read_arg(4)? as c_int;
    t.report_access_at(
        "fchmodat",
        EventKind::SetMode,
        dirfd,
        &pathname,
        0,
        nofollow_from_at_flags(flags),
        0,
        true,
    );
    Ok(())
}

pub(crate) fn chown(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("chown", 1)?;
    t.report_path_access("chown", EventKind::SetOwner, &pathname, 0, 0, 0, true);
    Ok(())
}

pub(crate) fn fchown(t: &mut Tracer) -> Result<()> {
    let fd = t.read_arg(1)? as c_int;
    t.report_fd_access("fchown", fd, EventKind::SetOwner);
    Ok(())
}

pub(crate) fn lchown(t: &mut Tracer) -> Result<()> {
    let pathname = t.read_string_arg("lchown", 1)?;
    t.report_path_access(
        "lchown",
        EventKind::SetOwner,
        &pathname,
        0,
        libc::O_NOFOLLOW,
        0,
        true,
    );
    Ok(())
}

pub(crate) fn fchownat(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("fchownat", 2)?;
    let flags = t.read_arg(5)? as c_int;
    t.report_access_at(
        "fchownat",
        EventKind::SetOwner,
        dirfd,
        &pathname,
        0,
        nofollow_from_at_flags(flags),
        0,
        true,
    );
    Ok(())
}

pub(crate) fn sendfile(t: &mut Tracer) -> Result<()> {
    let out_fd = t.read_arg(1)? as c_int;
    t.report_fd_access("sendfile", out_fd, EventKind::Write);
    Ok(())
}

pub(crate) fn copy_file_range(t: &mut Tracer) -> Result<()> {
    let fd_out = t.read_arg(3)? as c_int;
    t.report_fd_access("copy_file_range", fd_out, EventKind::Write);
    Ok(())
}

pub(crate) fn name_to_handle_at(t: &mut Tracer) -> Result<()> {
    let dirfd = t.read_arg(1)? as c_int;
    let pathname = t.read_string_arg("name_to_handle_at", 2)?;
    let flags = t.read_arg(5)? as c_int;

    let oflags = if flags & libc::AT_SYMLINK_FOLLOW != 0 {
        0
    } else {
        libc::O_NOFOLLOW
    };
    let path = t.normalize_path_at(dirfd, &pathname, oflags);
    t.report_open("name_to_handle_at", path, oflags);
    Ok(())
}

pub(crate) fn fork(t: &mut Tracer) -> Result<()> {
    t.handle_child_spawn("fork")
}

pub(crate) fn clone(t: &mut Tracer) -> Result<()> {
    t.handle_child_spawn("clone")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn missing_path_with_create_flag_is_a_creation() {
        assert_eq!(
            open_kind(0, libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC),
            EventKind::Create
        );
        assert_eq!(open_kind(0, libc::O_TRUNC), EventKind::Create);
    }

    #[test]
    fn existing_path_with_writable_mode_is_a_write() {
        let mode = libc::S_IFREG | 0o644;
        assert_eq!(open_kind(mode, libc::O_WRONLY), EventKind::Write);
        assert_eq!(open_kind(mode, libc::O_RDWR | libc::O_CREAT), EventKind::Write);
    }

    #[test]
    fn everything_else_is_a_plain_open() {
        let mode = libc::S_IFREG | 0o644;
        assert_eq!(open_kind(mode, libc::O_RDONLY), EventKind::Open);
        // a missing path without creation flags cannot create anything
        assert_eq!(open_kind(0, libc::O_RDONLY), EventKind::Open);
        assert_eq!(open_kind(mode, libc::O_CREAT), EventKind::Open);
    }

    #[test]
    fn return_errors_are_zero_iff_the_syscall_returned_zero() {
        assert_eq!(pass_fail(0), 0);
        let eacces = -(libc::EACCES as i64) as c_ulong;
        assert_ne!(pass_fail(eacces), 0);
        let enoent = -(libc::ENOENT as i64) as c_ulong;
        assert_ne!(pass_fail(enoent), 0);
    }

    #[test]
    fn at_flag_translation_only_reacts_to_nofollow() {
        assert_eq!(nofollow_from_at_flags(libc::AT_SYMLINK_NOFOLLOW), libc::O_NOFOLLOW);
        assert_eq!(nofollow_from_at_flags(0), 0);
        assert_eq!(nofollow_from_at_flags(libc::AT_REMOVEDIR), 0);
    }
}

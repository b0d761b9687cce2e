//! Path derivation against `/proc/<pid>/` for a process we are tracing.
//!
//! The tracer only ever sees raw syscall arguments: relative paths, dirfds
//! and plain file descriptors. Everything here turns those into the absolute
//! paths the sink reports, without touching the tracee itself.

use libc::{c_int, mode_t, pid_t};
use nix::sys::stat;
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

pub fn pid_path(pid: Pid) -> PathBuf {
    PathBuf::from("/proc").join(pid.as_raw().to_string())
}

/// Resolve a tracee's file descriptor via `/proc/<pid>/fd/<fd>`. Descriptors
/// that do not name a filesystem object resolve to `pipe:[inode]`,
/// `socket:[inode]` and the like, which callers filter by checking for a
/// leading `/`. Returns an empty string if the descriptor is gone.
pub fn fd_path(pid: pid_t, fd: c_int) -> String {
    let link = pid_path(Pid::from_raw(pid)).join("fd").join(fd.to_string());
    match fs::read_link(&link) {
        Ok(target) => target.to_string_lossy().into_owned(),
        Err(_) => String::new(),
    }
}

fn cwd(pid: pid_t) -> String {
    let link = pid_path(Pid::from_raw(pid)).join("cwd");
    match fs::read_link(&link) {
        Ok(target) => target.to_string_lossy().into_owned(),
        Err(_) => String::new(),
    }
}

/// Mode bits of `path`, or `0` if it cannot be stated. Symlinks report their
/// own mode, not their target's, so `S_IFLNK` survives.
pub fn file_mode(path: &str) -> mode_t {
    match stat::lstat(path) {
        Ok(st) => st.st_mode,
        Err(_) => 0,
    }
}

/// Turn a (dirfd, path) pair from a `*at` syscall into an absolute path.
///
/// Relative paths are anchored at the tracee's cwd for `AT_FDCWD`, otherwise
/// at whatever the dirfd resolves to. A dirfd that does not resolve to a
/// filesystem path (a pipe, a socket) yields an empty string, as does an
/// empty input path; callers treat empty as "do not report".
///
/// Symlinks in the directory part are resolved when the directory exists.
/// The final component follows the same rule only when `oflags` does not
/// carry `O_NOFOLLOW` and the full path exists; a path about to be created
/// keeps its (resolved-parent) spelling.
pub fn normalize_path_at(dirfd: c_int, path: &str, oflags: c_int, pid: pid_t) -> String {
    if path.is_empty() {
        return String::new();
    }

    let joined = if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        let base = if dirfd == libc::AT_FDCWD {
            cwd(pid)
        } else {
            fd_path(pid, dirfd)
        };
        if !base.starts_with('/') {
            return String::new();
        }
        Path::new(&base).join(path)
    };

    resolve(&joined, oflags & libc::O_NOFOLLOW != 0)
}

fn resolve(path: &Path, nofollow: bool) -> String {
    if !nofollow {
        if let Ok(resolved) = fs::canonicalize(path) {
            return resolved.to_string_lossy().into_owned();
        }
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = fs::canonicalize(parent) {
            return parent.join(name).to_string_lossy().into_owned();
        }
    }
    lexical_normalize(path)
}

/// Purely textual cleanup of `.` and `..` components, for paths whose parent
/// directories do not (yet) exist.
fn lexical_normalize(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

/// All entries below `root`, recursively, as absolute paths. The root itself
/// is not included. Directories that vanish mid-walk are skipped.
pub fn enumerate_directory(root: &str) -> io::Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![PathBuf::from(root)];
    let mut at_root = true;
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if at_root => return Err(err),
            Err(_) => continue,
        };
        at_root = false;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path.clone());
            }
            found.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(found)
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use nix::unistd::getpid;
    use std::os::unix::fs::symlink;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fstrace-proc-{}-{}", tag, getpid()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lexical_normalize_strips_dot_components() {
        assert_eq!(lexical_normalize(Path::new("/a/./b/../c")), "/a/c");
        assert_eq!(lexical_normalize(Path::new("/a/b/c/../../d")), "/a/d");
    }

    #[test]
    fn normalize_resolves_symlinked_directories() {
        let dir = scratch_dir("symlink");
        let real = dir.join("real");
        fs::create_dir(&real).unwrap();
        symlink(&real, dir.join("alias")).unwrap();

        let me = getpid().as_raw();
        let through = format!("{}/alias/out.txt", dir.display());
        let resolved = normalize_path_at(libc::AT_FDCWD, &through, 0, me);
        // canonicalize may rewrite temp_dir prefixes, so compare resolved forms
        let expected = fs::canonicalize(&real).unwrap().join("out.txt");
        assert_eq!(resolved, expected.to_string_lossy());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn normalize_anchors_relative_paths_at_the_cwd() {
        let me = getpid().as_raw();
        let resolved = normalize_path_at(libc::AT_FDCWD, "some/file.txt", 0, me);
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            resolved,
            fs::canonicalize(&cwd).unwrap().join("some/file.txt").to_string_lossy()
        );
    }

    #[test]
    fn empty_path_and_non_path_dirfd_yield_nothing() {
        let me = getpid().as_raw();
        assert_eq!(normalize_path_at(libc::AT_FDCWD, "", 0, me), "");

        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        assert_eq!(normalize_path_at(read_end, "rel", 0, me), "");
        assert!(!fd_path(me, read_end).starts_with('/'));
        nix::unistd::close(read_end).unwrap();
        nix::unistd::close(write_end).unwrap();
    }

    #[test]
    fn enumerate_excludes_the_root_and_recurses() {
        let dir = scratch_dir("walk");
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("top.txt"), b"x").unwrap();
        fs::write(dir.join("sub/leaf.txt"), b"y").unwrap();

        let root = dir.to_string_lossy().into_owned();
        let mut entries = enumerate_directory(&root).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                format!("{}/sub", root),
                format!("{}/sub/leaf.txt", root),
                format!("{}/top.txt", root),
            ]
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_mode_reports_symlinks_without_following() {
        let dir = scratch_dir("mode");
        fs::write(dir.join("file"), b"x").unwrap();
        symlink(dir.join("file"), dir.join("link")).unwrap();

        let link = dir.join("link").to_string_lossy().into_owned();
        assert_eq!(file_mode(&link) & libc::S_IFMT, libc::S_IFLNK);
        assert_eq!(file_mode("/definitely/not/here"), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn basename_takes_the_final_component() {
        assert_eq!(basename("/usr/bin/cc"), "cc");
        assert_eq!(basename("cc"), "cc");
    }
}

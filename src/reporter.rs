//! The event sink. The tracer is transport-agnostic: it hands every
//! [`AccessEvent`] to an [`AccessReporter`] and never looks back.

use libc::{c_int, mode_t, pid_t};
use log::info;

use crate::event::{AccessEvent, EventKind};
use crate::proc;

/// Consumer of the tracer's access events.
///
/// The reporting methods are the actual sink surface. The path helpers have
/// default implementations over `/proc/<pid>/`; a sink that keeps its own
/// view of the tracee's filesystem (a path cache, a virtualized root) can
/// override them.
pub trait AccessReporter {
    /// Deliver one access event. `check_cache` is a hint that the sink may
    /// deduplicate this event; handlers whose repetitions are meaningful
    /// (directory creation/removal, forks) pass `false`.
    fn report_access(&mut self, syscall: &str, event: AccessEvent, check_cache: bool);

    /// Build and deliver an event for a path relative to `dirfd`. Paths that
    /// do not resolve to the filesystem (empty strings, dirfds naming pipes
    /// or sockets) are dropped here.
    #[allow(clippy::too_many_arguments)]
    fn report_access_at(
        &mut self,
        syscall: &str,
        kind: EventKind,
        dirfd: c_int,
        path: &str,
        mode: mode_t,
        oflags: c_int,
        error: i64,
        check_cache: bool,
        pid: pid_t,
    ) {
        let normalized = self.normalize_path_at(dirfd, path, oflags, pid);
        if normalized.is_empty() {
            return;
        }
        let mut event = AccessEvent::new(kind, pid, normalized, self.program_path());
        event.mode = mode;
        event.error = error;
        self.report_access(syscall, event, check_cache);
    }

    fn report_exec(&mut self, syscall: &str, basename: &str, exe_path: &str, pid: pid_t);

    /// Space-joined argv of an exec, only requested when
    /// [`AccessReporter::is_reporting_process_args`] returns true.
    fn report_exec_args(&mut self, pid: pid_t, args: &str);

    fn send_exit_report(&mut self, pid: pid_t);

    /// Path of the program this sandbox was asked to observe. Used as the
    /// executor on events and as the exe fallback for orphaned forks.
    fn program_path(&self) -> String;

    fn is_reporting_process_args(&self) -> bool {
        false
    }

    /// Called once at attach, before any event: the tracer's own descriptors
    /// must never be folded into the tracee's file table.
    fn disable_fd_table(&mut self) {}

    fn normalize_path(&self, path: &str, oflags: c_int, pid: pid_t) -> String {
        self.normalize_path_at(libc::AT_FDCWD, path, oflags, pid)
    }

    fn normalize_path_at(&self, dirfd: c_int, path: &str, oflags: c_int, pid: pid_t) -> String {
        proc::normalize_path_at(dirfd, path, oflags, pid)
    }

    fn fd_to_path(&self, fd: c_int, pid: pid_t) -> String {
        proc::fd_path(pid, fd)
    }

    fn get_mode(&self, path: &str) -> mode_t {
        proc::file_mode(path)
    }

    fn enumerate_directory(&self, root: &str) -> Option<Vec<String>> {
        proc::enumerate_directory(root).ok()
    }
}

/// Reference sink: logs every report. What the bundled binary wires up.
pub struct LogReporter {
    program: String,
    report_args: bool,
}

impl LogReporter {
    pub fn new(program: String, report_args: bool) -> Self {
        Self { program, report_args }
    }
}

impl AccessReporter for LogReporter {
    fn report_access(&mut self, syscall: &str, event: AccessEvent, _check_cache: bool) {
        if event.dst_path.is_empty() {
            info!(
                "[{}] {} {:?} {} (mode {:o}, error {})",
                event.pid, syscall, event.kind, event.path, event.mode, event.error
            );
        } else {
            info!(
                "[{}] {} {:?} {} -> {} (mode {:o}, error {})",
                event.pid, syscall, event.kind, event.path, event.dst_path, event.mode, event.error
            );
        }
    }

    fn report_exec(&mut self, syscall: &str, basename: &str, exe_path: &str, pid: pid_t) {
        info!("[{}] {} {} ({})", pid, syscall, basename, exe_path);
    }

    fn report_exec_args(&mut self, pid: pid_t, args: &str) {
        info!("[{}] exec args: {}", pid, args);
    }

    fn send_exit_report(&mut self, pid: pid_t) {
        info!("[{}] exited", pid);
    }

    fn program_path(&self) -> String {
        self.program.clone()
    }

    fn is_reporting_process_args(&self) -> bool {
        self.report_args
    }
}

//! The supervising side of the sandbox: a single-threaded event pump over
//! kernel-delivered stops. Only this thread may issue trace commands for its
//! tracees, so the process table lives here unsynchronized.

pub mod decode;
pub mod handlers;
pub mod ptrace;
pub mod registry;
pub mod table;

use libc::{c_int, c_ulong, mode_t, pid_t};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, waitpid, WaitStatus};
use nix::unistd::Pid;
use simple_error::{bail, try_with};

use crate::event::{AccessEvent, EventKind};
use crate::latch::RendezvousLatch;
use crate::proc;
use crate::reporter::AccessReporter;
use crate::result::Result;
use crate::tracer::table::ProcessTable;

/// Attach to `pid`, release it through the rendezvous latch and pump events
/// until no descendant is left.
pub fn attach_to_process(
    reporter: Box<dyn AccessReporter>,
    pid: Pid,
    exe: &str,
    latch_name: &str,
) -> Result<()> {
    let mut tracer = Tracer::attach(reporter, pid, exe)?;

    // attach complete: let the tracee continue past its wait
    let latch = try_with!(
        RendezvousLatch::open(latch_name),
        "cannot open rendezvous latch {}",
        latch_name
    );
    try_with!(latch.post(), "cannot release the tracee");
    drop(latch);

    tracer.run()
}

pub struct Tracer {
    reporter: Box<dyn AccessReporter>,
    table: ProcessTable,
    // the tracee whose stop is being handled
    current: Pid,
}

impl Tracer {
    /// Seize `pid` and prepare the first table entry. The tracee is resumed
    /// but the caller still has to post the rendezvous latch.
    pub fn attach(mut reporter: Box<dyn AccessReporter>, pid: Pid, exe: &str) -> Result<Self> {
        debug!("tracer {} attaching to {}", nix::unistd::getpid(), pid);
        ptrace::attach_seize(pid)?;

        let mut table = ProcessTable::new();
        table.insert(pid.as_raw(), exe.to_string());
        reporter.disable_fd_table();

        let tracer = Self {
            reporter,
            table,
            current: pid,
        };
        tracer.resume_trace(pid, None);
        Ok(tracer)
    }

    /// The event loop. Blocks on the next stop from any descendant and
    /// classifies it; ends when the kernel reports no children left.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let status = match wait::wait() {
                Ok(status) => status,
                Err(Errno::ECHILD) => return Ok(()), // no descendants remain
                Err(err) => bail!("wait for tracees failed: {}", err),
            };

            match status {
                // the exit-event stop already did the bookkeeping
                WaitStatus::Exited(_, _) | WaitStatus::Signaled(_, _, _) => {}
                WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_VFORK => {
                    // discovered at exec time instead, see update_table_for_exec
                    self.resume_trace(pid, None);
                }
                WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_EXIT => {
                    self.handle_exit_stop(pid);
                }
                WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_SECCOMP => {
                    self.handle_classifier_stop(pid);
                }
                WaitStatus::PtraceEvent(pid, _, _) => self.resume_trace(pid, None),
                WaitStatus::PtraceSyscall(pid) => self.resume_trace(pid, None),
                WaitStatus::Stopped(pid, signal) => {
                    // signal-delivery stop: hand the signal on
                    self.resume_trace(pid, Some(signal));
                }
                other => bail!("wait returned an impossible status: {:?}", other),
            }
        }
    }

    fn handle_classifier_stop(&mut self, pid: Pid) {
        self.current = pid;
        match ptrace::peek_user(pid, crate::cpu::syscall_nr_offset()) {
            Ok(nr) => match registry::lookup(nr) {
                Some(entry) => {
                    if let Err(err) = (entry.handler)(self) {
                        warn!("{} handler failed for {}: {}", entry.name, pid, err);
                    }
                }
                None => debug!("filter surfaced unsupported syscall {} for {}", nr, pid),
            },
            Err(err) => warn!("cannot read syscall number for {}: {}", pid, err),
        }
        // discard the syscall-exit stop; handlers that needed the return
        // value have consumed it already
        self.resume_discard(pid);
    }

    fn handle_exit_stop(&mut self, pid: Pid) {
        self.current = pid;
        match ptrace::getevent(pid) {
            Ok(status) => debug!(
                "tracee {} exited with status {}",
                pid,
                libc::WEXITSTATUS(status as c_int)
            ),
            Err(err) => debug!("cannot read exit status of {}: {}", pid, err),
        }
        self.table.remove(pid.as_raw());
        self.reporter.send_exit_report(pid.as_raw());
        self.resume_trace(pid, None);
    }

    fn resume_trace(&self, pid: Pid, signal: Option<Signal>) {
        log_resume_failure(pid, nix::sys::ptrace::syscall(pid, signal));
    }

    fn resume_discard(&self, pid: Pid) {
        log_resume_failure(pid, nix::sys::ptrace::cont(pid, None));
    }

    pub(crate) fn pid(&self) -> pid_t {
        self.current.as_raw()
    }

    fn executor(&self) -> String {
        self.reporter.program_path()
    }

    pub(crate) fn read_arg(&self, index: usize) -> Result<c_ulong> {
        decode::read_arg(self.current, index)
    }

    pub(crate) fn read_string_arg(&self, syscall: &str, index: usize) -> Result<String> {
        decode::read_string_arg(self.current, syscall, index)
    }

    pub(crate) fn read_arg_vector(&self, syscall: &str, index: usize) -> Result<String> {
        decode::read_arg_vector(self.current, syscall, index)
    }

    /// Step the current tracee to its syscall-exit stop so the return value
    /// becomes readable. Only valid while handling its classifier stop.
    pub(crate) fn advance_to_syscall_exit(&self) -> Result<WaitStatus> {
        let pid = self.current;
        try_with!(
            nix::sys::ptrace::syscall(pid, None),
            "cannot step {} to syscall exit",
            pid
        );
        let status = try_with!(waitpid(pid, None), "cannot wait for {} at syscall exit", pid);
        Ok(status)
    }

    /// Like [`Tracer::advance_to_syscall_exit`], but steps over the
    /// intervening fork/clone event stop so the return register holds the
    /// child pid afterwards.
    pub(crate) fn advance_past_child_stop(&self) -> Result<()> {
        let status = self.advance_to_syscall_exit()?;
        if let WaitStatus::PtraceEvent(_, _, event) = status {
            if event == libc::PTRACE_EVENT_FORK || event == libc::PTRACE_EVENT_CLONE {
                self.advance_to_syscall_exit()?;
            }
        }
        Ok(())
    }

    /// Pass/fail view of the return register for handlers that advanced to
    /// syscall exit. Zero iff the syscall returned zero; never a faithful
    /// errno.
    pub(crate) fn return_error(&self) -> Result<i64> {
        Ok(handlers::pass_fail(self.read_arg(0)?))
    }

    fn emit(
        &mut self,
        syscall: &str,
        kind: EventKind,
        path: String,
        mode: mode_t,
        error: i64,
        check_cache: bool,
    ) {
        if path.is_empty() {
            return;
        }
        let mut event = AccessEvent::new(kind, self.pid(), path, self.executor());
        event.mode = mode;
        event.error = error;
        self.reporter.report_access(syscall, event, check_cache);
    }

    pub(crate) fn report_path_access(
        &mut self,
        syscall: &str,
        kind: EventKind,
        path: &str,
        mode: mode_t,
        oflags: c_int,
        error: i64,
        check_cache: bool,
    ) {
        let pid = self.pid();
        self.reporter.report_access_at(
            syscall,
            kind,
            libc::AT_FDCWD,
            path,
            mode,
            oflags,
            error,
            check_cache,
            pid,
        );
    }

    pub(crate) fn report_access_at(
        &mut self,
        syscall: &str,
        kind: EventKind,
        dirfd: c_int,
        path: &str,
        mode: mode_t,
        oflags: c_int,
        error: i64,
        check_cache: bool,
    ) {
        let pid = self.pid();
        self.reporter
            .report_access_at(syscall, kind, dirfd, path, mode, oflags, error, check_cache, pid);
    }

    /// Classify an open-family access against the pre-call state of `path`:
    /// creation if it does not exist yet and the call may create it, a write
    /// if it exists and a writable mode was requested, a plain open
    /// otherwise.
    pub(crate) fn report_open(&mut self, syscall: &str, path: String, oflag: c_int) {
        if path.is_empty() {
            return;
        }
        let mode = self.reporter.get_mode(&path);
        let kind = handlers::open_kind(mode, oflag);
        self.emit(syscall, kind, path, mode, 0, true);
    }

    pub(crate) fn report_create(
        &mut self,
        syscall: &str,
        dirfd: c_int,
        path: &str,
        mode: mode_t,
        error: i64,
        check_cache: bool,
    ) {
        self.report_access_at(syscall, EventKind::Create, dirfd, path, mode, 0, error, check_cache);
    }

    /// Report against a plain file descriptor. Descriptors that do not
    /// resolve to a filesystem path (pipes, sockets, anonymous inodes) are
    /// ignored.
    pub(crate) fn report_fd_access(&mut self, syscall: &str, fd: c_int, kind: EventKind) {
        let path = self.reporter.fd_to_path(fd, self.pid());
        if !path.starts_with('/') {
            return;
        }
        self.emit(syscall, kind, path, 0, 0, true);
    }

    pub(crate) fn report_link(
        &mut self,
        syscall: &str,
        olddirfd: c_int,
        oldpath: &str,
        newdirfd: c_int,
        newpath: &str,
    ) {
        let src = self
            .reporter
            .normalize_path_at(olddirfd, oldpath, libc::O_NOFOLLOW, self.pid());
        let dst = self
            .reporter
            .normalize_path_at(newdirfd, newpath, libc::O_NOFOLLOW, self.pid());
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let mut event = AccessEvent::new(EventKind::Link, self.pid(), src, self.executor());
        event.dst_path = dst;
        self.reporter.report_access(syscall, event, true);
    }

    /// A rename is reported as what it does to the tree: every entry under a
    /// renamed directory is unlinked at its old location and created at the
    /// rewritten one; a plain file is a single unlink/create pair.
    pub(crate) fn handle_rename(
        &mut self,
        syscall: &str,
        olddirfd: c_int,
        oldpath: &str,
        newdirfd: c_int,
        newpath: &str,
    ) {
        let old = self
            .reporter
            .normalize_path_at(olddirfd, oldpath, libc::O_NOFOLLOW, self.pid());
        let new = self
            .reporter
            .normalize_path_at(newdirfd, newpath, libc::O_NOFOLLOW, self.pid());
        if old.is_empty() || new.is_empty() {
            return;
        }

        let mode = self.reporter.get_mode(&old);
        if mode & libc::S_IFMT == libc::S_IFDIR {
            let entries = match self.reporter.enumerate_directory(&old) {
                Some(entries) => entries,
                None => return,
            };
            for entry in entries {
                let entry_mode = self.reporter.get_mode(&entry);
                let dest = rewrite_prefix(&entry, &old, &new);
                // repeated moves through the same paths all matter
                self.emit(syscall, EventKind::Unlink, entry, entry_mode, 0, false);
                self.emit(syscall, EventKind::Create, dest, 0, 0, false);
            }
        } else {
            let dest_mode = self.reporter.get_mode(&new);
            self.emit(syscall, EventKind::Unlink, old, mode, 0, true);
            self.emit(syscall, EventKind::Create, new, dest_mode, 0, true);
        }
    }

    /// Record an image replacement. A pid we have never seen exec'ing can
    /// only be a vfork child (vfork is not surfaced; its suspended parent
    /// would wedge the loop), so the table is repaired here with a synthetic
    /// fork event ahead of the exec report.
    pub(crate) fn update_table_for_exec(&mut self, exe_path: &str) {
        if self.table.set_exe(self.pid(), exe_path) {
            return;
        }
        let mut event = AccessEvent::new(
            EventKind::Fork,
            self.pid(),
            exe_path.to_string(),
            exe_path.to_string(),
        );
        event.child_pid = self.pid();
        self.reporter.report_access("vfork", event, false);
        self.table.insert(self.pid(), exe_path.to_string());
        debug!("discovered vfork child {}", self.pid());
    }

    pub(crate) fn report_exec(&mut self, syscall: &str, exe_path: &str, argv_index: usize) -> Result<()> {
        self.reporter
            .report_exec(syscall, proc::basename(exe_path), exe_path, self.pid());
        if self.reporter.is_reporting_process_args() {
            let args = self.read_arg_vector(syscall, argv_index)?;
            self.reporter.report_exec_args(self.pid(), &args);
        }
        Ok(())
    }

    /// Shared tail of the fork and clone handlers: advance until the child
    /// pid is in the return register, report the fork, inherit the parent's
    /// executable into the new table entry.
    pub(crate) fn handle_child_spawn(&mut self, syscall: &str) -> Result<()> {
        self.advance_past_child_stop()?;
        let child = self.read_arg(0)? as pid_t;

        let exe = match self.table.get(self.pid()) {
            Some(entry) => entry.exe_path.clone(),
            // not expected while stops arrive in order
            None => self.executor(),
        };

        let mut event = AccessEvent::new(EventKind::Fork, self.pid(), exe.clone(), exe.clone());
        event.child_pid = child;
        self.reporter.report_access(syscall, event, false);

        // spawned children of a traced process are seized automatically
        self.table.insert(child, exe);
        debug!("tracking new tracee {}", child);
        Ok(())
    }

    pub(crate) fn normalize_path(&self, path: &str, oflags: c_int) -> String {
        self.reporter.normalize_path(path, oflags, self.pid())
    }

    pub(crate) fn normalize_path_at(&self, dirfd: c_int, path: &str, oflags: c_int) -> String {
        self.reporter.normalize_path_at(dirfd, path, oflags, self.pid())
    }
}

fn log_resume_failure(pid: Pid, res: nix::Result<()>) {
    match res {
        // ESRCH: the tracee is already gone
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!("cannot resume {}: {}", pid, err),
    }
}

fn rewrite_prefix(path: &str, old_root: &str, new_root: &str) -> String {
    match path.strip_prefix(old_root) {
        Some(rest) => format!("{}{}", new_root, rest),
        None => path.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use nix::unistd::getpid;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;

    type Recorded = Rc<RefCell<Vec<(String, AccessEvent, bool)>>>;

    struct RecordingReporter {
        events: Recorded,
    }

    impl AccessReporter for RecordingReporter {
        fn report_access(&mut self, syscall: &str, event: AccessEvent, check_cache: bool) {
            self.events
                .borrow_mut()
                .push((syscall.to_string(), event, check_cache));
        }

        fn report_exec(&mut self, _syscall: &str, _basename: &str, _exe_path: &str, _pid: pid_t) {}

        fn report_exec_args(&mut self, _pid: pid_t, _args: &str) {}

        fn send_exit_report(&mut self, _pid: pid_t) {}

        fn program_path(&self) -> String {
            "/opt/builder".to_string()
        }
    }

    fn recording_tracer(pid: pid_t) -> (Tracer, Recorded) {
        let events: Recorded = Rc::new(RefCell::new(Vec::new()));
        let tracer = Tracer {
            reporter: Box::new(RecordingReporter {
                events: Rc::clone(&events),
            }),
            table: ProcessTable::new(),
            current: Pid::from_raw(pid),
        };
        (tracer, events)
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fstrace-tracer-{}-{}", tag, getpid()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rename_rewrites_are_prefix_replacements() {
        assert_eq!(rewrite_prefix("/a/f", "/a", "/b"), "/b/f");
        assert_eq!(rewrite_prefix("/a/sub/deep", "/a", "/b/c"), "/b/c/sub/deep");
        assert_eq!(rewrite_prefix("/elsewhere/f", "/a", "/b"), "/elsewhere/f");
    }

    #[test]
    fn exec_by_an_unknown_pid_is_discovered_as_a_vfork_child() {
        let (mut tracer, events) = recording_tracer(4242);

        tracer.update_table_for_exec("/bin/ls");

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        let (syscall, event, check_cache) = &events[0];
        assert_eq!(syscall, "vfork");
        assert_eq!(event.kind, EventKind::Fork);
        assert_eq!(event.pid, 4242);
        assert_eq!(event.child_pid, 4242);
        assert!(!check_cache);
        // the entry exists as soon as the fork event is out
        assert_eq!(tracer.table.get(4242).unwrap().exe_path, "/bin/ls");
    }

    #[test]
    fn exec_by_a_known_pid_only_updates_its_entry() {
        let (mut tracer, events) = recording_tracer(4242);
        tracer.table.insert(4242, "/bin/sh".to_string());

        tracer.update_table_for_exec("/bin/ls");

        assert!(events.borrow().is_empty());
        assert_eq!(tracer.table.get(4242).unwrap().exe_path, "/bin/ls");
    }

    #[test]
    fn directory_rename_expands_to_one_pair_per_entry() {
        let dir = scratch_dir("dir-rename");
        fs::create_dir(dir.join("a")).unwrap();
        fs::write(dir.join("a/f"), b"x").unwrap();
        let old = fs::canonicalize(dir.join("a")).unwrap();
        let old = old.to_string_lossy();
        let new = format!("{}/b", fs::canonicalize(&dir).unwrap().to_string_lossy());

        let (mut tracer, events) = recording_tracer(getpid().as_raw());
        tracer.handle_rename("rename", libc::AT_FDCWD, &old, libc::AT_FDCWD, &new);

        let events = events.borrow();
        assert_eq!(events.len(), 2);

        let (_, unlink, unlink_cached) = &events[0];
        assert_eq!(unlink.kind, EventKind::Unlink);
        assert_eq!(unlink.path, format!("{}/f", old));
        assert!(!unlink_cached);

        let (_, create, create_cached) = &events[1];
        assert_eq!(create.kind, EventKind::Create);
        assert_eq!(create.path, format!("{}/f", new));
        assert!(!create_cached);

        drop(events);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_rename_is_a_single_unlink_create_pair() {
        let dir = scratch_dir("file-rename");
        fs::write(dir.join("src.txt"), b"x").unwrap();
        let old = fs::canonicalize(dir.join("src.txt")).unwrap();
        let old = old.to_string_lossy();
        let new = format!("{}/dst.txt", fs::canonicalize(&dir).unwrap().to_string_lossy());

        let (mut tracer, events) = recording_tracer(getpid().as_raw());
        tracer.handle_rename("rename", libc::AT_FDCWD, &old, libc::AT_FDCWD, &new);

        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.kind, EventKind::Unlink);
        assert_eq!(events[0].1.path, old);
        assert_eq!(events[0].1.mode & libc::S_IFMT, libc::S_IFREG);
        assert_eq!(events[1].1.kind, EventKind::Create);
        assert_eq!(events[1].1.path, new);

        drop(events);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fd_reports_skip_descriptors_without_a_path() {
        // current pid is this test process, so /proc resolution is real
        let (mut tracer, events) = recording_tracer(getpid().as_raw());

        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        tracer.report_fd_access("write", write_end, EventKind::Write);
        assert!(events.borrow().is_empty());
        nix::unistd::close(read_end).unwrap();
        nix::unistd::close(write_end).unwrap();

        let dir = scratch_dir("fd-report");
        let file = dir.join("out.log");
        fs::write(&file, b"x").unwrap();
        let opened = fs::File::open(&file).unwrap();
        use std::os::unix::io::AsRawFd;
        tracer.report_fd_access("write", opened.as_raw_fd(), EventKind::Write);

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.kind, EventKind::Write);
        assert_eq!(events[0].1.path, fs::canonicalize(&file).unwrap().to_string_lossy());

        drop(events);
        drop(opened);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unresolvable_paths_are_never_reported() {
        let (mut tracer, events) = recording_tracer(getpid().as_raw());

        tracer.report_path_access("unlink", EventKind::Unlink, "", 0, libc::O_NOFOLLOW, 0, true);
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        tracer.report_access_at(
            "readlinkat",
            EventKind::Readlink,
            read_end,
            "target",
            0,
            libc::O_NOFOLLOW,
            0,
            true,
        );
        nix::unistd::close(read_end).unwrap();
        nix::unistd::close(write_end).unwrap();

        assert!(events.borrow().is_empty());
    }
}

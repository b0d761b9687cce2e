use libc::{mode_t, pid_t};

/// What a traced syscall did to the filesystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    Open,
    Write,
    Create,
    Stat,
    Access,
    Unlink,
    Link,
    Readlink,
    SetTime,
    SetMode,
    SetOwner,
    Fork,
}

/// The sandbox only observes; every event is a notification after the fact.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventAction {
    Notify,
}

/// One observed filesystem-affecting action, ready for the sink.
///
/// `error` is pass/fail-shaped: it is `0` for success and for every handler
/// that does not wait for the syscall to finish. Only the directory-mutating
/// handlers (mkdir, mkdirat, rmdir) fill in a non-zero value, and even then
/// it must not be interpreted as a specific errno.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEvent {
    pub kind: EventKind,
    pub action: EventAction,
    pub pid: pid_t,
    pub child_pid: pid_t,
    pub parent_pid: pid_t,
    pub path: String,
    pub dst_path: String,
    pub executor: String,
    pub mode: mode_t,
    pub modified: bool,
    pub error: i64,
}

impl AccessEvent {
    pub fn new(kind: EventKind, pid: pid_t, path: String, executor: String) -> Self {
        Self {
            kind,
            action: EventAction::Notify,
            pid,
            child_pid: 0,
            parent_pid: 0,
            path,
            dst_path: String::new(),
            executor,
            mode: 0,
            modified: false,
            error: 0,
        }
    }
}

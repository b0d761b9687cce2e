use libc::pid_t;
use std::collections::BTreeMap;

/// A process currently under trace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessEntry {
    pub pid: pid_t,
    pub exe_path: String,
}

/// The live tracees, keyed by pid. Owned exclusively by the tracer thread;
/// every mutation funnels through the event loop, so there is nothing to
/// synchronize.
#[derive(Default)]
pub struct ProcessTable {
    entries: BTreeMap<pid_t, ProcessEntry>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `pid`, so a pid is never listed twice.
    pub fn insert(&mut self, pid: pid_t, exe_path: String) {
        self.entries.insert(pid, ProcessEntry { pid, exe_path });
    }

    pub fn remove(&mut self, pid: pid_t) -> Option<ProcessEntry> {
        self.entries.remove(&pid)
    }

    pub fn get(&self, pid: pid_t) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    pub fn contains(&self, pid: pid_t) -> bool {
        self.entries.contains_key(&pid)
    }

    /// Record the image replacement of `pid`. Returns false if the pid was
    /// not being tracked, which the exec handler treats as vfork discovery.
    pub fn set_exe(&mut self, pid: pid_t, exe_path: &str) -> bool {
        match self.entries.get_mut(&pid) {
            Some(entry) => {
                entry.exe_path = exe_path.to_string();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn one_entry_per_pid() {
        let mut table = ProcessTable::new();
        table.insert(10, "/bin/a".into());
        table.insert(10, "/bin/b".into());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(10).unwrap().exe_path, "/bin/b");
    }

    #[test]
    fn exec_updates_only_known_pids() {
        let mut table = ProcessTable::new();
        table.insert(10, "/bin/a".into());
        assert!(table.set_exe(10, "/bin/sh"));
        assert_eq!(table.get(10).unwrap().exe_path, "/bin/sh");
        assert!(!table.set_exe(11, "/bin/sh"));
        assert!(!table.contains(11));
    }

    #[test]
    fn removal_empties_the_table() {
        let mut table = ProcessTable::new();
        table.insert(10, "/bin/a".into());
        table.insert(11, "/bin/b".into());
        let gone = table.remove(10).unwrap();
        assert_eq!(gone.pid, 10);
        assert!(!table.contains(10));
        table.remove(11).unwrap();
        assert!(table.is_empty());
        assert!(table.remove(11).is_none());
    }
}

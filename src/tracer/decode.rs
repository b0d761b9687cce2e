//! Syscall argument decoding out of a stopped tracee.
//!
//! Register-held arguments come from the user area; string arguments are
//! streamed out of the tracee's address space one word at a time. A peek
//! fault mid-string is a soft error: the caller gets whatever accumulated,
//! and the event loop is unaffected.

use libc::{c_long, c_ulong};
use log::debug;
use nix::unistd::Pid;
use simple_error::{bail, try_with};
use std::mem::size_of;

use crate::cpu;
use crate::result::Result;
use crate::tracer::ptrace;

/// Value of the argument at `index` (1-based; 0 is the return value).
pub fn read_arg(pid: Pid, index: usize) -> Result<c_ulong> {
    let offset = match cpu::argument_offset(index) {
        Some(offset) => offset,
        None => bail!("argument index {} is beyond the register window", index),
    };
    let value = try_with!(
        ptrace::peek_user(pid, offset),
        "cannot peek argument {} of {}",
        index,
        pid
    );
    Ok(value as c_ulong)
}

/// String argument at `index`: a pointer is read from the register window,
/// then the string is copied out of tracee memory.
pub fn read_string_arg(pid: Pid, syscall: &str, index: usize) -> Result<String> {
    let addr = read_arg(pid, index)?;
    Ok(read_string_at(pid, syscall, addr as u64, true, 0))
}

/// Copy a string out of tracee memory starting at `addr`. Stops at the
/// first NUL when `null_terminated`, otherwise after `length` bytes. Peek
/// faults end the read with what was gathered so far.
pub fn read_string_at(pid: Pid, syscall: &str, addr: u64, null_terminated: bool, length: usize) -> String {
    let mut bytes = Vec::with_capacity(libc::PATH_MAX as usize);
    let mut addr = addr;

    'words: loop {
        let word = match ptrace::peek_data(pid, addr) {
            Ok(word) => word,
            Err(err) => {
                debug!("peek failed while decoding {} for {}: {}", syscall, pid, err);
                break;
            }
        };
        addr += size_of::<c_long>() as u64;

        for byte in word.to_ne_bytes().iter() {
            if null_terminated && *byte == 0 {
                break 'words;
            }
            if length > 0 && bytes.len() == length {
                break 'words;
            }
            bytes.push(*byte);
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Space-joined pointer-array argument (argv/envp shape): the argument at
/// `index` is the array base; each word is either a pointer to a
/// NUL-terminated string or the terminating zero.
pub fn read_arg_vector(pid: Pid, syscall: &str, index: usize) -> Result<String> {
    let regs = ptrace::getregs(pid)?;
    let mut addr = match regs.arg(index) {
        Some(addr) => addr,
        None => bail!("argument index {} is beyond the register window", index),
    };

    let mut joined = String::with_capacity(libc::PATH_MAX as usize);
    let mut first = true;
    loop {
        let element = match ptrace::peek_data(pid, addr) {
            Ok(element) => element,
            Err(err) => {
                debug!("peek failed while decoding {} args for {}: {}", syscall, pid, err);
                break;
            }
        };
        if element == 0 {
            break;
        }
        if !first {
            joined.push(' ');
        }
        joined.push_str(&read_string_at(pid, syscall, element as u64, true, 0));
        addr += size_of::<c_ulong>() as u64;
        first = false;
    }

    Ok(joined)
}

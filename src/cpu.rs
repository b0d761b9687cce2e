#[cfg(target_arch = "x86_64")]
mod arch {
    use libc::c_long;
    use std::mem::size_of;

    /// General-purpose register snapshot, laid out as the kernel returns it
    /// for `PTRACE_GETREGS`.
    #[repr(C)]
    #[derive(Clone, Copy, Debug)]
    pub struct Regs {
        pub r15: u64,
        pub r14: u64,
        pub r13: u64,
        pub r12: u64,
        pub rbp: u64,
        pub rbx: u64,
        pub r11: u64,
        pub r10: u64,
        pub r9: u64,
        pub r8: u64,
        pub rax: u64,
        pub rcx: u64,
        pub rdx: u64,
        pub rsi: u64,
        pub rdi: u64,
        pub orig_rax: u64,
        pub rip: u64,
        pub cs: u64,
        pub eflags: u64,
        pub rsp: u64,
        pub ss: u64,
        pub fs_base: u64,
        pub gs_base: u64,
        pub ds: u64,
        pub es: u64,
        pub fs: u64,
        pub gs: u64,
    }

    // Word indices into the user area (sys/reg.h layout).
    const R10: usize = 7;
    const R9: usize = 8;
    const R8: usize = 9;
    const RAX: usize = 10;
    const RDX: usize = 12;
    const RSI: usize = 13;
    const RDI: usize = 14;
    const ORIG_RAX: usize = 15;

    impl Regs {
        /// Value of the syscall argument at `index`. Arguments are addressed
        /// 1-based in the kernel calling order rdi, rsi, rdx, r10, r8, r9;
        /// index 0 names the return value. Anything past the sixth argument
        /// lives on the stack and is not supported.
        pub fn arg(&self, index: usize) -> Option<u64> {
            match index {
                0 => Some(self.rax),
                1 => Some(self.rdi),
                2 => Some(self.rsi),
                3 => Some(self.rdx),
                4 => Some(self.r10),
                5 => Some(self.r8),
                6 => Some(self.r9),
                _ => None,
            }
        }

        pub fn syscall_ret(&self) -> u64 {
            self.rax
        }
    }

    /// Byte offset of the argument at `index` within the tracee's user area,
    /// for `PTRACE_PEEKUSER`. Same indexing scheme as `Regs::arg`.
    pub fn argument_offset(index: usize) -> Option<usize> {
        let word = match index {
            0 => RAX,
            1 => RDI,
            2 => RSI,
            3 => RDX,
            4 => R10,
            5 => R8,
            6 => R9,
            _ => return None,
        };
        Some(word * size_of::<c_long>())
    }

    /// Byte offset of the original syscall number. The kernel preserves it
    /// here across the classifier stop, after rax is clobbered.
    pub fn syscall_nr_offset() -> usize {
        ORIG_RAX * size_of::<c_long>()
    }
}

pub use arch::*;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn argument_offsets_follow_user_area_layout() {
        assert_eq!(argument_offset(0), Some(10 * 8)); // rax
        assert_eq!(argument_offset(1), Some(14 * 8)); // rdi
        assert_eq!(argument_offset(2), Some(13 * 8)); // rsi
        assert_eq!(argument_offset(3), Some(12 * 8)); // rdx
        assert_eq!(argument_offset(4), Some(7 * 8)); // r10
        assert_eq!(argument_offset(5), Some(9 * 8)); // r8
        assert_eq!(argument_offset(6), Some(8 * 8)); // r9
        assert_eq!(syscall_nr_offset(), 15 * 8); // orig_rax
    }

    #[test]
    fn arguments_beyond_the_sixth_are_refused() {
        assert_eq!(argument_offset(7), None);
        assert_eq!(argument_offset(42), None);
    }

    #[test]
    fn snapshot_lookup_matches_peek_offsets() {
        let mut regs: Regs = unsafe { std::mem::zeroed() };
        regs.rax = 1;
        regs.rdi = 2;
        regs.rsi = 3;
        regs.rdx = 4;
        regs.r10 = 5;
        regs.r8 = 6;
        regs.r9 = 7;
        for (index, expected) in (0..=6).zip(1..=7u64) {
            assert_eq!(regs.arg(index), Some(expected));
        }
        assert_eq!(regs.arg(7), None);
        assert_eq!(regs.syscall_ret(), 1);
    }
}

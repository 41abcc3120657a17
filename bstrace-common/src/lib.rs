//! # Shared Binary Contract (eBPF ↔ Userspace)
//!
//! Types and names shared between the kernel-side probe modules and the
//! userspace loader. All types use `#[repr(C)]` so both sides agree on the
//! byte layout bit for bit.
//!
//! ## Key Types
//!
//! - [`SyscallRecord`] - Record written by `sc_exit` into the `EVT_BUF` ring buffer
//! - [`X86_64Regs`] - Register frame (`struct pt_regs`) on x86-64
//! - [`Arm64Regs`] - Register frame (`struct user_pt_regs`) on arm64
//!
//! ## Module Bundle
//!
//! Probes ship as independently compiled modules:
//!
//! - `common/shared` owns the long-lived maps ([`SC_DATA_MAP`])
//! - `tp/strace` owns the dispatch table ([`SC_PARSERS_MAP`]), the ring buffer
//!   ([`EVT_BUF_MAP`]) and the two hook programs
//! - `parser/*` each contain one entry program and a [`SC_NR_VARIABLE`] constant

#![no_std]

use core::mem::size_of;

// ============================================================================
// Names
// ============================================================================

/// Per-thread scratch state written by parsers on entry, consumed on exit.
/// Defined once in the shared module and pinned by name.
pub const SC_DATA_MAP: &str = "SC_DATA";

/// Program array indexed by syscall number.
pub const SC_PARSERS_MAP: &str = "SC_PARSERS";

/// Ring buffer carrying [`SyscallRecord`]s to userspace.
pub const EVT_BUF_MAP: &str = "EVT_BUF";

/// Dispatcher program attached to `raw_tracepoint/sys_enter`.
pub const SC_ENTER_PROGRAM: &str = "sc_enter";

/// Dispatcher program attached to `raw_tracepoint/sys_exit`.
pub const SC_EXIT_PROGRAM: &str = "sc_exit";

/// Read-only variable every parser module declares with its syscall number.
pub const SC_NR_VARIABLE: &str = "SC_NR";

/// Number of slots in the dispatch table. Syscall numbers at or above this
/// value cannot be routed.
pub const MAX_SYSCALLS: u32 = 512;

/// Capacity of [`SC_DATA_MAP`] (concurrently traced threads).
pub const MAX_INFLIGHT: u32 = 10_240;

/// Ring buffer size in bytes (power of two, page aligned).
pub const EVT_BUF_SIZE: u32 = 256 * 1024;

// ============================================================================
// Event record
// ============================================================================

/// Length of the fixed event prefix userspace requires:
/// `syscall_nr` (padded to 8 bytes) followed by three 64-bit arguments.
pub const SYSCALL_EVENT_LEN: usize = 32;

/// Syscall state captured by a parser at entry and completed at exit.
///
/// The first [`SYSCALL_EVENT_LEN`] bytes form the event prefix; `ret` follows
/// it. Records are little-endian on every supported host.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SyscallRecord {
    pub syscall_nr: u32,
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,
    pub arg1: u64,
    pub arg2: u64,
    pub arg3: u64,
    /// Return value, filled in by `sc_exit`.
    pub ret: i64,
}

impl SyscallRecord {
    pub const fn zeroed() -> Self {
        Self { syscall_nr: 0, _padding: 0, arg1: 0, arg2: 0, arg3: 0, ret: 0 }
    }
}

// ============================================================================
// Register frames
// ============================================================================

/// Number of syscall arguments passed in registers.
pub const MAX_SYSCALL_ARGS: usize = 6;

/// x86-64 `struct pt_regs`.
///
/// Syscall number in `orig_rax`; arguments in `rdi, rsi, rdx, r10, r8, r9`.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct X86_64Regs {
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
}

impl X86_64Regs {
    pub const fn zeroed() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rax: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            orig_rax: 0,
            rip: 0,
            cs: 0,
            eflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    #[inline]
    pub const fn syscall_nr(&self) -> u64 {
        self.orig_rax
    }

    /// Syscall argument `n` (0-based); out-of-range indexes read as 0.
    #[inline]
    pub const fn arg(&self, n: usize) -> u64 {
        match n {
            0 => self.rdi,
            1 => self.rsi,
            2 => self.rdx,
            3 => self.r10,
            4 => self.r8,
            5 => self.r9,
            _ => 0,
        }
    }
}

/// arm64 `struct user_pt_regs`.
///
/// Syscall number in `x8`; arguments in `x0..x5`.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Arm64Regs {
    /// `x0..x30`
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl Arm64Regs {
    pub const fn zeroed() -> Self {
        Self { regs: [0; 31], sp: 0, pc: 0, pstate: 0 }
    }

    #[inline]
    pub const fn syscall_nr(&self) -> u64 {
        self.regs[8]
    }

    /// Syscall argument `n` (0-based); out-of-range indexes read as 0.
    #[inline]
    pub const fn arg(&self, n: usize) -> u64 {
        if n < MAX_SYSCALL_ARGS {
            self.regs[n]
        } else {
            0
        }
    }
}

const _: () = assert!(size_of::<SyscallRecord>() == SYSCALL_EVENT_LEN + 8);
const _: () = assert!(size_of::<X86_64Regs>() == 21 * 8);
const _: () = assert!(size_of::<Arm64Regs>() == 34 * 8);

#[cfg(feature = "user")]
use aya::Pod;

// Plain-old-data: every bit pattern is a valid value
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for SyscallRecord {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for X86_64Regs {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for Arm64Regs {}

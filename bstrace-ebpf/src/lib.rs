//! # Kernel-Side Probe Modules
//!
//! Every binary in this crate compiles to its own eBPF object ("module"):
//!
//! - `shared` - owns [`SC_DATA`](bstrace_common::SC_DATA_MAP), pinned by name
//! - `strace` - dispatcher: `sc_enter` tail-calls into `SC_PARSERS[nr]`,
//!   `sc_exit` completes the record and submits it to `EVT_BUF`
//! - `sc_*` - parsers, one per traced syscall, each exporting `SC_NR`
//!
//! Modules are linked independently, so maps they share are declared in each of
//! them through [`shared_maps!`] with by-name pinning; the loader makes them
//! resolve to the single instance created by `shared`.
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![allow(unused_unsafe)]

use aya_ebpf::helpers::{bpf_probe_read_kernel, bpf_probe_read_user};

#[cfg(not(feature = "aarch64"))]
pub type Regs = bstrace_common::X86_64Regs;

#[cfg(feature = "aarch64")]
pub type Regs = bstrace_common::Arm64Regs;

#[cfg(not(feature = "aarch64"))]
pub const SYS_READ: u32 = 0;
#[cfg(not(feature = "aarch64"))]
pub const SYS_BPF: u32 = 321;

#[cfg(feature = "aarch64")]
pub const SYS_READ: u32 = 63;
#[cfg(feature = "aarch64")]
pub const SYS_BPF: u32 = 280;

/// Declares the maps owned by the `shared` module in the calling module.
#[macro_export]
macro_rules! shared_maps {
    () => {
        /// Thread ID → syscall captured at entry
        #[aya_ebpf::macros::map]
        static SC_DATA: aya_ebpf::maps::HashMap<u32, bstrace_common::SyscallRecord> =
            aya_ebpf::maps::HashMap::pinned(bstrace_common::MAX_INFLIGHT, 0);
    };
}

/// Copies the register frame behind a raw tracepoint's first argument.
///
/// Live hooks pass a kernel pointer; synthetic test runs pass a pointer into
/// the caller's memory, so the user read is tried first.
#[inline(always)]
pub fn read_regs(addr: u64) -> Option<Regs> {
    let ptr = addr as *const Regs;
    unsafe {
        bpf_probe_read_user(ptr)
            .or_else(|_| bpf_probe_read_kernel(ptr))
            .ok()
    }
}

/// Lower 32 bits of `pid_tgid`: the calling thread.
#[inline(always)]
pub fn current_tid() -> u32 {
    unsafe { aya_ebpf::helpers::bpf_get_current_pid_tgid() as u32 }
}

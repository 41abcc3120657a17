//! Syscall ABI helpers
//!
//! - [`frame`]: architecture register frames (`pt_regs`) for synthetic syscalls
//! - [`builder`]: byte-level builder for the raw tracepoint context

pub mod builder;
pub mod frame;

pub use builder::{ByteOrder, FrameBuilder};
pub use frame::{build_syscall_args, Arch, FrameLayout, RegisterFrame, SyscallContext};

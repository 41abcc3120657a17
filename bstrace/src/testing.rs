//! Synthetic probe runs
//!
//! Drives a loaded raw tracepoint program with a hand-built context through
//! `BPF_PROG_TEST_RUN`, so the dispatcher and parsers can be exercised
//! without a real syscall.
//!
//! ```text
//! ctx = [ regs pointer (u64) | syscall number on entry, return value on exit (u64) ]
//! ```

#![allow(unsafe_code)] // bpf(2)

use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd};

use aya::programs::ProgramFd;

use crate::abi::{ByteOrder, FrameBuilder, SyscallContext};
use crate::domain::TraceError;

const BPF_PROG_TEST_RUN: libc::c_long = 10;

/// `bpf_attr.test` of `BPF_PROG_TEST_RUN`
#[repr(C)]
#[derive(Debug, Default)]
struct TestRunAttr {
    prog_fd: u32,
    retval: u32,
    data_size_in: u32,
    data_size_out: u32,
    data_in: u64,
    data_out: u64,
    repeat: u32,
    duration: u32,
    ctx_size_in: u32,
    ctx_size_out: u32,
    ctx_in: u64,
    ctx_out: u64,
    flags: u32,
    cpu: u32,
    batch_size: u32,
    _pad: u32,
}

/// Run `program` once with `ctx` as its raw tracepoint arguments.
///
/// Returns the program's return value.
///
/// # Errors
/// `ProgramRun` with the kernel's errno.
pub fn run_program(program: &ProgramFd, ctx: &[u8]) -> Result<u32, TraceError> {
    let prog_fd = u32::try_from(program.as_fd().as_raw_fd())
        .map_err(|_| TraceError::ProgramRun(io::Error::from_raw_os_error(libc::EBADF)))?;
    let ctx_size_in = u32::try_from(ctx.len())
        .map_err(|_| TraceError::ProgramRun(io::Error::from_raw_os_error(libc::E2BIG)))?;

    let mut attr = TestRunAttr {
        prog_fd,
        ctx_size_in,
        ctx_in: ctx.as_ptr() as u64,
        ..TestRunAttr::default()
    };

    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_PROG_TEST_RUN,
            std::ptr::from_mut(&mut attr),
            size_of::<TestRunAttr>(),
        )
    };
    if ret < 0 {
        return Err(TraceError::ProgramRun(io::Error::last_os_error()));
    }
    Ok(attr.retval)
}

/// Context for `sys_enter`: the frame address followed by its syscall number
pub fn enter_context<'b, 'a: 'b>(builder: &'b mut FrameBuilder<'a>, frame: &'a SyscallContext) -> &'b [u8] {
    let nr = frame.frame().syscall_nr();
    builder.reset().write_pointer(ByteOrder::native(), frame).write_uint64(ByteOrder::native(), nr);
    builder.bytes()
}

/// Context for `sys_exit`: the frame address followed by the return value
pub fn exit_context<'b, 'a: 'b>(
    builder: &'b mut FrameBuilder<'a>,
    frame: &'a SyscallContext,
    ret: i64,
) -> &'b [u8] {
    builder.reset().write_pointer(ByteOrder::native(), frame).write_int64(ByteOrder::native(), ret);
    builder.bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{Arch, RegisterFrame};

    #[test]
    fn test_attr_matches_kernel_layout() {
        assert_eq!(size_of::<TestRunAttr>(), 80);
        assert_eq!(std::mem::offset_of!(TestRunAttr, ctx_in), 48);
    }

    #[test]
    fn test_enter_context_layout() {
        let frame = SyscallContext::new(RegisterFrame::encode(Arch::X86_64, 321, &[6]).unwrap());
        let mut builder = FrameBuilder::new();
        let ctx = enter_context(&mut builder, &frame);

        assert_eq!(ctx.len(), 16);
        assert_eq!(&ctx[..8], &frame.address().to_ne_bytes());
        assert_eq!(&ctx[8..], &321u64.to_ne_bytes());
    }

    #[test]
    fn test_exit_context_carries_return_value() {
        let frame = SyscallContext::new(RegisterFrame::encode(Arch::Aarch64, 63, &[]).unwrap());
        let mut builder = FrameBuilder::new();
        let ctx = exit_context(&mut builder, &frame, -14);
        assert_eq!(&ctx[8..], &(-14i64).to_ne_bytes());
    }
}

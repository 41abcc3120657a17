//! Parser for `read(int fd, void *buf, size_t count)`.

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{macros::raw_tracepoint, programs::RawTracePointContext};
use bstrace_common::SyscallRecord;
use bstrace_ebpf::{current_tid, read_regs, SYS_READ};

bstrace_ebpf::shared_maps!();

#[no_mangle]
static SC_NR: u32 = SYS_READ;

#[raw_tracepoint(tracepoint = "sys_enter")]
pub fn read_syscall(ctx: RawTracePointContext) -> i32 {
    match try_read_syscall(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_read_syscall(ctx: &RawTracePointContext) -> Result<(), i64> {
    let regs_addr: u64 = unsafe { ctx.arg(0) };
    let nr: i64 = unsafe { ctx.arg(1) };
    let regs = read_regs(regs_addr).ok_or(1i64)?;

    let record = SyscallRecord {
        syscall_nr: nr as u32,
        arg1: regs.arg(0),
        arg2: regs.arg(1),
        arg3: regs.arg(2),
        ..SyscallRecord::zeroed()
    };

    unsafe {
        SC_DATA.insert(&current_tid(), &record, 0)?;
    }

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

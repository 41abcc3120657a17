//! Dispatcher module: routes `sys_enter` to per-syscall parsers and emits
//! completed records on `sys_exit`.

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    macros::{map, raw_tracepoint},
    maps::{ProgramArray, RingBuf},
    programs::RawTracePointContext,
};
use aya_log_ebpf::debug;
use bstrace_common::{EVT_BUF_SIZE, MAX_SYSCALLS};
use bstrace_ebpf::{current_tid, read_regs};

bstrace_ebpf::shared_maps!();

/// Syscall number → parser entry program, filled by userspace
#[map]
static SC_PARSERS: ProgramArray = ProgramArray::with_max_entries(MAX_SYSCALLS, 0);

#[map]
static EVT_BUF: RingBuf = RingBuf::with_byte_size(EVT_BUF_SIZE, 0);

/// `sys_enter(struct pt_regs *regs, long id)`
#[raw_tracepoint(tracepoint = "sys_enter")]
pub fn sc_enter(ctx: RawTracePointContext) -> i32 {
    let nr: i64 = unsafe { ctx.arg(1) };
    if !(0..i64::from(MAX_SYSCALLS)).contains(&nr) {
        return 0;
    }

    // Only returns when SC_PARSERS has no program at `nr`
    let _ = unsafe { SC_PARSERS.tail_call(&ctx, nr as u32) };

    0
}

/// `sys_exit(struct pt_regs *regs, long ret)`
#[raw_tracepoint(tracepoint = "sys_exit")]
pub fn sc_exit(ctx: RawTracePointContext) -> i32 {
    match try_sc_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_sc_exit(ctx: &RawTracePointContext) -> Result<(), i64> {
    let regs_addr: u64 = unsafe { ctx.arg(0) };
    let ret: i64 = unsafe { ctx.arg(1) };

    let tid = current_tid();
    let Some(pending) = (unsafe { SC_DATA.get(&tid).copied() }) else {
        return Ok(());
    };
    unsafe {
        SC_DATA.remove(&tid)?;
    }

    let regs = read_regs(regs_addr).ok_or(1i64)?;
    if u64::from(pending.syscall_nr) != regs.syscall_nr() {
        return Ok(());
    }

    let mut record = pending;
    record.ret = ret;

    debug!(ctx, "syscall {} returned {}", record.syscall_nr, ret);

    unsafe {
        EVT_BUF.output(&record, 0).map_err(|_| 1i64)?;
    }

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

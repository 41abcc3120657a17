//! Owner of the long-lived maps shared by every other module.

#![no_std]
#![no_main]

bstrace_ebpf::shared_maps!();

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

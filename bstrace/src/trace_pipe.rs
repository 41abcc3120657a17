//! Kernel trace pipe forwarder
//!
//! Probe modules report through `bpf_printk`, which lands in the ftrace
//! buffer. With `--trace-pipe` those lines are forwarded to the `log` facade
//! at debug level under the `bstrace::kernel` target.

#![allow(unsafe_code)] // mount(2)

use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::domain::TraceError;
use crate::pipeline::CancelToken;

const TRACE_PIPE: &str = "/sys/kernel/debug/tracing/trace_pipe";
const DEBUGFS_PATH: &str = "/sys/kernel/debug";
const RETRY_TIMEOUT: Duration = Duration::from_millis(100);

/// Mount debugfs if the trace pipe isn't reachable yet
fn init_trace_pipe() -> Result<(), TraceError> {
    if Path::new(TRACE_PIPE).exists() {
        return Ok(());
    }
    std::fs::create_dir_all(DEBUGFS_PATH)?;
    let ret = unsafe {
        libc::mount(
            c"debugfs".as_ptr(),
            c"/sys/kernel/debug".as_ptr(),
            c"debugfs".as_ptr(),
            0,
            std::ptr::null(),
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }
    info!("Mounted debugfs at {DEBUGFS_PATH}");
    Ok(())
}

/// Forward trace pipe lines until `cancel` fires.
///
/// # Errors
/// `Io` if debugfs can't be mounted or the pipe can't be opened.
pub async fn forward(cancel: CancelToken) -> Result<(), TraceError> {
    init_trace_pipe()?;
    let file = OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(TRACE_PIPE)?;
    let pipe = AsyncFd::with_interest(file, Interest::READABLE)?;

    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let mut guard = tokio::select! {
            () = cancel.cancelled() => {
                info!("trace pipe reader was closed");
                return Ok(());
            }
            guard = pipe.readable() => guard?,
        };

        match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
            Ok(Ok(0)) => {
                info!("trace pipe reached end of file");
                return Ok(());
            }
            Ok(Ok(n)) => {
                pending.extend_from_slice(&buf[..n]);
                for line in drain_lines(&mut pending) {
                    debug!(target: "bstrace::kernel", "{line}");
                }
            }
            Ok(Err(e)) => {
                warn!("error read from trace pipe: {e}");
                tokio::time::sleep(RETRY_TIMEOUT).await;
            }
            Err(_would_block) => {}
        }
    }
}

/// Split off every complete line, leaving a trailing partial line in place.
/// Lines are trimmed; blank ones are dropped.
fn drain_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = pending.drain(..=last_newline).collect();
    String::from_utf8_lossy(&complete)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

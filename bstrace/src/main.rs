//! # bstrace - Main Entry Point
//!
//! Loads the probe bundle, attaches the syscall hooks and prints one line per
//! traced syscall until interrupted (SIGINT/SIGTERM), the `--duration` limit
//! elapses, or the ring buffer reader fails for good.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};

use bstrace::cli::Args;
use bstrace::output::EventSink;
use bstrace::pipeline::{CancelToken, ExitReason};
use bstrace::preflight::{bump_memlock_rlimit, run_preflight_checks};
use bstrace::{trace_pipe, Tracer, TracerConfig};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let io_denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == ErrorKind::PermissionDenied)
    });
    let msg = err.to_string().to_lowercase();
    if io_denied || msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl+C")?;
            Ok("interrupted")
        }
        _ = terminate.recv() => Ok("terminated"),
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let quiet = args.quiet;
    let config = TracerConfig::from(&args);

    // Run pre-flight checks before anything else
    run_preflight_checks(&config.modules, &config.pin_path)?;
    bump_memlock_rlimit();

    if !quiet {
        println!("bstrace v{}", env!("CARGO_PKG_VERSION"));
        println!("modules: {}", config.modules.display());
    }

    // ── Phase 1: Load modules and populate the dispatch table ───────────
    let loaded = Tracer::load(config).context("Failed to load probe modules")?;
    if !quiet {
        for registration in loaded.registrations() {
            println!("parser: {} (syscall {})", registration.module, registration.nr);
        }
    }

    // ── Phase 2: Attach sys_exit, then sys_enter ─────────────────────────
    let mut session = loaded.attach()?;

    // ── Phase 3: Event pipeline ──────────────────────────────────────────
    let cancel = CancelToken::new();
    let mut pipeline = session.spawn_pipeline(cancel.clone())?;

    let trace_pipe_task = args.trace_pipe.then(|| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = trace_pipe::forward(cancel).await {
                warn!("Trace pipe forwarder stopped: {e}");
            }
        })
    });

    let closer = pipeline.closer();
    let signal_task = tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(reason) => {
                info!("{reason}, closing event reader");
                closer.close();
            }
            Err(e) => warn!("{e:#}"),
        }
    });

    // Track start time for duration limit
    let started = Instant::now();
    if args.duration > 0 {
        let cancel = cancel.clone();
        let limit = Duration::from_secs(args.duration);
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            cancel.cancel();
        });
    }

    let mut sink = EventSink::new(std::io::stdout().lock(), args.format);
    while let Some(event) = pipeline.recv().await {
        if let Err(e) = sink.write(&event) {
            if e.kind() == ErrorKind::BrokenPipe {
                pipeline.closer().close();
                break;
            }
            return Err(e).context("Failed to write event");
        }
    }
    sink.flush().context("Failed to flush output")?;

    let stats = pipeline.join().await;
    cancel.cancel();
    signal_task.abort();
    if let Some(task) = trace_pipe_task {
        if let Err(e) = task.await {
            warn!("Trace pipe task failed: {e}");
        }
    }

    session.shutdown().context("Failed to detach tracepoints")?;

    let exit_reason = match stats.exit {
        ExitReason::Cancelled => "duration limit reached".to_string(),
        ExitReason::Closed => "interrupted".to_string(),
        other => other.to_string(),
    };
    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} events (decode failures: {}, read failures: {})",
            exit_reason,
            started.elapsed().as_secs_f64(),
            sink.written(),
            stats.decode_failures,
            stats.read_failures,
        );
    }

    if stats.exit == ExitReason::ReadFailures {
        anyhow::bail!("Ring buffer reader failed after {} read errors", stats.read_failures);
    }
    Ok(())
}

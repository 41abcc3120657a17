//! # bstrace - eBPF Syscall Tracer
//!
//! bstrace loads independently compiled eBPF probe modules, wires them around
//! a set of shared maps, routes every syscall to a per-syscall parser through
//! a program array, and streams the decoded arguments (and return value) of
//! each traced syscall to userspace through a ring buffer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │                                                                 │
//! │  raw_tracepoint/sys_enter ──► sc_enter ──tail call──► parser    │
//! │                                  SC_PARSERS[nr]     (sc_bpf,    │
//! │                                                      sc_read..) │
//! │                                                         │       │
//! │                                               SC_DATA[tid]      │
//! │                                                         │       │
//! │  raw_tracepoint/sys_exit  ──► sc_exit ◄─────────────────┘       │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ EVT_BUF ring buffer
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       bstrace (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Loader    │──▶│   Session    │──▶│   Pipeline   │──▶ sink │
//! │  │ (modules,    │   │ (dispatch,   │   │ (read loop,  │         │
//! │  │  shared maps)│   │  attach)     │   │  decode)     │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`loader`]: kernel object lifecycle
//!   - `module`: parse a BPF ELF, list programs/maps/variables, instantiate it
//!   - `shared`: the shared map set and load ordering (`Wiring`)
//!   - `dispatch`: syscall number → parser program table
//!   - `attach`: `sys_exit` / `sys_enter` raw tracepoint bindings
//!   - `bundle`: on-disk layout of the module bundle
//!
//! - [`pipeline`]: ring buffer reader task, event decoding, cancellation
//!
//! - [`session`]: startup sequence and ordered release of every handle
//!
//! - [`abi`]: register frames and the binary frame builder for synthetic runs
//!
//! - [`testing`]: run a loaded probe against a synthetic context
//!
//! - [`cli`], [`output`], [`preflight`], [`trace_pipe`]: binary support
//!
//! - [`domain`]: errors and newtypes
//!
//! ## Typical Usage
//!
//! ```bash
//! # Build and stage the probe modules
//! cargo xtask build-ebpf
//!
//! # Trace until Ctrl+C
//! sudo ./bstrace --modules target/bstrace-modules
//! ```
//!
//! ## Key Concepts
//!
//! - **Shared maps**: pinned by name under a per-session bpffs directory so
//!   every module sees the same `SC_DATA` instance
//! - **Dispatch table**: `BPF_MAP_TYPE_PROG_ARRAY` indexed by syscall number,
//!   entered with a tail call
//! - **Register frame**: saved user registers (`pt_regs`) the parsers read
//!   arguments from

pub mod abi;
pub mod cli;
pub mod domain;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod preflight;
pub mod session;
pub mod testing;
pub mod trace_pipe;

pub use session::{LoadedTracer, Session, Tracer, TracerConfig};

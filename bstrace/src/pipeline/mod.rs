//! # Event Pipeline
//!
//! Moves records from the kernel ring buffer to the consumer:
//!
//! ```text
//! EVT_BUF ──► RecordSource ──► read loop (decode) ──► bounded channel ──► consumer
//!                                  ▲
//!                     CancelToken / ReaderCloser
//! ```
//!
//! The read loop runs as its own task; every exit path drops the source
//! exactly once and closes the channel.

pub mod cancel;
pub mod event;
pub mod reader;
pub mod source;

pub use cancel::CancelToken;
pub use event::SyscallEvent;
pub use reader::{spawn_reader, EventPipeline, ExitReason, PipelineConfig, PipelineStats, ReaderCloser};
pub use source::{RecordSource, RingBufSource};

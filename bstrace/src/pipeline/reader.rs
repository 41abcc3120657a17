//! Ring buffer read loop
//!
//! One task per session pulls records from a [`RecordSource`], decodes them
//! and delivers them over a bounded channel. A blocked read or a blocked
//! delivery both give way to cancellation.

use std::fmt;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cancel::CancelToken;
use super::event::SyscallEvent;
use super::source::RecordSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bound of the delivery channel
    pub capacity: usize,
    /// Consecutive read failures tolerated before the loop gives up
    pub max_read_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { capacity: 1024, max_read_failures: 16 }
    }
}

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    /// Session-wide cancellation
    #[default]
    Cancelled,
    /// The reader was closed through its [`ReaderCloser`]
    Closed,
    /// The source ran dry
    EndOfStream,
    /// `max_read_failures` consecutive read errors
    ReadFailures,
    /// The consumer dropped its end of the channel
    ConsumerGone,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitReason::Cancelled => "cancelled",
            ExitReason::Closed => "reader closed",
            ExitReason::EndOfStream => "end of stream",
            ExitReason::ReadFailures => "too many read failures",
            ExitReason::ConsumerGone => "consumer gone",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub delivered: u64,
    pub decode_failures: u64,
    pub read_failures: u64,
    pub exit: ExitReason,
}

/// Closes the reader from any task, which unblocks a pending read.
#[derive(Debug, Clone)]
pub struct ReaderCloser {
    token: CancelToken,
}

impl ReaderCloser {
    /// Idempotent
    pub fn close(&self) {
        self.token.cancel();
    }
}

/// Consumer side of a running read loop
#[derive(Debug)]
pub struct EventPipeline {
    events: mpsc::Receiver<SyscallEvent>,
    task: Option<JoinHandle<PipelineStats>>,
    closer: ReaderCloser,
}

impl EventPipeline {
    /// Next decoded event; `None` once the loop has stopped and the channel
    /// is drained.
    pub async fn recv(&mut self) -> Option<SyscallEvent> {
        self.events.recv().await
    }

    #[must_use]
    pub fn closer(&self) -> ReaderCloser {
        self.closer.clone()
    }

    /// Close the reader and wait for the loop task to finish.
    pub async fn join(mut self) -> PipelineStats {
        self.closer.close();
        let Some(task) = self.task.take() else {
            return PipelineStats::default();
        };
        match task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Reader task failed: {e}");
                PipelineStats { exit: ExitReason::ReadFailures, ..PipelineStats::default() }
            }
        }
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        // a detached loop would otherwise stay parked in its read
        self.closer.close();
    }
}

/// Spawn the read loop on the current runtime.
pub fn spawn_reader<S: RecordSource>(source: S, config: PipelineConfig, cancel: CancelToken) -> EventPipeline {
    let (tx, events) = mpsc::channel(config.capacity.max(1));
    let closer = CancelToken::new();
    let task = tokio::spawn(read_loop(source, tx, cancel, closer.clone(), config.max_read_failures));
    EventPipeline { events, task: Some(task), closer: ReaderCloser { token: closer } }
}

async fn read_loop<S: RecordSource>(
    mut source: S,
    tx: mpsc::Sender<SyscallEvent>,
    cancel: CancelToken,
    closer: CancelToken,
    max_read_failures: u32,
) -> PipelineStats {
    let mut stats = PipelineStats::default();
    let mut consecutive_failures = 0u32;

    let exit = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break ExitReason::Cancelled,
            () = closer.cancelled() => break ExitReason::Closed,
            next = source.next_record() => next,
        };

        let raw = match next {
            Ok(Some(raw)) => {
                consecutive_failures = 0;
                raw
            }
            Ok(None) => break ExitReason::EndOfStream,
            Err(e) => {
                stats.read_failures += 1;
                consecutive_failures += 1;
                warn!("Failed to read event ({consecutive_failures}/{max_read_failures}): {e}");
                if consecutive_failures >= max_read_failures {
                    break ExitReason::ReadFailures;
                }
                continue;
            }
        };

        let event = match SyscallEvent::decode(&raw) {
            Ok(event) => event,
            Err(e) => {
                stats.decode_failures += 1;
                warn!("Failed to parse event: {e}");
                continue;
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break ExitReason::Cancelled,
            () = closer.cancelled() => break ExitReason::Closed,
            sent = tx.send(event) => {
                if sent.is_err() {
                    break ExitReason::ConsumerGone;
                }
                stats.delivered += 1;
            }
        }
    };

    drop(source);
    debug!("Ring buffer reader released");
    info!("Event reader stopped: {exit} ({} events delivered)", stats.delivered);
    stats.exit = exit;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Yields scripted results, then blocks forever
    struct ScriptedSource {
        script: VecDeque<io::Result<Option<Vec<u8>>>>,
        drops: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<io::Result<Option<Vec<u8>>>>) -> (Self, Arc<AtomicUsize>) {
            let drops = Arc::new(AtomicUsize::new(0));
            (Self { script: script.into(), drops: Arc::clone(&drops) }, drops)
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RecordSource for ScriptedSource {
        async fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
            match self.script.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }
    }

    fn record(nr: u32) -> Vec<u8> {
        let mut bytes = nr.to_le_bytes().to_vec();
        bytes.extend([0u8; 28]);
        bytes
    }

    fn config(capacity: usize) -> PipelineConfig {
        PipelineConfig { capacity, max_read_failures: 3 }
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let (source, _) = ScriptedSource::new(vec![Ok(Some(vec![1, 2, 3])), Ok(Some(record(321)))]);
        let mut pipeline = spawn_reader(source, config(4), CancelToken::new());

        let event = pipeline.recv().await.unwrap();
        assert_eq!(event.syscall_nr, 321);

        let stats = pipeline.join().await;
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let (source, drops) = ScriptedSource::new(vec![]);
        let cancel = CancelToken::new();
        let mut pipeline = spawn_reader(source, config(4), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(pipeline.recv().await, None);
        let stats = tokio::time::timeout(Duration::from_secs(1), pipeline.join()).await.unwrap();
        assert_eq!(stats.exit, ExitReason::Cancelled);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_delivery() {
        let (source, drops) = ScriptedSource::new(vec![Ok(Some(record(1))), Ok(Some(record(2)))]);
        let cancel = CancelToken::new();
        // capacity 1 and nobody receiving: the second send blocks
        let pipeline = spawn_reader(source, config(1), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), pipeline.join()).await.unwrap();
        assert_eq!(stats.exit, ExitReason::Cancelled);
        assert_eq!(stats.delivered, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closer_stops_reader() {
        let (source, drops) = ScriptedSource::new(vec![Ok(Some(record(0)))]);
        let mut pipeline = spawn_reader(source, config(4), CancelToken::new());

        assert_eq!(pipeline.recv().await.map(|e| e.syscall_nr), Some(0));
        pipeline.closer().close();
        assert_eq!(pipeline.recv().await, None);

        let stats = pipeline.join().await;
        assert_eq!(stats.exit, ExitReason::Closed);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_channel() {
        let (source, _) = ScriptedSource::new(vec![Ok(Some(record(5))), Ok(None)]);
        let mut pipeline = spawn_reader(source, config(4), CancelToken::new());

        assert!(pipeline.recv().await.is_some());
        assert!(pipeline.recv().await.is_none());
        assert_eq!(pipeline.join().await.exit, ExitReason::EndOfStream);
    }

    #[tokio::test]
    async fn test_transient_failures_are_tolerated() {
        let (source, _) = ScriptedSource::new(vec![
            Err(io::Error::other("EINTR")),
            Err(io::Error::other("EINTR")),
            Ok(Some(record(9))),
            Ok(None),
        ]);
        let mut pipeline = spawn_reader(source, config(4), CancelToken::new());

        assert_eq!(pipeline.recv().await.map(|e| e.syscall_nr), Some(9));
        let stats = pipeline.join().await;
        assert_eq!(stats.read_failures, 2);
        assert_eq!(stats.exit, ExitReason::EndOfStream);
    }

    #[tokio::test]
    async fn test_persistent_failures_stop_reader() {
        let script = (0..5).map(|_| Err(io::Error::other("EIO"))).collect();
        let (source, drops) = ScriptedSource::new(script);
        let mut pipeline = spawn_reader(source, config(4), CancelToken::new());

        assert!(pipeline.recv().await.is_none());
        let stats = pipeline.join().await;
        assert_eq!(stats.exit, ExitReason::ReadFailures);
        assert_eq!(stats.read_failures, 3);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

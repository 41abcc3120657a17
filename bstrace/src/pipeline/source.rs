//! Record sources feeding the read loop

use std::future::Future;
use std::io;

use aya::maps::{Map, MapData, RingBuf};
use tokio::io::unix::AsyncFd;

use crate::domain::TraceError;

/// Blocking producer of raw records.
///
/// `Ok(None)` means the source is exhausted; errors are transient read
/// failures the caller may retry.
pub trait RecordSource: Send + 'static {
    fn next_record(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// Reader over the `EVT_BUF` ring buffer
pub struct RingBufSource {
    inner: AsyncFd<RingBuf<MapData>>,
}

impl RingBufSource {
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `ReaderUnavailable` if the map is not a ring buffer or can't be polled.
    pub fn open(map: Map) -> Result<Self, TraceError> {
        let ring_buf = RingBuf::try_from(map).map_err(|e| TraceError::ReaderUnavailable(e.into()))?;
        let inner = AsyncFd::new(ring_buf).map_err(|e| TraceError::ReaderUnavailable(e.into()))?;
        Ok(Self { inner })
    }
}

impl RecordSource for RingBufSource {
    async fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let mut guard = self.inner.readable_mut().await?;
            if let Some(item) = guard.get_inner_mut().next() {
                return Ok(Some(item.to_vec()));
            }
            guard.clear_ready();
        }
    }
}

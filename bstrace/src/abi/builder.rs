//! Binary frame builder
//!
//! Assembles the context buffer handed to a raw tracepoint program on a
//! synthetic run: `[regs pointer, syscall number or return value]`.

use std::marker::PhantomData;

use super::frame::SyscallContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Append-only byte buffer with explicit byte order per write.
///
/// The lifetime ties the builder to every [`SyscallContext`] whose address
/// was written, so a context can't be dropped while its pointer is still
/// in the buffer.
#[derive(Debug, Default)]
pub struct FrameBuilder<'a> {
    buf: Vec<u8>,
    _targets: PhantomData<&'a SyscallContext>,
}

impl<'a> FrameBuilder<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_uint32(&mut self, order: ByteOrder, value: u32) -> &mut Self {
        match order {
            ByteOrder::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    pub fn write_int32(&mut self, order: ByteOrder, value: i32) -> &mut Self {
        self.write_uint32(order, u32::from_ne_bytes(value.to_ne_bytes()))
    }

    pub fn write_uint64(&mut self, order: ByteOrder, value: u64) -> &mut Self {
        match order {
            ByteOrder::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    pub fn write_int64(&mut self, order: ByteOrder, value: i64) -> &mut Self {
        self.write_uint64(order, u64::from_ne_bytes(value.to_ne_bytes()))
    }

    /// Write the address of `target` as a 64-bit integer, whatever the host
    /// pointer width.
    pub fn write_pointer(&mut self, order: ByteOrder, target: &'a SyscallContext) -> &mut Self {
        self.write_uint64(order, target.address())
    }

    /// Clear all bytes written so far
    pub fn reset(&mut self) -> &mut Self {
        self.buf.clear();
        self
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

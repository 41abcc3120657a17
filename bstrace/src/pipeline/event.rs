//! Decoded syscall events

use std::fmt;
use std::mem::size_of;

use bstrace_common::{SyscallRecord, SYSCALL_EVENT_LEN};
use serde::Serialize;

use crate::domain::{DecodeError, SyscallNr};

/// One completed syscall as emitted by `sc_exit`.
///
/// Wire layout (little-endian): `syscall_nr: u32`, 4 bytes padding, then
/// `arg1`, `arg2`, `arg3` as u64. Records carrying 8 more bytes also hold the
/// return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyscallEvent {
    pub syscall_nr: u32,
    pub arg1: u64,
    pub arg2: u64,
    pub arg3: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret: Option<i64>,
}

const RECORD_LEN: usize = size_of::<SyscallRecord>();

impl SyscallEvent {
    /// Decode one ring buffer record. Trailing bytes are ignored.
    ///
    /// # Errors
    /// `Truncated` if the record is shorter than the 32-byte prefix.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < SYSCALL_EVENT_LEN {
            return Err(DecodeError::Truncated { len: bytes.len(), need: SYSCALL_EVENT_LEN });
        }

        let mut nr = [0u8; 4];
        nr.copy_from_slice(&bytes[..4]);
        Ok(Self {
            syscall_nr: u32::from_le_bytes(nr),
            arg1: le_u64(bytes, 8),
            arg2: le_u64(bytes, 16),
            arg3: le_u64(bytes, 24),
            ret: (bytes.len() >= RECORD_LEN)
                .then(|| i64::from_le_bytes(word_at(bytes, SYSCALL_EVENT_LEN))),
        })
    }

    #[must_use]
    pub fn nr(&self) -> SyscallNr {
        SyscallNr(self.syscall_nr)
    }
}

fn word_at(bytes: &[u8], offset: usize) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    word
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(word_at(bytes, offset))
}

impl fmt::Display for SyscallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "syscall={} arg1={} arg2={:#x} arg3={}",
            self.syscall_nr, self.arg1, self.arg2, self.arg3
        )?;
        if let Some(ret) = self.ret {
            write!(f, " ret={ret}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(nr: u32, args: [u64; 3], ret: Option<i64>) -> Vec<u8> {
        let mut bytes = nr.to_le_bytes().to_vec();
        bytes.extend([0u8; 4]);
        for arg in args {
            bytes.extend(arg.to_le_bytes());
        }
        if let Some(ret) = ret {
            bytes.extend(ret.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_prefix_only() {
        let event = SyscallEvent::decode(&record(321, [6, 0xABAD_CAFE, 123], None)).unwrap();
        assert_eq!(
            event,
            SyscallEvent { syscall_nr: 321, arg1: 6, arg2: 0xABAD_CAFE, arg3: 123, ret: None }
        );
    }

    #[test]
    fn test_decode_with_return_value() {
        let event = SyscallEvent::decode(&record(0, [3, 0x7fff_0000, 64], Some(-11))).unwrap();
        assert_eq!(event.ret, Some(-11));
        assert_eq!(event.nr(), SyscallNr(0));
    }

    #[test]
    fn test_padding_is_ignored() {
        let mut bytes = record(321, [1, 2, 3], None);
        bytes[4..8].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(SyscallEvent::decode(&bytes).unwrap().syscall_nr, 321);
    }

    #[test]
    fn test_short_record_is_rejected() {
        let err = SyscallEvent::decode(&[0u8; 31]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: 31, need: 32 });
    }

    #[test]
    fn test_display_format() {
        let event = SyscallEvent { syscall_nr: 321, arg1: 6, arg2: 0xABAD_CAFE, arg3: 123, ret: Some(0) };
        assert_eq!(event.to_string(), "syscall=321 arg1=6 arg2=0xabadcafe arg3=123 ret=0");
    }

    #[test]
    fn test_json_skips_missing_return() {
        let event = SyscallEvent { syscall_nr: 0, arg1: 1, arg2: 2, arg3: 3, ret: None };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"syscall_nr":0,"arg1":1,"arg2":2,"arg3":3}"#);
    }
}

//! Event sink for the binary

use std::io::{self, Write};

use crate::cli::OutputFormat;
use crate::pipeline::SyscallEvent;

/// Writes one line per event
pub struct EventSink<W: Write> {
    out: W,
    format: OutputFormat,
    written: u64,
}

impl<W: Write> EventSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format, written: 0 }
    }

    /// # Errors
    /// Write failure on the underlying stream.
    pub fn write(&mut self, event: &SyscallEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{event}")?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, event)?;
                self.out.write_all(b"\n")?;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// # Errors
    /// Flush failure on the underlying stream.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> SyscallEvent {
        SyscallEvent { syscall_nr: 321, arg1: 6, arg2: 0xABAD_CAFE, arg3: 123, ret: Some(0) }
    }

    #[test]
    fn test_text_lines() {
        let mut sink = EventSink::new(Vec::new(), OutputFormat::Text);
        sink.write(&event()).unwrap();
        sink.write(&event()).unwrap();
        assert_eq!(sink.written(), 2);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.starts_with("syscall=321 arg1=6 arg2=0xabadcafe arg3=123 ret=0\n"));
    }

    #[test]
    fn test_json_lines() {
        let mut sink = EventSink::new(Vec::new(), OutputFormat::Json);
        sink.write(&event()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["syscall_nr"], 321);
        assert_eq!(value["arg2"], 0xABAD_CAFE_u64);
        assert_eq!(value["ret"], 0);
    }
}

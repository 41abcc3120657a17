//! Structured error types for bstrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::path::PathBuf;

use thiserror::Error;

use super::types::Hook;
use crate::loader::dispatch::PartialDispatch;

/// Opaque cause coming from the kernel submission layer (aya).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Module bundle not found at {0}")]
    BundleNotFound(PathBuf),

    #[error("No parser module could be registered from {0}")]
    NoParsers(PathBuf),

    #[error("Malformed module {module}: {reason}")]
    MalformedModule { module: String, reason: String },

    #[error("Kernel rejected module {module}: {source}")]
    KernelRejected {
        module: String,
        #[source]
        source: BoxError,
    },

    #[error("Variable '{name}' not found in {module}; available vars: {available:?}")]
    VariableNotFound { module: String, name: String, available: Vec<String> },

    #[error("Module {module} depends on shared maps that are not loaded yet")]
    DependencyNotReady { module: String },

    #[error("Can't get syscall number of {module}: {source}")]
    MissingSyscallNumber {
        module: String,
        #[source]
        source: Box<TraceError>,
    },

    #[error("Module {module} must declare exactly one entry program, found {found}")]
    MissingEntryProgram { module: String, found: usize },

    #[error("Program {program} not found in {module}")]
    ProgramNotFound { module: String, program: String },

    #[error("Map {map} not found in {module}")]
    MapNotFound { module: String, map: String },

    #[error("Failed to attach {hook}: {source}")]
    AttachFailed {
        hook: Hook,
        #[source]
        source: BoxError,
    },

    #[error("Ring buffer reader unavailable: {0}")]
    ReaderUnavailable(#[source] BoxError),

    #[error("Too many arguments {0}, at most 6 fit in registers")]
    TooManyArguments(usize),

    #[error("Unsupported architecture {0}")]
    UnsupportedArchitecture(&'static str),

    #[error("Failed to decode event: {0}")]
    DecodeFailure(#[from] DecodeError),

    #[error("Failed to read event: {0}")]
    ReadFailure(#[source] std::io::Error),

    #[error("Synthetic program run failed: {0}")]
    ProgramRun(#[source] std::io::Error),

    #[error(transparent)]
    Parsers(#[from] PartialDispatch),

    #[error("Failed to load parser module {module}: {source}")]
    ParserLoad {
        module: String,
        #[source]
        source: Box<TraceError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Parser failures that leave the rest of the session usable: the
    /// module loaded fine but its syscall number or kernel submission didn't.
    #[must_use]
    pub fn is_parser_local(&self) -> bool {
        matches!(self, TraceError::MissingSyscallNumber { .. } | TraceError::KernelRejected { .. })
    }

    pub(crate) fn malformed(module: &str, reason: impl Into<String>) -> Self {
        TraceError::MalformedModule { module: module.to_owned(), reason: reason.into() }
    }

    pub(crate) fn rejected(module: &str, source: impl Into<BoxError>) -> Self {
        TraceError::KernelRejected { module: module.to_owned(), source: source.into() }
    }

    pub(crate) fn attach_failed(hook: Hook, source: impl Into<BoxError>) -> Self {
        TraceError::AttachFailed { hook, source: source.into() }
    }
}

/// Per-record decode failure; the record is skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {len} bytes, need at least {need}")]
    Truncated { len: usize, need: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_not_found_lists_available() {
        let err = TraceError::VariableNotFound {
            module: "sc_bpf".to_string(),
            name: "SC_NR".to_string(),
            available: vec!["LICENSE".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("SC_NR"));
        assert!(msg.contains("LICENSE"));
    }

    #[test]
    fn test_missing_syscall_number_keeps_cause() {
        let cause = TraceError::malformed("sc_bpf", "variable SC_NR has unsupported size 3");
        let err = TraceError::MissingSyscallNumber {
            module: "sc_bpf".to_string(),
            source: Box::new(cause),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert!(source.is_some_and(|s| s.contains("unsupported size 3")));
    }

    #[test]
    fn test_only_syscall_number_and_kernel_failures_are_parser_local() {
        let missing = TraceError::MissingSyscallNumber {
            module: "sc_bpf".to_string(),
            source: Box::new(TraceError::malformed("sc_bpf", "no SC_NR")),
        };
        assert!(missing.is_parser_local());
        assert!(TraceError::rejected("sc_bpf", "invalid argument").is_parser_local());

        assert!(!TraceError::malformed("junk", "not a BPF object").is_parser_local());
        assert!(!TraceError::MissingEntryProgram { module: "two".to_string(), found: 2 }.is_parser_local());
        assert!(!TraceError::Io(std::io::Error::other("unreadable")).is_parser_local());
    }

    #[test]
    fn test_attach_error_names_hook() {
        let err = TraceError::attach_failed(Hook::SysEnter, "permission denied");
        assert_eq!(err.to_string(), "Failed to attach sys_enter: permission denied");
    }
}

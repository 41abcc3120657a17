//! Newtypes shared across the loader and the pipeline

use std::fmt;

/// Syscall number, the key of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyscallNr(pub u32);

impl fmt::Display for SyscallNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel hook a dispatcher program binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    SysEnter,
    SysExit,
}

impl Hook {
    /// Order in which hooks are attached. Exit goes first so that no entry is
    /// observed without its exit-side handling in place.
    pub const ATTACH_ORDER: [Hook; 2] = [Hook::SysExit, Hook::SysEnter];

    /// Raw tracepoint name
    #[must_use]
    pub const fn tracepoint(self) -> &'static str {
        match self {
            Hook::SysEnter => "sys_enter",
            Hook::SysExit => "sys_exit",
        }
    }

    /// Dispatcher program bound to this hook
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Hook::SysEnter => bstrace_common::SC_ENTER_PROGRAM,
            Hook::SysExit => bstrace_common::SC_EXIT_PROGRAM,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tracepoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_hook_attaches_first() {
        assert_eq!(Hook::ATTACH_ORDER, [Hook::SysExit, Hook::SysEnter]);
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::SysEnter.tracepoint(), "sys_enter");
        assert_eq!(Hook::SysExit.program(), "sc_exit");
        assert_eq!(Hook::SysExit.to_string(), "sys_exit");
    }
}

//! Syscall dispatch table
//!
//! Routes a syscall number to the entry program of the parser that handles
//! it. Population keeps going past parser-local failures (no syscall number,
//! kernel rejection) and reports them all at the end; any other failure ends
//! population at once.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use aya::maps::{MapData, ProgramArray};
use aya::programs::ProgramFd;
use log::{info, warn};
use thiserror::Error;

use super::module::ModuleInstance;
use crate::domain::{BoxError, SyscallNr, TraceError};

/// Slot storage indexed by syscall number (the kernel program array)
pub trait ProgramSlots {
    type Program: ?Sized;

    /// # Errors
    /// Whatever the backing store reports (out of range, bad fd).
    fn insert_program(&mut self, nr: SyscallNr, program: &Self::Program) -> Result<(), BoxError>;
}

impl ProgramSlots for ProgramArray<MapData> {
    type Program = ProgramFd;

    fn insert_program(&mut self, nr: SyscallNr, program: &ProgramFd) -> Result<(), BoxError> {
        self.set(nr.0, program, 0)?;
        Ok(())
    }
}

/// A loaded parser: declares its syscall number and exposes one entry program
pub trait ParserModule {
    type Program: ?Sized;

    fn name(&self) -> &str;

    /// # Errors
    /// `MissingSyscallNumber`
    fn syscall_number(&self) -> Result<SyscallNr, TraceError>;

    /// # Errors
    /// `MissingEntryProgram` or `ProgramNotFound`
    fn entry_program(&self) -> Result<&Self::Program, TraceError>;
}

impl ParserModule for ModuleInstance {
    type Program = ProgramFd;

    fn name(&self) -> &str {
        ModuleInstance::name(self)
    }

    fn syscall_number(&self) -> Result<SyscallNr, TraceError> {
        self.variables().syscall_number()
    }

    fn entry_program(&self) -> Result<&ProgramFd, TraceError> {
        let names: Vec<&str> = self.program_names().collect();
        match names.as_slice() {
            [only] => self.program_fd(only),
            other => Err(TraceError::MissingEntryProgram {
                module: self.name().to_owned(),
                found: other.len(),
            }),
        }
    }
}

/// Parser successfully routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nr: SyscallNr,
    pub module: String,
}

/// Parser that could not be routed, and why
#[derive(Debug)]
pub struct ParserFailure {
    pub module: String,
    pub error: TraceError,
}

impl ParserFailure {
    pub fn new(module: impl Into<String>, error: TraceError) -> Self {
        Self { module: module.into(), error }
    }
}

/// Aggregated outcome when at least one parser failed
#[derive(Error, Debug)]
pub struct PartialDispatch {
    pub registered: Vec<Registration>,
    pub failures: Vec<ParserFailure>,
}

impl fmt::Display for PartialDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} parser modules failed to load:",
            self.failures.len(),
            self.failures.len() + self.registered.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.module, failure.error)?;
        }
        Ok(())
    }
}

/// Syscall number to parser routing
#[derive(Debug)]
pub struct DispatchTable<S> {
    slots: S,
    entries: BTreeMap<SyscallNr, String>,
}

impl<S: ProgramSlots> DispatchTable<S> {
    pub fn new(slots: S) -> Self {
        Self { slots, entries: BTreeMap::new() }
    }

    /// Route `parser`'s syscall to its entry program.
    ///
    /// A later registration for the same number replaces the earlier one.
    ///
    /// # Errors
    /// `MissingSyscallNumber`, `MissingEntryProgram` or `KernelRejected` if
    /// the slot write fails.
    pub fn register<P>(&mut self, parser: &P) -> Result<SyscallNr, TraceError>
    where
        P: ParserModule<Program = S::Program>,
    {
        let nr = parser.syscall_number()?;
        let program = parser.entry_program()?;
        self.slots
            .insert_program(nr, program)
            .map_err(|e| TraceError::rejected(parser.name(), e))?;

        if let Some(previous) = self.entries.insert(nr, parser.name().to_owned()) {
            warn!("Syscall {nr}: {} replaces {previous}", parser.name());
        }
        info!("Store program for syscall {nr} from {} to prog array", parser.name());
        Ok(nr)
    }

    /// Register every parser, collecting parser-local failures instead of
    /// stopping.
    ///
    /// Parser handles are released only after the whole set has been
    /// attempted; the table keeps its own reference to each routed program.
    ///
    /// # Errors
    /// `ParserLoad` for the first failure that is not parser-local (bad
    /// object, unreadable file, wrong program count); otherwise `Parsers`
    /// listing every collected failure alongside what did register.
    pub fn populate<P, I>(&mut self, parsers: I) -> Result<Vec<Registration>, TraceError>
    where
        P: ParserModule<Program = S::Program>,
        I: IntoIterator<Item = Result<P, ParserFailure>>,
    {
        let mut held = Vec::new();
        let mut registered = Vec::new();
        let mut failures = Vec::new();

        for parser in parsers {
            let failure = match parser {
                Ok(parser) => {
                    let outcome = self.register(&parser);
                    let name = parser.name().to_owned();
                    held.push(parser);
                    match outcome {
                        Ok(nr) => {
                            registered.push(Registration { nr, module: name });
                            continue;
                        }
                        Err(error) => ParserFailure::new(name, error),
                    }
                }
                Err(failure) => failure,
            };

            if !failure.error.is_parser_local() {
                return Err(TraceError::ParserLoad {
                    module: failure.module,
                    source: Box::new(failure.error),
                });
            }
            failures.push(failure);
        }
        drop(held);

        if failures.is_empty() {
            Ok(registered)
        } else {
            Err(PartialDispatch { registered, failures }.into())
        }
    }

    /// Module currently routed for `nr`
    #[must_use]
    pub fn get(&self, nr: SyscallNr) -> Option<&str> {
        self.entries.get(&nr).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SyscallNr, &str)> {
        self.entries.iter().map(|(nr, module)| (*nr, module.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn slots(&self) -> &S {
        &self.slots
    }
}

/// Decide whether a populated table is good enough to trace with.
///
/// Collected parser failures are tolerated when at least one parser
/// registered, unless `strict` is set. An empty table is always fatal.
///
/// # Errors
/// The populate error when it can't be tolerated, or `NoParsers`.
pub fn settle_registrations(
    outcome: Result<Vec<Registration>, TraceError>,
    strict: bool,
    parser_dir: &Path,
) -> Result<Vec<Registration>, TraceError> {
    let registrations = match outcome {
        Ok(registrations) => registrations,
        Err(TraceError::Parsers(partial)) if !strict && !partial.registered.is_empty() => {
            warn!("{partial}");
            partial.registered
        }
        Err(e) => return Err(e),
    };
    if registrations.is_empty() {
        return Err(TraceError::NoParsers(parser_dir.to_path_buf()));
    }
    Ok(registrations)
}

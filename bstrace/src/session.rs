//! # Tracing Session
//!
//! Orchestrates the startup sequence and owns every kernel resource:
//!
//! 1. [`Tracer::load`]: shared maps, dispatcher, dispatch table population
//! 2. [`LoadedTracer::attach`]: `sys_exit` then `sys_enter`
//! 3. [`Session::spawn_pipeline`]: ring buffer read loop
//! 4. [`Session::shutdown`] (or drop): detach, then the dispatcher and its
//!    table, then the shared maps
//!
//! Kernel handles live in one [`KernelHandles`] value whose field order is
//! the release order; a [`Session`] drops its attachments before it.

use std::path::PathBuf;

use aya::maps::{MapData, ProgramArray};
use aya::programs::raw_trace_point::RawTracePointLink;
use aya::programs::ProgramFd;
use aya_log::EbpfLogger;
use bstrace_common::{EVT_BUF_MAP, SC_PARSERS_MAP};
use log::{info, warn};

use crate::domain::{Hook, SyscallNr, TraceError};
use crate::loader::bundle::PARSER_DIR;
use crate::loader::{
    settle_registrations, Attachments, CompiledModule, DispatchTable, ModuleBundle, ModuleInstance,
    ParserFailure, Registration, SharedMapSet, Wiring,
};
use crate::pipeline::{spawn_reader, CancelToken, EventPipeline, PipelineConfig, RingBufSource};

/// Library-level configuration, built from CLI args by the binary
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Module bundle root
    pub modules: PathBuf,
    /// bpffs directory under which the per-session pin directory is created
    pub pin_path: PathBuf,
    pub pipeline: PipelineConfig,
    /// Treat any parser failure as fatal
    pub strict: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            modules: PathBuf::from("target/bstrace-modules"),
            pin_path: PathBuf::from("/sys/fs/bpf/bstrace"),
            pipeline: PipelineConfig::default(),
            strict: false,
        }
    }
}

impl TracerConfig {
    /// Pin directory owned by this process
    #[must_use]
    pub fn session_pin_dir(&self) -> PathBuf {
        self.pin_path.join(std::process::id().to_string())
    }
}

type ParserTable = DispatchTable<ProgramArray<MapData>>;

/// Handles acquired during loading, declared in release order: the dispatch
/// table, then the dispatcher and its programs, then the shared maps.
#[derive(Debug)]
pub struct KernelHandles<T = ParserTable, D = ModuleInstance, S = SharedMapSet> {
    table: T,
    dispatcher: D,
    shared: S,
}

impl<T, D, S> KernelHandles<T, D, S> {
    #[must_use]
    pub fn new(table: T, dispatcher: D, shared: S) -> Self {
        Self { table, dispatcher, shared }
    }

    /// Run `attach` against the dispatcher, keeping the handles on success.
    ///
    /// # Errors
    /// Whatever `attach` returns; every handle is released first, in order.
    pub fn attach_with<A, E>(
        mut self,
        attach: impl FnOnce(&mut D) -> Result<A, E>,
    ) -> Result<(A, Self), E> {
        match attach(&mut self.dispatcher) {
            Ok(attached) => Ok((attached, self)),
            Err(e) => {
                drop(self);
                Err(e)
            }
        }
    }
}

/// Entry point of the startup sequence
#[derive(Debug, Clone, Copy)]
pub struct Tracer;

impl Tracer {
    /// Load and wire every module of the bundle. Nothing is attached yet.
    ///
    /// On failure, whatever was acquired so far is released in reverse order.
    ///
    /// # Errors
    /// Any module-load or kernel-submission failure of the shared or
    /// dispatcher module; `ParserLoad` for a parser that can't be read or
    /// parsed; `Parsers` when parser modules failed and either `strict` is
    /// set or none registered; `NoParsers` for an empty bundle.
    pub fn load(config: TracerConfig) -> Result<LoadedTracer, TraceError> {
        let bundle = ModuleBundle::new(&config.modules);
        bundle.check()?;

        let mut wiring = Wiring::new();
        wiring.load_shared(&bundle.shared()?, config.session_pin_dir())?;

        let mut dispatcher = wiring.instantiate(&bundle.dispatcher()?)?;
        init_probe_logger(&mut dispatcher);

        let slots = ProgramArray::try_from(dispatcher.take_map(SC_PARSERS_MAP)?)
            .map_err(|e| TraceError::rejected(dispatcher.name(), e))?;
        let mut table = DispatchTable::new(slots);

        let parsers = bundle.parser_paths()?.into_iter().map(|path| {
            let module = CompiledModule::from_file(&path)
                .map_err(|e| ParserFailure::new(path.display().to_string(), e))?;
            wiring.instantiate(&module).map_err(|e| ParserFailure::new(module.name(), e))
        });

        let parser_dir = bundle.root().join(PARSER_DIR);
        let registrations = settle_registrations(table.populate(parsers), config.strict, &parser_dir)?;
        info!("✓ Dispatch table ready: {} syscalls routed", registrations.len());

        let shared = wiring
            .into_shared()
            .ok_or_else(|| TraceError::DependencyNotReady { module: dispatcher.name().to_owned() })?;

        Ok(LoadedTracer { kernel: KernelHandles::new(table, dispatcher, shared), registrations, config })
    }
}

fn init_probe_logger(instance: &mut ModuleInstance) {
    if let Err(e) = EbpfLogger::init(instance.ebpf_mut()) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

fn open_pipeline(
    dispatcher: &mut ModuleInstance,
    config: PipelineConfig,
    cancel: CancelToken,
) -> Result<EventPipeline, TraceError> {
    let map = dispatcher.take_map(EVT_BUF_MAP).map_err(|_| {
        TraceError::ReaderUnavailable(format!("{EVT_BUF_MAP} is already taken by another reader").into())
    })?;
    let source = RingBufSource::open(map)?;
    Ok(spawn_reader(source, config, cancel))
}

/// Fully wired, not yet attached
pub struct LoadedTracer {
    kernel: KernelHandles,
    registrations: Vec<Registration>,
    config: TracerConfig,
}

impl LoadedTracer {
    #[must_use]
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    #[must_use]
    pub fn shared(&self) -> &SharedMapSet {
        &self.kernel.shared
    }

    pub fn routes(&self) -> impl Iterator<Item = (SyscallNr, &str)> {
        self.kernel.table.iter()
    }

    /// Dispatcher program bound to `hook`, for synthetic runs
    ///
    /// # Errors
    /// `ProgramNotFound`
    pub fn program_fd(&self, hook: Hook) -> Result<&ProgramFd, TraceError> {
        self.kernel.dispatcher.program_fd(hook.program())
    }

    /// Start the read loop before attaching (synthetic runs).
    ///
    /// # Errors
    /// `ReaderUnavailable` if the ring buffer was already taken.
    pub fn spawn_pipeline(&mut self, cancel: CancelToken) -> Result<EventPipeline, TraceError> {
        open_pipeline(&mut self.kernel.dispatcher, self.config.pipeline, cancel)
    }

    /// Attach both hooks; the dispatch table is complete at this point.
    ///
    /// # Errors
    /// `AttachFailed`; everything loaded so far is released in order.
    pub fn attach(self) -> Result<Session, TraceError> {
        let LoadedTracer { kernel, registrations, config } = self;
        let (attachments, kernel) = kernel.attach_with(Attachments::attach)?;
        info!("✓ Attached raw tracepoints: {}, {}", Hook::SysExit, Hook::SysEnter);
        Ok(Session { attachments, kernel, registrations, config })
    }
}

/// Running session: hooks attached
pub struct Session {
    attachments: Attachments<RawTracePointLink>,
    kernel: KernelHandles,
    registrations: Vec<Registration>,
    config: TracerConfig,
}

impl Session {
    #[must_use]
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Module routed for each syscall number
    pub fn routes(&self) -> impl Iterator<Item = (SyscallNr, &str)> {
        self.kernel.table.iter()
    }

    #[must_use]
    pub fn pin_dir(&self) -> &std::path::Path {
        self.kernel.shared.pin_dir()
    }

    /// Start the ring buffer read loop.
    ///
    /// # Errors
    /// `ReaderUnavailable` if a pipeline is already running for this session.
    pub fn spawn_pipeline(&mut self, cancel: CancelToken) -> Result<EventPipeline, TraceError> {
        open_pipeline(&mut self.kernel.dispatcher, self.config.pipeline, cancel)
    }

    /// Detach both hooks, then release the remaining handles in order.
    ///
    /// # Errors
    /// The first detach failure; the rest is released regardless.
    pub fn shutdown(mut self) -> Result<(), TraceError> {
        let detached = self.attachments.detach();
        drop(self);
        info!("Session resources released");
        detached
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.attachments.detach() {
            warn!("Failed to detach on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<&'static str>>>;

    struct Handle {
        name: &'static str,
        journal: Journal,
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            self.journal.borrow_mut().push(self.name);
        }
    }

    fn handles(journal: &Journal) -> KernelHandles<Handle, Handle, Handle> {
        let handle = |name| Handle { name, journal: Rc::clone(journal) };
        KernelHandles::new(handle("table"), handle("dispatcher"), handle("shared"))
    }

    #[test]
    fn test_failed_attach_releases_in_order() {
        let journal = Journal::default();
        let result = handles(&journal).attach_with(|_| Err::<(), _>("permission denied"));

        assert_eq!(result.err(), Some("permission denied"));
        assert_eq!(*journal.borrow(), vec!["table", "dispatcher", "shared"]);
    }

    #[test]
    fn test_attach_keeps_handles() {
        let journal = Journal::default();
        let (attached, kernel) = handles(&journal)
            .attach_with(|dispatcher| Ok::<_, ()>(dispatcher.name))
            .unwrap();

        assert_eq!(attached, "dispatcher");
        assert!(journal.borrow().is_empty());
        drop(kernel);
        assert_eq!(*journal.borrow(), vec!["table", "dispatcher", "shared"]);
    }
}

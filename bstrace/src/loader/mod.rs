//! Module loading and kernel wiring
//!
//! Load order is fixed: shared maps, then the dispatcher, then every parser.
//! Each dependent module reuses the shared maps through their pins.

pub mod attach;
pub mod bundle;
pub mod dispatch;
pub mod module;
pub mod shared;

pub use attach::{AttachState, Attachments, HookAttacher, HookLink, TracepointAttachment};
pub use bundle::ModuleBundle;
pub use dispatch::{
    settle_registrations, DispatchTable, ParserFailure, ParserModule, PartialDispatch, ProgramSlots,
    Registration,
};
pub use module::{CompiledModule, ModuleInstance, ProgramInfo, Variables};
pub use shared::{SharedMapSet, Wiring};

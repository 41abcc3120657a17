//! Shared map set and module wiring
//!
//! Maps defined once in the shared module are pinned under a per-session
//! directory. Every dependent module is loaded with the same pin path, so the
//! loader reuses the existing map instead of creating a private copy.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::module::{CompiledModule, ModuleInstance};
use crate::domain::TraceError;

/// Long-lived maps shared by the dispatcher and every parser.
///
/// Exactly one set exists per session. Dropping it unpins the maps and
/// removes the pin directory; the kernel frees them once the last program
/// referencing them is gone.
#[derive(Debug)]
pub struct SharedMapSet {
    pin_dir: PathBuf,
    names: Vec<String>,
    // keeps the map fds open for the whole session
    _instance: ModuleInstance,
}

impl SharedMapSet {
    /// Load the shared module, pinning its maps under `pin_dir`.
    ///
    /// Pins left behind in `pin_dir` by an earlier session are removed first.
    ///
    /// # Errors
    /// `Io` if the pin directory can't be prepared, `KernelRejected` if the
    /// module fails to load.
    pub fn create(module: &CompiledModule, pin_dir: impl Into<PathBuf>) -> Result<Self, TraceError> {
        let pin_dir = pin_dir.into();
        if pin_dir.exists() {
            warn!("Removing stale pins in {}", pin_dir.display());
            std::fs::remove_dir_all(&pin_dir)?;
        }
        std::fs::create_dir_all(&pin_dir)?;

        let instance = match module.instantiate_pinned(&pin_dir) {
            Ok(instance) => instance,
            Err(e) => {
                // nothing owns the directory yet
                if let Err(cleanup) = std::fs::remove_dir_all(&pin_dir) {
                    warn!("Failed to remove {}: {cleanup}", pin_dir.display());
                }
                return Err(e);
            }
        };
        let names: Vec<String> = module
            .maps()
            .iter()
            .filter(|name| pin_dir.join(name).exists())
            .cloned()
            .collect();
        for unpinned in module.maps().iter().filter(|m| !names.contains(m)) {
            warn!("Map {unpinned} in {} is not pinned and can't be shared", module.name());
        }
        info!("Shared maps {names:?} pinned at {}", pin_dir.display());

        Ok(Self { pin_dir, names, _instance: instance })
    }

    #[must_use]
    pub fn pin_dir(&self) -> &Path {
        &self.pin_dir
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, map: &str) -> bool {
        self.names.iter().any(|n| n == map)
    }
}

impl Drop for SharedMapSet {
    fn drop(&mut self) {
        for name in &self.names {
            if let Err(e) = std::fs::remove_file(self.pin_dir.join(name)) {
                warn!("Failed to unpin {name}: {e}");
            }
        }
        if let Err(e) = std::fs::remove_dir(&self.pin_dir) {
            debug!("Pin directory {} not removed: {e}", self.pin_dir.display());
        }
    }
}

/// Enforces load order: the shared set first, then any dependent module.
#[derive(Debug, Default)]
pub struct Wiring {
    shared: Option<SharedMapSet>,
}

impl Wiring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// See [`SharedMapSet::create`].
    pub fn load_shared(
        &mut self,
        module: &CompiledModule,
        pin_dir: impl Into<PathBuf>,
    ) -> Result<&SharedMapSet, TraceError> {
        Ok(&*self.shared.insert(SharedMapSet::create(module, pin_dir)?))
    }

    #[must_use]
    pub fn shared(&self) -> Option<&SharedMapSet> {
        self.shared.as_ref()
    }

    /// Load a module that reuses the shared maps
    ///
    /// # Errors
    /// `DependencyNotReady` if the shared set isn't loaded yet, otherwise see
    /// [`CompiledModule::instantiate`].
    pub fn instantiate(&self, module: &CompiledModule) -> Result<ModuleInstance, TraceError> {
        let shared = self
            .shared
            .as_ref()
            .ok_or_else(|| TraceError::DependencyNotReady { module: module.name().to_owned() })?;
        module.instantiate(Some(shared))
    }

    #[must_use]
    pub fn into_shared(self) -> Option<SharedMapSet> {
        self.shared
    }
}

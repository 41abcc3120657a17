//! On-disk module bundle layout
//!
//! ```text
//! <root>/
//!   common/shared    shared maps (SC_DATA)
//!   tp/strace        dispatcher programs, SC_PARSERS, EVT_BUF
//!   parser/*         one file per syscall parser
//! ```

use std::path::{Path, PathBuf};

use log::{debug, info};

use super::module::CompiledModule;
use crate::domain::TraceError;

pub const SHARED_MODULE: &str = "common/shared";
pub const DISPATCHER_MODULE: &str = "tp/strace";
pub const PARSER_DIR: &str = "parser";

#[derive(Debug, Clone)]
pub struct ModuleBundle {
    root: PathBuf,
}

impl ModuleBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Verify the mandatory modules are present
    ///
    /// # Errors
    /// `BundleNotFound` naming the first missing path.
    pub fn check(&self) -> Result<(), TraceError> {
        for path in [self.root.clone(), self.root.join(SHARED_MODULE), self.root.join(DISPATCHER_MODULE)] {
            if !path.exists() {
                return Err(TraceError::BundleNotFound(path));
            }
        }
        Ok(())
    }

    /// # Errors
    /// `Io` or `MalformedModule`.
    pub fn shared(&self) -> Result<CompiledModule, TraceError> {
        CompiledModule::from_file(&self.root.join(SHARED_MODULE))
    }

    /// # Errors
    /// `Io` or `MalformedModule`.
    pub fn dispatcher(&self) -> Result<CompiledModule, TraceError> {
        CompiledModule::from_file(&self.root.join(DISPATCHER_MODULE))
    }

    /// Parser module files in name order. Subdirectories are skipped.
    ///
    /// # Errors
    /// `Io` if the parser directory can't be listed.
    pub fn parser_paths(&self) -> Result<Vec<PathBuf>, TraceError> {
        let dir = self.root.join(PARSER_DIR);
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                info!("Skipping directory {} in {}", entry.file_name().to_string_lossy(), dir.display());
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();
        debug!("Found {} parser modules in {}", paths.len(), dir.display());
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parser_paths_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        let parsers = dir.path().join(PARSER_DIR);
        fs::create_dir_all(parsers.join("nested")).unwrap();
        fs::write(parsers.join("sc_read"), b"").unwrap();
        fs::write(parsers.join("sc_bpf"), b"").unwrap();
        fs::write(parsers.join("nested").join("sc_write"), b"").unwrap();

        let bundle = ModuleBundle::new(dir.path());
        let names: Vec<_> = bundle
            .parser_paths()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sc_bpf", "sc_read"]);
    }

    #[test]
    fn test_check_reports_missing_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("common")).unwrap();
        fs::write(dir.path().join(SHARED_MODULE), b"").unwrap();

        let err = ModuleBundle::new(dir.path()).check().unwrap_err();
        assert!(matches!(err, TraceError::BundleNotFound(p) if p.ends_with(DISPATCHER_MODULE)));
    }

    #[test]
    fn test_missing_parser_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleBundle::new(dir.path()).parser_paths().unwrap_err();
        assert!(matches!(err, TraceError::Io(_)));
    }
}

//! Compiled probe modules
//!
//! A [`CompiledModule`] is the parsed, not-yet-loaded image of one BPF object
//! file: its programs, the maps it declares and the named read-only variables
//! it carries. [`CompiledModule::instantiate`] submits it to the kernel and
//! yields a [`ModuleInstance`] that owns every resulting handle.

use std::collections::BTreeMap;
use std::path::Path;

use aya::maps::Map;
use aya::programs::{ProgramFd, RawTracePoint};
use aya::{Ebpf, EbpfLoader};
use log::debug;
use object::{Architecture, Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};

use super::shared::SharedMapSet;
use crate::domain::{SyscallNr, TraceError};

/// Entry program metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub name: String,
    /// ELF section, e.g. `raw_tracepoint/sys_enter`
    pub section: String,
}

/// Initial value of a global in a data section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub section: String,
    pub bytes: Vec<u8>,
}

/// Named globals of one module
#[derive(Debug, Clone, Default)]
pub struct Variables {
    module: String,
    little_endian: bool,
    entries: BTreeMap<String, Variable>,
}

impl Variables {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Read an unsigned integer variable of width 1, 2, 4 or 8 bytes in the
    /// module's byte order.
    ///
    /// # Errors
    /// `VariableNotFound` or `MalformedModule` for other widths.
    pub fn read_uint(&self, name: &str) -> Result<u64, TraceError> {
        let var = self.get(name).ok_or_else(|| TraceError::VariableNotFound {
            module: self.module.clone(),
            name: name.to_owned(),
            available: self.names().map(str::to_owned).collect(),
        })?;

        uint_from_bytes(&var.bytes, self.little_endian).ok_or_else(|| {
            TraceError::malformed(
                &self.module,
                format!("variable {name} has unsupported size {}", var.bytes.len()),
            )
        })
    }

    /// Value of the `SC_NR` constant every parser module declares
    ///
    /// # Errors
    /// `MissingSyscallNumber` wrapping the underlying cause.
    pub fn syscall_number(&self) -> Result<SyscallNr, TraceError> {
        let missing = |source| TraceError::MissingSyscallNumber {
            module: self.module.clone(),
            source: Box::new(source),
        };

        let value = self.read_uint(bstrace_common::SC_NR_VARIABLE).map_err(missing)?;
        u32::try_from(value).map(SyscallNr).map_err(|_| {
            missing(TraceError::malformed(&self.module, format!("syscall number {value} out of range")))
        })
    }
}

fn uint_from_bytes(bytes: &[u8], little_endian: bool) -> Option<u64> {
    if !matches!(bytes.len(), 1 | 2 | 4 | 8) {
        return None;
    }
    let mut word = [0u8; 8];
    if little_endian {
        word[..bytes.len()].copy_from_slice(bytes);
        Some(u64::from_le_bytes(word))
    } else {
        word[8 - bytes.len()..].copy_from_slice(bytes);
        Some(u64::from_be_bytes(word))
    }
}

/// Parsed BPF object file
#[derive(Debug, Clone)]
pub struct CompiledModule {
    name: String,
    bytes: Vec<u8>,
    programs: Vec<ProgramInfo>,
    maps: Vec<String>,
    variables: Variables,
}

impl CompiledModule {
    /// Parse a BPF ELF image.
    ///
    /// # Errors
    /// `MalformedModule` if the image is not a BPF object.
    pub fn parse(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, TraceError> {
        let name = name.into();
        let file = object::File::parse(bytes.as_slice())
            .map_err(|e| TraceError::malformed(&name, e.to_string()))?;
        if file.architecture() != Architecture::Bpf {
            return Err(TraceError::malformed(
                &name,
                format!("not a BPF object (architecture {:?})", file.architecture()),
            ));
        }

        let mut programs = Vec::new();
        let mut maps = Vec::new();
        let mut variables = Variables {
            module: name.clone(),
            little_endian: file.is_little_endian(),
            entries: BTreeMap::new(),
        };

        for symbol in file.symbols() {
            if !matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data | SymbolKind::Unknown) {
                continue;
            }
            let Ok(symbol_name) = symbol.name() else { continue };
            if symbol_name.is_empty() {
                continue;
            }
            let Some(section) = symbol.section_index().and_then(|i| file.section_by_index(i).ok())
            else {
                continue;
            };
            let Ok(section_name) = section.name() else { continue };

            match section.kind() {
                SectionKind::Text => {
                    if symbol.is_global() && section_name != ".text" {
                        programs.push(ProgramInfo {
                            name: symbol_name.to_owned(),
                            section: section_name.to_owned(),
                        });
                    }
                }
                _ if section_name == "maps" || section_name == ".maps" => {
                    maps.push(symbol_name.to_owned());
                }
                SectionKind::ReadOnlyData
                | SectionKind::ReadOnlyString
                | SectionKind::Data
                | SectionKind::UninitializedData => {
                    let bytes = variable_bytes(&section, &symbol).ok_or_else(|| {
                        TraceError::malformed(
                            &name,
                            format!("symbol {symbol_name} out of section {section_name} bounds"),
                        )
                    })?;
                    variables.entries.insert(
                        symbol_name.to_owned(),
                        Variable { section: section_name.to_owned(), bytes },
                    );
                }
                _ => {}
            }
        }

        debug!(
            "Parsed module {name}: {} programs, {} maps, {} variables",
            programs.len(),
            maps.len(),
            variables.entries.len()
        );

        Ok(Self { name, bytes, programs, maps, variables })
    }

    /// Read and parse a module file; the module is named after the file.
    ///
    /// # Errors
    /// `Io` if the file can't be read, `MalformedModule` if it doesn't parse.
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let bytes = std::fs::read(path)?;
        Self::parse(name, bytes)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn programs(&self) -> &[ProgramInfo] {
        &self.programs
    }

    #[must_use]
    pub fn maps(&self) -> &[String] {
        &self.maps
    }

    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// The single entry program of a parser module
    ///
    /// # Errors
    /// `MissingEntryProgram` if the module declares none or several.
    pub fn entry_program(&self) -> Result<&ProgramInfo, TraceError> {
        match self.programs.as_slice() {
            [program] => Ok(program),
            other => Err(TraceError::MissingEntryProgram {
                module: self.name.clone(),
                found: other.len(),
            }),
        }
    }

    /// Load the module into the kernel, reusing the maps pinned by `shared`
    /// wherever names match.
    ///
    /// Without `shared`, maps are created fresh and owned by this instance.
    ///
    /// # Errors
    /// `KernelRejected` if the verifier or the map creation fails.
    pub fn instantiate(&self, shared: Option<&SharedMapSet>) -> Result<ModuleInstance, TraceError> {
        match shared {
            Some(set) => {
                for map in self.maps.iter().filter(|m| set.contains(m)) {
                    debug!("{}: reusing shared map {map}", self.name);
                }
                self.instantiate_pinned(set.pin_dir())
            }
            None => self.load_with(&mut EbpfLoader::new()),
        }
    }

    /// Load with pinned maps created (or reused) under `pin_dir`
    pub(crate) fn instantiate_pinned(&self, pin_dir: &Path) -> Result<ModuleInstance, TraceError> {
        self.load_with(EbpfLoader::new().map_pin_path(pin_dir))
    }

    fn load_with(&self, loader: &mut EbpfLoader<'_>) -> Result<ModuleInstance, TraceError> {
        let mut ebpf = loader
            .load(&self.bytes)
            .map_err(|e| TraceError::rejected(&self.name, e))?;

        for (program_name, program) in ebpf.programs_mut() {
            let raw_tp: &mut RawTracePoint = program.try_into().map_err(|_| {
                TraceError::malformed(&self.name, format!("{program_name} is not a raw tracepoint"))
            })?;
            raw_tp.load().map_err(|e| TraceError::rejected(&self.name, e))?;
            debug!("{}: loaded program {program_name}", self.name);
        }

        Ok(ModuleInstance { name: self.name.clone(), ebpf, variables: self.variables.clone() })
    }
}

/// Initial bytes of a data symbol; `None` if it doesn't fit its section.
fn variable_bytes<'data>(
    section: &impl ObjectSection<'data>,
    symbol: &impl ObjectSymbol<'data>,
) -> Option<Vec<u8>> {
    let size = usize::try_from(symbol.size()).ok()?;
    let offset = usize::try_from(symbol.address().checked_sub(section.address())?).ok()?;
    let end = offset.checked_add(size)?;
    match section.data() {
        Ok(data) if !data.is_empty() => data.get(offset..end).map(<[u8]>::to_vec),
        // .bss: zero-initialized
        _ => (end <= usize::try_from(section.size()).ok()?).then(|| vec![0; size]),
    }
}

/// Kernel-resident module and every handle it owns.
///
/// Dropping the instance closes programs, maps and links in one go.
pub struct ModuleInstance {
    name: String,
    ebpf: Ebpf,
    variables: Variables,
}

impl ModuleInstance {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn program_names(&self) -> impl Iterator<Item = &str> {
        self.ebpf.programs().map(|(name, _)| name)
    }

    /// # Errors
    /// `ProgramNotFound` if the module has no such raw tracepoint program.
    pub fn raw_tracepoint_mut(&mut self, program: &str) -> Result<&mut RawTracePoint, TraceError> {
        let not_found = || TraceError::ProgramNotFound {
            module: self.name.clone(),
            program: program.to_owned(),
        };
        let found = self.ebpf.program_mut(program).ok_or_else(not_found)?;
        found.try_into().map_err(|_| not_found())
    }

    /// # Errors
    /// `ProgramNotFound` if the program is missing or not loaded.
    pub fn program_fd(&self, program: &str) -> Result<&ProgramFd, TraceError> {
        let not_found = || TraceError::ProgramNotFound {
            module: self.name.clone(),
            program: program.to_owned(),
        };
        let found: &RawTracePoint = self
            .ebpf
            .program(program)
            .ok_or_else(not_found)?
            .try_into()
            .map_err(|_| not_found())?;
        found.fd().map_err(|_| not_found())
    }

    /// Take ownership of a map declared by this module
    ///
    /// # Errors
    /// `MapNotFound` if missing or already taken.
    pub fn take_map(&mut self, map: &str) -> Result<Map, TraceError> {
        self.ebpf.take_map(map).ok_or_else(|| TraceError::MapNotFound {
            module: self.name.clone(),
            map: map.to_owned(),
        })
    }

    pub(crate) fn ebpf_mut(&mut self) -> &mut Ebpf {
        &mut self.ebpf
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_widths_little_endian() {
        assert_eq!(uint_from_bytes(&[0x41], true), Some(0x41));
        assert_eq!(uint_from_bytes(&[0x41, 0x01], true), Some(0x141));
        assert_eq!(uint_from_bytes(&321u32.to_le_bytes(), true), Some(321));
        assert_eq!(uint_from_bytes(&u64::MAX.to_le_bytes(), true), Some(u64::MAX));
    }

    #[test]
    fn test_uint_big_endian() {
        assert_eq!(uint_from_bytes(&321u32.to_be_bytes(), false), Some(321));
        assert_eq!(uint_from_bytes(&[0x01, 0x41], false), Some(0x141));
    }

    #[test]
    fn test_uint_rejects_odd_widths() {
        assert_eq!(uint_from_bytes(&[1, 2, 3], true), None);
        assert_eq!(uint_from_bytes(&[], true), None);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = CompiledModule::parse("junk", b"not an elf".to_vec()).unwrap_err();
        assert!(matches!(err, TraceError::MalformedModule { ref module, .. } if module == "junk"));
    }

    #[test]
    fn test_missing_variable_lists_available() {
        let vars = Variables {
            module: "sc_bpf".to_string(),
            little_endian: true,
            entries: BTreeMap::from([(
                "LICENSE".to_string(),
                Variable { section: "license".to_string(), bytes: b"GPL\0".to_vec() },
            )]),
        };
        let err = vars.syscall_number().unwrap_err();
        let TraceError::MissingSyscallNumber { source, .. } = err else {
            panic!("expected MissingSyscallNumber");
        };
        assert!(matches!(*source, TraceError::VariableNotFound { ref available, .. } if available == &["LICENSE"]));
    }
}

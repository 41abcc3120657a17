//! Synthetic BPF objects for loader tests

#![allow(dead_code)]

use std::path::Path;

use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};

/// `exit` instruction
const BPF_EXIT: [u8; 8] = [0x95, 0, 0, 0, 0, 0, 0, 0];

pub struct ModuleSpec<'a> {
    pub arch: Architecture,
    pub endian: Endianness,
    /// (program name, section)
    pub programs: &'a [(&'a str, &'a str)],
    pub maps: &'a [&'a str],
    /// (name, initial bytes)
    pub rodata: &'a [(&'a str, &'a [u8])],
}

impl Default for ModuleSpec<'_> {
    fn default() -> Self {
        Self {
            arch: Architecture::Bpf,
            endian: Endianness::Little,
            programs: &[],
            maps: &[],
            rodata: &[],
        }
    }
}

fn global(name: &str, kind: SymbolKind) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value: 0,
        size: 0,
        kind,
        scope: SymbolScope::Dynamic,
        weak: false,
        section: SymbolSection::Undefined,
        flags: SymbolFlags::None,
    }
}

pub fn build_module(spec: &ModuleSpec<'_>) -> Vec<u8> {
    build_module_with(spec, |_| {})
}

/// Like [`build_module`], letting `tweak` edit the object before it's written
pub fn build_module_with(spec: &ModuleSpec<'_>, tweak: impl FnOnce(&mut Object<'static>)) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, spec.arch, spec.endian);

    // helper code lives in .text and must not count as a program
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    let helper = obj.add_symbol(global("helper", SymbolKind::Text));
    obj.add_symbol_data(helper, text, &BPF_EXIT, 8);

    for (name, section) in spec.programs {
        let id = obj.add_section(Vec::new(), section.as_bytes().to_vec(), SectionKind::Text);
        let symbol = obj.add_symbol(global(name, SymbolKind::Text));
        obj.add_symbol_data(symbol, id, &BPF_EXIT, 8);
    }

    if !spec.maps.is_empty() {
        let maps = obj.add_section(Vec::new(), b"maps".to_vec(), SectionKind::Data);
        for name in spec.maps {
            let symbol = obj.add_symbol(global(name, SymbolKind::Data));
            obj.add_symbol_data(symbol, maps, &[0u8; 28], 4);
        }
    }

    if !spec.rodata.is_empty() {
        let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
        for (name, bytes) in spec.rodata {
            let symbol = obj.add_symbol(global(name, SymbolKind::Data));
            obj.add_symbol_data(symbol, rodata, bytes, 1);
        }
    }

    tweak(&mut obj);
    obj.write().expect("Failed to write synthetic BPF object")
}

/// Parser module declaring `SC_NR` as a little-endian u32
pub fn parser_module(program: &str, nr: u32) -> Vec<u8> {
    let nr = nr.to_le_bytes();
    build_module(&ModuleSpec {
        programs: &[(program, "raw_tracepoint/sys_enter")],
        maps: &["SC_DATA"],
        rodata: &[("SC_NR", &nr)],
        ..ModuleSpec::default()
    })
}

/// Lay out a bundle with the given parser files
pub fn stage_bundle(root: &Path, parsers: &[(&str, Vec<u8>)]) {
    let shared = build_module(&ModuleSpec { maps: &["SC_DATA"], ..ModuleSpec::default() });
    let dispatcher = build_module(&ModuleSpec {
        programs: &[("sc_enter", "raw_tracepoint/sys_enter"), ("sc_exit", "raw_tracepoint/sys_exit")],
        maps: &["SC_DATA", "SC_PARSERS", "EVT_BUF"],
        ..ModuleSpec::default()
    });

    for dir in ["common", "tp", "parser"] {
        std::fs::create_dir_all(root.join(dir)).unwrap();
    }
    std::fs::write(root.join("common/shared"), shared).unwrap();
    std::fs::write(root.join("tp/strace"), dispatcher).unwrap();
    for (name, bytes) in parsers {
        std::fs::write(root.join("parser").join(name), bytes).unwrap();
    }
}

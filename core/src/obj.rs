//! Relocatable object-file writers: ELF-64 (System V gABI / x86-64
//! psABI) and PE/COFF x64.
//!
//! The driver assembles an [ObjectModel] (sections with queued
//! relocations plus a symbol list) and the writers serialize it.
//! Sections are emitted in one fixed canonical order regardless of the
//! order the driver added them, so byte output is deterministic for a
//! given input. ELF relocations are RELA (explicit addends); COFF
//! relocations patch their addends into the section contents, since the
//! format keeps them inline.

use crate::codegen::{Reloc, RelocKind};
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjFormat {
    Elf,
    Coff,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionKind {
    Text,
    ROData,
    Data,
    DataRelRo,
    Bss,
    EhFrame,
    GccExceptTable,
    Pdata,
    Xdata,
    Drectve,
    DwRef,
}

#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub bytes: Vec<u8>,
    /// For `.bss`-like sections: the reserved size (bytes is empty).
    pub bss_size: u64,
    pub align: u64,
    pub relocs: Vec<Reloc>,
}

impl Section {
    pub fn new(name: impl Into<String>, kind: SectionKind, align: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes: Vec::new(),
            bss_size: 0,
            align,
            relocs: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Object,
    None,
}

#[derive(Clone, Debug)]
pub struct SymbolDef {
    pub name: String,
    /// Defining section name; `None` for absolute/undefined.
    pub section: Option<String>,
    pub offset: u64,
    pub size: u64,
    pub global: bool,
    pub kind: SymbolKind,
}

#[derive(Clone, Debug)]
pub struct ObjectModel {
    pub format: ObjFormat,
    pub sections: Vec<Section>,
    pub symbols: Vec<SymbolDef>,
}

impl ObjectModel {
    pub fn new(format: ObjFormat) -> Self {
        Self {
            format,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolDef> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Sort sections into the canonical emission order; stable within a
    /// kind so the driver's insertion order breaks ties.
    fn ordered_sections(&self) -> Vec<&Section> {
        let mut ordered: Vec<&Section> = self.sections.iter().collect();
        ordered.sort_by_key(|s| s.kind);
        ordered
    }

    /// Every symbol name referenced by a relocation but not defined and
    /// not a section: these become undefined entries in the symbol table.
    fn undefined_names(&self) -> Vec<String> {
        let defined: HashMap<&str, ()> = self
            .symbols
            .iter()
            .map(|s| (s.name.as_str(), ()))
            .collect();
        let sections: HashMap<&str, ()> = self
            .sections
            .iter()
            .map(|s| (s.name.as_str(), ()))
            .collect();
        let mut seen = HashMap::new();
        let mut undefined = Vec::new();
        for section in &self.sections {
            for reloc in &section.relocs {
                let name = reloc.symbol.as_str();
                if !defined.contains_key(name)
                    && !sections.contains_key(name)
                    && seen.insert(name.to_string(), ()).is_none()
                {
                    undefined.push(name.to_string());
                }
            }
        }
        undefined
    }

    pub fn write(&self) -> Vec<u8> {
        match self.format {
            ObjFormat::Elf => write_elf(self),
            ObjFormat::Coff => write_coff(self),
        }
    }
}

// ===== ELF =====

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

const R_X86_64_64: u32 = 1;
const R_X86_64_PC32: u32 = 2;
const R_X86_64_PLT32: u32 = 4;

fn elf_flags(kind: SectionKind) -> u64 {
    match kind {
        SectionKind::Text => SHF_ALLOC | SHF_EXECINSTR,
        SectionKind::ROData | SectionKind::GccExceptTable | SectionKind::EhFrame => {
            SHF_ALLOC
        }
        SectionKind::Data
        | SectionKind::DataRelRo
        | SectionKind::Bss
        | SectionKind::DwRef => SHF_ALLOC | SHF_WRITE,
        // COFF-only kinds never reach the ELF writer
        SectionKind::Pdata | SectionKind::Xdata | SectionKind::Drectve => 0,
    }
}

fn elf_reloc_type(kind: RelocKind) -> u32 {
    match kind {
        RelocKind::Abs64 => R_X86_64_64,
        RelocKind::Pc32 => R_X86_64_PC32,
        RelocKind::Plt32 => R_X86_64_PLT32,
        // RVA relocations only exist in COFF unwind data
        RelocKind::Rva32 => R_X86_64_PC32,
    }
}

struct StrTab {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StrTab {
    fn new() -> Self {
        Self {
            bytes: vec![0],
            offsets: HashMap::new(),
        }
    }

    fn add(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        // Names are always NUL-terminated in the table, whatever the
        // lifetime of the source string.
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }
}

fn write_elf(model: &ObjectModel) -> Vec<u8> {
    let ordered = model.ordered_sections();

    // Symbol table layout: null, section symbols, local symbols, globals
    let mut strtab = StrTab::new();
    let mut symtab: Vec<[u8; 24]> = vec![[0; 24]];
    let mut sym_index: HashMap<String, u32> = HashMap::new();

    // Section header indices: 0 null, then data sections in order, then
    // rela sections, then symtab/strtab/shstrtab.
    let mut section_indices: HashMap<&str, u16> = HashMap::new();
    for (i, section) in ordered.iter().enumerate() {
        section_indices.insert(section.name.as_str(), (i + 1) as u16);
    }

    let elf_sym = |name: u32, info: u8, shndx: u16, value: u64, size: u64| {
        let mut entry = [0u8; 24];
        entry[0..4].copy_from_slice(&name.to_le_bytes());
        entry[4] = info;
        entry[5] = 0; // st_other
        entry[6..8].copy_from_slice(&shndx.to_le_bytes());
        entry[8..16].copy_from_slice(&value.to_le_bytes());
        entry[16..24].copy_from_slice(&size.to_le_bytes());
        entry
    };

    // Section symbols (STT_SECTION, local)
    for section in &ordered {
        let index = symtab.len() as u32;
        let shndx = section_indices[section.name.as_str()];
        symtab.push(elf_sym(0, 3, shndx, 0, 0)); // STB_LOCAL | STT_SECTION
        sym_index.insert(section.name.clone(), index);
    }
    // Local defined symbols
    for symbol in model.symbols.iter().filter(|s| !s.global) {
        let index = symtab.len() as u32;
        let name = strtab.add(&symbol.name);
        let shndx = symbol
            .section
            .as_deref()
            .and_then(|s| section_indices.get(s).copied())
            .unwrap_or(0);
        let st_type = match symbol.kind {
            SymbolKind::Function => 2,
            SymbolKind::Object => 1,
            SymbolKind::None => 0,
        };
        symtab.push(elf_sym(name, st_type, shndx, symbol.offset, symbol.size));
        sym_index.insert(symbol.name.clone(), index);
    }
    let first_global = symtab.len() as u32;
    // Global defined symbols
    for symbol in model.symbols.iter().filter(|s| s.global) {
        let index = symtab.len() as u32;
        let name = strtab.add(&symbol.name);
        let shndx = symbol
            .section
            .as_deref()
            .and_then(|s| section_indices.get(s).copied())
            .unwrap_or(0);
        let st_type = match symbol.kind {
            SymbolKind::Function => 2,
            SymbolKind::Object => 1,
            SymbolKind::None => 0,
        };
        symtab.push(elf_sym(
            name,
            0x10 | st_type, // STB_GLOBAL
            shndx,
            symbol.offset,
            symbol.size,
        ));
        sym_index.insert(symbol.name.clone(), index);
    }
    // Undefined symbols
    for name in model.undefined_names() {
        let index = symtab.len() as u32;
        let name_off = strtab.add(&name);
        symtab.push(elf_sym(name_off, 0x10, 0, 0, 0));
        sym_index.insert(name, index);
    }

    // Build rela payloads
    let mut rela_sections: Vec<(String, u16, Vec<u8>)> = Vec::new();
    for section in &ordered {
        if section.relocs.is_empty() {
            continue;
        }
        let mut payload = Vec::new();
        for reloc in &section.relocs {
            let sym = sym_index
                .get(&reloc.symbol)
                .copied()
                .expect("relocation target registered in symbol table");
            payload.extend_from_slice(&reloc.offset.to_le_bytes());
            let info =
                ((sym as u64) << 32) | elf_reloc_type(reloc.kind) as u64;
            payload.extend_from_slice(&info.to_le_bytes());
            payload.extend_from_slice(&reloc.addend.to_le_bytes());
        }
        rela_sections.push((
            format!(".rela{}", section.name),
            section_indices[section.name.as_str()],
            payload,
        ));
    }

    // Section header string table
    let mut shstrtab = StrTab::new();
    let mut headers: Vec<[u8; 64]> = Vec::new();
    headers.push([0; 64]); // null section

    let mut out = Vec::new();
    // ELF header placeholder; patched at the end
    out.resize(64, 0);

    let elf_header_len = out.len();
    let mut body = Vec::new();
    let mut section_offsets: Vec<(u64, u64)> = Vec::new(); // (offset, size)
    for section in &ordered {
        while (elf_header_len + body.len()) % section.align.max(1) as usize != 0 {
            body.push(0);
        }
        let offset = (elf_header_len + body.len()) as u64;
        if section.kind == SectionKind::Bss {
            section_offsets.push((offset, section.bss_size));
        } else {
            body.extend_from_slice(&section.bytes);
            section_offsets.push((offset, section.bytes.len() as u64));
        }
    }
    let mut extra_offsets: Vec<(u64, u64)> = Vec::new();
    for (_, _, payload) in &rela_sections {
        while (elf_header_len + body.len()) % 8 != 0 {
            body.push(0);
        }
        let offset = (elf_header_len + body.len()) as u64;
        body.extend_from_slice(payload);
        extra_offsets.push((offset, payload.len() as u64));
    }
    // symtab
    while (elf_header_len + body.len()) % 8 != 0 {
        body.push(0);
    }
    let symtab_offset = (elf_header_len + body.len()) as u64;
    for entry in &symtab {
        body.extend_from_slice(entry);
    }
    let symtab_size = (symtab.len() * 24) as u64;
    // strtab
    let strtab_offset = (elf_header_len + body.len()) as u64;
    body.extend_from_slice(&strtab.bytes);
    let strtab_size = strtab.bytes.len() as u64;

    // Section headers
    let make_header = |name: u32,
                       sh_type: u32,
                       flags: u64,
                       offset: u64,
                       size: u64,
                       link: u32,
                       info: u32,
                       align: u64,
                       entsize: u64| {
        let mut h = [0u8; 64];
        h[0..4].copy_from_slice(&name.to_le_bytes());
        h[4..8].copy_from_slice(&sh_type.to_le_bytes());
        h[8..16].copy_from_slice(&flags.to_le_bytes());
        // sh_addr stays 0 in relocatable files
        h[24..32].copy_from_slice(&offset.to_le_bytes());
        h[32..40].copy_from_slice(&size.to_le_bytes());
        h[40..44].copy_from_slice(&link.to_le_bytes());
        h[44..48].copy_from_slice(&info.to_le_bytes());
        h[48..56].copy_from_slice(&align.to_le_bytes());
        h[56..64].copy_from_slice(&entsize.to_le_bytes());
        h
    };

    let symtab_shndx = (1 + ordered.len() + rela_sections.len()) as u32;
    let strtab_shndx = symtab_shndx + 1;

    for (i, section) in ordered.iter().enumerate() {
        let name = shstrtab.add(&section.name);
        let (offset, size) = section_offsets[i];
        let sh_type = if section.kind == SectionKind::Bss {
            SHT_NOBITS
        } else {
            SHT_PROGBITS
        };
        headers.push(make_header(
            name,
            sh_type,
            elf_flags(section.kind),
            offset,
            size,
            0,
            0,
            section.align.max(1),
            0,
        ));
    }
    for (i, (name, target, _)) in rela_sections.iter().enumerate() {
        let name = shstrtab.add(name);
        let (offset, size) = extra_offsets[i];
        headers.push(make_header(
            name,
            SHT_RELA,
            0,
            offset,
            size,
            symtab_shndx,
            *target as u32,
            8,
            24,
        ));
    }
    let symtab_name = shstrtab.add(".symtab");
    headers.push(make_header(
        symtab_name,
        SHT_SYMTAB,
        0,
        symtab_offset,
        symtab_size,
        strtab_shndx,
        first_global,
        8,
        24,
    ));
    let strtab_name = shstrtab.add(".strtab");
    headers.push(make_header(
        strtab_name,
        SHT_STRTAB,
        0,
        strtab_offset,
        strtab_size,
        0,
        0,
        1,
        0,
    ));
    let shstrtab_name = shstrtab.add(".shstrtab");
    let shstrtab_offset = (elf_header_len + body.len()) as u64;
    body.extend_from_slice(&shstrtab.bytes);
    headers.push(make_header(
        shstrtab_name,
        SHT_STRTAB,
        0,
        shstrtab_offset,
        shstrtab.bytes.len() as u64,
        0,
        0,
        1,
        0,
    ));

    while (elf_header_len + body.len()) % 8 != 0 {
        body.push(0);
    }
    let shoff = (elf_header_len + body.len()) as u64;
    for header in &headers {
        body.extend_from_slice(header);
    }

    out.extend_from_slice(&body);

    // ELF header
    out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    out[4] = 2; // 64-bit
    out[5] = 1; // little-endian
    out[6] = 1; // version
    // e_type = ET_REL
    out[16..18].copy_from_slice(&1u16.to_le_bytes());
    // e_machine = EM_X86_64
    out[18..20].copy_from_slice(&62u16.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[40..48].copy_from_slice(&shoff.to_le_bytes());
    // e_ehsize, e_shentsize, e_shnum, e_shstrndx
    out[52..54].copy_from_slice(&64u16.to_le_bytes());
    out[58..60].copy_from_slice(&64u16.to_le_bytes());
    out[60..62].copy_from_slice(&(headers.len() as u16).to_le_bytes());
    out[62..64]
        .copy_from_slice(&((headers.len() - 1) as u16).to_le_bytes());
    out
}

// ===== COFF =====

const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const IMAGE_REL_AMD64_ADDR64: u16 = 0x0001;
const IMAGE_REL_AMD64_ADDR32NB: u16 = 0x0003;
const IMAGE_REL_AMD64_REL32: u16 = 0x0004;

fn coff_reloc_type(kind: RelocKind) -> u16 {
    match kind {
        RelocKind::Abs64 => IMAGE_REL_AMD64_ADDR64,
        RelocKind::Pc32 | RelocKind::Plt32 => IMAGE_REL_AMD64_REL32,
        RelocKind::Rva32 => IMAGE_REL_AMD64_ADDR32NB,
    }
}

fn coff_characteristics(kind: SectionKind) -> u32 {
    const CNT_CODE: u32 = 0x20;
    const CNT_INIT: u32 = 0x40;
    const CNT_UNINIT: u32 = 0x80;
    const LNK_INFO: u32 = 0x200;
    const MEM_EXECUTE: u32 = 0x2000_0000;
    const MEM_READ: u32 = 0x4000_0000;
    const MEM_WRITE: u32 = 0x8000_0000;
    match kind {
        SectionKind::Text => CNT_CODE | MEM_EXECUTE | MEM_READ,
        SectionKind::ROData
        | SectionKind::DataRelRo
        | SectionKind::Pdata
        | SectionKind::Xdata
        | SectionKind::EhFrame
        | SectionKind::GccExceptTable => CNT_INIT | MEM_READ,
        SectionKind::Data | SectionKind::DwRef => {
            CNT_INIT | MEM_READ | MEM_WRITE
        }
        SectionKind::Bss => CNT_UNINIT | MEM_READ | MEM_WRITE,
        SectionKind::Drectve => LNK_INFO,
    }
}

fn write_coff(model: &ObjectModel) -> Vec<u8> {
    let ordered = model.ordered_sections();
    let nsections = ordered.len() as u16;

    let mut strtab: Vec<u8> = Vec::new(); // size prefix added at the end
    let mut long_name = |name: &str, strtab: &mut Vec<u8>| -> [u8; 8] {
        let mut field = [0u8; 8];
        if name.len() <= 8 {
            field[..name.len()].copy_from_slice(name.as_bytes());
        } else {
            let offset = strtab.len() + 4;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            let text = format!("/{}", offset);
            field[..text.len()].copy_from_slice(text.as_bytes());
        }
        field
    };

    // Symbol table: section symbols first, then defined, then undefined
    let mut symbols: Vec<[u8; 18]> = Vec::new();
    let mut sym_index: HashMap<String, u32> = HashMap::new();
    let mut section_number: HashMap<&str, i16> = HashMap::new();
    for (i, section) in ordered.iter().enumerate() {
        section_number.insert(section.name.as_str(), (i + 1) as i16);
    }

    let make_symbol = |name_field: [u8; 8],
                       value: u32,
                       section: i16,
                       storage_class: u8,
                       is_function: bool| {
        let mut s = [0u8; 18];
        s[0..8].copy_from_slice(&name_field);
        s[8..12].copy_from_slice(&value.to_le_bytes());
        s[12..14].copy_from_slice(&section.to_le_bytes());
        let sym_type: u16 = if is_function { 0x20 } else { 0 };
        s[14..16].copy_from_slice(&sym_type.to_le_bytes());
        s[16] = storage_class;
        s[17] = 0; // no aux entries
        s
    };

    for section in &ordered {
        let index = symbols.len() as u32;
        let field = long_name(&section.name, &mut strtab);
        symbols.push(make_symbol(
            field,
            0,
            section_number[section.name.as_str()],
            3, // IMAGE_SYM_CLASS_STATIC
            false,
        ));
        sym_index.insert(section.name.clone(), index);
    }
    for symbol in &model.symbols {
        let index = symbols.len() as u32;
        let field = long_name(&symbol.name, &mut strtab);
        let section = symbol
            .section
            .as_deref()
            .and_then(|s| section_number.get(s).copied())
            .unwrap_or(0);
        symbols.push(make_symbol(
            field,
            symbol.offset as u32,
            section,
            if symbol.global { 2 } else { 3 },
            symbol.kind == SymbolKind::Function,
        ));
        sym_index.insert(symbol.name.clone(), index);
    }
    for name in model.undefined_names() {
        let index = symbols.len() as u32;
        let field = long_name(&name, &mut strtab);
        symbols.push(make_symbol(field, 0, 0, 2, false));
        sym_index.insert(name, index);
    }

    // Layout: header, section headers, raw data + relocs, symbols,
    // string table.
    let header_len = 20usize;
    let section_headers_len = 40 * ordered.len();
    let mut raw_offset = header_len + section_headers_len;
    let mut raw_layout: Vec<(u32, u32, u32, u16)> = Vec::new(); // (data off, size, reloc off, nrelocs)
    let mut raw = Vec::new();
    for section in &ordered {
        // Patch COFF's implicit addends into the data
        let mut bytes = section.bytes.clone();
        for reloc in &section.relocs {
            let at = reloc.offset as usize;
            match reloc.kind {
                RelocKind::Abs64 => {
                    if at + 8 <= bytes.len() {
                        bytes[at..at + 8]
                            .copy_from_slice(&reloc.addend.to_le_bytes());
                    }
                }
                RelocKind::Pc32 | RelocKind::Plt32 => {
                    // REL32 subtracts P+4 itself; our addends are
                    // relative to the field, so fold the difference in.
                    if at + 4 <= bytes.len() {
                        let inline = (reloc.addend + 4) as i32;
                        bytes[at..at + 4]
                            .copy_from_slice(&inline.to_le_bytes());
                    }
                }
                RelocKind::Rva32 => {
                    if at + 4 <= bytes.len() {
                        bytes[at..at + 4].copy_from_slice(
                            &(reloc.addend as i32).to_le_bytes(),
                        );
                    }
                }
            }
        }
        let data_offset = if section.kind == SectionKind::Bss {
            0
        } else {
            raw_offset as u32
        };
        let size = if section.kind == SectionKind::Bss {
            section.bss_size as u32
        } else {
            bytes.len() as u32
        };
        if section.kind != SectionKind::Bss {
            raw.extend_from_slice(&bytes);
            raw_offset += bytes.len();
        }
        let reloc_offset = raw_offset as u32;
        let mut nrelocs = 0u16;
        for reloc in &section.relocs {
            let sym = sym_index
                .get(&reloc.symbol)
                .copied()
                .expect("relocation target registered in symbol table");
            raw.extend_from_slice(&(reloc.offset as u32).to_le_bytes());
            raw.extend_from_slice(&sym.to_le_bytes());
            raw.extend_from_slice(&coff_reloc_type(reloc.kind).to_le_bytes());
            raw_offset += 10;
            nrelocs += 1;
        }
        raw_layout.push((
            data_offset,
            size,
            if nrelocs > 0 { reloc_offset } else { 0 },
            nrelocs,
        ));
    }
    let symtab_offset = raw_offset as u32;

    let mut out = Vec::new();
    out.extend_from_slice(&IMAGE_FILE_MACHINE_AMD64.to_le_bytes());
    out.extend_from_slice(&nsections.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
    out.extend_from_slice(&symtab_offset.to_le_bytes());
    out.extend_from_slice(&(symbols.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // optional header size
    out.extend_from_slice(&0u16.to_le_bytes()); // characteristics

    for (i, section) in ordered.iter().enumerate() {
        let field = {
            // Section names reuse the string-table path for long names
            let mut field = [0u8; 8];
            let name = &section.name;
            if name.len() <= 8 {
                field[..name.len()].copy_from_slice(name.as_bytes());
            } else {
                // Already placed in strtab during symbol construction;
                // search for it to keep one copy.
                let offset = strtab
                    .windows(name.len())
                    .position(|w| w == name.as_bytes())
                    .map(|p| p + 4)
                    .unwrap_or_else(|| {
                        let p = strtab.len() + 4;
                        strtab.extend_from_slice(name.as_bytes());
                        strtab.push(0);
                        p
                    });
                let text = format!("/{}", offset);
                field[..text.len()].copy_from_slice(text.as_bytes());
            }
            field
        };
        out.extend_from_slice(&field);
        out.extend_from_slice(&0u32.to_le_bytes()); // virtual size
        out.extend_from_slice(&0u32.to_le_bytes()); // virtual address
        let (data_offset, size, reloc_offset, nrelocs) = raw_layout[i];
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&reloc_offset.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // line numbers
        out.extend_from_slice(&nrelocs.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&coff_characteristics(section.kind).to_le_bytes());
    }

    out.extend_from_slice(&raw);
    for symbol in &symbols {
        out.extend_from_slice(symbol);
    }
    out.extend_from_slice(&((strtab.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&strtab);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model(format: ObjFormat) -> ObjectModel {
        let mut model = ObjectModel::new(format);
        let mut text = Section::new(".text", SectionKind::Text, 16);
        text.bytes = vec![0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3];
        text.relocs.push(Reloc {
            offset: 1,
            symbol: "external_fn".to_string(),
            kind: RelocKind::Pc32,
            addend: -4,
        });
        model.sections.push(text);
        model.symbols.push(SymbolDef {
            name: "main".to_string(),
            section: Some(".text".to_string()),
            offset: 0,
            size: 6,
            global: true,
            kind: SymbolKind::Function,
        });
        model
    }

    #[test]
    fn test_elf_header_magic_and_type() {
        let bytes = tiny_model(ObjFormat::Elf).write();
        assert_eq!(&bytes[0..4], &[0x7f, b'E', b'L', b'F']);
        assert_eq!(bytes[4], 2); // 64-bit
        assert_eq!(bytes[5], 1); // little endian
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1); // ET_REL
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 62); // x86-64
    }

    #[test]
    fn test_elf_contains_sections_and_symbols() {
        let bytes = tiny_model(ObjFormat::Elf).write();
        let as_str = String::from_utf8_lossy(&bytes);
        assert!(as_str.contains(".text"));
        assert!(as_str.contains(".rela.text"));
        assert!(as_str.contains(".symtab"));
        assert!(as_str.contains("main"));
        assert!(as_str.contains("external_fn"));
    }

    #[test]
    fn test_coff_header() {
        let bytes = tiny_model(ObjFormat::Coff).write();
        assert_eq!(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            IMAGE_FILE_MACHINE_AMD64
        );
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 1); // one section
    }

    #[test]
    fn test_coff_rel32_inline_addend() {
        let bytes = tiny_model(ObjFormat::Coff).write();
        // Section raw data begins after header + one section header
        let data_offset = 20 + 40;
        // The -4 addend folds to 0 inline for REL32
        assert_eq!(
            &bytes[data_offset + 1..data_offset + 5],
            &[0, 0, 0, 0]
        );
    }

    #[test]
    fn test_sections_sorted_canonically() {
        let mut model = ObjectModel::new(ObjFormat::Elf);
        model
            .sections
            .push(Section::new(".data", SectionKind::Data, 8));
        model
            .sections
            .push(Section::new(".text", SectionKind::Text, 16));
        model
            .sections
            .push(Section::new(".rodata", SectionKind::ROData, 8));
        let ordered: Vec<&str> = model
            .ordered_sections()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(ordered, vec![".text", ".rodata", ".data"]);
    }
}

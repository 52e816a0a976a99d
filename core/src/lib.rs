//! Core implementation of the cppc C++ compiler. The main usage of this
//! crate is to compile a single preprocessed translation unit into a
//! relocatable object file, ready for a standard system linker.
//!
//! ```
//! use cppc::{Compiler, Options};
//!
//! let source: String = "
//! int main() {
//!     return 1 + 2 + 3;
//! }
//! ".into();
//!
//! let object_bytes = Compiler::new(source, "demo.cpp".into(), Options::default())
//!     .lex().unwrap()
//!     .parse().unwrap()
//!     .lower().unwrap()
//!     .codegen()
//!     .emit();
//! assert_eq!(&object_bytes[0..4], b"\x7fELF");
//! ```
//!
//! The pipeline is a typed chain: each phase consumes the compiler and
//! returns it re-typed with that phase's output, or a [error::WithSource]
//! bundle of diagnostics. Registries (strings, types, namespaces,
//! symbols, templates, type names) live in a [Context] owned by the
//! compiler and threaded through the phases; everything is append-only
//! and single-threaded.

#![deny(clippy::all)]

pub mod ast;
mod codegen;
mod consteval;
mod consts;
mod eh;
pub mod error;
mod intern;
pub mod ir;
mod lex;
mod lower;
mod mangle;
mod namespace;
pub mod obj;
mod parse;
mod rtti;
mod symbol;
mod template;
pub mod token;
mod types;
mod util;

pub use consts::{MAX_CONSTEXPR_DEPTH, MAX_CONSTEXPR_STEPS};
pub use intern::{StringHandle, StringInterner};
pub use mangle::MangleScheme;
pub use namespace::{NamespaceHandle, NamespaceRegistry, QualifiedIdentifier};
pub use obj::{ObjFormat, ObjectModel};
pub use symbol::SymbolTable;
pub use template::TemplateRegistry;
pub use types::{TypeIndex, TypeRegistry};
pub use util::Span;

use crate::{
    ast::{Ast, TranslationUnit},
    codegen::{Abi, EmittedFunction, FuncEmitter, Reloc, RelocKind, TypeinfoTable},
    error::{CompileError, SourceErrorWrapper, WithSource},
    obj::{Section, SectionKind, SymbolDef, SymbolKind},
    token::Token,
    types::TypeKind,
};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Output object format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Elf,
    Coff,
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elf" => Ok(Target::Elf),
            "coff" => Ok(Target::Coff),
            other => Err(format!(
                "unknown target `{}` (expected elf or coff)",
                other
            )),
        }
    }
}

/// Which compiler's ABI conventions to imitate where they differ. On ELF
/// the mangling is always Itanium; on COFF the default (MSVC) mode uses
/// MSVC mangling while the gcc/clang modes keep Itanium names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatMode {
    Msvc,
    Gcc,
    Clang,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    pub target: Target,
    pub compat: CompatMode,
    /// `-fno-access-control` turns member access checking off.
    pub access_control: bool,
    pub eager_template_instantiation: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: Target::Elf,
            compat: CompatMode::Msvc,
            access_control: true,
            eager_template_instantiation: false,
        }
    }
}

impl Options {
    pub fn scheme(&self) -> MangleScheme {
        match (self.target, self.compat) {
            (Target::Elf, _) => MangleScheme::Itanium,
            (Target::Coff, CompatMode::Msvc) => MangleScheme::Msvc,
            (Target::Coff, _) => MangleScheme::Itanium,
        }
    }

    fn abi(&self) -> Abi {
        match self.target {
            Target::Elf => Abi::SysV,
            Target::Coff => Abi::Win64,
        }
    }

    fn format(&self) -> ObjFormat {
        match self.target {
            Target::Elf => ObjFormat::Elf,
            Target::Coff => ObjFormat::Coff,
        }
    }
}

/// The six registries every phase reads and the parser populates:
/// interned strings, types, namespaces, symbols, templates, and the
/// global type-by-name map. Initialized at compiler construction, torn
/// down with it; never shared across translation units.
#[derive(Debug)]
pub struct Context {
    pub interner: StringInterner,
    pub types: TypeRegistry,
    pub namespaces: NamespaceRegistry,
    pub symbols: SymbolTable,
    pub templates: TemplateRegistry,
    pub type_names: std::collections::HashMap<QualifiedIdentifier, TypeIndex>,
}

impl Context {
    pub fn new() -> Self {
        let mut interner = StringInterner::new();
        let namespaces = NamespaceRegistry::new(&mut interner);
        Self {
            interner,
            types: TypeRegistry::new(),
            namespaces,
            symbols: SymbolTable::new(),
            templates: TemplateRegistry::new(),
            type_names: std::collections::HashMap::new(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> Compiler<T> {
    /// Log the current phase output, if trace logging is enabled. Takes
    /// self and returns it unchanged, so it can sit in the phase chain.
    fn debug(self) -> Self {
        trace!("{:#?}", self.stage);
        self
    }
}

/// Output of the parse phase.
#[derive(Debug)]
pub struct Parsed {
    pub unit: TranslationUnit,
    pub ast: Ast,
}

/// Struct used to compile a translation unit. `T` is the current phase
/// output; it starts empty and is transformed step by step. See the
/// crate-level documentation for the usual call chain.
pub struct Compiler<T> {
    source: String,
    file_name: String,
    options: Options,
    ctx: Context,
    stage: T,
}

impl Compiler<()> {
    pub fn new(source: String, file_name: String, options: Options) -> Self {
        Self {
            source,
            file_name,
            options,
            ctx: Context::new(),
            stage: (),
        }
    }

    /// Run the character-level lexer, producing the token stream the
    /// parser consumes.
    pub fn lex(self) -> Result<Compiler<Vec<Token>>, WithSource<CompileError>> {
        match lex::Lexer::new(&self.source).tokenize() {
            Ok(tokens) => Ok(Compiler {
                stage: tokens,
                source: self.source,
                file_name: self.file_name,
                options: self.options,
                ctx: self.ctx,
            }
            .debug()),
            Err(error) => Err(WithSource::new(
                [error],
                self.source,
                self.file_name,
            )),
        }
    }
}

impl Compiler<Vec<Token>> {
    /// Parse the token stream into the AST, populating every registry.
    pub fn parse(mut self) -> Result<Compiler<Parsed>, WithSource<CompileError>> {
        let parser = parse::Parser::new(
            &self.stage,
            &self.source,
            &mut self.ctx,
            &self.options,
        );
        match parser.parse_translation_unit() {
            Ok((unit, ast)) => {
                debug!("parse complete: {} declarations", unit.decls.len());
                Ok(Compiler {
                    stage: Parsed { unit, ast },
                    source: self.source,
                    file_name: self.file_name,
                    options: self.options,
                    ctx: self.ctx,
                }
                .debug())
            }
            Err(errors) => {
                let wrapped: Vec<_> = errors
                    .into_iter()
                    .map(|(error, span)| {
                        SourceErrorWrapper::new(error, span, &self.source)
                    })
                    .collect();
                Err(WithSource::new(wrapped, self.source, self.file_name))
            }
        }
    }
}

impl Compiler<Parsed> {
    pub fn parsed(&self) -> &Parsed {
        &self.stage
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Lower the AST to the three-address IR, one function at a time.
    pub fn lower(mut self) -> Result<Compiler<LoweredUnit>, WithSource<CompileError>> {
        let scheme = self.options.scheme();
        match lower::lower_unit(
            &mut self.ctx,
            &self.stage.ast,
            &self.stage.unit,
            scheme,
        ) {
            Ok(program) => Ok(Compiler {
                stage: LoweredUnit {
                    program,
                    ast: self.stage.ast,
                },
                source: self.source,
                file_name: self.file_name,
                options: self.options,
                ctx: self.ctx,
            }
            .debug()),
            Err(errors) => {
                let wrapped: Vec<_> = errors
                    .into_iter()
                    .map(|(error, span)| {
                        SourceErrorWrapper::new(error, span, &self.source)
                    })
                    .collect();
                Err(WithSource::new(wrapped, self.source, self.file_name))
            }
        }
    }
}

/// Output of the lowering phase: the IR program plus the AST it still
/// references (vtable emission resolves method bodies through it).
#[derive(Debug)]
pub struct LoweredUnit {
    pub program: ir::Program,
    pub ast: Ast,
}

impl Compiler<LoweredUnit> {
    pub fn program(&self) -> &ir::Program {
        &self.stage.program
    }

    /// Emit machine code and assemble the object model. Internal
    /// invariant violations panic; user errors were all caught earlier.
    pub fn codegen(self) -> Compiler<ObjectModel> {
        let model = build_object(
            &self.stage.program,
            &self.ctx,
            &self.stage.ast,
            &self.options,
        );
        info!(
            "codegen complete: {} sections, {} symbols",
            model.sections.len(),
            model.symbols.len()
        );
        Compiler {
            stage: model,
            source: self.source,
            file_name: self.file_name,
            options: self.options,
            ctx: self.ctx,
        }
        .debug()
    }
}

impl Compiler<ObjectModel> {
    pub fn object(&self) -> &ObjectModel {
        &self.stage
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Serialize the object model into its final on-disk bytes.
    pub fn emit(&self) -> Vec<u8> {
        self.stage.write()
    }
}

/// Compile a source string all the way to object-file bytes.
pub fn compile_to_object(
    source: String,
    file_name: String,
    options: Options,
) -> Result<Vec<u8>, WithSource<CompileError>> {
    Ok(Compiler::new(source, file_name, options)
        .lex()?
        .parse()?
        .lower()?
        .codegen()
        .emit())
}

/// Compile to the object model, for callers that want to inspect
/// sections and symbols instead of bytes.
pub fn compile_to_model(
    source: String,
    file_name: String,
    options: Options,
) -> Result<Compiler<ObjectModel>, WithSource<CompileError>> {
    Ok(Compiler::new(source, file_name, options)
        .lex()?
        .parse()?
        .lower()?
        .codegen())
}

// ===== Driver glue: object assembly =====

fn typeinfo_symbol_for(
    ctx: &Context,
    index: TypeIndex,
    scheme: MangleScheme,
) -> String {
    match ctx.types.get(index).kind {
        TypeKind::Struct(id) => mangle::typeinfo_symbol(ctx, id, scheme),
        _ => mangle::typeinfo_symbol_for_type(ctx, index, scheme),
    }
}

fn build_object(
    program: &ir::Program,
    ctx: &Context,
    ast: &Ast,
    options: &Options,
) -> ObjectModel {
    let scheme = options.scheme();
    let abi = options.abi();
    let mut model = ObjectModel::new(options.format());

    // Resolve every type-info reference once, up front
    let mut typeinfo = TypeinfoTable::default();
    for &index in &program.referenced_typeinfo {
        typeinfo
            .symbols
            .insert(index, typeinfo_symbol_for(ctx, index, scheme));
        typeinfo.sizes.insert(index, ctx.types.size_of(index));
    }

    // .text plus per-function EH info
    let mut text = Section::new(".text", SectionKind::Text, 16);
    let mut lsda = Section::new(
        ".gcc_except_table",
        SectionKind::GccExceptTable,
        4,
    );
    let mut eh_functions: Vec<eh::EhFunction> = Vec::new();
    let mut dw_ref_cells: BTreeSet<String> = BTreeSet::new();

    for function in &program.functions {
        while text.bytes.len() % 16 != 0 {
            text.bytes.push(0x90); // nop padding
        }
        let start = text.bytes.len() as u64;
        let emitted: EmittedFunction =
            FuncEmitter::new(function, &ctx.interner, &typeinfo, abi, scheme)
                .emit();
        for reloc in &emitted.relocs {
            text.relocs.push(Reloc {
                offset: start + reloc.offset,
                ..reloc.clone()
            });
        }
        let code_len = emitted.bytes.len() as u64;
        text.bytes.extend_from_slice(&emitted.bytes);
        let local = function.mangled.starts_with("__lambda");
        model.symbols.push(SymbolDef {
            name: emitted.mangled.clone(),
            section: Some(".text".to_string()),
            offset: start,
            size: code_len,
            global: !local,
            kind: SymbolKind::Function,
        });

        // LSDA for functions with try regions
        let lsda_offset = match eh::build_lsda(&emitted.eh) {
            Some(built) => {
                while lsda.bytes.len() % 4 != 0 {
                    lsda.bytes.push(0);
                }
                let at = lsda.bytes.len() as u64;
                for (offset, cell) in &built.relocs {
                    dw_ref_cells.insert(
                        cell.trim_start_matches("DW.ref.").to_string(),
                    );
                    lsda.relocs.push(Reloc {
                        offset: at + offset,
                        symbol: cell.clone(),
                        kind: RelocKind::Pc32,
                        addend: 0,
                    });
                }
                lsda.bytes.extend_from_slice(&built.bytes);
                Some(at)
            }
            None => None,
        };
        eh_functions.push(eh::EhFunction {
            symbol: emitted.mangled,
            text_offset: start,
            info: emitted.eh,
            lsda_offset,
        });
    }
    model.sections.push(text);

    // .rodata: the string-literal pool
    if !program.strings.is_empty() {
        let mut rodata = Section::new(".rodata", SectionKind::ROData, 8);
        for (index, string) in program.strings.iter().enumerate() {
            let offset = rodata.bytes.len() as u64;
            rodata.bytes.extend_from_slice(string);
            model.symbols.push(SymbolDef {
                name: codegen::string_symbol(index as u32),
                section: Some(".rodata".to_string()),
                offset,
                size: string.len() as u64,
                global: false,
                kind: SymbolKind::Object,
            });
        }
        model.sections.push(rodata);
    }

    // Globals: initialized data and .bss
    let mut data = Section::new(".data", SectionKind::Data, 8);
    let mut bss = Section::new(".bss", SectionKind::Bss, 8);
    for global in &program.globals {
        match &global.init {
            Some(bytes) => {
                while (data.bytes.len() as u64) % global.align.max(1) != 0 {
                    data.bytes.push(0);
                }
                let offset = data.bytes.len() as u64;
                data.bytes.extend_from_slice(bytes);
                model.symbols.push(SymbolDef {
                    name: global.mangled.clone(),
                    section: Some(".data".to_string()),
                    offset,
                    size: global.size,
                    global: true,
                    kind: SymbolKind::Object,
                });
            }
            None => {
                let offset =
                    (bss.bss_size + global.align.max(1) - 1)
                        / global.align.max(1)
                        * global.align.max(1);
                bss.bss_size = offset + global.size;
                model.symbols.push(SymbolDef {
                    name: global.mangled.clone(),
                    section: Some(".bss".to_string()),
                    offset,
                    size: global.size,
                    global: true,
                    kind: SymbolKind::Object,
                });
            }
        }
    }
    if !data.bytes.is_empty() {
        model.sections.push(data);
    }
    if bss.bss_size > 0 {
        model.sections.push(bss);
    }

    // Vtables and RTTI, one section per artifact
    for artifact in rtti::build_rtti(ctx, ast, program, scheme) {
        let (kind, prefix) = match artifact.section {
            rtti::RttiSection::ROData => (SectionKind::ROData, ".rodata."),
            rtti::RttiSection::DataRelRo => {
                (SectionKind::DataRelRo, ".data.rel.ro.")
            }
        };
        let section_name = format!("{}{}", prefix, artifact.symbol);
        let mut section = Section::new(&section_name, kind, artifact.align);
        section.bytes = artifact.bytes;
        section.relocs = artifact.relocs;
        model.symbols.push(SymbolDef {
            name: artifact.symbol,
            section: Some(section_name),
            offset: 0,
            size: section.bytes.len() as u64,
            global: true,
            kind: SymbolKind::Object,
        });
        model.sections.push(section);
    }

    // Exception metadata
    let has_eh = eh_functions.iter().any(|f| f.lsda_offset.is_some());
    match options.target {
        Target::Elf => {
            if has_eh {
                model.sections.push(lsda);
                dw_ref_cells.insert("__gxx_personality_v0".to_string());
            }
            let (bytes, relocs) =
                eh::build_eh_frame(&eh_functions, "__gxx_personality_v0");
            let mut eh_frame =
                Section::new(".eh_frame", SectionKind::EhFrame, 8);
            eh_frame.bytes = bytes;
            eh_frame.relocs = relocs;
            model.sections.push(eh_frame);
            // Indirection cells: 8-byte pointers the 0x9b encodings read
            // through. Each lives in its own writable section.
            for target in &dw_ref_cells {
                let cell_symbol = format!("DW.ref.{}", target);
                let section_name = format!(".data.{}", cell_symbol);
                let mut section =
                    Section::new(&section_name, SectionKind::DwRef, 8);
                section.bytes = vec![0; 8];
                section.relocs.push(Reloc {
                    offset: 0,
                    symbol: target.clone(),
                    kind: RelocKind::Abs64,
                    addend: 0,
                });
                model.symbols.push(SymbolDef {
                    name: cell_symbol,
                    section: Some(section_name),
                    offset: 0,
                    size: 8,
                    global: true,
                    kind: SymbolKind::Object,
                });
                model.sections.push(section);
            }
        }
        Target::Coff => {
            let unwind = eh::build_coff_unwind(&eh_functions);
            let mut pdata = Section::new(".pdata", SectionKind::Pdata, 4);
            pdata.bytes = unwind.pdata;
            pdata.relocs = unwind.pdata_relocs;
            let mut xdata = Section::new(".xdata", SectionKind::Xdata, 4);
            xdata.bytes = unwind.xdata;
            xdata.relocs = unwind.xdata_relocs;
            model.sections.push(pdata);
            model.sections.push(xdata);
            let mut drectve =
                Section::new(".drectve", SectionKind::Drectve, 1);
            drectve.bytes = b" /DEFAULTLIB:\"libcmt\"".to_vec();
            model.sections.push(drectve);
        }
    }

    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_selection() {
        let mut options = Options::default();
        assert_eq!(options.scheme(), MangleScheme::Itanium);
        options.target = Target::Coff;
        assert_eq!(options.scheme(), MangleScheme::Msvc);
        options.compat = CompatMode::Gcc;
        assert_eq!(options.scheme(), MangleScheme::Itanium);
    }

    #[test]
    fn test_context_initializes_registries() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        assert_eq!(ctx.types.get(int_ty).size_bits, 32);
        assert_eq!(
            ctx.namespaces.depth(NamespaceHandle::GLOBAL),
            0
        );
    }
}

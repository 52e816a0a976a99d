//! Name mangling: Itanium (ELF, gcc/clang compatibility) and MSVC (COFF).
//!
//! The mangler works from qualified identifiers and interned signatures;
//! it never re-parses source names. Itanium encodings carry a
//! substitution table so repeated components compress to `S_`/`S0_`...;
//! the MSVC scheme covers the subset of type shapes this compiler can
//! emit. `main` and `extern "C"` functions keep their source names under
//! both schemes.

use crate::{
    ast::FunctionDecl,
    namespace::{NamespaceHandle, QualifiedIdentifier},
    types::{CvQualifiers, StructId, TypeIndex, TypeKind},
    Context,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MangleScheme {
    Itanium,
    Msvc,
}

/// Mangle a function declaration into its linker symbol.
pub fn mangle_function(ctx: &Context, func: &FunctionDecl, scheme: MangleScheme) -> String {
    let name = ctx.interner.view(func.name.name);
    if name == "main"
        || func.specs.linkage == crate::ast::Linkage::C
        || name.starts_with("__lambda")
    {
        // Lambdas get internal linkage under their synthesized name
        return name.replace(['<', '>', ',', ' '], "_");
    }
    match scheme {
        MangleScheme::Itanium => itanium_function(ctx, func),
        MangleScheme::Msvc => msvc_function(ctx, func),
    }
}

/// Mangle a namespace-scope variable. Variables in the global namespace
/// keep their source name under both ABIs.
pub fn mangle_variable(
    ctx: &Context,
    qid: QualifiedIdentifier,
    scheme: MangleScheme,
) -> String {
    if qid.namespace == NamespaceHandle::GLOBAL {
        return ctx.interner.view(qid.name).replace(['<', '>', ',', ' '], "_");
    }
    match scheme {
        MangleScheme::Itanium => {
            let mut subs = Substitutions::default();
            format!("_Z{}", itanium_class_name(ctx, qid, &mut subs))
        }
        MangleScheme::Msvc => format!("?{}@@3HA", msvc_scoped_name(ctx, qid)),
    }
}

/// `_ZTV`/`??_7` symbol of a class's vtable.
pub fn vtable_symbol(ctx: &Context, id: StructId, scheme: MangleScheme) -> String {
    let qid = ctx.types.struct_info(id).name;
    match scheme {
        MangleScheme::Itanium => {
            let mut subs = Substitutions::default();
            format!(
                "_ZTV{}",
                itanium_class_name(ctx, qid, &mut subs)
            )
        }
        MangleScheme::Msvc => {
            format!("??_7{}@@6B@", msvc_scoped_name(ctx, qid))
        }
    }
}

/// `_ZTI` symbol of a class's type_info object.
pub fn typeinfo_symbol(ctx: &Context, id: StructId, scheme: MangleScheme) -> String {
    let qid = ctx.types.struct_info(id).name;
    match scheme {
        MangleScheme::Itanium => {
            let mut subs = Substitutions::default();
            format!("_ZTI{}", itanium_class_name(ctx, qid, &mut subs))
        }
        MangleScheme::Msvc => format!("??_R0{}@@@8", msvc_scoped_name(ctx, qid)),
    }
}

/// `_ZTS` symbol of a class's type-name string.
pub fn typeinfo_name_symbol(ctx: &Context, id: StructId, scheme: MangleScheme) -> String {
    let qid = ctx.types.struct_info(id).name;
    match scheme {
        MangleScheme::Itanium => {
            let mut subs = Substitutions::default();
            format!("_ZTS{}", itanium_class_name(ctx, qid, &mut subs))
        }
        MangleScheme::Msvc => format!("??_R1{}@@@8", msvc_scoped_name(ctx, qid)),
    }
}

/// The `type_info` symbol for an arbitrary type, as referenced by
/// `throw`/`catch` metadata (e.g. `_ZTIi` for `int`).
pub fn typeinfo_symbol_for_type(
    ctx: &Context,
    index: TypeIndex,
    scheme: MangleScheme,
) -> String {
    match scheme {
        MangleScheme::Itanium => {
            let mut subs = Substitutions::default();
            let mut out = String::from("_ZTI");
            itanium_type(ctx, index, &mut out, &mut subs);
            out
        }
        MangleScheme::Msvc => {
            let mut code = String::new();
            msvc_type(ctx, index, &mut code);
            format!("??_R0{}@8", code)
        }
    }
}

/// The bare mangled class name (no `_Z` prefix), used inside `_ZTS`
/// payloads.
pub fn class_name_string(ctx: &Context, id: StructId) -> String {
    let qid = ctx.types.struct_info(id).name;
    let mut subs = Substitutions::default();
    itanium_class_name(ctx, qid, &mut subs)
}

// ===== Itanium =====

#[derive(Default)]
struct Substitutions {
    seen: Vec<String>,
}

impl Substitutions {
    /// If `encoding` was produced before, return its `S_`-form.
    fn get(&self, encoding: &str) -> Option<String> {
        let pos = self.seen.iter().position(|s| s == encoding)?;
        Some(if pos == 0 {
            "S_".to_string()
        } else {
            // Base-36, per the ABI's seq-id encoding
            format!("S{}_", to_seq_id(pos - 1))
        })
    }

    fn record(&mut self, encoding: String) {
        if !self.seen.contains(&encoding) {
            self.seen.push(encoding);
        }
    }
}

fn to_seq_id(mut n: usize) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[n % 36]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).expect("seq id digits are ASCII")
}

fn source_name(out: &mut String, name: &str) {
    out.push_str(&name.len().to_string());
    out.push_str(name);
}

/// Encode one scope segment, expanding `Name<args>` instantiation names
/// into `NameI..E` form using the registered type's metadata.
fn itanium_segment(
    ctx: &Context,
    scope_qid: QualifiedIdentifier,
    out: &mut String,
    subs: &mut Substitutions,
) {
    let raw = ctx.interner.view(scope_qid.name);
    if let Some(base) = raw.split('<').next() {
        if raw.contains('<') {
            // Instantiation: recover the argument types from the type
            // registered under this name.
            if let Some(&index) = ctx.type_names.get(&scope_qid) {
                if let Some(info) = &ctx.types.get(index).instantiation {
                    source_name(out, ctx.interner.view(info.base_template.name));
                    template_args(
                        ctx,
                        &info.type_args,
                        &info.non_type_args,
                        out,
                        subs,
                    );
                    return;
                }
            }
            source_name(out, base);
            return;
        }
    }
    source_name(out, raw);
}

fn template_args(
    ctx: &Context,
    type_args: &[TypeIndex],
    non_type_args: &[i64],
    out: &mut String,
    subs: &mut Substitutions,
) {
    out.push('I');
    for &arg in type_args {
        itanium_type(ctx, arg, out, subs);
    }
    for &value in non_type_args {
        out.push_str("Lx");
        if value < 0 {
            out.push('n');
            out.push_str(&(-(value as i128)).to_string());
        } else {
            out.push_str(&value.to_string());
        }
        out.push('E');
    }
    out.push('E');
}

/// The `<name>` production for a class: plain or nested, with
/// instantiation expansion.
fn itanium_class_name(
    ctx: &Context,
    qid: QualifiedIdentifier,
    subs: &mut Substitutions,
) -> String {
    let mut out = String::new();
    let path = ctx.namespaces.path_from_root(qid.namespace);
    if path.is_empty() {
        itanium_segment(ctx, qid, &mut out, subs);
    } else {
        out.push('N');
        for &ns in &path {
            let parent = ctx
                .namespaces
                .parent(ns)
                .unwrap_or(NamespaceHandle::GLOBAL);
            let seg_qid = QualifiedIdentifier::new(
                parent,
                ctx.namespaces.local_name(ns),
            );
            itanium_segment(ctx, seg_qid, &mut out, subs);
        }
        itanium_segment(ctx, qid, &mut out, subs);
        out.push('E');
    }
    out
}

fn itanium_function(ctx: &Context, func: &FunctionDecl) -> String {
    let mut out = String::from("_Z");
    let mut subs = Substitutions::default();
    let sig = ctx.types.signature(func.signature).clone();
    let path = ctx.namespaces.path_from_root(func.name.namespace);
    let raw_name = ctx.interner.view(func.name.name).to_string();

    let simple_name = |out: &mut String, subs: &mut Substitutions| {
        if func.is_ctor {
            out.push_str("C1");
        } else if func.is_dtor {
            out.push_str("D1");
        } else if let Some(key) = &func.instantiated_key {
            source_name(out, ctx.interner.view(key.base.name));
            template_args(ctx, &key.type_args, &key.non_type_args, out, subs);
        } else {
            // Instantiated names read `f<int>`; fall back to the base
            // spelling if no key is attached.
            match raw_name.split('<').next() {
                Some(base) if raw_name.contains('<') => source_name(out, base),
                _ => source_name(out, &raw_name),
            }
        }
    };

    if path.is_empty() && !sig.receiver_quals.contains(CvQualifiers::CONST) {
        simple_name(&mut out, &mut subs);
    } else {
        out.push('N');
        if sig.receiver_quals.contains(CvQualifiers::CONST) {
            out.push('K');
        }
        for &ns in &path {
            let parent = ctx
                .namespaces
                .parent(ns)
                .unwrap_or(NamespaceHandle::GLOBAL);
            let seg_qid = QualifiedIdentifier::new(
                parent,
                ctx.namespaces.local_name(ns),
            );
            itanium_segment(ctx, seg_qid, &mut out, &mut subs);
        }
        simple_name(&mut out, &mut subs);
        out.push('E');
    }

    // Template instantiations include the return type before parameters
    if func.instantiated_key.is_some() {
        itanium_type(ctx, sig.ret, &mut out, &mut subs);
    }
    if sig.params.is_empty() {
        out.push('v');
    } else {
        for &param in &sig.params {
            itanium_type(ctx, param, &mut out, &mut subs);
        }
    }
    if sig.variadic {
        out.push('z');
    }
    out
}

fn itanium_type(
    ctx: &Context,
    index: TypeIndex,
    out: &mut String,
    subs: &mut Substitutions,
) {
    let info = ctx.types.get(index);
    let mut encoded = String::new();
    if info.quals.contains(CvQualifiers::VOLATILE) {
        encoded.push('V');
    }
    if info.quals.contains(CvQualifiers::CONST) {
        encoded.push('K');
    }
    match &info.kind {
        TypeKind::Void => encoded.push('v'),
        TypeKind::Bool => encoded.push('b'),
        TypeKind::Int { width, signed } => {
            encoded.push(match (width, signed) {
                (8, true) => 'c',
                (8, false) => 'h',
                (16, true) => 's',
                (16, false) => 't',
                (32, true) => 'i',
                (32, false) => 'j',
                (64, true) => 'x',
                (64, false) => 'y',
                _ => 'i',
            });
        }
        TypeKind::Float => encoded.push('f'),
        TypeKind::Double => encoded.push('d'),
        TypeKind::Pointer { pointee } => {
            encoded.push('P');
            itanium_type(ctx, *pointee, &mut encoded, subs);
        }
        TypeKind::Reference { referent, rvalue } => {
            encoded.push(if *rvalue { 'O' } else { 'R' });
            itanium_type(ctx, *referent, &mut encoded, subs);
        }
        TypeKind::Array { element, length } => {
            encoded.push('A');
            if let Some(length) = length {
                encoded.push_str(&length.to_string());
            }
            encoded.push('_');
            itanium_type(ctx, *element, &mut encoded, subs);
        }
        TypeKind::Struct(id) => {
            let qid = ctx.types.struct_info(*id).name;
            encoded.push_str(&itanium_class_name(ctx, qid, subs));
        }
        TypeKind::Enum(id) => {
            let qid = ctx.types.enum_info(*id).name;
            encoded.push_str(&itanium_class_name(ctx, qid, subs));
        }
        TypeKind::FunctionPtr(sig_id) => {
            let sig = ctx.types.signature(*sig_id).clone();
            encoded.push_str("PF");
            itanium_type(ctx, sig.ret, &mut encoded, subs);
            if sig.params.is_empty() {
                encoded.push('v');
            } else {
                for &param in &sig.params {
                    itanium_type(ctx, param, &mut encoded, subs);
                }
            }
            encoded.push('E');
        }
        TypeKind::TemplateParam { slot } => {
            // Unsubstituted parameters only appear in patterns
            if *slot == 0 {
                encoded.push_str("T_");
            } else {
                encoded.push_str(&format!("T{}_", slot - 1));
            }
        }
    }
    // Compress via the substitution table; builtin one-letter codes are
    // not substitutable per the ABI.
    if encoded.len() > 1 {
        if let Some(sub) = subs.get(&encoded) {
            out.push_str(&sub);
            return;
        }
        subs.record(encoded.clone());
    }
    out.push_str(&encoded);
}

// ===== MSVC =====

fn msvc_scoped_name(ctx: &Context, qid: QualifiedIdentifier) -> String {
    let mut out = String::new();
    out.push_str(&msvc_name_fragment(ctx, qid));
    // Scopes, innermost first
    let mut path = ctx.namespaces.path_from_root(qid.namespace);
    path.reverse();
    for ns in path {
        out.push('@');
        out.push_str(ctx.interner.view(ctx.namespaces.local_name(ns)));
    }
    out
}

fn msvc_name_fragment(ctx: &Context, qid: QualifiedIdentifier) -> String {
    let raw = ctx.interner.view(qid.name);
    // Instantiation names become `?$base@args`
    if let Some(base) = raw.split('<').next() {
        if raw.contains('<') {
            if let Some(&index) = ctx.type_names.get(&qid) {
                if let Some(info) = &ctx.types.get(index).instantiation {
                    let mut out = format!("?${}@", base);
                    for &arg in &info.type_args {
                        msvc_type(ctx, arg, &mut out);
                    }
                    for &value in &info.non_type_args {
                        out.push_str(&format!("$0{}", value));
                    }
                    return out;
                }
            }
            return base.to_string();
        }
    }
    raw.to_string()
}

fn msvc_function(ctx: &Context, func: &FunctionDecl) -> String {
    let sig = ctx.types.signature(func.signature).clone();
    let mut out = String::from("?");
    if func.is_ctor {
        out.push_str("?0");
    } else if func.is_dtor {
        out.push_str("?1");
    } else if let Some(key) = &func.instantiated_key {
        out.push_str("?$");
        out.push_str(ctx.interner.view(key.base.name));
        out.push('@');
        for &arg in &key.type_args {
            msvc_type(ctx, arg, &mut out);
        }
        for &value in &key.non_type_args {
            out.push_str(&format!("$0{}", value));
        }
    } else {
        out.push_str(ctx.interner.view(func.name.name));
    }
    out.push('@');
    let mut path = ctx.namespaces.path_from_root(func.name.namespace);
    path.reverse();
    for ns in path {
        out.push_str(ctx.interner.view(ctx.namespaces.local_name(ns)));
        out.push('@');
    }
    out.push('@');
    // Member functions: public near this-call; free functions: near cdecl
    if func.method_of.is_some() && func.specs.storage != crate::ast::Storage::Static {
        out.push_str("QEAA");
    } else {
        out.push_str("YA");
    }
    if func.is_ctor || func.is_dtor {
        out.push('@');
    } else {
        msvc_type(ctx, sig.ret, &mut out);
    }
    if sig.params.is_empty() {
        out.push('X');
    } else {
        for &param in &sig.params {
            msvc_type(ctx, param, &mut out);
        }
        if sig.variadic {
            out.push('Z');
        } else {
            out.push('@');
        }
    }
    out.push('Z');
    out
}

fn msvc_type(ctx: &Context, index: TypeIndex, out: &mut String) {
    let info = ctx.types.get(index);
    match &info.kind {
        TypeKind::Void => out.push('X'),
        TypeKind::Bool => out.push_str("_N"),
        TypeKind::Int { width, signed } => out.push_str(match (width, signed) {
            (8, true) => "D",
            (8, false) => "E",
            (16, true) => "F",
            (16, false) => "G",
            (32, true) => "H",
            (32, false) => "I",
            (64, true) => "_J",
            (64, false) => "_K",
            _ => "H",
        }),
        TypeKind::Float => out.push('M'),
        TypeKind::Double => out.push('N'),
        TypeKind::Pointer { pointee } => {
            if ctx
                .types
                .get(*pointee)
                .quals
                .contains(CvQualifiers::CONST)
            {
                out.push_str("PEB");
            } else {
                out.push_str("PEA");
            }
            msvc_type(ctx, *pointee, out);
        }
        TypeKind::Reference { referent, .. } => {
            out.push_str("AEA");
            msvc_type(ctx, *referent, out);
        }
        TypeKind::Array { element, .. } => {
            out.push_str("PEA");
            msvc_type(ctx, *element, out);
        }
        TypeKind::Struct(id) => {
            let qid = ctx.types.struct_info(*id).name;
            out.push('U');
            out.push_str(&msvc_scoped_name(ctx, qid));
            out.push_str("@@");
        }
        TypeKind::Enum(id) => {
            let qid = ctx.types.enum_info(*id).name;
            out.push_str("W4");
            out.push_str(&msvc_scoped_name(ctx, qid));
            out.push_str("@@");
        }
        TypeKind::FunctionPtr(_) => out.push_str("P6AXXZ"),
        TypeKind::TemplateParam { .. } => out.push('X'),
    }
}

/// Symbols both writers need from the C++ runtime, named per scheme.
pub fn runtime_symbol(name: RuntimeFn, scheme: MangleScheme) -> &'static str {
    match (name, scheme) {
        (RuntimeFn::New, MangleScheme::Itanium) => "_Znwm",
        (RuntimeFn::NewArray, MangleScheme::Itanium) => "_Znam",
        (RuntimeFn::Delete, MangleScheme::Itanium) => "_ZdlPv",
        (RuntimeFn::DeleteArray, MangleScheme::Itanium) => "_ZdaPv",
        (RuntimeFn::New, MangleScheme::Msvc) => "??2@YAPEAX_K@Z",
        (RuntimeFn::NewArray, MangleScheme::Msvc) => "??_U@YAPEAX_K@Z",
        (RuntimeFn::Delete, MangleScheme::Msvc) => "??3@YAXPEAX@Z",
        (RuntimeFn::DeleteArray, MangleScheme::Msvc) => "??_V@YAXPEAX@Z",
        (RuntimeFn::AllocException, _) => "__cxa_allocate_exception",
        (RuntimeFn::Throw, MangleScheme::Itanium) => "__cxa_throw",
        (RuntimeFn::Throw, MangleScheme::Msvc) => "_CxxThrowException",
        (RuntimeFn::BeginCatch, _) => "__cxa_begin_catch",
        (RuntimeFn::EndCatch, _) => "__cxa_end_catch",
        (RuntimeFn::Resume, _) => "_Unwind_Resume",
        (RuntimeFn::Personality, MangleScheme::Itanium) => "__gxx_personality_v0",
        (RuntimeFn::Personality, MangleScheme::Msvc) => "__CxxFrameHandler3",
        (RuntimeFn::DynamicCast, _) => "__dynamic_cast",
        (RuntimeFn::BadCast, _) => "__cxa_bad_cast",
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuntimeFn {
    New,
    NewArray,
    Delete,
    DeleteArray,
    AllocException,
    Throw,
    BeginCatch,
    EndCatch,
    Resume,
    Personality,
    DynamicCast,
    BadCast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{DeclSpecifiers, FunctionDecl},
        types::FunctionSignature,
        Context,
    };

    fn make_function(
        ctx: &mut Context,
        ns_path: &[&str],
        name: &str,
        params: Vec<TypeIndex>,
        ret: TypeIndex,
    ) -> FunctionDecl {
        let mut ns = NamespaceHandle::GLOBAL;
        for segment in ns_path {
            let handle = ctx.interner.intern(segment);
            ns = ctx.namespaces.get_or_create(ns, handle);
        }
        let name = ctx.interner.intern(name);
        let signature = ctx.types.intern_signature(FunctionSignature {
            params,
            ret,
            variadic: false,
            receiver_quals: CvQualifiers::empty(),
        });
        FunctionDecl {
            name: QualifiedIdentifier::new(ns, name),
            signature,
            params: Vec::new(),
            body: None,
            specs: DeclSpecifiers::default(),
            method_of: None,
            is_virtual: false,
            is_ctor: false,
            is_dtor: false,
            is_deleted: false,
            is_defaulted: false,
            ctor_inits: Vec::new(),
            instantiated_key: None,
        }
    }

    #[test]
    fn test_main_is_not_mangled() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let func = make_function(&mut ctx, &[], "main", vec![], int_ty);
        assert_eq!(mangle_function(&ctx, &func, MangleScheme::Itanium), "main");
        assert_eq!(mangle_function(&ctx, &func, MangleScheme::Msvc), "main");
    }

    #[test]
    fn test_itanium_free_function() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let func =
            make_function(&mut ctx, &[], "add", vec![int_ty, int_ty], int_ty);
        assert_eq!(
            mangle_function(&ctx, &func, MangleScheme::Itanium),
            "_Z3addii"
        );
    }

    #[test]
    fn test_itanium_namespaced_function() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let double_ty = ctx.types.double();
        let func = make_function(
            &mut ctx,
            &["math"],
            "abs",
            vec![double_ty],
            double_ty,
        );
        assert_eq!(
            mangle_function(&ctx, &func, MangleScheme::Itanium),
            "_ZN4math3absEd"
        );
        let _ = int_ty;
    }

    #[test]
    fn test_itanium_no_params_is_void() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let func = make_function(&mut ctx, &[], "get", vec![], int_ty);
        assert_eq!(
            mangle_function(&ctx, &func, MangleScheme::Itanium),
            "_Z3getv"
        );
    }

    #[test]
    fn test_itanium_pointer_substitution() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let ptr = ctx.types.pointer_to(int_ty);
        let func =
            make_function(&mut ctx, &[], "swap", vec![ptr, ptr], int_ty);
        // The second `int*` compresses to S_
        assert_eq!(
            mangle_function(&ctx, &func, MangleScheme::Itanium),
            "_Z4swapPiS_"
        );
    }

    #[test]
    fn test_msvc_free_function() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        let func =
            make_function(&mut ctx, &[], "add", vec![int_ty, int_ty], int_ty);
        assert_eq!(
            mangle_function(&ctx, &func, MangleScheme::Msvc),
            "?add@@YAHHH@Z"
        );
    }

    #[test]
    fn test_builtin_typeinfo_symbols() {
        let mut ctx = Context::new();
        let int_ty = ctx.types.int(32, true);
        assert_eq!(
            typeinfo_symbol_for_type(&ctx, int_ty, MangleScheme::Itanium),
            "_ZTIi"
        );
        let double_ty = ctx.types.double();
        assert_eq!(
            typeinfo_symbol_for_type(&ctx, double_ty, MangleScheme::Itanium),
            "_ZTId"
        );
    }
}

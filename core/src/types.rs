//! The global type registry.
//!
//! Types are stored append-only and addressed by [TypeIndex]; an index
//! handed out once stays valid (and resolves to the same [TypeInfo]) for
//! the whole compilation. Built-in and derived types are interned
//! structurally, so `int*` always maps to one index; user-defined types
//! (structs, enums, template parameters) always get fresh entries.

use crate::{
    ast::DeclId,
    intern::{StringHandle, StringInterner},
    namespace::QualifiedIdentifier,
};
use bitflags::bitflags;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Stable index into the type table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct TypeIndex(u32);

impl TypeIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct StructId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct EnumId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SignatureId(pub u32);

bitflags! {
    /// `const`/`volatile` qualification, applied either inside a stored
    /// type (e.g. a pointee) or at a use site via [TypeSpecifier].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CvQualifiers: u8 {
        const CONST = 1 << 0;
        const VOLATILE = 1 << 1;
    }
}

impl serde::Serialize for CvQualifiers {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.bits())
    }
}

/// A type as referenced from the AST: the registry index plus qualifiers
/// reapplied at the use site.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct TypeSpecifier {
    pub index: TypeIndex,
    pub quals: CvQualifiers,
}

impl TypeSpecifier {
    pub fn plain(index: TypeIndex) -> Self {
        Self {
            index,
            quals: CvQualifiers::empty(),
        }
    }

    pub fn with_const(index: TypeIndex) -> Self {
        Self {
            index,
            quals: CvQualifiers::CONST,
        }
    }
}

/// The base tag of a type. Derived types reference their component by
/// index, never by pointer, so the registry can grow freely.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Bool,
    Int { width: u16, signed: bool },
    Float,
    Double,
    Pointer { pointee: TypeIndex },
    Reference { referent: TypeIndex, rvalue: bool },
    Array { element: TypeIndex, length: Option<u64> },
    Struct(StructId),
    Enum(EnumId),
    FunctionPtr(SignatureId),
    /// Placeholder installed while a template pattern is being parsed;
    /// replaced during substitution.
    TemplateParam { slot: u16 },
}

/// Metadata tying an instantiated class type back to its template, used by
/// the instantiation cache and by diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstantiationInfo {
    pub base_template: QualifiedIdentifier,
    pub type_args: SmallVec<[TypeIndex; 4]>,
    pub non_type_args: SmallVec<[i64; 4]>,
}

#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub size_bits: u64,
    pub align_bits: u32,
    pub quals: CvQualifiers,
    pub instantiation: Option<InstantiationInfo>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Access {
    Public,
    Protected,
    Private,
}

/// One non-static data member. Offsets are in bits so bit-fields fit the
/// same scheme as ordinary members.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: StringHandle,
    pub ty: TypeIndex,
    pub bit_offset: u64,
    pub bit_width: Option<u32>,
    pub access: Access,
}

#[derive(Clone, Debug)]
pub struct StaticMember {
    pub name: StringHandle,
    pub ty: TypeIndex,
    pub decl: DeclId,
}

/// How a member function body is known: already parsed, remembered as a
/// token range for deferred parsing (class templates), or absent.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodBody {
    Parsed(crate::ast::StmtId),
    /// Token indices `[start, end)` into the translation unit's stream.
    Deferred { start: usize, end: usize },
    None,
}

#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub name: StringHandle,
    pub decl: DeclId,
    pub signature: SignatureId,
    pub access: Access,
    pub is_virtual: bool,
    pub is_static: bool,
    pub is_ctor: bool,
    pub is_dtor: bool,
    /// Slot in the vtable, filled in when the layout is computed.
    pub vtable_slot: Option<u32>,
    pub body: MethodBody,
}

#[derive(Clone, Debug)]
pub struct BaseClass {
    pub ty: TypeIndex,
    pub access: Access,
    pub is_virtual: bool,
    /// Byte offset of the base subobject.
    pub offset: u64,
}

/// One 8-byte slot of a class's virtual dispatch table.
#[derive(Clone, Debug)]
pub struct VtableSlot {
    pub name: StringHandle,
    pub signature: SignatureId,
    /// The override that actually fills this slot.
    pub decl: DeclId,
    pub defined_in: StructId,
}

#[derive(Clone, Debug)]
pub struct StructInfo {
    pub name: QualifiedIdentifier,
    pub members: Vec<Member>,
    pub statics: Vec<StaticMember>,
    pub methods: Vec<MethodInfo>,
    pub bases: Vec<BaseClass>,
    pub vtable: Vec<VtableSlot>,
    pub has_vtable: bool,
    pub has_user_destructor: bool,
    pub is_union: bool,
    /// Set once all bases are complete and the layout is computed.
    pub is_complete: bool,
    pub size_bits: u64,
    pub align_bits: u32,
}

impl StructInfo {
    pub fn new(name: QualifiedIdentifier, is_union: bool) -> Self {
        Self {
            name,
            members: Vec::new(),
            statics: Vec::new(),
            methods: Vec::new(),
            bases: Vec::new(),
            vtable: Vec::new(),
            has_vtable: false,
            has_user_destructor: false,
            is_union,
            is_complete: false,
            size_bits: 0,
            align_bits: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnumInfo {
    pub name: QualifiedIdentifier,
    pub underlying: TypeIndex,
    pub scoped: bool,
    pub enumerators: Vec<(StringHandle, i64)>,
}

/// A function type: parameters, return, variadic flag, and (for member
/// functions) the receiver's cv-qualification.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub params: Vec<TypeIndex>,
    pub ret: TypeIndex,
    pub variadic: bool,
    pub receiver_quals: CvQualifiers,
}

/// Structural interning key; only kinds that are deduplicated appear here.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum StructuralKey {
    Kind(TypeKind),
    Qualified(TypeIndex, CvQualifiers),
}

#[derive(Debug)]
pub struct TypeRegistry {
    infos: Vec<TypeInfo>,
    structs: Vec<StructInfo>,
    enums: Vec<EnumInfo>,
    signatures: Vec<FunctionSignature>,
    signature_dedup: HashMap<FunctionSignature, SignatureId>,
    structural: HashMap<StructuralKey, TypeIndex>,
}

pub const POINTER_BITS: u64 = 64;

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            infos: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            signatures: Vec::new(),
            signature_dedup: HashMap::new(),
            structural: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn get(&self, index: TypeIndex) -> &TypeInfo {
        &self.infos[index.index()]
    }

    fn push(&mut self, info: TypeInfo) -> TypeIndex {
        let index = TypeIndex(self.infos.len() as u32);
        self.infos.push(info);
        index
    }

    /// Intern a structurally-identified type: built-ins and types derived
    /// from other indices. Equal kinds share an index.
    pub fn intern_type(&mut self, kind: TypeKind) -> TypeIndex {
        debug_assert!(
            !matches!(
                kind,
                TypeKind::Struct(_) | TypeKind::Enum(_) | TypeKind::TemplateParam { .. }
            ),
            "nominal types are not structurally interned"
        );
        if let Some(&existing) = self.structural.get(&StructuralKey::Kind(kind.clone())) {
            return existing;
        }
        let (size_bits, align_bits) = self.measure(&kind);
        let index = self.push(TypeInfo {
            kind: kind.clone(),
            size_bits,
            align_bits,
            quals: CvQualifiers::empty(),
            instantiation: None,
        });
        self.structural.insert(StructuralKey::Kind(kind), index);
        index
    }

    /// A cv-qualified copy of `base`. Qualified copies are interned so a
    /// `const int` created twice shares an index.
    pub fn qualified(&mut self, base: TypeIndex, quals: CvQualifiers) -> TypeIndex {
        if quals.is_empty() {
            return base;
        }
        let key = StructuralKey::Qualified(base, quals);
        if let Some(&existing) = self.structural.get(&key) {
            return existing;
        }
        let mut info = self.get(base).clone();
        info.quals |= quals;
        let index = self.push(info);
        self.structural.insert(key, index);
        index
    }

    /// Register a new struct/union type. Always fresh.
    pub fn add_struct(&mut self, info: StructInfo) -> (StructId, TypeIndex) {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(info);
        let index = self.push(TypeInfo {
            kind: TypeKind::Struct(id),
            size_bits: 0,
            align_bits: 8,
            quals: CvQualifiers::empty(),
            instantiation: None,
        });
        (id, index)
    }

    pub fn add_enum(&mut self, info: EnumInfo) -> (EnumId, TypeIndex) {
        let underlying = info.underlying;
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(info);
        let (size_bits, align_bits) = {
            let u = self.get(underlying);
            (u.size_bits, u.align_bits)
        };
        let index = self.push(TypeInfo {
            kind: TypeKind::Enum(id),
            size_bits,
            align_bits,
            quals: CvQualifiers::empty(),
            instantiation: None,
        });
        (id, index)
    }

    /// A fresh placeholder for a template parameter. Never deduplicated:
    /// two frames may reuse slot numbers.
    pub fn add_template_param(&mut self, slot: u16) -> TypeIndex {
        self.push(TypeInfo {
            kind: TypeKind::TemplateParam { slot },
            size_bits: 0,
            align_bits: 8,
            quals: CvQualifiers::empty(),
            instantiation: None,
        })
    }

    pub fn intern_signature(&mut self, sig: FunctionSignature) -> SignatureId {
        if let Some(&existing) = self.signature_dedup.get(&sig) {
            return existing;
        }
        let id = SignatureId(self.signatures.len() as u32);
        self.signatures.push(sig.clone());
        self.signature_dedup.insert(sig, id);
        id
    }

    pub fn signature(&self, id: SignatureId) -> &FunctionSignature {
        &self.signatures[id.0 as usize]
    }

    pub fn struct_info(&self, id: StructId) -> &StructInfo {
        &self.structs[id.0 as usize]
    }

    pub fn struct_info_mut(&mut self, id: StructId) -> &mut StructInfo {
        &mut self.structs[id.0 as usize]
    }

    pub fn enum_info(&self, id: EnumId) -> &EnumInfo {
        &self.enums[id.0 as usize]
    }

    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }

    /// Attach instantiation metadata to a freshly created class type.
    pub fn set_instantiation(&mut self, index: TypeIndex, info: InstantiationInfo) {
        self.infos[index.index()].instantiation = Some(info);
    }

    // Convenience constructors for the built-ins the parser needs
    // constantly.

    pub fn void(&mut self) -> TypeIndex {
        self.intern_type(TypeKind::Void)
    }

    pub fn bool_ty(&mut self) -> TypeIndex {
        self.intern_type(TypeKind::Bool)
    }

    pub fn int(&mut self, width: u16, signed: bool) -> TypeIndex {
        self.intern_type(TypeKind::Int { width, signed })
    }

    pub fn float(&mut self) -> TypeIndex {
        self.intern_type(TypeKind::Float)
    }

    pub fn double(&mut self) -> TypeIndex {
        self.intern_type(TypeKind::Double)
    }

    pub fn pointer_to(&mut self, pointee: TypeIndex) -> TypeIndex {
        self.intern_type(TypeKind::Pointer { pointee })
    }

    pub fn reference_to(&mut self, referent: TypeIndex, rvalue: bool) -> TypeIndex {
        self.intern_type(TypeKind::Reference { referent, rvalue })
    }

    pub fn array_of(&mut self, element: TypeIndex, length: Option<u64>) -> TypeIndex {
        self.intern_type(TypeKind::Array { element, length })
    }

    fn measure(&self, kind: &TypeKind) -> (u64, u32) {
        match kind {
            TypeKind::Void => (0, 8),
            TypeKind::Bool => (8, 8),
            TypeKind::Int { width, .. } => (*width as u64, *width as u32),
            TypeKind::Float => (32, 32),
            TypeKind::Double => (64, 64),
            TypeKind::Pointer { .. }
            | TypeKind::Reference { .. }
            | TypeKind::FunctionPtr(_) => (POINTER_BITS, POINTER_BITS as u32),
            TypeKind::Array { element, length } => {
                let elem = self.get(*element);
                let len = length.unwrap_or(0);
                (elem.size_bits * len, elem.align_bits)
            }
            TypeKind::Struct(id) => {
                let s = self.struct_info(*id);
                (s.size_bits, s.align_bits)
            }
            TypeKind::Enum(id) => {
                let u = self.get(self.enum_info(*id).underlying);
                (u.size_bits, u.align_bits)
            }
            TypeKind::TemplateParam { .. } => (0, 8),
        }
    }

    /// Size of a complete type in bytes.
    pub fn size_of(&self, index: TypeIndex) -> u64 {
        (self.get(index).size_bits + 7) / 8
    }

    /// Alignment of a type in bytes.
    pub fn align_of(&self, index: TypeIndex) -> u64 {
        (self.get(index).align_bits as u64 + 7) / 8
    }

    /// How many `Pointer` layers wrap the underlying type.
    pub fn pointer_depth(&self, index: TypeIndex) -> u32 {
        let mut depth = 0;
        let mut current = index;
        while let TypeKind::Pointer { pointee } = self.get(current).kind {
            depth += 1;
            current = pointee;
        }
        depth
    }

    /// Strip references for member access and value conversions.
    pub fn strip_reference(&self, index: TypeIndex) -> TypeIndex {
        match self.get(index).kind {
            TypeKind::Reference { referent, .. } => referent,
            _ => index,
        }
    }

    /// Compute layout for a struct whose members, methods, and bases have
    /// all been recorded, and populate its vtable. May be called exactly
    /// once per struct; the vtable invariant depends on it.
    pub fn layout_struct(&mut self, id: StructId, ty: TypeIndex) {
        let info = self.struct_info(id);
        assert!(
            !info.is_complete,
            "layout_struct called twice for `{:?}`",
            info.name
        );

        // Vtable: start from the primary base's table, override slots whose
        // name and signature match, then append fresh virtuals.
        let mut vtable: Vec<VtableSlot> = Vec::new();
        let mut has_vtable = false;
        let bases = info.bases.clone();
        for base in &bases {
            if let TypeKind::Struct(base_id) = self.get(base.ty).kind {
                let base_info = self.struct_info(base_id);
                assert!(
                    base_info.is_complete,
                    "base `{:?}` laid out after derived class",
                    base_info.name
                );
                if vtable.is_empty() {
                    vtable = base_info.vtable.clone();
                }
                has_vtable |= base_info.has_vtable;
            }
        }
        let methods = self.struct_info(id).methods.clone();
        let mut slot_updates: Vec<(usize, u32)> = Vec::new();
        for (method_idx, method) in methods.iter().enumerate() {
            if !method.is_virtual {
                continue;
            }
            has_vtable = true;
            let existing = vtable.iter().position(|slot| {
                slot.name == method.name
                    && self.signatures_override_compatible(slot.signature, method.signature)
            });
            let slot_index = match existing {
                Some(i) => {
                    vtable[i] = VtableSlot {
                        name: method.name,
                        signature: method.signature,
                        decl: method.decl,
                        defined_in: id,
                    };
                    i as u32
                }
                None => {
                    vtable.push(VtableSlot {
                        name: method.name,
                        signature: method.signature,
                        decl: method.decl,
                        defined_in: id,
                    });
                    (vtable.len() - 1) as u32
                }
            };
            slot_updates.push((method_idx, slot_index));
        }

        // Data layout: base subobjects, then members. The vptr occupies
        // the first word unless the primary base already provides one at
        // offset 0, in which case this class's vtable pointer simply
        // overwrites it during construction.
        let primary_base_polymorphic = bases.first().is_some_and(|base| {
            matches!(self.get(base.ty).kind, TypeKind::Struct(base_id)
                if self.struct_info(base_id).has_vtable)
        });
        let mut offset_bits: u64 = if has_vtable && !primary_base_polymorphic {
            POINTER_BITS
        } else {
            0
        };
        let mut align_bits: u32 = if has_vtable { POINTER_BITS as u32 } else { 8 };
        let mut base_offsets: Vec<u64> = Vec::new();
        for base in &bases {
            let (base_size, base_align) = {
                let info = self.get(base.ty);
                (info.size_bits.max(8), info.align_bits)
            };
            offset_bits = round_up(offset_bits, base_align as u64);
            base_offsets.push(offset_bits / 8);
            offset_bits += base_size;
            align_bits = align_bits.max(base_align);
        }

        let members = self.struct_info(id).members.clone();
        let is_union = self.struct_info(id).is_union;
        let mut member_offsets: Vec<u64> = Vec::new();
        let mut union_size: u64 = 0;
        for member in &members {
            let (m_size, m_align) = {
                let info = self.get(member.ty);
                (info.size_bits, info.align_bits)
            };
            align_bits = align_bits.max(m_align);
            if is_union {
                member_offsets.push(0);
                union_size = union_size.max(m_size);
            } else if let Some(width) = member.bit_width {
                // Bit-fields pack without alignment inside their unit
                member_offsets.push(offset_bits);
                offset_bits += width as u64;
            } else {
                offset_bits = round_up(offset_bits, m_align as u64);
                member_offsets.push(offset_bits);
                offset_bits += m_size;
            }
        }
        if is_union {
            offset_bits = union_size.max(if has_vtable { POINTER_BITS } else { 0 });
        }
        let size_bits = round_up(offset_bits.max(8), align_bits as u64);

        let info = self.struct_info_mut(id);
        assert!(info.vtable.is_empty(), "vtable populated twice");
        for (i, base) in info.bases.iter_mut().enumerate() {
            base.offset = base_offsets[i];
        }
        for (i, member) in info.members.iter_mut().enumerate() {
            member.bit_offset = member_offsets[i];
        }
        for (method_idx, slot) in slot_updates {
            info.methods[method_idx].vtable_slot = Some(slot);
        }
        info.vtable = vtable;
        info.has_vtable = has_vtable;
        info.size_bits = size_bits;
        info.align_bits = align_bits;
        info.is_complete = true;

        self.infos[ty.index()].size_bits = size_bits;
        self.infos[ty.index()].align_bits = align_bits;
    }

    /// Whether an override with `derived` signature fills a slot declared
    /// with `base` signature: same parameters and receiver cv; the return
    /// type is not compared (covariant returns are accepted as-is).
    fn signatures_override_compatible(&self, base: SignatureId, derived: SignatureId) -> bool {
        if base == derived {
            return true;
        }
        let a = self.signature(base);
        let b = self.signature(derived);
        a.params == b.params && a.receiver_quals == b.receiver_quals
    }

    /// Find a non-static data member, searching bases recursively. Returns
    /// the member plus the byte offset of the subobject that declares it.
    pub fn find_member(&self, id: StructId, name: StringHandle) -> Option<(Member, u64)> {
        let info = self.struct_info(id);
        if let Some(member) = info.members.iter().find(|m| m.name == name) {
            return Some((member.clone(), 0));
        }
        for base in &info.bases {
            if let TypeKind::Struct(base_id) = self.get(base.ty).kind {
                if let Some((member, offset)) = self.find_member(base_id, name) {
                    return Some((member, base.offset + offset));
                }
            }
        }
        None
    }

    /// Find member functions by name, searching bases recursively. The
    /// derived class's overloads hide base overloads with the same name.
    pub fn find_methods(&self, id: StructId, name: StringHandle) -> Vec<(StructId, MethodInfo)> {
        let info = self.struct_info(id);
        let own: Vec<_> = info
            .methods
            .iter()
            .filter(|m| m.name == name)
            .map(|m| (id, m.clone()))
            .collect();
        if !own.is_empty() {
            return own;
        }
        for base in &info.bases {
            if let TypeKind::Struct(base_id) = self.get(base.ty).kind {
                let found = self.find_methods(base_id, name);
                if !found.is_empty() {
                    return found;
                }
            }
        }
        Vec::new()
    }

    /// Whether `ancestor` appears (transitively) among the bases of `id`.
    pub fn is_base_of(&self, ancestor: StructId, id: StructId) -> bool {
        if ancestor == id {
            return true;
        }
        self.struct_info(id).bases.iter().any(|base| {
            matches!(self.get(base.ty).kind, TypeKind::Struct(base_id)
                if self.is_base_of(ancestor, base_id))
        })
    }

    /// Byte offset of `ancestor` within `id`, if it is a base.
    pub fn base_offset(&self, ancestor: StructId, id: StructId) -> Option<u64> {
        if ancestor == id {
            return Some(0);
        }
        for base in &self.struct_info(id).bases {
            if let TypeKind::Struct(base_id) = self.get(base.ty).kind {
                if let Some(inner) = self.base_offset(ancestor, base_id) {
                    return Some(base.offset + inner);
                }
            }
        }
        None
    }

    pub fn is_integral(&self, index: TypeIndex) -> bool {
        matches!(
            self.get(index).kind,
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Enum(_)
        )
    }

    pub fn is_floating(&self, index: TypeIndex) -> bool {
        matches!(self.get(index).kind, TypeKind::Float | TypeKind::Double)
    }

    /// Render a type for diagnostics.
    pub fn display(&self, index: TypeIndex, interner: &StringInterner) -> String {
        let info = self.get(index);
        let mut out = match &info.kind {
            TypeKind::Void => "void".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int { width, signed } => match (width, signed) {
                (8, true) => "char".into(),
                (8, false) => "unsigned char".into(),
                (16, true) => "short".into(),
                (16, false) => "unsigned short".into(),
                (32, true) => "int".into(),
                (32, false) => "unsigned int".into(),
                (64, true) => "long long".into(),
                (64, false) => "unsigned long long".into(),
                (w, true) => format!("int{}", w),
                (w, false) => format!("uint{}", w),
            },
            TypeKind::Float => "float".to_string(),
            TypeKind::Double => "double".to_string(),
            TypeKind::Pointer { pointee } => {
                format!("{}*", self.display(*pointee, interner))
            }
            TypeKind::Reference { referent, rvalue } => format!(
                "{}{}",
                self.display(*referent, interner),
                if *rvalue { "&&" } else { "&" }
            ),
            TypeKind::Array { element, length } => match length {
                Some(n) => format!("{}[{}]", self.display(*element, interner), n),
                None => format!("{}[]", self.display(*element, interner)),
            },
            TypeKind::Struct(id) => {
                interner.view(self.struct_info(*id).name.name).to_string()
            }
            TypeKind::Enum(id) => {
                interner.view(self.enum_info(*id).name.name).to_string()
            }
            TypeKind::FunctionPtr(sig) => {
                let sig = self.signature(*sig);
                let params: Vec<_> = sig
                    .params
                    .iter()
                    .map(|&p| self.display(p, interner))
                    .collect();
                format!(
                    "{} (*)({})",
                    self.display(sig.ret, interner),
                    params.join(", ")
                )
            }
            TypeKind::TemplateParam { slot } => format!("$T{}", slot),
        };
        if info.quals.contains(CvQualifiers::CONST) {
            out = format!("const {}", out);
        }
        if info.quals.contains(CvQualifiers::VOLATILE) {
            out = format!("volatile {}", out);
        }
        out
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceHandle;

    fn qid(interner: &mut StringInterner, name: &str) -> QualifiedIdentifier {
        let h = interner.intern(name);
        QualifiedIdentifier::new(NamespaceHandle::GLOBAL, h)
    }

    #[test]
    fn test_primitives_share_indices() {
        let mut registry = TypeRegistry::new();
        let a = registry.int(32, true);
        let b = registry.int(32, true);
        assert_eq!(a, b);
        let c = registry.int(32, false);
        assert_ne!(a, c);
        let pa = registry.pointer_to(a);
        let pb = registry.pointer_to(b);
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_indices_stay_stable() {
        let mut registry = TypeRegistry::new();
        let int_ty = registry.int(32, true);
        let first = registry.get(int_ty).kind.clone();
        for width in [8u16, 16, 64] {
            registry.int(width, true);
            registry.int(width, false);
        }
        assert_eq!(registry.get(int_ty).kind, first);
    }

    #[test]
    fn test_struct_layout_padding() {
        let mut interner = StringInterner::new();
        let mut registry = TypeRegistry::new();
        let char_ty = registry.int(8, true);
        let long_ty = registry.int(64, true);

        let mut info = StructInfo::new(qid(&mut interner, "S"), false);
        info.members.push(Member {
            name: interner.intern("c"),
            ty: char_ty,
            bit_offset: 0,
            bit_width: None,
            access: Access::Public,
        });
        info.members.push(Member {
            name: interner.intern("n"),
            ty: long_ty,
            bit_offset: 0,
            bit_width: None,
            access: Access::Public,
        });
        let (id, ty) = registry.add_struct(info);
        registry.layout_struct(id, ty);

        let info = registry.struct_info(id);
        assert_eq!(info.members[0].bit_offset, 0);
        assert_eq!(info.members[1].bit_offset, 64);
        assert_eq!(registry.size_of(ty), 16);
        assert_eq!(registry.align_of(ty), 8);
        assert!(!info.has_vtable);
    }

    #[test]
    fn test_union_members_overlap() {
        let mut interner = StringInterner::new();
        let mut registry = TypeRegistry::new();
        let int_ty = registry.int(32, true);
        let double_ty = registry.double();

        let mut info = StructInfo::new(qid(&mut interner, "U"), true);
        for (name, ty) in [("i", int_ty), ("d", double_ty)] {
            info.members.push(Member {
                name: interner.intern(name),
                ty,
                bit_offset: 0,
                bit_width: None,
                access: Access::Public,
            });
        }
        let (id, ty) = registry.add_struct(info);
        registry.layout_struct(id, ty);

        let info = registry.struct_info(id);
        assert_eq!(info.members[0].bit_offset, 0);
        assert_eq!(info.members[1].bit_offset, 0);
        assert_eq!(registry.size_of(ty), 8);
    }

    #[test]
    fn test_member_lookup_walks_bases() {
        let mut interner = StringInterner::new();
        let mut registry = TypeRegistry::new();
        let int_ty = registry.int(32, true);

        let mut base = StructInfo::new(qid(&mut interner, "Base"), false);
        let x = interner.intern("x");
        base.members.push(Member {
            name: x,
            ty: int_ty,
            bit_offset: 0,
            bit_width: None,
            access: Access::Public,
        });
        let (base_id, base_ty) = registry.add_struct(base);
        registry.layout_struct(base_id, base_ty);

        let mut derived = StructInfo::new(qid(&mut interner, "Derived"), false);
        derived.bases.push(BaseClass {
            ty: base_ty,
            access: Access::Public,
            is_virtual: false,
            offset: 0,
        });
        let y = interner.intern("y");
        derived.members.push(Member {
            name: y,
            ty: int_ty,
            bit_offset: 0,
            bit_width: None,
            access: Access::Public,
        });
        let (derived_id, derived_ty) = registry.add_struct(derived);
        registry.layout_struct(derived_id, derived_ty);

        let (member, offset) = registry.find_member(derived_id, x).unwrap();
        assert_eq!(member.name, x);
        assert_eq!(offset, 0);
        assert!(registry.is_base_of(base_id, derived_id));
        assert_eq!(registry.base_offset(base_id, derived_id), Some(0));
    }
}

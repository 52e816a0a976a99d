//! Three-address intermediate representation.
//!
//! Each function becomes a flat instruction list. Results live in
//! numbered [TempVar]s; named storage (locals, parameters, globals) and
//! branch targets are referenced by [StringHandle]; constants are inline.
//! Value-category and lvalue metadata ride in side tables so the backend
//! can choose between load-address and load-value without re-walking the
//! AST.

use crate::{
    ast::ValueCategory,
    intern::StringHandle,
    types::{StructId, TypeIndex},
};
use std::collections::HashMap;

/// Numeric id of one SSA-ish result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempVar(pub u32);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Operand {
    Temp(TempVar),
    Const(i64),
    FloatConst(f64),
}

/// Machine-level scalar classification of a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Ptr,
    Void,
}

impl IrType {
    pub fn size(self) -> u8 {
        match self {
            IrType::I8 | IrType::U8 => 1,
            IrType::I16 | IrType::U16 => 2,
            IrType::I32 | IrType::U32 | IrType::F32 => 4,
            IrType::Void => 0,
            _ => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::CmpEq
                | BinOp::CmpNe
                | BinOp::CmpLt
                | BinOp::CmpLe
                | BinOp::CmpGt
                | BinOp::CmpGe
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// Where a call transfers to.
#[derive(Clone, Debug, PartialEq)]
pub enum CallTarget {
    /// Direct call to a symbol (already mangled).
    Direct(StringHandle),
    /// Call through a function pointer value.
    Indirect(Operand),
    /// Virtual dispatch: load the vtable from the object, then the slot.
    /// `object` is a pointer to the object (references were lowered to
    /// pointers already).
    Virtual { object: Operand, slot: u32 },
}

/// How an lvalue temp maps onto storage.
#[derive(Clone, Debug, PartialEq)]
pub enum LValueInfo {
    /// A named local or parameter, addressed via its frame slot.
    DirectLocal(StringHandle),
    /// The temp holds a pointer to the storage.
    Indirect(TempVar),
    /// Struct member at a constant offset from a base address temp.
    Member { base: TempVar, offset: u64 },
    /// Array element whose address was computed into the temp.
    ArrayElement { addr: TempVar },
    /// A materialized temporary with no durable home.
    Temporary,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    Binary {
        op: BinOp,
        dst: TempVar,
        lhs: Operand,
        rhs: Operand,
        ty: IrType,
    },
    Unary {
        op: UnOp,
        dst: TempVar,
        src: Operand,
        ty: IrType,
    },
    Copy {
        dst: TempVar,
        src: Operand,
    },
    /// Numeric conversion between scalar classes (sign/width changes,
    /// int<->float).
    Convert {
        dst: TempVar,
        src: Operand,
        from: IrType,
        to: IrType,
    },
    /// Read a named local/parameter.
    LoadLocal {
        dst: TempVar,
        var: StringHandle,
        ty: IrType,
    },
    StoreLocal {
        var: StringHandle,
        src: Operand,
        ty: IrType,
    },
    AddrOfLocal {
        dst: TempVar,
        var: StringHandle,
    },
    /// Address of a global symbol (already mangled).
    AddrOfSymbol {
        dst: TempVar,
        symbol: StringHandle,
    },
    /// Address of a string literal in .rodata.
    AddrOfString {
        dst: TempVar,
        index: u32,
    },
    Load {
        dst: TempVar,
        addr: Operand,
        ty: IrType,
    },
    Store {
        addr: Operand,
        src: Operand,
        ty: IrType,
    },
    /// `dst = base + index * scale + offset`, the folded address form.
    ComputeAddress {
        dst: TempVar,
        base: Operand,
        index: Option<Operand>,
        scale: u32,
        offset: i64,
    },
    /// Copy `size` bytes between two addresses (struct assignment).
    MemCopy {
        dst_addr: Operand,
        src_addr: Operand,
        size: u64,
    },
    Call {
        dst: Option<TempVar>,
        target: CallTarget,
        args: Vec<(Operand, IrType)>,
        ret: IrType,
        /// Variadic callee: SysV requires AL = #vector registers used.
        variadic: bool,
    },
    Branch {
        target: StringHandle,
    },
    CondBranch {
        cond: Operand,
        if_true: StringHandle,
        if_false: StringHandle,
    },
    Label {
        name: StringHandle,
    },
    Return {
        value: Option<Operand>,
        ty: IrType,
    },
    /// Allocate from the runtime heap (`operator new`/`new[]`).
    NewObject {
        dst: TempVar,
        elem_size: u64,
        count: Option<Operand>,
    },
    DeleteObject {
        ptr: Operand,
        array: bool,
    },
    /// Runtime-checked downcast. Null result for pointer casts, a throw
    /// of `std::bad_cast` for reference casts.
    DynamicCast {
        dst: TempVar,
        src: Operand,
        from: TypeIndex,
        to: TypeIndex,
        ref_cast: bool,
    },
    TryBegin {
        region: u32,
    },
    TryEnd {
        region: u32,
    },
    /// Start of one catch handler's body. `dst` receives the pointer
    /// returned by `__cxa_begin_catch`.
    CatchBegin {
        region: u32,
        dst: Option<TempVar>,
    },
    CatchEnd {
        region: u32,
    },
    Throw {
        value: Operand,
        ty: TypeIndex,
    },
}

/// One catch clause of a try region. `ty` of `None` is `catch (...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub ty: Option<TypeIndex>,
    pub label: StringHandle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryRegion {
    pub id: u32,
    pub catches: Vec<CatchClause>,
    /// Label of the instruction after the whole try/catch construct.
    pub cont_label: StringHandle,
}

/// A named stack slot: local variable, parameter, or materialized
/// temporary object.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalSlot {
    pub name: StringHandle,
    pub size: u64,
    pub align: u64,
    pub ty: IrType,
    pub is_param: bool,
}

#[derive(Clone, Debug)]
pub struct IrFunction {
    /// Source-level qualified name, for diagnostics.
    pub display_name: String,
    /// Symbol the backend emits.
    pub mangled: String,
    pub params: Vec<(StringHandle, IrType)>,
    pub ret: IrType,
    pub instrs: Vec<Instr>,
    pub locals: Vec<LocalSlot>,
    pub temp_count: u32,
    pub try_regions: Vec<TryRegion>,
    /// Metadata side tables, keyed by temp id.
    pub value_categories: HashMap<u32, ValueCategory>,
    pub lvalues: HashMap<u32, LValueInfo>,
    pub is_variadic: bool,
}

impl IrFunction {
    pub fn has_eh(&self) -> bool {
        !self.try_regions.is_empty()
    }
}

/// An initialized or zero-initialized global.
#[derive(Clone, Debug)]
pub struct GlobalVar {
    pub mangled: String,
    pub size: u64,
    pub align: u64,
    /// `None` places the global in .bss.
    pub init: Option<Vec<u8>>,
}

/// The lowered translation unit handed to the backend.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: Vec<IrFunction>,
    pub globals: Vec<GlobalVar>,
    /// String literal pool, indexed by `AddrOfString`.
    pub strings: Vec<Vec<u8>>,
    /// Classes that need vtables and RTTI emitted.
    pub polymorphic_classes: Vec<StructId>,
    /// Type-info symbols referenced by throws/catches/dynamic_cast, in
    /// first-use order.
    pub referenced_typeinfo: Vec<TypeIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ir_type_properties() {
        assert_eq!(IrType::I32.size(), 4);
        assert_eq!(IrType::Ptr.size(), 8);
        assert!(IrType::F64.is_float());
        assert!(!IrType::U64.is_signed());
        assert!(IrType::I8.is_signed());
    }

    #[test]
    fn test_binop_classification() {
        assert!(BinOp::CmpLe.is_comparison());
        assert!(!BinOp::Add.is_comparison());
    }
}

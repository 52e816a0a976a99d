//! The abstract syntax tree.
//!
//! Nodes are arena-allocated in per-family vectors owned by [Ast] and
//! addressed by [ExprId]/[StmtId]/[DeclId]. One tagged enum per family
//! replaces runtime inheritance; cyclic ownership (class ↔ member,
//! template ↔ instantiation) always goes through registry indices, never
//! through owned pointers. Every expression carries its span, an optional
//! resolved type, and a value category.

use crate::{
    intern::StringHandle,
    namespace::{NamespaceHandle, QualifiedIdentifier},
    types::{
        CvQualifiers, EnumId, SignatureId, StructId, TypeIndex, TypeSpecifier,
    },
    util::Span,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ExprId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct StmtId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct DeclId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl DeclId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Language-level classification of an expression: named storage, pure
/// value, or expiring storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ValueCategory {
    LValue,
    XValue,
    PrValue,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Deref,
    AddrOf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Spaceship,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Comma,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    XorAssign,
    OrAssign,
}

impl BinaryOp {
    pub fn is_assignment(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Assign
                | AddAssign
                | SubAssign
                | MulAssign
                | DivAssign
                | RemAssign
                | ShlAssign
                | ShrAssign
                | AndAssign
                | XorAssign
                | OrAssign
        )
    }

    /// For compound assignments, the underlying arithmetic operator.
    pub fn compound_base(self) -> Option<BinaryOp> {
        use BinaryOp::*;
        Some(match self {
            AddAssign => Add,
            SubAssign => Sub,
            MulAssign => Mul,
            DivAssign => Div,
            RemAssign => Rem,
            ShlAssign => Shl,
            ShrAssign => Shr,
            AndAssign => BitAnd,
            XorAssign => BitXor,
            OrAssign => BitOr,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(self, Lt | Gt | Le | Ge | Eq | Ne)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum CastKind {
    Static,
    Reinterpret,
    Const,
    Dynamic,
    /// `T(args...)` notation; also covers C-style casts, which parse to
    /// the same node.
    Functional,
}

/// Compiler-evaluated type predicates (`__is_same`, ...). These back the
/// standard type-trait templates without a library implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum TypeTrait {
    IsSame,
    IsBaseOf,
    IsClass,
    IsEnum,
    IsUnion,
    IsPointer,
    IsReference,
    IsIntegral,
    IsFloatingPoint,
    IsTriviallyCopyable,
    IsPolymorphic,
}

/// A template argument as written at a use site. Non-type arguments stay
/// expressions until the instantiator canonicalizes them to `i64`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub enum TemplateArg {
    Type(TypeSpecifier),
    Value(ExprId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Filled during type resolution; literals get theirs at parse time.
    pub ty: Option<TypeSpecifier>,
    pub category: ValueCategory,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    IntLit {
        value: u64,
        unsigned: bool,
        width: u8,
    },
    FloatLit {
        value: f64,
        is_double: bool,
    },
    BoolLit(bool),
    CharLit(i64),
    StrLit(StringHandle),
    Nullptr,
    This,
    Ident {
        qid: QualifiedIdentifier,
        /// Resolved declaration, if lookup succeeded at parse time.
        decl: Option<DeclId>,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Conditional {
        cond: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    Member {
        object: ExprId,
        name: StringHandle,
        arrow: bool,
    },
    Subscript {
        object: ExprId,
        index: ExprId,
    },
    Cast {
        kind: CastKind,
        target: TypeSpecifier,
        operand: ExprId,
    },
    /// `T(a, b)` or `T{a, b}` constructing a temporary.
    Construct {
        ty: TypeSpecifier,
        args: Vec<ExprId>,
    },
    /// Braced initializer in expression position.
    InitList {
        elems: Vec<ExprId>,
    },
    SizeofType(TypeSpecifier),
    SizeofExpr(ExprId),
    /// `sizeof...(pack)`
    SizeofPack(StringHandle),
    Alignof(TypeSpecifier),
    TypeTrait {
        which: TypeTrait,
        args: Vec<TypeSpecifier>,
    },
    New {
        ty: TypeSpecifier,
        /// Element count for `new T[n]`.
        count: Option<ExprId>,
        args: Vec<ExprId>,
    },
    Delete {
        operand: ExprId,
        array: bool,
    },
    /// Reference to a synthesized closure; the callable body lives in the
    /// pointed-to function declaration.
    Lambda {
        fn_decl: DeclId,
    },
    Fold {
        op: BinaryOp,
        pack: StringHandle,
        init: Option<ExprId>,
        fold_left: bool,
    },
    PackExpansion {
        pattern: ExprId,
    },
    TemplateId {
        base: QualifiedIdentifier,
        args: Vec<TemplateArg>,
        /// Instantiated declaration, once the instantiator has run.
        resolved: Option<DeclId>,
    },
    /// `requires { ... }` evaluated to a bool at compile time.
    Requires {
        satisfied: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchHandler {
    /// `None` is `catch (...)`.
    pub ty: Option<TypeSpecifier>,
    pub var: Option<StringHandle>,
    pub body: StmtId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    Compound(Vec<StmtId>),
    If {
        is_constexpr: bool,
        cond: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },
    While {
        cond: ExprId,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        cond: ExprId,
    },
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        step: Option<ExprId>,
        body: StmtId,
    },
    /// Desugared range-for: the loop variable declaration plus the range
    /// expression; bounds come from the range's array type.
    RangeFor {
        var: DeclId,
        range: ExprId,
        body: StmtId,
    },
    Switch {
        cond: ExprId,
        body: StmtId,
    },
    /// `case N:` / `default:` label inside a switch body.
    CaseLabel {
        value: Option<ExprId>,
    },
    Break,
    Continue,
    Return(Option<ExprId>),
    Try {
        body: StmtId,
        handlers: Vec<CatchHandler>,
    },
    Throw(Option<ExprId>),
    Decl(DeclId),
    Expr(ExprId),
    Empty,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Storage {
    None,
    Static,
    Extern,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ConstexprKind {
    No,
    Constexpr,
    Consteval,
    Constinit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum Linkage {
    Cpp,
    C,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum CallingConv {
    Default,
    Cdecl,
}

/// The result of the shared declaration-specifier parse, consumed by both
/// the variable and the function declaration paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DeclSpecifiers {
    pub storage: Storage,
    pub quals: CvQualifiers,
    pub inline: bool,
    pub constexpr_kind: ConstexprKind,
    pub linkage: Linkage,
    pub calling_conv: CallingConv,
}

impl Default for DeclSpecifiers {
    fn default() -> Self {
        Self {
            storage: Storage::None,
            quals: CvQualifiers::empty(),
            inline: false,
            constexpr_kind: ConstexprKind::No,
            linkage: Linkage::Cpp,
            calling_conv: CallingConv::Default,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Initializer {
    Expr(ExprId),
    Braced(Vec<ExprId>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamDecl {
    pub name: Option<StringHandle>,
    pub ty: TypeSpecifier,
    pub default: Option<ExprId>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: QualifiedIdentifier,
    pub signature: SignatureId,
    pub params: Vec<ParamDecl>,
    pub body: Option<StmtId>,
    pub specs: DeclSpecifiers,
    /// Set for member functions, including constructors and destructors.
    pub method_of: Option<StructId>,
    pub is_virtual: bool,
    pub is_ctor: bool,
    pub is_dtor: bool,
    pub is_deleted: bool,
    pub is_defaulted: bool,
    /// Constructor member-initializer list: `(member name, arguments)`.
    pub ctor_inits: Vec<(StringHandle, Vec<ExprId>)>,
    /// For template instantiations: the cache key this function was
    /// produced under. Drives template-aware name mangling.
    pub instantiated_key: Option<crate::template::InstantiationKey>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub enum TemplateParamKind {
    Type,
    NonType { ty: TypeSpecifier },
    /// `typename... Ts`
    TypePack,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateParamDecl {
    pub name: StringHandle,
    pub kind: TemplateParamKind,
    /// Placeholder type installed while the pattern body is parsed.
    pub placeholder: TypeIndex,
    pub default: Option<TemplateArg>,
}

/// What a `template<...>` declares.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum TemplateKind {
    Class,
    Function,
    Variable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateDecl {
    pub name: QualifiedIdentifier,
    pub kind: TemplateKind,
    pub params: Vec<TemplateParamDecl>,
    /// The unsubstituted pattern declaration.
    pub pattern: DeclId,
    /// For function templates the token range of the body, for variable
    /// templates the range of the initializer; reparsed at instantiation.
    pub deferred_body: Option<(usize, usize)>,
    /// For (partial) specializations: the argument pattern this
    /// specialization matches. `None` marks the primary template.
    pub spec_args: Option<Vec<TemplateArg>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeclKind {
    Variable {
        name: QualifiedIdentifier,
        ty: TypeSpecifier,
        init: Option<Initializer>,
        specs: DeclSpecifiers,
    },
    Function(FunctionDecl),
    Struct {
        id: StructId,
        ty: TypeIndex,
    },
    Enum {
        id: EnumId,
        ty: TypeIndex,
    },
    Template(TemplateDecl),
    UsingNamespace {
        target: NamespaceHandle,
    },
    UsingDecl {
        target: QualifiedIdentifier,
    },
    UsingAlias {
        name: QualifiedIdentifier,
        ty: TypeSpecifier,
    },
    Namespace {
        handle: NamespaceHandle,
        decls: Vec<DeclId>,
    },
    StaticAssert {
        cond: ExprId,
        message: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decl {
    pub kind: DeclKind,
    pub span: Span,
}

/// A parsed translation unit: the declaration list in source order.
#[derive(Debug, Default)]
pub struct TranslationUnit {
    pub decls: Vec<DeclId>,
}

/// Arena storage for all AST nodes of one translation unit. Vectors only
/// grow; truncation is allowed solely to roll back speculative parses (the
/// parser never keeps ids across a rollback).
#[derive(Debug, Default)]
pub struct Ast {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    decls: Vec<Decl>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn add_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    pub fn add_decl(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        &mut self.decls[id.index()]
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    /// Snapshot for speculative parsing.
    pub fn mark(&self) -> AstMark {
        AstMark {
            exprs: self.exprs.len(),
            stmts: self.stmts.len(),
            decls: self.decls.len(),
        }
    }

    /// Roll back to a snapshot, discarding nodes created since. Only valid
    /// while no surviving node references the discarded range.
    pub fn rollback(&mut self, mark: AstMark) {
        self.exprs.truncate(mark.exprs);
        self.stmts.truncate(mark.stmts);
        self.decls.truncate(mark.decls);
    }
}

#[derive(Copy, Clone, Debug)]
pub struct AstMark {
    exprs: usize,
    stmts: usize,
    decls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_lit(value: u64) -> Expr {
        Expr {
            kind: ExprKind::IntLit {
                value,
                unsigned: false,
                width: 32,
            },
            span: Span::default(),
            ty: None,
            category: ValueCategory::PrValue,
        }
    }

    #[test]
    fn test_arena_roundtrip() {
        let mut ast = Ast::new();
        let a = ast.add_expr(int_lit(1));
        let b = ast.add_expr(int_lit(2));
        assert_ne!(a, b);
        assert!(matches!(
            ast.expr(a).kind,
            ExprKind::IntLit { value: 1, .. }
        ));
        assert!(matches!(
            ast.expr(b).kind,
            ExprKind::IntLit { value: 2, .. }
        ));
    }

    #[test]
    fn test_rollback_discards_speculative_nodes() {
        let mut ast = Ast::new();
        let keep = ast.add_expr(int_lit(1));
        let mark = ast.mark();
        ast.add_expr(int_lit(2));
        ast.add_expr(int_lit(3));
        ast.rollback(mark);
        assert_eq!(ast.expr_count(), 1);
        assert!(matches!(
            ast.expr(keep).kind,
            ExprKind::IntLit { value: 1, .. }
        ));
    }

    #[test]
    fn test_compound_assignment_bases() {
        assert_eq!(BinaryOp::AddAssign.compound_base(), Some(BinaryOp::Add));
        assert_eq!(BinaryOp::ShrAssign.compound_base(), Some(BinaryOp::Shr));
        assert_eq!(BinaryOp::Assign.compound_base(), None);
        assert!(BinaryOp::Assign.is_assignment());
        assert!(!BinaryOp::Add.is_assignment());
    }
}

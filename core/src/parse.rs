//! Token-stream parser: recursive descent for declarations and statements,
//! Pratt-style precedence climbing for expressions.
//!
//! The parser owns the AST arena while it runs and populates the
//! registries in [Context] as it goes. It maintains a current-namespace
//! stack, the lexical scope stack (through the symbol table), a
//! template-parameter stack, and a deferred-parse list for member-function
//! bodies, which are remembered as token ranges and parsed once their
//! class is complete (or, for templates, at instantiation).
//!
//! Two pieces of lookahead machinery deserve a note. When a `<` follows a
//! name that resolves to a template, the parser speculatively attempts a
//! template-argument-list parse, rolling back the token position and any
//! AST nodes created if it fails; only then is `<` treated as comparison.
//! And inside template-argument context a `>>` token can be split into two
//! closing `>`s (`pending_gt`).

use crate::{
    ast::{
        Ast, BinaryOp, CallingConv, CastKind, CatchHandler,
        ConstexprKind, Decl, DeclId, DeclKind, DeclSpecifiers, Expr, ExprId,
        ExprKind, FunctionDecl, Initializer, Linkage, ParamDecl, Stmt, StmtId,
        StmtKind, Storage, TemplateArg, TemplateDecl, TemplateKind,
        TemplateParamDecl, TemplateParamKind, TranslationUnit, TypeTrait,
        UnaryOp, ValueCategory,
    },
    consteval::Evaluator,
    consts::MAX_DIAGNOSTICS,
    error::CompileError,
    intern::StringHandle,
    namespace::{NamespaceHandle, QualifiedIdentifier},
    token::{Keyword, Punct, Token, TokenKind},
    types::{
        Access, BaseClass, CvQualifiers, EnumInfo, FunctionSignature, Member,
        MethodBody, MethodInfo, SignatureId, StaticMember, StructId,
        StructInfo, TypeIndex, TypeKind, TypeSpecifier,
    },
    util::Span,
    Context, Options,
};
use log::debug;

pub type PResult<T> = Result<T, (CompileError, Span)>;

/// A template parameter visible while a pattern (or instantiation) is
/// being parsed.
#[derive(Clone, Debug)]
pub enum TemplateBinding {
    /// Type parameter: name maps to a (placeholder or substituted) type.
    Type(TypeIndex),
    /// Non-type parameter: name maps to a value, either still symbolic
    /// (`None`, inside the pattern) or substituted (`Some(v)`).
    Value {
        ty: TypeSpecifier,
        substituted: Option<i64>,
    },
}

/// One `template<...>` frame.
#[derive(Clone, Debug, Default)]
pub struct TemplateFrame {
    pub bindings: Vec<(StringHandle, TemplateBinding)>,
}

impl TemplateFrame {
    pub fn get(&self, name: StringHandle) -> Option<&TemplateBinding> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| b)
    }
}

/// A member-function body whose tokens were remembered for later parsing.
pub(crate) struct PendingBody {
    pub(crate) struct_id: StructId,
    pub(crate) method_index: usize,
    pub(crate) decl: DeclId,
    pub(crate) range: (usize, usize),
    pub(crate) class_ns: NamespaceHandle,
}

pub struct Parser<'a> {
    pub(crate) tokens: &'a [Token],
    pub(crate) pos: usize,
    pub(crate) source: &'a str,
    pub(crate) ctx: &'a mut Context,
    pub(crate) ast: Ast,
    pub(crate) ns_stack: Vec<NamespaceHandle>,
    pub(crate) template_frames: Vec<TemplateFrame>,
    /// Class whose member-function body is currently being parsed.
    pub(crate) current_class: Option<StructId>,
    /// Nesting depth of template-argument lists; gates `>`/`>>` as binary
    /// operators.
    template_arg_depth: u32,
    /// Set when a `>>` has been half-consumed inside template arguments.
    pending_gt: bool,
    pending_bodies: Vec<PendingBody>,
    access_control: bool,
    pub(crate) eager_templates: bool,
    errors: Vec<(CompileError, Span)>,
    /// Synthesized-name counter (lambdas, labels).
    synth_counter: u32,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: &'a [Token],
        source: &'a str,
        ctx: &'a mut Context,
        options: &Options,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            source,
            ctx,
            ast: Ast::new(),
            ns_stack: vec![NamespaceHandle::GLOBAL],
            template_frames: Vec::new(),
            current_class: None,
            template_arg_depth: 0,
            pending_gt: false,
            pending_bodies: Vec::new(),
            access_control: options.access_control,
            eager_templates: options.eager_template_instantiation,
            errors: Vec::new(),
            synth_counter: 0,
        }
    }

    /// Parse the whole token stream into a translation unit. Recovers at
    /// top-level declaration boundaries so multiple diagnostics can be
    /// collected in one run.
    pub fn parse_translation_unit(
        mut self,
    ) -> Result<(TranslationUnit, Ast), Vec<(CompileError, Span)>> {
        let mut unit = TranslationUnit::default();
        while !self.at_eof() {
            match self.parse_top_declaration() {
                Ok(Some(decl)) => unit.decls.push(decl),
                Ok(None) => {}
                Err(error) => {
                    self.errors.push(error);
                    if self.errors.len() >= MAX_DIAGNOSTICS {
                        break;
                    }
                    self.synchronize();
                }
            }
        }
        debug!(
            "parsed {} top-level declarations, {} types, {} template \
             instantiations ({})",
            unit.decls.len(),
            self.ctx.types.len(),
            self.ctx.templates.instantiation_count(),
            if self.eager_templates { "eager" } else { "lazy" },
        );
        if self.errors.is_empty() {
            Ok((unit, self.ast))
        } else {
            Err(self.errors)
        }
    }

    /// Skip to the next plausible top-level declaration start.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RBrace) => {
                    self.advance();
                    if depth <= 1 {
                        // Also eat a trailing `;` of a class definition
                        self.eat_punct(Punct::Semi);
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                TokenKind::Punct(Punct::Semi) if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // ===== Token plumbing =====

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub(crate) fn nth_kind(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn here(&self) -> Span {
        self.peek().span()
    }

    pub(crate) fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn at_punct(&self, p: Punct) -> bool {
        matches!(self.peek_kind(), TokenKind::Punct(q) if *q == p)
    }

    pub(crate) fn at_keyword(&self, k: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(q) if *q == k)
    }

    pub(crate) fn eat_punct(&mut self, p: Punct) -> bool {
        if self.at_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, k: Keyword) -> bool {
        if self.at_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn err<T>(&self, expected: &'static str) -> PResult<T> {
        Err((CompileError::Syntax { expected }, self.here()))
    }

    pub(crate) fn expect_punct(
        &mut self,
        p: Punct,
        expected: &'static str,
    ) -> PResult<Span> {
        if self.at_punct(p) {
            Ok(self.advance().span())
        } else {
            self.err(expected)
        }
    }

    /// Consume an identifier token and intern its lexeme.
    pub(crate) fn expect_ident(
        &mut self,
        expected: &'static str,
    ) -> PResult<(StringHandle, Span)> {
        if matches!(self.peek_kind(), TokenKind::Ident) {
            let token = self.advance().clone();
            let span = token.span();
            let lexeme = token.lexeme(self.source);
            let handle = self.ctx.interner.intern(lexeme);
            Ok((handle, span))
        } else {
            self.err(expected)
        }
    }

    /// Peek an identifier's interned handle without consuming.
    fn peek_ident(&mut self) -> Option<StringHandle> {
        if matches!(self.peek_kind(), TokenKind::Ident) {
            let lexeme = self.peek().lexeme(self.source);
            let lexeme = lexeme.to_owned();
            Some(self.ctx.interner.intern(&lexeme))
        } else {
            None
        }
    }

    /// Whether the current token is a contextual keyword like `override`.
    fn at_contextual(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident)
            && self.peek().lexeme(self.source) == word
    }

    fn eat_contextual(&mut self, word: &str) -> bool {
        if self.at_contextual(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn current_ns(&self) -> NamespaceHandle {
        *self.ns_stack.last().expect("namespace stack never empty")
    }

    fn synth_name(&mut self, prefix: &str) -> StringHandle {
        self.synth_counter += 1;
        let name = format!("{}{}", prefix, self.synth_counter);
        self.ctx.interner.create(&name)
    }

    /// Evaluate a parsed expression as an integral constant, in place.
    pub(crate) fn const_eval_i64(&mut self, expr: ExprId) -> PResult<i64> {
        Evaluator::new(self.ctx, &self.ast).eval_to_i64(expr)
    }

    // ===== Template argument close handling =====

    fn at_template_close(&self) -> bool {
        self.pending_gt
            || self.at_punct(Punct::Greater)
            || self.at_punct(Punct::Shr)
    }

    /// Consume one closing `>`, splitting a `>>` if necessary.
    fn close_template_angle(&mut self) -> PResult<()> {
        if self.pending_gt {
            self.pending_gt = false;
            Ok(())
        } else if self.at_punct(Punct::Greater) {
            self.advance();
            Ok(())
        } else if self.at_punct(Punct::Shr) {
            self.advance();
            self.pending_gt = true;
            Ok(())
        } else {
            self.err("`>` closing template arguments")
        }
    }

    // ===== Qualified names =====

    /// Parse `(::)? (ident ::)* ident`, resolving the qualifier segments
    /// against the namespace registry (classes register their scope there
    /// too). Returns the qualified identifier of the final name.
    pub(crate) fn parse_qualified_name(
        &mut self,
        expected: &'static str,
    ) -> PResult<(QualifiedIdentifier, Span)> {
        let rooted = self.eat_punct(Punct::ColonColon);
        let (mut name, mut span) = self.expect_ident(expected)?;
        let mut ns = if rooted {
            NamespaceHandle::GLOBAL
        } else {
            self.current_ns()
        };
        let mut qualified = rooted;
        while self.at_punct(Punct::ColonColon)
            && matches!(self.nth_kind(1), TokenKind::Ident)
        {
            // Resolve the segment parsed so far as a namespace/class scope
            let scope = if qualified {
                self.ctx.namespaces.child(ns, name)
            } else {
                self.resolve_scope_segment(name)
            };
            let Some(scope) = scope else {
                return Err((
                    CompileError::lookup(format!(
                        "`{}` is not a namespace or class",
                        self.ctx.interner.view(name)
                    )),
                    span,
                ));
            };
            ns = scope;
            qualified = true;
            self.advance(); // ::
            let (next, next_span) = self.expect_ident(expected)?;
            name = next;
            span = span.merge(next_span);
        }
        let qid = if qualified {
            QualifiedIdentifier::new(ns, name)
        } else {
            QualifiedIdentifier::new(self.current_ns(), name)
        };
        Ok((qid, span))
    }

    /// Find a namespace or class scope named `name`, searching enclosing
    /// namespaces outward.
    fn resolve_scope_segment(&self, name: StringHandle) -> Option<NamespaceHandle> {
        let mut ns = Some(self.current_ns());
        while let Some(current) = ns {
            if let Some(child) = self.ctx.namespaces.child(current, name) {
                return Some(child);
            }
            ns = self.ctx.namespaces.parent(current);
        }
        None
    }

    // ===== Types =====

    /// Whether a token sequence starting here can begin a type.
    pub(crate) fn at_type_start(&mut self) -> bool {
        match self.peek_kind() {
            TokenKind::Keyword(k) => matches!(
                k,
                Keyword::Void
                    | Keyword::Bool
                    | Keyword::Char
                    | Keyword::Char8T
                    | Keyword::Char16T
                    | Keyword::Char32T
                    | Keyword::WcharT
                    | Keyword::Short
                    | Keyword::Int
                    | Keyword::Long
                    | Keyword::Signed
                    | Keyword::Unsigned
                    | Keyword::Float
                    | Keyword::Double
                    | Keyword::Const
                    | Keyword::Volatile
                    | Keyword::Struct
                    | Keyword::Class
                    | Keyword::Union
                    | Keyword::Enum
                    | Keyword::Typename
                    | Keyword::Decltype
                    | Keyword::Auto
            ),
            TokenKind::Punct(Punct::ColonColon) => true,
            TokenKind::Ident => {
                let name = self.peek().lexeme(self.source).to_owned();
                self.ident_names_type(&name)
            }
            _ => false,
        }
    }

    fn ident_names_type(&mut self, name: &str) -> bool {
        let handle = self.ctx.interner.intern(name);
        // Template parameters shadow everything
        for frame in self.template_frames.iter().rev() {
            if let Some(binding) = frame.get(handle) {
                return matches!(binding, TemplateBinding::Type(_));
            }
        }
        let mut ns = Some(self.current_ns());
        while let Some(current) = ns {
            let qid = QualifiedIdentifier::new(current, handle);
            if self.ctx.type_names.contains_key(&qid) {
                return true;
            }
            if self.ctx.templates.is_class_template(qid) {
                return true;
            }
            ns = self.ctx.namespaces.parent(current);
        }
        false
    }

    /// Parse a type: cv-qualifiers, base type, then pointer/reference
    /// suffixes. Array bounds belong to declarators and are handled by the
    /// callers that allow them.
    pub(crate) fn parse_type(&mut self) -> PResult<TypeSpecifier> {
        let mut quals = CvQualifiers::empty();
        loop {
            if self.eat_keyword(Keyword::Const) {
                quals |= CvQualifiers::CONST;
            } else if self.eat_keyword(Keyword::Volatile) {
                quals |= CvQualifiers::VOLATILE;
            } else {
                break;
            }
        }
        let mut index = self.parse_base_type()?;
        loop {
            if self.eat_keyword(Keyword::Const) {
                quals |= CvQualifiers::CONST;
            } else if self.eat_keyword(Keyword::Volatile) {
                quals |= CvQualifiers::VOLATILE;
            } else {
                break;
            }
        }
        // Pointer and reference suffixes; cv after `*` binds to the
        // pointer, which we fold into the pointee index.
        loop {
            if self.eat_punct(Punct::Star) {
                let qualified = self.ctx.types.qualified(index, quals);
                index = self.ctx.types.pointer_to(qualified);
                quals = CvQualifiers::empty();
                while self.eat_keyword(Keyword::Const) {
                    quals |= CvQualifiers::CONST;
                }
            } else if self.eat_punct(Punct::Amp) {
                let qualified = self.ctx.types.qualified(index, quals);
                index = self.ctx.types.reference_to(qualified, false);
                quals = CvQualifiers::empty();
            } else if self.eat_punct(Punct::AmpAmp) {
                let qualified = self.ctx.types.qualified(index, quals);
                index = self.ctx.types.reference_to(qualified, true);
                quals = CvQualifiers::empty();
            } else {
                break;
            }
        }
        Ok(TypeSpecifier { index, quals })
    }

    fn parse_base_type(&mut self) -> PResult<TypeIndex> {
        use Keyword::*;
        // decltype(expr)
        if self.eat_keyword(Decltype) {
            self.expect_punct(Punct::LParen, "`(` after decltype")?;
            let expr = self.parse_expression()?;
            self.expect_punct(Punct::RParen, "`)` closing decltype")?;
            let span = self.ast.expr(expr).span;
            return match self.ast.expr(expr).ty {
                Some(spec) => Ok(spec.index),
                None => Err((
                    CompileError::type_error(
                        "operand of decltype has no deduced type",
                    ),
                    span,
                )),
            };
        }
        if self.at_keyword(Auto) {
            return self.err("a concrete type (auto is not deduced here)");
        }
        // Elaborated specifier: `struct S`, `enum E`
        if self.at_keyword(Struct) || self.at_keyword(Class) || self.at_keyword(Union) {
            // Only as an elaborated reference if a name follows directly;
            // definitions go through the declaration path.
            if matches!(self.nth_kind(1), TokenKind::Ident)
                && !matches!(self.nth_kind(2), TokenKind::Punct(Punct::LBrace | Punct::Colon))
            {
                self.advance();
                return self.parse_named_type();
            }
        }
        if self.eat_keyword(Enum) {
            return self.parse_named_type();
        }
        if self.eat_keyword(Typename) {
            return self.parse_named_type();
        }

        // Built-in combination
        let mut any_builtin = false;
        let (mut signedness, mut base, mut longs, mut shorts) =
            (None::<bool>, None::<Keyword>, 0u8, 0u8);
        loop {
            let kw = match self.peek_kind() {
                TokenKind::Keyword(kw) => *kw,
                _ => break,
            };
            match kw {
                Signed => signedness = Some(true),
                Unsigned => signedness = Some(false),
                Long => longs += 1,
                Short => shorts += 1,
                Void | Bool | Char | Char8T | Char16T | Char32T | WcharT
                | Int | Float | Double => {
                    if base.is_some() {
                        break;
                    }
                    base = Some(kw);
                }
                _ => break,
            }
            any_builtin = true;
            self.advance();
        }
        if any_builtin {
            let signed = signedness.unwrap_or(true);
            let types = &mut self.ctx.types;
            let index = match base {
                Some(Void) => types.void(),
                Some(Bool) => types.bool_ty(),
                Some(Char) | Some(Char8T) => {
                    types.int(8, signedness.unwrap_or(true))
                }
                Some(Char16T) => types.int(16, false),
                Some(Char32T) | Some(WcharT) => types.int(32, false),
                Some(Float) => types.float(),
                // long double is treated as double
                Some(Double) => types.double(),
                Some(Int) | None => {
                    let width = if longs > 0 {
                        64
                    } else if shorts > 0 {
                        16
                    } else {
                        32
                    };
                    types.int(width, signed)
                }
                Some(other) => {
                    unreachable!("non-type keyword {:?} in base type", other)
                }
            };
            return Ok(index);
        }

        self.parse_named_type()
    }

    /// A user-defined type: template parameter, registered type name, or
    /// class-template instantiation.
    fn parse_named_type(&mut self) -> PResult<TypeIndex> {
        let start = self.here();
        // Single-segment template parameter?
        if let Some(handle) = self.peek_ident() {
            if !matches!(self.nth_kind(1), TokenKind::Punct(Punct::ColonColon)) {
                let mut found = None;
                for frame in self.template_frames.iter().rev() {
                    if let Some(TemplateBinding::Type(index)) = frame.get(handle)
                    {
                        found = Some(*index);
                        break;
                    }
                }
                if let Some(index) = found {
                    self.advance();
                    return Ok(index);
                }
            }
        }
        let (qid, span) = self.parse_qualified_name("a type name")?;
        // Class template instantiation: `Name<args>`
        if self.at_punct(Punct::Less) {
            if let Some(tmpl_qid) = self.find_class_template(qid) {
                let args = self.parse_template_argument_list()?;
                return self.instantiate_class_template(tmpl_qid, args, span);
            }
        }
        self.resolve_type_name(qid, start.merge(span))
    }

    /// Resolve a (possibly unqualified) name to a registered type,
    /// searching enclosing namespaces when the name was written without a
    /// qualifier.
    pub(crate) fn resolve_type_name(
        &mut self,
        qid: QualifiedIdentifier,
        span: Span,
    ) -> PResult<TypeIndex> {
        if let Some(&index) = self.ctx.type_names.get(&qid) {
            return Ok(index);
        }
        let mut ns = self.ctx.namespaces.parent(qid.namespace);
        while let Some(current) = ns {
            let candidate = QualifiedIdentifier::new(current, qid.name);
            if let Some(&index) = self.ctx.type_names.get(&candidate) {
                return Ok(index);
            }
            ns = self.ctx.namespaces.parent(current);
        }
        Err((
            CompileError::lookup(format!(
                "unknown type name `{}`",
                self.ctx.interner.view(qid.name)
            )),
            span,
        ))
    }

    /// Find the qualified name under which a class template matching
    /// `qid` is registered, walking enclosing namespaces.
    pub(crate) fn find_class_template(
        &self,
        qid: QualifiedIdentifier,
    ) -> Option<QualifiedIdentifier> {
        if self.ctx.templates.is_class_template(qid) {
            return Some(qid);
        }
        let mut ns = self.ctx.namespaces.parent(qid.namespace);
        while let Some(current) = ns {
            let candidate = QualifiedIdentifier::new(current, qid.name);
            if self.ctx.templates.is_class_template(candidate) {
                return Some(candidate);
            }
            ns = self.ctx.namespaces.parent(current);
        }
        None
    }

    pub(crate) fn find_function_template(
        &self,
        qid: QualifiedIdentifier,
    ) -> Option<QualifiedIdentifier> {
        if self.ctx.templates.is_function_template(qid) {
            return Some(qid);
        }
        let mut ns = self.ctx.namespaces.parent(qid.namespace);
        while let Some(current) = ns {
            let candidate = QualifiedIdentifier::new(current, qid.name);
            if self.ctx.templates.is_function_template(candidate) {
                return Some(candidate);
            }
            ns = self.ctx.namespaces.parent(current);
        }
        None
    }

    /// Parse `<arg, ...>` where this is known to be a template argument
    /// list (type context). Not speculative.
    pub(crate) fn parse_template_argument_list(
        &mut self,
    ) -> PResult<Vec<TemplateArg>> {
        self.expect_punct(Punct::Less, "`<` opening template arguments")?;
        self.template_arg_depth += 1;
        let result = self.parse_template_args_inner();
        self.template_arg_depth -= 1;
        result
    }

    fn parse_template_args_inner(&mut self) -> PResult<Vec<TemplateArg>> {
        let mut args = Vec::new();
        if self.at_template_close() {
            self.close_template_angle()?;
            return Ok(args);
        }
        loop {
            if self.at_type_start() {
                let spec = self.parse_type()?;
                args.push(TemplateArg::Type(spec));
            } else {
                let expr = self.parse_assignment()?;
                args.push(TemplateArg::Value(expr));
            }
            if self.eat_punct(Punct::Comma) {
                continue;
            }
            self.close_template_angle()?;
            return Ok(args);
        }
    }

    /// Speculative template-argument parse after a `<` in expression
    /// context. Returns `None` (with all state restored) if the tokens do
    /// not form an argument list.
    fn try_parse_template_args(&mut self) -> Option<Vec<TemplateArg>> {
        let saved_pos = self.pos;
        let saved_pending = self.pending_gt;
        let mark = self.ast.mark();
        match self.parse_template_argument_list() {
            Ok(args) => Some(args),
            Err(_) => {
                self.pos = saved_pos;
                self.pending_gt = saved_pending;
                self.ast.rollback(mark);
                None
            }
        }
    }

    // ===== Expressions =====

    /// Full expression including the comma operator.
    pub(crate) fn parse_expression(&mut self) -> PResult<ExprId> {
        self.parse_expr_bp(1)
    }

    /// Assignment-expression: everything except the comma operator. Used
    /// for arguments, initializers, and template arguments.
    pub(crate) fn parse_assignment(&mut self) -> PResult<ExprId> {
        self.parse_expr_bp(2)
    }

    /// Left binding power per operator; `<=>` sits strictly between shift
    /// and the relational operators. Right-associative operators bind
    /// right-hand sides at their own power.
    fn binary_op(p: Punct) -> Option<(BinaryOp, u8, bool)> {
        use BinaryOp::*;
        use Punct as P;
        Some(match p {
            P::Comma => (Comma, 1, false),
            P::Assign => (Assign, 2, true),
            P::PlusAssign => (AddAssign, 2, true),
            P::MinusAssign => (SubAssign, 2, true),
            P::StarAssign => (MulAssign, 2, true),
            P::SlashAssign => (DivAssign, 2, true),
            P::PercentAssign => (RemAssign, 2, true),
            P::ShlAssign => (ShlAssign, 2, true),
            P::ShrAssign => (ShrAssign, 2, true),
            P::AmpAssign => (AndAssign, 2, true),
            P::CaretAssign => (XorAssign, 2, true),
            P::PipeAssign => (OrAssign, 2, true),
            P::PipePipe => (LogicalOr, 4, false),
            P::AmpAmp => (LogicalAnd, 5, false),
            P::Pipe => (BitOr, 6, false),
            P::Caret => (BitXor, 7, false),
            P::Amp => (BitAnd, 8, false),
            P::EqEq => (Eq, 9, false),
            P::NotEq => (Ne, 9, false),
            P::Less => (Lt, 10, false),
            P::Greater => (Gt, 10, false),
            P::LessEq => (Le, 10, false),
            P::GreaterEq => (Ge, 10, false),
            P::Spaceship => (Spaceship, 11, false),
            P::Shl => (Shl, 12, false),
            P::Shr => (Shr, 12, false),
            P::Plus => (Add, 13, false),
            P::Minus => (Sub, 13, false),
            P::Star => (Mul, 14, false),
            P::Slash => (Div, 14, false),
            P::Percent => (Rem, 14, false),
            _ => return None,
        })
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> PResult<ExprId> {
        let mut lhs = self.parse_unary()?;
        loop {
            // Conditional operator, right-associative at power 3
            if min_bp <= 3 && self.at_punct(Punct::Question) {
                self.advance();
                let then_expr = self.parse_assignment()?;
                self.expect_punct(Punct::Colon, "`:` in conditional expression")?;
                let else_expr = self.parse_expr_bp(3)?;
                let span = self
                    .ast
                    .expr(lhs)
                    .span
                    .merge(self.ast.expr(else_expr).span);
                let ty = self.ast.expr(then_expr).ty;
                lhs = self.ast.add_expr(Expr {
                    kind: ExprKind::Conditional {
                        cond: lhs,
                        then_expr,
                        else_expr,
                    },
                    span,
                    ty,
                    category: ValueCategory::PrValue,
                });
                continue;
            }
            let punct = match self.peek_kind() {
                TokenKind::Punct(p) => *p,
                _ => break,
            };
            // Inside template arguments, `>` and `>>` always close
            if self.template_arg_depth > 0
                && matches!(punct, Punct::Greater | Punct::Shr)
            {
                break;
            }
            // `<` after a template name starts an argument list, not a
            // comparison; speculate and fall back.
            if punct == Punct::Less {
                if let Some(new_lhs) = self.try_template_id(lhs)? {
                    lhs = new_lhs;
                    continue;
                }
            }
            let Some((op, lbp, right_assoc)) = Self::binary_op(punct) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(if right_assoc { lbp } else { lbp + 1 })?;
            lhs = self.make_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    /// If `lhs` names a template and a plausible argument list follows,
    /// convert it into a template-id.
    fn try_template_id(&mut self, lhs: ExprId) -> PResult<Option<ExprId>> {
        let (qid, span) = match &self.ast.expr(lhs).kind {
            ExprKind::Ident { qid, decl: None } => (*qid, self.ast.expr(lhs).span),
            _ => return Ok(None),
        };
        let Some(tmpl_qid) = self.find_function_template(qid) else {
            return Ok(None);
        };
        let Some(args) = self.try_parse_template_args() else {
            return Ok(None);
        };
        let resolved =
            self.instantiate_function_template(tmpl_qid, &args, span)?;
        let ty = self.decl_function_type(resolved);
        Ok(Some(self.ast.add_expr(Expr {
            kind: ExprKind::TemplateId {
                base: tmpl_qid,
                args,
                resolved: Some(resolved),
            },
            span,
            ty,
            category: ValueCategory::LValue,
        })))
    }

    fn make_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> PResult<ExprId> {
        let span = self.ast.expr(lhs).span.merge(self.ast.expr(rhs).span);
        let ty = self.binary_result_type(op, lhs, rhs);
        let category = if op.is_assignment() {
            ValueCategory::LValue
        } else {
            ValueCategory::PrValue
        };
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Binary { op, lhs, rhs },
            span,
            ty,
            category,
        }))
    }

    /// Usual arithmetic conversions, reduced to what the backend models.
    fn binary_result_type(
        &mut self,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Option<TypeSpecifier> {
        let lt = self.ast.expr(lhs).ty?;
        let rt = self.ast.expr(rhs).ty?;
        if op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
            return Some(TypeSpecifier::plain(self.ctx.types.bool_ty()));
        }
        if matches!(op, BinaryOp::Spaceship) {
            return Some(TypeSpecifier::plain(self.ctx.types.int(32, true)));
        }
        if op.is_assignment() || matches!(op, BinaryOp::Comma) {
            return Some(if op.is_assignment() { lt } else { rt });
        }
        let li = self.ctx.types.strip_reference(lt.index);
        let ri = self.ctx.types.strip_reference(rt.index);
        // Pointer arithmetic keeps the pointer type
        if matches!(self.ctx.types.get(li).kind, TypeKind::Pointer { .. }) {
            return Some(TypeSpecifier::plain(li));
        }
        if matches!(self.ctx.types.get(ri).kind, TypeKind::Pointer { .. }) {
            return Some(TypeSpecifier::plain(ri));
        }
        let lk = self.ctx.types.get(li).kind.clone();
        let rk = self.ctx.types.get(ri).kind.clone();
        let result = match (&lk, &rk) {
            (TypeKind::Double, _) | (_, TypeKind::Double) => self.ctx.types.double(),
            (TypeKind::Float, _) | (_, TypeKind::Float) => self.ctx.types.float(),
            (
                TypeKind::Int { width: w1, signed: s1 },
                TypeKind::Int { width: w2, signed: s2 },
            ) => {
                let width = (*w1).max(*w2).max(32);
                let signed = if w1 == w2 { *s1 && *s2 } else if w1 > w2 { *s1 } else { *s2 };
                self.ctx.types.int(width, signed)
            }
            (TypeKind::Int { .. }, _) => li,
            _ => ri,
        };
        Some(TypeSpecifier::plain(result))
    }

    fn parse_unary(&mut self) -> PResult<ExprId> {
        let start = self.here();
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::PlusPlus) => Some(UnaryOp::PreInc),
            TokenKind::Punct(Punct::MinusMinus) => Some(UnaryOp::PreDec),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::Star) => Some(UnaryOp::Deref),
            TokenKind::Punct(Punct::Amp) => Some(UnaryOp::AddrOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(self.ast.expr(operand).span);
            let ty = self.unary_result_type(op, operand);
            let category = match op {
                UnaryOp::Deref | UnaryOp::PreInc | UnaryOp::PreDec => {
                    ValueCategory::LValue
                }
                _ => ValueCategory::PrValue,
            };
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::Unary { op, operand },
                span,
                ty,
                category,
            }));
        }
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Sizeof) => self.parse_sizeof(),
            TokenKind::Keyword(Keyword::Alignof) => {
                self.advance();
                self.expect_punct(Punct::LParen, "`(` after alignof")?;
                let spec = self.parse_type()?;
                let end = self.expect_punct(Punct::RParen, "`)` closing alignof")?;
                let u64_ty = self.ctx.types.int(64, false);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::Alignof(spec),
                    span: start.merge(end),
                    ty: Some(TypeSpecifier::plain(u64_ty)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::Keyword(
                Keyword::StaticCast
                | Keyword::ReinterpretCast
                | Keyword::ConstCast
                | Keyword::DynamicCast,
            ) => self.parse_named_cast(),
            TokenKind::Keyword(Keyword::New) => self.parse_new(),
            TokenKind::Keyword(Keyword::Delete) => self.parse_delete(),
            _ => self.parse_postfix(),
        }
    }

    fn unary_result_type(&mut self, op: UnaryOp, operand: ExprId) -> Option<TypeSpecifier> {
        let operand_ty = self.ast.expr(operand).ty?;
        let stripped = self.ctx.types.strip_reference(operand_ty.index);
        match op {
            UnaryOp::Not => Some(TypeSpecifier::plain(self.ctx.types.bool_ty())),
            UnaryOp::AddrOf => {
                Some(TypeSpecifier::plain(self.ctx.types.pointer_to(stripped)))
            }
            UnaryOp::Deref => match self.ctx.types.get(stripped).kind {
                TypeKind::Pointer { pointee } => {
                    Some(TypeSpecifier::plain(pointee))
                }
                TypeKind::Array { element, .. } => {
                    Some(TypeSpecifier::plain(element))
                }
                _ => None,
            },
            _ => Some(TypeSpecifier::plain(stripped)),
        }
    }

    fn parse_sizeof(&mut self) -> PResult<ExprId> {
        let start = self.advance().span();
        let u64_ty = self.ctx.types.int(64, false);
        let u64_spec = Some(TypeSpecifier::plain(u64_ty));
        // sizeof...(pack)
        if self.eat_punct(Punct::Ellipsis) {
            self.expect_punct(Punct::LParen, "`(` after sizeof...")?;
            let (name, _) = self.expect_ident("a parameter pack name")?;
            let end = self.expect_punct(Punct::RParen, "`)` closing sizeof...")?;
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::SizeofPack(name),
                span: start.merge(end),
                ty: u64_spec,
                category: ValueCategory::PrValue,
            }));
        }
        // sizeof(type), only when the parenthesized tokens start a type
        if self.at_punct(Punct::LParen) {
            let saved = self.pos;
            let saved_pending = self.pending_gt;
            self.advance();
            if self.at_type_start() {
                if let Ok(spec) = self.parse_type() {
                    if self.at_punct(Punct::RParen) {
                        let end = self.advance().span();
                        return Ok(self.ast.add_expr(Expr {
                            kind: ExprKind::SizeofType(spec),
                            span: start.merge(end),
                            ty: u64_spec,
                            category: ValueCategory::PrValue,
                        }));
                    }
                }
            }
            self.pos = saved;
            self.pending_gt = saved_pending;
        }
        let operand = self.parse_unary()?;
        let span = start.merge(self.ast.expr(operand).span);
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::SizeofExpr(operand),
            span,
            ty: u64_spec,
            category: ValueCategory::PrValue,
        }))
    }

    fn parse_named_cast(&mut self) -> PResult<ExprId> {
        let token = self.advance();
        let start = token.span();
        let kind = match token.kind {
            TokenKind::Keyword(Keyword::StaticCast) => CastKind::Static,
            TokenKind::Keyword(Keyword::ReinterpretCast) => CastKind::Reinterpret,
            TokenKind::Keyword(Keyword::ConstCast) => CastKind::Const,
            _ => CastKind::Dynamic,
        };
        self.expect_punct(Punct::Less, "`<` after cast keyword")?;
        self.template_arg_depth += 1;
        let target = self.parse_type();
        let close = target.is_ok().then(|| self.close_template_angle());
        self.template_arg_depth -= 1;
        let target = target?;
        close.transpose()?;
        self.expect_punct(Punct::LParen, "`(` in cast expression")?;
        let operand = self.parse_expression()?;
        let end = self.expect_punct(Punct::RParen, "`)` closing cast")?;
        let category = match self.ctx.types.get(target.index).kind {
            TypeKind::Reference { rvalue: false, .. } => ValueCategory::LValue,
            TypeKind::Reference { rvalue: true, .. } => ValueCategory::XValue,
            _ => ValueCategory::PrValue,
        };
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Cast {
                kind,
                target,
                operand,
            },
            span: start.merge(end),
            ty: Some(target),
            category,
        }))
    }

    fn parse_new(&mut self) -> PResult<ExprId> {
        let start = self.advance().span();
        let spec = self.parse_type()?;
        let mut count = None;
        let mut args = Vec::new();
        let mut end = start;
        if self.at_punct(Punct::LBracket) {
            self.advance();
            count = Some(self.parse_expression()?);
            end = self.expect_punct(Punct::RBracket, "`]` in array new")?;
        } else if self.eat_punct(Punct::LParen) {
            if !self.at_punct(Punct::RParen) {
                loop {
                    args.push(self.parse_assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            end = self.expect_punct(Punct::RParen, "`)` closing new arguments")?;
        } else if self.eat_punct(Punct::LBrace) {
            if !self.at_punct(Punct::RBrace) {
                loop {
                    args.push(self.parse_assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            end = self.expect_punct(Punct::RBrace, "`}` closing new initializer")?;
        }
        let ptr = self.ctx.types.pointer_to(spec.index);
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::New {
                ty: spec,
                count,
                args,
            },
            span: start.merge(end),
            ty: Some(TypeSpecifier::plain(ptr)),
            category: ValueCategory::PrValue,
        }))
    }

    fn parse_delete(&mut self) -> PResult<ExprId> {
        let start = self.advance().span();
        let array = if self.eat_punct(Punct::LBracket) {
            self.expect_punct(Punct::RBracket, "`]` in delete[]")?;
            true
        } else {
            false
        };
        let operand = self.parse_unary()?;
        let span = start.merge(self.ast.expr(operand).span);
        let void_ty = self.ctx.types.void();
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Delete { operand, array },
            span,
            ty: Some(TypeSpecifier::plain(void_ty)),
            category: ValueCategory::PrValue,
        }))
    }

    fn parse_postfix(&mut self) -> PResult<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Punct(Punct::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at_punct(Punct::RParen) {
                        loop {
                            args.push(self.parse_assignment()?);
                            if !self.eat_punct(Punct::Comma) {
                                break;
                            }
                        }
                    }
                    let end =
                        self.expect_punct(Punct::RParen, "`)` closing call")?;
                    expr = self.build_call(expr, args, end)?;
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self
                        .expect_punct(Punct::RBracket, "`]` closing subscript")?;
                    let span = self.ast.expr(expr).span.merge(end);
                    let ty = self.subscript_type(expr);
                    expr = self.ast.add_expr(Expr {
                        kind: ExprKind::Subscript {
                            object: expr,
                            index,
                        },
                        span,
                        ty,
                        category: ValueCategory::LValue,
                    });
                }
                TokenKind::Punct(p @ (Punct::Dot | Punct::Arrow)) => {
                    let arrow = *p == Punct::Arrow;
                    self.advance();
                    let (name, name_span) =
                        self.expect_ident("a member name")?;
                    let span = self.ast.expr(expr).span.merge(name_span);
                    let ty = self.member_type(expr, name, arrow, name_span)?;
                    expr = self.ast.add_expr(Expr {
                        kind: ExprKind::Member {
                            object: expr,
                            name,
                            arrow,
                        },
                        span,
                        ty,
                        category: ValueCategory::LValue,
                    });
                }
                TokenKind::Punct(p @ (Punct::PlusPlus | Punct::MinusMinus)) => {
                    let op = if *p == Punct::PlusPlus {
                        UnaryOp::PostInc
                    } else {
                        UnaryOp::PostDec
                    };
                    let end = self.advance().span();
                    let span = self.ast.expr(expr).span.merge(end);
                    let ty = self.ast.expr(expr).ty;
                    expr = self.ast.add_expr(Expr {
                        kind: ExprKind::Unary { op, operand: expr },
                        span,
                        ty,
                        category: ValueCategory::PrValue,
                    });
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn subscript_type(&mut self, object: ExprId) -> Option<TypeSpecifier> {
        let ty = self.ast.expr(object).ty?;
        let stripped = self.ctx.types.strip_reference(ty.index);
        match self.ctx.types.get(stripped).kind {
            TypeKind::Pointer { pointee } => Some(TypeSpecifier::plain(pointee)),
            TypeKind::Array { element, .. } => Some(TypeSpecifier::plain(element)),
            _ => None,
        }
    }

    /// Type of a member access; also checks access control when enabled.
    fn member_type(
        &mut self,
        object: ExprId,
        name: StringHandle,
        arrow: bool,
        span: Span,
    ) -> PResult<Option<TypeSpecifier>> {
        let Some(object_ty) = self.ast.expr(object).ty else {
            return Ok(None);
        };
        let mut index = self.ctx.types.strip_reference(object_ty.index);
        if arrow {
            match self.ctx.types.get(index).kind {
                TypeKind::Pointer { pointee } => index = pointee,
                _ => {
                    return Err((
                        CompileError::type_error(
                            "`->` applied to a non-pointer",
                        ),
                        span,
                    ))
                }
            }
        }
        let TypeKind::Struct(id) = self.ctx.types.get(index).kind else {
            return Err((
                CompileError::type_error(
                    "member access on a non-class type",
                ),
                span,
            ));
        };
        if let Some((member, _)) = self.ctx.types.find_member(id, name) {
            if self.access_control
                && member.access == Access::Private
                && self.current_class != Some(id)
            {
                return Err((
                    CompileError::type_error(format!(
                        "`{}` is a private member",
                        self.ctx.interner.view(name)
                    )),
                    span,
                ));
            }
            return Ok(Some(TypeSpecifier::plain(member.ty)));
        }
        // Member functions type-check at the call site
        if !self.ctx.types.find_methods(id, name).is_empty() {
            return Ok(None);
        }
        Err((
            CompileError::lookup(format!(
                "no member named `{}` in `{}`",
                self.ctx.interner.view(name),
                self.ctx.types.display(index, &self.ctx.interner)
            )),
            span,
        ))
    }

    fn parse_primary(&mut self) -> PResult<ExprId> {
        let start = self.here();
        match self.peek_kind().clone() {
            TokenKind::IntLit {
                value,
                unsigned,
                width,
            } => {
                self.advance();
                let ty = self.ctx.types.int(width as u16, !unsigned);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::IntLit {
                        value,
                        unsigned,
                        width,
                    },
                    span: start,
                    ty: Some(TypeSpecifier::plain(ty)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::FloatLit { value, is_double } => {
                self.advance();
                let ty = if is_double {
                    self.ctx.types.double()
                } else {
                    self.ctx.types.float()
                };
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::FloatLit { value, is_double },
                    span: start,
                    ty: Some(TypeSpecifier::plain(ty)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::CharLit { value } => {
                self.advance();
                let ty = self.ctx.types.int(8, true);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::CharLit(value),
                    span: start,
                    ty: Some(TypeSpecifier::plain(ty)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::StrLit { value } => {
                self.advance();
                let handle = self.ctx.interner.intern(&value);
                let char_ty = self.ctx.types.int(8, true);
                let const_char = self
                    .ctx
                    .types
                    .qualified(char_ty, CvQualifiers::CONST);
                let ptr = self.ctx.types.pointer_to(const_char);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::StrLit(handle),
                    span: start,
                    ty: Some(TypeSpecifier::plain(ptr)),
                    category: ValueCategory::LValue,
                }))
            }
            TokenKind::Keyword(Keyword::True)
            | TokenKind::Keyword(Keyword::False) => {
                let value = self.at_keyword(Keyword::True);
                self.advance();
                let ty = self.ctx.types.bool_ty();
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::BoolLit(value),
                    span: start,
                    ty: Some(TypeSpecifier::plain(ty)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::Keyword(Keyword::Nullptr) => {
                self.advance();
                let void_ty = self.ctx.types.void();
                let ptr = self.ctx.types.pointer_to(void_ty);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::Nullptr,
                    span: start,
                    ty: Some(TypeSpecifier::plain(ptr)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                let Some(class) = self.current_class else {
                    return Err((
                        CompileError::type_error(
                            "`this` outside a member function",
                        ),
                        start,
                    ));
                };
                let class_ty = self.struct_type_index(class);
                let ptr = self.ctx.types.pointer_to(class_ty);
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::This,
                    span: start,
                    ty: Some(TypeSpecifier::plain(ptr)),
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::Keyword(Keyword::Requires) => self.parse_requires(),
            TokenKind::Keyword(Keyword::Throw) => {
                self.err("an expression (throw is only supported as a statement)")
            }
            TokenKind::Punct(Punct::LBracket) => self.parse_lambda(),
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                let mut elems = Vec::new();
                if !self.at_punct(Punct::RBrace) {
                    loop {
                        elems.push(self.parse_assignment()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                let end = self
                    .expect_punct(Punct::RBrace, "`}` closing initializer list")?;
                Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::InitList { elems },
                    span: start.merge(end),
                    ty: None,
                    category: ValueCategory::PrValue,
                }))
            }
            TokenKind::Punct(Punct::LParen) => self.parse_paren_or_fold(),
            TokenKind::Ident => {
                // Type trait intrinsics spell like identifiers
                if let Some(expr) = self.try_parse_type_trait()? {
                    return Ok(expr);
                }
                // A type name in expression position is a constructor call
                // `T(args)` or `T{args}`
                if self.at_type_start() {
                    let before = self.pos;
                    let before_pending = self.pending_gt;
                    if let Ok(spec) = self.parse_type() {
                        if self.at_punct(Punct::LParen) || self.at_punct(Punct::LBrace)
                        {
                            return self.parse_construct(spec, start);
                        }
                    }
                    self.pos = before;
                    self.pending_gt = before_pending;
                }
                self.parse_id_expression()
            }
            TokenKind::Punct(Punct::ColonColon) => self.parse_id_expression(),
            TokenKind::Keyword(
                Keyword::Void
                | Keyword::Bool
                | Keyword::Char
                | Keyword::Short
                | Keyword::Int
                | Keyword::Long
                | Keyword::Signed
                | Keyword::Unsigned
                | Keyword::Float
                | Keyword::Double,
            ) => {
                // Functional cast on a builtin: `int(x)`
                let spec = self.parse_type()?;
                self.parse_construct(spec, start)
            }
            _ => self.err("an expression"),
        }
    }

    fn struct_type_index(&mut self, id: StructId) -> TypeIndex {
        let qid = self.ctx.types.struct_info(id).name;
        *self
            .ctx
            .type_names
            .get(&qid)
            .expect("struct registered without a type name")
    }

    fn parse_construct(&mut self, ty: TypeSpecifier, start: Span) -> PResult<ExprId> {
        let braced = self.at_punct(Punct::LBrace);
        self.advance();
        let close = if braced { Punct::RBrace } else { Punct::RParen };
        let mut args = Vec::new();
        if !self.at_punct(close) {
            loop {
                args.push(self.parse_assignment()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        let end = self.expect_punct(close, "closing of constructor arguments")?;
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Construct { ty, args },
            span: start.merge(end),
            ty: Some(ty),
            category: ValueCategory::PrValue,
        }))
    }

    /// `(expr)`, or a fold expression: `(... op pack)`, `(pack op ...)`,
    /// `(pack op ... op init)`.
    fn parse_paren_or_fold(&mut self) -> PResult<ExprId> {
        let start = self.advance().span(); // (
        // Left fold: `(... op pack)`
        if self.eat_punct(Punct::Ellipsis) {
            let op_punct = match self.peek_kind() {
                TokenKind::Punct(p) => *p,
                _ => return self.err("an operator in fold expression"),
            };
            let Some((op, _, _)) = Self::binary_op(op_punct) else {
                return self.err("an operator in fold expression");
            };
            self.advance();
            let (pack, _) = self.expect_ident("a parameter pack name")?;
            let end =
                self.expect_punct(Punct::RParen, "`)` closing fold expression")?;
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::Fold {
                    op,
                    pack,
                    init: None,
                    fold_left: true,
                },
                span: start.merge(end),
                ty: None,
                category: ValueCategory::PrValue,
            }));
        }
        let inner = self.parse_expression()?;
        // Right fold: `(pack op ... [op init])`
        if let TokenKind::Punct(p) = self.peek_kind() {
            if let Some((op, _, _)) = Self::binary_op(*p) {
                if matches!(self.nth_kind(1), TokenKind::Punct(Punct::Ellipsis)) {
                    let pack = match &self.ast.expr(inner).kind {
                        ExprKind::Ident { qid, .. } => qid.name,
                        _ => {
                            return self
                                .err("a parameter pack in fold expression")
                        }
                    };
                    self.advance(); // op
                    self.advance(); // ...
                    let init = if self.at_punct(Punct::RParen) {
                        None
                    } else {
                        // second operator must match
                        let again = match self.peek_kind() {
                            TokenKind::Punct(p2) => Self::binary_op(*p2),
                            _ => None,
                        };
                        if again.map(|(o, _, _)| o) != Some(op) {
                            return self
                                .err("matching operator in fold expression");
                        }
                        self.advance();
                        Some(self.parse_assignment()?)
                    };
                    let end = self.expect_punct(
                        Punct::RParen,
                        "`)` closing fold expression",
                    )?;
                    return Ok(self.ast.add_expr(Expr {
                        kind: ExprKind::Fold {
                            op,
                            pack,
                            init,
                            fold_left: false,
                        },
                        span: start.merge(end),
                        ty: None,
                        category: ValueCategory::PrValue,
                    }));
                }
            }
        }
        let end = self.expect_punct(Punct::RParen, "`)` closing expression")?;
        // Pack expansion `(pattern)...`
        if self.eat_punct(Punct::Ellipsis) {
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::PackExpansion { pattern: inner },
                span: start.merge(end),
                ty: None,
                category: ValueCategory::PrValue,
            }));
        }
        Ok(inner)
    }

    fn try_parse_type_trait(&mut self) -> PResult<Option<ExprId>> {
        let which = match self.peek().lexeme(self.source) {
            "__is_same" => TypeTrait::IsSame,
            "__is_base_of" => TypeTrait::IsBaseOf,
            "__is_class" => TypeTrait::IsClass,
            "__is_enum" => TypeTrait::IsEnum,
            "__is_union" => TypeTrait::IsUnion,
            "__is_pointer" => TypeTrait::IsPointer,
            "__is_reference" => TypeTrait::IsReference,
            "__is_integral" => TypeTrait::IsIntegral,
            "__is_floating_point" => TypeTrait::IsFloatingPoint,
            "__is_trivially_copyable" => TypeTrait::IsTriviallyCopyable,
            "__is_polymorphic" => TypeTrait::IsPolymorphic,
            _ => return Ok(None),
        };
        let start = self.advance().span();
        self.expect_punct(Punct::LParen, "`(` after type trait")?;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        let end = self.expect_punct(Punct::RParen, "`)` closing type trait")?;
        let bool_ty = self.ctx.types.bool_ty();
        Ok(Some(self.ast.add_expr(Expr {
            kind: ExprKind::TypeTrait { which, args },
            span: start.merge(end),
            ty: Some(TypeSpecifier::plain(bool_ty)),
            category: ValueCategory::PrValue,
        })))
    }

    fn parse_requires(&mut self) -> PResult<ExprId> {
        let start = self.advance().span();
        // Optional parameter list
        let mut params = Vec::new();
        if self.eat_punct(Punct::LParen) {
            if !self.at_punct(Punct::RParen) {
                loop {
                    let ty = self.parse_type()?;
                    let name = if matches!(self.peek_kind(), TokenKind::Ident) {
                        Some(self.expect_ident("a parameter name")?.0)
                    } else {
                        None
                    };
                    params.push((name, ty));
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, "`)` closing requires parameters")?;
        }
        self.expect_punct(Punct::LBrace, "`{` opening requires body")?;
        self.ctx.symbols.push_scope();
        for (name, ty) in &params {
            if let Some(name) = name {
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: QualifiedIdentifier::new(self.current_ns(), *name),
                        ty: *ty,
                        init: None,
                        specs: DeclSpecifiers::default(),
                    },
                    span: start,
                });
                self.ctx.symbols.insert_local(*name, decl);
            }
        }
        // Each requirement parses speculatively; a failure means the whole
        // requires-expression is unsatisfied, not a compile error.
        let mut satisfied = true;
        while !self.at_punct(Punct::RBrace) && !self.at_eof() {
            let saved = self.pos;
            let mark = self.ast.mark();
            let ok = if self.eat_keyword(Keyword::Typename) {
                self.parse_type().is_ok()
            } else {
                self.parse_expression().is_ok()
            };
            if !ok {
                satisfied = false;
                self.pos = saved;
                self.ast.rollback(mark);
                // Skip to the requirement's `;`
                while !self.at_punct(Punct::Semi)
                    && !self.at_punct(Punct::RBrace)
                    && !self.at_eof()
                {
                    self.advance();
                }
            }
            if !self.eat_punct(Punct::Semi) {
                break;
            }
        }
        self.ctx.symbols.pop_scope();
        let end = self.expect_punct(Punct::RBrace, "`}` closing requires body")?;
        let bool_ty = self.ctx.types.bool_ty();
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Requires { satisfied },
            span: start.merge(end),
            ty: Some(TypeSpecifier::plain(bool_ty)),
            category: ValueCategory::PrValue,
        }))
    }

    fn parse_lambda(&mut self) -> PResult<ExprId> {
        let start = self.advance().span(); // [
        // Capture list: only the empty one is supported; anything else is
        // rejected explicitly rather than miscompiled.
        if !self.at_punct(Punct::RBracket) {
            return Err((
                CompileError::type_error(
                    "capturing lambdas are not supported; only `[]` lambdas \
                     can be compiled",
                ),
                start,
            ));
        }
        self.advance(); // ]
        if self.at_punct(Punct::Less) {
            // Open question resolution: template lambdas are rejected, not
            // silently stripped.
            return Err((
                CompileError::Syntax {
                    expected: "a lambda body (template lambdas are not \
                               supported)",
                },
                self.here(),
            ));
        }
        let mut params = Vec::new();
        if self.eat_punct(Punct::LParen) {
            if !self.at_punct(Punct::RParen) {
                loop {
                    let ty = self.parse_type()?;
                    let name = if matches!(self.peek_kind(), TokenKind::Ident) {
                        Some(self.expect_ident("a parameter name")?.0)
                    } else {
                        None
                    };
                    params.push(ParamDecl {
                        name,
                        ty,
                        default: None,
                        span: self.here(),
                    });
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, "`)` closing lambda parameters")?;
        }
        // Optional trailing return type
        let mut ret = None;
        if self.eat_punct(Punct::Arrow) {
            ret = Some(self.parse_type()?);
        }
        let name = self.synth_name("__lambda");
        let qid = QualifiedIdentifier::new(self.current_ns(), name);
        self.ctx.symbols.push_scope();
        let params_clone = params.clone();
        for param in &params_clone {
            if let Some(pname) = param.name {
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: QualifiedIdentifier::new(self.current_ns(), pname),
                        ty: param.ty,
                        init: None,
                        specs: DeclSpecifiers::default(),
                    },
                    span: param.span,
                });
                self.ctx.symbols.insert_local(pname, decl);
            }
        }
        let body = self.parse_compound_statement();
        self.ctx.symbols.pop_scope();
        let body = body?;
        let ret_index = match ret {
            Some(spec) => spec.index,
            None => self.infer_return_type(body),
        };
        let signature = self.ctx.types.intern_signature(FunctionSignature {
            params: params.iter().map(|p| p.ty.index).collect(),
            ret: ret_index,
            variadic: false,
            receiver_quals: CvQualifiers::empty(),
        });
        let end = self.ast.stmt(body).span;
        let fn_decl = self.ast.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: qid,
                signature,
                params,
                body: Some(body),
                specs: DeclSpecifiers {
                    constexpr_kind: ConstexprKind::Constexpr,
                    ..DeclSpecifiers::default()
                },
                method_of: None,
                is_virtual: false,
                is_ctor: false,
                is_dtor: false,
                is_deleted: false,
                is_defaulted: false,
                ctor_inits: Vec::new(),
                instantiated_key: None,
            }),
            span: start.merge(end),
        });
        self.ctx.symbols.insert(qid, fn_decl);
        let fnptr = self
            .ctx
            .types
            .intern_type(TypeKind::FunctionPtr(signature));
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Lambda { fn_decl },
            span: start.merge(end),
            ty: Some(TypeSpecifier::plain(fnptr)),
            category: ValueCategory::PrValue,
        }))
    }

    /// Return type of a body from its first `return expr;`, `void`
    /// otherwise.
    fn infer_return_type(&mut self, body: StmtId) -> TypeIndex {
        fn walk(ast: &Ast, id: StmtId) -> Option<TypeSpecifier> {
            match &ast.stmt(id).kind {
                StmtKind::Return(Some(expr)) => ast.expr(*expr).ty,
                StmtKind::Compound(stmts) => {
                    stmts.iter().find_map(|&s| walk(ast, s))
                }
                StmtKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => walk(ast, *then_branch)
                    .or_else(|| else_branch.and_then(|e| walk(ast, e))),
                StmtKind::While { body, .. }
                | StmtKind::DoWhile { body, .. }
                | StmtKind::For { body, .. } => walk(ast, *body),
                _ => None,
            }
        }
        match walk(&self.ast, body) {
            Some(spec) => spec.index,
            None => self.ctx.types.void(),
        }
    }

    /// An identifier or qualified-id in expression position.
    fn parse_id_expression(&mut self) -> PResult<ExprId> {
        let start = self.here();
        // An explicit qualifier pins the lookup: `ns::f` must resolve in
        // `ns` exactly, with no fallback to enclosing namespaces.
        let explicitly_qualified = self.at_punct(Punct::ColonColon)
            || matches!(self.nth_kind(1), TokenKind::Punct(Punct::ColonColon));
        let (qid, span) = self.parse_qualified_name("an expression")?;
        let span = start.merge(span);
        if explicitly_qualified {
            let found = self
                .ctx
                .symbols
                .lookup_qualified(qid)
                .map(|set| set.clone());
            if let Some(set) = found {
                let decl = if set.len() == 1 { Some(set[0]) } else { None };
                let ty = decl.and_then(|d| self.decl_value_type(d));
                return Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::Ident { qid, decl },
                    span,
                    ty,
                    category: ValueCategory::LValue,
                }));
            }
            if self.find_function_template(qid) == Some(qid) {
                return Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::Ident { qid, decl: None },
                    span,
                    ty: None,
                    category: ValueCategory::LValue,
                }));
            }
            return Err((
                CompileError::lookup(format!(
                    "`{}` is not a member of this namespace",
                    qid.display(&self.ctx.namespaces, &self.ctx.interner)
                )),
                span,
            ));
        }
        // Non-type template parameter?
        if qid.namespace == self.current_ns() {
            for frame in self.template_frames.iter().rev() {
                if let Some(TemplateBinding::Value { ty, substituted }) =
                    frame.get(qid.name)
                {
                    let ty = *ty;
                    return Ok(match substituted {
                        Some(value) => {
                            let value = *value;
                            self.ast.add_expr(Expr {
                                kind: ExprKind::IntLit {
                                    value: value as u64,
                                    unsigned: false,
                                    width: 64,
                                },
                                span,
                                ty: Some(ty),
                                category: ValueCategory::PrValue,
                            })
                        }
                        None => self.ast.add_expr(Expr {
                            kind: ExprKind::Ident { qid, decl: None },
                            span,
                            ty: Some(ty),
                            category: ValueCategory::PrValue,
                        }),
                    });
                }
            }
        }
        // Implicit member access inside a member function
        if let Some(class) = self.current_class {
            if self.ctx.types.find_member(class, qid.name).is_some()
                || !self.ctx.types.find_methods(class, qid.name).is_empty()
            {
                let class_ty = self.struct_type_index(class);
                let ptr = self.ctx.types.pointer_to(class_ty);
                let this = self.ast.add_expr(Expr {
                    kind: ExprKind::This,
                    span,
                    ty: Some(TypeSpecifier::plain(ptr)),
                    category: ValueCategory::PrValue,
                });
                let ty = self.member_type(this, qid.name, true, span)?;
                return Ok(self.ast.add_expr(Expr {
                    kind: ExprKind::Member {
                        object: this,
                        name: qid.name,
                        arrow: true,
                    },
                    span,
                    ty,
                    category: ValueCategory::LValue,
                }));
            }
        }
        // Ordinary lookup: lexical scopes, then the namespace chain
        let found = self
            .ctx
            .symbols
            .lookup_unqualified(qid.name, qid.namespace, &self.ctx.namespaces)
            .map(|(found_qid, set)| (found_qid, set.clone()));
        if let Some((found_qid, set)) = found {
            let decl = if set.len() == 1 { Some(set[0]) } else { None };
            let ty = decl.and_then(|d| self.decl_value_type(d));
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::Ident {
                    qid: found_qid,
                    decl,
                },
                span,
                ty,
                category: ValueCategory::LValue,
            }));
        }
        // Function templates stay unresolved until `<` or the call site
        if self.find_function_template(qid).is_some() {
            return Ok(self.ast.add_expr(Expr {
                kind: ExprKind::Ident { qid, decl: None },
                span,
                ty: None,
                category: ValueCategory::LValue,
            }));
        }
        Err((
            CompileError::lookup(format!(
                "use of undeclared identifier `{}`",
                qid.display(&self.ctx.namespaces, &self.ctx.interner)
            )),
            span,
        ))
    }

    /// The value type an identifier referring to `decl` has.
    pub(crate) fn decl_value_type(&mut self, decl: DeclId) -> Option<TypeSpecifier> {
        match &self.ast.decl(decl).kind {
            DeclKind::Variable { ty, .. } => Some(*ty),
            DeclKind::Function(_) => self.decl_function_type(decl),
            _ => None,
        }
    }

    fn decl_function_type(&mut self, decl: DeclId) -> Option<TypeSpecifier> {
        match &self.ast.decl(decl).kind {
            DeclKind::Function(f) => {
                let sig = f.signature;
                let fnptr =
                    self.ctx.types.intern_type(TypeKind::FunctionPtr(sig));
                Some(TypeSpecifier::plain(fnptr))
            }
            _ => None,
        }
    }

    /// Assemble a call expression, resolving the callee: member function,
    /// overloaded free function (with ADL), function template (with
    /// deduction), or callable value.
    fn build_call(
        &mut self,
        callee: ExprId,
        args: Vec<ExprId>,
        end: Span,
    ) -> PResult<ExprId> {
        let span = self.ast.expr(callee).span.merge(end);
        let arg_types: Vec<Option<TypeSpecifier>> =
            args.iter().map(|&a| self.ast.expr(a).ty).collect();
        let callee_kind = self.ast.expr(callee).kind.clone();
        let mut resolved_callee = callee;
        let ret_ty = match callee_kind {
            ExprKind::Member { object, name, arrow } => {
                let object_ty = self.ast.expr(object).ty;
                let ret = self.resolve_method_call(
                    object_ty, name, arrow, &arg_types, span,
                )?;
                Some(ret)
            }
            ExprKind::Ident { qid, decl } => {
                let decl = match decl {
                    Some(decl) => Some(decl),
                    None => {
                        // Try overload sets then template deduction
                        self.resolve_call_target(qid, &arg_types, span)?
                    }
                };
                if let Some(decl) = decl {
                    // Rewrite the callee with the resolved declaration
                    let ty = self.decl_function_type(decl);
                    let old = self.ast.expr(callee).clone();
                    if let ExprKind::Ident { qid, .. } = old.kind {
                        *self.ast.expr_mut(resolved_callee) = Expr {
                            kind: ExprKind::Ident {
                                qid,
                                decl: Some(decl),
                            },
                            ty,
                            ..old
                        };
                    }
                    self.function_return_type(decl)
                } else {
                    None
                }
            }
            ExprKind::TemplateId {
                resolved: Some(decl),
                ..
            } => self.function_return_type(decl),
            ExprKind::Lambda { fn_decl } => self.function_return_type(fn_decl),
            _ => {
                // Indirect call through a function pointer
                let callee_ty = self.ast.expr(callee).ty;
                callee_ty.and_then(|spec| {
                    let stripped =
                        self.ctx.types.strip_reference(spec.index);
                    match self.ctx.types.get(stripped).kind {
                        TypeKind::FunctionPtr(sig) => Some(TypeSpecifier::plain(
                            self.ctx.types.signature(sig).ret,
                        )),
                        _ => None,
                    }
                })
            }
        };
        let category = match ret_ty {
            Some(spec)
                if matches!(
                    self.ctx.types.get(spec.index).kind,
                    TypeKind::Reference { rvalue: false, .. }
                ) =>
            {
                ValueCategory::LValue
            }
            _ => ValueCategory::PrValue,
        };
        Ok(self.ast.add_expr(Expr {
            kind: ExprKind::Call {
                callee: resolved_callee,
                args,
            },
            span,
            ty: ret_ty,
            category,
        }))
    }

    fn function_return_type(&mut self, decl: DeclId) -> Option<TypeSpecifier> {
        match &self.ast.decl(decl).kind {
            DeclKind::Function(f) => Some(TypeSpecifier::plain(
                self.ctx.types.signature(f.signature).ret,
            )),
            _ => None,
        }
    }

    fn resolve_method_call(
        &mut self,
        object_ty: Option<TypeSpecifier>,
        name: StringHandle,
        arrow: bool,
        arg_types: &[Option<TypeSpecifier>],
        span: Span,
    ) -> PResult<TypeSpecifier> {
        let Some(object_ty) = object_ty else {
            return Err((
                CompileError::type_error("call on an object of unknown type"),
                span,
            ));
        };
        let mut index = self.ctx.types.strip_reference(object_ty.index);
        if arrow {
            if let TypeKind::Pointer { pointee } = self.ctx.types.get(index).kind {
                index = pointee;
            }
        }
        let TypeKind::Struct(id) = self.ctx.types.get(index).kind else {
            return Err((
                CompileError::type_error("member call on a non-class type"),
                span,
            ));
        };
        let methods = self.ctx.types.find_methods(id, name);
        let viable = methods.iter().find(|(_, m)| {
            let sig = self.ctx.types.signature(m.signature);
            sig.params.len() == arg_types.len()
                || (sig.variadic && arg_types.len() >= sig.params.len())
        });
        match viable {
            Some((_, method)) => Ok(TypeSpecifier::plain(
                self.ctx.types.signature(method.signature).ret,
            )),
            None => Err((
                CompileError::lookup(format!(
                    "no matching member function `{}` taking {} argument(s)",
                    self.ctx.interner.view(name),
                    arg_types.len()
                )),
                span,
            )),
        }
    }

    /// Resolve the declaration a call by name targets: overload set (ADL
    /// included) first, then function-template deduction.
    fn resolve_call_target(
        &mut self,
        qid: QualifiedIdentifier,
        arg_types: &[Option<TypeSpecifier>],
        span: Span,
    ) -> PResult<Option<DeclId>> {
        // Namespaces of class-typed arguments, for ADL
        let mut arg_namespaces = Vec::new();
        for ty in arg_types.iter().flatten() {
            let stripped = self.ctx.types.strip_reference(ty.index);
            if let TypeKind::Struct(id) = self.ctx.types.get(stripped).kind {
                arg_namespaces
                    .push(self.ctx.types.struct_info(id).name.namespace);
            }
        }
        let found = self
            .ctx
            .symbols
            .lookup_adl(
                qid.name,
                qid.namespace,
                &arg_namespaces,
                &self.ctx.namespaces,
            )
            .map(|(_, set)| set.clone());
        if let Some(set) = found {
            if let Some(decl) = self.pick_overload(&set, arg_types) {
                return Ok(Some(decl));
            }
            if !set.is_empty() {
                return Err((
                    CompileError::lookup(format!(
                        "no matching overload of `{}` for {} argument(s)",
                        self.ctx.interner.view(qid.name),
                        arg_types.len()
                    )),
                    span,
                ));
            }
        }
        if let Some(tmpl_qid) = self.find_function_template(qid) {
            let decl =
                self.deduce_function_template(tmpl_qid, arg_types, span)?;
            return Ok(Some(decl));
        }
        Err((
            CompileError::lookup(format!(
                "use of undeclared function `{}`",
                qid.display(&self.ctx.namespaces, &self.ctx.interner)
            )),
            span,
        ))
    }

    /// Pick the best overload: exact parameter types beat convertible
    /// ones; full ranking is out of scope.
    fn pick_overload(
        &mut self,
        set: &[DeclId],
        arg_types: &[Option<TypeSpecifier>],
    ) -> Option<DeclId> {
        let mut best: Option<(u32, DeclId)> = None;
        for &decl in set {
            let DeclKind::Function(f) = &self.ast.decl(decl).kind else {
                // A lone variable or alias shadows functions
                if set.len() == 1 {
                    return Some(decl);
                }
                continue;
            };
            let sig = self.ctx.types.signature(f.signature).clone();
            let defaults = f.params.iter().filter(|p| p.default.is_some()).count();
            let min_args = sig.params.len().saturating_sub(defaults);
            let n = arg_types.len();
            if n < min_args || (n > sig.params.len() && !sig.variadic) {
                continue;
            }
            let mut score = 1u32;
            let mut viable = true;
            for (param, arg) in sig.params.iter().zip(arg_types) {
                let Some(arg) = arg else { continue };
                let arg_index = self.ctx.types.strip_reference(arg.index);
                let param_index = self.ctx.types.strip_reference(*param);
                if arg_index == param_index {
                    score += 2;
                } else if self.convertible(arg_index, param_index) {
                    score += 1;
                } else {
                    viable = false;
                    break;
                }
            }
            if !viable {
                continue;
            }
            match best {
                Some((best_score, _)) if best_score >= score => {}
                _ => best = Some((score, decl)),
            }
        }
        best.map(|(_, decl)| decl)
    }

    /// Whether a standard conversion sequence exists (reduced model).
    fn convertible(&mut self, from: TypeIndex, to: TypeIndex) -> bool {
        if from == to {
            return true;
        }
        let from_kind = self.ctx.types.get(from).kind.clone();
        let to_kind = self.ctx.types.get(to).kind.clone();
        match (&from_kind, &to_kind) {
            // Arithmetic conversions
            (a, b)
                if (self.ctx.types.is_integral(from)
                    || matches!(a, TypeKind::Float | TypeKind::Double))
                    && (self.ctx.types.is_integral(to)
                        || matches!(b, TypeKind::Float | TypeKind::Double)) =>
            {
                true
            }
            // Derived* -> Base*, T* -> void*
            (
                TypeKind::Pointer { pointee: from_p },
                TypeKind::Pointer { pointee: to_p },
            ) => {
                if matches!(self.ctx.types.get(*to_p).kind, TypeKind::Void) {
                    return true;
                }
                match (
                    self.ctx.types.get(*from_p).kind.clone(),
                    self.ctx.types.get(*to_p).kind.clone(),
                ) {
                    (TypeKind::Struct(derived), TypeKind::Struct(base)) => {
                        self.ctx.types.is_base_of(base, derived)
                    }
                    _ => *from_p == *to_p,
                }
            }
            // Array decay
            (TypeKind::Array { element, .. }, TypeKind::Pointer { pointee }) => {
                element == pointee
            }
            // Binding a reference
            (_, TypeKind::Reference { referent, .. }) => {
                from == *referent || self.convertible(from, *referent)
            }
            (TypeKind::Reference { referent, .. }, _) => {
                *referent == to || self.convertible(*referent, to)
            }
            _ => false,
        }
    }

    // ===== Statements =====

    pub(crate) fn parse_statement(&mut self) -> PResult<StmtId> {
        let start = self.here();
        match self.peek_kind() {
            TokenKind::Punct(Punct::LBrace) => self.parse_compound_statement(),
            TokenKind::Punct(Punct::Semi) => {
                self.advance();
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Empty,
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::Case) => {
                self.advance();
                let value = self.parse_expression()?;
                self.expect_punct(Punct::Colon, "`:` after case value")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::CaseLabel { value: Some(value) },
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::Default) => {
                self.advance();
                self.expect_punct(Punct::Colon, "`:` after default")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::CaseLabel { value: None },
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.expect_punct(Punct::Semi, "`;` after break")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Break,
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.expect_punct(Punct::Semi, "`;` after continue")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Continue,
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let end =
                    self.expect_punct(Punct::Semi, "`;` after return")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Return(value),
                    span: start.merge(end),
                }))
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let value = if self.at_punct(Punct::Semi) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let end = self.expect_punct(Punct::Semi, "`;` after throw")?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Throw(value),
                    span: start.merge(end),
                }))
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::StaticAssert) => {
                let decl = self.parse_static_assert()?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Decl(decl),
                    span: start,
                }))
            }
            TokenKind::Keyword(Keyword::Using) => {
                let decl = self.parse_using()?;
                Ok(self.ast.add_stmt(Stmt {
                    kind: StmtKind::Decl(decl),
                    span: start,
                }))
            }
            _ => {
                if self.starts_declaration() {
                    let decl = self.parse_local_declaration()?;
                    Ok(self.ast.add_stmt(Stmt {
                        kind: StmtKind::Decl(decl),
                        span: start,
                    }))
                } else {
                    let expr = self.parse_expression()?;
                    let end = self
                        .expect_punct(Punct::Semi, "`;` after expression")?;
                    Ok(self.ast.add_stmt(Stmt {
                        kind: StmtKind::Expr(expr),
                        span: start.merge(end),
                    }))
                }
            }
        }
    }

    /// Heuristic declaration-vs-expression routing for block contexts.
    fn starts_declaration(&mut self) -> bool {
        match self.peek_kind() {
            TokenKind::Keyword(
                Keyword::Const
                | Keyword::Volatile
                | Keyword::Static
                | Keyword::Extern
                | Keyword::Constexpr
                | Keyword::Consteval
                | Keyword::Constinit
                | Keyword::Typedef,
            ) => true,
            _ => {
                if !self.at_type_start() {
                    return false;
                }
                // `T x`, `T* x`, `T& x`, `T x(`, `T x{`, `T x=`: a type
                // followed by an identifier means a declaration. A type
                // followed by `(` is a constructor-style expression.
                let saved = self.pos;
                let saved_pending = self.pending_gt;
                let is_decl = self
                    .parse_type()
                    .map(|_| matches!(self.peek_kind(), TokenKind::Ident))
                    .unwrap_or(false);
                self.pos = saved;
                self.pending_gt = saved_pending;
                is_decl
            }
        }
    }

    pub(crate) fn parse_compound_statement(&mut self) -> PResult<StmtId> {
        let start =
            self.expect_punct(Punct::LBrace, "`{` opening a block")?;
        self.ctx.symbols.push_scope();
        let mut stmts = Vec::new();
        let result = loop {
            if self.at_punct(Punct::RBrace) {
                break Ok(());
            }
            if self.at_eof() {
                break self.err("`}` closing a block");
            }
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(error) => break Err(error),
            }
        };
        self.ctx.symbols.pop_scope();
        result?;
        let end = self.advance().span(); // }
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::Compound(stmts),
            span: start.merge(end),
        }))
    }

    fn parse_if(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        let is_constexpr = self.eat_keyword(Keyword::Constexpr);
        self.expect_punct(Punct::LParen, "`(` after if")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "`)` closing if condition")?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat_keyword(Keyword::Else) {
            Some(self.parse_statement()?)
        } else {
            None
        };
        let end = else_branch.unwrap_or(then_branch);
        let span = start.merge(self.ast.stmt(end).span);
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::If {
                is_constexpr,
                cond,
                then_branch,
                else_branch,
            },
            span,
        }))
    }

    fn parse_while(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        self.expect_punct(Punct::LParen, "`(` after while")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "`)` closing while condition")?;
        let body = self.parse_statement()?;
        let span = start.merge(self.ast.stmt(body).span);
        Ok(self
            .ast
            .add_stmt(Stmt {
                kind: StmtKind::While { cond, body },
                span,
            }))
    }

    fn parse_do_while(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        let body = self.parse_statement()?;
        if !self.eat_keyword(Keyword::While) {
            return self.err("`while` after do body");
        }
        self.expect_punct(Punct::LParen, "`(` after while")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "`)` closing while condition")?;
        let end = self.expect_punct(Punct::Semi, "`;` after do-while")?;
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::DoWhile { body, cond },
            span: start.merge(end),
        }))
    }

    fn parse_for(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        self.expect_punct(Punct::LParen, "`(` after for")?;
        self.ctx.symbols.push_scope();
        let result = self.parse_for_inner(start);
        self.ctx.symbols.pop_scope();
        result
    }

    fn parse_for_inner(&mut self, start: Span) -> PResult<StmtId> {
        // Range-for: `for (type name : range)`
        if self.starts_declaration() {
            let saved = self.pos;
            let saved_pending = self.pending_gt;
            let mark = self.ast.mark();
            if let Ok(ty) = self.parse_type() {
                if let Ok((name, name_span)) = self.expect_ident("a name") {
                    if self.eat_punct(Punct::Colon) {
                        let var = self.ast.add_decl(Decl {
                            kind: DeclKind::Variable {
                                name: QualifiedIdentifier::new(
                                    self.current_ns(),
                                    name,
                                ),
                                ty,
                                init: None,
                                specs: DeclSpecifiers::default(),
                            },
                            span: name_span,
                        });
                        self.ctx.symbols.insert_local(name, var);
                        let range = self.parse_expression()?;
                        self.expect_punct(
                            Punct::RParen,
                            "`)` closing range-for",
                        )?;
                        let body = self.parse_statement()?;
                        let span = start.merge(self.ast.stmt(body).span);
                        return Ok(self.ast.add_stmt(Stmt {
                            kind: StmtKind::RangeFor { var, range, body },
                            span,
                        }));
                    }
                }
            }
            self.pos = saved;
            self.pending_gt = saved_pending;
            self.ast.rollback(mark);
        }
        let init = if self.eat_punct(Punct::Semi) {
            None
        } else if self.starts_declaration() {
            let decl = self.parse_local_declaration()?;
            let span = self.ast.decl(decl).span;
            Some(self.ast.add_stmt(Stmt {
                kind: StmtKind::Decl(decl),
                span,
            }))
        } else {
            let expr = self.parse_expression()?;
            let span = self.ast.expr(expr).span;
            self.expect_punct(Punct::Semi, "`;` after for initializer")?;
            Some(self.ast.add_stmt(Stmt {
                kind: StmtKind::Expr(expr),
                span,
            }))
        };
        let cond = if self.at_punct(Punct::Semi) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::Semi, "`;` after for condition")?;
        let step = if self.at_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen, "`)` closing for header")?;
        let body = self.parse_statement()?;
        let span = start.merge(self.ast.stmt(body).span);
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            span,
        }))
    }

    fn parse_switch(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        self.expect_punct(Punct::LParen, "`(` after switch")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "`)` closing switch condition")?;
        let body = self.parse_compound_statement()?;
        let span = start.merge(self.ast.stmt(body).span);
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::Switch { cond, body },
            span,
        }))
    }

    fn parse_try(&mut self) -> PResult<StmtId> {
        let start = self.advance().span();
        let body = self.parse_compound_statement()?;
        let mut handlers = Vec::new();
        while self.at_keyword(Keyword::Catch) {
            self.advance();
            self.expect_punct(Punct::LParen, "`(` after catch")?;
            let (ty, var) = if self.eat_punct(Punct::Ellipsis) {
                (None, None)
            } else {
                let ty = self.parse_type()?;
                let var = if matches!(self.peek_kind(), TokenKind::Ident) {
                    Some(self.expect_ident("a handler variable")?.0)
                } else {
                    None
                };
                (Some(ty), var)
            };
            self.expect_punct(Punct::RParen, "`)` closing catch declaration")?;
            self.ctx.symbols.push_scope();
            if let (Some(ty), Some(name)) = (ty, var) {
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: QualifiedIdentifier::new(self.current_ns(), name),
                        ty,
                        init: None,
                        specs: DeclSpecifiers::default(),
                    },
                    span: start,
                });
                self.ctx.symbols.insert_local(name, decl);
            }
            let handler_body = self.parse_compound_statement();
            self.ctx.symbols.pop_scope();
            handlers.push(CatchHandler {
                ty,
                var,
                body: handler_body?,
            });
        }
        if handlers.is_empty() {
            return self.err("at least one catch handler after try");
        }
        let last = handlers.last().map(|h| h.body).unwrap_or(body);
        let span = start.merge(self.ast.stmt(last).span);
        Ok(self.ast.add_stmt(Stmt {
            kind: StmtKind::Try { body, handlers },
            span,
        }))
    }

    // ===== Declarations =====

    /// The shared declaration-specifier parse used by both the variable
    /// and the function paths.
    pub(crate) fn parse_decl_specifiers(&mut self) -> DeclSpecifiers {
        let mut specs = DeclSpecifiers::default();
        loop {
            if self.eat_keyword(Keyword::Static) {
                specs.storage = Storage::Static;
            } else if self.at_keyword(Keyword::Extern)
                && !matches!(self.nth_kind(1), TokenKind::StrLit { .. })
            {
                self.advance();
                specs.storage = Storage::Extern;
            } else if self.eat_keyword(Keyword::Inline) {
                specs.inline = true;
            } else if self.eat_keyword(Keyword::Constexpr) {
                specs.constexpr_kind = ConstexprKind::Constexpr;
            } else if self.eat_keyword(Keyword::Consteval) {
                specs.constexpr_kind = ConstexprKind::Consteval;
            } else if self.eat_keyword(Keyword::Constinit) {
                specs.constexpr_kind = ConstexprKind::Constinit;
            } else if self.at_contextual("__cdecl") {
                self.advance();
                specs.calling_conv = CallingConv::Cdecl;
            } else {
                break;
            }
        }
        specs
    }

    fn parse_local_declaration(&mut self) -> PResult<DeclId> {
        let start = self.here();
        let specs = self.parse_decl_specifiers();
        let base = self.parse_type()?;
        let (name, name_span) = self.expect_ident("a variable name")?;
        let mut ty = base;
        // Array declarator
        while self.at_punct(Punct::LBracket) {
            self.advance();
            let length = if self.at_punct(Punct::RBracket) {
                None
            } else {
                let len_expr = self.parse_expression()?;
                Some(self.const_eval_i64(len_expr)? as u64)
            };
            self.expect_punct(Punct::RBracket, "`]` closing array bound")?;
            ty = TypeSpecifier {
                index: self.ctx.types.array_of(ty.index, length),
                quals: ty.quals,
            };
        }
        let init = self.parse_initializer()?;
        let end = self.expect_punct(Punct::Semi, "`;` after declaration")?;
        let qid = QualifiedIdentifier::new(self.current_ns(), name);
        let decl = self.ast.add_decl(Decl {
            kind: DeclKind::Variable {
                name: qid,
                ty,
                init,
                specs,
            },
            span: start.merge(end),
        });
        self.ctx.symbols.insert_local(name, decl);
        // constexpr locals must have constant initializers; validate now
        if specs.constexpr_kind != ConstexprKind::No {
            if let DeclKind::Variable {
                init: Some(Initializer::Expr(expr)),
                ..
            } = self.ast.decl(decl).kind
            {
                Evaluator::new(self.ctx, &self.ast).eval(expr)?;
            }
        }
        let _ = name_span;
        Ok(decl)
    }

    fn parse_initializer(&mut self) -> PResult<Option<Initializer>> {
        if self.eat_punct(Punct::Assign) {
            if self.at_punct(Punct::LBrace) {
                self.advance();
                let mut elems = Vec::new();
                if !self.at_punct(Punct::RBrace) {
                    loop {
                        elems.push(self.parse_assignment()?);
                        if !self.eat_punct(Punct::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punct::RBrace, "`}` closing initializer")?;
                Ok(Some(Initializer::Braced(elems)))
            } else {
                Ok(Some(Initializer::Expr(self.parse_assignment()?)))
            }
        } else if self.at_punct(Punct::LBrace) {
            self.advance();
            let mut elems = Vec::new();
            if !self.at_punct(Punct::RBrace) {
                loop {
                    elems.push(self.parse_assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RBrace, "`}` closing initializer")?;
            Ok(Some(Initializer::Braced(elems)))
        } else if self.at_punct(Punct::LParen) {
            // Constructor-style `T x(args);`
            self.advance();
            let mut elems = Vec::new();
            if !self.at_punct(Punct::RParen) {
                loop {
                    elems.push(self.parse_assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, "`)` closing initializer")?;
            Ok(Some(Initializer::Braced(elems)))
        } else {
            Ok(None)
        }
    }

    fn parse_static_assert(&mut self) -> PResult<DeclId> {
        let start = self.advance().span(); // static_assert
        self.expect_punct(Punct::LParen, "`(` after static_assert")?;
        let cond = self.parse_expression()?;
        let message = if self.eat_punct(Punct::Comma) {
            match self.peek_kind().clone() {
                TokenKind::StrLit { value } => {
                    self.advance();
                    Some(value)
                }
                _ => return self.err("a string literal message"),
            }
        } else {
            None
        };
        self.expect_punct(Punct::RParen, "`)` closing static_assert")?;
        let end = self.expect_punct(Punct::Semi, "`;` after static_assert")?;
        // Evaluate immediately unless template parameters are in scope
        if self.template_frames.is_empty() {
            let cond_span = self.ast.expr(cond).span;
            let value = Evaluator::new(self.ctx, &self.ast)
                .eval(cond)
                .and_then(|v| {
                    v.truthy().ok_or_else(|| {
                        (
                            CompileError::constexpr(
                                "static_assert condition is not a constant \
                                 boolean",
                            ),
                            cond_span,
                        )
                    })
                })?;
            if !value {
                return Err((
                    CompileError::constexpr(match &message {
                        Some(msg) => format!("static assertion failed: {}", msg),
                        None => "static assertion failed".to_string(),
                    }),
                    cond_span,
                ));
            }
        }
        Ok(self.ast.add_decl(Decl {
            kind: DeclKind::StaticAssert { cond, message },
            span: start.merge(end),
        }))
    }

    fn parse_using(&mut self) -> PResult<DeclId> {
        let start = self.advance().span(); // using
        if self.eat_keyword(Keyword::Namespace) {
            let (qid, span) = self.parse_qualified_name("a namespace name")?;
            let target = match self.ctx.namespaces.child(qid.namespace, qid.name)
            {
                Some(ns) => ns,
                None => match self.resolve_scope_segment(qid.name) {
                    Some(ns) => ns,
                    None => {
                        return Err((
                            CompileError::lookup(format!(
                                "unknown namespace `{}`",
                                self.ctx.interner.view(qid.name)
                            )),
                            span,
                        ))
                    }
                },
            };
            let end = self.expect_punct(Punct::Semi, "`;` after using namespace")?;
            self.ctx.symbols.add_using_namespace(target);
            return Ok(self.ast.add_decl(Decl {
                kind: DeclKind::UsingNamespace { target },
                span: start.merge(end),
            }));
        }
        // `using Alias = type;`
        if matches!(self.peek_kind(), TokenKind::Ident)
            && matches!(self.nth_kind(1), TokenKind::Punct(Punct::Assign))
        {
            let (name, _) = self.expect_ident("an alias name")?;
            self.advance(); // =
            let ty = self.parse_type()?;
            let end = self.expect_punct(Punct::Semi, "`;` after alias")?;
            let qid = QualifiedIdentifier::new(self.current_ns(), name);
            self.ctx.type_names.insert(qid, ty.index);
            return Ok(self.ast.add_decl(Decl {
                kind: DeclKind::UsingAlias { name: qid, ty },
                span: start.merge(end),
            }));
        }
        // `using ns::name;`
        let (target, span) = self.parse_qualified_name("a qualified name")?;
        let end = self.expect_punct(Punct::Semi, "`;` after using declaration")?;
        let alias = QualifiedIdentifier::new(self.current_ns(), target.name);
        self.ctx.symbols.insert_alias(alias, target);
        if let Some(&index) = self.ctx.type_names.get(&target) {
            self.ctx.type_names.insert(alias, index);
        }
        let _ = span;
        Ok(self.ast.add_decl(Decl {
            kind: DeclKind::UsingDecl { target },
            span: start.merge(end),
        }))
    }

    fn parse_namespace(&mut self) -> PResult<DeclId> {
        let start = self.advance().span(); // namespace
        let (name, _) = self.expect_ident("a namespace name")?;
        let handle = self.ctx.namespaces.get_or_create(self.current_ns(), name);
        self.expect_punct(Punct::LBrace, "`{` opening namespace body")?;
        self.ns_stack.push(handle);
        let mut decls = Vec::new();
        let result = loop {
            if self.at_punct(Punct::RBrace) {
                break Ok(());
            }
            if self.at_eof() {
                break self.err("`}` closing namespace");
            }
            match self.parse_top_declaration() {
                Ok(Some(decl)) => decls.push(decl),
                Ok(None) => {}
                Err(error) => break Err(error),
            }
        };
        self.ns_stack.pop();
        result?;
        let end = self.advance().span(); // }
        Ok(self.ast.add_decl(Decl {
            kind: DeclKind::Namespace { handle, decls },
            span: start.merge(end),
        }))
    }

    /// One top-level (or namespace-scope) declaration. Returns `None` for
    /// stray semicolons.
    pub(crate) fn parse_top_declaration(&mut self) -> PResult<Option<DeclId>> {
        match self.peek_kind() {
            TokenKind::Punct(Punct::Semi) => {
                self.advance();
                Ok(None)
            }
            TokenKind::Keyword(Keyword::Namespace) => {
                Ok(Some(self.parse_namespace()?))
            }
            TokenKind::Keyword(Keyword::Template) => {
                Ok(Some(self.parse_template_declaration()?))
            }
            TokenKind::Keyword(Keyword::Using) => Ok(Some(self.parse_using()?)),
            TokenKind::Keyword(Keyword::StaticAssert) => {
                Ok(Some(self.parse_static_assert()?))
            }
            TokenKind::Keyword(Keyword::Struct)
            | TokenKind::Keyword(Keyword::Class)
            | TokenKind::Keyword(Keyword::Union)
                if matches!(self.nth_kind(1), TokenKind::Ident)
                    && matches!(
                        self.nth_kind(2),
                        TokenKind::Punct(
                            Punct::LBrace | Punct::Colon | Punct::Semi
                        )
                    ) =>
            {
                Ok(Some(self.parse_class()?))
            }
            TokenKind::Keyword(Keyword::Enum) => Ok(Some(self.parse_enum()?)),
            TokenKind::Keyword(Keyword::Extern)
                if matches!(self.nth_kind(1), TokenKind::StrLit { .. }) =>
            {
                self.parse_linkage_block()
            }
            TokenKind::Keyword(Keyword::Typedef) => {
                let start = self.advance().span();
                let ty = self.parse_type()?;
                let (name, _) = self.expect_ident("a typedef name")?;
                let end = self.expect_punct(Punct::Semi, "`;` after typedef")?;
                let qid = QualifiedIdentifier::new(self.current_ns(), name);
                self.ctx.type_names.insert(qid, ty.index);
                Ok(Some(self.ast.add_decl(Decl {
                    kind: DeclKind::UsingAlias { name: qid, ty },
                    span: start.merge(end),
                })))
            }
            _ => self.parse_function_or_variable(Linkage::Cpp).map(Some),
        }
    }

    fn parse_linkage_block(&mut self) -> PResult<Option<DeclId>> {
        self.advance(); // extern
        let linkage = match self.peek_kind().clone() {
            TokenKind::StrLit { value } if value == "C" => {
                self.advance();
                Linkage::C
            }
            TokenKind::StrLit { .. } => {
                self.advance();
                Linkage::Cpp
            }
            _ => return self.err("a linkage string"),
        };
        if self.eat_punct(Punct::LBrace) {
            let mut last = None;
            while !self.at_punct(Punct::RBrace) && !self.at_eof() {
                if self.eat_punct(Punct::Semi) {
                    continue;
                }
                last = Some(self.parse_function_or_variable(linkage)?);
            }
            self.expect_punct(Punct::RBrace, "`}` closing extern block")?;
            Ok(last)
        } else {
            Ok(Some(self.parse_function_or_variable(linkage)?))
        }
    }

    /// Variable or function declaration/definition at namespace scope.
    /// This is the routing point the declaration dispatcher hands every
    /// type-starting token sequence; discovering `(` after the declarator
    /// name continues into the function path.
    pub(crate) fn parse_function_or_variable(
        &mut self,
        linkage: Linkage,
    ) -> PResult<DeclId> {
        let start = self.here();
        let mut specs = self.parse_decl_specifiers();
        specs.linkage = linkage;
        let is_virtual = self.eat_keyword(Keyword::Virtual);
        let base = self.parse_type()?;
        let (qid, name_span) = self.parse_qualified_name("a declarator name")?;
        if self.at_punct(Punct::LParen) {
            // Function path
            return self.parse_function_definition(
                start, specs, is_virtual, base, qid, name_span,
            );
        }
        // Variable path
        let mut ty = base;
        while self.at_punct(Punct::LBracket) {
            self.advance();
            let length = if self.at_punct(Punct::RBracket) {
                None
            } else {
                let len_expr = self.parse_expression()?;
                Some(self.const_eval_i64(len_expr)? as u64)
            };
            self.expect_punct(Punct::RBracket, "`]` closing array bound")?;
            ty = TypeSpecifier {
                index: self.ctx.types.array_of(ty.index, length),
                quals: ty.quals,
            };
        }
        let init = self.parse_initializer()?;
        let end = self.expect_punct(Punct::Semi, "`;` after declaration")?;
        let decl = self.ast.add_decl(Decl {
            kind: DeclKind::Variable {
                name: qid,
                ty,
                init,
                specs,
            },
            span: start.merge(end),
        });
        self.ctx.symbols.insert(qid, decl);
        if specs.constexpr_kind != ConstexprKind::No {
            if let DeclKind::Variable {
                init: Some(Initializer::Expr(expr)),
                ..
            } = self.ast.decl(decl).kind
            {
                Evaluator::new(self.ctx, &self.ast).eval(expr)?;
            }
        }
        Ok(decl)
    }

    pub(crate) fn parse_params(&mut self) -> PResult<(Vec<ParamDecl>, bool)> {
        self.expect_punct(Punct::LParen, "`(` opening parameters")?;
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.at_punct(Punct::RParen) {
            // `(void)` is an empty parameter list
            if self.at_keyword(Keyword::Void)
                && matches!(self.nth_kind(1), TokenKind::Punct(Punct::RParen))
            {
                self.advance();
            } else {
                loop {
                    if self.eat_punct(Punct::Ellipsis) {
                        variadic = true;
                        break;
                    }
                    let span = self.here();
                    let ty = self.parse_type()?;
                    let name = if matches!(self.peek_kind(), TokenKind::Ident) {
                        Some(self.expect_ident("a parameter name")?.0)
                    } else {
                        None
                    };
                    let default = if self.eat_punct(Punct::Assign) {
                        Some(self.parse_assignment()?)
                    } else {
                        None
                    };
                    params.push(ParamDecl {
                        name,
                        ty,
                        default,
                        span,
                    });
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
        }
        self.expect_punct(Punct::RParen, "`)` closing parameters")?;
        Ok((params, variadic))
    }

    /// Parse from the parameter list of a function declarator onward:
    /// qualifiers, then a body, `= delete`, `= default`, `= 0`, or `;`.
    fn parse_function_definition(
        &mut self,
        start: Span,
        specs: DeclSpecifiers,
        is_virtual: bool,
        ret: TypeSpecifier,
        qid: QualifiedIdentifier,
        name_span: Span,
    ) -> PResult<DeclId> {
        let (params, variadic) = self.parse_params()?;
        let mut receiver_quals = CvQualifiers::empty();
        if self.eat_keyword(Keyword::Const) {
            receiver_quals |= CvQualifiers::CONST;
        }
        if self.eat_keyword(Keyword::Noexcept) {
            if self.eat_punct(Punct::LParen) {
                self.parse_expression()?;
                self.expect_punct(Punct::RParen, "`)` closing noexcept")?;
            }
        }
        let is_override = self.eat_contextual("override");
        self.eat_contextual("final");
        let _ = is_override;

        // Is this an out-of-line member definition? The qualifier names a
        // class scope when the class registered one.
        let method_of = self.class_of_scope(qid.namespace);

        let signature = self.ctx.types.intern_signature(FunctionSignature {
            params: params.iter().map(|p| p.ty.index).collect(),
            ret: ret.index,
            variadic,
            receiver_quals,
        });

        let mut is_deleted = false;
        let mut is_defaulted = false;
        let mut body = None;
        let end;
        if self.eat_punct(Punct::Assign) {
            if self.eat_keyword(Keyword::Delete) {
                is_deleted = true;
            } else if self.eat_keyword(Keyword::Default) {
                is_defaulted = true;
            } else if matches!(
                self.peek_kind(),
                TokenKind::IntLit { value: 0, .. }
            ) {
                // pure virtual
                self.advance();
            } else {
                return self.err("`delete`, `default`, or `0`");
            }
            end = self.expect_punct(Punct::Semi, "`;` after declaration")?;
        } else if self.at_punct(Punct::LBrace) {
            // Definition: parameters go into a fresh scope
            self.ctx.symbols.push_scope();
            let saved_class = self.current_class;
            if method_of.is_some() {
                self.current_class = method_of;
            }
            for param in &params {
                if let Some(pname) = param.name {
                    let decl = self.ast.add_decl(Decl {
                        kind: DeclKind::Variable {
                            name: QualifiedIdentifier::new(
                                self.current_ns(),
                                pname,
                            ),
                            ty: param.ty,
                            init: None,
                            specs: DeclSpecifiers::default(),
                        },
                        span: param.span,
                    });
                    self.ctx.symbols.insert_local(pname, decl);
                }
            }
            let parsed = self.parse_compound_statement();
            self.current_class = saved_class;
            self.ctx.symbols.pop_scope();
            let parsed = parsed?;
            end = self.ast.stmt(parsed).span;
            body = Some(parsed);
        } else {
            end = self.expect_punct(Punct::Semi, "`;` after declaration")?;
        }

        let decl = self.ast.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: qid,
                signature,
                params,
                body,
                specs,
                method_of,
                is_virtual,
                is_ctor: false,
                is_dtor: false,
                is_deleted,
                is_defaulted,
                ctor_inits: Vec::new(),
                instantiated_key: None,
            }),
            span: start.merge(end),
        });
        self.ctx.symbols.insert(qid, decl);
        // Out-of-line definition completes the in-class declaration
        if let Some(struct_id) = method_of {
            self.attach_out_of_line_body(struct_id, qid.name, signature, decl);
        }
        let _ = name_span;
        Ok(decl)
    }

    /// If `scope` is the namespace entry registered for a class, return
    /// that class.
    fn class_of_scope(&mut self, scope: NamespaceHandle) -> Option<StructId> {
        if scope == self.current_ns() {
            return None;
        }
        let parent = self.ctx.namespaces.parent(scope)?;
        let name = self.ctx.namespaces.local_name(scope);
        let qid = QualifiedIdentifier::new(parent, name);
        let &index = self.ctx.type_names.get(&qid)?;
        match self.ctx.types.get(index).kind {
            TypeKind::Struct(id) => Some(id),
            _ => None,
        }
    }

    fn attach_out_of_line_body(
        &mut self,
        struct_id: StructId,
        name: StringHandle,
        signature: SignatureId,
        decl: DeclId,
    ) {
        let body = match &self.ast.decl(decl).kind {
            DeclKind::Function(f) => f.body,
            _ => None,
        };
        let info = self.ctx.types.struct_info_mut(struct_id);
        if let Some(method) = info
            .methods
            .iter_mut()
            .find(|m| m.name == name && m.signature == signature)
        {
            method.decl = decl;
            if let Some(body) = body {
                method.body = MethodBody::Parsed(body);
            }
        }
    }
}

// ===== Classes, enums, and template declarations =====

impl<'a> Parser<'a> {
    /// Parse a class/struct/union definition (or forward declaration).
    /// The class registers a namespace scope of its own, so member
    /// functions get fully qualified identifiers.
    pub(crate) fn parse_class(&mut self) -> PResult<DeclId> {
        let start = self.here();
        let keyword = match self.peek_kind() {
            TokenKind::Keyword(k @ (Keyword::Struct | Keyword::Class | Keyword::Union)) => *k,
            _ => return self.err("struct, class, or union"),
        };
        self.advance();
        let is_union = keyword == Keyword::Union;
        let default_access = if keyword == Keyword::Class {
            Access::Private
        } else {
            Access::Public
        };
        let (name, _name_span) = self.expect_ident("a class name")?;
        let class_qid = QualifiedIdentifier::new(self.current_ns(), name);
        let class_ns = self.ctx.namespaces.get_or_create(self.current_ns(), name);

        // Forward declaration
        if self.at_punct(Punct::Semi) {
            let end = self.advance().span();
            let (id, ty) = match self.ctx.type_names.get(&class_qid) {
                Some(&existing) => match self.ctx.types.get(existing).kind {
                    TypeKind::Struct(id) => (id, existing),
                    _ => {
                        return Err((
                            CompileError::type_error(format!(
                                "`{}` redeclared as a different kind of type",
                                self.ctx.interner.view(name)
                            )),
                            start,
                        ))
                    }
                },
                None => {
                    let (id, ty) = self
                        .ctx
                        .types
                        .add_struct(StructInfo::new(class_qid, is_union));
                    self.ctx.type_names.insert(class_qid, ty);
                    (id, ty)
                }
            };
            return Ok(self.ast.add_decl(Decl {
                kind: DeclKind::Struct { id, ty },
                span: start.merge(end),
            }));
        }

        // Definition: reuse a forward declaration if one exists
        let (id, ty) = match self.ctx.type_names.get(&class_qid).copied() {
            Some(existing) => match self.ctx.types.get(existing).kind {
                TypeKind::Struct(id)
                    if !self.ctx.types.struct_info(id).is_complete =>
                {
                    self.ctx.types.struct_info_mut(id).is_union = is_union;
                    (id, existing)
                }
                _ => {
                    return Err((
                        CompileError::type_error(format!(
                            "redefinition of `{}`",
                            self.ctx.interner.view(name)
                        )),
                        start,
                    ))
                }
            },
            None => {
                let (id, ty) = self
                    .ctx
                    .types
                    .add_struct(StructInfo::new(class_qid, is_union));
                self.ctx.type_names.insert(class_qid, ty);
                (id, ty)
            }
        };

        self.eat_contextual("final");

        // Base-class list
        if self.eat_punct(Punct::Colon) {
            loop {
                let mut access = default_access;
                let mut is_virtual = false;
                loop {
                    if self.eat_keyword(Keyword::Public) {
                        access = Access::Public;
                    } else if self.eat_keyword(Keyword::Protected) {
                        access = Access::Protected;
                    } else if self.eat_keyword(Keyword::Private) {
                        access = Access::Private;
                    } else if self.eat_keyword(Keyword::Virtual) {
                        is_virtual = true;
                    } else {
                        break;
                    }
                }
                let base_span = self.here();
                let base = self.parse_type()?;
                if !matches!(
                    self.ctx.types.get(base.index).kind,
                    TypeKind::Struct(_) | TypeKind::TemplateParam { .. }
                ) {
                    return Err((
                        CompileError::type_error(
                            "base specifier is not a class type",
                        ),
                        base_span,
                    ));
                }
                self.ctx.types.struct_info_mut(id).bases.push(BaseClass {
                    ty: base.index,
                    access,
                    is_virtual,
                    offset: 0,
                });
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }

        self.expect_punct(Punct::LBrace, "`{` opening class body")?;
        let in_template = !self.template_frames.is_empty();
        let mut access = default_access;
        loop {
            if self.at_punct(Punct::RBrace) {
                break;
            }
            if self.at_eof() {
                return self.err("`}` closing class body");
            }
            // Access labels
            if self.at_keyword(Keyword::Public)
                || self.at_keyword(Keyword::Protected)
                || self.at_keyword(Keyword::Private)
            {
                access = if self.eat_keyword(Keyword::Public) {
                    Access::Public
                } else if self.eat_keyword(Keyword::Protected) {
                    Access::Protected
                } else {
                    self.advance();
                    Access::Private
                };
                self.expect_punct(Punct::Colon, "`:` after access specifier")?;
                continue;
            }
            if self.at_keyword(Keyword::StaticAssert) {
                self.parse_static_assert()?;
                continue;
            }
            if self.at_keyword(Keyword::Using) {
                self.ns_stack.push(class_ns);
                let result = self.parse_using();
                self.ns_stack.pop();
                result?;
                continue;
            }
            if self.at_keyword(Keyword::Friend) {
                // Friendship is accepted and ignored by access checking
                while !self.at_punct(Punct::Semi) && !self.at_eof() {
                    self.advance();
                }
                self.expect_punct(Punct::Semi, "`;` after friend declaration")?;
                continue;
            }
            // Nested types
            if (self.at_keyword(Keyword::Struct)
                || self.at_keyword(Keyword::Class)
                || self.at_keyword(Keyword::Union))
                && matches!(self.nth_kind(1), TokenKind::Ident)
                && matches!(
                    self.nth_kind(2),
                    TokenKind::Punct(Punct::LBrace | Punct::Colon | Punct::Semi)
                )
            {
                self.ns_stack.push(class_ns);
                let result = self.parse_class();
                self.ns_stack.pop();
                result?;
                continue;
            }
            if self.at_keyword(Keyword::Enum) {
                self.ns_stack.push(class_ns);
                let result = self.parse_enum();
                self.ns_stack.pop();
                result?;
                continue;
            }
            self.parse_member(id, ty, class_ns, name, access, in_template)?;
        }
        self.advance(); // }
        let end = self.expect_punct(Punct::Semi, "`;` after class body")?;

        if !in_template {
            // All bases and members are known: compute the layout, then
            // parse the member bodies that were deferred until now.
            self.ctx.types.layout_struct(id, ty);
            self.parse_pending_bodies(id, class_ns)?;
        }

        Ok(self.ast.add_decl(Decl {
            kind: DeclKind::Struct { id, ty },
            span: start.merge(end),
        }))
    }

    /// One member declaration: field, static member, method, constructor,
    /// or destructor.
    fn parse_member(
        &mut self,
        struct_id: StructId,
        class_ty: TypeIndex,
        class_ns: NamespaceHandle,
        class_name: StringHandle,
        access: Access,
        in_template: bool,
    ) -> PResult<()> {
        let start = self.here();
        let specs = self.parse_decl_specifiers();
        let is_static = specs.storage == Storage::Static;
        let is_virtual = self.eat_keyword(Keyword::Virtual);
        self.eat_keyword(Keyword::Explicit);
        self.eat_keyword(Keyword::Mutable);

        // Destructor: `~Name() ...`
        if self.eat_punct(Punct::Tilde) {
            let (dtor_name, _) = self.expect_ident("the class name after `~`")?;
            if dtor_name != class_name {
                return self.err("the class name after `~`");
            }
            let void_ty = self.ctx.types.void();
            let handle = {
                let text = format!("~{}", self.ctx.interner.view(class_name));
                self.ctx.interner.intern(&text)
            };
            self.ctx.types.struct_info_mut(struct_id).has_user_destructor = true;
            return self.parse_method_rest(
                struct_id,
                class_ty,
                class_ns,
                handle,
                TypeSpecifier::plain(void_ty),
                specs,
                is_virtual,
                is_static,
                access,
                false,
                true,
                in_template,
                start,
            );
        }

        // Constructor: `Name(...)` where Name is the class
        if let Some(handle) = self.peek_ident() {
            if handle == class_name
                && matches!(self.nth_kind(1), TokenKind::Punct(Punct::LParen))
            {
                self.advance();
                let void_ty = self.ctx.types.void();
                return self.parse_method_rest(
                    struct_id,
                    class_ty,
                    class_ns,
                    handle,
                    TypeSpecifier::plain(void_ty),
                    specs,
                    false,
                    false,
                    access,
                    true,
                    false,
                    in_template,
                    start,
                );
            }
        }

        let member_ty = self.parse_type()?;
        let (name, _) = self.expect_ident("a member name")?;

        if self.at_punct(Punct::LParen) {
            return self.parse_method_rest(
                struct_id,
                class_ty,
                class_ns,
                name,
                member_ty,
                specs,
                is_virtual,
                is_static,
                access,
                false,
                false,
                in_template,
                start,
            );
        }

        // Static data member
        if is_static {
            let init = self.parse_initializer()?;
            self.expect_punct(Punct::Semi, "`;` after static member")?;
            let qid = QualifiedIdentifier::new(class_ns, name);
            let decl = self.ast.add_decl(Decl {
                kind: DeclKind::Variable {
                    name: qid,
                    ty: member_ty,
                    init,
                    specs,
                },
                span: start,
            });
            self.ctx.symbols.insert(qid, decl);
            self.ctx.types.struct_info_mut(struct_id).statics.push(
                StaticMember {
                    name,
                    ty: member_ty.index,
                    decl,
                },
            );
            return Ok(());
        }

        // Non-static data member, possibly a bit-field, possibly with an
        // array bound.
        let mut ty_index = member_ty.index;
        while self.at_punct(Punct::LBracket) {
            self.advance();
            let len_expr = self.parse_expression()?;
            let length = self.const_eval_i64(len_expr)? as u64;
            self.expect_punct(Punct::RBracket, "`]` closing array bound")?;
            ty_index = self.ctx.types.array_of(ty_index, Some(length));
        }
        let bit_width = if self.eat_punct(Punct::Colon) {
            let width_expr = self.parse_expression()?;
            Some(self.const_eval_i64(width_expr)? as u32)
        } else {
            None
        };
        if self.eat_punct(Punct::Assign) {
            // Default member initializers are parsed but not applied; the
            // constant evaluator reports reads of such members instead of
            // inventing values.
            self.parse_assignment()?;
            log::warn!(
                "default member initializer on `{}` is ignored",
                self.ctx.interner.view(name)
            );
        }
        self.expect_punct(Punct::Semi, "`;` after member")?;
        let qualified = self.ctx.types.qualified(ty_index, member_ty.quals);
        self.ctx.types.struct_info_mut(struct_id).members.push(Member {
            name,
            ty: qualified,
            bit_offset: 0,
            bit_width,
            access,
        });
        Ok(())
    }

    /// Common tail of every member-function parse: parameters, qualifiers,
    /// constructor initializers, then the body handling. In-class bodies
    /// are remembered as token ranges and parsed after the class is
    /// complete (or at instantiation for class templates).
    #[allow(clippy::too_many_arguments)]
    fn parse_method_rest(
        &mut self,
        struct_id: StructId,
        class_ty: TypeIndex,
        class_ns: NamespaceHandle,
        name: StringHandle,
        ret: TypeSpecifier,
        specs: DeclSpecifiers,
        is_virtual: bool,
        is_static: bool,
        access: Access,
        is_ctor: bool,
        is_dtor: bool,
        in_template: bool,
        start: Span,
    ) -> PResult<()> {
        let (params, variadic) = self.parse_params()?;
        let mut receiver_quals = CvQualifiers::empty();
        if self.eat_keyword(Keyword::Const) {
            receiver_quals |= CvQualifiers::CONST;
        }
        if self.eat_keyword(Keyword::Noexcept) {
            if self.eat_punct(Punct::LParen) {
                self.parse_expression()?;
                self.expect_punct(Punct::RParen, "`)` closing noexcept")?;
            }
        }
        self.eat_contextual("override");
        self.eat_contextual("final");

        // Constructor member-initializer list. Parameter names are bound
        // so initializer arguments can reference them.
        let mut ctor_inits = Vec::new();
        if is_ctor && self.at_punct(Punct::Colon) {
            self.advance();
            self.ctx.symbols.push_scope();
            let saved_class = self.current_class;
            self.current_class = Some(struct_id);
            for param in &params {
                if let Some(pname) = param.name {
                    let decl = self.ast.add_decl(Decl {
                        kind: DeclKind::Variable {
                            name: QualifiedIdentifier::new(class_ns, pname),
                            ty: param.ty,
                            init: None,
                            specs: DeclSpecifiers::default(),
                        },
                        span: param.span,
                    });
                    self.ctx.symbols.insert_local(pname, decl);
                }
            }
            let inits = (|| -> PResult<Vec<(StringHandle, Vec<ExprId>)>> {
                let mut inits = Vec::new();
                loop {
                    let (member, _) = self.expect_ident("a member name")?;
                    let braced = self.at_punct(Punct::LBrace);
                    if !braced {
                        self.expect_punct(
                            Punct::LParen,
                            "`(` in member initializer",
                        )?;
                    } else {
                        self.advance();
                    }
                    let close = if braced { Punct::RBrace } else { Punct::RParen };
                    let mut args = Vec::new();
                    if !self.at_punct(close) {
                        loop {
                            args.push(self.parse_assignment()?);
                            if !self.eat_punct(Punct::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect_punct(close, "closing of member initializer")?;
                    inits.push((member, args));
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                Ok(inits)
            })();
            self.current_class = saved_class;
            self.ctx.symbols.pop_scope();
            ctor_inits = inits?;
        }

        let signature = self.ctx.types.intern_signature(FunctionSignature {
            params: params.iter().map(|p| p.ty.index).collect(),
            ret: ret.index,
            variadic,
            receiver_quals,
        });

        let mut body_state = MethodBody::None;
        let mut is_deleted = false;
        let mut is_defaulted = false;
        if self.eat_punct(Punct::Assign) {
            if self.eat_keyword(Keyword::Delete) {
                is_deleted = true;
            } else if self.eat_keyword(Keyword::Default) {
                is_defaulted = true;
            } else if matches!(self.peek_kind(), TokenKind::IntLit { value: 0, .. }) {
                self.advance(); // pure virtual
            } else {
                return self.err("`delete`, `default`, or `0`");
            }
            self.expect_punct(Punct::Semi, "`;` after member declaration")?;
        } else if self.at_punct(Punct::LBrace) {
            let range = self.skip_balanced_braces()?;
            body_state = MethodBody::Deferred {
                start: range.0,
                end: range.1,
            };
        } else {
            self.expect_punct(Punct::Semi, "`;` after member declaration")?;
        }

        let qid = QualifiedIdentifier::new(class_ns, name);
        let decl = self.ast.add_decl(Decl {
            kind: DeclKind::Function(FunctionDecl {
                name: qid,
                signature,
                params,
                body: None,
                specs,
                method_of: Some(struct_id),
                is_virtual,
                is_ctor,
                is_dtor,
                is_deleted,
                is_defaulted,
                ctor_inits,
                instantiated_key: None,
            }),
            span: start.merge(self.here()),
        });
        self.ctx.symbols.insert(qid, decl);
        let method_index = self.ctx.types.struct_info(struct_id).methods.len();
        self.ctx.types.struct_info_mut(struct_id).methods.push(MethodInfo {
            name,
            decl,
            signature,
            access,
            is_virtual,
            is_static,
            is_ctor,
            is_dtor,
            vtable_slot: None,
            body: body_state.clone(),
        });
        if let MethodBody::Deferred { start, end } = body_state {
            if !in_template {
                self.pending_bodies.push(PendingBody {
                    struct_id,
                    method_index,
                    decl,
                    range: (start, end),
                    class_ns,
                });
            }
        }
        let _ = class_ty;
        Ok(())
    }

    /// Record the token range of a `{...}` block without parsing it.
    /// Returns indices `[start, end)` such that `start` is the `{` token.
    pub(crate) fn skip_balanced_braces(&mut self) -> PResult<(usize, usize)> {
        let start = self.pos;
        self.expect_punct(Punct::LBrace, "`{` opening a body")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.at_eof() {
                return self.err("`}` closing a body");
            }
            match self.peek_kind() {
                TokenKind::Punct(Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RBrace) => depth -= 1,
                _ => {}
            }
            self.advance();
        }
        Ok((start, self.pos))
    }

    /// Parse the member-function bodies deferred while `struct_id`'s body
    /// was open. The class is complete by now, so members declared after a
    /// method still resolve.
    fn parse_pending_bodies(
        &mut self,
        struct_id: StructId,
        class_ns: NamespaceHandle,
    ) -> PResult<()> {
        let pending: Vec<PendingBody> = {
            let mut taken = Vec::new();
            let mut index = 0;
            while index < self.pending_bodies.len() {
                if self.pending_bodies[index].struct_id == struct_id {
                    taken.push(self.pending_bodies.remove(index));
                } else {
                    index += 1;
                }
            }
            taken
        };
        for body in pending {
            self.parse_deferred_method_body(&body)?;
        }
        Ok(())
    }

    pub(crate) fn parse_deferred_method_body(
        &mut self,
        pending: &PendingBody,
    ) -> PResult<()> {
        let saved_pos = self.pos;
        self.pos = pending.range.0;
        let saved_class = self.current_class;
        self.current_class = Some(pending.struct_id);
        self.ctx.symbols.push_scope();
        let params = match &self.ast.decl(pending.decl).kind {
            DeclKind::Function(f) => f.params.clone(),
            _ => Vec::new(),
        };
        for param in &params {
            if let Some(pname) = param.name {
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: QualifiedIdentifier::new(pending.class_ns, pname),
                        ty: param.ty,
                        init: None,
                        specs: DeclSpecifiers::default(),
                    },
                    span: param.span,
                });
                self.ctx.symbols.insert_local(pname, decl);
            }
        }
        let parsed = self.parse_compound_statement();
        self.ctx.symbols.pop_scope();
        self.current_class = saved_class;
        self.pos = saved_pos;
        let parsed = parsed?;
        if let DeclKind::Function(f) = &mut self.ast.decl_mut(pending.decl).kind
        {
            f.body = Some(parsed);
        }
        let info = self.ctx.types.struct_info_mut(pending.struct_id);
        if let Some(method) = info.methods.get_mut(pending.method_index) {
            method.body = MethodBody::Parsed(parsed);
        }
        Ok(())
    }

    // ===== Enums =====

    pub(crate) fn parse_enum(&mut self) -> PResult<DeclId> {
        let start = self.advance().span(); // enum
        let scoped = self.eat_keyword(Keyword::Class)
            || self.eat_keyword(Keyword::Struct);
        let (name, _) = self.expect_ident("an enum name")?;
        let underlying = if self.eat_punct(Punct::Colon) {
            self.parse_type()?.index
        } else {
            self.ctx.types.int(32, true)
        };
        let qid = QualifiedIdentifier::new(self.current_ns(), name);

        self.expect_punct(Punct::LBrace, "`{` opening enum body")?;
        let value_ns = if scoped {
            self.ctx.namespaces.get_or_create(self.current_ns(), name)
        } else {
            self.current_ns()
        };
        let mut enumerators = Vec::new();
        let mut next_value: i64 = 0;
        while !self.at_punct(Punct::RBrace) {
            let (enum_name, enum_span) = self.expect_ident("an enumerator")?;
            let value = if self.eat_punct(Punct::Assign) {
                let expr = self.parse_assignment()?;
                self.const_eval_i64(expr)?
            } else {
                next_value
            };
            next_value = value + 1;
            enumerators.push((enum_name, value));
            // Enumerators are constants: later initializers and constant
            // expressions can reference them by name.
            let value_expr = self.ast.add_expr(Expr {
                kind: ExprKind::IntLit {
                    value: value as u64,
                    unsigned: false,
                    width: 32,
                },
                span: enum_span,
                ty: Some(TypeSpecifier::plain(underlying)),
                category: ValueCategory::PrValue,
            });
            let value_qid = QualifiedIdentifier::new(value_ns, enum_name);
            let decl = self.ast.add_decl(Decl {
                kind: DeclKind::Variable {
                    name: value_qid,
                    ty: TypeSpecifier::with_const(underlying),
                    init: Some(Initializer::Expr(value_expr)),
                    specs: DeclSpecifiers {
                        constexpr_kind: ConstexprKind::Constexpr,
                        ..DeclSpecifiers::default()
                    },
                },
                span: enum_span,
            });
            self.ctx.symbols.insert(value_qid, decl);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RBrace, "`}` closing enum body")?;
        let end = self.expect_punct(Punct::Semi, "`;` after enum")?;

        let (id, ty) = self.ctx.types.add_enum(EnumInfo {
            name: qid,
            underlying,
            scoped,
            enumerators,
        });
        self.ctx.type_names.insert(qid, ty);
        Ok(self.ast.add_decl(Decl {
            kind: DeclKind::Enum { id, ty },
            span: start.merge(end),
        }))
    }

    // ===== Template declarations =====

    /// `template <params> declaration`: pushes a parameter frame, parses
    /// the pattern, and registers it. Function-template bodies and
    /// variable-template initializers are recorded as token ranges and
    /// reparsed at instantiation time.
    pub(crate) fn parse_template_declaration(&mut self) -> PResult<DeclId> {
        let start = self.advance().span(); // template
        self.expect_punct(Punct::Less, "`<` after template")?;
        self.template_arg_depth += 1;
        let params = self.parse_template_parameters();
        self.template_arg_depth -= 1;
        let params = params?;

        let mut frame = TemplateFrame::default();
        for param in &params {
            let binding = match &param.kind {
                TemplateParamKind::Type | TemplateParamKind::TypePack => {
                    TemplateBinding::Type(param.placeholder)
                }
                TemplateParamKind::NonType { ty } => TemplateBinding::Value {
                    ty: *ty,
                    substituted: None,
                },
            };
            frame.bindings.push((param.name, binding));
        }
        self.template_frames.push(frame);
        let result = self.parse_template_pattern(start, params);
        self.template_frames.pop();
        result
    }

    fn parse_template_parameters(&mut self) -> PResult<Vec<TemplateParamDecl>> {
        let mut params = Vec::new();
        if self.at_template_close() {
            self.close_template_angle()?;
            return Ok(params);
        }
        let mut slot: u16 = 0;
        loop {
            if self.eat_keyword(Keyword::Typename) || self.eat_keyword(Keyword::Class) {
                let pack = self.eat_punct(Punct::Ellipsis);
                let (name, _) = self.expect_ident("a template parameter name")?;
                let placeholder = self.ctx.types.add_template_param(slot);
                let default = if self.eat_punct(Punct::Assign) {
                    Some(TemplateArg::Type(self.parse_type()?))
                } else {
                    None
                };
                params.push(TemplateParamDecl {
                    name,
                    kind: if pack {
                        TemplateParamKind::TypePack
                    } else {
                        TemplateParamKind::Type
                    },
                    placeholder,
                    default,
                });
            } else {
                // Non-type parameter: `type name [= default]`
                let ty = self.parse_type()?;
                let (name, _) = self.expect_ident("a template parameter name")?;
                let placeholder = self.ctx.types.add_template_param(slot);
                let default = if self.eat_punct(Punct::Assign) {
                    Some(TemplateArg::Value(self.parse_assignment()?))
                } else {
                    None
                };
                params.push(TemplateParamDecl {
                    name,
                    kind: TemplateParamKind::NonType { ty },
                    placeholder,
                    default,
                });
            }
            slot += 1;
            if self.eat_punct(Punct::Comma) {
                continue;
            }
            self.close_template_angle()?;
            return Ok(params);
        }
    }

    fn parse_template_pattern(
        &mut self,
        start: Span,
        params: Vec<TemplateParamDecl>,
    ) -> PResult<DeclId> {
        // Class template
        if self.at_keyword(Keyword::Struct)
            || self.at_keyword(Keyword::Class)
            || self.at_keyword(Keyword::Union)
        {
            // A specialization repeats the name with an argument pattern:
            // `template<...> struct S<int*> { ... };`
            let spec_args = if matches!(self.nth_kind(1), TokenKind::Ident)
                && matches!(self.nth_kind(2), TokenKind::Punct(Punct::Less))
            {
                // Peek the name, then parse the pattern arguments
                let keyword_pos = self.pos;
                self.advance(); // struct/class/union
                let (spec_name, _) = self.expect_ident("a class name")?;
                let args = self.parse_template_argument_list()?;
                // Rewind is not possible without re-lexing the argument
                // list, so the specialized class parses under a decorated
                // name and the pattern args are attached to the decl.
                let decorated = {
                    let text = format!(
                        "{}@spec{}",
                        self.ctx.interner.view(spec_name),
                        self.ctx.templates.specialization_count()
                    );
                    self.ctx.interner.create(&text)
                };
                Some((keyword_pos, spec_name, decorated, args))
            } else {
                None
            };
            match spec_args {
                None => {
                    let pattern = self.parse_class()?;
                    let qid = match &self.ast.decl(pattern).kind {
                        DeclKind::Struct { id, .. } => {
                            self.ctx.types.struct_info(*id).name
                        }
                        _ => unreachable!("parse_class returns a struct decl"),
                    };
                    let decl = self.ast.add_decl(Decl {
                        kind: DeclKind::Template(TemplateDecl {
                            name: qid,
                            kind: TemplateKind::Class,
                            params,
                            pattern,
                            deferred_body: None,
                            spec_args: None,
                        }),
                        span: start,
                    });
                    self.ctx.templates.register(
                        qid,
                        TemplateKind::Class,
                        decl,
                    );
                    Ok(decl)
                }
                Some((_, spec_name, decorated, args)) => {
                    // Parse the specialized body as a class under the
                    // decorated name.
                    let body_qid = QualifiedIdentifier::new(
                        self.current_ns(),
                        decorated,
                    );
                    let (id, ty) = self
                        .ctx
                        .types
                        .add_struct(StructInfo::new(body_qid, false));
                    self.ctx.type_names.insert(body_qid, ty);
                    self.parse_specialized_class_body(id)?;
                    let pattern = self.ast.add_decl(Decl {
                        kind: DeclKind::Struct { id, ty },
                        span: start,
                    });
                    let primary_qid = QualifiedIdentifier::new(
                        self.current_ns(),
                        spec_name,
                    );
                    let decl = self.ast.add_decl(Decl {
                        kind: DeclKind::Template(TemplateDecl {
                            name: primary_qid,
                            kind: TemplateKind::Class,
                            params,
                            pattern,
                            deferred_body: None,
                            spec_args: Some(args),
                        }),
                        span: start,
                    });
                    self.ctx
                        .templates
                        .register_specialization(primary_qid, decl);
                    Ok(decl)
                }
            }
        } else {
            // Function or variable template
            let specs = self.parse_decl_specifiers();
            let ret = self.parse_type()?;
            let (qid, _) = self.parse_qualified_name("a declarator name")?;
            if self.at_punct(Punct::LParen) {
                let (fn_params, variadic) = self.parse_params()?;
                let mut receiver_quals = CvQualifiers::empty();
                if self.eat_keyword(Keyword::Const) {
                    receiver_quals |= CvQualifiers::CONST;
                }
                if self.eat_keyword(Keyword::Noexcept) {
                    if self.eat_punct(Punct::LParen) {
                        self.parse_expression()?;
                        self.expect_punct(Punct::RParen, "`)` closing noexcept")?;
                    }
                }
                let signature =
                    self.ctx.types.intern_signature(FunctionSignature {
                        params: fn_params.iter().map(|p| p.ty.index).collect(),
                        ret: ret.index,
                        variadic,
                        receiver_quals,
                    });
                let deferred_body = if self.at_punct(Punct::LBrace) {
                    Some(self.skip_balanced_braces()?)
                } else {
                    self.expect_punct(Punct::Semi, "`;` after declaration")?;
                    None
                };
                let pattern = self.ast.add_decl(Decl {
                    kind: DeclKind::Function(FunctionDecl {
                        name: qid,
                        signature,
                        params: fn_params,
                        body: None,
                        specs,
                        method_of: None,
                        is_virtual: false,
                        is_ctor: false,
                        is_dtor: false,
                        is_deleted: false,
                        is_defaulted: false,
                        ctor_inits: Vec::new(),
                        instantiated_key: None,
                    }),
                    span: start,
                });
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Template(TemplateDecl {
                        name: qid,
                        kind: TemplateKind::Function,
                        params,
                        pattern,
                        deferred_body,
                        spec_args: None,
                    }),
                    span: start,
                });
                self.ctx
                    .templates
                    .register(qid, TemplateKind::Function, decl);
                Ok(decl)
            } else {
                // Variable template: remember the initializer tokens
                let deferred_body = if self.eat_punct(Punct::Assign) {
                    let init_start = self.pos;
                    while !self.at_punct(Punct::Semi) && !self.at_eof() {
                        self.advance();
                    }
                    Some((init_start, self.pos))
                } else {
                    None
                };
                self.expect_punct(Punct::Semi, "`;` after variable template")?;
                let pattern = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: qid,
                        ty: ret,
                        init: None,
                        specs,
                    },
                    span: start,
                });
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Template(TemplateDecl {
                        name: qid,
                        kind: TemplateKind::Variable,
                        params,
                        pattern,
                        deferred_body,
                        spec_args: None,
                    }),
                    span: start,
                });
                self.ctx
                    .templates
                    .register(qid, TemplateKind::Variable, decl);
                Ok(decl)
            }
        }
    }

    /// Body of an explicit/partial specialization, parsed like a class
    /// body under the decorated name. Shares the member machinery with
    /// [Self::parse_class].
    fn parse_specialized_class_body(&mut self, id: StructId) -> PResult<()> {
        let info_name = self.ctx.types.struct_info(id).name;
        let class_ns = self
            .ctx
            .namespaces
            .get_or_create(info_name.namespace, info_name.name);
        let class_ty = *self
            .ctx
            .type_names
            .get(&info_name)
            .expect("specialized class registered before body parse");
        self.expect_punct(Punct::LBrace, "`{` opening class body")?;
        let mut access = Access::Public;
        loop {
            if self.at_punct(Punct::RBrace) {
                break;
            }
            if self.at_eof() {
                return self.err("`}` closing class body");
            }
            if self.at_keyword(Keyword::Public)
                || self.at_keyword(Keyword::Protected)
                || self.at_keyword(Keyword::Private)
            {
                access = if self.eat_keyword(Keyword::Public) {
                    Access::Public
                } else if self.eat_keyword(Keyword::Protected) {
                    Access::Protected
                } else {
                    self.advance();
                    Access::Private
                };
                self.expect_punct(Punct::Colon, "`:` after access specifier")?;
                continue;
            }
            if self.at_keyword(Keyword::StaticAssert) {
                self.parse_static_assert()?;
                continue;
            }
            self.parse_member(
                id,
                class_ty,
                class_ns,
                info_name.name,
                access,
                true,
            )?;
        }
        self.advance(); // }
        self.expect_punct(Punct::Semi, "`;` after class body")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::Lexer;

    fn parse_source(
        src: &str,
    ) -> Result<(TranslationUnit, Ast, Context), Vec<(CompileError, Span)>>
    {
        let mut ctx = Context::new();
        let options = Options::default();
        let tokens = Lexer::new(src).tokenize().expect("lexes cleanly");
        let parser = Parser::new(&tokens, src, &mut ctx, &options);
        let (unit, ast) = parser.parse_translation_unit()?;
        Ok((unit, ast, ctx))
    }

    fn parse_ok(src: &str) -> (TranslationUnit, Ast, Context) {
        match parse_source(src) {
            Ok(parsed) => parsed,
            Err(errors) => panic!("unexpected parse errors: {:?}", errors),
        }
    }

    /// The expression of the first `return` in `main`.
    fn main_return_expr(unit: &TranslationUnit, ast: &Ast) -> ExprId {
        fn find_return(ast: &Ast, id: StmtId) -> Option<ExprId> {
            match &ast.stmt(id).kind {
                StmtKind::Return(Some(expr)) => Some(*expr),
                StmtKind::Compound(stmts) => {
                    stmts.iter().find_map(|&s| find_return(ast, s))
                }
                _ => None,
            }
        }
        for &decl in &unit.decls {
            if let DeclKind::Function(func) = &ast.decl(decl).kind {
                if let Some(body) = func.body {
                    if let Some(expr) = find_return(ast, body) {
                        return expr;
                    }
                }
            }
        }
        panic!("no return statement found");
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let (unit, ast, _) =
            parse_ok("int main() { return 1 + 2 * 3; }");
        let ret = main_return_expr(&unit, &ast);
        let ExprKind::Binary { op, rhs, .. } = &ast.expr(ret).kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            ast.expr(*rhs).kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_spaceship_sits_between_shift_and_relational() {
        // Binds tighter than `<`, looser than `<<`:
        // (1 << 2) <=> 3 parses with the shift inside.
        let (unit, ast, _) =
            parse_ok("int main() { return (1 << 2 <=> 3) < 1; }");
        let ret = main_return_expr(&unit, &ast);
        let ExprKind::Binary { op, lhs, .. } = &ast.expr(ret).kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Lt);
        let ExprKind::Binary { op, lhs, .. } = &ast.expr(*lhs).kind else {
            panic!("expected spaceship inside parens");
        };
        assert_eq!(*op, BinaryOp::Spaceship);
        assert!(matches!(
            ast.expr(*lhs).kind,
            ExprKind::Binary {
                op: BinaryOp::Shl,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let (unit, ast, _) =
            parse_ok("int main() { int a = 0; int b = 0; a = b = 1; return a; }");
        // Find the `a = b = 1` statement: it is an Expr statement
        let mut found = false;
        for &decl in &unit.decls {
            if let DeclKind::Function(func) = &ast.decl(decl).kind {
                if let Some(body) = func.body {
                    if let StmtKind::Compound(stmts) = &ast.stmt(body).kind {
                        for &stmt in stmts {
                            if let StmtKind::Expr(expr) = &ast.stmt(stmt).kind
                            {
                                if let ExprKind::Binary {
                                    op: BinaryOp::Assign,
                                    rhs,
                                    ..
                                } = &ast.expr(*expr).kind
                                {
                                    assert!(matches!(
                                        ast.expr(*rhs).kind,
                                        ExprKind::Binary {
                                            op: BinaryOp::Assign,
                                            ..
                                        }
                                    ));
                                    found = true;
                                }
                            }
                        }
                    }
                }
            }
        }
        assert!(found, "nested assignment not found");
    }

    #[test]
    fn test_template_call_with_explicit_arguments() {
        let (_, _, ctx) = parse_ok(
            "template<typename T> T id(T x) { return x; }\n\
             int main() { return id<int>(1); }",
        );
        assert_eq!(ctx.templates.instantiation_count(), 1);
    }

    #[test]
    fn test_template_instantiation_is_cached() {
        let (_, _, ctx) = parse_ok(
            "template<typename T> T id(T x) { return x; }\n\
             int main() { return id<int>(1) + id<int>(2); }",
        );
        assert_eq!(ctx.templates.instantiation_count(), 1);
    }

    #[test]
    fn test_template_deduction_from_arguments() {
        let (_, _, ctx) = parse_ok(
            "template<typename T> T twice(T x) { return x + x; }\n\
             int main() { return twice(21); }",
        );
        assert_eq!(ctx.templates.instantiation_count(), 1);
    }

    #[test]
    fn test_less_than_still_parses_as_comparison() {
        let (unit, ast, _) =
            parse_ok("int main() { int a = 1; return a < 2; }");
        let ret = main_return_expr(&unit, &ast);
        assert!(matches!(
            ast.expr(ret).kind,
            ExprKind::Binary {
                op: BinaryOp::Lt,
                ..
            }
        ));
    }

    #[test]
    fn test_shr_splits_inside_template_arguments() {
        let (_, _, ctx) = parse_ok(
            "template<typename T> struct box { T value; };\n\
             int main() { box<box<int>> b; return 0; }",
        );
        // Both box<int> and box<box<int>> instantiated
        assert_eq!(ctx.templates.instantiation_count(), 2);
    }

    #[test]
    fn test_class_layout_and_vtable() {
        let (_, _, ctx) = parse_ok(
            "struct Base { virtual int f() { return 1; } };\n\
             struct Derived : Base { int f() override { return 2; } };\n\
             int main() { return 0; }",
        );
        let mut derived = None;
        for index in 0..ctx.types.struct_count() {
            let info = ctx.types.struct_info(crate::types::StructId(index as u32));
            if ctx.interner.view(info.name.name) == "Derived" {
                derived = Some(info.clone());
            }
        }
        let derived = derived.expect("Derived registered");
        assert!(derived.has_vtable);
        assert_eq!(derived.vtable.len(), 1);
        // The override fills slot 0
        assert_eq!(derived.methods[0].vtable_slot, Some(0));
        // vptr makes the object pointer-sized
        assert_eq!(derived.size_bits, 64);
    }

    #[test]
    fn test_qualified_lookup_does_not_fall_back() {
        let errors = parse_source(
            "namespace ns { }\n\
             int f() { return 0; }\n\
             int main() { return ns::f(); }",
        )
        .unwrap_err();
        assert!(matches!(errors[0].0, CompileError::Lookup { .. }));
    }

    #[test]
    fn test_template_lambda_is_rejected() {
        let errors = parse_source(
            "int main() { auto f = []<typename T>(T x) { return x; }; return 0; }",
        )
        .unwrap_err();
        assert!(matches!(errors[0].0, CompileError::Syntax { .. }));
    }

    #[test]
    fn test_undeclared_identifier_is_a_lookup_error() {
        let errors =
            parse_source("int main() { return zzz; }").unwrap_err();
        assert!(matches!(errors[0].0, CompileError::Lookup { .. }));
    }

    #[test]
    fn test_recovery_collects_multiple_errors() {
        let errors = parse_source(
            "int broken( { return 0; }\n\
             int also_broken( { return 0; }",
        )
        .unwrap_err();
        assert!(errors.len() >= 2, "expected recovery to find both errors");
    }

    #[test]
    fn test_enum_constants_are_usable() {
        let (_, _, _ctx) = parse_ok(
            "enum Color { Red, Green = 5, Blue };\n\
             static_assert(Red == 0);\n\
             static_assert(Green == 5);\n\
             static_assert(Blue == 6);\n\
             int main() { return 0; }",
        );
    }

    #[test]
    fn test_scoped_enum_requires_qualification() {
        let (_, _, _ctx) = parse_ok(
            "enum class Mode { Off, On };\n\
             static_assert(Mode::On == 1);\n\
             int main() { return 0; }",
        );
        let errors = parse_source(
            "enum class Mode { Off, On };\n\
             static_assert(On == 1);\n\
             int main() { return 0; }",
        )
        .unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_using_alias_registers_type_name() {
        parse_ok(
            "using word = unsigned long;\n\
             static_assert(sizeof(word) == 8);\n\
             int main() { return 0; }",
        );
    }

    #[test]
    fn test_partial_specialization_is_preferred() {
        let (_, _, _ctx) = parse_ok(
            "template<typename T> struct traits { static const int is_ptr = 0; };\n\
             template<typename T> struct traits<T*> { static const int is_ptr = 1; };\n\
             int main() { traits<int*> t; return 0; }",
        );
    }

    #[test]
    fn test_deferred_member_body_sees_later_members() {
        // `get` references `value`, declared after it
        parse_ok(
            "struct S {\n\
                 int get() { return value; }\n\
                 int value;\n\
             };\n\
             int main() { S s; return 0; }",
        );
    }
}

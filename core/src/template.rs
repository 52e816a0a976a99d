//! Template registry and instantiation engine.
//!
//! Patterns are stored under their qualified identifier; instantiations
//! are cached under `(base template, type args, non-type args)` so equal
//! keys always resolve to the identical declaration. The engine never
//! clones expression trees for bodies: member-function bodies and
//! variable-template initializers were recorded as token ranges by the
//! parser and are reparsed here with the substitution visible as a
//! template-parameter frame. An instantiation registers itself in the
//! cache *before* its bodies are processed, which is what terminates
//! cyclic instantiations gracefully.

use crate::{
    ast::{
        Decl, DeclId, DeclKind, ExprKind, FunctionDecl, Initializer,
        TemplateArg, TemplateKind, TemplateParamDecl, TemplateParamKind,
    },
    error::CompileError,
    namespace::QualifiedIdentifier,
    parse::{Parser, PResult, TemplateBinding, TemplateFrame},
    types::{
        FunctionSignature, InstantiationInfo, Member, MethodBody, MethodInfo,
        StructInfo, TypeIndex, TypeKind, TypeSpecifier,
    },
    util::Span,
};
use log::trace;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Identity of one template instantiation. Equality and hashing are on
/// this triple only; up to four arguments of each kind stay inline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstantiationKey {
    pub base: QualifiedIdentifier,
    pub type_args: SmallVec<[TypeIndex; 4]>,
    pub non_type_args: SmallVec<[i64; 4]>,
}

/// A canonicalized template argument, order-preserving.
#[derive(Clone, Debug, PartialEq)]
pub enum CanonArg {
    Type(TypeIndex),
    Value(i64),
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    primaries: HashMap<QualifiedIdentifier, DeclId>,
    kinds: HashMap<QualifiedIdentifier, TemplateKind>,
    specializations: HashMap<QualifiedIdentifier, Vec<DeclId>>,
    spec_total: usize,
    cache: HashMap<InstantiationKey, DeclId>,
    /// Keys in first-instantiation order, for deterministic emission.
    order: Vec<InstantiationKey>,
    in_progress: HashSet<InstantiationKey>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        qid: QualifiedIdentifier,
        kind: TemplateKind,
        decl: DeclId,
    ) {
        self.primaries.insert(qid, decl);
        self.kinds.insert(qid, kind);
    }

    pub fn register_specialization(&mut self, qid: QualifiedIdentifier, decl: DeclId) {
        self.specializations.entry(qid).or_default().push(decl);
        self.spec_total += 1;
    }

    pub fn specialization_count(&self) -> usize {
        self.spec_total
    }

    pub fn get(&self, qid: QualifiedIdentifier) -> Option<DeclId> {
        self.primaries.get(&qid).copied()
    }

    pub fn specializations(&self, qid: QualifiedIdentifier) -> &[DeclId] {
        self.specializations
            .get(&qid)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_class_template(&self, qid: QualifiedIdentifier) -> bool {
        self.kinds.get(&qid) == Some(&TemplateKind::Class)
    }

    pub fn is_function_template(&self, qid: QualifiedIdentifier) -> bool {
        self.kinds.get(&qid) == Some(&TemplateKind::Function)
    }

    pub fn is_variable_template(&self, qid: QualifiedIdentifier) -> bool {
        self.kinds.get(&qid) == Some(&TemplateKind::Variable)
    }

    pub fn cache_get(&self, key: &InstantiationKey) -> Option<DeclId> {
        self.cache.get(key).copied()
    }

    pub fn cache_insert(&mut self, key: InstantiationKey, decl: DeclId) {
        if self.cache.insert(key.clone(), decl).is_none() {
            self.order.push(key);
        }
    }

    pub fn begin(&mut self, key: &InstantiationKey) -> bool {
        self.in_progress.insert(key.clone())
    }

    pub fn end(&mut self, key: &InstantiationKey) {
        self.in_progress.remove(key);
    }

    /// Instantiations in the order they were first requested.
    pub fn instantiation_order(&self) -> &[InstantiationKey] {
        &self.order
    }

    pub fn instantiation_count(&self) -> usize {
        self.order.len()
    }
}

/// Placeholder-to-concrete substitution, built from one argument vector.
#[derive(Debug, Default)]
pub struct Subst {
    pub types: HashMap<TypeIndex, TypeIndex>,
    pub values: Vec<(crate::intern::StringHandle, i64)>,
}

impl<'a> Parser<'a> {
    /// Resolve written template arguments to the canonical cache form:
    /// type arguments to [TypeIndex], non-type arguments to `i64`.
    pub(crate) fn canonicalize_template_args(
        &mut self,
        args: &[TemplateArg],
        _span: Span,
    ) -> PResult<(SmallVec<[TypeIndex; 4]>, SmallVec<[i64; 4]>, Vec<CanonArg>)>
    {
        let mut type_args = SmallVec::new();
        let mut non_type_args = SmallVec::new();
        let mut canon = Vec::new();
        for arg in args {
            match arg {
                TemplateArg::Type(spec) => {
                    let index = self.ctx.types.qualified(spec.index, spec.quals);
                    type_args.push(index);
                    canon.push(CanonArg::Type(index));
                }
                TemplateArg::Value(expr) => {
                    let value = self.const_eval_i64(*expr)?;
                    non_type_args.push(value);
                    canon.push(CanonArg::Value(value));
                }
            }
        }
        Ok((type_args, non_type_args, canon))
    }

    fn type_is_dependent(&self, index: TypeIndex) -> bool {
        match &self.ctx.types.get(index).kind {
            TypeKind::TemplateParam { .. } => true,
            TypeKind::Pointer { pointee } => self.type_is_dependent(*pointee),
            TypeKind::Reference { referent, .. } => {
                self.type_is_dependent(*referent)
            }
            TypeKind::Array { element, .. } => self.type_is_dependent(*element),
            TypeKind::Struct(_) => self
                .ctx
                .types
                .get(index)
                .instantiation
                .as_ref()
                .is_some_and(|info| {
                    info.type_args.iter().any(|&a| self.type_is_dependent(a))
                }),
            _ => false,
        }
    }

    /// Rewrite `index`, replacing template-parameter placeholders through
    /// `subst`. Dependent instantiations (`S<T>` inside a pattern) are
    /// re-instantiated with their substituted arguments.
    pub(crate) fn substitute_type(
        &mut self,
        subst: &Subst,
        index: TypeIndex,
        span: Span,
    ) -> PResult<TypeIndex> {
        let info = self.ctx.types.get(index);
        let quals = info.quals;
        let kind = info.kind.clone();
        let instantiation = info.instantiation.clone();
        let substituted = match kind {
            TypeKind::TemplateParam { .. } => {
                match subst.types.get(&index) {
                    Some(&concrete) => concrete,
                    None => {
                        return Err((
                            CompileError::template(
                                "template parameter is not bound by this \
                                 substitution",
                            ),
                            span,
                        ))
                    }
                }
            }
            TypeKind::Pointer { pointee } => {
                let pointee = self.substitute_type(subst, pointee, span)?;
                self.ctx.types.pointer_to(pointee)
            }
            TypeKind::Reference { referent, rvalue } => {
                let referent = self.substitute_type(subst, referent, span)?;
                self.ctx.types.reference_to(referent, rvalue)
            }
            TypeKind::Array { element, length } => {
                let element = self.substitute_type(subst, element, span)?;
                self.ctx.types.array_of(element, length)
            }
            TypeKind::Struct(_) if self.type_is_dependent(index) => {
                let info = instantiation.ok_or_else(|| {
                    (
                        CompileError::template(
                            "dependent class type lost its template origin",
                        ),
                        span,
                    )
                })?;
                let mut args = Vec::new();
                let mut type_iter = info.type_args.iter();
                let mut value_iter = info.non_type_args.iter();
                // Reconstruct the written argument order: types first is
                // not guaranteed in general, but canonicalization stored
                // the split vectors, so rebuild types then values.
                for &arg in type_iter.by_ref() {
                    let concrete = self.substitute_type(subst, arg, span)?;
                    args.push(TemplateArg::Type(TypeSpecifier::plain(concrete)));
                }
                for &value in value_iter.by_ref() {
                    let expr = self.make_int_expr(value, span);
                    args.push(TemplateArg::Value(expr));
                }
                self.instantiate_class_template(info.base_template, args, span)?
            }
            _ => index,
        };
        Ok(self.ctx.types.qualified(substituted, quals))
    }

    pub(crate) fn make_int_expr(&mut self, value: i64, span: Span) -> crate::ast::ExprId {
        let int_ty = self.ctx.types.int(64, true);
        self.ast.add_expr(crate::ast::Expr {
            kind: ExprKind::IntLit {
                value: value as u64,
                unsigned: false,
                width: 64,
            },
            span,
            ty: Some(TypeSpecifier::plain(int_ty)),
            category: crate::ast::ValueCategory::PrValue,
        })
    }

    /// Build the substitution and the parse-time name bindings for one
    /// parameter list applied to canonical arguments (defaults applied).
    fn bind_parameters(
        &mut self,
        params: &[TemplateParamDecl],
        canon: &[CanonArg],
        span: Span,
    ) -> PResult<(Subst, TemplateFrame)> {
        let mut canon = canon.to_vec();
        // Apply defaults for trailing missing arguments
        while canon.len() < params.len() {
            let param = &params[canon.len()];
            match &param.default {
                Some(TemplateArg::Type(spec)) => {
                    canon.push(CanonArg::Type(spec.index))
                }
                Some(TemplateArg::Value(expr)) => {
                    let expr = *expr;
                    let value = self.const_eval_i64(expr)?;
                    canon.push(CanonArg::Value(value));
                }
                None => {
                    return Err((
                        CompileError::template(format!(
                            "too few template arguments: expected {}, got {}",
                            params.len(),
                            canon.len()
                        )),
                        span,
                    ))
                }
            }
        }
        if canon.len() > params.len() {
            return Err((
                CompileError::template(format!(
                    "too many template arguments: expected {}, got {}",
                    params.len(),
                    canon.len()
                )),
                span,
            ));
        }
        let mut subst = Subst::default();
        let mut frame = TemplateFrame::default();
        for (param, arg) in params.iter().zip(&canon) {
            match (&param.kind, arg) {
                (
                    TemplateParamKind::Type | TemplateParamKind::TypePack,
                    CanonArg::Type(index),
                ) => {
                    subst.types.insert(param.placeholder, *index);
                    frame
                        .bindings
                        .push((param.name, TemplateBinding::Type(*index)));
                }
                (TemplateParamKind::NonType { ty }, CanonArg::Value(value)) => {
                    subst.values.push((param.name, *value));
                    frame.bindings.push((
                        param.name,
                        TemplateBinding::Value {
                            ty: *ty,
                            substituted: Some(*value),
                        },
                    ));
                }
                _ => {
                    return Err((
                        CompileError::template(format!(
                            "template argument kind mismatch for parameter \
                             `{}`",
                            self.ctx.interner.view(param.name)
                        )),
                        span,
                    ))
                }
            }
        }
        Ok((subst, frame))
    }

    /// Render `Name<args>` for interning as the instantiation's own name.
    fn instantiation_display(
        &self,
        qid: QualifiedIdentifier,
        canon: &[CanonArg],
    ) -> String {
        let mut out = String::new();
        out.push_str(self.ctx.interner.view(qid.name));
        out.push('<');
        for (i, arg) in canon.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match arg {
                CanonArg::Type(index) => {
                    out.push_str(&self.ctx.types.display(*index, &self.ctx.interner))
                }
                CanonArg::Value(value) => out.push_str(&value.to_string()),
            }
        }
        out.push('>');
        out
    }

    // ===== Class templates =====

    pub(crate) fn instantiate_class_template(
        &mut self,
        qid: QualifiedIdentifier,
        args: Vec<TemplateArg>,
        span: Span,
    ) -> PResult<TypeIndex> {
        let (type_args, non_type_args, canon) =
            self.canonicalize_template_args(&args, span)?;
        let key = InstantiationKey {
            base: qid,
            type_args: type_args.clone(),
            non_type_args: non_type_args.clone(),
        };
        if let Some(decl) = self.ctx.templates.cache_get(&key) {
            return self.struct_decl_type(decl, span);
        }
        let dependent = canon.iter().any(|arg| match arg {
            CanonArg::Type(index) => self.type_is_dependent(*index),
            CanonArg::Value(_) => false,
        });
        let display = self.instantiation_display(qid, &canon);
        let inst_name = self.ctx.interner.intern(&display);
        let inst_qid = QualifiedIdentifier::new(qid.namespace, inst_name);

        if dependent {
            // Inside a pattern: produce an incomplete carrier type that
            // remembers its origin; it is re-instantiated at substitution.
            if let Some(&existing) = self.ctx.type_names.get(&inst_qid) {
                return Ok(existing);
            }
            let (id, ty) = self
                .ctx
                .types
                .add_struct(StructInfo::new(inst_qid, false));
            self.ctx.type_names.insert(inst_qid, ty);
            self.ctx.types.set_instantiation(
                ty,
                InstantiationInfo {
                    base_template: qid,
                    type_args,
                    non_type_args,
                },
            );
            let decl = self.ast.add_decl(Decl {
                kind: DeclKind::Struct { id, ty },
                span,
            });
            self.ctx.templates.cache_insert(key, decl);
            return Ok(ty);
        }

        if !self.ctx.templates.begin(&key) {
            return Err((
                CompileError::template(format!(
                    "cyclic instantiation of `{}`",
                    display
                )),
                span,
            ));
        }
        trace!("instantiating class template {}", display);
        let result = self.instantiate_class_inner(
            qid, key.clone(), canon, inst_qid, span,
        );
        self.ctx.templates.end(&key);
        result.map_err(|(error, err_span)| {
            // Chain the instantiation context onto the diagnostic
            let message = match error {
                CompileError::Template { message } => message,
                other => {
                    return (other, err_span);
                }
            };
            (
                CompileError::template(format!(
                    "{} (in instantiation of `{}`)",
                    message, display
                )),
                err_span,
            )
        })
    }

    fn struct_decl_type(&self, decl: DeclId, span: Span) -> PResult<TypeIndex> {
        match &self.ast.decl(decl).kind {
            DeclKind::Struct { ty, .. } => Ok(*ty),
            _ => Err((
                CompileError::template(
                    "cached instantiation is not a class declaration",
                ),
                span,
            )),
        }
    }

    /// Choose the pattern to instantiate: the most specialized matching
    /// partial specialization, falling back to the primary. A tie between
    /// two equally specialized matches is a diagnostic.
    fn select_pattern(
        &mut self,
        qid: QualifiedIdentifier,
        canon: &[CanonArg],
        span: Span,
    ) -> PResult<(DeclId, Option<Vec<CanonArg>>)> {
        let mut best: Option<(u32, DeclId, Vec<CanonArg>)> = None;
        let mut tie = false;
        let specs: Vec<DeclId> =
            self.ctx.templates.specializations(qid).to_vec();
        for spec in specs {
            let DeclKind::Template(tmpl) = &self.ast.decl(spec).kind else {
                continue;
            };
            let Some(pattern_args) = tmpl.spec_args.clone() else {
                continue;
            };
            let params = tmpl.params.clone();
            if let Some((score, bound)) =
                self.match_specialization(&params, &pattern_args, canon)?
            {
                match &best {
                    Some((best_score, _, _)) if *best_score == score => {
                        tie = true
                    }
                    Some((best_score, _, _)) if *best_score > score => {}
                    _ => {
                        tie = false;
                        best = Some((score, spec, bound));
                    }
                }
            }
        }
        if tie {
            return Err((
                CompileError::template(format!(
                    "ambiguous partial specializations of `{}`",
                    self.ctx.interner.view(qid.name)
                )),
                span,
            ));
        }
        if let Some((_, decl, bound)) = best {
            return Ok((decl, Some(bound)));
        }
        let primary = self.ctx.templates.get(qid).ok_or_else(|| {
            (
                CompileError::template(format!(
                    "`{}` is not a template",
                    self.ctx.interner.view(qid.name)
                )),
                span,
            )
        })?;
        Ok((primary, None))
    }

    /// Match one specialization's argument pattern against concrete
    /// arguments. On success returns a specialization score (higher is
    /// more specialized) and the deduced arguments for the
    /// specialization's own parameters, in parameter order.
    fn match_specialization(
        &mut self,
        params: &[TemplateParamDecl],
        pattern_args: &[TemplateArg],
        canon: &[CanonArg],
    ) -> PResult<Option<(u32, Vec<CanonArg>)>> {
        if pattern_args.len() != canon.len() {
            return Ok(None);
        }
        let mut score = 0u32;
        let mut bindings: HashMap<TypeIndex, TypeIndex> = HashMap::new();
        for (pattern, actual) in pattern_args.iter().zip(canon) {
            match (pattern, actual) {
                (TemplateArg::Type(spec), CanonArg::Type(actual_ty)) => {
                    match self.match_type_pattern(
                        spec.index,
                        *actual_ty,
                        &mut bindings,
                    ) {
                        Some(s) => score += s,
                        None => return Ok(None),
                    }
                }
                (TemplateArg::Value(expr), CanonArg::Value(actual)) => {
                    // A bare parameter reference is a wildcard; anything
                    // else must evaluate equal.
                    let expr = *expr;
                    if let ExprKind::Ident { .. } = self.ast.expr(expr).kind {
                        continue;
                    }
                    let value = self.const_eval_i64(expr)?;
                    if value != *actual {
                        return Ok(None);
                    }
                    score += 2;
                }
                _ => return Ok(None),
            }
        }
        // Deduced arguments in the specialization's parameter order
        let mut bound = Vec::new();
        for param in params {
            match &param.kind {
                TemplateParamKind::Type | TemplateParamKind::TypePack => {
                    match bindings.get(&param.placeholder) {
                        Some(&index) => bound.push(CanonArg::Type(index)),
                        None => return Ok(None),
                    }
                }
                TemplateParamKind::NonType { .. } => {
                    // Non-type parameters in partial specializations are
                    // only supported as direct matches.
                    return Ok(None);
                }
            }
        }
        Ok(Some((score, bound)))
    }

    /// Structural match of a specialization pattern type against a
    /// concrete type: placeholders bind, structure must agree. The score
    /// counts concrete structure, so `T*` beats plain `T`.
    fn match_type_pattern(
        &self,
        pattern: TypeIndex,
        actual: TypeIndex,
        bindings: &mut HashMap<TypeIndex, TypeIndex>,
    ) -> Option<u32> {
        match self.ctx.types.get(pattern).kind.clone() {
            TypeKind::TemplateParam { .. } => {
                match bindings.get(&pattern) {
                    Some(&bound) if bound != actual => None,
                    _ => {
                        bindings.insert(pattern, actual);
                        Some(0)
                    }
                }
            }
            TypeKind::Pointer { pointee } => {
                match self.ctx.types.get(actual).kind {
                    TypeKind::Pointer { pointee: actual_p } => self
                        .match_type_pattern(pointee, actual_p, bindings)
                        .map(|s| s + 1),
                    _ => None,
                }
            }
            TypeKind::Reference { referent, rvalue } => {
                match self.ctx.types.get(actual).kind {
                    TypeKind::Reference {
                        referent: actual_r,
                        rvalue: actual_rv,
                    } if rvalue == actual_rv => self
                        .match_type_pattern(referent, actual_r, bindings)
                        .map(|s| s + 1),
                    _ => None,
                }
            }
            TypeKind::Array { element, .. } => {
                match self.ctx.types.get(actual).kind {
                    TypeKind::Array {
                        element: actual_e, ..
                    } => self
                        .match_type_pattern(element, actual_e, bindings)
                        .map(|s| s + 1),
                    _ => None,
                }
            }
            _ => (pattern == actual).then_some(2),
        }
    }

    fn instantiate_class_inner(
        &mut self,
        qid: QualifiedIdentifier,
        key: InstantiationKey,
        canon: Vec<CanonArg>,
        inst_qid: QualifiedIdentifier,
        span: Span,
    ) -> PResult<TypeIndex> {
        let (chosen, spec_bound) = self.select_pattern(qid, &canon, span)?;
        let DeclKind::Template(tmpl) = self.ast.decl(chosen).kind.clone() else {
            return Err((
                CompileError::template("registered template has no pattern"),
                span,
            ));
        };
        let effective = spec_bound.as_deref().unwrap_or(&canon);
        let (subst, frame) =
            self.bind_parameters(&tmpl.params, effective, span)?;
        let DeclKind::Struct {
            id: pattern_id, ..
        } = self.ast.decl(tmpl.pattern).kind
        else {
            return Err((
                CompileError::template("class template pattern is not a class"),
                span,
            ));
        };

        // Create the instantiated struct and cache it before touching
        // bases or bodies.
        let pattern_info = self.ctx.types.struct_info(pattern_id).clone();
        let (id, ty) = self.ctx.types.add_struct(StructInfo::new(
            inst_qid,
            pattern_info.is_union,
        ));
        self.ctx.type_names.insert(inst_qid, ty);
        self.ctx.types.set_instantiation(
            ty,
            InstantiationInfo {
                base_template: qid,
                type_args: key.type_args.clone(),
                non_type_args: key.non_type_args.clone(),
            },
        );
        let struct_decl = self.ast.add_decl(Decl {
            kind: DeclKind::Struct { id, ty },
            span,
        });
        self.ctx.templates.cache_insert(key, struct_decl);

        // Bases, recursively instantiated and required complete
        for base in &pattern_info.bases {
            let base_ty = self.substitute_type(&subst, base.ty, span)?;
            if let TypeKind::Struct(base_id) = self.ctx.types.get(base_ty).kind {
                if !self.ctx.types.struct_info(base_id).is_complete {
                    return Err((
                        CompileError::template(format!(
                            "base `{}` is incomplete",
                            self.ctx.types.display(base_ty, &self.ctx.interner)
                        )),
                        span,
                    ));
                }
            }
            let mut base = base.clone();
            base.ty = base_ty;
            self.ctx.types.struct_info_mut(id).bases.push(base);
        }

        // Members with substituted types
        for member in &pattern_info.members {
            let member_ty = self.substitute_type(&subst, member.ty, span)?;
            self.ctx.types.struct_info_mut(id).members.push(Member {
                ty: member_ty,
                ..member.clone()
            });
        }
        self.ctx.types.struct_info_mut(id).has_user_destructor =
            pattern_info.has_user_destructor;

        // Methods: substituted signatures, bodies still deferred
        let class_ns = self
            .ctx
            .namespaces
            .get_or_create(inst_qid.namespace, inst_qid.name);
        let mut pending = Vec::new();
        for method in &pattern_info.methods {
            let pattern_sig = self.ctx.types.signature(method.signature).clone();
            let mut params = Vec::new();
            for &param in &pattern_sig.params {
                params.push(self.substitute_type(&subst, param, span)?);
            }
            let ret = self.substitute_type(&subst, pattern_sig.ret, span)?;
            let signature = self.ctx.types.intern_signature(FunctionSignature {
                params,
                ret,
                variadic: pattern_sig.variadic,
                receiver_quals: pattern_sig.receiver_quals,
            });
            let pattern_fn = match &self.ast.decl(method.decl).kind {
                DeclKind::Function(f) => f.clone(),
                _ => continue,
            };
            let mut fn_params = Vec::new();
            for param in &pattern_fn.params {
                let index =
                    self.substitute_type(&subst, param.ty.index, span)?;
                fn_params.push(crate::ast::ParamDecl {
                    ty: TypeSpecifier {
                        index,
                        quals: param.ty.quals,
                    },
                    ..param.clone()
                });
            }
            let method_qid = QualifiedIdentifier::new(class_ns, method.name);
            let decl = self.ast.add_decl(Decl {
                kind: DeclKind::Function(FunctionDecl {
                    name: method_qid,
                    signature,
                    params: fn_params,
                    body: None,
                    method_of: Some(id),
                    ..pattern_fn
                }),
                span,
            });
            self.ctx.symbols.insert(method_qid, decl);
            let method_index = self.ctx.types.struct_info(id).methods.len();
            self.ctx.types.struct_info_mut(id).methods.push(MethodInfo {
                decl,
                signature,
                body: method.body.clone(),
                vtable_slot: None,
                ..method.clone()
            });
            if let MethodBody::Deferred { start, end } = method.body {
                pending.push((method_index, decl, (start, end)));
            }
        }

        self.ctx.types.layout_struct(id, ty);

        // Bodies parse with the substitution visible as a parameter frame
        self.template_frames.push(frame);
        let mut body_result = Ok(());
        for (method_index, decl, range) in pending {
            let pending_body = crate::parse::PendingBody {
                struct_id: id,
                method_index,
                decl,
                range,
                class_ns,
            };
            if let Err(error) = self.parse_deferred_method_body(&pending_body) {
                body_result = Err(error);
                break;
            }
        }
        self.template_frames.pop();
        body_result?;
        Ok(ty)
    }

    // ===== Function and variable templates =====

    pub(crate) fn instantiate_function_template(
        &mut self,
        qid: QualifiedIdentifier,
        args: &[TemplateArg],
        span: Span,
    ) -> PResult<DeclId> {
        let (type_args, non_type_args, canon) =
            self.canonicalize_template_args(args, span)?;
        let key = InstantiationKey {
            base: qid,
            type_args,
            non_type_args,
        };
        if let Some(decl) = self.ctx.templates.cache_get(&key) {
            return Ok(decl);
        }
        let primary = self.ctx.templates.get(qid).ok_or_else(|| {
            (
                CompileError::template(format!(
                    "`{}` is not a template",
                    self.ctx.interner.view(qid.name)
                )),
                span,
            )
        })?;
        let DeclKind::Template(tmpl) = self.ast.decl(primary).kind.clone() else {
            return Err((
                CompileError::template("registered template has no pattern"),
                span,
            ));
        };
        let (subst, frame) = self.bind_parameters(&tmpl.params, &canon, span)?;
        let display = self.instantiation_display(qid, &canon);
        trace!("instantiating function template {}", display);
        let inst_name = self.ctx.interner.intern(&display);
        let inst_qid = QualifiedIdentifier::new(qid.namespace, inst_name);

        match tmpl.kind {
            TemplateKind::Function => {
                let pattern_fn = match &self.ast.decl(tmpl.pattern).kind {
                    DeclKind::Function(f) => f.clone(),
                    _ => {
                        return Err((
                            CompileError::template(
                                "function template pattern is not a function",
                            ),
                            span,
                        ))
                    }
                };
                let pattern_sig =
                    self.ctx.types.signature(pattern_fn.signature).clone();
                let mut params = Vec::new();
                for &param in &pattern_sig.params {
                    params.push(self.substitute_type(&subst, param, span)?);
                }
                let ret = self.substitute_type(&subst, pattern_sig.ret, span)?;
                let signature =
                    self.ctx.types.intern_signature(FunctionSignature {
                        params,
                        ret,
                        variadic: pattern_sig.variadic,
                        receiver_quals: pattern_sig.receiver_quals,
                    });
                let mut fn_params = Vec::new();
                for param in &pattern_fn.params {
                    let index =
                        self.substitute_type(&subst, param.ty.index, span)?;
                    fn_params.push(crate::ast::ParamDecl {
                        ty: TypeSpecifier {
                            index,
                            quals: param.ty.quals,
                        },
                        ..param.clone()
                    });
                }
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Function(FunctionDecl {
                        name: inst_qid,
                        signature,
                        params: fn_params.clone(),
                        body: None,
                        instantiated_key: Some(key.clone()),
                        ..pattern_fn
                    }),
                    span,
                });
                self.ctx.symbols.insert(inst_qid, decl);
                // Cache before the body parse: recursive instantiations of
                // the same key resolve to this declaration.
                self.ctx.templates.cache_insert(key, decl);

                if let Some(range) = tmpl.deferred_body {
                    self.template_frames.push(frame);
                    let saved_pos = self.pos;
                    self.pos = range.0;
                    self.ctx.symbols.push_scope();
                    for param in &fn_params {
                        if let Some(pname) = param.name {
                            let param_decl = self.ast.add_decl(Decl {
                                kind: DeclKind::Variable {
                                    name: QualifiedIdentifier::new(
                                        self.current_ns(),
                                        pname,
                                    ),
                                    ty: param.ty,
                                    init: None,
                                    specs: Default::default(),
                                },
                                span: param.span,
                            });
                            self.ctx.symbols.insert_local(pname, param_decl);
                        }
                    }
                    let parsed = self.parse_compound_statement();
                    self.ctx.symbols.pop_scope();
                    self.pos = saved_pos;
                    self.template_frames.pop();
                    let parsed = parsed?;
                    if let DeclKind::Function(f) =
                        &mut self.ast.decl_mut(decl).kind
                    {
                        f.body = Some(parsed);
                    }
                }
                Ok(decl)
            }
            TemplateKind::Variable => {
                let DeclKind::Variable {
                    ty: pattern_ty,
                    specs,
                    ..
                } = self.ast.decl(tmpl.pattern).kind.clone()
                else {
                    return Err((
                        CompileError::template(
                            "variable template pattern is not a variable",
                        ),
                        span,
                    ));
                };
                let index =
                    self.substitute_type(&subst, pattern_ty.index, span)?;
                let init = match tmpl.deferred_body {
                    Some(range) => {
                        self.template_frames.push(frame);
                        let saved_pos = self.pos;
                        self.pos = range.0;
                        let parsed = self.parse_assignment();
                        self.pos = saved_pos;
                        self.template_frames.pop();
                        Some(Initializer::Expr(parsed?))
                    }
                    None => None,
                };
                let decl = self.ast.add_decl(Decl {
                    kind: DeclKind::Variable {
                        name: inst_qid,
                        ty: TypeSpecifier {
                            index,
                            quals: pattern_ty.quals,
                        },
                        init,
                        specs,
                    },
                    span,
                });
                self.ctx.symbols.insert(inst_qid, decl);
                self.ctx.templates.cache_insert(key, decl);
                Ok(decl)
            }
            TemplateKind::Class => Err((
                CompileError::template(
                    "class template used where a value is required",
                ),
                span,
            )),
        }
    }

    /// Deduce a function template's arguments from a call's argument
    /// types, then instantiate. Conflicting deductions for one parameter
    /// fail the deduction.
    pub(crate) fn deduce_function_template(
        &mut self,
        qid: QualifiedIdentifier,
        arg_types: &[Option<TypeSpecifier>],
        span: Span,
    ) -> PResult<DeclId> {
        let primary = self.ctx.templates.get(qid).ok_or_else(|| {
            (
                CompileError::template(format!(
                    "`{}` is not a template",
                    self.ctx.interner.view(qid.name)
                )),
                span,
            )
        })?;
        let DeclKind::Template(tmpl) = self.ast.decl(primary).kind.clone() else {
            return Err((
                CompileError::template("registered template has no pattern"),
                span,
            ));
        };
        let pattern_fn = match &self.ast.decl(tmpl.pattern).kind {
            DeclKind::Function(f) => f.clone(),
            _ => {
                return Err((
                    CompileError::template(
                        "function template pattern is not a function",
                    ),
                    span,
                ))
            }
        };
        let mut bindings: HashMap<TypeIndex, TypeIndex> = HashMap::new();
        for (param, arg) in pattern_fn.params.iter().zip(arg_types) {
            let Some(arg) = arg else { continue };
            let actual = self.ctx.types.strip_reference(arg.index);
            self.deduce_one(param.ty.index, actual, &mut bindings, span)?;
        }
        let mut args = Vec::new();
        for tparam in &tmpl.params {
            match &tparam.kind {
                TemplateParamKind::Type | TemplateParamKind::TypePack => {
                    match bindings.get(&tparam.placeholder) {
                        Some(&index) => args.push(TemplateArg::Type(
                            TypeSpecifier::plain(index),
                        )),
                        None => {
                            return Err((
                                CompileError::template(format!(
                                    "cannot deduce template parameter `{}`",
                                    self.ctx.interner.view(tparam.name)
                                )),
                                span,
                            ))
                        }
                    }
                }
                TemplateParamKind::NonType { .. } => {
                    return Err((
                        CompileError::template(format!(
                            "non-type template parameter `{}` cannot be \
                             deduced from a call",
                            self.ctx.interner.view(tparam.name)
                        )),
                        span,
                    ))
                }
            }
        }
        self.instantiate_function_template(qid, &args, span)
    }

    fn deduce_one(
        &mut self,
        pattern: TypeIndex,
        actual: TypeIndex,
        bindings: &mut HashMap<TypeIndex, TypeIndex>,
        span: Span,
    ) -> PResult<()> {
        match self.ctx.types.get(pattern).kind.clone() {
            TypeKind::TemplateParam { .. } => {
                if let Some(&bound) = bindings.get(&pattern) {
                    if bound != actual {
                        return Err((
                            CompileError::template(format!(
                                "conflicting deductions: `{}` vs `{}`",
                                self.ctx.types.display(bound, &self.ctx.interner),
                                self.ctx
                                    .types
                                    .display(actual, &self.ctx.interner)
                            )),
                            span,
                        ));
                    }
                } else {
                    bindings.insert(pattern, actual);
                }
                Ok(())
            }
            TypeKind::Pointer { pointee } => {
                match self.ctx.types.get(actual).kind {
                    TypeKind::Pointer { pointee: actual_p } => {
                        self.deduce_one(pointee, actual_p, bindings, span)
                    }
                    _ => Ok(()),
                }
            }
            TypeKind::Reference { referent, .. } => {
                self.deduce_one(referent, actual, bindings, span)
            }
            TypeKind::Array { element, .. } => {
                match self.ctx.types.get(actual).kind {
                    TypeKind::Array {
                        element: actual_e, ..
                    } => self.deduce_one(element, actual_e, bindings, span),
                    _ => Ok(()),
                }
            }
            TypeKind::Struct(_) if self.type_is_dependent(pattern) => {
                let (pattern_info, actual_info) = (
                    self.ctx.types.get(pattern).instantiation.clone(),
                    self.ctx.types.get(actual).instantiation.clone(),
                );
                if let (Some(p), Some(a)) = (pattern_info, actual_info) {
                    if p.base_template == a.base_template {
                        for (&pt, &at) in p.type_args.iter().zip(&a.type_args)
                        {
                            self.deduce_one(pt, at, bindings, span)?;
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceHandle;

    fn key(ns_name: u32) -> InstantiationKey {
        // Synthesized handles via a throwaway interner
        let mut interner = crate::intern::StringInterner::new();
        let mut name = None;
        for i in 0..=ns_name {
            name = Some(interner.intern(&format!("t{}", i)));
        }
        InstantiationKey {
            base: QualifiedIdentifier::new(
                NamespaceHandle::GLOBAL,
                name.expect("at least one name interned"),
            ),
            type_args: SmallVec::new(),
            non_type_args: SmallVec::new(),
        }
    }

    #[test]
    fn test_cache_identity() {
        let mut registry = TemplateRegistry::new();
        let mut ast = crate::ast::Ast::new();
        let decl = ast.add_decl(crate::ast::Decl {
            kind: crate::ast::DeclKind::UsingDecl {
                target: key(0).base,
            },
            span: Default::default(),
        });
        registry.cache_insert(key(0), decl);
        assert_eq!(registry.cache_get(&key(0)), Some(decl));
        assert_eq!(registry.cache_get(&key(1)), None);
        // Re-inserting the same key does not duplicate the order entry
        registry.cache_insert(key(0), decl);
        assert_eq!(registry.instantiation_count(), 1);
    }

    #[test]
    fn test_keys_distinguish_arguments() {
        let mut a = key(0);
        let b = key(0);
        assert_eq!(a, b);
        a.non_type_args.push(3);
        assert_ne!(a, b);
    }

    #[test]
    fn test_in_progress_guard() {
        let mut registry = TemplateRegistry::new();
        assert!(registry.begin(&key(0)));
        assert!(!registry.begin(&key(0)));
        registry.end(&key(0));
        assert!(registry.begin(&key(0)));
    }
}

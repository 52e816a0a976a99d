//! Lowering: typed AST to the flat three-address IR.
//!
//! One pass per function, in declaration order, followed by template
//! instantiations in first-encountered order. Lowering resolves storage
//! (frame slots for locals, symbols for globals), folds constant
//! expressions the parser already validated, rewrites value-category
//! information into [LValueInfo] side tables, and reduces all control
//! flow to labels and branches.

use crate::{
    ast::{
        Ast, BinaryOp, CastKind, ConstexprKind, DeclId, DeclKind, ExprId,
        ExprKind, FunctionDecl, Initializer, StmtId, StmtKind,
        Storage, TranslationUnit, UnaryOp, ValueCategory,
    },
    consteval::{Evaluator, Value},
    error::CompileError,
    intern::StringHandle,
    ir::{
        BinOp, CallTarget, CatchClause, GlobalVar, Instr, IrFunction, IrType,
        LValueInfo, LocalSlot, Operand, Program, TempVar, TryRegion, UnOp,
    },
    mangle::{self, MangleScheme},
    types::{StructId, TypeIndex, TypeKind, TypeSpecifier},
    util::Span,
    Context,
};
use log::debug;
use std::collections::{HashMap, HashSet};

type LResult<T> = Result<T, (CompileError, Span)>;

pub struct Lowerer<'a> {
    ctx: &'a mut Context,
    ast: &'a Ast,
    scheme: MangleScheme,
    program: Program,
    typeinfo_seen: HashSet<TypeIndex>,
    string_pool: HashMap<Vec<u8>, u32>,

    // Per-function state
    instrs: Vec<Instr>,
    locals: Vec<LocalSlot>,
    scopes: Vec<HashMap<StringHandle, (StringHandle, TypeIndex)>>,
    temp_count: u32,
    label_count: u32,
    region_count: u32,
    value_categories: HashMap<u32, ValueCategory>,
    lvalues: HashMap<u32, LValueInfo>,
    try_regions: Vec<TryRegion>,
    break_stack: Vec<StringHandle>,
    continue_stack: Vec<StringHandle>,
    current_class: Option<StructId>,
}

/// Lower a parsed translation unit to IR. Functions come out in source
/// declaration order, then template instantiations in the order they were
/// first requested.
pub fn lower_unit(
    ctx: &mut Context,
    ast: &Ast,
    unit: &TranslationUnit,
    scheme: MangleScheme,
) -> Result<Program, Vec<(CompileError, Span)>> {
    let mut lowerer = Lowerer {
        ctx,
        ast,
        scheme,
        program: Program::default(),
        typeinfo_seen: HashSet::new(),
        string_pool: HashMap::new(),
        instrs: Vec::new(),
        locals: Vec::new(),
        scopes: Vec::new(),
        temp_count: 0,
        label_count: 0,
        region_count: 0,
        value_categories: HashMap::new(),
        lvalues: HashMap::new(),
        try_regions: Vec::new(),
        break_stack: Vec::new(),
        continue_stack: Vec::new(),
        current_class: None,
    };
    lowerer.run(unit)
}

impl<'a> Lowerer<'a> {
    fn run(mut self, unit: &TranslationUnit) -> Result<Program, Vec<(CompileError, Span)>> {
        let mut work = Vec::new();
        let mut seen = HashSet::new();
        self.collect_decls(&unit.decls, &mut work, &mut seen);
        let cached: Vec<DeclId> = self
            .ctx
            .templates
            .instantiation_order()
            .iter()
            .filter_map(|key| self.ctx.templates.cache_get(key))
            .collect();
        for decl in cached {
            self.collect_decls(&[decl], &mut work, &mut seen);
        }

        let mut errors = Vec::new();
        for decl in work {
            match self.ast.decl(decl).kind.clone() {
                DeclKind::Function(func) => {
                    if let Err(error) = self.lower_function(&func) {
                        errors.push(error);
                    }
                }
                DeclKind::Variable {
                    name,
                    ty,
                    init,
                    specs,
                } => {
                    if specs.storage == Storage::Extern
                        || matches!(
                            specs.constexpr_kind,
                            ConstexprKind::Constexpr | ConstexprKind::Consteval
                        )
                    {
                        continue;
                    }
                    let mangled =
                        mangle::mangle_variable(self.ctx, name, self.scheme);
                    let size = self.ctx.types.size_of(ty.index).max(1);
                    let align = self.ctx.types.align_of(ty.index).max(1);
                    let init_bytes = init.as_ref().and_then(|init| {
                        self.global_init_bytes(init, ty, size)
                    });
                    self.program.globals.push(GlobalVar {
                        mangled,
                        size,
                        align,
                        init: init_bytes,
                    });
                }
                _ => {}
            }
        }

        // Every complete polymorphic class gets a vtable and RTTI
        for index in 0..self.ctx.types.struct_count() {
            let id = StructId(index as u32);
            let info = self.ctx.types.struct_info(id);
            if info.is_complete && info.has_vtable {
                self.program.polymorphic_classes.push(id);
            }
        }

        if errors.is_empty() {
            debug!(
                "lowered {} functions, {} globals",
                self.program.functions.len(),
                self.program.globals.len()
            );
            Ok(self.program)
        } else {
            Err(errors)
        }
    }

    fn collect_decls(
        &self,
        decls: &[DeclId],
        out: &mut Vec<DeclId>,
        seen: &mut HashSet<DeclId>,
    ) {
        for &decl in decls {
            if !seen.insert(decl) {
                continue;
            }
            match &self.ast.decl(decl).kind {
                DeclKind::Function(func) => {
                    if func.body.is_some() && !func.is_deleted {
                        out.push(decl);
                    }
                }
                DeclKind::Variable { .. } => out.push(decl),
                DeclKind::Namespace { decls, .. } => {
                    self.collect_decls(decls, out, seen)
                }
                DeclKind::Struct { id, .. } => {
                    let methods: Vec<DeclId> = self
                        .ctx
                        .types
                        .struct_info(*id)
                        .methods
                        .iter()
                        .map(|m| m.decl)
                        .collect();
                    for method in methods {
                        if seen.insert(method) {
                            if let DeclKind::Function(func) =
                                &self.ast.decl(method).kind
                            {
                                if func.body.is_some() && !func.is_deleted {
                                    out.push(method);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn global_init_bytes(
        &mut self,
        init: &Initializer,
        ty: TypeSpecifier,
        size: u64,
    ) -> Option<Vec<u8>> {
        let expr = match init {
            Initializer::Expr(expr) => *expr,
            Initializer::Braced(elems) if elems.len() == 1 => elems[0],
            Initializer::Braced(_) => return None,
        };
        let value = Evaluator::new(self.ctx, self.ast).eval(expr).ok()?;
        let mut bytes = vec![0u8; size as usize];
        match value {
            Value::Int { value, .. } => {
                let raw = value.to_le_bytes();
                let n = (size as usize).min(8);
                bytes[..n].copy_from_slice(&raw[..n]);
            }
            Value::Bool(b) => bytes[0] = b as u8,
            Value::Float { value, is_double } => {
                if is_double {
                    bytes[..8].copy_from_slice(&value.to_le_bytes());
                } else {
                    bytes[..4].copy_from_slice(&(value as f32).to_le_bytes());
                }
            }
            _ => return None,
        }
        let _ = ty;
        Some(bytes)
    }

    // ===== Per-function machinery =====

    fn temp(&mut self) -> TempVar {
        let t = TempVar(self.temp_count);
        self.temp_count += 1;
        t
    }

    fn label(&mut self, prefix: &str) -> StringHandle {
        self.label_count += 1;
        let name = format!(".L{}{}", prefix, self.label_count);
        self.ctx.interner.create(&name)
    }

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn set_lvalue(&mut self, temp: TempVar, info: LValueInfo, category: ValueCategory) {
        self.lvalues.insert(temp.0, info);
        self.value_categories.insert(temp.0, category);
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_local(
        &mut self,
        name: StringHandle,
        ty: TypeIndex,
        is_param: bool,
    ) -> StringHandle {
        let slot_name = {
            let text = self.ctx.interner.view(name).to_string();
            self.ctx.interner.create(&text)
        };
        let size = self.ctx.types.size_of(ty).max(1);
        let align = self.ctx.types.align_of(ty).max(1);
        self.locals.push(LocalSlot {
            name: slot_name,
            size,
            align,
            ty: self.ir_type(ty),
            is_param,
        });
        self.scopes
            .last_mut()
            .expect("lowerer scope stack empty")
            .insert(name, (slot_name, ty));
        slot_name
    }

    fn lookup_local(&self, name: StringHandle) -> Option<(StringHandle, TypeIndex)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }

    fn ir_type(&self, index: TypeIndex) -> IrType {
        match &self.ctx.types.get(index).kind {
            TypeKind::Void => IrType::Void,
            TypeKind::Bool => IrType::U8,
            TypeKind::Int { width, signed } => match (width, signed) {
                (8, true) => IrType::I8,
                (8, false) => IrType::U8,
                (16, true) => IrType::I16,
                (16, false) => IrType::U16,
                (32, true) => IrType::I32,
                (32, false) => IrType::U32,
                (64, true) => IrType::I64,
                _ => IrType::U64,
            },
            TypeKind::Float => IrType::F32,
            TypeKind::Double => IrType::F64,
            TypeKind::Enum(id) => {
                self.ir_type(self.ctx.types.enum_info(*id).underlying)
            }
            TypeKind::Reference { .. }
            | TypeKind::Pointer { .. }
            | TypeKind::FunctionPtr(_)
            | TypeKind::Array { .. }
            | TypeKind::Struct(_) => IrType::Ptr,
            TypeKind::TemplateParam { .. } => IrType::I64,
        }
    }

    /// Scalar IR type of an expression's value (references read through).
    fn expr_ir_type(&self, expr: ExprId) -> IrType {
        match self.ast.expr(expr).ty {
            Some(spec) => {
                let stripped = self.ctx.types.strip_reference(spec.index);
                self.ir_type(stripped)
            }
            None => IrType::I64,
        }
    }

    fn expr_type_index(&self, expr: ExprId) -> Option<TypeIndex> {
        self.ast
            .expr(expr)
            .ty
            .map(|spec| self.ctx.types.strip_reference(spec.index))
    }

    fn record_typeinfo(&mut self, index: TypeIndex) {
        if self.typeinfo_seen.insert(index) {
            self.program.referenced_typeinfo.push(index);
        }
    }

    fn coerce(&mut self, src: Operand, from: IrType, to: IrType) -> Operand {
        if from == to || to == IrType::Void || from == IrType::Void {
            return src;
        }
        // Constants convert in place
        if let (Operand::Const(value), false) = (src, to.is_float()) {
            let _ = value;
            return src;
        }
        let dst = self.temp();
        self.emit(Instr::Convert { dst, src, from, to });
        Operand::Temp(dst)
    }

    fn intern_string(&mut self, bytes: Vec<u8>) -> u32 {
        if let Some(&index) = self.string_pool.get(&bytes) {
            return index;
        }
        let index = self.program.strings.len() as u32;
        self.program.strings.push(bytes.clone());
        self.string_pool.insert(bytes, index);
        index
    }

    // ===== Function lowering =====

    fn lower_function(&mut self, func: &FunctionDecl) -> LResult<()> {
        let Some(body) = func.body else {
            return Ok(());
        };
        self.instrs.clear();
        self.locals.clear();
        self.scopes.clear();
        self.temp_count = 0;
        self.label_count = 0;
        self.region_count = 0;
        self.value_categories.clear();
        self.lvalues.clear();
        self.try_regions.clear();
        self.break_stack.clear();
        self.continue_stack.clear();
        self.current_class = func.method_of;

        let sig = self.ctx.types.signature(func.signature).clone();
        let ret = self.ir_type(sig.ret);
        self.push_scope();

        let mut params = Vec::new();
        if let Some(class_id) = func.method_of {
            let this_name = self.ctx.interner.intern("this");
            let class_qid = self.ctx.types.struct_info(class_id).name;
            let class_ty = *self
                .ctx
                .type_names
                .get(&class_qid)
                .expect("method of unregistered class");
            let this_ptr = self.ctx.types.pointer_to(class_ty);
            let slot = self.declare_local(this_name, this_ptr, true);
            params.push((slot, IrType::Ptr));
        }
        for param in &func.params {
            let name = match param.name {
                Some(name) => name,
                None => self.ctx.interner.intern("__unnamed"),
            };
            let slot = self.declare_local(name, param.ty.index, true);
            params.push((slot, self.ir_type(param.ty.index)));
        }

        // Constructors: base constructors, the vtable pointer, then the
        // member-initializer list, then the body.
        if func.is_ctor {
            if let Some(class_id) = func.method_of {
                self.emit_ctor_prologue(class_id, func)?;
            }
        }

        self.lower_stmt(body)?;

        // Fall-off-the-end: main returns 0, void returns plain.
        let needs_ret = !matches!(self.instrs.last(), Some(Instr::Return { .. }));
        if needs_ret {
            let is_main = self.ctx.interner.view(func.name.name) == "main";
            if is_main {
                self.emit(Instr::Return {
                    value: Some(Operand::Const(0)),
                    ty: IrType::I32,
                });
            } else {
                self.emit(Instr::Return {
                    value: None,
                    ty: IrType::Void,
                });
            }
        }
        self.pop_scope();

        let display_name = func
            .name
            .display(&self.ctx.namespaces, &self.ctx.interner);
        let mangled = mangle::mangle_function(self.ctx, func, self.scheme);
        self.program.functions.push(IrFunction {
            display_name,
            mangled,
            params,
            ret,
            instrs: std::mem::take(&mut self.instrs),
            locals: std::mem::take(&mut self.locals),
            temp_count: self.temp_count,
            try_regions: std::mem::take(&mut self.try_regions),
            value_categories: std::mem::take(&mut self.value_categories),
            lvalues: std::mem::take(&mut self.lvalues),
            is_variadic: sig.variadic,
        });
        Ok(())
    }

    fn load_this(&mut self) -> LResult<Operand> {
        let this_name = self.ctx.interner.intern("this");
        let (slot, _) = self.lookup_local(this_name).ok_or_else(|| {
            (
                CompileError::type_error("`this` outside a member function"),
                Span::default(),
            )
        })?;
        let dst = self.temp();
        self.emit(Instr::LoadLocal {
            dst,
            var: slot,
            ty: IrType::Ptr,
        });
        Ok(Operand::Temp(dst))
    }

    /// Store the class's vtable pointer at object offset 0.
    fn emit_vptr_store(&mut self, object: Operand, class_id: StructId) {
        let vtable = mangle::vtable_symbol(self.ctx, class_id, self.scheme);
        let vtable = self.ctx.interner.intern(&vtable);
        let addr = self.temp();
        self.emit(Instr::AddrOfSymbol {
            dst: addr,
            symbol: vtable,
        });
        // Skip top-offset and RTTI slots: the object's vptr points at the
        // first function pointer.
        let adjusted = self.temp();
        self.emit(Instr::ComputeAddress {
            dst: adjusted,
            base: Operand::Temp(addr),
            index: None,
            scale: 1,
            offset: 16,
        });
        self.emit(Instr::Store {
            addr: object,
            src: Operand::Temp(adjusted),
            ty: IrType::Ptr,
        });
    }

    fn emit_ctor_prologue(&mut self, class_id: StructId, func: &FunctionDecl) -> LResult<()> {
        let this = self.load_this()?;
        let info = self.ctx.types.struct_info(class_id).clone();
        // Base default constructors first
        for base in &info.bases {
            if let TypeKind::Struct(base_id) = self.ctx.types.get(base.ty).kind {
                let base_ctor = self
                    .ctx
                    .types
                    .struct_info(base_id)
                    .methods
                    .iter()
                    .find(|m| {
                        m.is_ctor
                            && self
                                .ctx
                                .types
                                .signature(m.signature)
                                .params
                                .is_empty()
                    })
                    .map(|m| m.decl);
                if let Some(ctor_decl) = base_ctor {
                    let base_this = self.temp();
                    self.emit(Instr::ComputeAddress {
                        dst: base_this,
                        base: this,
                        index: None,
                        scale: 1,
                        offset: base.offset as i64,
                    });
                    let mangled = self.mangled_of(ctor_decl)?;
                    self.emit(Instr::Call {
                        dst: None,
                        target: CallTarget::Direct(mangled),
                        args: vec![(Operand::Temp(base_this), IrType::Ptr)],
                        ret: IrType::Void,
                        variadic: false,
                    });
                }
            }
        }
        if info.has_vtable {
            self.emit_vptr_store(this, class_id);
        }
        // Member initializer list
        for (member, args) in &func.ctor_inits {
            let Some((field, extra)) = self.ctx.types.find_member(class_id, *member)
            else {
                continue;
            };
            let value = match args.as_slice() {
                [] => Operand::Const(0),
                [single] => {
                    let (value, from) = self.lower_expr(*single)?;
                    self.coerce(value, from, self.ir_type(field.ty))
                }
                _ => {
                    return Err((
                        CompileError::type_error(
                            "multi-argument member initializers are not \
                             supported",
                        ),
                        Span::default(),
                    ))
                }
            };
            let addr = self.temp();
            self.emit(Instr::ComputeAddress {
                dst: addr,
                base: this,
                index: None,
                scale: 1,
                offset: (extra + field.bit_offset / 8) as i64,
            });
            self.emit(Instr::Store {
                addr: Operand::Temp(addr),
                src: value,
                ty: self.ir_type(field.ty),
            });
        }
        Ok(())
    }

    fn mangled_of(&mut self, decl: DeclId) -> LResult<StringHandle> {
        match &self.ast.decl(decl).kind {
            DeclKind::Function(func) => {
                let mangled =
                    mangle::mangle_function(self.ctx, func, self.scheme);
                Ok(self.ctx.interner.intern(&mangled))
            }
            _ => Err((
                CompileError::type_error("call target is not a function"),
                self.ast.decl(decl).span,
            )),
        }
    }

    // ===== Statements =====

    fn lower_stmt(&mut self, id: StmtId) -> LResult<()> {
        let stmt = self.ast.stmt(id).clone();
        match stmt.kind {
            StmtKind::Compound(stmts) => {
                self.push_scope();
                for inner in stmts {
                    self.lower_stmt(inner)?;
                }
                self.pop_scope();
                Ok(())
            }
            StmtKind::Empty => Ok(()),
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            StmtKind::Decl(decl) => self.lower_local_decl(decl),
            StmtKind::Return(value) => {
                let (operand, ty) = match value {
                    Some(expr) => {
                        let (operand, from) = self.lower_expr(expr)?;
                        (Some(operand), from)
                    }
                    None => (None, IrType::Void),
                };
                self.emit(Instr::Return { value: operand, ty });
                Ok(())
            }
            StmtKind::If {
                is_constexpr,
                cond,
                then_branch,
                else_branch,
            } => {
                if is_constexpr {
                    // The branch not taken is discarded entirely
                    let cond_span = self.ast.expr(cond).span;
                    let taken = Evaluator::new(self.ctx, self.ast)
                        .eval(cond)?
                        .truthy()
                        .ok_or_else(|| {
                            (
                                CompileError::constexpr(
                                    "if constexpr condition is not a constant \
                                     boolean",
                                ),
                                cond_span,
                            )
                        })?;
                    return if taken {
                        self.lower_stmt(then_branch)
                    } else if let Some(else_branch) = else_branch {
                        self.lower_stmt(else_branch)
                    } else {
                        Ok(())
                    };
                }
                let (cond_op, _) = self.lower_expr(cond)?;
                let then_label = self.label("then");
                let else_label = self.label("else");
                let end_label = self.label("endif");
                self.emit(Instr::CondBranch {
                    cond: cond_op,
                    if_true: then_label,
                    if_false: if else_branch.is_some() {
                        else_label
                    } else {
                        end_label
                    },
                });
                self.emit(Instr::Label { name: then_label });
                self.lower_stmt(then_branch)?;
                self.emit(Instr::Branch { target: end_label });
                if let Some(else_branch) = else_branch {
                    self.emit(Instr::Label { name: else_label });
                    self.lower_stmt(else_branch)?;
                    self.emit(Instr::Branch { target: end_label });
                }
                self.emit(Instr::Label { name: end_label });
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let head = self.label("while");
                let body_label = self.label("body");
                let end = self.label("endwhile");
                self.emit(Instr::Branch { target: head });
                self.emit(Instr::Label { name: head });
                let (cond_op, _) = self.lower_expr(cond)?;
                self.emit(Instr::CondBranch {
                    cond: cond_op,
                    if_true: body_label,
                    if_false: end,
                });
                self.emit(Instr::Label { name: body_label });
                self.break_stack.push(end);
                self.continue_stack.push(head);
                let result = self.lower_stmt(body);
                self.continue_stack.pop();
                self.break_stack.pop();
                result?;
                self.emit(Instr::Branch { target: head });
                self.emit(Instr::Label { name: end });
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                let head = self.label("do");
                let check = self.label("docheck");
                let end = self.label("enddo");
                self.emit(Instr::Label { name: head });
                self.break_stack.push(end);
                self.continue_stack.push(check);
                let result = self.lower_stmt(body);
                self.continue_stack.pop();
                self.break_stack.pop();
                result?;
                self.emit(Instr::Label { name: check });
                let (cond_op, _) = self.lower_expr(cond)?;
                self.emit(Instr::CondBranch {
                    cond: cond_op,
                    if_true: head,
                    if_false: end,
                });
                self.emit(Instr::Label { name: end });
                Ok(())
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                if let Some(init) = init {
                    self.lower_stmt(init)?;
                }
                let head = self.label("for");
                let body_label = self.label("forbody");
                let step_label = self.label("forstep");
                let end = self.label("endfor");
                self.emit(Instr::Branch { target: head });
                self.emit(Instr::Label { name: head });
                match cond {
                    Some(cond) => {
                        let (cond_op, _) = self.lower_expr(cond)?;
                        self.emit(Instr::CondBranch {
                            cond: cond_op,
                            if_true: body_label,
                            if_false: end,
                        });
                    }
                    None => self.emit(Instr::Branch { target: body_label }),
                }
                self.emit(Instr::Label { name: body_label });
                self.break_stack.push(end);
                self.continue_stack.push(step_label);
                let result = self.lower_stmt(body);
                self.continue_stack.pop();
                self.break_stack.pop();
                result?;
                self.emit(Instr::Label { name: step_label });
                if let Some(step) = step {
                    self.lower_expr(step)?;
                }
                self.emit(Instr::Branch { target: head });
                self.emit(Instr::Label { name: end });
                self.pop_scope();
                Ok(())
            }
            StmtKind::RangeFor { var, range, body } => {
                self.lower_range_for(var, range, body)
            }
            StmtKind::Switch { cond, body } => self.lower_switch(cond, body),
            StmtKind::CaseLabel { .. } => {
                // Only meaningful inside a switch body, where lower_switch
                // rewrites them into labels.
                Ok(())
            }
            StmtKind::Break => {
                let target = *self.break_stack.last().ok_or_else(|| {
                    (
                        CompileError::type_error("break outside a loop or switch"),
                        stmt.span,
                    )
                })?;
                self.emit(Instr::Branch { target });
                Ok(())
            }
            StmtKind::Continue => {
                let target = *self.continue_stack.last().ok_or_else(|| {
                    (
                        CompileError::type_error("continue outside a loop"),
                        stmt.span,
                    )
                })?;
                self.emit(Instr::Branch { target });
                Ok(())
            }
            StmtKind::Throw(value) => self.lower_throw(value, stmt.span),
            StmtKind::Try { body, handlers } => {
                self.lower_try(body, handlers)
            }
        }
    }

    fn lower_local_decl(&mut self, decl: DeclId) -> LResult<()> {
        let DeclKind::Variable { name, ty, init, .. } =
            self.ast.decl(decl).kind.clone()
        else {
            // Nested static_assert/using inside a block: nothing to emit
            return Ok(());
        };
        let stripped = ty.index;
        let slot = self.declare_local(name.name, stripped, false);
        let kind = self.ctx.types.get(stripped).kind.clone();
        match kind {
            TypeKind::Reference { .. } => {
                if let Some(Initializer::Expr(expr)) = init {
                    let addr = self.lower_addr(expr)?;
                    self.emit(Instr::StoreLocal {
                        var: slot,
                        src: addr,
                        ty: IrType::Ptr,
                    });
                }
                Ok(())
            }
            TypeKind::Struct(struct_id) => {
                self.lower_struct_local_init(slot, struct_id, init)
            }
            TypeKind::Array { element, .. } => {
                if let Some(Initializer::Braced(elems)) = init {
                    let elem_ty = self.ir_type(element);
                    let elem_size = self.ctx.types.size_of(element).max(1);
                    let base = self.temp();
                    self.emit(Instr::AddrOfLocal {
                        dst: base,
                        var: slot,
                    });
                    for (i, elem) in elems.iter().enumerate() {
                        let (value, from) = self.lower_expr(*elem)?;
                        let value = self.coerce(value, from, elem_ty);
                        let addr = self.temp();
                        self.emit(Instr::ComputeAddress {
                            dst: addr,
                            base: Operand::Temp(base),
                            index: None,
                            scale: 1,
                            offset: (i as u64 * elem_size) as i64,
                        });
                        self.emit(Instr::Store {
                            addr: Operand::Temp(addr),
                            src: value,
                            ty: elem_ty,
                        });
                    }
                }
                Ok(())
            }
            _ => {
                let slot_ty = self.ir_type(stripped);
                match init {
                    Some(Initializer::Expr(expr)) => {
                        let (value, from) = self.lower_expr(expr)?;
                        let value = self.coerce(value, from, slot_ty);
                        self.emit(Instr::StoreLocal {
                            var: slot,
                            src: value,
                            ty: slot_ty,
                        });
                    }
                    Some(Initializer::Braced(elems)) => {
                        let value = match elems.as_slice() {
                            [] => Operand::Const(0),
                            [single] => {
                                let (value, from) = self.lower_expr(*single)?;
                                self.coerce(value, from, slot_ty)
                            }
                            _ => {
                                return Err((
                                    CompileError::type_error(
                                        "too many initializers for a scalar",
                                    ),
                                    self.ast.decl(decl).span,
                                ))
                            }
                        };
                        self.emit(Instr::StoreLocal {
                            var: slot,
                            src: value,
                            ty: slot_ty,
                        });
                    }
                    None => {}
                }
                Ok(())
            }
        }
    }

    fn lower_struct_local_init(
        &mut self,
        slot: StringHandle,
        struct_id: StructId,
        init: Option<Initializer>,
    ) -> LResult<()> {
        let info = self.ctx.types.struct_info(struct_id).clone();
        let base = self.temp();
        self.emit(Instr::AddrOfLocal { dst: base, var: slot });
        if info.has_vtable {
            self.emit_vptr_store(Operand::Temp(base), struct_id);
        }
        let args = match init {
            None => Vec::new(),
            Some(Initializer::Braced(elems)) => elems,
            Some(Initializer::Expr(expr)) => {
                // `S s = S(...)` or `S s = other`
                match self.ast.expr(expr).kind.clone() {
                    ExprKind::Construct { args, .. } => args,
                    _ => {
                        let src = self.lower_addr(expr)?;
                        self.emit(Instr::MemCopy {
                            dst_addr: Operand::Temp(base),
                            src_addr: src,
                            size: (info.size_bits + 7) / 8,
                        });
                        return Ok(());
                    }
                }
            }
        };
        // User constructor if one matches the arity, aggregate stores
        // otherwise.
        let ctor = info
            .methods
            .iter()
            .find(|m| {
                m.is_ctor
                    && self.ctx.types.signature(m.signature).params.len()
                        == args.len()
            })
            .cloned();
        if let Some(ctor) = ctor {
            let mut call_args = vec![(Operand::Temp(base), IrType::Ptr)];
            let param_tys =
                self.ctx.types.signature(ctor.signature).params.clone();
            for (arg, &param) in args.iter().zip(&param_tys) {
                let (value, from) = self.lower_expr(*arg)?;
                let to = self.ir_type(param);
                let value = self.coerce(value, from, to);
                call_args.push((value, to));
            }
            let mangled = self.mangled_of(ctor.decl)?;
            self.emit(Instr::Call {
                dst: None,
                target: CallTarget::Direct(mangled),
                args: call_args,
                ret: IrType::Void,
                variadic: false,
            });
        } else {
            for (member, arg) in info.members.iter().zip(&args) {
                let (value, from) = self.lower_expr(*arg)?;
                let to = self.ir_type(member.ty);
                let value = self.coerce(value, from, to);
                let addr = self.temp();
                self.emit(Instr::ComputeAddress {
                    dst: addr,
                    base: Operand::Temp(base),
                    index: None,
                    scale: 1,
                    offset: (member.bit_offset / 8) as i64,
                });
                self.emit(Instr::Store {
                    addr: Operand::Temp(addr),
                    src: value,
                    ty: to,
                });
            }
        }
        Ok(())
    }

    fn lower_range_for(&mut self, var: DeclId, range: ExprId, body: StmtId) -> LResult<()> {
        let range_span = self.ast.expr(range).span;
        let Some(range_ty) = self.expr_type_index(range) else {
            return Err((
                CompileError::type_error("range expression has unknown type"),
                range_span,
            ));
        };
        let TypeKind::Array { element, length: Some(length) } =
            self.ctx.types.get(range_ty).kind
        else {
            return Err((
                CompileError::type_error(
                    "range-based for is only supported over arrays of known \
                     bound",
                ),
                range_span,
            ));
        };
        self.push_scope();
        let DeclKind::Variable { name, .. } = self.ast.decl(var).kind.clone()
        else {
            return Err((
                CompileError::type_error("range-for variable is not a variable"),
                range_span,
            ));
        };
        let elem_slot = self.declare_local(name.name, element, false);
        let idx_name = self.ctx.interner.create("__range_idx");
        let idx_ty = self.ctx.types.int(64, true);
        self.push_scope();
        let idx_slot = self.declare_local(idx_name, idx_ty, false);
        self.emit(Instr::StoreLocal {
            var: idx_slot,
            src: Operand::Const(0),
            ty: IrType::I64,
        });
        let base = self.lower_addr(range)?;
        let elem_size = self.ctx.types.size_of(element).max(1);
        let elem_ir = self.ir_type(element);

        let head = self.label("range");
        let body_label = self.label("rangebody");
        let step_label = self.label("rangestep");
        let end = self.label("endrange");
        self.emit(Instr::Branch { target: head });
        self.emit(Instr::Label { name: head });
        let idx = self.temp();
        self.emit(Instr::LoadLocal {
            dst: idx,
            var: idx_slot,
            ty: IrType::I64,
        });
        let cmp = self.temp();
        self.emit(Instr::Binary {
            op: BinOp::CmpLt,
            dst: cmp,
            lhs: Operand::Temp(idx),
            rhs: Operand::Const(length as i64),
            ty: IrType::I64,
        });
        self.emit(Instr::CondBranch {
            cond: Operand::Temp(cmp),
            if_true: body_label,
            if_false: end,
        });
        self.emit(Instr::Label { name: body_label });
        // Bind the loop variable to a copy of the current element
        let addr = self.temp();
        self.emit(Instr::ComputeAddress {
            dst: addr,
            base,
            index: Some(Operand::Temp(idx)),
            scale: elem_size as u32,
            offset: 0,
        });
        let value = self.temp();
        self.emit(Instr::Load {
            dst: value,
            addr: Operand::Temp(addr),
            ty: elem_ir,
        });
        self.emit(Instr::StoreLocal {
            var: elem_slot,
            src: Operand::Temp(value),
            ty: elem_ir,
        });
        self.break_stack.push(end);
        self.continue_stack.push(step_label);
        let result = self.lower_stmt(body);
        self.continue_stack.pop();
        self.break_stack.pop();
        result?;
        self.emit(Instr::Label { name: step_label });
        let idx2 = self.temp();
        self.emit(Instr::LoadLocal {
            dst: idx2,
            var: idx_slot,
            ty: IrType::I64,
        });
        let next = self.temp();
        self.emit(Instr::Binary {
            op: BinOp::Add,
            dst: next,
            lhs: Operand::Temp(idx2),
            rhs: Operand::Const(1),
            ty: IrType::I64,
        });
        self.emit(Instr::StoreLocal {
            var: idx_slot,
            src: Operand::Temp(next),
            ty: IrType::I64,
        });
        self.emit(Instr::Branch { target: head });
        self.emit(Instr::Label { name: end });
        self.pop_scope();
        self.pop_scope();
        Ok(())
    }

    fn lower_switch(&mut self, cond: ExprId, body: StmtId) -> LResult<()> {
        let (cond_op, cond_ty) = self.lower_expr(cond)?;
        let end = self.label("endswitch");
        let StmtKind::Compound(stmts) = self.ast.stmt(body).kind.clone() else {
            return Err((
                CompileError::type_error("switch body must be a block"),
                self.ast.stmt(body).span,
            ));
        };
        // First pass: a label per case, dispatch chain up front
        let mut case_labels = Vec::new();
        let mut default_label = None;
        for &stmt in &stmts {
            if let StmtKind::CaseLabel { value } = &self.ast.stmt(stmt).kind {
                let label = self.label("case");
                match value {
                    Some(value_expr) => {
                        let value = Evaluator::new(self.ctx, self.ast)
                            .eval_to_i64(*value_expr)?;
                        case_labels.push((stmt, label, Some(value)));
                        let cmp = self.temp();
                        self.emit(Instr::Binary {
                            op: BinOp::CmpEq,
                            dst: cmp,
                            lhs: cond_op,
                            rhs: Operand::Const(value),
                            ty: cond_ty,
                        });
                        let next = self.label("swnext");
                        self.emit(Instr::CondBranch {
                            cond: Operand::Temp(cmp),
                            if_true: label,
                            if_false: next,
                        });
                        self.emit(Instr::Label { name: next });
                    }
                    None => {
                        case_labels.push((stmt, label, None));
                        default_label = Some(label);
                    }
                }
            }
        }
        self.emit(Instr::Branch {
            target: default_label.unwrap_or(end),
        });
        // Second pass: bodies with case labels materialized
        self.break_stack.push(end);
        let result = (|| -> LResult<()> {
            for &stmt in &stmts {
                if let StmtKind::CaseLabel { .. } = &self.ast.stmt(stmt).kind {
                    let (_, label, _) = case_labels
                        .iter()
                        .find(|(s, _, _)| *s == stmt)
                        .expect("case label registered in first pass");
                    self.emit(Instr::Label { name: *label });
                } else {
                    self.lower_stmt(stmt)?;
                }
            }
            Ok(())
        })();
        self.break_stack.pop();
        result?;
        self.emit(Instr::Branch { target: end });
        self.emit(Instr::Label { name: end });
        Ok(())
    }

    fn lower_throw(&mut self, value: Option<ExprId>, span: Span) -> LResult<()> {
        match value {
            Some(expr) => {
                let Some(ty) = self.expr_type_index(expr) else {
                    return Err((
                        CompileError::type_error(
                            "thrown expression has unknown type",
                        ),
                        span,
                    ));
                };
                let (operand, _) = self.lower_expr(expr)?;
                self.record_typeinfo(ty);
                self.emit(Instr::Throw {
                    value: operand,
                    ty,
                });
                Ok(())
            }
            None => {
                // Bare rethrow
                let rethrow = self.ctx.interner.intern("__cxa_rethrow");
                self.emit(Instr::Call {
                    dst: None,
                    target: CallTarget::Direct(rethrow),
                    args: Vec::new(),
                    ret: IrType::Void,
                    variadic: false,
                });
                Ok(())
            }
        }
    }

    fn lower_try(
        &mut self,
        body: StmtId,
        handlers: Vec<crate::ast::CatchHandler>,
    ) -> LResult<()> {
        let region = self.region_count;
        self.region_count += 1;
        let cont = self.label("trycont");
        self.emit(Instr::TryBegin { region });
        self.lower_stmt(body)?;
        self.emit(Instr::TryEnd { region });
        self.emit(Instr::Branch { target: cont });

        let mut catches = Vec::new();
        for handler in &handlers {
            let label = self.label("catch");
            let ty = handler.ty.map(|spec| spec.index);
            if let Some(ty) = ty {
                self.record_typeinfo(ty);
            }
            catches.push(CatchClause { ty, label });
            self.emit(Instr::Label { name: label });
            let payload = self.temp();
            self.emit(Instr::CatchBegin {
                region,
                dst: Some(payload),
            });
            self.push_scope();
            if let (Some(spec), Some(var)) = (handler.ty, handler.var) {
                let slot = self.declare_local(var, spec.index, false);
                let ty = self.ir_type(spec.index);
                // The payload pointer addresses the thrown object
                let value = self.temp();
                self.emit(Instr::Load {
                    dst: value,
                    addr: Operand::Temp(payload),
                    ty,
                });
                self.emit(Instr::StoreLocal {
                    var: slot,
                    src: Operand::Temp(value),
                    ty,
                });
            }
            let result = self.lower_stmt(handler.body);
            self.pop_scope();
            result?;
            self.emit(Instr::CatchEnd { region });
            self.emit(Instr::Branch { target: cont });
        }
        self.emit(Instr::Label { name: cont });
        self.try_regions.push(TryRegion {
            id: region,
            catches,
            cont_label: cont,
        });
        Ok(())
    }

    // ===== Expressions =====

    /// Lower an expression to an operand carrying its value.
    fn lower_expr(&mut self, id: ExprId) -> LResult<(Operand, IrType)> {
        let expr = self.ast.expr(id).clone();
        let span = expr.span;
        match expr.kind {
            ExprKind::IntLit { value, .. } => {
                Ok((Operand::Const(value as i64), self.expr_ir_type(id)))
            }
            ExprKind::BoolLit(b) => Ok((Operand::Const(b as i64), IrType::U8)),
            ExprKind::CharLit(c) => Ok((Operand::Const(c), IrType::I8)),
            ExprKind::FloatLit { value, is_double } => Ok((
                Operand::FloatConst(value),
                if is_double { IrType::F64 } else { IrType::F32 },
            )),
            ExprKind::Nullptr => Ok((Operand::Const(0), IrType::Ptr)),
            ExprKind::StrLit(handle) => {
                let mut bytes =
                    self.ctx.interner.view(handle).as_bytes().to_vec();
                bytes.push(0);
                let index = self.intern_string(bytes);
                let dst = self.temp();
                self.emit(Instr::AddrOfString { dst, index });
                Ok((Operand::Temp(dst), IrType::Ptr))
            }
            ExprKind::This => Ok((self.load_this()?, IrType::Ptr)),
            ExprKind::Ident { qid, decl } => {
                self.lower_ident(qid.name, decl, id, span)
            }
            ExprKind::TemplateId { resolved, .. } => match resolved {
                Some(decl) => self.lower_ident(
                    match &self.ast.decl(decl).kind {
                        DeclKind::Function(f) => f.name.name,
                        DeclKind::Variable { name, .. } => name.name,
                        _ => {
                            return Err((
                                CompileError::type_error(
                                    "template-id does not name a value",
                                ),
                                span,
                            ))
                        }
                    },
                    Some(decl),
                    id,
                    span,
                ),
                None => Err((
                    CompileError::template(
                        "unresolved template reference survived parsing",
                    ),
                    span,
                )),
            },
            ExprKind::Unary { op, operand } => {
                self.lower_unary(op, operand, id, span)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.lower_binary(op, lhs, rhs, id, span)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let result_ty = self.expr_ir_type(id);
                let (cond_op, _) = self.lower_expr(cond)?;
                let then_label = self.label("condthen");
                let else_label = self.label("condelse");
                let end = self.label("condend");
                let dst = self.temp();
                self.emit(Instr::CondBranch {
                    cond: cond_op,
                    if_true: then_label,
                    if_false: else_label,
                });
                self.emit(Instr::Label { name: then_label });
                let (then_value, from) = self.lower_expr(then_expr)?;
                let then_value = self.coerce(then_value, from, result_ty);
                self.emit(Instr::Copy {
                    dst,
                    src: then_value,
                });
                self.emit(Instr::Branch { target: end });
                self.emit(Instr::Label { name: else_label });
                let (else_value, from) = self.lower_expr(else_expr)?;
                let else_value = self.coerce(else_value, from, result_ty);
                self.emit(Instr::Copy {
                    dst,
                    src: else_value,
                });
                self.emit(Instr::Branch { target: end });
                self.emit(Instr::Label { name: end });
                Ok((Operand::Temp(dst), result_ty))
            }
            ExprKind::Call { callee, args } => {
                self.lower_call(callee, &args, id, span)
            }
            ExprKind::Member { .. } | ExprKind::Subscript { .. } => {
                let addr = self.lower_addr(id)?;
                let ty = self.expr_ir_type(id);
                let stripped = self.expr_type_index(id);
                // Struct-typed member accesses stay as addresses
                if let Some(index) = stripped {
                    if matches!(
                        self.ctx.types.get(index).kind,
                        TypeKind::Struct(_) | TypeKind::Array { .. }
                    ) {
                        return Ok((addr, IrType::Ptr));
                    }
                }
                let dst = self.temp();
                self.emit(Instr::Load { dst, addr, ty });
                Ok((Operand::Temp(dst), ty))
            }
            ExprKind::Cast {
                kind,
                target,
                operand,
            } => self.lower_cast(kind, target, operand, span),
            ExprKind::Construct { ty, args } => {
                let addr = self.lower_construct(ty, &args, span)?;
                Ok((addr, IrType::Ptr))
            }
            ExprKind::InitList { elems } => match elems.as_slice() {
                [single] => self.lower_expr(*single),
                _ => Err((
                    CompileError::type_error(
                        "braced initializer is not usable in this context",
                    ),
                    span,
                )),
            },
            ExprKind::SizeofType(_)
            | ExprKind::SizeofExpr(_)
            | ExprKind::Alignof(_)
            | ExprKind::TypeTrait { .. }
            | ExprKind::Requires { .. } => {
                let value =
                    Evaluator::new(self.ctx, self.ast).eval_to_i64(id)?;
                Ok((Operand::Const(value), IrType::U64))
            }
            ExprKind::New { ty, count, args } => {
                self.lower_new(ty, count, &args, span)
            }
            ExprKind::Delete { operand, array } => {
                self.lower_delete(operand, array, span)?;
                Ok((Operand::Const(0), IrType::Void))
            }
            ExprKind::Lambda { fn_decl } => {
                let mangled = self.mangled_of(fn_decl)?;
                let dst = self.temp();
                self.emit(Instr::AddrOfSymbol {
                    dst,
                    symbol: mangled,
                });
                Ok((Operand::Temp(dst), IrType::Ptr))
            }
            ExprKind::SizeofPack(_)
            | ExprKind::Fold { .. }
            | ExprKind::PackExpansion { .. } => Err((
                CompileError::template(
                    "unexpanded parameter pack in lowered code",
                ),
                span,
            )),
        }
    }

    fn lower_ident(
        &mut self,
        name: StringHandle,
        decl: Option<DeclId>,
        expr: ExprId,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        if let Some((slot, ty_index)) = self.lookup_local(name) {
            let kind = self.ctx.types.get(ty_index).kind.clone();
            return match kind {
                TypeKind::Reference { referent, .. } => {
                    let ptr = self.temp();
                    self.emit(Instr::LoadLocal {
                        dst: ptr,
                        var: slot,
                        ty: IrType::Ptr,
                    });
                    let ty = self.ir_type(referent);
                    let dst = self.temp();
                    self.emit(Instr::Load {
                        dst,
                        addr: Operand::Temp(ptr),
                        ty,
                    });
                    self.set_lvalue(
                        dst,
                        LValueInfo::Indirect(ptr),
                        ValueCategory::LValue,
                    );
                    Ok((Operand::Temp(dst), ty))
                }
                TypeKind::Struct(_) | TypeKind::Array { .. } => {
                    let dst = self.temp();
                    self.emit(Instr::AddrOfLocal { dst, var: slot });
                    self.set_lvalue(
                        dst,
                        LValueInfo::DirectLocal(slot),
                        ValueCategory::LValue,
                    );
                    Ok((Operand::Temp(dst), IrType::Ptr))
                }
                _ => {
                    let ty = self.ir_type(ty_index);
                    let dst = self.temp();
                    self.emit(Instr::LoadLocal {
                        dst,
                        var: slot,
                        ty,
                    });
                    self.set_lvalue(
                        dst,
                        LValueInfo::DirectLocal(slot),
                        ValueCategory::LValue,
                    );
                    Ok((Operand::Temp(dst), ty))
                }
            };
        }
        let Some(decl) = decl else {
            return Err((
                CompileError::lookup(format!(
                    "`{}` does not name a value",
                    self.ctx.interner.view(name)
                )),
                span,
            ));
        };
        match self.ast.decl(decl).kind.clone() {
            DeclKind::Variable {
                name: qid,
                ty,
                specs,
                ..
            } => {
                // Constexpr variables fold to their value
                if specs.constexpr_kind != ConstexprKind::No {
                    let value = Evaluator::new(self.ctx, self.ast)
                        .eval_to_i64(expr)?;
                    return Ok((
                        Operand::Const(value),
                        self.ir_type(ty.index),
                    ));
                }
                let mangled =
                    mangle::mangle_variable(self.ctx, qid, self.scheme);
                let symbol = self.ctx.interner.intern(&mangled);
                let addr = self.temp();
                self.emit(Instr::AddrOfSymbol {
                    dst: addr,
                    symbol,
                });
                let ty_ir = self.ir_type(ty.index);
                let dst = self.temp();
                self.emit(Instr::Load {
                    dst,
                    addr: Operand::Temp(addr),
                    ty: ty_ir,
                });
                self.set_lvalue(
                    dst,
                    LValueInfo::Indirect(addr),
                    ValueCategory::LValue,
                );
                Ok((Operand::Temp(dst), ty_ir))
            }
            DeclKind::Function(_) => {
                let mangled = self.mangled_of(decl)?;
                let dst = self.temp();
                self.emit(Instr::AddrOfSymbol {
                    dst,
                    symbol: mangled,
                });
                Ok((Operand::Temp(dst), IrType::Ptr))
            }
            _ => Err((
                CompileError::lookup(format!(
                    "`{}` does not name a value",
                    self.ctx.interner.view(name)
                )),
                span,
            )),
        }
    }

    /// Address of an lvalue expression.
    fn lower_addr(&mut self, id: ExprId) -> LResult<Operand> {
        let expr = self.ast.expr(id).clone();
        let span = expr.span;
        match expr.kind {
            ExprKind::Ident { qid, decl } => {
                if let Some((slot, ty_index)) = self.lookup_local(qid.name) {
                    if let TypeKind::Reference { .. } =
                        self.ctx.types.get(ty_index).kind
                    {
                        let dst = self.temp();
                        self.emit(Instr::LoadLocal {
                            dst,
                            var: slot,
                            ty: IrType::Ptr,
                        });
                        return Ok(Operand::Temp(dst));
                    }
                    let dst = self.temp();
                    self.emit(Instr::AddrOfLocal { dst, var: slot });
                    self.set_lvalue(
                        dst,
                        LValueInfo::DirectLocal(slot),
                        ValueCategory::LValue,
                    );
                    return Ok(Operand::Temp(dst));
                }
                let Some(decl) = decl else {
                    return Err((
                        CompileError::lookup(format!(
                            "`{}` does not name addressable storage",
                            self.ctx.interner.view(qid.name)
                        )),
                        span,
                    ));
                };
                match self.ast.decl(decl).kind.clone() {
                    DeclKind::Variable { name, .. } => {
                        let mangled = mangle::mangle_variable(
                            self.ctx, name, self.scheme,
                        );
                        let symbol = self.ctx.interner.intern(&mangled);
                        let dst = self.temp();
                        self.emit(Instr::AddrOfSymbol {
                            dst,
                            symbol,
                        });
                        Ok(Operand::Temp(dst))
                    }
                    DeclKind::Function(_) => {
                        let mangled = self.mangled_of(decl)?;
                        let dst = self.temp();
                        self.emit(Instr::AddrOfSymbol {
                            dst,
                            symbol: mangled,
                        });
                        Ok(Operand::Temp(dst))
                    }
                    _ => Err((
                        CompileError::lookup(
                            "expression does not name addressable storage",
                        ),
                        span,
                    )),
                }
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let (value, _) = self.lower_expr(operand)?;
                Ok(value)
            }
            ExprKind::Member {
                object,
                name,
                arrow,
            } => {
                let (base, member_offset, field_ty) =
                    self.member_base_and_offset(object, name, arrow, span)?;
                let dst = self.temp();
                self.emit(Instr::ComputeAddress {
                    dst,
                    base,
                    index: None,
                    scale: 1,
                    offset: member_offset as i64,
                });
                if let Operand::Temp(base_temp) = base {
                    self.set_lvalue(
                        dst,
                        LValueInfo::Member {
                            base: base_temp,
                            offset: member_offset,
                        },
                        ValueCategory::LValue,
                    );
                }
                let _ = field_ty;
                Ok(Operand::Temp(dst))
            }
            ExprKind::Subscript { object, index } => {
                let object_ty = self.expr_type_index(object);
                let (base, elem_size) = match object_ty {
                    Some(ty) => match self.ctx.types.get(ty).kind {
                        TypeKind::Array { element, .. } => {
                            let base = self.lower_addr(object)?;
                            (base, self.ctx.types.size_of(element).max(1))
                        }
                        TypeKind::Pointer { pointee } => {
                            let (base, _) = self.lower_expr(object)?;
                            (base, self.ctx.types.size_of(pointee).max(1))
                        }
                        _ => {
                            return Err((
                                CompileError::type_error(
                                    "subscript of a non-array, non-pointer",
                                ),
                                span,
                            ))
                        }
                    },
                    None => {
                        return Err((
                            CompileError::type_error(
                                "subscripted expression has unknown type",
                            ),
                            span,
                        ))
                    }
                };
                let (index_op, index_ty) = self.lower_expr(index)?;
                let index_op = self.coerce(index_op, index_ty, IrType::I64);
                let dst = self.temp();
                self.emit(Instr::ComputeAddress {
                    dst,
                    base,
                    index: Some(index_op),
                    scale: elem_size as u32,
                    offset: 0,
                });
                self.set_lvalue(
                    dst,
                    LValueInfo::ArrayElement { addr: dst },
                    ValueCategory::LValue,
                );
                Ok(Operand::Temp(dst))
            }
            ExprKind::This => self.load_this(),
            ExprKind::Construct { ty, args } => {
                self.lower_construct(ty, &args, span)
            }
            ExprKind::StrLit(_) => {
                let (value, _) = self.lower_expr(id)?;
                Ok(value)
            }
            ExprKind::Cast { operand, .. } => self.lower_addr(operand),
            _ => Err((
                CompileError::type_error(
                    "expression is not an lvalue",
                ),
                span,
            )),
        }
    }

    /// Resolve a member access to `(base address, byte offset, member
    /// type)`.
    fn member_base_and_offset(
        &mut self,
        object: ExprId,
        name: StringHandle,
        arrow: bool,
        span: Span,
    ) -> LResult<(Operand, u64, TypeIndex)> {
        let Some(mut object_ty) = self.expr_type_index(object) else {
            return Err((
                CompileError::type_error("member access on unknown type"),
                span,
            ));
        };
        let base = if arrow {
            let (value, _) = self.lower_expr(object)?;
            if let TypeKind::Pointer { pointee } =
                self.ctx.types.get(object_ty).kind
            {
                object_ty = pointee;
            }
            value
        } else {
            self.lower_addr(object)?
        };
        let TypeKind::Struct(id) = self.ctx.types.get(object_ty).kind else {
            return Err((
                CompileError::type_error("member access on a non-class type"),
                span,
            ));
        };
        let Some((member, extra)) = self.ctx.types.find_member(id, name) else {
            return Err((
                CompileError::lookup(format!(
                    "no member named `{}`",
                    self.ctx.interner.view(name)
                )),
                span,
            ));
        };
        if member.bit_width.is_some() && member.bit_offset % 8 != 0 {
            return Err((
                CompileError::type_error(
                    "unaligned bit-field access is not supported",
                ),
                span,
            ));
        }
        Ok((base, extra + member.bit_offset / 8, member.ty))
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        operand: ExprId,
        expr: ExprId,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        match op {
            UnaryOp::Plus => self.lower_expr(operand),
            UnaryOp::Neg => {
                let (src, ty) = self.lower_expr(operand)?;
                let dst = self.temp();
                self.emit(Instr::Unary {
                    op: UnOp::Neg,
                    dst,
                    src,
                    ty,
                });
                Ok((Operand::Temp(dst), ty))
            }
            UnaryOp::Not => {
                let (src, ty) = self.lower_expr(operand)?;
                let dst = self.temp();
                self.emit(Instr::Unary {
                    op: UnOp::Not,
                    dst,
                    src,
                    ty,
                });
                Ok((Operand::Temp(dst), IrType::U8))
            }
            UnaryOp::BitNot => {
                let (src, ty) = self.lower_expr(operand)?;
                let dst = self.temp();
                self.emit(Instr::Unary {
                    op: UnOp::BitNot,
                    dst,
                    src,
                    ty,
                });
                Ok((Operand::Temp(dst), ty))
            }
            UnaryOp::Deref => {
                let (addr, _) = self.lower_expr(operand)?;
                let ty = self.expr_ir_type(expr);
                let dst = self.temp();
                self.emit(Instr::Load { dst, addr, ty });
                if let Operand::Temp(addr_temp) = addr {
                    self.set_lvalue(
                        dst,
                        LValueInfo::Indirect(addr_temp),
                        ValueCategory::LValue,
                    );
                }
                Ok((Operand::Temp(dst), ty))
            }
            UnaryOp::AddrOf => {
                let addr = self.lower_addr(operand)?;
                Ok((addr, IrType::Ptr))
            }
            UnaryOp::PreInc
            | UnaryOp::PreDec
            | UnaryOp::PostInc
            | UnaryOp::PostDec => {
                let addr = self.lower_addr(operand)?;
                let ty = self.expr_ir_type(operand);
                let old = self.temp();
                self.emit(Instr::Load {
                    dst: old,
                    addr,
                    ty,
                });
                // Pointers step by their pointee size
                let step = match self.expr_type_index(operand) {
                    Some(index) => match self.ctx.types.get(index).kind {
                        TypeKind::Pointer { pointee } => {
                            self.ctx.types.size_of(pointee).max(1) as i64
                        }
                        _ => 1,
                    },
                    None => 1,
                };
                let delta = match op {
                    UnaryOp::PreInc | UnaryOp::PostInc => step,
                    _ => -step,
                };
                let new = self.temp();
                self.emit(Instr::Binary {
                    op: BinOp::Add,
                    dst: new,
                    lhs: Operand::Temp(old),
                    rhs: Operand::Const(delta),
                    ty,
                });
                self.emit(Instr::Store {
                    addr,
                    src: Operand::Temp(new),
                    ty,
                });
                let result = match op {
                    UnaryOp::PreInc | UnaryOp::PreDec => new,
                    _ => old,
                };
                let _ = span;
                Ok((Operand::Temp(result), ty))
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        expr: ExprId,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        if op.is_assignment() {
            let addr = self.lower_addr(lhs)?;
            let ty = self.expr_ir_type(lhs);
            let value = if let Some(base) = op.compound_base() {
                let old = self.temp();
                self.emit(Instr::Load {
                    dst: old,
                    addr,
                    ty,
                });
                let (rhs_value, rhs_ty) = self.lower_expr(rhs)?;
                let rhs_value = self.coerce(rhs_value, rhs_ty, ty);
                let dst = self.temp();
                self.emit(Instr::Binary {
                    op: ir_binop(base),
                    dst,
                    lhs: Operand::Temp(old),
                    rhs: rhs_value,
                    ty,
                });
                Operand::Temp(dst)
            } else {
                let (rhs_value, rhs_ty) = self.lower_expr(rhs)?;
                self.coerce(rhs_value, rhs_ty, ty)
            };
            self.emit(Instr::Store {
                addr,
                src: value,
                ty,
            });
            return Ok((value, ty));
        }
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let dst = self.temp();
                let rhs_label = self.label("sc_rhs");
                let end = self.label("sc_end");
                let (lhs_value, _) = self.lower_expr(lhs)?;
                let short_value =
                    Operand::Const((op == BinaryOp::LogicalOr) as i64);
                self.emit(Instr::Copy {
                    dst,
                    src: short_value,
                });
                match op {
                    BinaryOp::LogicalAnd => self.emit(Instr::CondBranch {
                        cond: lhs_value,
                        if_true: rhs_label,
                        if_false: end,
                    }),
                    _ => self.emit(Instr::CondBranch {
                        cond: lhs_value,
                        if_true: end,
                        if_false: rhs_label,
                    }),
                }
                self.emit(Instr::Label { name: rhs_label });
                let (rhs_value, _) = self.lower_expr(rhs)?;
                let norm = self.temp();
                self.emit(Instr::Binary {
                    op: BinOp::CmpNe,
                    dst: norm,
                    lhs: rhs_value,
                    rhs: Operand::Const(0),
                    ty: IrType::I64,
                });
                self.emit(Instr::Copy {
                    dst,
                    src: Operand::Temp(norm),
                });
                self.emit(Instr::Branch { target: end });
                self.emit(Instr::Label { name: end });
                Ok((Operand::Temp(dst), IrType::U8))
            }
            BinaryOp::Comma => {
                self.lower_expr(lhs)?;
                self.lower_expr(rhs)
            }
            BinaryOp::Spaceship => {
                // (a > b) - (a < b)
                let (a, a_ty) = self.lower_expr(lhs)?;
                let (b, b_ty) = self.lower_expr(rhs)?;
                let common = wider(a_ty, b_ty);
                let a = self.coerce(a, a_ty, common);
                let b = self.coerce(b, b_ty, common);
                let gt = self.temp();
                self.emit(Instr::Binary {
                    op: BinOp::CmpGt,
                    dst: gt,
                    lhs: a,
                    rhs: b,
                    ty: common,
                });
                let lt = self.temp();
                self.emit(Instr::Binary {
                    op: BinOp::CmpLt,
                    dst: lt,
                    lhs: a,
                    rhs: b,
                    ty: common,
                });
                let dst = self.temp();
                self.emit(Instr::Binary {
                    op: BinOp::Sub,
                    dst,
                    lhs: Operand::Temp(gt),
                    rhs: Operand::Temp(lt),
                    ty: IrType::I32,
                });
                Ok((Operand::Temp(dst), IrType::I32))
            }
            _ => {
                // Pointer arithmetic folds into compute_address
                let lhs_ty_index = self.expr_type_index(lhs);
                if matches!(op, BinaryOp::Add | BinaryOp::Sub) {
                    if let Some(index) = lhs_ty_index {
                        if let TypeKind::Pointer { pointee } =
                            self.ctx.types.get(index).kind
                        {
                            let (base, _) = self.lower_expr(lhs)?;
                            let (offset, offset_ty) = self.lower_expr(rhs)?;
                            let offset = self
                                .coerce(offset, offset_ty, IrType::I64);
                            let offset = if op == BinaryOp::Sub {
                                let negated = self.temp();
                                self.emit(Instr::Unary {
                                    op: UnOp::Neg,
                                    dst: negated,
                                    src: offset,
                                    ty: IrType::I64,
                                });
                                Operand::Temp(negated)
                            } else {
                                offset
                            };
                            let size =
                                self.ctx.types.size_of(pointee).max(1);
                            let dst = self.temp();
                            self.emit(Instr::ComputeAddress {
                                dst,
                                base,
                                index: Some(offset),
                                scale: size as u32,
                                offset: 0,
                            });
                            return Ok((Operand::Temp(dst), IrType::Ptr));
                        }
                    }
                }
                let (a, a_ty) = self.lower_expr(lhs)?;
                let (b, b_ty) = self.lower_expr(rhs)?;
                let common = wider(a_ty, b_ty);
                let a = self.coerce(a, a_ty, common);
                let b = self.coerce(b, b_ty, common);
                let dst = self.temp();
                let ir_op = ir_binop(op);
                self.emit(Instr::Binary {
                    op: ir_op,
                    dst,
                    lhs: a,
                    rhs: b,
                    ty: common,
                });
                let result_ty = if ir_op.is_comparison() {
                    IrType::U8
                } else {
                    common
                };
                let _ = (expr, span);
                Ok((Operand::Temp(dst), result_ty))
            }
        }
    }

    fn lower_cast(
        &mut self,
        kind: CastKind,
        target: TypeSpecifier,
        operand: ExprId,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        let target_kind = self.ctx.types.get(target.index).kind.clone();
        match kind {
            CastKind::Dynamic => {
                let Some(from) = self.expr_type_index(operand) else {
                    return Err((
                        CompileError::type_error(
                            "dynamic_cast of unknown type",
                        ),
                        span,
                    ));
                };
                let (src, _) = self.lower_expr(operand)?;
                let ref_cast = matches!(
                    target_kind,
                    TypeKind::Reference { .. }
                );
                self.record_typeinfo(from);
                self.record_typeinfo(target.index);
                let dst = self.temp();
                self.emit(Instr::DynamicCast {
                    dst,
                    src,
                    from,
                    to: target.index,
                    ref_cast,
                });
                Ok((Operand::Temp(dst), IrType::Ptr))
            }
            CastKind::Reinterpret | CastKind::Const => {
                let (value, _) = self.lower_expr(operand)?;
                Ok((value, self.ir_type(target.index)))
            }
            _ => {
                // Static / functional: numeric conversion, or pointer
                // adjustment for upcasts.
                if let (TypeKind::Pointer { pointee: to_p }, Some(from_index)) = (
                    target_kind.clone(),
                    self.expr_type_index(operand),
                ) {
                    if let TypeKind::Pointer { pointee: from_p } =
                        self.ctx.types.get(from_index).kind
                    {
                        if let (
                            TypeKind::Struct(from_s),
                            TypeKind::Struct(to_s),
                        ) = (
                            self.ctx.types.get(from_p).kind.clone(),
                            self.ctx.types.get(to_p).kind.clone(),
                        ) {
                            let (value, _) = self.lower_expr(operand)?;
                            let offset = self
                                .ctx
                                .types
                                .base_offset(to_s, from_s)
                                .unwrap_or(0);
                            if offset == 0 {
                                return Ok((value, IrType::Ptr));
                            }
                            let dst = self.temp();
                            self.emit(Instr::ComputeAddress {
                                dst,
                                base: value,
                                index: None,
                                scale: 1,
                                offset: offset as i64,
                            });
                            return Ok((Operand::Temp(dst), IrType::Ptr));
                        }
                    }
                }
                let (value, from) = self.lower_expr(operand)?;
                let to = self.ir_type(target.index);
                Ok((self.coerce(value, from, to), to))
            }
        }
    }

    /// Materialize a constructed temporary on the stack; the result is
    /// its address.
    fn lower_construct(
        &mut self,
        ty: TypeSpecifier,
        args: &[ExprId],
        span: Span,
    ) -> LResult<Operand> {
        match self.ctx.types.get(ty.index).kind.clone() {
            TypeKind::Struct(struct_id) => {
                let temp_name = self.ctx.interner.create("__temp");
                self.push_scope();
                let slot = self.declare_local(temp_name, ty.index, false);
                self.pop_scope();
                self.lower_struct_local_init(
                    slot,
                    struct_id,
                    Some(Initializer::Braced(args.to_vec())),
                )?;
                let dst = self.temp();
                self.emit(Instr::AddrOfLocal { dst, var: slot });
                self.set_lvalue(
                    dst,
                    LValueInfo::Temporary,
                    ValueCategory::PrValue,
                );
                Ok(Operand::Temp(dst))
            }
            _ => {
                // Scalar functional cast
                let value = match args.first() {
                    Some(&arg) => {
                        let (value, from) = self.lower_expr(arg)?;
                        self.coerce(value, from, self.ir_type(ty.index))
                    }
                    None => Operand::Const(0),
                };
                let _ = span;
                Ok(value)
            }
        }
    }

    fn lower_new(
        &mut self,
        ty: TypeSpecifier,
        count: Option<ExprId>,
        args: &[ExprId],
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        let elem_size = self.ctx.types.size_of(ty.index).max(1);
        let count_op = match count {
            Some(expr) => {
                let (value, from) = self.lower_expr(expr)?;
                Some(self.coerce(value, from, IrType::U64))
            }
            None => None,
        };
        let dst = self.temp();
        self.emit(Instr::NewObject {
            dst,
            elem_size,
            count: count_op,
        });
        match self.ctx.types.get(ty.index).kind.clone() {
            TypeKind::Struct(struct_id) => {
                let info = self.ctx.types.struct_info(struct_id).clone();
                if info.has_vtable {
                    self.emit_vptr_store(Operand::Temp(dst), struct_id);
                }
                let ctor = info
                    .methods
                    .iter()
                    .find(|m| {
                        m.is_ctor
                            && self
                                .ctx
                                .types
                                .signature(m.signature)
                                .params
                                .len()
                                == args.len()
                    })
                    .cloned();
                if let Some(ctor) = ctor {
                    let mut call_args =
                        vec![(Operand::Temp(dst), IrType::Ptr)];
                    let param_tys = self
                        .ctx
                        .types
                        .signature(ctor.signature)
                        .params
                        .clone();
                    for (arg, &param) in args.iter().zip(&param_tys) {
                        let (value, from) = self.lower_expr(*arg)?;
                        let to = self.ir_type(param);
                        let value = self.coerce(value, from, to);
                        call_args.push((value, to));
                    }
                    let mangled = self.mangled_of(ctor.decl)?;
                    self.emit(Instr::Call {
                        dst: None,
                        target: CallTarget::Direct(mangled),
                        args: call_args,
                        ret: IrType::Void,
                        variadic: false,
                    });
                } else if !args.is_empty() {
                    return Err((
                        CompileError::type_error(
                            "no matching constructor for new-expression",
                        ),
                        span,
                    ));
                }
            }
            _ => {
                if let Some(&arg) = args.first() {
                    let (value, from) = self.lower_expr(arg)?;
                    let to = self.ir_type(ty.index);
                    let value = self.coerce(value, from, to);
                    self.emit(Instr::Store {
                        addr: Operand::Temp(dst),
                        src: value,
                        ty: to,
                    });
                }
            }
        }
        Ok((Operand::Temp(dst), IrType::Ptr))
    }

    fn lower_delete(&mut self, operand: ExprId, array: bool, span: Span) -> LResult<()> {
        let Some(ptr_ty) = self.expr_type_index(operand) else {
            return Err((
                CompileError::type_error("delete of unknown type"),
                span,
            ));
        };
        let (ptr, _) = self.lower_expr(operand)?;
        // Destructor before deallocation
        if let TypeKind::Pointer { pointee } = self.ctx.types.get(ptr_ty).kind {
            if let TypeKind::Struct(struct_id) =
                self.ctx.types.get(pointee).kind
            {
                let dtor = self
                    .ctx
                    .types
                    .struct_info(struct_id)
                    .methods
                    .iter()
                    .find(|m| m.is_dtor)
                    .cloned();
                if let Some(dtor) = dtor {
                    match dtor.vtable_slot {
                        Some(slot) if dtor.is_virtual => {
                            self.emit(Instr::Call {
                                dst: None,
                                target: CallTarget::Virtual {
                                    object: ptr,
                                    slot,
                                },
                                args: vec![(ptr, IrType::Ptr)],
                                ret: IrType::Void,
                                variadic: false,
                            });
                        }
                        _ => {
                            let mangled = self.mangled_of(dtor.decl)?;
                            self.emit(Instr::Call {
                                dst: None,
                                target: CallTarget::Direct(mangled),
                                args: vec![(ptr, IrType::Ptr)],
                                ret: IrType::Void,
                                variadic: false,
                            });
                        }
                    }
                }
            }
        }
        self.emit(Instr::DeleteObject { ptr, array });
        Ok(())
    }

    fn lower_call(
        &mut self,
        callee: ExprId,
        args: &[ExprId],
        expr: ExprId,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        let ret_ty = self.expr_ir_type(expr);
        let callee_kind = self.ast.expr(callee).kind.clone();
        // Member calls carry the receiver
        if let ExprKind::Member {
            object,
            name,
            arrow,
        } = callee_kind
        {
            return self.lower_method_call(
                object, name, arrow, args, ret_ty, span,
            );
        }
        let (target, signature) = match callee_kind {
            ExprKind::Ident {
                decl: Some(decl), ..
            }
            | ExprKind::TemplateId {
                resolved: Some(decl),
                ..
            } => match self.ast.decl(decl).kind.clone() {
                DeclKind::Function(func) => {
                    let mangled = self.mangled_of(decl)?;
                    (CallTarget::Direct(mangled), Some(func.signature))
                }
                _ => {
                    let (value, _) = self.lower_expr(callee)?;
                    (CallTarget::Indirect(value), None)
                }
            },
            ExprKind::Lambda { fn_decl } => {
                let mangled = self.mangled_of(fn_decl)?;
                let signature = match &self.ast.decl(fn_decl).kind {
                    DeclKind::Function(func) => Some(func.signature),
                    _ => None,
                };
                (CallTarget::Direct(mangled), signature)
            }
            _ => {
                let (value, _) = self.lower_expr(callee)?;
                (CallTarget::Indirect(value), None)
            }
        };
        let (param_tys, variadic) = match signature {
            Some(sig) => {
                let sig = self.ctx.types.signature(sig).clone();
                (
                    sig.params.iter().map(|&p| self.ir_type(p)).collect(),
                    sig.variadic,
                )
            }
            None => (Vec::new(), false),
        };
        let mut call_args = Vec::new();
        for (i, &arg) in args.iter().enumerate() {
            let (value, from) = self.lower_expr(arg)?;
            let to = param_tys.get(i).copied().unwrap_or(from);
            let value = self.coerce(value, from, to);
            call_args.push((value, to));
        }
        let dst = if ret_ty == IrType::Void {
            None
        } else {
            Some(self.temp())
        };
        self.emit(Instr::Call {
            dst,
            target,
            args: call_args,
            ret: ret_ty,
            variadic,
        });
        let _ = span;
        Ok((
            dst.map(Operand::Temp).unwrap_or(Operand::Const(0)),
            ret_ty,
        ))
    }

    fn lower_method_call(
        &mut self,
        object: ExprId,
        name: StringHandle,
        arrow: bool,
        args: &[ExprId],
        ret_ty: IrType,
        span: Span,
    ) -> LResult<(Operand, IrType)> {
        let Some(mut object_ty) = self.expr_type_index(object) else {
            return Err((
                CompileError::type_error("method call on unknown type"),
                span,
            ));
        };
        let receiver = if arrow {
            let (value, _) = self.lower_expr(object)?;
            if let TypeKind::Pointer { pointee } =
                self.ctx.types.get(object_ty).kind
            {
                object_ty = pointee;
            }
            value
        } else {
            self.lower_addr(object)?
        };
        let TypeKind::Struct(id) = self.ctx.types.get(object_ty).kind else {
            return Err((
                CompileError::type_error("method call on a non-class type"),
                span,
            ));
        };
        let methods = self.ctx.types.find_methods(id, name);
        let method = methods
            .into_iter()
            .map(|(_, m)| m)
            .find(|m| {
                let sig = self.ctx.types.signature(m.signature);
                sig.params.len() == args.len()
                    || (sig.variadic && args.len() >= sig.params.len())
            })
            .ok_or_else(|| {
                (
                    CompileError::lookup(format!(
                        "no matching member function `{}`",
                        self.ctx.interner.view(name)
                    )),
                    span,
                )
            })?;
        let param_tys: Vec<IrType> = self
            .ctx
            .types
            .signature(method.signature)
            .params
            .iter()
            .map(|&p| self.ir_type(p))
            .collect();
        let mut call_args = vec![(receiver, IrType::Ptr)];
        for (i, &arg) in args.iter().enumerate() {
            let (value, from) = self.lower_expr(arg)?;
            let to = param_tys.get(i).copied().unwrap_or(from);
            let value = self.coerce(value, from, to);
            call_args.push((value, to));
        }
        let target = match method.vtable_slot {
            Some(slot) if method.is_virtual => CallTarget::Virtual {
                object: receiver,
                slot,
            },
            _ => CallTarget::Direct(self.mangled_of(method.decl)?),
        };
        let dst = if ret_ty == IrType::Void {
            None
        } else {
            Some(self.temp())
        };
        self.emit(Instr::Call {
            dst,
            target,
            args: call_args,
            ret: ret_ty,
            variadic: false,
        });
        Ok((
            dst.map(Operand::Temp).unwrap_or(Operand::Const(0)),
            ret_ty,
        ))
    }
}

fn ir_binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Rem => BinOp::Rem,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitXor => BinOp::Xor,
        BinaryOp::Eq => BinOp::CmpEq,
        BinaryOp::Ne => BinOp::CmpNe,
        BinaryOp::Lt => BinOp::CmpLt,
        BinaryOp::Le => BinOp::CmpLe,
        BinaryOp::Gt => BinOp::CmpGt,
        BinaryOp::Ge => BinOp::CmpGe,
        other => unreachable!("{:?} has no direct IR counterpart", other),
    }
}

/// The wider of two scalar types, preferring float, then width, then
/// unsignedness.
fn wider(a: IrType, b: IrType) -> IrType {
    if a == b {
        return a;
    }
    if a == IrType::F64 || b == IrType::F64 {
        return IrType::F64;
    }
    if a == IrType::F32 || b == IrType::F32 {
        return IrType::F32;
    }
    if a == IrType::Ptr || b == IrType::Ptr {
        return IrType::Ptr;
    }
    let rank = |t: IrType| match t {
        IrType::U64 => 8,
        IrType::I64 => 7,
        IrType::U32 => 6,
        IrType::I32 => 5,
        IrType::U16 => 4,
        IrType::I16 => 3,
        IrType::U8 => 2,
        IrType::I8 => 1,
        _ => 5,
    };
    let wide = if rank(a) >= rank(b) { a } else { b };
    // Everything arithmetic promotes to at least int
    match wide {
        IrType::I8 | IrType::I16 | IrType::U8 | IrType::U16 => IrType::I32,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wider_prefers_float_then_width() {
        assert_eq!(wider(IrType::I32, IrType::F64), IrType::F64);
        assert_eq!(wider(IrType::I32, IrType::I64), IrType::I64);
        assert_eq!(wider(IrType::U32, IrType::I32), IrType::U32);
        assert_eq!(wider(IrType::I8, IrType::I8), IrType::I8);
        assert_eq!(wider(IrType::I8, IrType::I16), IrType::I32);
    }

    #[test]
    fn test_ir_binop_mapping() {
        assert_eq!(ir_binop(BinaryOp::Add), BinOp::Add);
        assert_eq!(ir_binop(BinaryOp::Le), BinOp::CmpLe);
    }
}

//! Compile-time evaluation of constant expressions.
//!
//! A tree-walking interpreter over the AST, used for `static_assert`,
//! array bounds, non-type template arguments, and `constexpr` initializers
//! and calls. The evaluator owns its state: a bindings stack, a tracked
//! heap for `new`/`delete`, and step/recursion budgets. It never mutates
//! the AST or the registries; every failure carries the source span of the
//! offending subexpression.

use crate::{
    ast::{
        Ast, BinaryOp, CastKind, DeclKind, ExprId, ExprKind,
        Initializer, StmtId, StmtKind, TypeTrait, UnaryOp,
    },
    consts::{MAX_CONSTEXPR_DEPTH, MAX_CONSTEXPR_STEPS},
    error::CompileError,
    intern::StringHandle,
    types::{TypeIndex, TypeKind, TypeSpecifier},
    util::Span,
    Context,
};
use std::collections::HashMap;

pub type EvalResult<T> = Result<T, (CompileError, Span)>;

/// A compile-time value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int {
        value: i64,
        unsigned: bool,
        width: u16,
    },
    Float {
        value: f64,
        is_double: bool,
    },
    Bool(bool),
    /// Pointer into the evaluation heap: region id plus element offset.
    Pointer {
        region: usize,
        offset: i64,
    },
    Null,
    /// A struct value: initialized fields only. Reading a field that was
    /// never written is an error, not a default.
    Record(HashMap<StringHandle, Value>),
    Void,
}

impl Value {
    pub fn int(value: i64) -> Self {
        Value::Int {
            value,
            unsigned: false,
            width: 32,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int { value, .. } => Some(*value != 0),
            Value::Float { value, .. } => Some(*value != 0.0),
            Value::Pointer { .. } => Some(true),
            Value::Null => Some(false),
            _ => None,
        }
    }
}

/// One `new`-allocated region of the evaluation heap.
#[derive(Debug)]
struct Region {
    element: TypeIndex,
    data: Vec<Option<Value>>,
    is_array: bool,
    freed: bool,
    /// Span of the `new` for leak diagnostics.
    allocated_at: Span,
}

/// Where an lvalue lives, for assignment.
#[derive(Clone, Debug)]
enum Place {
    Local(StringHandle),
    HeapElem { region: usize, offset: i64 },
    Field { base: Box<Place>, name: StringHandle },
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Evaluator<'a> {
    ctx: &'a Context,
    ast: &'a Ast,
    steps: usize,
    depth: usize,
    heap: Vec<Region>,
    frames: Vec<HashMap<StringHandle, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a Context, ast: &'a Ast) -> Self {
        Self {
            ctx,
            ast,
            steps: 0,
            depth: 0,
            heap: Vec::new(),
            frames: vec![HashMap::new()],
        }
    }

    /// Evaluate a full constant expression. Checks the heap for leaks
    /// once the value is produced.
    pub fn eval(&mut self, expr: ExprId) -> EvalResult<Value> {
        let value = self.eval_expr(expr)?;
        if let Some(region) = self.heap.iter().find(|r| !r.freed) {
            return Err((
                CompileError::constexpr(
                    "allocation is not deallocated within the constant \
                     expression",
                ),
                region.allocated_at,
            ));
        }
        Ok(value)
    }

    /// Evaluate and require an integral result.
    pub fn eval_to_i64(&mut self, expr: ExprId) -> EvalResult<i64> {
        let span = self.ast.expr(expr).span;
        let value = self.eval(expr)?;
        value.as_i64().ok_or_else(|| {
            (
                CompileError::constexpr(
                    "expression does not evaluate to an integral constant",
                ),
                span,
            )
        })
    }

    fn tick(&mut self, span: Span) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > MAX_CONSTEXPR_STEPS {
            return Err((
                CompileError::constexpr(format!(
                    "constant expression exceeds the step limit of {}",
                    MAX_CONSTEXPR_STEPS
                )),
                span,
            ));
        }
        Ok(())
    }

    fn frame(&mut self) -> &mut HashMap<StringHandle, Value> {
        self.frames.last_mut().expect("evaluator frame stack empty")
    }

    fn eval_expr(&mut self, id: ExprId) -> EvalResult<Value> {
        let expr = self.ast.expr(id);
        let span = expr.span;
        self.tick(span)?;
        match &expr.kind {
            ExprKind::IntLit {
                value,
                unsigned,
                width,
            } => Ok(Value::Int {
                value: *value as i64,
                unsigned: *unsigned,
                width: *width as u16,
            }),
            ExprKind::FloatLit { value, is_double } => Ok(Value::Float {
                value: *value,
                is_double: *is_double,
            }),
            ExprKind::BoolLit(b) => Ok(Value::Bool(*b)),
            ExprKind::CharLit(c) => Ok(Value::Int {
                value: *c,
                unsigned: false,
                width: 8,
            }),
            ExprKind::Nullptr => Ok(Value::Null),
            ExprKind::Ident { qid, decl } => {
                if let Some(value) = self
                    .frames
                    .iter()
                    .rev()
                    .find_map(|f| f.get(&qid.name))
                {
                    return Ok(value.clone());
                }
                let Some(decl) = decl else {
                    return Err((
                        CompileError::constexpr(format!(
                            "`{}` is not usable in a constant expression",
                            self.ctx.interner.view(qid.name)
                        )),
                        span,
                    ));
                };
                self.eval_const_variable(*decl, span)
            }
            ExprKind::Unary { op, operand } => self.eval_unary(*op, *operand, span),
            ExprKind::Binary { op, lhs, rhs } => {
                self.eval_binary(*op, *lhs, *rhs, span)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond_span = self.ast.expr(*cond).span;
                let cond = self.eval_expr(*cond)?;
                let taken = cond.truthy().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "condition is not a constant boolean",
                        ),
                        cond_span,
                    )
                })?;
                self.eval_expr(if taken { *then_expr } else { *else_expr })
            }
            ExprKind::Call { callee, args } => self.eval_call(*callee, args, span),
            ExprKind::Member { object, name, arrow } => {
                let base = if *arrow {
                    let ptr = self.eval_expr(*object)?;
                    self.deref(ptr, span)?
                } else {
                    self.eval_expr(*object)?
                };
                match base {
                    Value::Record(fields) => {
                        fields.get(name).cloned().ok_or_else(|| {
                            (
                                CompileError::constexpr(format!(
                                    "member `{}` is not initialized in this \
                                     constant expression",
                                    self.ctx.interner.view(*name)
                                )),
                                span,
                            )
                        })
                    }
                    _ => Err((
                        CompileError::constexpr(
                            "member access on a non-struct constant value",
                        ),
                        span,
                    )),
                }
            }
            ExprKind::Subscript { object, index } => {
                let base = self.eval_expr(*object)?;
                let idx = self.eval_index(*index)?;
                let elem = self.pointer_add(base, idx, span)?;
                self.deref(elem, span)
            }
            ExprKind::Cast { kind, target, operand } => {
                let value = self.eval_expr(*operand)?;
                self.eval_cast(*kind, *target, value, span)
            }
            ExprKind::Construct { ty, args } => {
                self.eval_construct(*ty, args, span)
            }
            ExprKind::InitList { elems } => {
                // Bare braced list: only meaningful when an aggregate type
                // context supplies field names, so treat single-element
                // lists as their value and reject the rest.
                match elems.as_slice() {
                    [single] => self.eval_expr(*single),
                    _ => Err((
                        CompileError::constexpr(
                            "braced initializer is not a constant expression \
                             in this context",
                        ),
                        span,
                    )),
                }
            }
            ExprKind::SizeofType(spec) => {
                Ok(Value::Int {
                    value: self.ctx.types.size_of(spec.index) as i64,
                    unsigned: true,
                    width: 64,
                })
            }
            ExprKind::SizeofExpr(inner) => {
                let ty = self.ast.expr(*inner).ty.ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "operand of sizeof has no deduced type",
                        ),
                        span,
                    )
                })?;
                Ok(Value::Int {
                    value: self.ctx.types.size_of(ty.index) as i64,
                    unsigned: true,
                    width: 64,
                })
            }
            ExprKind::SizeofPack(_) => Err((
                CompileError::constexpr(
                    "sizeof... outside an instantiated pack context",
                ),
                span,
            )),
            ExprKind::Alignof(spec) => Ok(Value::Int {
                value: self.ctx.types.align_of(spec.index) as i64,
                unsigned: true,
                width: 64,
            }),
            ExprKind::TypeTrait { which, args } => {
                self.eval_type_trait(*which, args, span)
            }
            ExprKind::New { ty, count, args } => {
                self.eval_new(*ty, *count, args, span)
            }
            ExprKind::Delete { operand, array } => {
                let ptr = self.eval_expr(*operand)?;
                self.eval_delete(ptr, *array, span)?;
                Ok(Value::Void)
            }
            ExprKind::This => Err((
                CompileError::constexpr(
                    "`this` is not usable in this constant expression",
                ),
                span,
            )),
            ExprKind::StrLit(_) => Err((
                CompileError::constexpr(
                    "string literals are not usable in this constant \
                     expression",
                ),
                span,
            )),
            ExprKind::Requires { satisfied } => Ok(Value::Bool(*satisfied)),
            ExprKind::TemplateId { resolved, .. } => match resolved {
                Some(decl) => self.eval_const_variable(*decl, span),
                None => Err((
                    CompileError::constexpr(
                        "unresolved template reference in constant expression",
                    ),
                    span,
                )),
            },
            ExprKind::Lambda { .. }
            | ExprKind::Fold { .. }
            | ExprKind::PackExpansion { .. } => Err((
                CompileError::constexpr(
                    "expression is not a supported constant expression",
                ),
                span,
            )),
        }
    }

    /// Read a constexpr variable's value by evaluating its initializer.
    fn eval_const_variable(&mut self, decl: crate::ast::DeclId, span: Span) -> EvalResult<Value> {
        match &self.ast.decl(decl).kind {
            DeclKind::Variable { init, name, .. } => match init {
                Some(Initializer::Expr(expr)) => self.eval_expr(*expr),
                Some(Initializer::Braced(elems)) if elems.len() == 1 => {
                    self.eval_expr(elems[0])
                }
                _ => Err((
                    CompileError::constexpr(format!(
                        "`{}` has no constant initializer",
                        self.ctx.interner.view(name.name)
                    )),
                    span,
                )),
            },
            DeclKind::Function(f) => Err((
                CompileError::constexpr(format!(
                    "`{}` is a function, not a constant",
                    self.ctx.interner.view(f.name.name)
                )),
                span,
            )),
            _ => Err((
                CompileError::constexpr(
                    "declaration is not usable in a constant expression",
                ),
                span,
            )),
        }
    }

    fn eval_index(&mut self, expr: ExprId) -> EvalResult<i64> {
        let span = self.ast.expr(expr).span;
        let value = self.eval_expr(expr)?;
        value.as_i64().ok_or_else(|| {
            (
                CompileError::constexpr("subscript is not an integral constant"),
                span,
            )
        })
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: ExprId, span: Span) -> EvalResult<Value> {
        match op {
            UnaryOp::AddrOf => {
                // Only heap lvalues have addresses in this evaluator
                let place = self.eval_place(operand)?;
                match place {
                    Place::HeapElem { region, offset } => {
                        Ok(Value::Pointer { region, offset })
                    }
                    _ => Err((
                        CompileError::constexpr(
                            "cannot take this address in a constant expression",
                        ),
                        span,
                    )),
                }
            }
            UnaryOp::Deref => {
                let ptr = self.eval_expr(operand)?;
                self.deref(ptr, span)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let place = self.eval_place(operand)?;
                let old = self.read_place(&place, span)?;
                let Some(old_int) = old.as_i64() else {
                    return Err((
                        CompileError::constexpr(
                            "increment of a non-integral constant value",
                        ),
                        span,
                    ));
                };
                let delta = match op {
                    UnaryOp::PreInc | UnaryOp::PostInc => 1,
                    _ => -1,
                };
                let new = old_int.checked_add(delta).ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "integer overflow in constant expression",
                        ),
                        span,
                    )
                })?;
                let new_value = match old {
                    Value::Int { unsigned, width, .. } => Value::Int {
                        value: new,
                        unsigned,
                        width,
                    },
                    _ => Value::int(new),
                };
                self.write_place(&place, new_value.clone(), span)?;
                Ok(match op {
                    UnaryOp::PreInc | UnaryOp::PreDec => new_value,
                    _ => old,
                })
            }
            _ => {
                let value = self.eval_expr(operand)?;
                match (op, value) {
                    (UnaryOp::Plus, v) => Ok(v),
                    (UnaryOp::Neg, Value::Int { value, unsigned, width }) => {
                        let negated = value.checked_neg().ok_or_else(|| {
                            (
                                CompileError::constexpr(
                                    "integer overflow in constant expression",
                                ),
                                span,
                            )
                        })?;
                        Ok(Value::Int {
                            value: negated,
                            unsigned,
                            width,
                        })
                    }
                    (UnaryOp::Neg, Value::Float { value, is_double }) => {
                        Ok(Value::Float {
                            value: -value,
                            is_double,
                        })
                    }
                    (UnaryOp::Not, v) => {
                        let b = v.truthy().ok_or_else(|| {
                            (
                                CompileError::constexpr(
                                    "operand of `!` is not a constant boolean",
                                ),
                                span,
                            )
                        })?;
                        Ok(Value::Bool(!b))
                    }
                    (UnaryOp::BitNot, Value::Int { value, unsigned, width }) => {
                        Ok(Value::Int {
                            value: !value,
                            unsigned,
                            width,
                        })
                    }
                    _ => Err((
                        CompileError::constexpr(
                            "invalid operand to unary operator in constant \
                             expression",
                        ),
                        span,
                    )),
                }
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        span: Span,
    ) -> EvalResult<Value> {
        // Assignment and short-circuit forms need control over evaluation
        // order, so handle them before evaluating both sides.
        if op.is_assignment() {
            let place = self.eval_place(lhs)?;
            let value = if let Some(base) = op.compound_base() {
                let old = self.read_place(&place, span)?;
                let rhs_value = self.eval_expr(rhs)?;
                self.apply_arith(base, old, rhs_value, span)?
            } else {
                self.eval_expr(rhs)?
            };
            self.write_place(&place, value.clone(), span)?;
            return Ok(value);
        }
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let lhs_span = self.ast.expr(lhs).span;
                let left = self.eval_expr(lhs)?.truthy().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "operand is not a constant boolean",
                        ),
                        lhs_span,
                    )
                })?;
                let short = match op {
                    BinaryOp::LogicalAnd => !left,
                    _ => left,
                };
                if short {
                    return Ok(Value::Bool(left));
                }
                let rhs_span = self.ast.expr(rhs).span;
                let right = self.eval_expr(rhs)?.truthy().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "operand is not a constant boolean",
                        ),
                        rhs_span,
                    )
                })?;
                Ok(Value::Bool(right))
            }
            BinaryOp::Comma => {
                self.eval_expr(lhs)?;
                self.eval_expr(rhs)
            }
            _ => {
                let left = self.eval_expr(lhs)?;
                let right = self.eval_expr(rhs)?;
                self.apply_arith(op, left, right, span)
            }
        }
    }

    fn apply_arith(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        span: Span,
    ) -> EvalResult<Value> {
        use BinaryOp::*;
        // Pointer arithmetic first
        if let Value::Pointer { .. } = left {
            return match op {
                Add | Sub => {
                    let Some(delta) = right.as_i64() else {
                        return Err((
                            CompileError::constexpr(
                                "pointer arithmetic with a non-integral \
                                 constant",
                            ),
                            span,
                        ));
                    };
                    let delta = if op == Sub { -delta } else { delta };
                    self.pointer_add(left, delta, span)
                }
                Eq | Ne => {
                    let same = left == right;
                    Ok(Value::Bool(if op == Eq { same } else { !same }))
                }
                _ => Err((
                    CompileError::constexpr(
                        "invalid pointer operation in constant expression",
                    ),
                    span,
                )),
            };
        }
        // Mixed float arithmetic
        let float_pair = |v: &Value| -> Option<(f64, bool)> {
            match v {
                Value::Float { value, is_double } => Some((*value, *is_double)),
                Value::Int { value, .. } => Some((*value as f64, true)),
                Value::Bool(b) => Some((*b as i64 as f64, true)),
                _ => None,
            }
        };
        let is_float = matches!(left, Value::Float { .. })
            || matches!(right, Value::Float { .. });
        if is_float {
            let (Some((a, ad)), Some((b, bd))) =
                (float_pair(&left), float_pair(&right))
            else {
                return Err((
                    CompileError::constexpr(
                        "invalid operands in constant expression",
                    ),
                    span,
                ));
            };
            let is_double = ad && bd;
            return match op {
                Add => Ok(Value::Float { value: a + b, is_double }),
                Sub => Ok(Value::Float { value: a - b, is_double }),
                Mul => Ok(Value::Float { value: a * b, is_double }),
                Div => {
                    if b == 0.0 {
                        Err((
                            CompileError::constexpr(
                                "division by zero in constant expression",
                            ),
                            span,
                        ))
                    } else {
                        Ok(Value::Float { value: a / b, is_double })
                    }
                }
                Lt => Ok(Value::Bool(a < b)),
                Gt => Ok(Value::Bool(a > b)),
                Le => Ok(Value::Bool(a <= b)),
                Ge => Ok(Value::Bool(a >= b)),
                Eq => Ok(Value::Bool(a == b)),
                Ne => Ok(Value::Bool(a != b)),
                Spaceship => Ok(Value::int(if a < b {
                    -1
                } else if a > b {
                    1
                } else {
                    0
                })),
                _ => Err((
                    CompileError::constexpr(
                        "invalid floating-point operation in constant \
                         expression",
                    ),
                    span,
                )),
            };
        }
        // Integral arithmetic
        let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) else {
            return Err((
                CompileError::constexpr(
                    "invalid operands in constant expression",
                ),
                span,
            ));
        };
        let unsigned = matches!(left, Value::Int { unsigned: true, .. })
            || matches!(right, Value::Int { unsigned: true, .. });
        let width = match (&left, &right) {
            (Value::Int { width: w1, .. }, Value::Int { width: w2, .. }) => {
                (*w1).max(*w2).max(32)
            }
            (Value::Int { width, .. }, _) | (_, Value::Int { width, .. }) => {
                (*width).max(32)
            }
            _ => 32,
        };
        let overflow = |r: Option<i64>| -> EvalResult<i64> {
            r.ok_or_else(|| {
                (
                    CompileError::constexpr(
                        "integer overflow in constant expression",
                    ),
                    span,
                )
            })
        };
        // Unsigned results wrap at their width; a signed result that no
        // longer fits its width is an overflow diagnostic.
        let wrap = |value: i64| -> EvalResult<Value> {
            let truncated = truncate_to_width(value, width, !unsigned);
            if !unsigned && truncated != value {
                return Err((
                    CompileError::constexpr(
                        "integer overflow in constant expression",
                    ),
                    span,
                ));
            }
            Ok(Value::Int {
                value: truncated,
                unsigned,
                width,
            })
        };
        Ok(match op {
            Add => {
                if unsigned {
                    wrap((a as u64).wrapping_add(b as u64) as i64)?
                } else {
                    wrap(overflow(a.checked_add(b))?)?
                }
            }
            Sub => {
                if unsigned {
                    wrap((a as u64).wrapping_sub(b as u64) as i64)?
                } else {
                    wrap(overflow(a.checked_sub(b))?)?
                }
            }
            Mul => {
                if unsigned {
                    wrap((a as u64).wrapping_mul(b as u64) as i64)?
                } else {
                    wrap(overflow(a.checked_mul(b))?)?
                }
            }
            Div | Rem => {
                if b == 0 {
                    return Err((
                        CompileError::constexpr(
                            "division by zero in constant expression",
                        ),
                        span,
                    ));
                }
                if unsigned {
                    let (ua, ub) = (a as u64, b as u64);
                    wrap(if op == Div { ua / ub } else { ua % ub } as i64)?
                } else {
                    wrap(overflow(if op == Div {
                        a.checked_div(b)
                    } else {
                        a.checked_rem(b)
                    })?)?
                }
            }
            Shl | Shr => {
                if !(0..width as i64).contains(&b) {
                    return Err((
                        CompileError::constexpr(format!(
                            "shift amount {} is out of range for a {}-bit \
                             value",
                            b, width
                        )),
                        span,
                    ));
                }
                if op == Shl {
                    wrap(overflow(a.checked_shl(b as u32))?)?
                } else if unsigned {
                    wrap(((a as u64) >> b) as i64)?
                } else {
                    wrap(a >> b)?
                }
            }
            BitAnd => wrap(a & b)?,
            BitOr => wrap(a | b)?,
            BitXor => wrap(a ^ b)?,
            Lt => Value::Bool(a < b),
            Gt => Value::Bool(a > b),
            Le => Value::Bool(a <= b),
            Ge => Value::Bool(a >= b),
            Eq => Value::Bool(a == b),
            Ne => Value::Bool(a != b),
            Spaceship => Value::int(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }),
            _ => {
                return Err((
                    CompileError::constexpr(
                        "operator is not valid in a constant expression",
                    ),
                    span,
                ))
            }
        })
    }

    fn eval_cast(
        &mut self,
        _kind: CastKind,
        target: TypeSpecifier,
        value: Value,
        span: Span,
    ) -> EvalResult<Value> {
        let info = self.ctx.types.get(target.index);
        match &info.kind {
            TypeKind::Bool => {
                let b = value.truthy().ok_or_else(|| {
                    (
                        CompileError::constexpr("value is not convertible to bool"),
                        span,
                    )
                })?;
                Ok(Value::Bool(b))
            }
            TypeKind::Int { width, signed } => {
                let raw = match value {
                    Value::Int { value, .. } => value,
                    Value::Bool(b) => b as i64,
                    Value::Float { value, .. } => value as i64,
                    _ => {
                        return Err((
                            CompileError::constexpr(
                                "value is not convertible to an integer",
                            ),
                            span,
                        ))
                    }
                };
                let truncated = truncate_to_width(raw, *width, *signed);
                Ok(Value::Int {
                    value: truncated,
                    unsigned: !signed,
                    width: *width,
                })
            }
            TypeKind::Float => {
                let f = match value {
                    Value::Int { value, .. } => value as f64,
                    Value::Bool(b) => b as i64 as f64,
                    Value::Float { value, .. } => value,
                    _ => {
                        return Err((
                            CompileError::constexpr(
                                "value is not convertible to float",
                            ),
                            span,
                        ))
                    }
                };
                Ok(Value::Float {
                    value: f as f32 as f64,
                    is_double: false,
                })
            }
            TypeKind::Double => {
                let f = match value {
                    Value::Int { value, .. } => value as f64,
                    Value::Bool(b) => b as i64 as f64,
                    Value::Float { value, .. } => value,
                    _ => {
                        return Err((
                            CompileError::constexpr(
                                "value is not convertible to double",
                            ),
                            span,
                        ))
                    }
                };
                Ok(Value::Float {
                    value: f,
                    is_double: true,
                })
            }
            TypeKind::Pointer { .. } => match value {
                Value::Pointer { .. } | Value::Null => Ok(value),
                _ => Err((
                    CompileError::constexpr(
                        "value is not convertible to a pointer in a constant \
                         expression",
                    ),
                    span,
                )),
            },
            TypeKind::Enum(_) => {
                let raw = value.as_i64().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "value is not convertible to an enumeration",
                        ),
                        span,
                    )
                })?;
                Ok(Value::int(raw))
            }
            _ => Ok(value),
        }
    }

    fn eval_type_trait(
        &mut self,
        which: TypeTrait,
        args: &[TypeSpecifier],
        span: Span,
    ) -> EvalResult<Value> {
        let types = &self.ctx.types;
        let arg = |i: usize| -> EvalResult<TypeIndex> {
            args.get(i).map(|s| s.index).ok_or_else(|| {
                (
                    CompileError::constexpr("missing type-trait argument"),
                    span,
                )
            })
        };
        let result = match which {
            TypeTrait::IsSame => arg(0)? == arg(1)?,
            TypeTrait::IsBaseOf => {
                match (&types.get(arg(0)?).kind, &types.get(arg(1)?).kind) {
                    (TypeKind::Struct(a), TypeKind::Struct(b)) => {
                        types.is_base_of(*a, *b)
                    }
                    _ => false,
                }
            }
            TypeTrait::IsClass => {
                matches!(types.get(arg(0)?).kind, TypeKind::Struct(id)
                    if !types.struct_info(id).is_union)
            }
            TypeTrait::IsEnum => {
                matches!(types.get(arg(0)?).kind, TypeKind::Enum(_))
            }
            TypeTrait::IsUnion => {
                matches!(types.get(arg(0)?).kind, TypeKind::Struct(id)
                    if types.struct_info(id).is_union)
            }
            TypeTrait::IsPointer => {
                matches!(types.get(arg(0)?).kind, TypeKind::Pointer { .. })
            }
            TypeTrait::IsReference => {
                matches!(types.get(arg(0)?).kind, TypeKind::Reference { .. })
            }
            TypeTrait::IsIntegral => types.is_integral(arg(0)?),
            TypeTrait::IsFloatingPoint => types.is_floating(arg(0)?),
            TypeTrait::IsTriviallyCopyable => {
                match types.get(arg(0)?).kind {
                    TypeKind::Struct(id) => {
                        let info = types.struct_info(id);
                        !info.has_vtable && !info.has_user_destructor
                    }
                    TypeKind::Void => false,
                    _ => true,
                }
            }
            TypeTrait::IsPolymorphic => {
                matches!(types.get(arg(0)?).kind, TypeKind::Struct(id)
                    if types.struct_info(id).has_vtable)
            }
        };
        Ok(Value::Bool(result))
    }

    fn eval_new(
        &mut self,
        ty: TypeSpecifier,
        count: Option<ExprId>,
        args: &[ExprId],
        span: Span,
    ) -> EvalResult<Value> {
        let (len, is_array) = match count {
            Some(count_expr) => {
                let count_span = self.ast.expr(count_expr).span;
                let n = self.eval_expr(count_expr)?.as_i64().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "array bound is not an integral constant",
                        ),
                        count_span,
                    )
                })?;
                if n < 0 {
                    return Err((
                        CompileError::constexpr("negative array bound"),
                        count_span,
                    ));
                }
                (n as usize, true)
            }
            None => (1, false),
        };
        let mut data: Vec<Option<Value>> = vec![None; len];
        if !is_array {
            data[0] = Some(if args.is_empty() {
                default_value_for(self.ctx, ty.index)
            } else {
                self.eval_expr(args[0])?
            });
        } else {
            // Array elements are value-initialized
            for slot in &mut data {
                *slot = Some(default_value_for(self.ctx, ty.index));
            }
        }
        let region = self.heap.len();
        self.heap.push(Region {
            element: ty.index,
            data,
            is_array,
            freed: false,
            allocated_at: span,
        });
        Ok(Value::Pointer { region, offset: 0 })
    }

    fn eval_delete(&mut self, ptr: Value, array: bool, span: Span) -> EvalResult<()> {
        let Value::Pointer { region, offset } = ptr else {
            if ptr == Value::Null {
                return Ok(());
            }
            return Err((
                CompileError::constexpr("delete of a non-pointer constant value"),
                span,
            ));
        };
        if offset != 0 {
            return Err((
                CompileError::constexpr(
                    "delete of a pointer that is not the start of an \
                     allocation",
                ),
                span,
            ));
        }
        let r = &mut self.heap[region];
        if r.freed {
            return Err((
                CompileError::constexpr("double delete in constant expression"),
                span,
            ));
        }
        if r.is_array != array {
            return Err((
                CompileError::constexpr(if array {
                    "delete[] of a non-array allocation"
                } else {
                    "delete of an array allocation (use delete[])"
                }),
                span,
            ));
        }
        r.freed = true;
        Ok(())
    }

    fn pointer_add(&mut self, base: Value, delta: i64, span: Span) -> EvalResult<Value> {
        match base {
            Value::Pointer { region, offset } => {
                let len = self.heap[region].data.len() as i64;
                let new_offset = offset + delta;
                // One-past-the-end is representable but not dereferenceable
                if !(0..=len).contains(&new_offset) {
                    return Err((
                        CompileError::constexpr(
                            "pointer arithmetic moves outside the allocation",
                        ),
                        span,
                    ));
                }
                Ok(Value::Pointer {
                    region,
                    offset: new_offset,
                })
            }
            _ => Err((
                CompileError::constexpr(
                    "subscript of a non-pointer constant value",
                ),
                span,
            )),
        }
    }

    fn deref(&mut self, ptr: Value, span: Span) -> EvalResult<Value> {
        let Value::Pointer { region, offset } = ptr else {
            return Err((
                CompileError::constexpr(
                    "dereference of a non-pointer constant value",
                ),
                span,
            ));
        };
        let r = &self.heap[region];
        if r.freed {
            return Err((
                CompileError::constexpr("use after delete in constant expression"),
                span,
            ));
        }
        if offset < 0 || offset as usize >= r.data.len() {
            return Err((
                CompileError::constexpr("out-of-bounds access in constant expression"),
                span,
            ));
        }
        r.data[offset as usize].clone().ok_or_else(|| {
            (
                CompileError::constexpr("read of uninitialized heap element"),
                span,
            )
        })
    }

    fn eval_construct(
        &mut self,
        ty: TypeSpecifier,
        args: &[ExprId],
        span: Span,
    ) -> EvalResult<Value> {
        let kind = self.ctx.types.get(ty.index).kind.clone();
        match kind {
            TypeKind::Struct(id) => {
                let info = self.ctx.types.struct_info(id);
                let ctor = info
                    .methods
                    .iter()
                    .find(|m| m.is_ctor && {
                        let sig = self.ctx.types.signature(m.signature);
                        sig.params.len() == args.len()
                    })
                    .cloned();
                match ctor {
                    Some(ctor) => {
                        let fields = info
                            .members
                            .iter()
                            .map(|m| m.name)
                            .collect::<Vec<_>>();
                        self.eval_ctor_call(ctor, &fields, args, span)
                    }
                    None => {
                        // Aggregate initialization: arguments map to the
                        // fields in declaration order.
                        let members: Vec<_> =
                            info.members.iter().map(|m| m.name).collect();
                        if args.len() > members.len() {
                            return Err((
                                CompileError::constexpr(
                                    "too many initializers for aggregate",
                                ),
                                span,
                            ));
                        }
                        let mut fields = HashMap::new();
                        for (name, arg) in members.iter().zip(args) {
                            let value = self.eval_expr(*arg)?;
                            fields.insert(*name, value);
                        }
                        Ok(Value::Record(fields))
                    }
                }
            }
            _ => {
                // Scalar functional cast T(x) / value-init T()
                if let Some(&arg) = args.first() {
                    let value = self.eval_expr(arg)?;
                    self.eval_cast(CastKind::Functional, ty, value, span)
                } else {
                    Ok(default_value_for(self.ctx, ty.index))
                }
            }
        }
    }

    /// Constructor call: evaluate the member-initializer list into a fresh
    /// record. Constructor *body* statements are not executed; a
    /// constructor with a non-empty body is rejected rather than evaluated
    /// wrongly.
    fn eval_ctor_call(
        &mut self,
        ctor: crate::types::MethodInfo,
        _fields: &[StringHandle],
        args: &[ExprId],
        span: Span,
    ) -> EvalResult<Value> {
        let DeclKind::Function(func) = &self.ast.decl(ctor.decl).kind else {
            return Err((
                CompileError::constexpr("constructor has no declaration"),
                span,
            ));
        };
        if let Some(body) = func.body {
            if !compound_is_empty(self.ast, body) {
                return Err((
                    CompileError::constexpr(
                        "constructor bodies are not evaluated in constant \
                         expressions; only member initializer lists are",
                    ),
                    span,
                ));
            }
        }
        self.enter_call(span)?;
        let mut frame = HashMap::new();
        for (param, arg) in func.params.iter().zip(args) {
            let value = self.eval_expr(*arg)?;
            if let Some(name) = param.name {
                frame.insert(name, value);
            }
        }
        self.frames.push(frame);
        let mut fields = HashMap::new();
        let inits = func.ctor_inits.clone();
        let result = (|| {
            for (member, init_args) in &inits {
                let value = match init_args.as_slice() {
                    [] => Value::int(0),
                    [single] => self.eval_expr(*single)?,
                    _ => {
                        return Err((
                            CompileError::constexpr(
                                "multi-argument member initializers are not \
                                 supported in constant expressions",
                            ),
                            span,
                        ))
                    }
                };
                fields.insert(*member, value);
            }
            Ok(Value::Record(fields))
        })();
        self.frames.pop();
        self.depth -= 1;
        result
    }

    fn enter_call(&mut self, span: Span) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_CONSTEXPR_DEPTH {
            self.depth -= 1;
            return Err((
                CompileError::constexpr(format!(
                    "constant expression exceeds the recursion limit of {}",
                    MAX_CONSTEXPR_DEPTH
                )),
                span,
            ));
        }
        Ok(())
    }

    fn eval_call(&mut self, callee: ExprId, args: &[ExprId], span: Span) -> EvalResult<Value> {
        let callee_expr = self.ast.expr(callee);
        let decl = match &callee_expr.kind {
            ExprKind::Ident { decl: Some(decl), .. } => *decl,
            ExprKind::TemplateId {
                resolved: Some(decl),
                ..
            } => *decl,
            _ => {
                return Err((
                    CompileError::constexpr(
                        "callee is not a constant-evaluable function",
                    ),
                    span,
                ))
            }
        };
        let DeclKind::Function(func) = &self.ast.decl(decl).kind else {
            return Err((
                CompileError::constexpr("call of a non-function in constant expression"),
                span,
            ));
        };
        if func.specs.constexpr_kind == crate::ast::ConstexprKind::No {
            return Err((
                CompileError::constexpr(format!(
                    "call to non-constexpr function `{}`",
                    self.ctx.interner.view(func.name.name)
                )),
                span,
            ));
        }
        let Some(body) = func.body else {
            return Err((
                CompileError::constexpr(format!(
                    "constexpr function `{}` is used before it is defined",
                    self.ctx.interner.view(func.name.name)
                )),
                span,
            ));
        };
        let params = func.params.clone();
        self.enter_call(span)?;
        let mut frame = HashMap::new();
        for (param, arg) in params.iter().zip(args) {
            let value = self.eval_expr(*arg)?;
            if let Some(name) = param.name {
                frame.insert(name, value);
            }
        }
        self.frames.push(frame);
        let flow = self.eval_stmt(body);
        self.frames.pop();
        self.depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Void),
        }
    }

    fn eval_stmt(&mut self, id: StmtId) -> EvalResult<Flow> {
        let stmt = self.ast.stmt(id);
        let span = stmt.span;
        self.tick(span)?;
        match &stmt.kind {
            StmtKind::Compound(stmts) => {
                for &inner in stmts {
                    match self.eval_stmt(inner)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(*expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Decl(decl) => {
                if let DeclKind::Variable { name, init, .. } =
                    &self.ast.decl(*decl).kind
                {
                    let value = match init {
                        Some(Initializer::Expr(expr)) => self.eval_expr(*expr)?,
                        Some(Initializer::Braced(elems)) => {
                            match elems.as_slice() {
                                [] => Value::int(0),
                                [single] => self.eval_expr(*single)?,
                                _ => {
                                    return Err((
                                        CompileError::constexpr(
                                            "unsupported braced initializer \
                                             in constant expression",
                                        ),
                                        span,
                                    ))
                                }
                            }
                        }
                        None => {
                            return Err((
                                CompileError::constexpr(
                                    "uninitialized variable in constant \
                                     expression",
                                ),
                                span,
                            ))
                        }
                    };
                    let name = name.name;
                    self.frame().insert(name, value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(*expr)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let cond_span = self.ast.expr(*cond).span;
                let taken = self.eval_expr(*cond)?.truthy().ok_or_else(|| {
                    (
                        CompileError::constexpr(
                            "condition is not a constant boolean",
                        ),
                        cond_span,
                    )
                })?;
                if taken {
                    self.eval_stmt(*then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.eval_stmt(*else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let cond_span = self.ast.expr(*cond).span;
                    let keep = self.eval_expr(*cond)?.truthy().ok_or_else(|| {
                        (
                            CompileError::constexpr(
                                "condition is not a constant boolean",
                            ),
                            cond_span,
                        )
                    })?;
                    if !keep {
                        break;
                    }
                    match self.eval_stmt(*body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        _ => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, cond } => {
                loop {
                    match self.eval_stmt(*body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        _ => {}
                    }
                    let cond_span = self.ast.expr(*cond).span;
                    let keep = self.eval_expr(*cond)?.truthy().ok_or_else(|| {
                        (
                            CompileError::constexpr(
                                "condition is not a constant boolean",
                            ),
                            cond_span,
                        )
                    })?;
                    if !keep {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.eval_stmt(*init)?;
                }
                loop {
                    if let Some(cond) = cond {
                        let cond_span = self.ast.expr(*cond).span;
                        let keep =
                            self.eval_expr(*cond)?.truthy().ok_or_else(|| {
                                (
                                    CompileError::constexpr(
                                        "condition is not a constant boolean",
                                    ),
                                    cond_span,
                                )
                            })?;
                        if !keep {
                            break;
                        }
                    }
                    match self.eval_stmt(*body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        _ => {}
                    }
                    if let Some(step) = step {
                        self.eval_expr(*step)?;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Empty => Ok(Flow::Normal),
            StmtKind::Throw(_)
            | StmtKind::Try { .. }
            | StmtKind::Switch { .. }
            | StmtKind::CaseLabel { .. }
            | StmtKind::RangeFor { .. } => Err((
                CompileError::constexpr(
                    "statement is not supported in constant expressions",
                ),
                span,
            )),
        }
    }

    // --- lvalue plumbing ---

    fn eval_place(&mut self, id: ExprId) -> EvalResult<Place> {
        let expr = self.ast.expr(id);
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident { qid, .. } => Ok(Place::Local(qid.name)),
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let ptr = self.eval_expr(*operand)?;
                match ptr {
                    Value::Pointer { region, offset } => {
                        Ok(Place::HeapElem { region, offset })
                    }
                    _ => Err((
                        CompileError::constexpr(
                            "dereference of a non-pointer constant value",
                        ),
                        span,
                    )),
                }
            }
            ExprKind::Subscript { object, index } => {
                let base = self.eval_expr(*object)?;
                let idx = self.eval_index(*index)?;
                match self.pointer_add(base, idx, span)? {
                    Value::Pointer { region, offset } => {
                        Ok(Place::HeapElem { region, offset })
                    }
                    _ => unreachable!("pointer_add returns pointers"),
                }
            }
            ExprKind::Member {
                object,
                name,
                arrow: false,
            } => {
                let base = self.eval_place(*object)?;
                Ok(Place::Field {
                    base: Box::new(base),
                    name: *name,
                })
            }
            _ => Err((
                CompileError::constexpr(
                    "expression is not assignable in a constant expression",
                ),
                span,
            )),
        }
    }

    fn read_place(&mut self, place: &Place, span: Span) -> EvalResult<Value> {
        match place {
            Place::Local(name) => self
                .frames
                .iter()
                .rev()
                .find_map(|f| f.get(name))
                .cloned()
                .ok_or_else(|| {
                    (
                        CompileError::constexpr(format!(
                            "`{}` is not a constant-evaluable variable",
                            self.ctx.interner.view(*name)
                        )),
                        span,
                    )
                }),
            Place::HeapElem { region, offset } => self.deref(
                Value::Pointer {
                    region: *region,
                    offset: *offset,
                },
                span,
            ),
            Place::Field { base, name } => {
                let record = self.read_place(base, span)?;
                match record {
                    Value::Record(fields) => {
                        fields.get(name).cloned().ok_or_else(|| {
                            (
                                CompileError::constexpr(format!(
                                    "member `{}` is not initialized in this \
                                     constant expression",
                                    self.ctx.interner.view(*name)
                                )),
                                span,
                            )
                        })
                    }
                    _ => Err((
                        CompileError::constexpr(
                            "member access on a non-struct constant value",
                        ),
                        span,
                    )),
                }
            }
        }
    }

    fn write_place(&mut self, place: &Place, value: Value, span: Span) -> EvalResult<()> {
        match place {
            Place::Local(name) => {
                for frame in self.frames.iter_mut().rev() {
                    if let Some(slot) = frame.get_mut(name) {
                        *slot = value;
                        return Ok(());
                    }
                }
                // New binding in the innermost frame
                self.frame().insert(*name, value);
                Ok(())
            }
            Place::HeapElem { region, offset } => {
                let r = &mut self.heap[*region];
                if r.freed {
                    return Err((
                        CompileError::constexpr(
                            "use after delete in constant expression",
                        ),
                        span,
                    ));
                }
                if *offset < 0 || *offset as usize >= r.data.len() {
                    return Err((
                        CompileError::constexpr(
                            "out-of-bounds write in constant expression",
                        ),
                        span,
                    ));
                }
                r.data[*offset as usize] = Some(value);
                Ok(())
            }
            Place::Field { base, name } => {
                let mut record = self.read_place(base, span)?;
                match &mut record {
                    Value::Record(fields) => {
                        fields.insert(*name, value);
                    }
                    _ => {
                        return Err((
                            CompileError::constexpr(
                                "member access on a non-struct constant value",
                            ),
                            span,
                        ))
                    }
                }
                self.write_place(base, record, span)
            }
        }
    }
}

fn compound_is_empty(ast: &Ast, id: StmtId) -> bool {
    match &ast.stmt(id).kind {
        StmtKind::Compound(stmts) => stmts.is_empty(),
        StmtKind::Empty => true,
        _ => false,
    }
}

/// The value a scalar gets from value-initialization.
fn default_value_for(ctx: &Context, ty: TypeIndex) -> Value {
    match &ctx.types.get(ty).kind {
        TypeKind::Bool => Value::Bool(false),
        TypeKind::Int { width, signed } => Value::Int {
            value: 0,
            unsigned: !signed,
            width: *width,
        },
        TypeKind::Float => Value::Float {
            value: 0.0,
            is_double: false,
        },
        TypeKind::Double => Value::Float {
            value: 0.0,
            is_double: true,
        },
        TypeKind::Pointer { .. } => Value::Null,
        TypeKind::Struct(_) => Value::Record(HashMap::new()),
        _ => Value::int(0),
    }
}

/// Helper: clamp an i64 to an integer type's width and signedness.
fn truncate_to_width(value: i64, width: u16, signed: bool) -> i64 {
    if width >= 64 {
        return value;
    }
    let mask = (1u64 << width) - 1;
    let truncated = (value as u64) & mask;
    if signed && truncated & (1 << (width - 1)) != 0 {
        (truncated | !mask) as i64
    } else {
        truncated as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width(300, 8, false), 44);
        assert_eq!(truncate_to_width(200, 8, true), -56);
        assert_eq!(truncate_to_width(-1, 8, false), 255);
        assert_eq!(truncate_to_width(i64::MIN, 64, true), i64::MIN);
    }

    // Expression-level behavior is covered through the parser in the
    // integration suites, where real source reaches the evaluator.
}

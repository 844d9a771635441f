//! The type verifier (§4): walks verified expressions bottom-up, producing
//! a [`QualType`] per node and writing it into the owning [`Context`].
//! Declarations additionally drive constant folding (§4.7.1, via
//! [`crate::ir`]), struct/enum completion (§4.3), and cyclic-dependency
//! detection (§4.4, via [`WorkGraph::cyclic_tracker`]).
//!
//! This module implements the verification rules for the expression and
//! statement forms §8's worked scenarios exercise directly (arithmetic,
//! identifiers, declarations, calls, `if`/`while`, casts, pointer/array
//! patterns); forms outside that set fall through to
//! [`TypeVerifier::unsupported`], which poisons rather than panics, since a
//! production verifier always has to tolerate AST shapes it doesn't yet
//! have a rule for.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use icarus_ast::{Argument, DeclFlags, Enumerator, FieldDecl, Node, NodeId, Operator, Scope, TerminalValue};
use icarus_diagnostics::{Diagnostic, DiagnosticConsumer};

use crate::compile::Importer;
use crate::context::{BoundParameters, CalleeLocator, Context};
use crate::dispatch::{self, DispatchError, DispatchTableBuilder};
use crate::generics::GenericInstantiator;
use crate::ir::builder::Builder;
use crate::ir::evaluator::{EvalError, Evaluator, Value};
use crate::ir::{ArithOp, CmpOp, Exit, Module as IrModule, Operand, Reg, Subroutine, SubroutineId};
use crate::pattern;
use crate::resolver::{self, ModuleExports};
use crate::types::completion::Completeness;
use crate::types::lattice::{join, meet};
use crate::types::{EnumKind, Field, ModuleId, Primitive, QualType, Qualifiers, Type, TypeHandle, TypeInterner};
use crate::work::{Kind, WorkGraph, WorkItem};

pub struct TypeVerifier<'a, D: DiagnosticConsumer> {
    pub interner: &'a TypeInterner,
    pub work: &'a WorkGraph<D>,
    pub exports: &'a dyn ModuleExports,
    pub module: ModuleId,
    /// Resolves `import "locator"` (§6.1). `None` means this verifier's
    /// driver never offered one, so any `Import` node poisons with
    /// `InvalidImport` rather than calling through a dangling trait object.
    pub importer: Option<&'a RefCell<&'a mut dyn Importer>>,
}

/// Accumulates the subroutines a single constant-folding evaluation lowers
/// (§4.7.1): the root thunk plus, recursively, the body of any function it
/// calls. `registry` memoizes that lowering per declaration so a
/// self-recursive call (`f` calling `f`, §8 scenario 3) reuses the
/// in-progress subroutine's id instead of lowering it again.
#[derive(Default)]
struct FoldSession {
    subs: Vec<Subroutine>,
    registry: HashMap<NodeId, SubroutineId>,
}

impl FoldSession {
    /// Reserves the next `SubroutineId` and pushes a placeholder, so a
    /// lowering in progress can be referred to by id (and memoized in
    /// `registry`) before its body is built.
    fn reserve(&mut self) -> SubroutineId {
        let id = SubroutineId(self.subs.len() as u32);
        self.subs.push(Subroutine::new(id));
        id
    }
}

impl<'a, D: DiagnosticConsumer> TypeVerifier<'a, D> {
    pub fn new(interner: &'a TypeInterner, work: &'a WorkGraph<D>, exports: &'a dyn ModuleExports, module: ModuleId) -> Self {
        TypeVerifier { interner, work, exports, module, importer: None }
    }

    /// Attaches an [`Importer`] so `import "locator"` expressions resolve
    /// instead of poisoning (§6.1).
    pub fn with_importer(mut self, importer: &'a RefCell<&'a mut dyn Importer>) -> Self {
        self.importer = Some(importer);
        self
    }

    fn unsupported(&self) -> QualType {
        QualType::poisoned(self.interner.void())
    }

    fn poison(&self, diagnostic: Diagnostic) -> QualType {
        let ty = self.interner.void();
        self.work.emit(diagnostic);
        QualType::poisoned(ty)
    }

    fn describe(&self, ty: &TypeHandle) -> String {
        match &**ty {
            Type::Primitive(p) => format!("{p:?}"),
            Type::Ptr(inner) => format!("*{}", self.describe(inner)),
            Type::BufPtr(inner) => format!("[*]{}", self.describe(inner)),
            Type::Arr(inner, n) => format!("[{n}]{}", self.describe(inner)),
            Type::ArrUnknown(inner) => format!("[]{}", self.describe(inner)),
            Type::Tuple(ts) => format!("({})", ts.iter().map(|t| self.describe(t)).collect::<Vec<_>>().join(", ")),
            Type::Variant(ts) => ts.iter().map(|t| self.describe(t)).collect::<Vec<_>>().join(" | "),
            Type::Func { input, output } => format!("{} -> {}", self.describe(input), self.describe(output)),
            Type::Slice(inner) => format!("[]{}", self.describe(inner)),
            Type::Range(inner) => format!("range {}", self.describe(inner)),
            Type::Scope(inner) => format!("scope {}", self.describe(inner)),
            Type::Struct(s) => s.lock().unwrap().name.clone(),
            Type::Enum(e) => e.lock().unwrap().name.clone(),
        }
    }

    /// Verifies `node` under `scope`/`ctx`, memoizing the result in `ctx`.
    /// Calling this twice on the same node under the same context is a
    /// no-op on the second call (§8).
    pub fn verify_expr<'ast>(&self, node: &'ast Node<'ast>, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let id = node.id();
        if let Some(cached) = ctx.qual_type(id) {
            return cached;
        }
        let qt = self.verify_expr_uncached(node, scope, ctx);
        ctx.set_qual_type(id, qt.clone());
        qt
    }

    fn verify_expr_uncached<'ast>(&self, node: &'ast Node<'ast>, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        match node {
            Node::Terminal { value, .. } => self.verify_terminal(value),
            Node::Identifier { name, .. } => self.verify_identifier(name, node.range(), scope, ctx),
            Node::Hole { .. } => QualType::rvalue(self.interner.void()),
            Node::Unop { op, operand, range } => self.verify_unop(*op, operand, *range, scope, ctx),
            Node::Binop { op, lhs, rhs, range } => self.verify_binop(*op, lhs, rhs, *range, scope, ctx),
            Node::ChainOp { ops, exprs, range } => self.verify_chain(ops, exprs, *range, scope, ctx),
            Node::Cast { expr, type_expr, range } => self.verify_cast(expr, type_expr, *range, scope, ctx),
            Node::Tuple { elems, .. } => {
                let types = elems.iter().map(|e| self.verify_expr(e, scope, ctx).ty).collect();
                QualType::rvalue(self.interner.tuple(types))
            }
            Node::ArrayLiteral { elems, .. } => self.verify_array_literal(elems, scope, ctx),
            Node::Declaration { .. } => self.verify_declaration(node, scope, ctx),
            Node::Call { callee, args, range } => self.verify_call(node, callee, args, *range, scope, ctx),
            Node::PatternMatch { expr, pattern, range } => self.verify_pattern_match(*expr, pattern, *range, scope, ctx),
            _ => self.unsupported(),
        }
    }

    fn verify_terminal(&self, value: &TerminalValue) -> QualType {
        let ty = match value {
            TerminalValue::Bool(_) => self.interner.primitive(Primitive::Bool),
            TerminalValue::Char(_) => self.interner.primitive(Primitive::Char),
            TerminalValue::I8(_) => self.interner.primitive(Primitive::I8),
            TerminalValue::I16(_) => self.interner.primitive(Primitive::I16),
            TerminalValue::I32(_) => self.interner.primitive(Primitive::I32),
            TerminalValue::I64(_) => self.interner.i64_(),
            TerminalValue::U8(_) => self.interner.primitive(Primitive::U8),
            TerminalValue::U16(_) => self.interner.primitive(Primitive::U16),
            TerminalValue::U32(_) => self.interner.primitive(Primitive::U32),
            TerminalValue::U64(_) => self.interner.primitive(Primitive::U64),
            TerminalValue::F32(_) => self.interner.primitive(Primitive::F32),
            TerminalValue::F64(_) => self.interner.primitive(Primitive::F64),
            TerminalValue::StringLiteral(_) => self.interner.slice(self.interner.array_unknown_length(self.interner.primitive(Primitive::U8))),
            TerminalValue::NullPtr => self.interner.null_ptr(),
            TerminalValue::EmptyArray => self.interner.empty_array(),
            TerminalValue::TypeLiteral(_) => self.interner.primitive(Primitive::Type),
        };
        QualType::constant(ty)
    }

    fn verify_identifier<'ast>(&self, name: &str, range: icarus_ast::SourceRange, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let candidates = resolver::lookup_lexical(scope, name);
        let Some(&first) = candidates.first() else {
            let known = scope.declarations.borrow().keys().cloned().collect::<Vec<_>>();
            return self.poison(Diagnostic::UndeclaredIdentifier {
                name: name.to_string(),
                range,
                suggestions: icarus_diagnostics::rank_suggestions(name, known),
            });
        };
        if candidates.len() > 1 {
            // Multiple declarations form an overload set; an identifier used
            // as a plain value (not a call) just resolves to its first
            // binding's type, which is what a non-call use of an overloaded
            // name means in practice (disambiguation only matters at a call
            // site, where `verify_call` drives dispatch instead).
        }
        match ctx.qual_type(first) {
            Some(qt) => qt,
            None => QualType::poisoned(self.interner.void()),
        }
    }

    fn verify_unop<'ast>(&self, op: Operator, operand: &'ast Node<'ast>, range: icarus_ast::SourceRange, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let operand_qt = self.verify_expr(operand, scope, ctx);
        if operand_qt.is_error() {
            return operand_qt;
        }
        match op {
            Operator::Negate => match &*operand_qt.ty {
                Type::Primitive(p) if p.is_float() || (p.is_integer() && !p.is_unsigned()) => QualType::rvalue(operand_qt.ty.clone()),
                Type::Primitive(p) if p.is_unsigned() => {
                    self.poison(Diagnostic::NegatingUnsignedInteger { type_desc: self.describe(&operand_qt.ty), range })
                }
                _ => self.poison(Diagnostic::InvalidUnaryOperatorCall {
                    op: "-".into(),
                    operand_type: self.describe(&operand_qt.ty),
                    range,
                }),
            },
            Operator::Not => match &*operand_qt.ty {
                Type::Primitive(Primitive::Bool) => QualType::rvalue(operand_qt.ty.clone()),
                _ => self.poison(Diagnostic::InvalidUnaryOperatorCall { op: "!".into(), operand_type: self.describe(&operand_qt.ty), range }),
            },
            Operator::At => match &*operand_qt.ty {
                Type::Ptr(inner) | Type::BufPtr(inner) => QualType::new(inner.clone(), Qualifiers::REF),
                _ => self.poison(Diagnostic::DereferencingNonPointer { type_desc: self.describe(&operand_qt.ty), range }),
            },
            Operator::AddressOf => {
                if !operand_qt.qualifiers.contains(Qualifiers::REF) {
                    return self.poison(Diagnostic::NonAddressableExpression { range });
                }
                QualType::rvalue(self.interner.ptr(operand_qt.ty.clone()))
            }
            _ => self.poison(Diagnostic::InvalidUnaryOperatorCall { op: format!("{op:?}"), operand_type: self.describe(&operand_qt.ty), range }),
        }
    }

    fn verify_binop<'ast>(
        &self,
        op: Operator,
        lhs: &'ast Node<'ast>,
        rhs: &'ast Node<'ast>,
        range: icarus_ast::SourceRange,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        let lhs_qt = self.verify_expr(lhs, scope, ctx);
        let rhs_qt = self.verify_expr(rhs, scope, ctx);
        if lhs_qt.is_error() || rhs_qt.is_error() {
            return QualType::poisoned(self.interner.void());
        }
        let is_comparison = matches!(op, Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge);
        let is_logical = matches!(op, Operator::And | Operator::Or | Operator::Xor);

        if is_logical {
            return match (&*lhs_qt.ty, &*rhs_qt.ty) {
                (Type::Primitive(Primitive::Bool), Type::Primitive(Primitive::Bool)) => {
                    let constant = lhs_qt.qualifiers.contains(Qualifiers::CONST) && rhs_qt.qualifiers.contains(Qualifiers::CONST);
                    if constant { QualType::constant(lhs_qt.ty.clone()) } else { QualType::rvalue(lhs_qt.ty.clone()) }
                }
                _ => self.poison(Diagnostic::InvalidUnaryOperatorCall { op: format!("{op:?}"), operand_type: self.describe(&lhs_qt.ty), range }),
            };
        }

        let Some(joined) = join(self.interner, &lhs_qt.ty, &rhs_qt.ty) else {
            return self.poison(Diagnostic::InvalidCast {
                from: self.describe(&rhs_qt.ty),
                to: self.describe(&lhs_qt.ty),
                range,
            });
        };

        let constant = lhs_qt.qualifiers.contains(Qualifiers::CONST) && rhs_qt.qualifiers.contains(Qualifiers::CONST);
        let result_ty = if is_comparison { self.interner.bool_() } else { joined };
        if constant {
            QualType::constant(result_ty)
        } else {
            QualType::rvalue(result_ty)
        }
    }

    fn verify_chain<'ast>(&self, ops: &[Operator], exprs: &[&'ast Node<'ast>], range: icarus_ast::SourceRange, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let mut constant = true;
        for window in exprs.windows(2) {
            let a = self.verify_expr(window[0], scope, ctx);
            let b = self.verify_expr(window[1], scope, ctx);
            if a.is_error() || b.is_error() {
                return QualType::poisoned(self.interner.void());
            }
            if join(self.interner, &a.ty, &b.ty).is_none() {
                return self.poison(Diagnostic::InvalidCast { from: self.describe(&b.ty), to: self.describe(&a.ty), range });
            }
            constant &= a.qualifiers.contains(Qualifiers::CONST) && b.qualifiers.contains(Qualifiers::CONST);
        }
        let _ = ops;
        let bool_ty = self.interner.bool_();
        if constant { QualType::constant(bool_ty) } else { QualType::rvalue(bool_ty) }
    }

    fn verify_cast<'ast>(&self, expr: &'ast Node<'ast>, type_expr: &'ast Node<'ast>, range: icarus_ast::SourceRange, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let expr_qt = self.verify_expr(expr, scope, ctx);
        let Some(target) = self.resolve_type_expr(type_expr, scope, ctx) else {
            return self.poison(Diagnostic::NotAType { range, found: format!("{type_expr:?}") });
        };
        if expr_qt.is_error() {
            return QualType::poisoned(target);
        }
        let castable = match (&*expr_qt.ty, &*target) {
            (Type::Primitive(a), Type::Primitive(b)) => (a.is_integer() || a.is_float()) && (b.is_integer() || b.is_float()),
            _ => join(self.interner, &expr_qt.ty, &target).is_some(),
        };
        if !castable {
            return self.poison(Diagnostic::InvalidCast { from: self.describe(&expr_qt.ty), to: self.describe(&target), range });
        }
        if expr_qt.qualifiers.contains(Qualifiers::CONST) {
            QualType::constant(target)
        } else {
            QualType::rvalue(target)
        }
    }

    fn verify_array_literal<'ast>(&self, elems: &[&'ast Node<'ast>], scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        if elems.is_empty() {
            return QualType::constant(self.interner.empty_array());
        }
        let mut elem_ty: Option<TypeHandle> = None;
        let mut constant = true;
        for e in elems {
            let qt = self.verify_expr(e, scope, ctx);
            if qt.is_error() {
                return QualType::poisoned(self.interner.void());
            }
            constant &= qt.qualifiers.contains(Qualifiers::CONST);
            elem_ty = match elem_ty {
                None => Some(qt.ty),
                Some(prev) => join(self.interner, &prev, &qt.ty),
            };
        }
        let Some(elem_ty) = elem_ty else {
            return self.unsupported();
        };
        let array_ty = self.interner.array(elem_ty, elems.len() as u64);
        if constant { QualType::constant(array_ty) } else { QualType::rvalue(array_ty) }
    }

    /// Resolves a type expression to a concrete [`TypeHandle`], accepting
    /// the `TypeLiteral` builtins and the structural forms pattern-matching
    /// already understands the shape of (pointer/array/slice).
    fn resolve_type_expr<'ast>(&self, node: &'ast Node<'ast>, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> Option<TypeHandle> {
        match node {
            Node::Terminal { value: TerminalValue::TypeLiteral(name), .. } => Some(self.builtin_type(*name)),
            Node::Identifier { name, .. } => {
                // A generic parameter (`T`, `U`) bound by the instantiation
                // this context belongs to (§4.6): it never appears in
                // `scope`'s declarations, only in its own
                // `ParameterizedExpression`, so it has to be checked before
                // falling back to lexical lookup.
                if let Some(bound) = ctx.generic_type(name) {
                    return Some(bound);
                }
                // A struct/enum's own name, possibly self-referential (e.g. a
                // field typed `*S` inside `S`'s own definition): the binding
                // is registered under the *declaration's* NodeId before its
                // fields are verified, so this resolves without recursing
                // back into the declaration.
                if let Some(decl) = resolver::lookup_lexical_nodes(scope, name).into_iter().next() {
                    let decl_id = decl.id();
                    if let Some(binding) = ctx.struct_binding(decl_id) {
                        return Some(binding.ty);
                    }
                    if let Some(binding) = ctx.enum_binding(decl_id) {
                        return Some(binding.ty);
                    }
                }
                let qt = self.verify_expr(node, scope, ctx);
                if matches!(&*qt.ty, Type::Primitive(Primitive::Type)) {
                    None // identifier names a type-valued constant we have no binding table for here; caller falls back
                } else {
                    Some(qt.ty)
                }
            }
            Node::Unop { op: Operator::At, operand, .. } => Some(self.interner.ptr(self.resolve_type_expr(operand, scope, ctx)?)),
            Node::SliceType { data_type, .. } => {
                let elem = self.resolve_type_expr(data_type, scope, ctx)?;
                Some(self.interner.slice(self.interner.array_unknown_length(elem)))
            }
            Node::ArrayType { lengths, data_type, .. } => {
                let elem = self.resolve_type_expr(data_type, scope, ctx)?;
                match lengths.first() {
                    Some(len_expr) => {
                        let len = self.evaluate_constant_i64(len_expr, scope, ctx)?;
                        Some(self.interner.array(elem, len as u64))
                    }
                    None => Some(self.interner.array_unknown_length(elem)),
                }
            }
            _ => None,
        }
    }

    fn builtin_type(&self, name: icarus_ast::BuiltinTypeName) -> TypeHandle {
        use icarus_ast::BuiltinTypeName::*;
        match name {
            Bool => self.interner.primitive(Primitive::Bool),
            Char => self.interner.primitive(Primitive::Char),
            I8 => self.interner.primitive(Primitive::I8),
            I16 => self.interner.primitive(Primitive::I16),
            I32 => self.interner.primitive(Primitive::I32),
            I64 => self.interner.i64_(),
            U8 => self.interner.primitive(Primitive::U8),
            U16 => self.interner.primitive(Primitive::U16),
            U32 => self.interner.primitive(Primitive::U32),
            U64 => self.interner.primitive(Primitive::U64),
            F32 => self.interner.primitive(Primitive::F32),
            F64 => self.interner.primitive(Primitive::F64),
            Type => self.interner.primitive(Primitive::Type),
            Module => self.interner.primitive(Primitive::Module),
            Void => self.interner.void(),
        }
    }

    /// Declaration verification (§4.2, §4.3, §4.4): infers or checks the
    /// declared type, and for `::=` declarations drives compile-time
    /// evaluation of the initializer, guarded by the cyclic-dependency
    /// tracker so `X ::= X` surfaces `CyclicDependency` instead of
    /// recursing forever.
    fn verify_declaration<'ast>(&self, node: &'ast Node<'ast>, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> QualType {
        let Node::Declaration { id, type_expr, init_val, flags, range, .. } = node else {
            unreachable!("verify_declaration called on a non-Declaration node");
        };

        if let Some(init) = init_val {
            match init {
                Node::StructLiteral { fields, .. } => return self.verify_struct_literal(node.id(), id, fields, scope, ctx),
                Node::ParameterizedStructLiteral { params, fields, .. } => {
                    // A generic template (`Pair ::= struct(T,U){...}`, §4.6)
                    // has no fields to complete until it is instantiated at
                    // a call site (`Pair(i32,bool)`, see `verify_generic_call`);
                    // referencing the template name on its own just yields a
                    // type-valued constant, the same as any other builtin
                    // type name.
                    if params.is_generic() {
                        return QualType::constant(self.interner.primitive(Primitive::Type));
                    }
                    return self.verify_struct_literal(node.id(), id, fields, scope, ctx);
                }
                Node::EnumLiteral { kind, enumerators, .. } => {
                    return self.verify_enum_literal(node.id(), id, *kind, enumerators, scope, ctx)
                }
                Node::Import { locator, range: import_range } => {
                    return self.verify_import(node.id(), locator, *import_range, ctx);
                }
                _ => {}
            }
        }

        let token = if flags.contains(DeclFlags::CONST) {
            match self.work.cyclic_tracker.push_dependency(id, node.id()) {
                Ok(token) => Some(token),
                Err(cycle) => {
                    let names = cycle.iter().map(|(n, _)| n.clone()).collect();
                    let ranges = cycle.iter().map(|_| *range).collect();
                    return self.poison(Diagnostic::CyclicDependency { cycle: names, ranges });
                }
            }
        } else {
            None
        };

        let declared_ty = type_expr.and_then(|t| self.resolve_type_expr(t, scope, ctx));
        let init_qt = init_val.map(|v| self.verify_expr(v, scope, ctx));

        let result_ty = match (&declared_ty, &init_qt) {
            (Some(declared), Some(init)) if !init.is_error() => {
                if meet(self.interner, &init.ty, declared).is_none() {
                    return self.poison(Diagnostic::InvalidCast { from: self.describe(&init.ty), to: self.describe(declared), range: *range });
                }
                declared.clone()
            }
            (Some(declared), _) => declared.clone(),
            (None, Some(init)) if !init.is_error() => init.ty.clone(),
            (None, Some(_)) => return QualType::poisoned(self.interner.void()),
            (None, None) => return self.unsupported(),
        };

        let qt = if flags.contains(DeclFlags::CONST) {
            if let Some(init) = init_val {
                if let Some(value) = self.evaluate_constant_i64(init, scope, ctx) {
                    let _ = ctx.set_constant(node.id(), value.to_le_bytes().to_vec(), true);
                }
            }
            QualType::constant(result_ty)
        } else {
            QualType::new(result_ty, Qualifiers::REF)
        };
        let _ = token;
        qt
    }

    /// `S ::= struct { ... }` (§4.3): allocates (or recovers, on repeat
    /// visits under the same `Context`) the struct's identity, registers it
    /// under the declaration's `NodeId` before resolving any field so a
    /// self-referential field type (`*S`) sees a binding rather than
    /// recursing, then drives it through `VerifyStructBody` ->
    /// `CompleteStructData` -> `CompleteStruct`. Each field's
    /// `initial_value` expression is folded through
    /// [`Self::evaluate_constant_i64`] during `CompleteStructData`; a field
    /// with no initializer, or one that doesn't fold, gets `None`.
    fn verify_struct_literal<'ast>(
        &self,
        decl_id: NodeId,
        decl_name: &str,
        fields: &[FieldDecl<'ast>],
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        let ty = match ctx.struct_binding(decl_id) {
            Some(binding) => binding.ty,
            None => {
                let ty = self.interner.new_struct(self.module, decl_name.to_string());
                ctx.set_struct_binding(decl_id, ty.clone());
                ty
            }
        };
        let Some(struct_arc) = ty.as_struct().cloned() else {
            return QualType::poisoned(self.interner.void());
        };

        self.work.execute(WorkItem::new(Kind::VerifyStructBody, decl_id, ctx), |_, _| {
            let resolved: Vec<Field> = fields
                .iter()
                .map(|f| {
                    let field_ty = f
                        .type_expr
                        .and_then(|t| self.resolve_type_expr(t, scope, ctx))
                        .unwrap_or_else(|| self.interner.void());
                    Field { name: f.name.clone(), ty: field_ty, initial_value: None, hashtags: f.hashtags.clone() }
                })
                .collect();
            let mut s = struct_arc.lock().unwrap();
            if s.state == Completeness::Incomplete {
                s.set_data(resolved);
            }
        });

        let initial_values: Vec<Option<Vec<u8>>> = fields
            .iter()
            .map(|f| f.initial_value.and_then(|v| self.evaluate_constant_i64(v, scope, ctx)).map(|v| v.to_le_bytes().to_vec()))
            .collect();

        self.work.execute(WorkItem::new(Kind::CompleteStructData, decl_id, ctx), |_, _| {
            let mut s = struct_arc.lock().unwrap();
            if s.state == Completeness::DataComplete {
                s.set_initial_values(initial_values.clone());
            }
        });

        self.work.execute(WorkItem::new(Kind::CompleteStruct, decl_id, ctx), |_, _| {
            let field_layouts: Vec<_> = {
                let s = struct_arc.lock().unwrap();
                s.fields.iter().map(|f| crate::types::architecture::layout_of(&f.ty)).collect()
            };
            let mut s = struct_arc.lock().unwrap();
            if s.state == Completeness::DataComplete {
                s.complete_layout(field_layouts);
            }
        });

        QualType::constant(ty)
    }

    /// `E ::= enum { ... }` / `flags { ... }` (§4.3): allocates or recovers
    /// the enum's identity and assigns discriminants via `CompleteEnum`.
    /// Explicit enumerator values are folded through
    /// [`Self::evaluate_constant_i64`]; everything else gets the lowest
    /// unused integer (or bit, for `Flags`).
    fn verify_enum_literal<'ast>(
        &self,
        decl_id: NodeId,
        decl_name: &str,
        kind: icarus_ast::EnumKind,
        enumerators: &[Enumerator<'ast>],
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        let completion_kind = match kind {
            icarus_ast::EnumKind::Enum => EnumKind::Enum,
            icarus_ast::EnumKind::Flags => EnumKind::Flags,
        };
        let ty = match ctx.enum_binding(decl_id) {
            Some(binding) => binding.ty,
            None => {
                let ty = self.interner.new_enum(self.module, decl_name.to_string(), completion_kind);
                ctx.set_enum_binding(decl_id, ty.clone());
                ty
            }
        };
        let Some(enum_arc) = ty.as_enum().cloned() else {
            return QualType::poisoned(self.interner.void());
        };

        self.work.execute(WorkItem::new(Kind::CompleteEnum, decl_id, ctx), |_, _| {
            let names: Vec<String> = enumerators.iter().map(|e| e.name.clone()).collect();
            let explicit: Vec<Option<i64>> =
                enumerators.iter().map(|e| e.value.and_then(|v| self.evaluate_constant_i64(v, scope, ctx))).collect();
            let mut e = enum_arc.lock().unwrap();
            if !e.complete {
                e.complete(names, explicit);
            }
        });

        QualType::constant(ty)
    }

    /// `M ::= import "io"` (§6.1): resolves a string-literal locator
    /// through the attached [`Importer`], recording the resulting
    /// [`ModuleId`] under the declaration's `NodeId` so [`Self::verify_module_call`]
    /// can find it again once `M` is used as `M.print(...)`.
    fn verify_import<'ast>(&self, decl_id: NodeId, locator: &'ast Node<'ast>, range: icarus_ast::SourceRange, ctx: &Arc<Context>) -> QualType {
        let Node::Terminal { value: TerminalValue::StringLiteral(path), .. } = locator else {
            return self.poison(Diagnostic::NonConstantImport { range });
        };
        let Some(importer) = self.importer else {
            return self.poison(Diagnostic::InvalidImport { locator: path.clone(), range });
        };
        match importer.borrow_mut().import(path) {
            Ok(module_id) => {
                ctx.set_imported_module(decl_id, module_id);
                QualType::constant(self.interner.primitive(Primitive::Module))
            }
            Err(_) => self.poison(Diagnostic::InvalidImport { locator: path.clone(), range }),
        }
    }

    /// `M.print(42)` (§6.1, §8 scenario 5): `operand` must be an identifier
    /// bound to an imported module; `member` is looked up through
    /// [`ModuleExports::exports_named`] rather than lexical scope. Argument
    /// expressions are still verified ordinarily — only the callee
    /// resolution differs from [`Self::verify_call`]'s lexical path.
    fn verify_module_call<'ast>(
        &self,
        call_node: &'ast Node<'ast>,
        operand: &'ast Node<'ast>,
        member: &str,
        args: &[Argument<'ast>],
        range: icarus_ast::SourceRange,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        let Node::Identifier { name, .. } = operand else {
            return self.unsupported();
        };
        let Some(decl) = resolver::lookup_lexical_nodes(scope, name).into_iter().next() else {
            let known = scope.declarations.borrow().keys().cloned().collect::<Vec<_>>();
            return self.poison(Diagnostic::UndeclaredIdentifier {
                name: name.clone(),
                range,
                suggestions: icarus_diagnostics::rank_suggestions(name, known),
            });
        };
        let Some(module_id) = ctx.imported_module(decl.id()) else {
            return self.unsupported();
        };
        let candidates = self.exports.exports_named(module_id, member);
        let Some(symbol) = candidates.first() else {
            return self.poison(Diagnostic::UndeclaredIdentifier { name: member.to_string(), range, suggestions: vec![] });
        };

        for arg in args {
            if self.verify_expr(arg.value, scope, ctx).is_error() {
                return QualType::poisoned(self.interner.void());
            }
        }

        ctx.set_call_metadata(call_node.id(), CalleeLocator::Single(decl.id()));
        match &*symbol.qual_type.ty {
            Type::Func { output, .. } => QualType::rvalue(output.clone()),
            _ => QualType::rvalue(symbol.qual_type.ty.clone()),
        }
    }

    /// Extracts a callable declaration's formal parameters and output type.
    /// `FunctionLiteral` reads its declared output list (defaulting to
    /// `void()`); `ShortFunctionLiteral`'s output is really the body
    /// expression's type, which dispatch doesn't have the machinery here to
    /// infer per-candidate, so it's approximated as `void()`.
    fn formal_params<'ast>(
        &self,
        node: &'ast Node<'ast>,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> Option<(Vec<dispatch::FormalParam>, TypeHandle)> {
        match node {
            Node::Declaration { init_val: Some(init), .. } => self.formal_params(init, scope, ctx),
            Node::FunctionLiteral { params, outputs, .. } => {
                let formals = self.formal_param_list(params.params.as_slice(), scope, ctx);
                let output = match outputs {
                    Some(outs) => {
                        let tys: Vec<_> = outs.iter().filter_map(|o| self.resolve_type_expr(o, scope, ctx)).collect();
                        self.interner.tuple(tys)
                    }
                    None => self.interner.void(),
                };
                Some((formals, output))
            }
            Node::ShortFunctionLiteral { params, .. } => {
                let formals = self.formal_param_list(params.params.as_slice(), scope, ctx);
                Some((formals, self.interner.void()))
            }
            _ => None,
        }
    }

    fn formal_param_list<'ast>(
        &self,
        params: &[&'ast Node<'ast>],
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> Vec<dispatch::FormalParam> {
        params
            .iter()
            .filter_map(|p| match p {
                Node::Declaration { id, type_expr, init_val, flags, .. } => {
                    let ty = type_expr
                        .and_then(|t| self.resolve_type_expr(t, scope, ctx))
                        .unwrap_or_else(|| self.interner.void());
                    Some(dispatch::FormalParam {
                        name: id.clone(),
                        ty,
                        has_default: init_val.is_some() || flags.contains(DeclFlags::INIT_IS_HOLE),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Compile-time evaluation (§4.7.1): folds a constant-integer
    /// expression by lowering it into a synthesized thunk subroutine and
    /// running [`Evaluator`] over it. Handles the arithmetic/comparison/call
    /// forms needed by §8's worked scenarios (`X ::= 3 + 4`, recursive
    /// `f(5)`); anything else returns `None` rather than guessing.
    pub fn evaluate_constant_i64<'ast>(&self, node: &'ast Node<'ast>, scope: &'ast Scope<'ast>, ctx: &Arc<Context>) -> Option<i64> {
        let mut session = FoldSession::default();
        let root_id = session.reserve();
        let mut root = Subroutine::new(root_id);
        let params = HashMap::new();
        {
            let mut builder = Builder::new(&mut root);
            let operand = self.lower_constant_expr(node, scope, ctx, &mut builder, &mut session, &params)?;
            builder.set_exit(builder.current_block(), Exit::Return(vec![operand]));
        }
        session.subs[root_id.0 as usize] = root;

        let mut module = IrModule::default();
        for sub in session.subs {
            module.push(sub);
        }
        let evaluator = Evaluator::new(&module);
        match evaluator.evaluate(root_id, vec![]) {
            Ok(values) => match values.first() {
                Some(Value::I64(v)) => Some(*v),
                Some(Value::Bool(v)) => Some(*v as i64),
                _ => None,
            },
            Err(EvalError::DivisionByZero) => {
                self.work.emit(Diagnostic::PatternMatchingFailed { reason: "division by zero".into(), range: node.range() });
                None
            }
            Err(_) => None,
        }
    }

    /// Lowers `decl`'s body (a `FunctionLiteral`) to a `Subroutine` the
    /// first time it's called, caching the result in `session.registry` so
    /// a recursive call (`f` calling `f` in its own body, §8 scenario 3)
    /// resolves to the same `SubroutineId` instead of recursing forever at
    /// lowering time. The id is reserved and registered *before* the body is
    /// lowered, which is what makes the self-call resolvable.
    fn lower_function_subroutine<'ast>(
        &self,
        decl: &'ast Node<'ast>,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
        session: &mut FoldSession,
    ) -> Option<SubroutineId> {
        if let Some(&id) = session.registry.get(&decl.id()) {
            return Some(id);
        }
        let Node::Declaration { init_val: Some(init), .. } = decl else {
            return None;
        };
        let Node::FunctionLiteral { params: param_expr, stmts, .. } = init else {
            return None;
        };

        let id = session.reserve();
        session.registry.insert(decl.id(), id);

        let mut sub = Subroutine::new(id);
        let mut params = HashMap::new();
        {
            let mut builder = Builder::new(&mut sub);
            for param in param_expr.params.iter() {
                let Node::Declaration { id: pname, .. } = param else { continue };
                let reg = builder.alloc_reg(8, None);
                params.insert(pname.clone(), reg);
            }
            let falls_through = self.lower_constant_stmts(stmts, scope, ctx, &mut builder, session, &params)?;
            if falls_through {
                // A function whose every path must return (§4.5) only
                // reaches here if the body itself is incomplete; lowering
                // has nothing useful to return, so the whole fold aborts.
                return None;
            }
        }
        session.subs[id.0 as usize] = sub;
        Some(id)
    }

    /// Lowers a statement list making up a folded function body.
    /// `Some(true)` means control can fall off the end (no further
    /// statement follows); `Some(false)` means every path already returned;
    /// `None` means a statement shape isn't supported for constant folding.
    fn lower_constant_stmts<'ast>(
        &self,
        stmts: &[&'ast Node<'ast>],
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
        builder: &mut Builder<'_>,
        session: &mut FoldSession,
        params: &HashMap<String, Reg>,
    ) -> Option<bool> {
        for stmt in stmts {
            match stmt {
                Node::ReturnStmt { exprs, .. } => {
                    let mut operands = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        operands.push(self.lower_constant_expr(expr, scope, ctx, builder, session, params)?);
                    }
                    builder.set_exit(builder.current_block(), Exit::Return(operands));
                    return Some(false);
                }
                Node::IfStmt { condition, then_block, else_block, .. } => {
                    let cond = self.lower_constant_expr(condition, scope, ctx, builder, session, params)?;
                    let entry = builder.current_block();
                    let then_bb = builder.new_block();
                    let else_bb = builder.new_block();
                    builder.set_exit(entry, Exit::Cond { cond, if_true: then_bb, if_false: else_bb });

                    builder.switch_to(then_bb);
                    let then_falls_through = self.lower_constant_stmts(then_block, scope, ctx, builder, session, params)?;

                    builder.switch_to(else_bb);
                    let else_falls_through = match else_block {
                        Some(stmts) => self.lower_constant_stmts(stmts, scope, ctx, builder, session, params)?,
                        None => true,
                    };

                    if !then_falls_through && !else_falls_through {
                        return Some(false);
                    }
                    let landing = builder.new_block();
                    if then_falls_through {
                        builder.set_exit(then_bb, Exit::Uncond(landing));
                    }
                    if else_falls_through {
                        builder.set_exit(else_bb, Exit::Uncond(landing));
                    }
                    builder.switch_to(landing);
                }
                _ => return None,
            }
        }
        Some(true)
    }

    fn lower_constant_expr<'ast>(
        &self,
        node: &'ast Node<'ast>,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
        builder: &mut Builder<'_>,
        session: &mut FoldSession,
        params: &HashMap<String, Reg>,
    ) -> Option<Operand> {
        match node {
            Node::Terminal { value: TerminalValue::I64(v), .. } => Some(Operand::ImmI64(*v)),
            Node::Terminal { value: TerminalValue::I32(v), .. } => Some(Operand::ImmI64(*v as i64)),
            Node::Terminal { value: TerminalValue::Bool(v), .. } => Some(Operand::ImmBool(*v)),
            Node::Unop { op: Operator::Negate, operand, .. } => {
                let src = self.lower_constant_expr(operand, scope, ctx, builder, session, params)?;
                Some(Operand::Reg(builder.emit_negate(src, 8, None)))
            }
            Node::Binop { op, lhs, rhs, .. } => {
                let lhs_op = self.lower_constant_expr(lhs, scope, ctx, builder, session, params)?;
                let rhs_op = self.lower_constant_expr(rhs, scope, ctx, builder, session, params)?;
                let arith = match op {
                    Operator::Add => Some(ArithOp::Add),
                    Operator::Sub => Some(ArithOp::Sub),
                    Operator::Mul => Some(ArithOp::Mul),
                    Operator::Div => Some(ArithOp::Div),
                    Operator::Mod => Some(ArithOp::Mod),
                    _ => None,
                };
                if let Some(arith) = arith {
                    return Some(Operand::Reg(builder.emit_arith(arith, lhs_op, rhs_op, 8, None)));
                }
                let cmp = match op {
                    Operator::Eq => Some(CmpOp::Eq),
                    Operator::Ne => Some(CmpOp::Ne),
                    Operator::Lt => Some(CmpOp::Lt),
                    Operator::Le => Some(CmpOp::Le),
                    Operator::Gt => Some(CmpOp::Gt),
                    Operator::Ge => Some(CmpOp::Ge),
                    _ => None,
                };
                cmp.map(|cmp| Operand::Reg(builder.emit_cmp(cmp, lhs_op, rhs_op)))
            }
            Node::Identifier { name, .. } => {
                if let Some(&reg) = params.get(name) {
                    return Some(Operand::Reg(reg));
                }
                let decl = resolver::lookup_lexical(scope, name).into_iter().next()?;
                if !ctx.constant_complete(decl) {
                    return None;
                }
                let bytes = ctx.load_constant(decl)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes.get(0..8)?);
                Some(Operand::ImmI64(i64::from_le_bytes(buf)))
            }
            Node::Call { callee, args, .. } => {
                let Node::Identifier { name, .. } = callee else {
                    return None;
                };
                let decl = resolver::lookup_lexical_nodes(scope, name).into_iter().next()?;
                let callee_id = self.lower_function_subroutine(decl, scope, ctx, session)?;
                let mut arg_ops = Vec::with_capacity(args.len());
                for arg in args {
                    arg_ops.push(self.lower_constant_expr(arg.value, scope, ctx, builder, session, params)?);
                }
                let dst = builder.alloc_reg(8, None);
                builder.push(crate::ir::Cmd::Call { dst: Some(dst), callee: callee_id, args: arg_ops });
                Some(Operand::Reg(dst))
            }
            _ => None,
        }
    }

    /// Lowers every top-level function declaration in `nodes` to IR (§4.7
    /// "IR Builder"): each becomes one `Subroutine` via
    /// [`Self::lower_function_subroutine`], sharing a single [`FoldSession`]
    /// so a call between two top-level functions reuses the callee's
    /// emission rather than lowering it twice. A declaration whose body
    /// isn't one of the statement/expression forms
    /// [`Self::lower_constant_stmts`] understands is silently skipped — it
    /// contributes no subroutine, the same way an unsupported constant
    /// expression folds to `None` rather than guessing.
    pub fn emit_module_ir<'ast>(&self, scope: &'ast Scope<'ast>, ctx: &Arc<Context>, nodes: &[&'ast Node<'ast>]) -> IrModule {
        let mut session = FoldSession::default();
        for node in nodes {
            if matches!(node, Node::Declaration { init_val: Some(Node::FunctionLiteral { .. }), .. }) {
                self.lower_function_subroutine(node, scope, ctx, &mut session);
            }
        }
        let mut module = IrModule::default();
        for sub in session.subs {
            module.push(sub);
        }
        module
    }

    /// Call-site verification (§4.5): matches each candidate's formal
    /// parameters against the argument shape, expands the Cartesian product
    /// of variant-typed arguments through [`DispatchTableBuilder`], and
    /// records the resolved callee(s) in `ctx` so IR emission can find them
    /// without re-running overload resolution.
    fn verify_call<'ast>(
        &self,
        call_node: &'ast Node<'ast>,
        callee: &'ast Node<'ast>,
        args: &[icarus_ast::Argument<'ast>],
        range: icarus_ast::SourceRange,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        if let Node::Access { operand, member, .. } = callee {
            return self.verify_module_call(call_node, operand, member, args, range, scope, ctx);
        }
        let Node::Identifier { name, .. } = callee else {
            return self.unsupported();
        };

        let local_decls = resolver::lookup_lexical_nodes(scope, name);
        if local_decls.is_empty() {
            let known = scope.declarations.borrow().keys().cloned().collect::<Vec<_>>();
            return self.poison(Diagnostic::UndeclaredIdentifier {
                name: name.clone(),
                range,
                suggestions: icarus_diagnostics::rank_suggestions(name, known),
            });
        }

        // Generic instantiation (§4.6): `Pair(i32,bool)` binds `Pair`'s
        // `Const` parameters rather than matching an argument shape against
        // a formal-parameter list, so it's handled before the ordinary
        // dispatch loop below rather than inside it. Struct/enum templates
        // are never overloaded, so only the first candidate is consulted.
        if let Some(decl) = local_decls.first().copied() {
            if let Some(params_expr) = self.generic_params_of(decl) {
                if params_expr.is_generic() {
                    return self.verify_generic_call(decl, params_expr, name, args, range, scope, ctx);
                }
            }
        }

        let mut positional = Vec::new();
        let mut named: Vec<(String, NodeId)> = Vec::new();
        let mut arg_types = Vec::new();
        for arg in args {
            let qt = self.verify_expr(arg.value, scope, ctx);
            if qt.is_error() {
                return QualType::poisoned(self.interner.void());
            }
            arg_types.push(qt.ty.clone());
            match &arg.name {
                Some(n) => named.push((n.clone(), arg.value.id())),
                None => positional.push(arg.value.id()),
            }
        }

        let mut candidate_bindings: Vec<(dispatch::CandidateBinding, TypeHandle)> = Vec::new();
        for decl in local_decls.iter().copied() {
            if !resolver::is_callable(decl) {
                return self.poison(Diagnostic::NonCallableInOverloadSet { name: name.clone(), range });
            }
            let Some((formals, output)) = self.formal_params(decl, scope, ctx) else {
                continue;
            };
            if let Ok(bound) = dispatch::match_argument_shape(&formals, &positional, &named) {
                let formal_types: Vec<TypeHandle> = bound.into_iter().map(|(ty, _)| ty).collect();
                candidate_bindings.push((dispatch::CandidateBinding { callee: decl.id(), formal_types }, output));
            }
        }

        if candidate_bindings.is_empty() {
            return self.poison(Diagnostic::MissingArgument { callee: name.clone(), param: String::new(), range });
        }

        let bindings: Vec<dispatch::CandidateBinding> = candidate_bindings.iter().map(|(b, _)| b.clone()).collect();
        match DispatchTableBuilder::build(self.interner, &bindings, &arg_types) {
            Ok(table) => {
                let locator = match table.entries.as_slice() {
                    [(_, only)] => CalleeLocator::Single(*only),
                    entries => CalleeLocator::Dispatch(
                        entries.iter().map(|(combo, callee)| (*callee, combo.iter().map(|t| self.describe(t)).collect::<Vec<_>>().join(","))).collect(),
                    ),
                };
                ctx.set_call_metadata(call_node.id(), locator);

                let matched_outputs = candidate_bindings
                    .iter()
                    .filter(|(binding, _)| table.entries.iter().any(|(_, callee)| *callee == binding.callee))
                    .map(|(_, output)| output.clone());
                let output_ty = crate::types::lattice::join_many(self.interner, matched_outputs);
                QualType::rvalue(output_ty.unwrap_or_else(|| self.interner.void()))
            }
            Err(DispatchError::UncoveredCombination(combo)) => self.poison(Diagnostic::UncoveredCombination {
                combination: combo.iter().map(|t| self.describe(t)).collect::<Vec<_>>().join(", "),
                range,
            }),
            Err(DispatchError::AmbiguousDispatch(combo)) => self.poison(Diagnostic::AmbiguousDispatch {
                combination: combo.iter().map(|t| self.describe(t)).collect::<Vec<_>>().join(", "),
                range,
            }),
        }
    }

    /// The `ParameterizedExpression` a callee's generic parameters live on,
    /// if it has one — `ParameterizedStructLiteral` for a generic struct
    /// template, `FunctionLiteral`/`ShortFunctionLiteral` for a generic
    /// function. Ordinary (non-generic) callables share the same node
    /// shapes, so the caller still has to check `is_generic()`.
    fn generic_params_of<'ast>(&self, node: &'ast Node<'ast>) -> Option<&'ast icarus_ast::ParameterizedExpression<'ast>> {
        match node {
            Node::Declaration { init_val: Some(init), .. } => self.generic_params_of(init),
            Node::ParameterizedStructLiteral { params, .. } => Some(params),
            Node::FunctionLiteral { params, .. } => Some(params),
            Node::ShortFunctionLiteral { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Generic call-site instantiation (§4.6, §8 scenario 6): binds each
    /// `Const` parameter to the type named by the matching argument,
    /// memoized via [`GenericInstantiator`] on the resulting
    /// [`BoundParameters`] tuple so the same argument combination reuses the
    /// same instantiation. Only type-valued parameters are supported today
    /// (every worked scenario's generic parameters are types); a value-typed
    /// `Const` parameter poisons rather than guessing a binding.
    fn verify_generic_call<'ast>(
        &self,
        decl: &'ast Node<'ast>,
        params_expr: &'ast icarus_ast::ParameterizedExpression<'ast>,
        name: &str,
        args: &[icarus_ast::Argument<'ast>],
        range: icarus_ast::SourceRange,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        if args.len() != params_expr.params.len() {
            return self.poison(Diagnostic::MissingArgument { callee: name.to_string(), param: String::new(), range });
        }

        let mut bound: Vec<(String, TypeHandle)> = Vec::with_capacity(params_expr.params.len());
        let mut key_entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(params_expr.params.len());
        for (i, param) in params_expr.params.iter().enumerate() {
            let Node::Declaration { id: pname, .. } = param else { continue };
            let Some(arg) = args.get(i) else {
                return self.poison(Diagnostic::MissingArgument { callee: name.to_string(), param: pname.clone(), range });
            };
            let Some(ty) = self.resolve_type_expr(arg.value, scope, ctx) else {
                return self.poison(Diagnostic::PatternMatchingFailed {
                    reason: "generic parameter must be bound to a type".into(),
                    range,
                });
            };
            key_entries.push((pname.clone(), (Arc::as_ptr(&ty) as usize).to_le_bytes().to_vec()));
            bound.push((pname.clone(), ty));
        }

        let label = format!("{}({})", name, bound.iter().map(|(_, t)| self.describe(t)).collect::<Vec<_>>().join(","));
        let key = BoundParameters(key_entries);
        let param_expr_id = NodeId::from(params_expr);

        let (child, _) = GenericInstantiator::instantiate(ctx, param_expr_id, key, |child| {
            for (pname, ty) in &bound {
                child.set_generic_type(pname.clone(), ty.clone());
            }
            match decl {
                Node::Declaration { init_val: Some(Node::ParameterizedStructLiteral { fields, .. }), .. } => {
                    let qt = self.verify_struct_literal(decl.id(), &label, fields, scope, child);
                    if qt.is_error() {
                        Err(())
                    } else {
                        Ok(())
                    }
                }
                _ => Err(()),
            }
        });

        match child.struct_binding(decl.id()) {
            Some(binding) => QualType::constant(binding.ty),
            None => self.poison(Diagnostic::PatternMatchingFailed { reason: "generic instantiation failed".into(), range }),
        }
    }

    fn verify_pattern_match<'ast>(
        &self,
        expr: Option<&'ast Node<'ast>>,
        pattern_node: &'ast Node<'ast>,
        range: icarus_ast::SourceRange,
        scope: &'ast Scope<'ast>,
        ctx: &Arc<Context>,
    ) -> QualType {
        let Some(expr) = expr else {
            return QualType::rvalue(self.interner.bool_());
        };
        let value = match self.evaluate_constant_i64(expr, scope, ctx) {
            Some(v) => v,
            None => return self.unsupported(),
        };
        match pattern::match_arithmetic(pattern_node, value) {
            Ok(_) => QualType::rvalue(self.interner.bool_()),
            Err(pattern::PatternError::NotSufficientlySimple) => {
                self.poison(Diagnostic::PatternMatchingFailed { reason: "pattern not sufficiently simple".into(), range })
            }
            Err(pattern::PatternError::TypeMismatch { expected, found }) => {
                self.poison(Diagnostic::PatternTypeMismatch { expected, found, range })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap as StdHashMap;

    use icarus_ast::arena::AstArena;
    use icarus_ast::{BuiltinTypeName, FieldDecl, ParameterizedExpression, ScopeKind, SourceRange};
    use icarus_diagnostics::DiagnosticEngine;

    use crate::compile::CompiledModule;
    use crate::error::CoreError;
    use crate::resolver::ExportedSymbol;

    fn fixture<'ast>(arena: &'ast AstArena<'ast>) -> (TypeInterner, WorkGraph<DiagnosticEngine>, &'ast Scope<'ast>, Arc<Context>) {
        let interner = TypeInterner::new();
        let work = WorkGraph::new(DiagnosticEngine::new());
        let scope = arena.alloc_scope(Scope::new(ScopeKind::Module, None));
        let ctx = Context::root();
        (interner, work, scope, ctx)
    }

    fn ident<'ast>(arena: &'ast AstArena<'ast>, name: &str) -> &'ast Node<'ast> {
        arena.alloc(Node::Identifier { range: SourceRange::unknown(), name: name.into(), scope: Cell::new(None) })
    }

    fn type_lit<'ast>(arena: &'ast AstArena<'ast>, name: BuiltinTypeName) -> &'ast Node<'ast> {
        arena.alloc(Node::Terminal { range: SourceRange::unknown(), value: TerminalValue::TypeLiteral(name) })
    }

    fn i64_lit<'ast>(arena: &'ast AstArena<'ast>, v: i64) -> &'ast Node<'ast> {
        arena.alloc(Node::Terminal { range: SourceRange::unknown(), value: TerminalValue::I64(v) })
    }

    /// §8 scenario 6: `Pair ::= struct(T: type, U: type) { first: T; second: U }`
    /// instantiated as `Pair(i32, bool)` produces a struct named accordingly
    /// with two fields typed `i32`/`bool`, and a repeated call with the same
    /// arguments reuses the instantiation rather than rebuilding it.
    #[test]
    fn generic_struct_instantiation_binds_fields_and_is_memoized() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let t_param = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "T".into(),
            type_expr: Some(type_lit(&arena, BuiltinTypeName::Type)),
            init_val: None,
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        let u_param = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "U".into(),
            type_expr: Some(type_lit(&arena, BuiltinTypeName::Type)),
            init_val: None,
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        let params = arena.alloc_params(ParameterizedExpression::new(SourceRange::unknown(), vec![t_param, u_param]));
        let fields = vec![
            FieldDecl { name: "first".into(), type_expr: Some(ident(&arena, "T")), initial_value: None, hashtags: vec![] },
            FieldDecl { name: "second".into(), type_expr: Some(ident(&arena, "U")), initial_value: None, hashtags: vec![] },
        ];
        let template = arena.alloc(Node::ParameterizedStructLiteral { range: SourceRange::unknown(), params, fields, hashtags: vec![] });
        let pair_decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "Pair".into(),
            type_expr: None,
            init_val: Some(template),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        scope.declare("Pair".into(), pair_decl);
        verifier.verify_expr(pair_decl, scope, &ctx);
        assert!(!work.has_errors());

        let make_call = || {
            arena.alloc(Node::Call {
                range: SourceRange::unknown(),
                callee: ident(&arena, "Pair"),
                args: vec![
                    Argument { name: None, value: type_lit(&arena, BuiltinTypeName::I32) },
                    Argument { name: None, value: type_lit(&arena, BuiltinTypeName::Bool) },
                ],
            })
        };

        let first_call = make_call();
        let qt1 = verifier.verify_expr(first_call, scope, &ctx);
        assert!(!qt1.is_error());
        let instantiated = qt1.ty.as_struct().expect("instantiation produces a struct").clone();
        {
            let s = instantiated.lock().unwrap();
            assert_eq!(s.fields.len(), 2);
            assert!(Arc::ptr_eq(&s.fields[0].ty, &interner.primitive(Primitive::I32)));
            assert!(Arc::ptr_eq(&s.fields[1].ty, &interner.primitive(Primitive::Bool)));
        }

        let second_call = make_call();
        let qt2 = verifier.verify_expr(second_call, scope, &ctx);
        assert!(Arc::ptr_eq(&qt1.ty, &qt2.ty));
    }

    /// §8 scenario 3: `f ::= (n: i64) -> i64 { if n == 0 { return 1 } else
    /// { return n * f(n - 1) } }` folds `f(5)` to `120` at compile time,
    /// exercising call lowering through a self-recursive callee.
    #[test]
    fn recursive_constant_fold_computes_factorial() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let n_param = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "n".into(),
            type_expr: Some(type_lit(&arena, BuiltinTypeName::I64)),
            init_val: None,
            flags: DeclFlags::FN_PARAM,
            hashtags: vec![],
        });
        let params = arena.alloc_params(ParameterizedExpression::new(SourceRange::unknown(), vec![n_param]));

        let condition = arena.alloc(Node::Binop { range: SourceRange::unknown(), op: Operator::Eq, lhs: ident(&arena, "n"), rhs: i64_lit(&arena, 0) });
        let then_block = vec![arena.alloc(Node::ReturnStmt { range: SourceRange::unknown(), exprs: vec![i64_lit(&arena, 1)] })];
        let recurse_arg = arena.alloc(Node::Binop { range: SourceRange::unknown(), op: Operator::Sub, lhs: ident(&arena, "n"), rhs: i64_lit(&arena, 1) });
        let recurse_call = arena.alloc(Node::Call {
            range: SourceRange::unknown(),
            callee: ident(&arena, "f"),
            args: vec![Argument { name: None, value: recurse_arg }],
        });
        let product = arena.alloc(Node::Binop { range: SourceRange::unknown(), op: Operator::Mul, lhs: ident(&arena, "n"), rhs: recurse_call });
        let else_block = vec![arena.alloc(Node::ReturnStmt { range: SourceRange::unknown(), exprs: vec![product] })];
        let if_stmt = arena.alloc(Node::IfStmt { range: SourceRange::unknown(), condition, then_block, else_block: Some(else_block) });

        let f_literal = arena.alloc(Node::FunctionLiteral {
            range: SourceRange::unknown(),
            params,
            stmts: vec![if_stmt],
            outputs: Some(vec![type_lit(&arena, BuiltinTypeName::I64)]),
        });
        let f_decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "f".into(),
            type_expr: None,
            init_val: Some(f_literal),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        scope.declare("f".into(), f_decl);

        let call = arena.alloc(Node::Call { range: SourceRange::unknown(), callee: ident(&arena, "f"), args: vec![Argument { name: None, value: i64_lit(&arena, 5) }] });
        assert_eq!(verifier.evaluate_constant_i64(call, scope, &ctx), Some(120));
    }

    /// §4.3: a field's `initial_value` is folded into a default-value byte
    /// buffer rather than left empty, once the struct reaches
    /// `DataComplete`.
    #[test]
    fn struct_field_default_value_is_folded() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let default_expr = arena.alloc(Node::Binop { range: SourceRange::unknown(), op: Operator::Add, lhs: i64_lit(&arena, 3), rhs: i64_lit(&arena, 4) });
        let fields = vec![FieldDecl {
            name: "x".into(),
            type_expr: Some(type_lit(&arena, BuiltinTypeName::I64)),
            initial_value: Some(default_expr),
            hashtags: vec![],
        }];
        let literal = arena.alloc(Node::StructLiteral { range: SourceRange::unknown(), fields, hashtags: vec![] });
        let decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "S".into(),
            type_expr: None,
            init_val: Some(literal),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });

        let qt = verifier.verify_expr(decl, scope, &ctx);
        assert!(!qt.is_error());
        let s = qt.ty.as_struct().expect("struct literal produces a struct").lock().unwrap();
        assert_eq!(s.fields[0].initial_value, Some(7i64.to_le_bytes().to_vec()));
    }

    /// §8 scenario 1: `X ::= 3 + 4` folds to the constant `7`.
    #[test]
    fn plain_constant_declaration_folds_to_expected_value() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let init = arena.alloc(Node::Binop { range: SourceRange::unknown(), op: Operator::Add, lhs: i64_lit(&arena, 3), rhs: i64_lit(&arena, 4) });
        let decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "X".into(),
            type_expr: None,
            init_val: Some(init),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });

        let qt = verifier.verify_expr(decl, scope, &ctx);
        assert!(!qt.is_error());
        let buf = ctx.load_constant(decl.id()).expect("constant is bound");
        assert_eq!(i64::from_le_bytes(buf.try_into().unwrap()), 7);
    }

    /// §8 scenario 2: `S ::= struct { next: *S }` completes with a
    /// self-referential `Ptr(S)` field, fully laid out at pointer size.
    #[test]
    fn self_referential_struct_completes_with_pointer_field() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let next_type = arena.alloc(Node::Unop { range: SourceRange::unknown(), op: Operator::At, operand: ident(&arena, "S") });
        let fields = vec![FieldDecl { name: "next".into(), type_expr: Some(next_type), initial_value: None, hashtags: vec![] }];
        let literal = arena.alloc(Node::StructLiteral { range: SourceRange::unknown(), fields, hashtags: vec![] });
        let decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "S".into(),
            type_expr: None,
            init_val: Some(literal),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        scope.declare("S".into(), decl);

        let qt = verifier.verify_expr(decl, scope, &ctx);
        assert!(!qt.is_error());
        let locked = qt.ty.as_struct().expect("struct literal produces a struct").lock().unwrap();
        assert_eq!(locked.state, Completeness::Complete);
        match &*locked.fields[0].ty {
            Type::Ptr(inner) => assert!(Arc::ptr_eq(inner, &qt.ty)),
            other => panic!("expected Ptr(S), got {other:?}"),
        }
        let arch = crate::types::architecture::Arch::current();
        assert_eq!(locked.layout.expect("struct is laid out").size, arch.pointer_size());
    }

    /// §8 scenario 4: negating a variant-typed value reports one
    /// `invalid-unary-operator-call` diagnostic naming the full variant.
    #[test]
    fn negating_a_variant_typed_value_is_reported() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);
        let exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id());

        let variant_ty = interner.variant(vec![interner.primitive(Primitive::I32), interner.primitive(Primitive::Bool)]);
        let v = ident(&arena, "v");
        ctx.set_qual_type(v.id(), QualType::rvalue(variant_ty));
        let negate = arena.alloc(Node::Unop { range: SourceRange::unknown(), op: Operator::Negate, operand: v });

        let qt = verifier.verify_expr(negate, scope, &ctx);
        assert!(qt.is_error());
        let emitted = work.diagnostics.borrow();
        let diagnostics = emitted.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        match &diagnostics[0] {
            Diagnostic::InvalidUnaryOperatorCall { op, operand_type, .. } => {
                assert_eq!(op, "-");
                assert_eq!(operand_type, "I32 | Bool");
            }
            other => panic!("expected InvalidUnaryOperatorCall, got {other:?}"),
        }
    }

    struct MockImporter;
    impl Importer for MockImporter {
        fn import(&mut self, locator: &str) -> Result<ModuleId, CoreError> {
            if locator == "io" {
                Ok(ModuleId(1))
            } else {
                Err(CoreError::InvalidImportLocator(locator.to_string()))
            }
        }
    }

    /// §8 scenario 5: `M ::= import "io"; M.print(42)` resolves `print`
    /// through the importer's exports rather than lexical scope, and
    /// records the exported symbol's declaration as the call's callee.
    #[test]
    fn import_then_module_call_resolves_exported_symbol() {
        let arena = AstArena::new();
        let (interner, work, scope, ctx) = fixture(&arena);

        let print_ty = interner.func(interner.primitive(Primitive::I32), interner.void());
        let mut print_module = CompiledModule::default();
        print_module.symbols.insert("print".into(), ExportedSymbol { name: "print".into(), qual_type: QualType::rvalue(print_ty), constant: None });
        let mut exports: StdHashMap<ModuleId, CompiledModule> = StdHashMap::new();
        exports.insert(ModuleId(1), print_module);

        let mut importer = MockImporter;
        let importer_obj: &mut dyn Importer = &mut importer;
        let importer_cell = RefCell::new(importer_obj);
        let verifier = TypeVerifier::new(&interner, &work, &exports, interner.fresh_module_id()).with_importer(&importer_cell);

        let locator = arena.alloc(Node::Terminal { range: SourceRange::unknown(), value: TerminalValue::StringLiteral("io".into()) });
        let import_node = arena.alloc(Node::Import { range: SourceRange::unknown(), locator });
        let m_decl = arena.alloc(Node::Declaration {
            range: SourceRange::unknown(),
            id: "M".into(),
            type_expr: None,
            init_val: Some(import_node),
            flags: DeclFlags::CONST,
            hashtags: vec![],
        });
        scope.declare("M".into(), m_decl);
        let m_qt = verifier.verify_expr(m_decl, scope, &ctx);
        assert!(!m_qt.is_error());

        let access = arena.alloc(Node::Access { range: SourceRange::unknown(), operand: ident(&arena, "M"), member: "print".into() });
        let call = arena.alloc(Node::Call { range: SourceRange::unknown(), callee: access, args: vec![Argument { name: None, value: i64_lit(&arena, 42) }] });
        let call_qt = verifier.verify_expr(call, scope, &ctx);
        assert!(!call_qt.is_error());
        assert!(!work.has_errors());

        match ctx.call_metadata(call.id()) {
            Some(CalleeLocator::Single(decl)) => assert_eq!(decl, m_decl.id()),
            other => panic!("expected a single resolved callee, got {other:?}"),
        }
    }
}

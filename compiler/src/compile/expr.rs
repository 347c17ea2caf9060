use bytecode::{ArithOp, Comparison, Instruction, ValueKind};
use syntax::{AssignOp, BinaryOp, Expr, ExprKind, Span, UnaryOp};

use super::{source_pos, Candidate, ClassInfo, Compiler};
use crate::error::{CompileError, CompileErrorKind};
use crate::symbols::SymbolKind;
use crate::types::{Conversion, TypeError, TypeId, TypeKind, TypeScopeId};

/// Where an assignment stores its value.
#[derive(Debug, Clone, Copy)]
enum Place {
    Slot { kind: ValueKind, slot: u16 },
    /// The object is already on the stack.
    Field { kind: ValueKind, member: u16 },
    /// The array and the index are already on the stack.
    Element { kind: ValueKind },
}

impl Place {
    fn store(self) -> Instruction {
        match self {
            Place::Slot { kind, slot } => Instruction::Store { kind, slot },
            Place::Field { kind, member } => Instruction::SetField { kind, member },
            Place::Element { kind } => Instruction::SetElement { kind },
        }
    }
}

fn arith(op: BinaryOp) -> Option<ArithOp> {
    Some(match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Sub => ArithOp::Sub,
        BinaryOp::Mul => ArithOp::Mul,
        BinaryOp::Div => ArithOp::Div,
        BinaryOp::Mod => ArithOp::Mod,
        _ => return None,
    })
}

fn comparison(op: BinaryOp) -> Option<Comparison> {
    Some(match op {
        BinaryOp::Eq => Comparison::Eq,
        BinaryOp::Ne => Comparison::Ne,
        BinaryOp::Lt => Comparison::Lt,
        BinaryOp::Le => Comparison::Le,
        BinaryOp::Gt => Comparison::Gt,
        BinaryOp::Ge => Comparison::Ge,
        _ => return None,
    })
}

impl Compiler<'_> {
    /// Run `f` with `span` as the source position of what it emits.
    fn at<T>(&mut self, span: Span, f: impl FnOnce(&mut Self) -> Result<T, CompileError>) -> Result<T, CompileError> {
        let saved = self.builder().position();
        self.builder().set_position(source_pos(span));
        let result = f(self);
        self.builder().set_position(saved);
        result
    }

    /// Compile an expression that leaves exactly one value on the stack.
    pub(super) fn compile_expr(&mut self, expr: &Expr) -> Result<TypeId, CompileError> {
        self.at(expr.span, |this| this.compile_expr_kind(expr))
    }

    /// Compile an expression for its side effects only.
    pub(super) fn compile_effect(&mut self, expr: &Expr) -> Result<(), CompileError> {
        if let ExprKind::Assign { op, target, value } = &expr.kind {
            return self.at(expr.span, |this| this.compile_assign(*op, target, value, expr.span));
        }
        self.compile_expr(expr)?;
        self.emit(Instruction::Pop);
        Ok(())
    }

    /// Compile a condition and require it to be `bool`.
    pub(super) fn compile_condition(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let ty = self.compile_expr(expr)?;
        if !self.types.same(ty, TypeId::BOOL) {
            return Err(CompileError::new(
                CompileErrorKind::ConditionNotBool(self.type_name(ty)),
                expr.span,
            ));
        }
        Ok(())
    }

    fn compile_expr_kind(&mut self, expr: &Expr) -> Result<TypeId, CompileError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(value) => {
                if !self.builder().push_immediate(*value) {
                    let idx = self.pool.add_integer(*value)?;
                    self.emit(Instruction::PushConst { idx });
                }
                Ok(TypeId::INT)
            }
            ExprKind::Float(value) => {
                let idx = self.pool.add_float(*value)?;
                self.emit(Instruction::PushConst { idx });
                Ok(TypeId::DOUBLE)
            }
            ExprKind::Str(value) => {
                let idx = self.pool.add_string(value)?;
                self.emit(Instruction::PushConst { idx });
                Ok(TypeId::STRING)
            }
            ExprKind::Bool(value) => {
                self.emit(Instruction::PushByte { value: *value as i8 });
                Ok(TypeId::BOOL)
            }
            ExprKind::Ident(name) => self.compile_ident(name, span),
            ExprKind::This => self.load_this(span),
            ExprKind::Unary { op, operand } => self.compile_unary(*op, operand, span),
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => self.compile_logical(*op, left, right),
                _ => {
                    let left_ty = self.compile_expr(left)?;
                    let right_ty = self.compile_expr(right)?;
                    if !self.types.same(left_ty, right_ty) {
                        return Err(CompileError::new(
                            CompileErrorKind::OperandMismatch {
                                op: op.symbol(),
                                left: self.type_name(left_ty),
                                right: self.type_name(right_ty),
                            },
                            span,
                        ));
                    }
                    self.emit_binary(*op, left_ty, span)
                }
            },
            ExprKind::Assign { .. } => Err(CompileError::new(CompileErrorKind::AssignmentAsValue, span)),
            ExprKind::Call { name, args } => self.compile_call(name, args, span),
            ExprKind::MethodCall { receiver, method, args } => {
                let receiver_ty = self.compile_expr(receiver)?;
                let info = self.class_of(receiver_ty, span)?;
                self.compile_method_call(&info, method, args, span)
            }
            ExprKind::Property { object, name } => {
                let object_ty = self.compile_expr(object)?;
                if name == "length" && self.element_type(object_ty).is_some() {
                    self.emit(Instruction::ArrayLength);
                    return Ok(TypeId::INT);
                }
                let info = self.class_of(object_ty, span)?;
                let (member, ty) = self.member(&info, name, span)?;
                let kind = self.kind_of(ty);
                self.emit(Instruction::GetField { kind, member });
                Ok(ty)
            }
            ExprKind::New { class } => {
                let type_scope = self.frame.type_scope;
                let info = self
                    .class_info(class, type_scope)
                    .ok_or_else(|| CompileError::new(CompileErrorKind::NotAClass(class.clone()), span))?;
                self.emit(Instruction::NewObject { idx: info.pool_index });
                self.emit(Instruction::Call { idx: info.ctor_index });
                Ok(info.ty)
            }
            ExprKind::NewArray { elem, len } => {
                let type_scope = self.frame.type_scope;
                let elem = self.resolve_type(elem, type_scope, span)?;
                if self.types.same(elem, TypeId::VOID) {
                    return Err(CompileError::new(CompileErrorKind::VoidElement, span));
                }
                let found = self.compile_expr(len)?;
                self.coerce(found, TypeId::INT, len.span)?;
                let kind = self.kind_of(elem);
                self.emit(Instruction::NewArray { kind });
                self.types
                    .insert_generic(TypeKind::Array, &[elem])
                    .map_err(|err| CompileError::new(err, span))
            }
            ExprKind::Index { array, index } => {
                let elem = self.compile_element_address(array, index, span)?;
                let kind = self.kind_of(elem);
                self.emit(Instruction::GetElement { kind });
                Ok(elem)
            }
            ExprKind::Cast { ty, expr: inner } => {
                let type_scope = self.frame.type_scope;
                let target = self.resolve_type(ty, type_scope, span)?;
                let found = self.compile_expr(inner)?;
                if self.types.conversion(found, target).is_none() {
                    return Err(CompileError::new(
                        CompileErrorKind::InvalidCast {
                            from: self.type_name(found),
                            to: self.type_name(target),
                        },
                        span,
                    ));
                }
                self.emit_conversion(found, target);
                Ok(target)
            }
        }
    }

    // ── Names ──────────────────────────────────────────────────────

    fn compile_ident(&mut self, name: &str, span: Span) -> Result<TypeId, CompileError> {
        if let Some(symbol) = self.symbols.lookup_variable(self.frame.scope, name) {
            let (ty, slot) = (symbol.ty, symbol.slot().unwrap_or_default());
            let kind = self.kind_of(ty);
            self.emit(Instruction::Load { kind, slot });
            return Ok(ty);
        }
        if let Some(class) = self.frame_class() {
            let info = self.class_of(class, span)?;
            if let Some((member, ty)) = self.find_member(&info, name) {
                self.load_this(span)?;
                let kind = self.kind_of(ty);
                self.emit(Instruction::GetField { kind, member });
                return Ok(ty);
            }
        }
        Err(CompileError::new(CompileErrorKind::Undeclared(name.to_string()), span))
    }

    fn load_this(&mut self, span: Span) -> Result<TypeId, CompileError> {
        let this = self
            .frame_class()
            .and_then(|_| self.symbols.lookup_variable(self.frame.scope, "this"))
            .and_then(|symbol| Some((symbol.ty, symbol.slot()?)));
        let (ty, slot) = this.ok_or_else(|| CompileError::new(CompileErrorKind::ThisOutsideMethod, span))?;
        self.emit(Instruction::Load {
            kind: ValueKind::Ref,
            slot,
        });
        Ok(ty)
    }

    fn class_of(&self, ty: TypeId, span: Span) -> Result<ClassInfo, CompileError> {
        self.class_by_type(ty)
            .ok_or_else(|| CompileError::new(CompileErrorKind::NotAClass(self.type_name(ty)), span))
    }

    /// Element type of an array type.
    fn element_type(&self, ty: TypeId) -> Option<TypeId> {
        let entry = self.types.get(self.types.resolve(ty));
        match entry.kind {
            TypeKind::Array => entry.type_args.first().copied(),
            _ => None,
        }
    }

    /// Push an array and an `int` index; returns the element type.
    fn compile_element_address(&mut self, array: &Expr, index: &Expr, span: Span) -> Result<TypeId, CompileError> {
        let array_ty = self.compile_expr(array)?;
        let elem = self
            .element_type(array_ty)
            .ok_or_else(|| CompileError::new(CompileErrorKind::NotAnArray(self.type_name(array_ty)), span))?;
        let found = self.compile_expr(index)?;
        self.coerce(found, TypeId::INT, index.span)?;
        Ok(elem)
    }

    fn find_member(&self, info: &ClassInfo, name: &str) -> Option<(u16, TypeId)> {
        let symbol = self.symbols.lookup_local(info.members, name)?;
        Some((symbol.slot()?, symbol.ty))
    }

    fn member(&self, info: &ClassInfo, name: &str, span: Span) -> Result<(u16, TypeId), CompileError> {
        self.find_member(info, name).ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::UnknownMember {
                    ty: info.name.clone(),
                    name: name.to_string(),
                },
                span,
            )
        })
    }

    // ── Operators ──────────────────────────────────────────────────

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<TypeId, CompileError> {
        let ty = self.compile_expr(operand)?;
        let resolved = self.types.resolve(ty);
        match (op, resolved) {
            (UnaryOp::Neg, TypeId::INT | TypeId::DOUBLE) => {
                let kind = self.kind_of(resolved);
                self.emit(Instruction::Neg { kind });
                Ok(ty)
            }
            (UnaryOp::Not, TypeId::BOOL) => {
                self.emit(Instruction::Not);
                Ok(ty)
            }
            _ => Err(CompileError::new(
                CompileErrorKind::UnsupportedOperator {
                    op: if op == UnaryOp::Neg { "-" } else { "!" },
                    ty: self.type_name(ty),
                },
                span,
            )),
        }
    }

    /// `&&` and `||` evaluate the right operand only when needed.
    fn compile_logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<TypeId, CompileError> {
        let (short, rest) = if op == BinaryOp::And { (0, 1) } else { (1, 0) };

        self.compile_condition(left)?;
        let first = match op {
            BinaryOp::And => self.builder().jump_if_false(),
            _ => self.builder().jump_if_true(),
        };
        self.compile_condition(right)?;
        let second = match op {
            BinaryOp::And => self.builder().jump_if_false(),
            _ => self.builder().jump_if_true(),
        };
        self.emit(Instruction::PushByte { value: rest });
        let end = self.builder().jump();
        self.builder().bind(first);
        self.builder().bind(second);
        self.emit(Instruction::PushByte { value: short });
        self.builder().bind(end);
        Ok(TypeId::BOOL)
    }

    /// Emit `op` over two operands of type `ty` already on the stack.
    fn emit_binary(&mut self, op: BinaryOp, ty: TypeId, span: Span) -> Result<TypeId, CompileError> {
        let resolved = self.types.resolve(ty);
        let kind = self.kind_of(resolved);
        let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);

        let instruction = match resolved {
            TypeId::INT | TypeId::DOUBLE => match (arith(op), comparison(op)) {
                (Some(op), _) => Some((Instruction::Arith { kind, op }, ty)),
                (_, Some(cmp)) => Some((Instruction::Compare { kind, cmp }, TypeId::BOOL)),
                _ => None,
            },
            TypeId::STRING if op == BinaryOp::Add => Some((Instruction::Concat, ty)),
            TypeId::VOID => None,
            _ if equality => comparison(op).map(|cmp| (Instruction::Compare { kind, cmp }, TypeId::BOOL)),
            _ => None,
        };

        let (instruction, result) = instruction.ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::UnsupportedOperator {
                    op: op.symbol(),
                    ty: self.type_name(ty),
                },
                span,
            )
        })?;
        self.emit(instruction);
        Ok(result)
    }

    // ── Conversions ────────────────────────────────────────────────

    /// Emit what turns a `from` value into a `to` value.
    pub(super) fn emit_conversion(&mut self, from: TypeId, to: TypeId) {
        let (from, to) = (self.types.resolve(from), self.types.resolve(to));
        if from == to {
            return;
        }
        match (self.kind_of(from), self.kind_of(to)) {
            (ValueKind::Int, ValueKind::Float) => {
                self.emit(Instruction::IntToFloat);
            }
            (ValueKind::Float, ValueKind::Int) => {
                self.emit(Instruction::FloatToInt);
            }
            _ => {}
        }
        if to == TypeId::BOOL {
            self.emit(Instruction::PushByte { value: 0 });
            self.emit(Instruction::Compare {
                kind: ValueKind::Int,
                cmp: Comparison::Ne,
            });
        }
    }

    fn implicit(&self, from: TypeId, to: TypeId) -> bool {
        self.types.conversion(from, to) == Some(Conversion::Implicit)
    }

    /// Accept `found` where `expected` is required, converting if needed.
    pub(super) fn coerce(&mut self, found: TypeId, expected: TypeId, span: Span) -> Result<(), CompileError> {
        if !self.implicit(found, expected) {
            return Err(CompileError::new(
                CompileErrorKind::TypeMismatch {
                    expected: self.type_name(expected),
                    found: self.type_name(found),
                },
                span,
            ));
        }
        self.emit_conversion(found, expected);
        Ok(())
    }

    // ── Assignment ─────────────────────────────────────────────────

    /// Emit the addressing part of an assignment target.
    fn emit_place(&mut self, target: &Expr) -> Result<(Place, TypeId), CompileError> {
        let span = target.span;
        match &target.kind {
            ExprKind::Ident(name) => {
                if let Some(symbol) = self.symbols.lookup_variable(self.frame.scope, name) {
                    let (ty, slot) = (symbol.ty, symbol.slot().unwrap_or_default());
                    return Ok((
                        Place::Slot {
                            kind: self.kind_of(ty),
                            slot,
                        },
                        ty,
                    ));
                }
                let class = self
                    .frame_class()
                    .ok_or_else(|| CompileError::new(CompileErrorKind::Undeclared(name.clone()), span))?;
                let info = self.class_of(class, span)?;
                let (member, ty) = self
                    .find_member(&info, name)
                    .ok_or_else(|| CompileError::new(CompileErrorKind::Undeclared(name.clone()), span))?;
                self.load_this(span)?;
                Ok((
                    Place::Field {
                        kind: self.kind_of(ty),
                        member,
                    },
                    ty,
                ))
            }
            ExprKind::Property { object, name } => {
                let object_ty = self.compile_expr(object)?;
                if self.element_type(object_ty).is_some() {
                    return Err(CompileError::new(CompileErrorKind::InvalidAssignTarget, span));
                }
                let info = self.class_of(object_ty, span)?;
                let (member, ty) = self.member(&info, name, span)?;
                Ok((
                    Place::Field {
                        kind: self.kind_of(ty),
                        member,
                    },
                    ty,
                ))
            }
            ExprKind::Index { array, index } => {
                let elem = self.compile_element_address(array, index, span)?;
                Ok((
                    Place::Element {
                        kind: self.kind_of(elem),
                    },
                    elem,
                ))
            }
            _ => Err(CompileError::new(CompileErrorKind::InvalidAssignTarget, span)),
        }
    }

    /// Lower `target = value` or `target op= value`.
    ///
    /// The target's addressing is emitted once. Its store is set aside while
    /// the value is computed and appended last, so a compound assignment to
    /// a property reuses the object through `dup`, and one to an element
    /// reuses the array and index through `dup2`.
    fn compile_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, span: Span) -> Result<(), CompileError> {
        let (place, target_ty) = self.emit_place(target)?;
        self.emit(place.store());
        let Some(store) = self.builder().pop_last() else {
            return Err(CompileError::new(CompileErrorKind::InvalidAssignTarget, span));
        };

        match op.binary() {
            None => {
                let found = self.compile_expr(value)?;
                self.coerce(found, target_ty, value.span)?;
            }
            Some(binary) => {
                match place {
                    Place::Field { kind, member } => {
                        self.emit(Instruction::Dup);
                        self.emit(Instruction::GetField { kind, member });
                    }
                    Place::Slot { kind, slot } => {
                        self.emit(Instruction::Load { kind, slot });
                    }
                    Place::Element { kind } => {
                        self.emit(Instruction::Dup2);
                        self.emit(Instruction::GetElement { kind });
                    }
                }
                let found = self.compile_expr(value)?;
                if !self.types.same(found, target_ty) {
                    return Err(CompileError::new(
                        CompileErrorKind::OperandMismatch {
                            op: binary.symbol(),
                            left: self.type_name(target_ty),
                            right: self.type_name(found),
                        },
                        span,
                    ));
                }
                let result = self.emit_binary(binary, target_ty, span)?;
                self.coerce(result, target_ty, span)?;
            }
        }

        self.builder().restore(store);
        Ok(())
    }

    // ── Calls ──────────────────────────────────────────────────────

    fn compile_call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<TypeId, CompileError> {
        let functions: Vec<Candidate> = self
            .symbols
            .lookup_callables(self.frame.scope, name)
            .into_iter()
            .filter_map(|symbol| {
                Some(Candidate {
                    params: symbol.params()?.to_vec(),
                    ret: symbol.ty,
                    id: symbol.callable_id()?,
                })
            })
            .collect();
        if !functions.is_empty() {
            let target = self.compile_arguments(name, &functions, args, span)?;
            self.emit(Instruction::Call { idx: target.id });
            return Ok(target.ret);
        }

        if let Some(class) = self.frame_class() {
            let info = self.class_of(class, span)?;
            if !self.symbols.lookup_methods(info.methods, name).is_empty() {
                self.load_this(span)?;
                return self.compile_method_call(&info, name, args, span);
            }
        }

        let natives = self.native_candidates(name, span)?;
        if !natives.is_empty() {
            let target = self.compile_arguments(name, &natives, args, span)?;
            self.emit(Instruction::CallNative { idx: target.id });
            return Ok(target.ret);
        }

        Err(CompileError::new(
            CompileErrorKind::UndefinedFunction(name.to_string()),
            span,
        ))
    }

    /// Call a method on the receiver already on the stack.
    fn compile_method_call(
        &mut self,
        info: &ClassInfo,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<TypeId, CompileError> {
        let methods: Vec<Candidate> = self
            .symbols
            .lookup_methods(info.methods, name)
            .into_iter()
            .filter_map(|symbol| match &symbol.kind {
                SymbolKind::Method { params, id } => Some(Candidate {
                    params: params.clone(),
                    ret: symbol.ty,
                    id: *id,
                }),
                _ => None,
            })
            .collect();
        if methods.is_empty() {
            return Err(CompileError::new(
                CompileErrorKind::UnknownMethod {
                    ty: info.name.clone(),
                    name: name.to_string(),
                },
                span,
            ));
        }
        let target = self.compile_arguments(name, &methods, args, span)?;
        self.emit(Instruction::Call { idx: target.id });
        Ok(target.ret)
    }

    fn native_candidates(&self, name: &str, span: Span) -> Result<Vec<Candidate>, CompileError> {
        let mut candidates = Vec::new();
        for (idx, native) in self.natives.iter().enumerate().filter(|(_, n)| n.name == name) {
            let id = u16::try_from(idx).map_err(|_| {
                CompileError::new(CompileErrorKind::UndefinedFunction(name.to_string()), span)
            })?;
            let mut params = Vec::with_capacity(native.params.len());
            for param in &native.params {
                params.push(self.lookup_named(param, span)?);
            }
            let ret = self.lookup_named(&native.ret, span)?;
            candidates.push(Candidate { params, ret, id });
        }
        Ok(candidates)
    }

    fn lookup_named(&self, name: &str, span: Span) -> Result<TypeId, CompileError> {
        self.types.lookup(TypeScopeId::GLOBAL, name).ok_or_else(|| {
            CompileError::new(TypeError::Unknown(name.to_string()), span)
        })
    }

    /// Pick an overload and push its arguments.
    ///
    /// A single overload of the right arity accepts implicit conversions
    /// per argument; among several, one must match the argument types
    /// exactly.
    fn compile_arguments(
        &mut self,
        name: &str,
        candidates: &[Candidate],
        args: &[Expr],
        span: Span,
    ) -> Result<Candidate, CompileError> {
        let fitting: Vec<&Candidate> = candidates.iter().filter(|c| c.params.len() == args.len()).collect();

        match fitting.as_slice() {
            [] if candidates.len() == 1 => Err(CompileError::new(
                CompileErrorKind::ArityMismatch {
                    name: name.to_string(),
                    expected: candidates[0].params.len(),
                    found: args.len(),
                },
                span,
            )),
            [single] => {
                let target = (*single).clone();
                for (position, (arg, &expected)) in args.iter().zip(&target.params).enumerate() {
                    let found = self.compile_expr(arg)?;
                    if !self.implicit(found, expected) {
                        return Err(CompileError::new(
                            CompileErrorKind::ArgumentType {
                                name: name.to_string(),
                                position: position + 1,
                                expected: self.type_name(expected),
                                found: self.type_name(found),
                            },
                            arg.span,
                        ));
                    }
                    self.emit_conversion(found, expected);
                }
                Ok(target)
            }
            _ => {
                let mut found = Vec::with_capacity(args.len());
                for arg in args {
                    found.push(self.compile_expr(arg)?);
                }
                fitting
                    .iter()
                    .find(|c| c.params.iter().zip(&found).all(|(&p, &f)| self.types.same(p, f)))
                    .map(|c| (*c).clone())
                    .ok_or_else(|| {
                        CompileError::new(
                            CompileErrorKind::NoMatchingOverload {
                                name: name.to_string(),
                                found: self.signature(&found).trim_matches(['(', ')']).to_string(),
                            },
                            span,
                        )
                    })
            }
        }
    }
}

//! Lowers a [`Program`] into a [`CompiledFile`].
//!
//! Compilation runs in three passes over the top-level items: class types,
//! then class members and all callable signatures, then bodies. Every
//! lowering step returns `Result`, so the first error ends compilation.

mod expr;
mod stmt;

use std::collections::BTreeMap;

use bytecode::{
    disassemble, encode, BytecodeBuilder, ConstantPoolBuilder, Instruction, Label, SourcePos,
    ValueKind,
};
use syntax::{ClassDecl, FunctionDecl, Program, Span, StmtKind, TypeExpr};

use crate::artifact::{ClassInstance, CompiledCallable, CompiledFile, GlobalVariable};
use crate::error::{CompileError, CompileErrorKind};
use crate::natives::NativeSignature;
use crate::symbols::{ScopeId, SymbolKind, SymbolTable};
use crate::types::{TypeError, TypeId, TypeKind, TypeScopeId, TypeTable};

/// Method-table name of a class's internal constructor. Not a valid
/// source identifier, so it never collides with user methods.
const CONSTRUCTOR: &str = "<init>";

#[derive(Debug, Clone, Default)]
pub struct CompilerSettings {
    /// Log every finished callable's disassembly at debug level.
    pub log_disassembly: bool,
}

/// Compile-time facts about a declared class, read from its symbol.
#[derive(Debug, Clone)]
struct ClassInfo {
    name: String,
    ty: TypeId,
    members: ScopeId,
    methods: ScopeId,
    types: TypeScopeId,
    pool_index: u16,
    ctor_index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    TopLevel,
    Function,
    Method { class: TypeId },
    Constructor { class: TypeId },
}

struct LoopContext {
    continue_target: usize,
    breaks: Vec<Label>,
}

/// Per-callable compilation state.
struct CompileFrame {
    builder: BytecodeBuilder,
    kind: FrameKind,
    scope: ScopeId,
    type_scope: TypeScopeId,
    return_type: TypeId,
    loops: Vec<LoopContext>,
}

impl CompileFrame {
    fn top_level() -> Self {
        Self::new(FrameKind::TopLevel, ScopeId::GLOBAL, TypeScopeId::GLOBAL, TypeId::VOID)
    }

    fn new(kind: FrameKind, scope: ScopeId, type_scope: TypeScopeId, return_type: TypeId) -> Self {
        Self {
            builder: BytecodeBuilder::new(),
            kind,
            scope,
            type_scope,
            return_type,
            loops: Vec::new(),
        }
    }
}

/// A resolved call target.
#[derive(Debug, Clone)]
struct Candidate {
    params: Vec<TypeId>,
    ret: TypeId,
    id: u16,
}

pub struct Compiler<'a> {
    types: TypeTable,
    symbols: SymbolTable,
    pool: ConstantPoolBuilder,
    natives: &'a [NativeSignature],
    settings: CompilerSettings,
    frame: CompileFrame,
    /// Frames of the callables enclosing the one being compiled.
    suspended: Vec<CompileFrame>,
    scope_depth: u32,
    compiled_functions: BTreeMap<String, CompiledCallable>,
    compiled_classes: BTreeMap<String, ClassInstance>,
    globals: BTreeMap<String, GlobalVariable>,
}

/// Compile with a fresh type table and default settings.
pub fn compile(program: &Program, natives: &[NativeSignature]) -> Result<CompiledFile, CompileError> {
    Compiler::new(natives).compile(program)
}

fn source_pos(span: Span) -> SourcePos {
    SourcePos::new(span.start.line as u32, span.start.column as u32)
}

impl<'a> Compiler<'a> {
    pub fn new(natives: &'a [NativeSignature]) -> Self {
        Self::with_types(TypeTable::new(), natives, CompilerSettings::default())
    }

    /// Start from a type table the parser already seeded.
    pub fn with_types(types: TypeTable, natives: &'a [NativeSignature], settings: CompilerSettings) -> Self {
        Self {
            types,
            symbols: SymbolTable::new(),
            pool: ConstantPoolBuilder::new(),
            natives,
            settings,
            frame: CompileFrame::top_level(),
            suspended: Vec::new(),
            scope_depth: 0,
            compiled_functions: BTreeMap::new(),
            compiled_classes: BTreeMap::new(),
            globals: BTreeMap::new(),
        }
    }

    pub fn compile(mut self, program: &Program) -> Result<CompiledFile, CompileError> {
        log::debug!("compiling {} top-level items", program.items.len());

        for item in &program.items {
            if let StmtKind::Class(decl) = &item.kind {
                self.declare_class(decl, item.span, ScopeId::GLOBAL, TypeScopeId::GLOBAL, None)?;
            }
        }
        for item in &program.items {
            match &item.kind {
                StmtKind::Class(decl) => self.declare_class_members(decl, item.span, TypeScopeId::GLOBAL)?,
                StmtKind::Function(decl) => self.declare_function(decl, item.span)?,
                _ => {}
            }
        }

        for item in &program.items {
            match &item.kind {
                StmtKind::Function(decl) => self.compile_function(decl, item.span)?,
                StmtKind::Class(decl) => self.compile_class(decl, item.span, TypeScopeId::GLOBAL)?,
                _ => self.compile_stmt(item)?,
            }
        }
        self.emit(Instruction::Stop);

        let frame = self.pop_frame();
        let slot_count = self.symbols.slot_count(ScopeId::GLOBAL);
        let top_level = self.finish_callable("<top-level>", frame, Vec::new(), None, slot_count)?;

        log::debug!(
            "compiled {} functions, {} classes, {} constants",
            self.compiled_functions.len(),
            self.compiled_classes.len(),
            self.pool.len()
        );
        Ok(CompiledFile {
            pool: self.pool.finalize(),
            top_level,
            functions: self.compiled_functions,
            classes: self.compiled_classes,
            globals: self.globals,
            types: self.types,
        })
    }

    // ── Frames ─────────────────────────────────────────────────────

    fn push_frame(&mut self, frame: CompileFrame) {
        let outer = std::mem::replace(&mut self.frame, frame);
        self.suspended.push(outer);
    }

    /// Detach the current frame and resume the enclosing one.
    fn pop_frame(&mut self) -> CompileFrame {
        let outer = self.suspended.pop().unwrap_or_else(CompileFrame::top_level);
        std::mem::replace(&mut self.frame, outer)
    }

    fn builder(&mut self) -> &mut BytecodeBuilder {
        &mut self.frame.builder
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.builder().emit(instruction)
    }

    /// Class whose members are implicitly reachable through `this`.
    fn frame_class(&self) -> Option<TypeId> {
        match self.frame.kind {
            FrameKind::Method { class } | FrameKind::Constructor { class } => Some(class),
            _ => None,
        }
    }

    /// Open a block scope; returns the scope to restore.
    fn enter_scope(&mut self) -> ScopeId {
        self.scope_depth += 1;
        let outer = self.frame.scope;
        self.frame.scope = self.symbols.push_block(outer, self.scope_depth);
        outer
    }

    fn leave_scope(&mut self, outer: ScopeId) {
        self.symbols.remove(self.scope_depth);
        self.scope_depth -= 1;
        self.frame.scope = outer;
    }

    fn finish_callable(
        &mut self,
        name: &str,
        frame: CompileFrame,
        param_types: Vec<TypeId>,
        pool_index: Option<u16>,
        slot_count: usize,
    ) -> Result<CompiledCallable, CompileError> {
        let return_type = frame.return_type;
        let (instructions, positions) = frame.builder.into_parts();
        let body = encode(&instructions, &positions)?;
        log::debug!(
            "compiled {name}: {} instructions, {} bytes, {slot_count} slots",
            instructions.len(),
            body.len()
        );
        if self.settings.log_disassembly {
            if let Ok(text) = disassemble(&body.bytes) {
                log::debug!("{name}:\n{text}");
            }
        }
        Ok(CompiledCallable {
            name: name.to_string(),
            return_type,
            param_types,
            pool_index,
            slot_count,
            instructions,
            body,
        })
    }

    // ── Types ──────────────────────────────────────────────────────

    fn resolve_type(&mut self, ty: &TypeExpr, scope: TypeScopeId, span: Span) -> Result<TypeId, CompileError> {
        let spanned = |err: TypeError| CompileError::new(err, span);
        match ty {
            TypeExpr::Named(name) => self
                .types
                .lookup(scope, name)
                .filter(|&id| self.types.get(id).complete)
                .ok_or_else(|| spanned(TypeError::Unknown(name.clone()))),
            TypeExpr::Array(elem) => {
                let elem = self.resolve_type(elem, scope, span)?;
                self.types.insert_generic(TypeKind::Array, &[elem]).map_err(spanned)
            }
            TypeExpr::Tuple(elems) => {
                let elems = elems
                    .iter()
                    .map(|elem| self.resolve_type(elem, scope, span))
                    .collect::<Result<Vec<_>, _>>()?;
                self.types.insert_generic(TypeKind::Tuple, &elems).map_err(spanned)
            }
            TypeExpr::Function { params, ret } => {
                let mut args = params
                    .iter()
                    .map(|param| self.resolve_type(param, scope, span))
                    .collect::<Result<Vec<_>, _>>()?;
                args.push(self.resolve_type(ret, scope, span)?);
                self.types.insert_generic(TypeKind::Function, &args).map_err(spanned)
            }
        }
    }

    fn type_name(&self, ty: TypeId) -> String {
        self.types.name(ty).to_string()
    }

    fn kind_of(&self, ty: TypeId) -> ValueKind {
        match self.types.resolve(ty) {
            TypeId::INT | TypeId::BOOL => ValueKind::Int,
            TypeId::DOUBLE => ValueKind::Float,
            _ => ValueKind::Ref,
        }
    }

    fn signature(&self, params: &[TypeId]) -> String {
        let names: Vec<&str> = params
            .iter()
            .map(|&ty| self.types.name(self.types.resolve(ty)))
            .collect();
        format!("({})", names.join(","))
    }

    fn resolve_params(
        &mut self,
        decl: &FunctionDecl,
        scope: TypeScopeId,
        span: Span,
    ) -> Result<(Vec<TypeId>, TypeId), CompileError> {
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let ty = self.resolve_type(&param.ty, scope, span)?;
            if self.types.same(ty, TypeId::VOID) {
                return Err(CompileError::new(
                    CompileErrorKind::VoidVariable(param.name.clone()),
                    span,
                ));
            }
            params.push(ty);
        }
        let ret = self.resolve_type(&decl.ret, scope, span)?;
        Ok((params, ret))
    }

    // ── Declarations ───────────────────────────────────────────────

    fn declare_class(
        &mut self,
        decl: &ClassDecl,
        span: Span,
        scope: ScopeId,
        type_scope: TypeScopeId,
        outer: Option<&str>,
    ) -> Result<(), CompileError> {
        let name = match outer {
            Some(outer) => format!("{outer}.{}", decl.name),
            None => decl.name.clone(),
        };
        let ty = self
            .types
            .insert(type_scope, &decl.name, TypeKind::Class, None)
            .map_err(|err| CompileError::new(err, span))?;
        let private = self.types.new_scope(type_scope);
        let pool_index = self.pool.add_class(&name)?;
        let ctor_index = self.pool.add_method(&format!("{name}.{CONSTRUCTOR}"))?;
        let (members, methods) = self
            .symbols
            .insert_class(scope, &decl.name, &name, ty, private, pool_index)
            .map_err(|err| CompileError::new(err, span))?;
        self.symbols
            .insert_method(methods, CONSTRUCTOR, ty, Vec::new(), ctor_index)
            .map_err(|err| CompileError::new(err, span))?;

        for item in &decl.body {
            if let StmtKind::Class(nested) = &item.kind {
                self.declare_class(nested, item.span, members, private, Some(&name))?;
            }
        }
        Ok(())
    }

    /// Class facts for a class type, through the symbol table.
    fn class_by_type(&self, ty: TypeId) -> Option<ClassInfo> {
        let ty = self.types.resolve(ty);
        let symbol = self.symbols.lookup_class_by_type(ty)?;
        let SymbolKind::Class {
            qualified,
            members,
            methods,
            types,
            id,
        } = &symbol.kind
        else {
            return None;
        };
        let ctor_index = self.symbols.lookup_local(*methods, CONSTRUCTOR)?.callable_id()?;
        Some(ClassInfo {
            name: qualified.clone(),
            ty,
            members: *members,
            methods: *methods,
            types: *types,
            pool_index: *id,
            ctor_index,
        })
    }

    fn class_info(&self, name: &str, type_scope: TypeScopeId) -> Option<ClassInfo> {
        let ty = self.types.lookup(type_scope, name)?;
        self.class_by_type(ty)
    }

    fn declare_class_members(
        &mut self,
        decl: &ClassDecl,
        span: Span,
        type_scope: TypeScopeId,
    ) -> Result<(), CompileError> {
        let info = self
            .class_info(&decl.name, type_scope)
            .ok_or_else(|| CompileError::new(CompileErrorKind::NotAClass(decl.name.clone()), span))?;

        for item in &decl.body {
            match &item.kind {
                StmtKind::VarDecl(var) => {
                    let ty = self.resolve_type(&var.ty, info.types, item.span)?;
                    if self.types.same(ty, TypeId::VOID) {
                        return Err(CompileError::new(
                            CompileErrorKind::VoidVariable(var.name.clone()),
                            item.span,
                        ));
                    }
                    self.symbols
                        .insert_variable(info.members, &var.name, ty)
                        .map_err(|err| CompileError::new(err, item.span))?;
                }
                StmtKind::Function(method) => {
                    let (params, ret) = self.resolve_params(method, info.types, item.span)?;
                    let mangled = format!("{}.{}{}", info.name, method.name, self.signature(&params));
                    let id = self.pool.add_method(&mangled)?;
                    self.symbols
                        .insert_method(info.methods, &method.name, ret, params, id)
                        .map_err(|err| CompileError::new(err, item.span))?;
                }
                StmtKind::Class(nested) => self.declare_class_members(nested, item.span, info.types)?,
                _ => {
                    return Err(CompileError::new(
                        CompileErrorKind::MalformedClass(info.name.clone()),
                        item.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn declare_function(&mut self, decl: &FunctionDecl, span: Span) -> Result<(), CompileError> {
        let (params, ret) = self.resolve_params(decl, TypeScopeId::GLOBAL, span)?;
        let mangled = format!("{}{}", decl.name, self.signature(&params));
        let id = self.pool.add_function(&mangled)?;
        self.symbols
            .insert_callable(ScopeId::GLOBAL, &decl.name, ret, params, id)
            .map_err(|err| CompileError::new(err, span))
    }

    // ── Bodies ─────────────────────────────────────────────────────

    fn compile_function(&mut self, decl: &FunctionDecl, span: Span) -> Result<(), CompileError> {
        let (params, _) = self.resolve_params(decl, TypeScopeId::GLOBAL, span)?;
        let mangled = format!("{}{}", decl.name, self.signature(&params));
        let id = self.pool.add_function(&mangled)?;
        let callable = self.compile_callable(
            FrameKind::Function,
            ScopeId::GLOBAL,
            TypeScopeId::GLOBAL,
            decl,
            span,
            &mangled,
            id,
        )?;
        self.compiled_functions.insert(mangled, callable);
        Ok(())
    }

    /// Compile a function or method body in a fresh slot root.
    ///
    /// The caller leaves the arguments on the new frame's stack with the
    /// first argument on top, so the prologue stores them in order.
    #[allow(clippy::too_many_arguments)]
    fn compile_callable(
        &mut self,
        kind: FrameKind,
        parent: ScopeId,
        type_scope: TypeScopeId,
        decl: &FunctionDecl,
        span: Span,
        name: &str,
        pool_index: u16,
    ) -> Result<CompiledCallable, CompileError> {
        let (declared, ret) = self.resolve_params(decl, type_scope, span)?;

        self.scope_depth += 1;
        let root = self.symbols.push_root(parent, self.scope_depth);
        self.push_frame(CompileFrame::new(kind, root, type_scope, ret));
        self.builder().set_position(source_pos(span));

        let mut params = Vec::with_capacity(declared.len() + 1);
        if let FrameKind::Method { class } = kind {
            self.declare_parameter("this", class, span)?;
            params.push(class);
        }
        for (param, &ty) in decl.params.iter().zip(&declared) {
            self.declare_parameter(&param.name, ty, span)?;
            params.push(ty);
        }

        for stmt in &decl.body {
            self.compile_stmt(stmt)?;
        }
        // A value-returning body that runs off its end faults at run time
        // with a missing return.
        if self.types.same(ret, TypeId::VOID) && self.falls_through() {
            self.emit(Instruction::RetVoid);
        }

        let slot_count = self.symbols.slot_count(root);
        let frame = self.pop_frame();
        self.symbols.remove(self.scope_depth);
        self.scope_depth -= 1;
        self.finish_callable(name, frame, params, Some(pool_index), slot_count)
    }

    /// Whether control can reach the end of the current body.
    fn falls_through(&mut self) -> bool {
        let builder = self.builder();
        let end = builder.current_index() as u32;
        !builder.last().is_some_and(Instruction::is_return)
            || builder.instructions().iter().any(|i| i.jump_target() == Some(end))
    }

    fn declare_parameter(&mut self, name: &str, ty: TypeId, span: Span) -> Result<u16, CompileError> {
        let scope = self.frame.scope;
        let slot = self
            .symbols
            .insert_variable(scope, name, ty)
            .map_err(|err| CompileError::new(err, span))?;
        let kind = self.kind_of(ty);
        self.emit(Instruction::Store { kind, slot });
        Ok(slot)
    }

    fn compile_class(&mut self, decl: &ClassDecl, span: Span, type_scope: TypeScopeId) -> Result<(), CompileError> {
        let info = self
            .class_info(&decl.name, type_scope)
            .ok_or_else(|| CompileError::new(CompileErrorKind::NotAClass(decl.name.clone()), span))?;

        let constructor = self.compile_constructor(decl, span, &info)?;

        let mut methods = BTreeMap::new();
        for item in &decl.body {
            match &item.kind {
                StmtKind::Function(method) => {
                    let (params, _) = self.resolve_params(method, info.types, item.span)?;
                    let mangled = format!("{}.{}{}", info.name, method.name, self.signature(&params));
                    let id = self.pool.add_method(&mangled)?;
                    let callable = self.compile_callable(
                        FrameKind::Method { class: info.ty },
                        info.methods,
                        info.types,
                        method,
                        item.span,
                        &mangled,
                        id,
                    )?;
                    methods.insert(mangled, callable);
                }
                StmtKind::Class(nested) => self.compile_class(nested, item.span, info.types)?,
                _ => {}
            }
        }

        let mut members = BTreeMap::new();
        let mut member_kinds = Vec::new();
        let mut member_names = Vec::new();
        for (slot, ty, name) in self
            .symbols
            .members(info.members)
            .into_iter()
            .filter_map(|sym| Some((sym.slot()?, sym.ty, sym.name.clone())))
            .collect::<Vec<_>>()
        {
            members.insert(slot, ty);
            member_kinds.push(self.kind_of(ty));
            member_names.push(name);
        }

        self.compiled_classes.insert(
            info.name.clone(),
            ClassInstance {
                name: info.name,
                ty: info.ty,
                pool_index: info.pool_index,
                members,
                member_kinds,
                member_names,
                constructor,
                methods,
            },
        );
        Ok(())
    }

    /// The internal constructor: runs member initializers on the object
    /// passed as its only argument and returns it.
    fn compile_constructor(
        &mut self,
        decl: &ClassDecl,
        span: Span,
        info: &ClassInfo,
    ) -> Result<CompiledCallable, CompileError> {
        self.scope_depth += 1;
        let root = self.symbols.push_root(info.methods, self.scope_depth);
        self.push_frame(CompileFrame::new(
            FrameKind::Constructor { class: info.ty },
            root,
            info.types,
            info.ty,
        ));
        self.builder().set_position(source_pos(span));
        let this = self.declare_parameter("this", info.ty, span)?;

        for item in &decl.body {
            let StmtKind::VarDecl(var) = &item.kind else {
                continue;
            };
            let Some(init) = &var.init else {
                continue;
            };
            let (member, ty) = self
                .symbols
                .lookup_local(info.members, &var.name)
                .and_then(|sym| Some((sym.slot()?, sym.ty)))
                .ok_or_else(|| {
                    CompileError::new(CompileErrorKind::Undeclared(var.name.clone()), item.span)
                })?;
            self.builder().set_position(source_pos(item.span));
            self.emit(Instruction::Load {
                kind: ValueKind::Ref,
                slot: this,
            });
            let found = self.compile_expr(init)?;
            self.coerce(found, ty, init.span)?;
            let kind = self.kind_of(ty);
            self.emit(Instruction::SetField { kind, member });
        }

        self.emit(Instruction::Load {
            kind: ValueKind::Ref,
            slot: this,
        });
        self.emit(Instruction::Ret);

        let slot_count = self.symbols.slot_count(root);
        let frame = self.pop_frame();
        self.symbols.remove(self.scope_depth);
        self.scope_depth -= 1;
        let name = format!("{}.{CONSTRUCTOR}", info.name);
        self.finish_callable(&name, frame, vec![info.ty], Some(info.ctor_index), slot_count)
    }
}

#[cfg(test)]
mod tests {
    use bytecode::{ArithOp, Comparison, Instruction, ValueKind};
    use syntax::build::*;
    use syntax::{AssignOp, BinaryOp, Program};

    use super::*;
    use crate::symbols::SymbolError;

    fn compile_ok(program: &Program) -> CompiledFile {
        compile(program, &[]).unwrap()
    }

    fn compile_err(program: &Program) -> CompileErrorKind {
        compile(program, &[]).unwrap_err().kind
    }

    fn contains(code: &[Instruction], run: &[Instruction]) -> bool {
        code.windows(run.len()).any(|window| window == run)
    }

    #[test]
    fn precedence_shapes_stack_code() {
        let file = compile_ok(&program(vec![var(
            "int",
            "a",
            Some(binary(
                BinaryOp::Add,
                int(2),
                binary(BinaryOp::Mul, int(3), int(4)),
            )),
        )]));
        assert_eq!(
            file.top_level.instructions,
            vec![
                Instruction::PushByte { value: 2 },
                Instruction::PushByte { value: 3 },
                Instruction::PushByte { value: 4 },
                Instruction::Arith { kind: ValueKind::Int, op: ArithOp::Mul },
                Instruction::Arith { kind: ValueKind::Int, op: ArithOp::Add },
                Instruction::Store { kind: ValueKind::Int, slot: 0 },
                Instruction::Stop,
            ]
        );
        assert_eq!(file.globals["a"], GlobalVariable { slot: 0, ty: TypeId::INT });
        assert_eq!(file.top_level.slot_count, 1);
    }

    #[test]
    fn loop_jumps_stay_in_range() {
        let file = compile_ok(&program(vec![
            var("int", "sum", Some(int(0))),
            for_loop(
                Some(var("int", "i", Some(int(0)))),
                Some(binary(BinaryOp::Lt, ident("i"), int(5))),
                Some(assign(ident("i"), binary(BinaryOp::Add, ident("i"), int(1)))),
                block(vec![
                    if_else(
                        vec![(binary(BinaryOp::Eq, ident("i"), int(3)), continue_())],
                        None,
                    ),
                    expr(assign(ident("sum"), binary(BinaryOp::Add, ident("sum"), ident("i")))),
                ]),
            ),
            while_loop(boolean(true), break_()),
        ]));
        let code = &file.top_level.instructions;
        let targets: Vec<u32> = code.iter().filter_map(Instruction::jump_target).collect();
        assert!(targets.len() >= 5);
        assert!(targets.iter().all(|&t| (t as usize) <= code.len()));
        // The entry jump skips the step.
        assert_eq!(code[4], Instruction::Jump { target: 9 });
    }

    #[test]
    fn redeclaration_in_chain_is_rejected() {
        let err = compile_err(&program(vec![
            var("int", "x", None),
            block(vec![var("double", "x", None)]),
        ]));
        assert_eq!(err, CompileErrorKind::Symbol(SymbolError::Redeclared("x".into())));
    }

    #[test]
    fn sibling_blocks_may_reuse_names() {
        let file = compile_ok(&program(vec![
            block(vec![var("int", "x", Some(int(1)))]),
            block(vec![var("int", "x", Some(int(2)))]),
        ]));
        assert_eq!(file.top_level.slot_count, 2);
        assert!(file.globals.is_empty());
    }

    #[test]
    fn call_errors_name_the_problem() {
        let f = function("f", &[("int", "a"), ("string", "s")], "int", vec![ret(Some(ident("a")))]);

        let err = compile_err(&program(vec![f.clone(), expr(call("f", vec![int(1)]))]));
        assert_eq!(
            err,
            CompileErrorKind::ArityMismatch { name: "f".into(), expected: 2, found: 1 }
        );

        let err = compile_err(&program(vec![f, expr(call("f", vec![int(1), int(2)]))]));
        assert!(matches!(err, CompileErrorKind::ArgumentType { position: 2, ref name, .. } if name == "f"));

        let err = compile_err(&program(vec![expr(call("missing", vec![]))]));
        assert_eq!(err, CompileErrorKind::UndefinedFunction("missing".into()));
    }

    #[test]
    fn compound_property_assignment_addresses_once() {
        let file = compile_ok(&program(vec![
            class("P", vec![var("int", "x", Some(int(1)))]),
            var("P", "p", Some(new_object("P"))),
            expr(assign_op(AssignOp::Add, property(ident("p"), "x"), int(5))),
        ]));
        assert!(contains(
            &file.top_level.instructions,
            &[
                Instruction::Load { kind: ValueKind::Ref, slot: 0 },
                Instruction::Dup,
                Instruction::GetField { kind: ValueKind::Int, member: 0 },
                Instruction::PushByte { value: 5 },
                Instruction::Arith { kind: ValueKind::Int, op: ArithOp::Add },
                Instruction::SetField { kind: ValueKind::Int, member: 0 },
            ]
        ));
        let class = &file.classes["P"];
        assert_eq!(class.member_names, vec!["x".to_string()]);
        assert!(class.constructor.instructions.ends_with(&[
            Instruction::Load { kind: ValueKind::Ref, slot: 0 },
            Instruction::Ret,
        ]));
    }

    #[test]
    fn implicit_widening_emits_conversion() {
        let file = compile_ok(&program(vec![var("double", "d", Some(int(1)))]));
        assert_eq!(
            file.top_level.instructions[..3],
            [
                Instruction::PushByte { value: 1 },
                Instruction::IntToFloat,
                Instruction::Store { kind: ValueKind::Float, slot: 0 },
            ]
        );

        let err = compile_err(&program(vec![var("int", "i", Some(float(1.5)))]));
        assert!(matches!(err, CompileErrorKind::TypeMismatch { .. }));

        let file = compile_ok(&program(vec![var("int", "i", Some(cast("int", float(1.5))))]));
        assert!(file.top_level.instructions.contains(&Instruction::FloatToInt));
    }

    #[test]
    fn int_to_bool_cast_normalizes() {
        let file = compile_ok(&program(vec![var("bool", "b", Some(cast("bool", int(7))))]));
        assert!(contains(
            &file.top_level.instructions,
            &[
                Instruction::PushByte { value: 0 },
                Instruction::Compare { kind: ValueKind::Int, cmp: Comparison::Ne },
            ]
        ));
        let err = compile_err(&program(vec![var("bool", "b", Some(cast("bool", string("x"))))]));
        assert!(matches!(err, CompileErrorKind::InvalidCast { .. }));
    }

    #[test]
    fn binary_operands_must_match() {
        let err = compile_err(&program(vec![var(
            "double",
            "d",
            Some(binary(BinaryOp::Add, int(1), float(1.0))),
        )]));
        assert_eq!(
            err,
            CompileErrorKind::OperandMismatch { op: "+", left: "int".into(), right: "double".into() }
        );
        let err = compile_err(&program(vec![var(
            "bool",
            "b",
            Some(binary(BinaryOp::Lt, boolean(true), boolean(false))),
        )]));
        assert!(matches!(err, CompileErrorKind::UnsupportedOperator { op: "<", .. }));
    }

    #[test]
    fn large_literals_go_to_the_pool() {
        let file = compile_ok(&program(vec![
            var("int", "a", Some(int(300))),
            var("int", "b", Some(int(100_000))),
        ]));
        let code = &file.top_level.instructions;
        assert_eq!(code[0], Instruction::PushShort { value: 300 });
        assert_eq!(code[2], Instruction::PushConst { idx: 0 });
        assert_eq!(file.pool.integer(0), Ok(100_000));
    }

    #[test]
    fn methods_receive_this_first() {
        let file = compile_ok(&program(vec![class(
            "Counter",
            vec![
                var("int", "count", None),
                function(
                    "bump",
                    &[("int", "by")],
                    "void",
                    vec![expr(assign_op(AssignOp::Add, ident("count"), ident("by")))],
                ),
            ],
        )]));
        let class = &file.classes["Counter"];
        let bump = &class.methods["Counter.bump(int)"];
        assert_eq!(bump.param_count(), 2);
        assert_eq!(
            bump.instructions[..2],
            [
                Instruction::Store { kind: ValueKind::Ref, slot: 0 },
                Instruction::Store { kind: ValueKind::Int, slot: 1 },
            ]
        );
        assert_eq!(bump.instructions.last(), Some(&Instruction::RetVoid));
    }

    #[test]
    fn calls_may_precede_declarations() {
        let file = compile_ok(&program(vec![
            var("int", "r", Some(call("twice", vec![int(4)]))),
            function(
                "twice",
                &[("int", "n")],
                "int",
                vec![ret(Some(binary(BinaryOp::Mul, ident("n"), int(2))))],
            ),
        ]));
        let twice = &file.functions["twice(int)"];
        let idx = twice.pool_index.unwrap();
        assert!(file.top_level.instructions.contains(&Instruction::Call { idx }));
        assert_eq!(file.pool.function(idx), Ok("twice(int)"));
    }

    #[test]
    fn natives_resolve_after_functions() {
        let natives = [
            NativeSignature::new("print", &["string"], "void"),
            NativeSignature::new("print_int", &["int"], "void"),
        ];
        let file = compile(&program(vec![expr(call("print_int", vec![int(3)]))]), &natives).unwrap();
        assert_eq!(
            file.top_level.instructions,
            vec![
                Instruction::PushByte { value: 3 },
                Instruction::CallNative { idx: 1 },
                Instruction::Pop,
                Instruction::Stop,
            ]
        );
    }

    #[test]
    fn nested_classes_are_qualified() {
        let file = compile_ok(&program(vec![class(
            "Outer",
            vec![
                class("Inner", vec![var("int", "v", Some(int(9)))]),
                function("make", &[], "Inner", vec![ret(Some(new_object("Inner")))]),
            ],
        )]));
        assert!(file.classes.contains_key("Outer.Inner"));
        assert!(file.classes["Outer"].methods.contains_key("Outer.make()"));
        let err = compile_err(&program(vec![
            class("Outer", vec![class("Inner", vec![])]),
            var("Inner", "i", None),
        ]));
        assert!(matches!(err, CompileErrorKind::Type(TypeError::Unknown(_))));
    }

    #[test]
    fn misplaced_statements_are_rejected() {
        assert_eq!(compile_err(&program(vec![break_()])), CompileErrorKind::BreakOutsideLoop);
        assert_eq!(
            compile_err(&program(vec![ret(None)])),
            CompileErrorKind::ReturnOutsideFunction
        );
        assert_eq!(
            compile_err(&program(vec![function("f", &[], "int", vec![ret(None)])])),
            CompileErrorKind::MissingReturnValue("int".into())
        );
        assert_eq!(
            compile_err(&program(vec![var("int", "x", Some(int(1))), delete(ident("x"))])),
            CompileErrorKind::InvalidDelete("int".into())
        );
        assert_eq!(
            compile_err(&program(vec![expr(this())])),
            CompileErrorKind::ThisOutsideMethod
        );
        assert_eq!(
            compile_err(&program(vec![var("int", "x", None), var("int", "y", Some(assign(ident("x"), int(1))))])),
            CompileErrorKind::AssignmentAsValue
        );
    }

    #[test]
    fn declarations_without_initializer_reset_their_slot() {
        let file = compile_ok(&program(vec![
            var("string", "s", None),
            var("double", "d", None),
        ]));
        assert_eq!(
            file.top_level.instructions,
            vec![
                Instruction::PushVoid,
                Instruction::Store { kind: ValueKind::Ref, slot: 0 },
                Instruction::PushConst { idx: 0 },
                Instruction::Store { kind: ValueKind::Float, slot: 1 },
                Instruction::Stop,
            ]
        );
    }

    #[test]
    fn implicit_ret_void_only_for_void_bodies() {
        let file = compile_ok(&program(vec![
            function("f", &[("int", "n")], "int", vec![var("int", "x", Some(ident("n")))]),
            function("g", &[("bool", "c")], "void", vec![if_else(vec![(ident("c"), ret(None))], None)]),
        ]));
        let f = &file.functions["f(int)"].instructions;
        assert_eq!(f.last(), Some(&Instruction::Store { kind: ValueKind::Int, slot: 1 }));
        assert!(!f.contains(&Instruction::RetVoid));

        // The early return's skip lands on the trailing ret_void.
        let g = &file.functions["g(bool)"].instructions;
        assert!(g.ends_with(&[Instruction::RetVoid, Instruction::RetVoid]));
        assert!(g.iter().filter_map(Instruction::jump_target).all(|t| (t as usize) < g.len()));
    }

    #[test]
    fn array_elements_compile_to_element_ops() {
        let file = compile_ok(&program(vec![
            var_typed(array_of("int"), "a", Some(new_array("int", int(3)))),
            expr(assign_op(AssignOp::Add, index(ident("a"), int(1)), int(2))),
            var("int", "n", Some(property(ident("a"), "length"))),
        ]));
        let code = &file.top_level.instructions;
        assert_eq!(
            code[..3],
            [
                Instruction::PushByte { value: 3 },
                Instruction::NewArray { kind: ValueKind::Int },
                Instruction::Store { kind: ValueKind::Ref, slot: 0 },
            ]
        );
        assert!(contains(
            code,
            &[
                Instruction::Load { kind: ValueKind::Ref, slot: 0 },
                Instruction::PushByte { value: 1 },
                Instruction::Dup2,
                Instruction::GetElement { kind: ValueKind::Int },
                Instruction::PushByte { value: 2 },
                Instruction::Arith { kind: ValueKind::Int, op: ArithOp::Add },
                Instruction::SetElement { kind: ValueKind::Int },
            ]
        ));
        assert!(contains(
            code,
            &[
                Instruction::Load { kind: ValueKind::Ref, slot: 0 },
                Instruction::ArrayLength,
                Instruction::Store { kind: ValueKind::Int, slot: 1 },
            ]
        ));
    }

    #[test]
    fn element_access_checks_types() {
        let err = compile_err(&program(vec![
            var("int", "x", Some(int(1))),
            var("int", "y", Some(index(ident("x"), int(0)))),
        ]));
        assert_eq!(err, CompileErrorKind::NotAnArray("int".into()));

        let err = compile_err(&program(vec![
            var_typed(array_of("int"), "a", Some(new_array("int", int(2)))),
            var("int", "y", Some(index(ident("a"), float(0.5)))),
        ]));
        assert!(matches!(err, CompileErrorKind::TypeMismatch { .. }));

        let err = compile_err(&program(vec![expr(new_array("void", int(1)))]));
        assert_eq!(err, CompileErrorKind::VoidElement);

        let err = compile_err(&program(vec![
            var_typed(array_of("int"), "a", Some(new_array("int", int(2)))),
            expr(assign(property(ident("a"), "length"), int(5))),
        ]));
        assert_eq!(err, CompileErrorKind::InvalidAssignTarget);
    }

    #[test]
    fn errors_carry_spans() {
        let mut item = var("int", "x", Some(ident("nope")));
        if let StmtKind::VarDecl(decl) = &mut item.kind {
            if let Some(init) = &mut decl.init {
                init.span = Span::new(syntax::Pos::new(8, 1, 9), syntax::Pos::new(12, 1, 13));
            }
        }
        let err = compile(&program(vec![item]), &[]).unwrap_err();
        assert_eq!(err.to_string(), "1:9: use of undeclared identifier 'nope'");
    }
}

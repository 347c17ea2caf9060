use bytecode::{Instruction, ValueKind};
use syntax::{CondBranch, Expr, Span, Stmt, StmtKind, VarDecl};

use super::{source_pos, Compiler, FrameKind, LoopContext};
use crate::artifact::GlobalVariable;
use crate::error::{CompileError, CompileErrorKind};
use crate::symbols::ScopeId;
use crate::types::TypeId;

impl Compiler<'_> {
    pub(super) fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let span = stmt.span;
        self.builder().set_position(source_pos(span));
        match &stmt.kind {
            StmtKind::VarDecl(decl) => self.compile_var_decl(decl, span),
            StmtKind::Expr(expr) => self.compile_effect(expr),
            StmtKind::Block(body) => {
                let outer = self.enter_scope();
                let result = body.iter().try_for_each(|stmt| self.compile_stmt(stmt));
                self.leave_scope(outer);
                result
            }
            StmtKind::If { branches, otherwise } => self.compile_if(branches, otherwise.as_deref()),
            StmtKind::While { cond, body } => self.compile_while(cond, body),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let outer = self.enter_scope();
                let result = self.compile_for(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.leave_scope(outer);
                result
            }
            StmtKind::Break => {
                if self.frame.loops.is_empty() {
                    return Err(CompileError::new(CompileErrorKind::BreakOutsideLoop, span));
                }
                let label = self.builder().jump();
                if let Some(innermost) = self.frame.loops.last_mut() {
                    innermost.breaks.push(label);
                }
                Ok(())
            }
            StmtKind::Continue => {
                let target = self
                    .frame
                    .loops
                    .last()
                    .map(|innermost| innermost.continue_target)
                    .ok_or_else(|| CompileError::new(CompileErrorKind::ContinueOutsideLoop, span))?;
                self.builder().jump_back(target);
                Ok(())
            }
            StmtKind::Return(value) => self.compile_return(value.as_ref(), span),
            StmtKind::Delete(target) => {
                let ty = self.compile_expr(target)?;
                if self.types.same(ty, TypeId::VOID) || self.kind_of(ty) != ValueKind::Ref {
                    return Err(CompileError::new(
                        CompileErrorKind::InvalidDelete(self.type_name(ty)),
                        span,
                    ));
                }
                self.emit(Instruction::Delete);
                Ok(())
            }
            StmtKind::Function(_) => Err(CompileError::new(
                CompileErrorKind::MisplacedDeclaration("function"),
                span,
            )),
            StmtKind::Class(_) => Err(CompileError::new(
                CompileErrorKind::MisplacedDeclaration("class"),
                span,
            )),
        }
    }

    fn compile_var_decl(&mut self, decl: &VarDecl, span: Span) -> Result<(), CompileError> {
        let type_scope = self.frame.type_scope;
        let ty = self.resolve_type(&decl.ty, type_scope, span)?;
        if self.types.same(ty, TypeId::VOID) {
            return Err(CompileError::new(
                CompileErrorKind::VoidVariable(decl.name.clone()),
                span,
            ));
        }
        let kind = self.kind_of(ty);

        // The initializer cannot see the variable it initializes. Without
        // one, the slot is reset each time the declaration runs.
        match &decl.init {
            Some(init) => {
                let found = self.compile_expr(init)?;
                self.coerce(found, ty, init.span)?;
            }
            None => match kind {
                ValueKind::Int => {
                    self.emit(Instruction::PushByte { value: 0 });
                }
                ValueKind::Float => {
                    let idx = self.pool.add_float(0.0)?;
                    self.emit(Instruction::PushConst { idx });
                }
                ValueKind::Ref => {
                    self.emit(Instruction::PushVoid);
                }
            },
        }

        let scope = self.frame.scope;
        let slot = self
            .symbols
            .insert_variable(scope, &decl.name, ty)
            .map_err(|err| CompileError::new(err, span))?;
        self.emit(Instruction::Store { kind, slot });
        if self.frame.kind == FrameKind::TopLevel && scope == ScopeId::GLOBAL {
            self.globals.insert(decl.name.clone(), GlobalVariable { slot, ty });
        }
        Ok(())
    }

    fn compile_if(&mut self, branches: &[CondBranch], otherwise: Option<&Stmt>) -> Result<(), CompileError> {
        let mut ends = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            self.compile_condition(&branch.cond)?;
            let skip = self.builder().jump_if_false();
            self.compile_stmt(&branch.body)?;
            if i + 1 < branches.len() || otherwise.is_some() {
                ends.push(self.builder().jump());
            }
            self.builder().bind(skip);
        }
        if let Some(otherwise) = otherwise {
            self.compile_stmt(otherwise)?;
        }
        for end in ends {
            self.builder().bind(end);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CompileError> {
        let top = self.builder().current_index();
        self.compile_condition(cond)?;
        let exit = self.builder().jump_if_false();
        self.compile_loop_body(top, body)?;
        self.builder().bind(exit);
        Ok(())
    }

    /// `for` enters past the step: `init; jmp cond; top: step; cond: ...`.
    fn compile_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.compile_stmt(init)?;
        }
        let entry = self.builder().jump();
        let top = self.builder().current_index();
        if let Some(step) = step {
            self.compile_effect(step)?;
        }
        self.builder().bind(entry);
        let exit = match cond {
            Some(cond) => {
                self.compile_condition(cond)?;
                Some(self.builder().jump_if_false())
            }
            None => None,
        };
        self.compile_loop_body(top, body)?;
        if let Some(exit) = exit {
            self.builder().bind(exit);
        }
        Ok(())
    }

    /// Body plus back-edge to `top`; `break`s land after the back-edge.
    fn compile_loop_body(&mut self, top: usize, body: &Stmt) -> Result<(), CompileError> {
        self.frame.loops.push(LoopContext {
            continue_target: top,
            breaks: Vec::new(),
        });
        let result = self.compile_stmt(body);
        let context = self.frame.loops.pop();
        result?;

        self.builder().jump_back(top);
        for label in context.into_iter().flat_map(|c| c.breaks) {
            self.builder().bind(label);
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> Result<(), CompileError> {
        if matches!(self.frame.kind, FrameKind::TopLevel) {
            return Err(CompileError::new(CompileErrorKind::ReturnOutsideFunction, span));
        }
        let expected = self.frame.return_type;
        let returns_void = self.types.same(expected, TypeId::VOID);
        match value {
            Some(_) if returns_void => Err(CompileError::new(CompileErrorKind::UnexpectedReturnValue, span)),
            Some(value) => {
                let found = self.compile_expr(value)?;
                self.coerce(found, expected, value.span)?;
                self.emit(Instruction::Ret);
                Ok(())
            }
            None if returns_void => {
                self.emit(Instruction::RetVoid);
                Ok(())
            }
            None => Err(CompileError::new(
                CompileErrorKind::MissingReturnValue(self.type_name(expected)),
                span,
            )),
        }
    }
}

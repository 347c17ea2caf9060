//! Shorthand constructors for AST nodes.
//!
//! Every node gets a default span. Used by embedders that build trees
//! programmatically and by the compiler and VM tests.

use crate::ast::*;

pub fn int(value: i64) -> Expr {
    Expr::new(ExprKind::Int(value), Default::default())
}

pub fn float(value: f64) -> Expr {
    Expr::new(ExprKind::Float(value), Default::default())
}

pub fn string(value: &str) -> Expr {
    Expr::new(ExprKind::Str(value.to_string()), Default::default())
}

pub fn boolean(value: bool) -> Expr {
    Expr::new(ExprKind::Bool(value), Default::default())
}

pub fn ident(name: &str) -> Expr {
    Expr::new(ExprKind::Ident(name.to_string()), Default::default())
}

pub fn this() -> Expr {
    Expr::new(ExprKind::This, Default::default())
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        Default::default(),
    )
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        Default::default(),
    )
}

pub fn assign_op(op: AssignOp, target: Expr, value: Expr) -> Expr {
    Expr::new(
        ExprKind::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        },
        Default::default(),
    )
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    assign_op(AssignOp::Assign, target, value)
}

pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Call {
            name: name.to_string(),
            args,
        },
        Default::default(),
    )
}

pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method: method.to_string(),
            args,
        },
        Default::default(),
    )
}

pub fn property(object: Expr, name: &str) -> Expr {
    Expr::new(
        ExprKind::Property {
            object: Box::new(object),
            name: name.to_string(),
        },
        Default::default(),
    )
}

pub fn new_object(class: &str) -> Expr {
    Expr::new(
        ExprKind::New {
            class: class.to_string(),
        },
        Default::default(),
    )
}

pub fn new_array(elem: &str, len: Expr) -> Expr {
    Expr::new(
        ExprKind::NewArray {
            elem: TypeExpr::named(elem),
            len: Box::new(len),
        },
        Default::default(),
    )
}

pub fn index(array: Expr, index: Expr) -> Expr {
    Expr::new(
        ExprKind::Index {
            array: Box::new(array),
            index: Box::new(index),
        },
        Default::default(),
    )
}

pub fn array_of(elem: &str) -> TypeExpr {
    TypeExpr::Array(Box::new(TypeExpr::named(elem)))
}

pub fn cast(ty: &str, expr: Expr) -> Expr {
    Expr::new(
        ExprKind::Cast {
            ty: TypeExpr::named(ty),
            expr: Box::new(expr),
        },
        Default::default(),
    )
}

// ── statements ─────────────────────────────────────────────────────

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Default::default())
}

pub fn var(ty: &str, name: &str, init: Option<Expr>) -> Stmt {
    var_typed(TypeExpr::named(ty), name, init)
}

pub fn var_typed(ty: TypeExpr, name: &str, init: Option<Expr>) -> Stmt {
    stmt(StmtKind::VarDecl(VarDecl {
        name: name.to_string(),
        ty,
        init,
    }))
}

pub fn expr(expr: Expr) -> Stmt {
    stmt(StmtKind::Expr(expr))
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Block(body))
}

pub fn if_else(branches: Vec<(Expr, Stmt)>, otherwise: Option<Stmt>) -> Stmt {
    stmt(StmtKind::If {
        branches: branches
            .into_iter()
            .map(|(cond, body)| CondBranch { cond, body })
            .collect(),
        otherwise: otherwise.map(Box::new),
    })
}

pub fn while_loop(cond: Expr, body: Stmt) -> Stmt {
    stmt(StmtKind::While {
        cond,
        body: Box::new(body),
    })
}

pub fn for_loop(init: Option<Stmt>, cond: Option<Expr>, step: Option<Expr>, body: Stmt) -> Stmt {
    stmt(StmtKind::For {
        init: init.map(Box::new),
        cond,
        step,
        body: Box::new(body),
    })
}

pub fn break_() -> Stmt {
    stmt(StmtKind::Break)
}

pub fn continue_() -> Stmt {
    stmt(StmtKind::Continue)
}

pub fn ret(value: Option<Expr>) -> Stmt {
    stmt(StmtKind::Return(value))
}

pub fn delete(target: Expr) -> Stmt {
    stmt(StmtKind::Delete(target))
}

pub fn function(name: &str, params: &[(&str, &str)], ret: &str, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Function(FunctionDecl {
        name: name.to_string(),
        params: params
            .iter()
            .map(|(ty, name)| Param {
                name: name.to_string(),
                ty: TypeExpr::named(*ty),
            })
            .collect(),
        ret: TypeExpr::named(ret),
        body,
    }))
}

pub fn class(name: &str, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Class(ClassDecl {
        name: name.to_string(),
        body,
    }))
}

pub fn program(items: Vec<Stmt>) -> Program {
    Program { items }
}

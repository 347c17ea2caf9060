use std::fmt;

use bytecode::{EncodeError, PoolError};
use syntax::Span;
use thiserror::Error;

use crate::symbols::SymbolError;
use crate::types::TypeError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("use of undeclared identifier '{0}'")]
    Undeclared(String),
    #[error("call to undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("'{name}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("argument {position} of call to '{name}': expected {expected}, found {found}")]
    ArgumentType {
        name: String,
        /// 1-based.
        position: usize,
        expected: String,
        found: String,
    },
    #[error("no overload of '{name}' accepts ({found})")]
    NoMatchingOverload { name: String, found: String },

    #[error("operands of '{op}' must have the same type, found {left} and {right}")]
    OperandMismatch {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("operator '{op}' is not defined for {ty}")]
    UnsupportedOperator { op: &'static str, ty: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: String, to: String },
    #[error("condition must be bool, found {0}")]
    ConditionNotBool(String),
    #[error("variable '{0}' cannot have type void")]
    VoidVariable(String),
    #[error("array elements cannot have type void")]
    VoidElement,

    #[error("type {ty} has no member '{name}'")]
    UnknownMember { ty: String, name: String },
    #[error("type {ty} has no method '{name}'")]
    UnknownMethod { ty: String, name: String },
    #[error("'{0}' is not a class")]
    NotAClass(String),
    #[error("{0} is not an array")]
    NotAnArray(String),

    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,
    #[error("'return' outside of a function")]
    ReturnOutsideFunction,
    #[error("function returning {0} must return a value")]
    MissingReturnValue(String),
    #[error("void function cannot return a value")]
    UnexpectedReturnValue,
    #[error("'this' used outside of a method")]
    ThisOutsideMethod,
    #[error("assignment cannot be used as a value")]
    AssignmentAsValue,
    #[error("invalid assignment target")]
    InvalidAssignTarget,
    #[error("only strings and objects can be deleted, found {0}")]
    InvalidDelete(String),
    #[error("{0} declarations are only allowed at top level or inside a class")]
    MisplacedDeclaration(&'static str),
    #[error("class '{0}' may only contain members, methods and classes")]
    MalformedClass(String),
}

/// The first error of a compilation, with the source span it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Option<Span>,
}

impl CompileError {
    pub fn new(kind: impl Into<CompileErrorKind>, span: Span) -> Self {
        Self {
            kind: kind.into(),
            span: Some(span),
        }
    }
}

macro_rules! spanless_from {
    ($($source:ty),*) => {$(
        impl From<$source> for CompileError {
            fn from(err: $source) -> Self {
                Self {
                    kind: err.into(),
                    span: None,
                }
            }
        }
    )*};
}

spanless_from!(CompileErrorKind, SymbolError, TypeError, PoolError, EncodeError);

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{}:{}: {}", span.start.line, span.start.column, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for CompileError {}

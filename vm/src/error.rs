use bytecode::{DecodeError, PoolError, ValueKind};
use heap::HeapError;
use thiserror::Error;

/// A fault raised by an opcode handler. Fatal to the faulting context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch: expected {expected:?} value, found {found}")]
    TypeMismatch {
        expected: ValueKind,
        found: &'static str,
    },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("operand stack overflow ({0} values)")]
    StackOverflow(usize),
    #[error("call depth exceeds {0} frames")]
    FrameOverflow(usize),
    #[error("call target #{0} is not a compiled callable")]
    UnresolvedCall(u16),
    #[error("native #{0} is not registered")]
    UnresolvedNative(u16),
    #[error("class #{0} is not a compiled class")]
    UnresolvedClass(u16),
    #[error("constant #{0} cannot be pushed")]
    UnpushableConstant(u16),
    #[error("array length {0} is negative")]
    NegativeLength(i64),
    #[error("array index {0} is negative")]
    NegativeIndex(i64),
    #[error("slot {slot} out of range ({count} slots)")]
    BadSlot { slot: u16, count: usize },
    #[error("native '{name}' failed: {message}")]
    NativeFailure { name: String, message: String },
    #[error("frame return address is corrupt")]
    CorruptFrame,
    #[error("execution ran past the end of '{0}'")]
    MissingReturn(String),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Misuse of the [`Vm`](crate::Vm) API itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("no execution context with id {0}")]
    UnknownContext(u32),
    #[error("no compiled function named '{0}'")]
    UnknownFunction(String),
    #[error("'{0}' is overloaded; use the mangled name")]
    AmbiguousFunction(String),
    #[error("'{name}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

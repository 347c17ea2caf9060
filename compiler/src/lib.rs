//! Type checking and bytecode generation.

pub mod artifact;
pub mod compile;
pub mod error;
pub mod natives;
pub mod symbols;
pub mod types;

pub use artifact::{ClassInstance, CompiledCallable, CompiledFile, GlobalVariable};
pub use compile::{compile, Compiler, CompilerSettings};
pub use error::{CompileError, CompileErrorKind};
pub use natives::NativeSignature;
pub use symbols::{ScopeId, Symbol, SymbolError, SymbolKind, SymbolTable};
pub use types::{Conversion, TypeEntry, TypeError, TypeId, TypeKind, TypeScopeId, TypeTable};

pub mod ast;
pub mod build;
pub mod span;

pub use ast::*;
pub use span::{Pos, Span};

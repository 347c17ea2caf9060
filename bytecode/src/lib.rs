mod op;
mod instruction;
mod builder;
mod encoder;
mod decoder;
pub mod constant_pool;
pub mod source_map;

pub use op::Op;
pub use instruction::{ArithOp, Comparison, Instruction, ValueKind};
pub use builder::{BytecodeBuilder, Label};
pub use encoder::{encode, EncodeError, EncodedBody};
pub use decoder::{decode_at, disassemble, BytecodeDecoder, DecodeError};
pub use constant_pool::{Constant, ConstantKind, ConstantPool, ConstantPoolBuilder, PoolError};
pub use source_map::{SourceMap, SourcePos};

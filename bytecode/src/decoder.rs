use std::fmt::Write as _;

use thiserror::Error;

use crate::instruction::{ArithOp, Comparison, Instruction, ValueKind};
use crate::op::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at byte {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("instruction at byte {offset} is truncated")]
    Truncated { offset: usize },
    #[error("wide prefix at byte {offset} precedes {op:?}, which has no index operand")]
    MisplacedWide { offset: usize, op: Op },
}

/// Decodes an encoded buffer into [`Instruction`]s.
///
/// Jump targets in the decoded instructions are byte offsets.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start decoding at an arbitrary byte offset.
    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Option<Result<Instruction, DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        Some(self.decode())
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let start = self.pos;
        let op = self.read_op()?;
        if op != Op::Wide {
            return self.decode_op(op, false);
        }
        let op = self.read_op()?;
        if !op.has_scalable_operands() {
            return Err(DecodeError::MisplacedWide { offset: start, op });
        }
        self.decode_op(op, true)
    }

    fn decode_op(&mut self, op: Op, wide: bool) -> Result<Instruction, DecodeError> {
        use ValueKind::*;

        let instruction = match op {
            Op::Wide => {
                return Err(DecodeError::MisplacedWide {
                    offset: self.pos - 1,
                    op,
                });
            }
            Op::NoOp => Instruction::NoOp,
            Op::Stop => Instruction::Stop,
            Op::PushByte => Instruction::PushByte {
                value: self.read_u8()? as i8,
            },
            Op::PushShort => Instruction::PushShort {
                value: self.read_u16()? as i16,
            },
            Op::PushConst => Instruction::PushConst {
                idx: self.read_index(wide)?,
            },
            Op::PushVoid => Instruction::PushVoid,
            Op::Pop => Instruction::Pop,
            Op::Dup => Instruction::Dup,
            Op::Dup2 => Instruction::Dup2,

            Op::LoadInt | Op::LoadFloat | Op::LoadRef => Instruction::Load {
                kind: kind_of(op, Op::LoadInt),
                slot: self.read_index(wide)?,
            },
            Op::StoreInt | Op::StoreFloat | Op::StoreRef => Instruction::Store {
                kind: kind_of(op, Op::StoreInt),
                slot: self.read_index(wide)?,
            },
            Op::GetFieldInt | Op::GetFieldFloat | Op::GetFieldRef => Instruction::GetField {
                kind: kind_of(op, Op::GetFieldInt),
                member: self.read_index(wide)?,
            },
            Op::SetFieldInt | Op::SetFieldFloat | Op::SetFieldRef => Instruction::SetField {
                kind: kind_of(op, Op::SetFieldInt),
                member: self.read_index(wide)?,
            },

            Op::AddInt => Instruction::Arith { kind: Int, op: ArithOp::Add },
            Op::SubInt => Instruction::Arith { kind: Int, op: ArithOp::Sub },
            Op::MulInt => Instruction::Arith { kind: Int, op: ArithOp::Mul },
            Op::DivInt => Instruction::Arith { kind: Int, op: ArithOp::Div },
            Op::ModInt => Instruction::Arith { kind: Int, op: ArithOp::Mod },
            Op::NegInt => Instruction::Neg { kind: Int },
            Op::AddFloat => Instruction::Arith { kind: Float, op: ArithOp::Add },
            Op::SubFloat => Instruction::Arith { kind: Float, op: ArithOp::Sub },
            Op::MulFloat => Instruction::Arith { kind: Float, op: ArithOp::Mul },
            Op::DivFloat => Instruction::Arith { kind: Float, op: ArithOp::Div },
            Op::ModFloat => Instruction::Arith { kind: Float, op: ArithOp::Mod },
            Op::NegFloat => Instruction::Neg { kind: Float },
            Op::Concat => Instruction::Concat,

            Op::EqInt => Instruction::Compare { kind: Int, cmp: Comparison::Eq },
            Op::NeInt => Instruction::Compare { kind: Int, cmp: Comparison::Ne },
            Op::LtInt => Instruction::Compare { kind: Int, cmp: Comparison::Lt },
            Op::LeInt => Instruction::Compare { kind: Int, cmp: Comparison::Le },
            Op::GtInt => Instruction::Compare { kind: Int, cmp: Comparison::Gt },
            Op::GeInt => Instruction::Compare { kind: Int, cmp: Comparison::Ge },
            Op::EqFloat => Instruction::Compare { kind: Float, cmp: Comparison::Eq },
            Op::NeFloat => Instruction::Compare { kind: Float, cmp: Comparison::Ne },
            Op::LtFloat => Instruction::Compare { kind: Float, cmp: Comparison::Lt },
            Op::LeFloat => Instruction::Compare { kind: Float, cmp: Comparison::Le },
            Op::GtFloat => Instruction::Compare { kind: Float, cmp: Comparison::Gt },
            Op::GeFloat => Instruction::Compare { kind: Float, cmp: Comparison::Ge },
            Op::EqRef => Instruction::Compare { kind: Ref, cmp: Comparison::Eq },
            Op::NeRef => Instruction::Compare { kind: Ref, cmp: Comparison::Ne },
            Op::Not => Instruction::Not,

            Op::IntToFloat => Instruction::IntToFloat,
            Op::FloatToInt => Instruction::FloatToInt,

            Op::Jump => Instruction::Jump {
                target: self.read_index(wide)? as u32,
            },
            Op::JumpIfTrue => Instruction::JumpIfTrue {
                target: self.read_index(wide)? as u32,
            },
            Op::JumpIfFalse => Instruction::JumpIfFalse {
                target: self.read_index(wide)? as u32,
            },

            Op::Call => Instruction::Call {
                idx: self.read_index(wide)?,
            },
            Op::CallNative => Instruction::CallNative {
                idx: self.read_index(wide)?,
            },
            Op::Ret => Instruction::Ret,
            Op::RetVoid => Instruction::RetVoid,
            Op::NewArrayInt | Op::NewArrayFloat | Op::NewArrayRef => Instruction::NewArray {
                kind: kind_of(op, Op::NewArrayInt),
            },
            Op::GetElementInt | Op::GetElementFloat | Op::GetElementRef => Instruction::GetElement {
                kind: kind_of(op, Op::GetElementInt),
            },
            Op::SetElementInt | Op::SetElementFloat | Op::SetElementRef => Instruction::SetElement {
                kind: kind_of(op, Op::SetElementInt),
            },
            Op::ArrayLength => Instruction::ArrayLength,
            Op::NewObject => Instruction::NewObject {
                idx: self.read_index(wide)?,
            },
            Op::Delete => Instruction::Delete,
        };
        Ok(instruction)
    }

    fn read_op(&mut self) -> Result<Op, DecodeError> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        Op::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { offset, byte })
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    #[inline(always)]
    fn read_index(&mut self, wide: bool) -> Result<u16, DecodeError> {
        if wide {
            self.read_u16()
        } else {
            Ok(self.read_u8()? as u16)
        }
    }
}

/// Typed opcodes are laid out as consecutive Int, Float, Ref variants.
fn kind_of(op: Op, first: Op) -> ValueKind {
    match op as u8 - first as u8 {
        0 => ValueKind::Int,
        1 => ValueKind::Float,
        _ => ValueKind::Ref,
    }
}

impl<'a> Iterator for BytecodeDecoder<'a> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decode the instruction at `pc`, returning it with the offset of the
/// instruction after it.
#[inline]
pub fn decode_at(bytes: &[u8], pc: usize) -> Result<(Instruction, usize), DecodeError> {
    let mut decoder = BytecodeDecoder::at(bytes, pc);
    let instruction = decoder.decode()?;
    Ok((instruction, decoder.offset()))
}

/// Render an encoded buffer one instruction per line, prefixed with its
/// byte offset.
pub fn disassemble(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::new();
    let mut decoder = BytecodeDecoder::new(bytes);
    while !decoder.is_at_end() {
        let offset = decoder.offset();
        let instruction = decoder.decode()?;
        let _ = writeln!(out, "{offset:04}  {instruction}");
    }
    Ok(out)
}

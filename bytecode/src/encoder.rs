use thiserror::Error;

use crate::instruction::Instruction;
use crate::op::Op;
use crate::source_map::{SourceMap, SourceMapBuilder, SourcePos};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("instruction {index} has no opcode: {instruction:?}")]
    Invalid {
        index: usize,
        instruction: Instruction,
    },
    #[error("jump at instruction {index} targets {target}, past the end ({len})")]
    TargetOutOfRange { index: usize, target: u32, len: usize },
    #[error("jump at instruction {index} lands at byte {offset}, beyond the 16-bit range")]
    OffsetOverflow { index: usize, offset: usize },
}

/// The flat byte form of one callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    /// Byte offset of every instruction index, plus one trailing entry for
    /// the end of the buffer.
    pub offsets: Vec<u32>,
    pub source_map: SourceMap,
}

impl EncodedBody {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode an instruction array whose jump targets are instruction indices.
///
/// Jumps start with a one-byte target. Whenever a target offset no longer
/// fits, that jump gets the `Wide` prefix and the layout is recomputed.
/// Widening only ever grows the buffer, so this terminates.
pub fn encode(code: &[Instruction], positions: &[SourcePos]) -> Result<EncodedBody, EncodeError> {
    let mut ops = Vec::with_capacity(code.len());
    let mut wide = Vec::with_capacity(code.len());

    for (index, instruction) in code.iter().enumerate() {
        let op = instruction.op().ok_or(EncodeError::Invalid {
            index,
            instruction: *instruction,
        })?;
        if let Some(target) = instruction.jump_target() {
            if target as usize > code.len() {
                return Err(EncodeError::TargetOutOfRange {
                    index,
                    target,
                    len: code.len(),
                });
            }
            wide.push(false);
        } else {
            let operand = instruction.scalable_operand().unwrap_or(0);
            wide.push(operand > u8::MAX as u32);
        }
        ops.push(op);
    }

    let offsets = loop {
        let offsets = layout(&ops, &wide);
        let mut changed = false;
        for (index, instruction) in code.iter().enumerate() {
            let Some(target) = instruction.jump_target() else {
                continue;
            };
            let offset = offsets[target as usize] as usize;
            if offset > u16::MAX as usize {
                return Err(EncodeError::OffsetOverflow { index, offset });
            }
            if offset > u8::MAX as usize && !wide[index] {
                wide[index] = true;
                changed = true;
            }
        }
        if !changed {
            break offsets;
        }
    };

    let total = offsets.last().copied().unwrap_or(0) as usize;
    let mut bytes = Vec::with_capacity(total);
    let mut source_map = SourceMapBuilder::new();

    for (index, instruction) in code.iter().enumerate() {
        source_map.add(
            offsets[index],
            positions.get(index).copied().unwrap_or_default(),
        );
        if wide[index] {
            bytes.push(Op::Wide as u8);
        }
        bytes.push(ops[index] as u8);

        match *instruction {
            Instruction::PushByte { value } => bytes.push(value as u8),
            Instruction::PushShort { value } => bytes.extend_from_slice(&value.to_le_bytes()),
            _ => {
                let operand = match instruction.jump_target() {
                    Some(target) => Some(offsets[target as usize]),
                    None => instruction.scalable_operand(),
                };
                if let Some(operand) = operand {
                    if wide[index] {
                        bytes.extend_from_slice(&(operand as u16).to_le_bytes());
                    } else {
                        bytes.push(operand as u8);
                    }
                }
            }
        }
    }

    debug_assert_eq!(bytes.len(), total);
    Ok(EncodedBody {
        bytes,
        offsets,
        source_map: source_map.finish(),
    })
}

/// Byte offset of each instruction given the current prefix choices.
fn layout(ops: &[Op], wide: &[bool]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(ops.len() + 1);
    let mut offset = 0u32;
    for (op, &wide) in ops.iter().zip(wide) {
        offsets.push(offset);
        offset += wide as u32 + 1 + op.operand_bytes(wide) as u32;
    }
    offsets.push(offset);
    offsets
}

use core::fmt;

use crate::op::Op;

/// Runtime representation class of a value, selecting the typed
/// load/store/member opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Integers and booleans.
    Int,
    Float,
    /// Strings, objects and arrays.
    Ref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One instruction with its operands at their widest types.
///
/// The compiler emits these into an instruction array and back-patches
/// jumps there; in that form a jump `target` is an instruction index.
/// Once encoded and decoded again, `target` is a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    NoOp,
    Stop,
    PushByte { value: i8 },
    PushShort { value: i16 },
    PushConst { idx: u16 },
    PushVoid,
    Pop,
    Dup,
    Dup2,
    Load { kind: ValueKind, slot: u16 },
    Store { kind: ValueKind, slot: u16 },
    GetField { kind: ValueKind, member: u16 },
    SetField { kind: ValueKind, member: u16 },
    /// `kind` is [`ValueKind::Int`] or [`ValueKind::Float`].
    Arith { kind: ValueKind, op: ArithOp },
    Neg { kind: ValueKind },
    Concat,
    /// References only support `Eq` and `Ne`.
    Compare { kind: ValueKind, cmp: Comparison },
    Not,
    IntToFloat,
    FloatToInt,
    Jump { target: u32 },
    JumpIfTrue { target: u32 },
    JumpIfFalse { target: u32 },
    Call { idx: u16 },
    CallNative { idx: u16 },
    Ret,
    RetVoid,
    /// Elements start as zero, `0.0` or void depending on `kind`.
    NewArray { kind: ValueKind },
    GetElement { kind: ValueKind },
    SetElement { kind: ValueKind },
    ArrayLength,
    NewObject { idx: u16 },
    Delete,
}

impl Instruction {
    /// The opcode this instruction encodes to, or `None` for an invalid
    /// kind/operation pairing such as a float `%` on references.
    pub fn op(&self) -> Option<Op> {
        use Instruction as I;
        use ValueKind::*;

        let op = match *self {
            I::NoOp => Op::NoOp,
            I::Stop => Op::Stop,
            I::PushByte { .. } => Op::PushByte,
            I::PushShort { .. } => Op::PushShort,
            I::PushConst { .. } => Op::PushConst,
            I::PushVoid => Op::PushVoid,
            I::Pop => Op::Pop,
            I::Dup => Op::Dup,
            I::Dup2 => Op::Dup2,
            I::Load { kind, .. } => match kind {
                Int => Op::LoadInt,
                Float => Op::LoadFloat,
                Ref => Op::LoadRef,
            },
            I::Store { kind, .. } => match kind {
                Int => Op::StoreInt,
                Float => Op::StoreFloat,
                Ref => Op::StoreRef,
            },
            I::GetField { kind, .. } => match kind {
                Int => Op::GetFieldInt,
                Float => Op::GetFieldFloat,
                Ref => Op::GetFieldRef,
            },
            I::SetField { kind, .. } => match kind {
                Int => Op::SetFieldInt,
                Float => Op::SetFieldFloat,
                Ref => Op::SetFieldRef,
            },
            I::Arith { kind, op } => match (kind, op) {
                (Int, ArithOp::Add) => Op::AddInt,
                (Int, ArithOp::Sub) => Op::SubInt,
                (Int, ArithOp::Mul) => Op::MulInt,
                (Int, ArithOp::Div) => Op::DivInt,
                (Int, ArithOp::Mod) => Op::ModInt,
                (Float, ArithOp::Add) => Op::AddFloat,
                (Float, ArithOp::Sub) => Op::SubFloat,
                (Float, ArithOp::Mul) => Op::MulFloat,
                (Float, ArithOp::Div) => Op::DivFloat,
                (Float, ArithOp::Mod) => Op::ModFloat,
                (Ref, _) => return None,
            },
            I::Neg { kind } => match kind {
                Int => Op::NegInt,
                Float => Op::NegFloat,
                Ref => return None,
            },
            I::Concat => Op::Concat,
            I::Compare { kind, cmp } => match (kind, cmp) {
                (Int, Comparison::Eq) => Op::EqInt,
                (Int, Comparison::Ne) => Op::NeInt,
                (Int, Comparison::Lt) => Op::LtInt,
                (Int, Comparison::Le) => Op::LeInt,
                (Int, Comparison::Gt) => Op::GtInt,
                (Int, Comparison::Ge) => Op::GeInt,
                (Float, Comparison::Eq) => Op::EqFloat,
                (Float, Comparison::Ne) => Op::NeFloat,
                (Float, Comparison::Lt) => Op::LtFloat,
                (Float, Comparison::Le) => Op::LeFloat,
                (Float, Comparison::Gt) => Op::GtFloat,
                (Float, Comparison::Ge) => Op::GeFloat,
                (Ref, Comparison::Eq) => Op::EqRef,
                (Ref, Comparison::Ne) => Op::NeRef,
                (Ref, _) => return None,
            },
            I::Not => Op::Not,
            I::IntToFloat => Op::IntToFloat,
            I::FloatToInt => Op::FloatToInt,
            I::Jump { .. } => Op::Jump,
            I::JumpIfTrue { .. } => Op::JumpIfTrue,
            I::JumpIfFalse { .. } => Op::JumpIfFalse,
            I::Call { .. } => Op::Call,
            I::CallNative { .. } => Op::CallNative,
            I::Ret => Op::Ret,
            I::RetVoid => Op::RetVoid,
            I::NewArray { kind } => match kind {
                Int => Op::NewArrayInt,
                Float => Op::NewArrayFloat,
                Ref => Op::NewArrayRef,
            },
            I::GetElement { kind } => match kind {
                Int => Op::GetElementInt,
                Float => Op::GetElementFloat,
                Ref => Op::GetElementRef,
            },
            I::SetElement { kind } => match kind {
                Int => Op::SetElementInt,
                Float => Op::SetElementFloat,
                Ref => Op::SetElementRef,
            },
            I::ArrayLength => Op::ArrayLength,
            I::NewObject { .. } => Op::NewObject,
            I::Delete => Op::Delete,
        };
        Some(op)
    }

    /// The index-like operand affected by the `Wide` prefix, if any.
    pub fn scalable_operand(&self) -> Option<u32> {
        use Instruction as I;
        match *self {
            I::PushConst { idx }
            | I::Call { idx }
            | I::CallNative { idx }
            | I::NewObject { idx } => Some(idx as u32),
            I::Load { slot, .. } | I::Store { slot, .. } => Some(slot as u32),
            I::GetField { member, .. } | I::SetField { member, .. } => Some(member as u32),
            I::Jump { target } | I::JumpIfTrue { target } | I::JumpIfFalse { target } => {
                Some(target)
            }
            _ => None,
        }
    }

    pub fn jump_target(&self) -> Option<u32> {
        match *self {
            Instruction::Jump { target }
            | Instruction::JumpIfTrue { target }
            | Instruction::JumpIfFalse { target } => Some(target),
            _ => None,
        }
    }

    /// Replace the target of a jump; no-op for other instructions.
    pub fn set_jump_target(&mut self, new_target: u32) {
        match self {
            Instruction::Jump { target }
            | Instruction::JumpIfTrue { target }
            | Instruction::JumpIfFalse { target } => *target = new_target,
            _ => {}
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Ret | Instruction::RetVoid)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.op() else {
            return write!(f, "<invalid {self:?}>");
        };
        let name = op.mnemonic();
        match *self {
            Instruction::PushByte { value } => write!(f, "{name} {value}"),
            Instruction::PushShort { value } => write!(f, "{name} {value}"),
            Instruction::PushConst { idx } => write!(f, "{name} #{idx}"),
            Instruction::Load { slot, .. } | Instruction::Store { slot, .. } => {
                write!(f, "{name} ${slot}")
            }
            Instruction::GetField { member, .. } | Instruction::SetField { member, .. } => {
                write!(f, "{name} .{member}")
            }
            Instruction::Jump { target }
            | Instruction::JumpIfTrue { target }
            | Instruction::JumpIfFalse { target } => write!(f, "{name} @{target}"),
            Instruction::Call { idx } | Instruction::NewObject { idx } => {
                write!(f, "{name} #{idx}")
            }
            Instruction::CallNative { idx } => write!(f, "{name} !{idx}"),
            _ => f.write_str(name),
        }
    }
}

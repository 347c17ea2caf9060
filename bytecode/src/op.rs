/// Bytecode opcodes.
///
/// Every instruction is one opcode byte followed by a fixed number of
/// operand bytes. Slot, member, pool, jump and call operands are 8-bit by
/// default; the [`Wide`](Op::Wide) prefix promotes them to 16-bit.
/// Immediate pushes have fixed widths: [`PushByte`](Op::PushByte) carries
/// an `i8`, [`PushShort`](Op::PushShort) an `i16`.
///
/// Jump operands are absolute byte offsets into the callable's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the next instruction uses a 16-bit index operand.
    Wide = 0x00,

    NoOp,
    /// Halt the context normally.
    Stop,

    /// Push a small integer.
    /// Operands: `value:i8`
    PushByte,
    /// Push a 16-bit integer.
    /// Operands: `value:i16`
    PushShort,
    /// Push a constant pool entry (integer, float, or a fresh string).
    /// Operands: `idx:u8` (wide: `u16`)
    PushConst,
    /// Push the void value; the content of a reference never assigned.
    PushVoid,

    Pop,
    Dup,
    /// Duplicate the top two values, keeping their order.
    Dup2,

    /// Load a variable slot onto the operand stack.
    /// Operands: `slot:u8` (wide: `u16`)
    LoadInt,
    LoadFloat,
    LoadRef,
    /// Pop the operand stack into a variable slot.
    /// Operands: `slot:u8` (wide: `u16`)
    StoreInt,
    StoreFloat,
    StoreRef,

    /// Pop an object reference, push one of its members.
    /// Operands: `member:u8` (wide: `u16`)
    GetFieldInt,
    GetFieldFloat,
    GetFieldRef,
    /// Pop a value, then an object reference, and store the value into a
    /// member.
    /// Operands: `member:u8` (wide: `u16`)
    SetFieldInt,
    SetFieldFloat,
    SetFieldRef,

    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    NegInt,
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    ModFloat,
    NegFloat,
    /// Pop two string references and push a freshly allocated concatenation.
    Concat,

    EqInt,
    NeInt,
    LtInt,
    LeInt,
    GtInt,
    GeInt,
    EqFloat,
    NeFloat,
    LtFloat,
    LeFloat,
    GtFloat,
    GeFloat,
    /// Strings compare by content, objects by identity.
    EqRef,
    NeRef,
    /// Logical negation of an integer truth value.
    Not,

    IntToFloat,
    FloatToInt,

    /// Operands: `target:u8` (wide: `u16`)
    Jump,
    /// Pop the condition; jump when non-zero.
    /// Operands: `target:u8` (wide: `u16`)
    JumpIfTrue,
    /// Pop the condition; jump when zero.
    /// Operands: `target:u8` (wide: `u16`)
    JumpIfFalse,

    /// Call the callable registered under a pool index.
    /// Operands: `idx:u8` (wide: `u16`)
    Call,
    /// Call a host function by registry index.
    /// Operands: `idx:u8` (wide: `u16`)
    CallNative,
    Ret,
    RetVoid,

    /// Pop a length and push a fresh array of that many default elements.
    NewArrayInt,
    NewArrayFloat,
    NewArrayRef,
    /// Pop an index, then an array reference, and push the element.
    GetElementInt,
    GetElementFloat,
    GetElementRef,
    /// Pop a value, an index, then an array reference, and store the
    /// element.
    SetElementInt,
    SetElementFloat,
    SetElementRef,
    /// Pop an array reference and push its length.
    ArrayLength,

    /// Allocate an instance of the class at a pool index.
    /// Operands: `idx:u8` (wide: `u16`)
    NewObject,
    /// Pop a reference and free its heap entry.
    Delete,
}

impl Op {
    pub const COUNT: usize = Op::Delete as usize + 1;

    /// Whether this opcode has an operand affected by the `Wide` prefix.
    pub const fn has_scalable_operands(self) -> bool {
        matches!(
            self,
            Op::PushConst
                | Op::LoadInt
                | Op::LoadFloat
                | Op::LoadRef
                | Op::StoreInt
                | Op::StoreFloat
                | Op::StoreRef
                | Op::GetFieldInt
                | Op::GetFieldFloat
                | Op::GetFieldRef
                | Op::SetFieldInt
                | Op::SetFieldFloat
                | Op::SetFieldRef
                | Op::Jump
                | Op::JumpIfTrue
                | Op::JumpIfFalse
                | Op::Call
                | Op::CallNative
                | Op::NewObject
        )
    }

    /// Number of operand bytes following the opcode byte.
    pub const fn operand_bytes(self, wide: bool) -> usize {
        match self {
            Op::PushByte => 1,
            Op::PushShort => 2,
            _ if self.has_scalable_operands() => {
                if wide {
                    2
                } else {
                    1
                }
            }
            _ => 0,
        }
    }

    /// Lower-case mnemonic used by the disassembler.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Wide => "wide",
            Op::NoOp => "no_op",
            Op::Stop => "stop",
            Op::PushByte => "push_byte",
            Op::PushShort => "push_short",
            Op::PushConst => "push_const",
            Op::PushVoid => "push_void",
            Op::Pop => "pop",
            Op::Dup => "dup",
            Op::Dup2 => "dup2",
            Op::LoadInt => "load_int",
            Op::LoadFloat => "load_float",
            Op::LoadRef => "load_ref",
            Op::StoreInt => "store_int",
            Op::StoreFloat => "store_float",
            Op::StoreRef => "store_ref",
            Op::GetFieldInt => "get_field_int",
            Op::GetFieldFloat => "get_field_float",
            Op::GetFieldRef => "get_field_ref",
            Op::SetFieldInt => "set_field_int",
            Op::SetFieldFloat => "set_field_float",
            Op::SetFieldRef => "set_field_ref",
            Op::AddInt => "add_int",
            Op::SubInt => "sub_int",
            Op::MulInt => "mul_int",
            Op::DivInt => "div_int",
            Op::ModInt => "mod_int",
            Op::NegInt => "neg_int",
            Op::AddFloat => "add_float",
            Op::SubFloat => "sub_float",
            Op::MulFloat => "mul_float",
            Op::DivFloat => "div_float",
            Op::ModFloat => "mod_float",
            Op::NegFloat => "neg_float",
            Op::Concat => "concat",
            Op::EqInt => "eq_int",
            Op::NeInt => "ne_int",
            Op::LtInt => "lt_int",
            Op::LeInt => "le_int",
            Op::GtInt => "gt_int",
            Op::GeInt => "ge_int",
            Op::EqFloat => "eq_float",
            Op::NeFloat => "ne_float",
            Op::LtFloat => "lt_float",
            Op::LeFloat => "le_float",
            Op::GtFloat => "gt_float",
            Op::GeFloat => "ge_float",
            Op::EqRef => "eq_ref",
            Op::NeRef => "ne_ref",
            Op::Not => "not",
            Op::IntToFloat => "int_to_float",
            Op::FloatToInt => "float_to_int",
            Op::Jump => "jmp",
            Op::JumpIfTrue => "jmp_if_true",
            Op::JumpIfFalse => "jmp_if_false",
            Op::Call => "call",
            Op::CallNative => "call_native",
            Op::Ret => "ret",
            Op::RetVoid => "ret_void",
            Op::NewArrayInt => "new_array_int",
            Op::NewArrayFloat => "new_array_float",
            Op::NewArrayRef => "new_array_ref",
            Op::GetElementInt => "get_element_int",
            Op::GetElementFloat => "get_element_float",
            Op::GetElementRef => "get_element_ref",
            Op::SetElementInt => "set_element_int",
            Op::SetElementFloat => "set_element_float",
            Op::SetElementRef => "set_element_ref",
            Op::ArrayLength => "array_length",
            Op::NewObject => "new_object",
            Op::Delete => "delete",
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if (byte as usize) < Self::COUNT {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_below_count_is_an_opcode() {
        for byte in 0..Op::COUNT as u8 {
            let op = Op::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(Op::try_from(Op::COUNT as u8), Err(Op::COUNT as u8));
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Op::PushByte.operand_bytes(false), 1);
        assert_eq!(Op::PushShort.operand_bytes(false), 2);
        assert_eq!(Op::LoadInt.operand_bytes(false), 1);
        assert_eq!(Op::LoadInt.operand_bytes(true), 2);
        assert_eq!(Op::AddInt.operand_bytes(true), 0);
        assert_eq!(Op::PushVoid.operand_bytes(false), 0);
        assert_eq!(Op::GetElementRef.operand_bytes(true), 0);
    }
}

use crate::instruction::Instruction;
use crate::source_map::SourcePos;

/// A jump whose target has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`], [`BytecodeBuilder::jump_if_true`],
/// and [`BytecodeBuilder::jump_if_false`]. Resolve it with
/// [`BytecodeBuilder::bind`] once the target index is known.
#[derive(Debug)]
#[must_use = "an unbound label leaves a jump to instruction 0"]
pub struct Label {
    /// Index of the placeholder jump in the instruction array.
    at: usize,
}

/// Builds an instruction array for one callable.
///
/// Jump targets are instruction indices while building; the
/// [encoder](crate::encode) turns them into byte offsets.
pub struct BytecodeBuilder {
    code: Vec<Instruction>,
    positions: Vec<SourcePos>,
    position: SourcePos,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            positions: Vec::new(),
            position: SourcePos::default(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            position: SourcePos::default(),
        }
    }

    /// Index the next emitted instruction will get.
    pub fn current_index(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.code.last()
    }

    /// Instructions and the source position of each.
    pub fn into_parts(self) -> (Vec<Instruction>, Vec<SourcePos>) {
        (self.code, self.positions)
    }

    /// Source position attached to subsequently emitted instructions.
    pub fn set_position(&mut self, position: SourcePos) {
        self.position = position;
    }

    pub fn position(&self) -> SourcePos {
        self.position
    }

    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction);
        self.positions.push(self.position);
        self.code.len() - 1
    }

    /// Remove the most recently emitted instruction.
    pub fn pop_last(&mut self) -> Option<(Instruction, SourcePos)> {
        let instruction = self.code.pop()?;
        let position = self.positions.pop().unwrap_or_default();
        Some((instruction, position))
    }

    /// Re-append an instruction removed with [`pop_last`](Self::pop_last).
    pub fn restore(&mut self, (instruction, position): (Instruction, SourcePos)) {
        self.code.push(instruction);
        self.positions.push(position);
    }

    /// `push_byte` / `push_short` for integers that fit an immediate.
    ///
    /// Returns `false` without emitting when the value needs the constant
    /// pool.
    pub fn push_immediate(&mut self, value: i64) -> bool {
        if let Ok(value) = i8::try_from(value) {
            self.emit(Instruction::PushByte { value });
            true
        } else if let Ok(value) = i16::try_from(value) {
            self.emit(Instruction::PushShort { value });
            true
        } else {
            false
        }
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// `jmp` to a target bound later.
    pub fn jump(&mut self) -> Label {
        let at = self.emit(Instruction::Jump { target: 0 });
        Label { at }
    }

    /// `jmp_if_true` to a target bound later.
    pub fn jump_if_true(&mut self) -> Label {
        let at = self.emit(Instruction::JumpIfTrue { target: 0 });
        Label { at }
    }

    /// `jmp_if_false` to a target bound later.
    pub fn jump_if_false(&mut self) -> Label {
        let at = self.emit(Instruction::JumpIfFalse { target: 0 });
        Label { at }
    }

    /// Patch `label` to land on the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        let here = self.current_index();
        self.bind_to(label, here);
    }

    /// Patch `label` to land on an arbitrary instruction index.
    pub fn bind_to(&mut self, label: Label, target: usize) {
        debug_assert!(target <= self.code.len(), "jump target past end");
        self.code[label.at].set_jump_target(target as u32);
    }

    /// `jmp` to an already-emitted instruction (loop back-edge).
    pub fn jump_back(&mut self, target: usize) {
        debug_assert!(target <= self.code.len(), "jump target past end");
        self.emit(Instruction::Jump {
            target: target as u32,
        });
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

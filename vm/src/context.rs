//! Execution contexts and the interpreter loop.

use std::sync::Arc;

use bytecode::{decode_at, ArithOp, Comparison, Constant, Instruction, SourcePos, ValueKind};
use heap::{Heap, HeapId, Value};

use crate::error::RuntimeError;
use crate::natives::NativeRegistry;
use crate::program::{default_value, Callable, Program};
use crate::VmSettings;

pub type ContextId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Ready,
    Running,
    HaltedNormal,
    HaltedError,
}

impl ContextState {
    pub fn is_halted(self) -> bool {
        matches!(self, ContextState::HaltedNormal | ContextState::HaltedError)
    }
}

/// Where and why a context stopped with an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub error: RuntimeError,
    pub callable: String,
    pub pc: usize,
    pub position: Option<SourcePos>,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {} at pc {}", self.error, self.callable, self.pc)?;
        if let Some(position) = self.position {
            write!(f, " (line {position})")?;
        }
        Ok(())
    }
}

/// One activation: operand stack, variable slots, and where to resume
/// the caller.
#[derive(Debug)]
pub struct Frame {
    callable: Arc<Callable>,
    pc: usize,
    return_address: usize,
    stack: Vec<Value>,
    slots: Vec<Value>,
}

impl Frame {
    fn new(callable: Arc<Callable>, return_address: usize) -> Self {
        let slots = vec![Value::Void; callable.slot_count];
        Self {
            callable,
            pc: 0,
            return_address,
            stack: Vec::new(),
            slots,
        }
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn peek(&self) -> Result<Value, RuntimeError> {
        self.stack.last().copied().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        let value = self.pop()?;
        value.as_integer().ok_or(RuntimeError::TypeMismatch {
            expected: ValueKind::Int,
            found: value.type_name(),
        })
    }

    fn pop_float(&mut self) -> Result<f64, RuntimeError> {
        let value = self.pop()?;
        value.as_float().ok_or(RuntimeError::TypeMismatch {
            expected: ValueKind::Float,
            found: value.type_name(),
        })
    }

    fn pop_object(&mut self) -> Result<HeapId, RuntimeError> {
        match self.pop()? {
            Value::ObjectRef(id) => Ok(id),
            other => Err(RuntimeError::TypeMismatch {
                expected: ValueKind::Ref,
                found: other.type_name(),
            }),
        }
    }

    fn pop_string(&mut self) -> Result<HeapId, RuntimeError> {
        match self.pop()? {
            Value::StringRef(id) => Ok(id),
            other => Err(RuntimeError::TypeMismatch {
                expected: ValueKind::Ref,
                found: other.type_name(),
            }),
        }
    }

    fn pop_index(&mut self) -> Result<usize, RuntimeError> {
        let index = self.pop_int()?;
        usize::try_from(index).map_err(|_| RuntimeError::NegativeIndex(index))
    }

    fn slot_index(&self, slot: u16) -> Result<usize, RuntimeError> {
        let index = slot as usize;
        if index < self.slots.len() {
            Ok(index)
        } else {
            Err(RuntimeError::BadSlot {
                slot,
                count: self.slots.len(),
            })
        }
    }
}

fn check_kind(kind: ValueKind, value: Value) -> Result<Value, RuntimeError> {
    let fits = match kind {
        ValueKind::Int => matches!(value, Value::Integer(_)),
        ValueKind::Float => matches!(value, Value::Float(_)),
        ValueKind::Ref => value.is_reference_like(),
    };
    if fits {
        Ok(value)
    } else {
        Err(RuntimeError::TypeMismatch {
            expected: kind,
            found: value.type_name(),
        })
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<i64, RuntimeError> {
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div if b == 0 => return Err(RuntimeError::DivisionByZero),
        ArithOp::Div => a.wrapping_div(b),
        ArithOp::Mod if b == 0 => return Err(RuntimeError::DivisionByZero),
        ArithOp::Mod => a.wrapping_rem(b),
    })
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => a % b,
    }
}

fn compare<T: PartialOrd>(cmp: Comparison, a: T, b: T) -> bool {
    match cmp {
        Comparison::Eq => a == b,
        Comparison::Ne => a != b,
        Comparison::Lt => a < b,
        Comparison::Le => a <= b,
        Comparison::Gt => a > b,
        Comparison::Ge => a >= b,
    }
}

enum Flow {
    Continue,
    Halt,
}

/// A single-shot thread of execution over a shared [`Program`].
///
/// Owns its frames; shares the program, heap and natives. A context can be
/// moved to another thread and run there.
pub struct ExecutionContext {
    id: ContextId,
    state: ContextState,
    frames: Vec<Frame>,
    program: Arc<Program>,
    heap: Heap,
    natives: Arc<NativeRegistry>,
    settings: VmSettings,
    result: Option<Value>,
    exception: Option<Fault>,
    /// Start of the instruction being executed.
    current_pc: usize,
}

impl ExecutionContext {
    pub(crate) fn new(
        id: ContextId,
        entry: Frame,
        program: Arc<Program>,
        heap: Heap,
        natives: Arc<NativeRegistry>,
        settings: VmSettings,
    ) -> Self {
        Self {
            id,
            state: ContextState::Ready,
            frames: vec![entry],
            program,
            heap,
            natives,
            settings,
            result: None,
            exception: None,
            current_pc: 0,
        }
    }

    /// Entry frame for the top-level code.
    pub(crate) fn top_level_frame(program: &Program) -> Frame {
        Frame::new(program.top_level.clone(), 0)
    }

    /// Entry frame for calling `callable`, laid out as a `call` would.
    pub(crate) fn call_frame(callable: Arc<Callable>, args: &[Value]) -> Frame {
        let mut frame = Frame::new(callable, 0);
        frame.stack.push(Value::Integer(0));
        frame.stack.extend(args.iter().rev().copied());
        frame
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Value returned by the entry callable, once halted normally.
    pub fn result(&self) -> Option<Value> {
        self.result
    }

    /// The sticky exception, if the context halted with an error.
    pub fn exception(&self) -> Option<&Fault> {
        self.exception.as_ref()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Value of a top-level variable, when this context ran the top level.
    pub fn global(&self, name: &str) -> Option<Value> {
        let global = self.program.globals.get(name)?;
        let entry = self.frames.first()?;
        if !Arc::ptr_eq(&entry.callable, &self.program.top_level) {
            return None;
        }
        entry.slots.get(global.slot as usize).copied()
    }

    /// Run until halted. A halted context is left untouched.
    pub fn execute(&mut self) -> ContextState {
        if self.state != ContextState::Ready {
            return self.state;
        }
        self.state = ContextState::Running;
        log::debug!("context {}: running", self.id);

        while self.exception.is_none() {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => {
                    self.state = ContextState::HaltedNormal;
                    log::debug!("context {}: halted with {:?}", self.id, self.result);
                    return self.state;
                }
                Err(error) => self.raise(error),
            }
        }
        self.state = ContextState::HaltedError;
        self.state
    }

    fn raise(&mut self, error: RuntimeError) {
        let fault = match self.frames.last() {
            Some(frame) => Fault {
                error,
                callable: frame.callable.name.clone(),
                pc: self.current_pc,
                position: frame.callable.position(self.current_pc),
            },
            None => Fault {
                error,
                callable: String::new(),
                pc: self.current_pc,
                position: None,
            },
        };
        log::warn!("context {}: {fault}", self.id);
        self.exception = Some(fault);
    }

    fn frame(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        let limit = self.settings.max_operand_stack;
        let frame = self.frame()?;
        if frame.stack.len() >= limit {
            return Err(RuntimeError::StackOverflow(limit));
        }
        frame.stack.push(value);
        Ok(())
    }

    fn step(&mut self) -> Result<Flow, RuntimeError> {
        let outermost = self.frames.len() == 1;
        let frame = self.frame()?;
        if frame.pc >= frame.callable.code.len() {
            if outermost {
                return Ok(Flow::Halt);
            }
            return Err(RuntimeError::MissingReturn(frame.callable.name.clone()));
        }
        let pc = frame.pc;
        let (instruction, next) = decode_at(&frame.callable.code, pc)?;
        frame.pc = next;
        self.current_pc = pc;
        log::trace!("context {}: {pc:04} {instruction}", self.id);

        match instruction {
            Instruction::NoOp => {}
            Instruction::Stop => return Ok(Flow::Halt),
            Instruction::PushByte { value } => self.push(Value::Integer(value as i64))?,
            Instruction::PushShort { value } => self.push(Value::Integer(value as i64))?,
            Instruction::PushConst { idx } => {
                let value = match self.program.pool.get(idx)? {
                    Constant::Integer(v) => Value::Integer(*v),
                    Constant::Float(v) => Value::Float(*v),
                    Constant::String(s) => Value::StringRef(self.heap.create_string(s.as_str())?),
                    _ => return Err(RuntimeError::UnpushableConstant(idx)),
                };
                self.push(value)?;
            }
            Instruction::PushVoid => self.push(Value::Void)?,
            Instruction::Pop => {
                self.frame()?.pop()?;
            }
            Instruction::Dup => {
                let value = self.frame()?.peek()?;
                self.push(value)?;
            }
            Instruction::Dup2 => {
                let (below, top) = match self.frame()?.stack.as_slice() {
                    [.., below, top] => (*below, *top),
                    _ => return Err(RuntimeError::StackUnderflow),
                };
                self.push(below)?;
                self.push(top)?;
            }
            Instruction::Load { slot, .. } => {
                let frame = self.frame()?;
                let value = frame.slots[frame.slot_index(slot)?];
                self.push(value)?;
            }
            Instruction::Store { kind, slot } => {
                let frame = self.frame()?;
                let index = frame.slot_index(slot)?;
                let value = check_kind(kind, frame.pop()?)?;
                frame.slots[index] = value;
            }
            Instruction::GetField { member, .. } => {
                let object = self.frame()?.pop_object()?;
                let value = self.heap.field(object, member as usize)?;
                self.push(value)?;
            }
            Instruction::SetField { kind, member } => {
                let frame = self.frame()?;
                let value = check_kind(kind, frame.pop()?)?;
                let object = frame.pop_object()?;
                self.heap.set_field(object, member as usize, value)?;
            }
            Instruction::Arith { kind, op } => {
                let frame = self.frame()?;
                let result = match kind {
                    ValueKind::Float => {
                        let b = frame.pop_float()?;
                        let a = frame.pop_float()?;
                        Value::Float(float_arith(op, a, b))
                    }
                    _ => {
                        let b = frame.pop_int()?;
                        let a = frame.pop_int()?;
                        Value::Integer(int_arith(op, a, b)?)
                    }
                };
                self.push(result)?;
            }
            Instruction::Neg { kind } => {
                let frame = self.frame()?;
                let result = match kind {
                    ValueKind::Float => Value::Float(-frame.pop_float()?),
                    _ => Value::Integer(frame.pop_int()?.wrapping_neg()),
                };
                self.push(result)?;
            }
            Instruction::Concat => {
                let frame = self.frame()?;
                let right = frame.pop_string()?;
                let left = frame.pop_string()?;
                let joined = self.heap.concat(left, right)?;
                self.push(Value::StringRef(joined))?;
            }
            Instruction::Compare { kind, cmp } => {
                let frame = self.frame()?;
                let result = match kind {
                    ValueKind::Int => {
                        let b = frame.pop_int()?;
                        let a = frame.pop_int()?;
                        compare(cmp, a, b)
                    }
                    ValueKind::Float => {
                        let b = frame.pop_float()?;
                        let a = frame.pop_float()?;
                        compare(cmp, a, b)
                    }
                    ValueKind::Ref => {
                        let b = frame.pop()?;
                        let a = frame.pop()?;
                        let equal = match (a, b) {
                            (Value::StringRef(a), Value::StringRef(b)) => self.heap.strings_equal(a, b)?,
                            (a, b) => a == b,
                        };
                        match cmp {
                            Comparison::Ne => !equal,
                            _ => equal,
                        }
                    }
                };
                self.push(Value::from_bool(result))?;
            }
            Instruction::Not => {
                let value = self.frame()?.pop_int()?;
                self.push(Value::from_bool(value == 0))?;
            }
            Instruction::IntToFloat => {
                let value = self.frame()?.pop_int()?;
                self.push(Value::Float(value as f64))?;
            }
            Instruction::FloatToInt => {
                let value = self.frame()?.pop_float()?;
                self.push(Value::Integer(value as i64))?;
            }
            Instruction::Jump { target } => self.frame()?.pc = target as usize,
            Instruction::JumpIfTrue { target } => {
                let frame = self.frame()?;
                if frame.pop_int()? != 0 {
                    frame.pc = target as usize;
                }
            }
            Instruction::JumpIfFalse { target } => {
                let frame = self.frame()?;
                if frame.pop_int()? == 0 {
                    frame.pc = target as usize;
                }
            }
            Instruction::Call { idx } => self.call(idx)?,
            Instruction::CallNative { idx } => self.call_native(idx)?,
            Instruction::Ret => {
                let value = self.frame()?.pop()?;
                return self.return_with(value);
            }
            Instruction::RetVoid => return self.return_with(Value::Void),
            Instruction::NewArray { kind } => {
                let len = self.frame()?.pop_int()?;
                let len = usize::try_from(len).map_err(|_| RuntimeError::NegativeLength(len))?;
                let array = self.heap.create_array(vec![default_value(kind); len])?;
                self.push(Value::ObjectRef(array))?;
            }
            Instruction::GetElement { .. } => {
                let frame = self.frame()?;
                let index = frame.pop_index()?;
                let array = frame.pop_object()?;
                let value = self.heap.element(array, index)?;
                self.push(value)?;
            }
            Instruction::SetElement { kind } => {
                let frame = self.frame()?;
                let value = check_kind(kind, frame.pop()?)?;
                let index = frame.pop_index()?;
                let array = frame.pop_object()?;
                self.heap.set_element(array, index, value)?;
            }
            Instruction::ArrayLength => {
                let array = self.frame()?.pop_object()?;
                let len = self.heap.array_len(array)?;
                self.push(Value::Integer(len as i64))?;
            }
            Instruction::NewObject { idx } => {
                let fields = self
                    .program
                    .class(idx)
                    .ok_or(RuntimeError::UnresolvedClass(idx))?
                    .default_fields();
                let object = self.heap.create_object(idx, fields)?;
                self.push(Value::ObjectRef(object))?;
            }
            Instruction::Delete => {
                let value = self.frame()?.pop()?;
                let id = value.heap_id().ok_or(RuntimeError::TypeMismatch {
                    expected: ValueKind::Ref,
                    found: value.type_name(),
                })?;
                self.heap.delete(id)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn call(&mut self, idx: u16) -> Result<(), RuntimeError> {
        let callee = self
            .program
            .callable(idx)
            .cloned()
            .ok_or(RuntimeError::UnresolvedCall(idx))?;
        if self.frames.len() >= self.settings.max_frames {
            return Err(RuntimeError::FrameOverflow(self.settings.max_frames));
        }
        let caller = self.frame()?;
        let count = callee.param_count;
        if caller.stack.len() < count {
            return Err(RuntimeError::StackUnderflow);
        }
        let args = caller.stack.split_off(caller.stack.len() - count);
        let return_address = caller.pc;

        let mut frame = Frame::new(callee, return_address);
        frame.stack.push(Value::Integer(return_address as i64));
        frame.stack.extend(args.into_iter().rev());
        self.frames.push(frame);
        Ok(())
    }

    fn call_native(&mut self, idx: u16) -> Result<(), RuntimeError> {
        let native = self
            .natives
            .get(idx)
            .cloned()
            .ok_or(RuntimeError::UnresolvedNative(idx))?;
        let frame = self.frame()?;
        let count = native.signature.params.len();
        if frame.stack.len() < count {
            return Err(RuntimeError::StackUnderflow);
        }
        let args = frame.stack.split_off(frame.stack.len() - count);
        let result = (native.function)(&args, &self.heap).map_err(|message| RuntimeError::NativeFailure {
            name: native.signature.name.clone(),
            message,
        })?;
        self.push(result)
    }

    /// Pop the current frame and hand `value` to the caller.
    fn return_with(&mut self, value: Value) -> Result<Flow, RuntimeError> {
        let frame = self.frame()?;
        let address = match frame.pop()? {
            Value::Integer(address) if address as usize == frame.return_address => frame.return_address,
            _ => return Err(RuntimeError::CorruptFrame),
        };
        self.frames.pop();

        match self.frames.last_mut() {
            None => {
                self.result = Some(value);
                Ok(Flow::Halt)
            }
            Some(caller) => {
                caller.pc = address;
                self.push(value)?;
                Ok(Flow::Continue)
            }
        }
    }
}

//! Immutable output of a compilation.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use bytecode::{disassemble, ConstantPool, EncodedBody, Instruction, ValueKind};

use crate::types::{TypeId, TypeTable};

/// One function, method, constructor, or the top-level code.
#[derive(Debug, Clone)]
pub struct CompiledCallable {
    /// Mangled name, e.g. `add(int,int)` or `Point.move(int)`.
    pub name: String,
    pub return_type: TypeId,
    /// Includes the receiver for methods and constructors.
    pub param_types: Vec<TypeId>,
    /// `None` only for the top-level code.
    pub pool_index: Option<u16>,
    pub slot_count: usize,
    /// Jump targets are instruction indices.
    pub instructions: Vec<Instruction>,
    pub body: EncodedBody,
}

impl CompiledCallable {
    pub fn param_count(&self) -> usize {
        self.param_types.len()
    }
}

#[derive(Debug, Clone)]
pub struct ClassInstance {
    /// Qualified with enclosing classes, e.g. `Outer.Inner`.
    pub name: String,
    pub ty: TypeId,
    pub pool_index: u16,
    /// Member slot → declared type.
    pub members: BTreeMap<u16, TypeId>,
    /// Member slot → runtime representation.
    pub member_kinds: Vec<ValueKind>,
    pub member_names: Vec<String>,
    /// Runs the field initializers; takes and returns the new object.
    pub constructor: CompiledCallable,
    /// Keyed by mangled method name.
    pub methods: BTreeMap<String, CompiledCallable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalVariable {
    pub slot: u16,
    pub ty: TypeId,
}

#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub pool: ConstantPool,
    pub top_level: CompiledCallable,
    pub functions: BTreeMap<String, CompiledCallable>,
    pub classes: BTreeMap<String, ClassInstance>,
    /// Variables declared at the outermost scope of the top-level code.
    pub globals: BTreeMap<String, GlobalVariable>,
    pub types: TypeTable,
}

impl CompiledFile {
    /// Every callable reachable through a pool index.
    pub fn callables(&self) -> impl Iterator<Item = &CompiledCallable> {
        self.functions.values().chain(
            self.classes
                .values()
                .flat_map(|class| std::iter::once(&class.constructor).chain(class.methods.values())),
        )
    }

    pub fn class_by_pool_index(&self, idx: u16) -> Option<&ClassInstance> {
        self.classes.values().find(|class| class.pool_index == idx)
    }

    /// Human-readable listing of the pool and every callable.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== constants ==");
        for (idx, constant) in self.pool.iter() {
            let _ = writeln!(out, "#{idx:<4} {constant:?}");
        }
        for callable in std::iter::once(&self.top_level).chain(self.callables()) {
            let _ = writeln!(
                out,
                "\n== {} ({} slots) ==",
                callable.name, callable.slot_count
            );
            match disassemble(&callable.body.bytes) {
                Ok(text) => out.push_str(&text),
                Err(err) => {
                    let _ = writeln!(out, "<{err}>");
                }
            }
        }
        out
    }
}

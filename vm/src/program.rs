//! Executable view of a [`CompiledFile`], shared by every context.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytecode::{ConstantPool, SourceMap, SourcePos, ValueKind};
use compiler::{CompiledCallable, CompiledFile, GlobalVariable};
use heap::Value;

use crate::error::VmError;

#[derive(Debug)]
pub struct Callable {
    pub name: String,
    /// Includes the receiver for methods and constructors.
    pub param_count: usize,
    pub slot_count: usize,
    pub code: Vec<u8>,
    pub source_map: SourceMap,
}

impl Callable {
    fn from_compiled(compiled: &CompiledCallable) -> Self {
        Self {
            name: compiled.name.clone(),
            param_count: compiled.param_count(),
            slot_count: compiled.slot_count,
            code: compiled.body.bytes.clone(),
            source_map: compiled.body.source_map.clone(),
        }
    }

    /// Source position of the instruction at `pc`, if recorded.
    pub fn position(&self, pc: usize) -> Option<SourcePos> {
        self.source_map.lookup(pc as u32)
    }
}

/// Content of a member or array element before anything is stored in it.
pub fn default_value(kind: ValueKind) -> Value {
    match kind {
        ValueKind::Int => Value::Integer(0),
        ValueKind::Float => Value::Float(0.0),
        ValueKind::Ref => Value::Void,
    }
}

#[derive(Debug)]
pub struct ClassLayout {
    pub name: String,
    pub member_kinds: Vec<ValueKind>,
}

impl ClassLayout {
    /// Member values of a fresh instance, before its constructor runs.
    pub fn default_fields(&self) -> Vec<Value> {
        self.member_kinds.iter().copied().map(default_value).collect()
    }
}

#[derive(Debug)]
pub struct Program {
    pub pool: ConstantPool,
    pub top_level: Arc<Callable>,
    pub globals: BTreeMap<String, GlobalVariable>,
    callables: HashMap<u16, Arc<Callable>>,
    classes: HashMap<u16, ClassLayout>,
    /// Mangled function name → pool index.
    functions: BTreeMap<String, u16>,
}

impl Program {
    pub fn load(file: &CompiledFile) -> Self {
        let callables: HashMap<u16, Arc<Callable>> = file
            .callables()
            .filter_map(|c| Some((c.pool_index?, Arc::new(Callable::from_compiled(c)))))
            .collect();
        let classes = file
            .classes
            .values()
            .map(|class| {
                (
                    class.pool_index,
                    ClassLayout {
                        name: class.name.clone(),
                        member_kinds: class.member_kinds.clone(),
                    },
                )
            })
            .collect();
        let functions = file
            .functions
            .iter()
            .filter_map(|(name, f)| Some((name.clone(), f.pool_index?)))
            .collect();

        log::debug!(
            "loaded program: {} callables, {} classes",
            callables.len(),
            file.classes.len()
        );
        Self {
            pool: file.pool.clone(),
            top_level: Arc::new(Callable::from_compiled(&file.top_level)),
            globals: file.globals.clone(),
            callables,
            classes,
            functions,
        }
    }

    pub fn callable(&self, idx: u16) -> Option<&Arc<Callable>> {
        self.callables.get(&idx)
    }

    pub fn class(&self, idx: u16) -> Option<&ClassLayout> {
        self.classes.get(&idx)
    }

    /// Resolve a free function by mangled name (`add(int,int)`) or by bare
    /// name when it is not overloaded.
    pub fn function(&self, name: &str) -> Result<&Arc<Callable>, VmError> {
        let idx = match self.functions.get(name) {
            Some(&idx) => idx,
            None => {
                let prefix = format!("{name}(");
                let mut matches = self
                    .functions
                    .iter()
                    .filter(|(mangled, _)| mangled.starts_with(&prefix));
                match (matches.next(), matches.next()) {
                    (Some((_, &idx)), None) => idx,
                    (Some(_), Some(_)) => return Err(VmError::AmbiguousFunction(name.to_string())),
                    (None, _) => return Err(VmError::UnknownFunction(name.to_string())),
                }
            }
        };
        self.callable(idx)
            .ok_or_else(|| VmError::UnknownFunction(name.to_string()))
    }
}

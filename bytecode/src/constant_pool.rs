//! Deduplicating constant pool.
//!
//! The compiler interns literals and callable/class references through
//! [`ConstantPoolBuilder`]; [`ConstantPoolBuilder::finalize`] flattens the
//! value → index maps into the index → value [`ConstantPool`] the VM reads.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    Integer,
    Float,
    String,
    FunctionRef,
    MethodRef,
    ClassRef,
}

/// One pool entry. References carry the mangled name of their target.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i64),
    Float(f64),
    String(String),
    FunctionRef(String),
    MethodRef(String),
    ClassRef(String),
}

impl Constant {
    pub fn kind(&self) -> ConstantKind {
        match self {
            Constant::Integer(_) => ConstantKind::Integer,
            Constant::Float(_) => ConstantKind::Float,
            Constant::String(_) => ConstantKind::String,
            Constant::FunctionRef(_) => ConstantKind::FunctionRef,
            Constant::MethodRef(_) => ConstantKind::MethodRef,
            Constant::ClassRef(_) => ConstantKind::ClassRef,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("constant pool is full ({} entries)", u16::MAX as usize + 1)]
    Full,
    #[error("constant #{0} does not exist")]
    Missing(u16),
    #[error("constant #{idx} is {found:?}, expected {expected:?}")]
    WrongKind {
        idx: u16,
        expected: ConstantKind,
        found: ConstantKind,
    },
}

/// Compile-time view: value → index.
#[derive(Debug, Default)]
pub struct ConstantPoolBuilder {
    next_free_slot: u32,
    integers: HashMap<i64, u16>,
    /// Keyed by bit pattern so `0.0` and `-0.0` stay distinct.
    floats: HashMap<u64, u16>,
    strings: HashMap<String, u16>,
    functions: HashMap<String, u16>,
    methods: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl ConstantPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.next_free_slot as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next_free_slot == 0
    }

    fn next_index(next_free_slot: &mut u32) -> Result<u16, PoolError> {
        let idx = u16::try_from(*next_free_slot).map_err(|_| PoolError::Full)?;
        *next_free_slot += 1;
        Ok(idx)
    }

    pub fn add_integer(&mut self, value: i64) -> Result<u16, PoolError> {
        if let Some(&idx) = self.integers.get(&value) {
            return Ok(idx);
        }
        let idx = Self::next_index(&mut self.next_free_slot)?;
        self.integers.insert(value, idx);
        Ok(idx)
    }

    pub fn add_float(&mut self, value: f64) -> Result<u16, PoolError> {
        let bits = value.to_bits();
        if let Some(&idx) = self.floats.get(&bits) {
            return Ok(idx);
        }
        let idx = Self::next_index(&mut self.next_free_slot)?;
        self.floats.insert(bits, idx);
        Ok(idx)
    }

    pub fn add_string(&mut self, value: &str) -> Result<u16, PoolError> {
        Self::intern(&mut self.strings, &mut self.next_free_slot, value)
    }

    pub fn add_function(&mut self, name: &str) -> Result<u16, PoolError> {
        Self::intern(&mut self.functions, &mut self.next_free_slot, name)
    }

    pub fn add_method(&mut self, name: &str) -> Result<u16, PoolError> {
        Self::intern(&mut self.methods, &mut self.next_free_slot, name)
    }

    pub fn add_class(&mut self, name: &str) -> Result<u16, PoolError> {
        Self::intern(&mut self.classes, &mut self.next_free_slot, name)
    }

    fn intern(
        map: &mut HashMap<String, u16>,
        next_free_slot: &mut u32,
        value: &str,
    ) -> Result<u16, PoolError> {
        if let Some(&idx) = map.get(value) {
            return Ok(idx);
        }
        let idx = Self::next_index(next_free_slot)?;
        map.insert(value.to_string(), idx);
        Ok(idx)
    }

    /// Invert every value → index map into the runtime pool.
    pub fn finalize(self) -> ConstantPool {
        let mut entries: Vec<Option<Constant>> = vec![None; self.len()];
        for (value, idx) in self.integers {
            entries[idx as usize] = Some(Constant::Integer(value));
        }
        for (bits, idx) in self.floats {
            entries[idx as usize] = Some(Constant::Float(f64::from_bits(bits)));
        }
        for (value, idx) in self.strings {
            entries[idx as usize] = Some(Constant::String(value));
        }
        for (name, idx) in self.functions {
            entries[idx as usize] = Some(Constant::FunctionRef(name));
        }
        for (name, idx) in self.methods {
            entries[idx as usize] = Some(Constant::MethodRef(name));
        }
        for (name, idx) in self.classes {
            entries[idx as usize] = Some(Constant::ClassRef(name));
        }
        debug_assert!(entries.iter().all(Option::is_some), "pool index gap");
        ConstantPool {
            entries: entries.into_iter().flatten().collect(),
        }
    }
}

/// Runtime view: index → value, read-only and shared by every context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, constant)| (idx as u16, constant))
    }

    pub fn get(&self, idx: u16) -> Result<&Constant, PoolError> {
        self.entries.get(idx as usize).ok_or(PoolError::Missing(idx))
    }

    pub fn kind_of(&self, idx: u16) -> Result<ConstantKind, PoolError> {
        self.get(idx).map(Constant::kind)
    }

    fn wrong_kind(idx: u16, expected: ConstantKind, found: &Constant) -> PoolError {
        PoolError::WrongKind {
            idx,
            expected,
            found: found.kind(),
        }
    }

    pub fn integer(&self, idx: u16) -> Result<i64, PoolError> {
        match self.get(idx)? {
            Constant::Integer(value) => Ok(*value),
            other => Err(Self::wrong_kind(idx, ConstantKind::Integer, other)),
        }
    }

    pub fn float(&self, idx: u16) -> Result<f64, PoolError> {
        match self.get(idx)? {
            Constant::Float(value) => Ok(*value),
            other => Err(Self::wrong_kind(idx, ConstantKind::Float, other)),
        }
    }

    pub fn string(&self, idx: u16) -> Result<&str, PoolError> {
        match self.get(idx)? {
            Constant::String(value) => Ok(value),
            other => Err(Self::wrong_kind(idx, ConstantKind::String, other)),
        }
    }

    pub fn function(&self, idx: u16) -> Result<&str, PoolError> {
        match self.get(idx)? {
            Constant::FunctionRef(name) => Ok(name),
            other => Err(Self::wrong_kind(idx, ConstantKind::FunctionRef, other)),
        }
    }

    pub fn method(&self, idx: u16) -> Result<&str, PoolError> {
        match self.get(idx)? {
            Constant::MethodRef(name) => Ok(name),
            other => Err(Self::wrong_kind(idx, ConstantKind::MethodRef, other)),
        }
    }

    pub fn class(&self, idx: u16) -> Result<&str, PoolError> {
        match self.get(idx)? {
            Constant::ClassRef(name) => Ok(name),
            other => Err(Self::wrong_kind(idx, ConstantKind::ClassRef, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_an_index() {
        let mut pool = ConstantPoolBuilder::new();
        let a = pool.add_integer(1_000_000).unwrap();
        let b = pool.add_string("hello").unwrap();
        let c = pool.add_integer(1_000_000).unwrap();
        let d = pool.add_string("hello").unwrap();
        assert_eq!(a, c);
        assert_eq!(b, d);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn kinds_do_not_collide() {
        let mut pool = ConstantPoolBuilder::new();
        let s = pool.add_string("Point").unwrap();
        let c = pool.add_class("Point").unwrap();
        let f = pool.add_function("Point").unwrap();
        assert_ne!(s, c);
        assert_ne!(c, f);
    }

    #[test]
    fn indices_are_monotonic() {
        let mut pool = ConstantPoolBuilder::new();
        assert_eq!(pool.add_float(1.5).unwrap(), 0);
        assert_eq!(pool.add_integer(70_000).unwrap(), 1);
        assert_eq!(pool.add_method("Point.len()").unwrap(), 2);
        assert_eq!(pool.add_float(1.5).unwrap(), 0);
        assert_eq!(pool.add_float(-0.0).unwrap(), 3);
    }

    #[test]
    fn finalize_inverts_the_maps() {
        let mut pool = ConstantPoolBuilder::new();
        let i = pool.add_integer(123_456).unwrap();
        let f = pool.add_float(2.5).unwrap();
        let s = pool.add_string("text").unwrap();
        let func = pool.add_function("main()").unwrap();
        let pool = pool.finalize();

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.integer(i), Ok(123_456));
        assert_eq!(pool.float(f), Ok(2.5));
        assert_eq!(pool.string(s), Ok("text"));
        assert_eq!(pool.function(func), Ok("main()"));
        assert_eq!(pool.kind_of(s), Ok(ConstantKind::String));
    }

    #[test]
    fn wrong_kind_and_missing_are_errors() {
        let mut pool = ConstantPoolBuilder::new();
        let i = pool.add_integer(99_999).unwrap();
        let pool = pool.finalize();

        assert_eq!(
            pool.string(i),
            Err(PoolError::WrongKind {
                idx: i,
                expected: ConstantKind::String,
                found: ConstantKind::Integer,
            })
        );
        assert_eq!(pool.integer(7), Err(PoolError::Missing(7)));
    }
}

//! Shared, manually managed heap for reference values.
//!
//! Entries live in an arena addressed by [`HeapId`]. An id pairs the slot
//! index with the slot's generation, so a reference that outlives a
//! `delete` is reported as [`HeapError::Freed`] instead of silently reading
//! whatever reuses the slot. Nothing is reclaimed automatically.
//!
//! [`Heap`] is a cheap clonable handle; every context of a program run
//! holds one and mutation goes through a single `parking_lot` mutex.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;

use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId {
    index: u32,
    generation: u32,
}

impl HeapId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapTag {
    String,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeapPayload {
    String(String),
    Array(Vec<Value>),
    /// `class` is the class's constant pool index.
    Object { class: u16, fields: Vec<Value> },
}

impl HeapPayload {
    pub fn tag(&self) -> HeapTag {
        match self {
            HeapPayload::String(_) => HeapTag::String,
            HeapPayload::Array(_) => HeapTag::Array,
            HeapPayload::Object { .. } => HeapTag::Object,
        }
    }
}

/// An entry removed from the heap by [`Heap::delete`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeapEntry {
    pub id: HeapId,
    pub payload: HeapPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap entry {0} was already freed")]
    Freed(HeapId),
    #[error("heap entry {id} is {found:?}, expected {expected:?}")]
    WrongKind {
        id: HeapId,
        expected: HeapTag,
        found: HeapTag,
    },
    #[error("index {index} out of bounds for heap entry {id} of length {len}")]
    OutOfBounds { id: HeapId, index: usize, len: usize },
    #[error("heap is full ({0} live entries)")]
    Exhausted(usize),
}

// ── Heap settings ─────────────────────────────────────────────────────

/// User-facing heap options; `None` keeps the default.
#[derive(Debug, Clone, Default)]
pub struct HeapCreateInfo {
    pub initial_capacity: Option<usize>,
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Arena slots reserved up front.
    pub initial_capacity: usize,
    /// Live entries allowed before allocation fails.
    pub max_entries: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            max_entries: u32::MAX as usize,
        }
    }
}

// ── Arena ────────────────────────────────────────────────────────────

struct Slot {
    generation: u32,
    payload: Option<HeapPayload>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    fn get(&self, id: HeapId) -> Result<&HeapPayload, HeapError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.payload.as_ref())
            .ok_or(HeapError::Freed(id))
    }

    fn get_mut(&mut self, id: HeapId) -> Result<&mut HeapPayload, HeapError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.payload.as_mut())
            .ok_or(HeapError::Freed(id))
    }

    fn str(&self, id: HeapId) -> Result<&str, HeapError> {
        match self.get(id)? {
            HeapPayload::String(s) => Ok(s),
            other => Err(wrong_kind(id, HeapTag::String, other)),
        }
    }

    fn insert(&mut self, payload: HeapPayload, max_entries: usize) -> Result<HeapId, HeapError> {
        if self.live >= max_entries {
            return Err(HeapError::Exhausted(self.live));
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.payload = Some(payload);
            return Ok(HeapId {
                index,
                generation: slot.generation,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            payload: Some(payload),
        });
        Ok(HeapId {
            index,
            generation: 0,
        })
    }

    fn remove(&mut self, id: HeapId) -> Result<HeapPayload, HeapError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(HeapError::Freed(id))?;
        let payload = slot.payload.take().ok_or(HeapError::Freed(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(payload)
    }
}

fn wrong_kind(id: HeapId, expected: HeapTag, found: &HeapPayload) -> HeapError {
    HeapError::WrongKind {
        id,
        expected,
        found: found.tag(),
    }
}

fn out_of_bounds(id: HeapId, index: usize, len: usize) -> HeapError {
    HeapError::OutOfBounds { id, index, len }
}

// ── Heap handle ──────────────────────────────────────────────────────

struct HeapShared {
    settings: HeapSettings,
    arena: Mutex<Arena>,
}

#[derive(Clone)]
pub struct Heap {
    shared: Arc<HeapShared>,
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Self {
        let mut settings = HeapSettings::default();
        info.initial_capacity
            .inspect(|&val| settings.initial_capacity = val);
        info.max_entries.inspect(|&val| settings.max_entries = val);

        let arena = Arena {
            slots: Vec::with_capacity(settings.initial_capacity),
            ..Default::default()
        };
        Self {
            shared: Arc::new(HeapShared {
                settings,
                arena: Mutex::new(arena),
            }),
        }
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.shared.settings
    }

    fn alloc(&self, payload: HeapPayload) -> Result<HeapId, HeapError> {
        let tag = payload.tag();
        let id = self
            .shared
            .arena
            .lock()
            .insert(payload, self.shared.settings.max_entries)?;
        log::trace!("heap: allocated {tag:?} {id}");
        Ok(id)
    }

    pub fn create_string(&self, value: impl Into<String>) -> Result<HeapId, HeapError> {
        self.alloc(HeapPayload::String(value.into()))
    }

    pub fn create_array(&self, elements: Vec<Value>) -> Result<HeapId, HeapError> {
        self.alloc(HeapPayload::Array(elements))
    }

    pub fn create_object(&self, class: u16, fields: Vec<Value>) -> Result<HeapId, HeapError> {
        self.alloc(HeapPayload::Object { class, fields })
    }

    /// Free an entry immediately. Any other copy of `id` becomes stale.
    pub fn delete(&self, id: HeapId) -> Result<HeapEntry, HeapError> {
        let payload = self.shared.arena.lock().remove(id)?;
        log::trace!("heap: freed {:?} {id}", payload.tag());
        Ok(HeapEntry { id, payload })
    }

    pub fn contains(&self, id: HeapId) -> bool {
        self.shared.arena.lock().get(id).is_ok()
    }

    pub fn tag(&self, id: HeapId) -> Result<HeapTag, HeapError> {
        self.shared.arena.lock().get(id).map(HeapPayload::tag)
    }

    pub fn live_count(&self) -> usize {
        self.shared.arena.lock().live
    }

    // ── strings ──────────────────────────────────────────────────────

    /// Run `f` on a string entry while the heap is locked.
    pub fn with_string<R>(&self, id: HeapId, f: impl FnOnce(&str) -> R) -> Result<R, HeapError> {
        let arena = self.shared.arena.lock();
        arena.str(id).map(f)
    }

    pub fn string(&self, id: HeapId) -> Result<String, HeapError> {
        self.with_string(id, str::to_owned)
    }

    /// Allocate the concatenation of two strings.
    pub fn concat(&self, left: HeapId, right: HeapId) -> Result<HeapId, HeapError> {
        let joined = {
            let arena = self.shared.arena.lock();
            let mut joined = arena.str(left)?.to_owned();
            joined.push_str(arena.str(right)?);
            joined
        };
        self.create_string(joined)
    }

    pub fn strings_equal(&self, left: HeapId, right: HeapId) -> Result<bool, HeapError> {
        let arena = self.shared.arena.lock();
        Ok(arena.str(left)? == arena.str(right)?)
    }

    // ── objects ──────────────────────────────────────────────────────

    pub fn object_class(&self, id: HeapId) -> Result<u16, HeapError> {
        match self.shared.arena.lock().get(id)? {
            HeapPayload::Object { class, .. } => Ok(*class),
            other => Err(wrong_kind(id, HeapTag::Object, other)),
        }
    }

    pub fn field(&self, id: HeapId, index: usize) -> Result<Value, HeapError> {
        match self.shared.arena.lock().get(id)? {
            HeapPayload::Object { fields, .. } => fields
                .get(index)
                .copied()
                .ok_or_else(|| out_of_bounds(id, index, fields.len())),
            other => Err(wrong_kind(id, HeapTag::Object, other)),
        }
    }

    pub fn set_field(&self, id: HeapId, index: usize, value: Value) -> Result<(), HeapError> {
        match self.shared.arena.lock().get_mut(id)? {
            HeapPayload::Object { fields, .. } => {
                let len = fields.len();
                let slot = fields
                    .get_mut(index)
                    .ok_or_else(|| out_of_bounds(id, index, len))?;
                *slot = value;
                Ok(())
            }
            other => Err(wrong_kind(id, HeapTag::Object, other)),
        }
    }

    // ── arrays ───────────────────────────────────────────────────────

    pub fn array_len(&self, id: HeapId) -> Result<usize, HeapError> {
        match self.shared.arena.lock().get(id)? {
            HeapPayload::Array(elements) => Ok(elements.len()),
            other => Err(wrong_kind(id, HeapTag::Array, other)),
        }
    }

    pub fn element(&self, id: HeapId, index: usize) -> Result<Value, HeapError> {
        match self.shared.arena.lock().get(id)? {
            HeapPayload::Array(elements) => elements
                .get(index)
                .copied()
                .ok_or_else(|| out_of_bounds(id, index, elements.len())),
            other => Err(wrong_kind(id, HeapTag::Array, other)),
        }
    }

    pub fn set_element(&self, id: HeapId, index: usize, value: Value) -> Result<(), HeapError> {
        match self.shared.arena.lock().get_mut(id)? {
            HeapPayload::Array(elements) => {
                let len = elements.len();
                let slot = elements
                    .get_mut(index)
                    .ok_or_else(|| out_of_bounds(id, index, len))?;
                *slot = value;
                Ok(())
            }
            other => Err(wrong_kind(id, HeapTag::Array, other)),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapCreateInfo::default())
    }
}

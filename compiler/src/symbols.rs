//! Scoped symbol table.
//!
//! Scopes form an arena with parent links. Block and function scopes are
//! discarded by [`SymbolTable::remove`] when the compiler leaves them; a
//! class's member and method tables live as long as the class symbol.
//!
//! Variable slots are allocated per slot root (a function body, the top
//! level, or a class member table) from a high-water mark, so a slot is
//! never handed out twice even after its scope is gone.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::{TypeId, TypeScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Variable {
        slot: u16,
    },
    Function {
        params: Vec<TypeId>,
        id: u16,
    },
    /// `params` excludes the implicit `this`.
    Method {
        params: Vec<TypeId>,
        id: u16,
    },
    /// `qualified` spells out enclosing classes (`Outer.Inner`); `id` is
    /// the class's pool index.
    Class {
        qualified: String,
        members: ScopeId,
        methods: ScopeId,
        types: TypeScopeId,
        id: u16,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    /// Variable type, callable return type, or the class's own type.
    pub ty: TypeId,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn slot(&self) -> Option<u16> {
        match self.kind {
            SymbolKind::Variable { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&[TypeId]> {
        match &self.kind {
            SymbolKind::Function { params, .. } | SymbolKind::Method { params, .. } => Some(params),
            _ => None,
        }
    }

    pub fn callable_id(&self) -> Option<u16> {
        match self.kind {
            SymbolKind::Function { id, .. } | SymbolKind::Method { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("'{0}' is already declared in this scope")]
    Redeclared(String),
    #[error("'{0}' is already declared with the same parameter types")]
    DuplicateSignature(String),
    #[error("more than {} variables in one function", u16::MAX as usize + 1)]
    TooManySlots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Block,
    /// Function body or top level: owns a slot counter.
    Root,
    /// Class members: owns a slot counter, never removed.
    Members,
    Methods,
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    depth: u32,
    kind: ScopeKind,
    high_water: Option<u16>,
    symbols: Vec<Symbol>,
    alive: bool,
}

impl Scope {
    fn owns_slots(&self) -> bool {
        matches!(self.kind, ScopeKind::Root | ScopeKind::Members)
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    /// Block and function scopes not yet removed, innermost last.
    active: Vec<ScopeId>,
    /// Class type → owning scope and position of its symbol.
    classes: HashMap<TypeId, (ScopeId, usize)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                depth: 0,
                kind: ScopeKind::Root,
                high_water: None,
                symbols: Vec::new(),
                alive: true,
            }],
            active: Vec::new(),
            classes: HashMap::new(),
        }
    }

    fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    fn push(&mut self, parent: ScopeId, depth: u32, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            depth,
            kind,
            high_water: None,
            symbols: Vec::new(),
            alive: true,
        });
        if matches!(kind, ScopeKind::Block | ScopeKind::Root) {
            self.active.push(id);
        }
        id
    }

    /// Open a block scope at `depth`.
    pub fn push_block(&mut self, parent: ScopeId, depth: u32) -> ScopeId {
        self.push(parent, depth, ScopeKind::Block)
    }

    /// Open a function body scope at `depth` with its own slot numbering.
    pub fn push_root(&mut self, parent: ScopeId, depth: u32) -> ScopeId {
        self.push(parent, depth, ScopeKind::Root)
    }

    /// Discard every block and function scope at `depth` or deeper.
    pub fn remove(&mut self, depth: u32) {
        while let Some(&id) = self.active.last() {
            if self.scope(id).depth < depth {
                break;
            }
            self.active.pop();
            let scope = self.scope_mut(id);
            scope.alive = false;
            scope.symbols.clear();
        }
    }

    pub fn is_alive(&self, scope: ScopeId) -> bool {
        self.scope(scope).alive
    }

    fn chain(&self, scope: ScopeId) -> impl Iterator<Item = (ScopeId, &Scope)> {
        std::iter::successors(Some(scope), |&id| self.scope(id).parent)
            .map(|id| (id, self.scope(id)))
    }

    fn slot_root(&self, scope: ScopeId) -> ScopeId {
        self.chain(scope)
            .find(|(_, s)| s.owns_slots())
            .map_or(ScopeId::GLOBAL, |(id, _)| id)
    }

    /// Number of slots handed out under the slot root owning `scope`.
    pub fn slot_count(&self, scope: ScopeId) -> usize {
        self.scope(self.slot_root(scope))
            .high_water
            .map_or(0, |h| h as usize + 1)
    }

    fn check_free(&self, scope: ScopeId, name: &str) -> Result<(), SymbolError> {
        if self.scope(scope).symbols.iter().any(|s| s.name == name) {
            return Err(SymbolError::Redeclared(name.to_string()));
        }
        Ok(())
    }

    /// Declare a variable and assign it the next slot of its slot root.
    pub fn insert_variable(&mut self, scope: ScopeId, name: &str, ty: TypeId) -> Result<u16, SymbolError> {
        if self.lookup_variable(scope, name).is_some() {
            return Err(SymbolError::Redeclared(name.to_string()));
        }
        self.check_free(scope, name)?;

        let root = self.slot_root(scope);
        let slot = match self.scope(root).high_water {
            None => 0,
            Some(h) => h.checked_add(1).ok_or(SymbolError::TooManySlots)?,
        };
        self.scope_mut(root).high_water = Some(slot);
        self.scope_mut(scope).symbols.push(Symbol {
            name: name.to_string(),
            ty,
            kind: SymbolKind::Variable { slot },
        });
        Ok(slot)
    }

    fn insert_signature(&mut self, scope: ScopeId, symbol: Symbol) -> Result<(), SymbolError> {
        let params = symbol.params().unwrap_or_default();
        for existing in &self.scope(scope).symbols {
            if existing.name != symbol.name {
                continue;
            }
            match existing.params() {
                Some(other) if other == params => {
                    return Err(SymbolError::DuplicateSignature(symbol.name.clone()));
                }
                Some(_) => {}
                None => return Err(SymbolError::Redeclared(symbol.name.clone())),
            }
        }
        self.scope_mut(scope).symbols.push(symbol);
        Ok(())
    }

    pub fn insert_callable(
        &mut self,
        scope: ScopeId,
        name: &str,
        return_type: TypeId,
        params: Vec<TypeId>,
        id: u16,
    ) -> Result<(), SymbolError> {
        self.insert_signature(
            scope,
            Symbol {
                name: name.to_string(),
                ty: return_type,
                kind: SymbolKind::Function { params, id },
            },
        )
    }

    pub fn insert_method(
        &mut self,
        methods: ScopeId,
        name: &str,
        return_type: TypeId,
        params: Vec<TypeId>,
        id: u16,
    ) -> Result<(), SymbolError> {
        self.insert_signature(
            methods,
            Symbol {
                name: name.to_string(),
                ty: return_type,
                kind: SymbolKind::Method { params, id },
            },
        )
    }

    /// Declare a class and allocate its private member and method tables.
    ///
    /// The member table chains to `scope`, the method table to the member
    /// table, so method bodies see members, nested classes, and globals.
    pub fn insert_class(
        &mut self,
        scope: ScopeId,
        name: &str,
        qualified: &str,
        ty: TypeId,
        types: TypeScopeId,
        id: u16,
    ) -> Result<(ScopeId, ScopeId), SymbolError> {
        self.check_free(scope, name)?;
        let depth = self.scope(scope).depth;
        let members = self.push(scope, depth, ScopeKind::Members);
        let methods = self.push(members, depth, ScopeKind::Methods);
        let symbols = &mut self.scope_mut(scope).symbols;
        symbols.push(Symbol {
            name: name.to_string(),
            ty,
            kind: SymbolKind::Class {
                qualified: qualified.to_string(),
                members,
                methods,
                types,
                id,
            },
        });
        let position = symbols.len() - 1;
        self.classes.insert(ty, (scope, position));
        Ok((members, methods))
    }

    /// Innermost symbol named `name`, searching outward.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.chain(scope)
            .find_map(|(_, s)| s.symbols.iter().rev().find(|sym| sym.name == name))
    }

    /// Innermost variable named `name`, not looking past the slot root.
    pub fn lookup_variable(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        for (_, s) in self.chain(scope) {
            if let Some(sym) = s
                .symbols
                .iter()
                .find(|sym| sym.name == name && sym.slot().is_some())
            {
                return Some(sym);
            }
            if s.owns_slots() {
                break;
            }
        }
        None
    }

    /// Member or method declared directly in a class table.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.scope(scope).symbols.iter().find(|sym| sym.name == name)
    }

    /// Every free function named `name` visible from `scope`.
    pub fn lookup_callables(&self, scope: ScopeId, name: &str) -> Vec<&Symbol> {
        self.chain(scope)
            .flat_map(|(_, s)| s.symbols.iter())
            .filter(|sym| sym.name == name && matches!(sym.kind, SymbolKind::Function { .. }))
            .collect()
    }

    /// Every method named `name` in a class's method table.
    pub fn lookup_methods(&self, methods: ScopeId, name: &str) -> Vec<&Symbol> {
        self.scope(methods)
            .symbols
            .iter()
            .filter(|sym| sym.name == name && matches!(sym.kind, SymbolKind::Method { .. }))
            .collect()
    }

    /// All variables of a class member table in slot order.
    pub fn members(&self, members: ScopeId) -> Vec<&Symbol> {
        let mut vars: Vec<&Symbol> = self
            .scope(members)
            .symbols
            .iter()
            .filter(|sym| sym.slot().is_some())
            .collect();
        vars.sort_by_key(|sym| sym.slot());
        vars
    }

    /// The class symbol owning `ty`.
    pub fn lookup_class_by_type(&self, ty: TypeId) -> Option<&Symbol> {
        let &(scope, position) = self.classes.get(&ty)?;
        self.scope(scope)
            .symbols
            .get(position)
            .filter(|sym| sym.ty == ty && matches!(sym.kind, SymbolKind::Class { .. }))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_never_collide_across_nested_scopes() {
        let mut table = SymbolTable::new();
        let a = table.insert_variable(ScopeId::GLOBAL, "a", TypeId::INT).unwrap();
        let inner = table.push_block(ScopeId::GLOBAL, 1);
        let b = table.insert_variable(inner, "b", TypeId::INT).unwrap();
        let innermost = table.push_block(inner, 2);
        let c = table.insert_variable(innermost, "c", TypeId::DOUBLE).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn slots_are_not_reused_after_remove() {
        let mut table = SymbolTable::new();
        let block = table.push_block(ScopeId::GLOBAL, 1);
        assert_eq!(table.insert_variable(block, "tmp", TypeId::INT), Ok(0));
        table.remove(1);
        assert!(!table.is_alive(block));

        let again = table.push_block(ScopeId::GLOBAL, 1);
        assert_eq!(table.insert_variable(again, "tmp", TypeId::INT), Ok(1));
        assert_eq!(table.slot_count(ScopeId::GLOBAL), 2);
    }

    #[test]
    fn redeclaration_in_chain_is_rejected_until_removed() {
        let mut table = SymbolTable::new();
        let outer = table.push_block(ScopeId::GLOBAL, 1);
        table.insert_variable(outer, "x", TypeId::INT).unwrap();
        let inner = table.push_block(outer, 2);
        assert_eq!(
            table.insert_variable(inner, "x", TypeId::INT),
            Err(SymbolError::Redeclared("x".into()))
        );

        table.remove(1);
        let fresh = table.push_block(ScopeId::GLOBAL, 1);
        assert!(table.insert_variable(fresh, "x", TypeId::INT).is_ok());
    }

    #[test]
    fn function_roots_number_their_own_slots() {
        let mut table = SymbolTable::new();
        table.insert_variable(ScopeId::GLOBAL, "g", TypeId::INT).unwrap();
        table.insert_variable(ScopeId::GLOBAL, "h", TypeId::INT).unwrap();

        let body = table.push_root(ScopeId::GLOBAL, 1);
        assert_eq!(table.insert_variable(body, "n", TypeId::INT), Ok(0));
        assert!(table.lookup_variable(body, "g").is_none());
        assert!(table.lookup(body, "g").is_some());
        assert_eq!(table.slot_count(body), 1);
    }

    #[test]
    fn overloads_need_distinct_parameters() {
        let mut table = SymbolTable::new();
        table
            .insert_callable(ScopeId::GLOBAL, "f", TypeId::INT, vec![TypeId::INT], 0)
            .unwrap();
        table
            .insert_callable(ScopeId::GLOBAL, "f", TypeId::INT, vec![TypeId::DOUBLE], 1)
            .unwrap();
        assert_eq!(
            table.insert_callable(ScopeId::GLOBAL, "f", TypeId::VOID, vec![TypeId::INT], 2),
            Err(SymbolError::DuplicateSignature("f".into()))
        );
        assert_eq!(table.lookup_callables(ScopeId::GLOBAL, "f").len(), 2);
    }

    #[test]
    fn classes_own_private_tables() {
        let mut table = SymbolTable::new();
        let ty = TypeId::STRING; // any id works for the table itself
        let (members, methods) = table
            .insert_class(ScopeId::GLOBAL, "Point", "Point", ty, TypeScopeId::GLOBAL, 7)
            .unwrap();
        assert_eq!(table.insert_variable(members, "x", TypeId::INT), Ok(0));
        assert_eq!(table.insert_variable(members, "y", TypeId::INT), Ok(1));
        table
            .insert_method(methods, "len", TypeId::INT, vec![], 3)
            .unwrap();

        // Member slots are independent of the enclosing scope.
        assert_eq!(table.insert_variable(ScopeId::GLOBAL, "p", TypeId::INT), Ok(0));

        let class = table.lookup_class_by_type(ty).unwrap();
        assert_eq!(class.name, "Point");
        assert!(matches!(class.kind, SymbolKind::Class { id: 7, .. }));
        assert!(table.lookup_class_by_type(TypeId::INT).is_none());
        assert_eq!(table.members(members).len(), 2);
        assert_eq!(table.lookup_methods(methods, "len")[0].callable_id(), Some(3));
        assert!(table.lookup_variable(ScopeId::GLOBAL, "x").is_none());
    }

    #[test]
    fn remove_keeps_class_tables() {
        let mut table = SymbolTable::new();
        let (members, _) = table
            .insert_class(ScopeId::GLOBAL, "Box", "Box", TypeId::STRING, TypeScopeId::GLOBAL, 0)
            .unwrap();
        table.insert_variable(members, "v", TypeId::INT).unwrap();
        table.remove(0);
        assert!(table.is_alive(members));
        assert!(table.lookup_local(members, "v").is_some());
        assert!(table.lookup_class_by_type(TypeId::STRING).is_some());
    }

    #[test]
    fn remove_pops_only_scopes_at_depth_or_deeper() {
        let mut table = SymbolTable::new();
        let body = table.push_root(ScopeId::GLOBAL, 1);
        let outer = table.push_block(body, 2);
        let inner = table.push_block(outer, 3);
        table.insert_variable(inner, "t", TypeId::INT).unwrap();

        table.remove(3);
        assert!(!table.is_alive(inner));
        assert!(table.is_alive(outer));
        assert!(table.is_alive(body));

        table.remove(1);
        assert!(!table.is_alive(outer));
        assert!(!table.is_alive(body));
        assert!(table.is_alive(ScopeId::GLOBAL));
        assert!(table.active.is_empty());
    }
}

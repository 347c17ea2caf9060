//! Scoped registry of named types.
//!
//! Entries live in one dense arena; names are bound in scopes that chain
//! outward to the global scope. A class's nested types live in a private
//! scope chained to the scope enclosing the class.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const INT: TypeId = TypeId(1);
    pub const DOUBLE: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const STRING: TypeId = TypeId(4);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeScopeId(u32);

impl TypeScopeId {
    pub const GLOBAL: TypeScopeId = TypeScopeId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive,
    Class,
    Array,
    Tuple,
    Function,
    Typedef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Conversion {
    /// No cast needed.
    Implicit,
    /// Only through an explicit cast.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRelation {
    pub other: TypeId,
    pub conversion: Conversion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    /// Target of a typedef.
    pub redirect: Option<TypeId>,
    pub subtypes: Vec<TypeRelation>,
    pub supertypes: Vec<TypeRelation>,
    /// Element types of generic kinds. For functions the return type is
    /// last.
    pub type_args: Vec<TypeId>,
    /// `false` for a forward declaration not yet defined.
    pub complete: bool,
    pub scope: TypeScopeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("type '{0}' is already defined")]
    Redefinition(String),
    #[error("unknown type '{0}'")]
    Unknown(String),
    #[error("typedef '{0}' needs a target type")]
    MissingRedirect(String),
    #[error("typedef '{0}' would form a cycle")]
    Cycle(String),
    #[error("{0:?} types take type arguments")]
    NotGeneric(TypeKind),
}

#[derive(Debug, Clone)]
struct TypeScope {
    parent: Option<TypeScopeId>,
    names: HashMap<String, TypeId>,
}

#[derive(Debug, Clone)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    scopes: Vec<TypeScope>,
}

impl TypeTable {
    /// A table holding the primitive types and their conversions.
    pub fn new() -> Self {
        let mut table = Self {
            entries: Vec::new(),
            scopes: vec![TypeScope {
                parent: None,
                names: HashMap::new(),
            }],
        };
        for (expected, name) in [
            (TypeId::VOID, "void"),
            (TypeId::INT, "int"),
            (TypeId::DOUBLE, "double"),
            (TypeId::BOOL, "bool"),
            (TypeId::STRING, "string"),
        ] {
            let id = table.push_entry(TypeScopeId::GLOBAL, name, TypeKind::Primitive, None, true);
            debug_assert_eq!(id, expected);
        }
        // int widens to double; the reverse truncates.
        table.add_relation(TypeId::INT, TypeId::DOUBLE, Conversion::Explicit, Conversion::Implicit);
        // bool is an int of 0 or 1; not every int is a bool.
        table.add_relation(TypeId::BOOL, TypeId::INT, Conversion::Explicit, Conversion::Implicit);
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh scope whose lookups fall back to `parent`.
    pub fn new_scope(&mut self, parent: TypeScopeId) -> TypeScopeId {
        let id = TypeScopeId(self.scopes.len() as u32);
        self.scopes.push(TypeScope {
            parent: Some(parent),
            names: HashMap::new(),
        });
        id
    }

    fn push_entry(
        &mut self,
        scope: TypeScopeId,
        name: &str,
        kind: TypeKind,
        redirect: Option<TypeId>,
        complete: bool,
    ) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            id,
            name: name.to_string(),
            kind,
            redirect,
            subtypes: Vec::new(),
            supertypes: Vec::new(),
            type_args: Vec::new(),
            complete,
            scope,
        });
        self.scopes[scope.0 as usize]
            .names
            .insert(name.to_string(), id);
        id
    }

    fn chain(&self, scope: TypeScopeId) -> impl Iterator<Item = &TypeScope> {
        std::iter::successors(Some(&self.scopes[scope.0 as usize]), |s| {
            s.parent.map(|p| &self.scopes[p.0 as usize])
        })
    }

    pub fn lookup(&self, scope: TypeScopeId, name: &str) -> Option<TypeId> {
        self.chain(scope).find_map(|s| s.names.get(name).copied())
    }

    pub fn has_complete_type(&self, scope: TypeScopeId, name: &str) -> bool {
        self.lookup(scope, name)
            .is_some_and(|id| self.get(id).complete)
    }

    pub fn get(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.index()]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.get(id).name
    }

    /// Forward-declare a type; an existing binding in the chain is reused.
    pub fn declare(&mut self, scope: TypeScopeId, name: &str, kind: TypeKind) -> TypeId {
        match self.lookup(scope, name) {
            Some(id) => id,
            None => self.push_entry(scope, name, kind, None, false),
        }
    }

    /// Define a type. Completes a forward declaration bound in `scope`.
    pub fn insert(
        &mut self,
        scope: TypeScopeId,
        name: &str,
        kind: TypeKind,
        redirect: Option<TypeId>,
    ) -> Result<TypeId, TypeError> {
        if self.has_complete_type(scope, name) {
            return Err(TypeError::Redefinition(name.to_string()));
        }
        if kind == TypeKind::Typedef && redirect.is_none() {
            return Err(TypeError::MissingRedirect(name.to_string()));
        }

        let pending = self.scopes[scope.0 as usize].names.get(name).copied();
        if let (Some(id), Some(target)) = (pending, redirect) {
            if self.reaches(target, id) {
                return Err(TypeError::Cycle(name.to_string()));
            }
        }

        match pending {
            Some(id) => {
                let entry = &mut self.entries[id.index()];
                entry.kind = kind;
                entry.redirect = redirect;
                entry.complete = true;
                Ok(id)
            }
            None => Ok(self.push_entry(scope, name, kind, redirect, true)),
        }
    }

    /// Whether following typedefs from `from` arrives at `to`.
    fn reaches(&self, from: TypeId, to: TypeId) -> bool {
        let mut current = from;
        for _ in 0..=self.entries.len() {
            if current == to {
                return true;
            }
            match self.get(current).redirect {
                Some(next) => current = next,
                None => return false,
            }
        }
        true
    }

    /// Intern a structural type such as `Array<int>`.
    pub fn insert_generic(&mut self, kind: TypeKind, args: &[TypeId]) -> Result<TypeId, TypeError> {
        let name = self.canonical_name(kind, args)?;
        if let Some(&id) = self.scopes[0].names.get(&name) {
            return Ok(id);
        }
        let id = self.push_entry(TypeScopeId::GLOBAL, &name, kind, None, true);
        self.entries[id.index()].type_args = args.to_vec();
        Ok(id)
    }

    fn canonical_name(&self, kind: TypeKind, args: &[TypeId]) -> Result<String, TypeError> {
        let names: Vec<&str> = args.iter().map(|&id| self.name(self.resolve(id))).collect();
        match kind {
            TypeKind::Array => Ok(format!("Array<{}>", names.join(","))),
            TypeKind::Tuple => Ok(format!("Tuple<{}>", names.join(","))),
            TypeKind::Function => {
                let (ret, params) = match names.split_last() {
                    Some((ret, params)) => (*ret, params),
                    None => ("void", &[][..]),
                };
                Ok(format!("Function<({})->{ret}>", params.join(",")))
            }
            other => Err(TypeError::NotGeneric(other)),
        }
    }

    /// Record that `a` is a subtype of `b`.
    ///
    /// `super_conv` governs using an `a` where a `b` is expected,
    /// `sub_conv` the reverse.
    pub fn add_relation(&mut self, a: TypeId, b: TypeId, sub_conv: Conversion, super_conv: Conversion) {
        self.entries[a.index()].supertypes.push(TypeRelation {
            other: b,
            conversion: super_conv,
        });
        self.entries[b.index()].subtypes.push(TypeRelation {
            other: a,
            conversion: sub_conv,
        });
    }

    /// Follow typedefs to the concrete entry.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        let mut current = id;
        // Bounded: insert rejects cycles, this only guards seeded tables.
        for _ in 0..=self.entries.len() {
            match self.get(current).redirect {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    pub fn same(&self, a: TypeId, b: TypeId) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    /// How a value of `from` may be used where `to` is expected.
    ///
    /// Walks relation edges in both directions; a path is implicit only if
    /// every edge on it is.
    pub fn conversion(&self, from: TypeId, to: TypeId) -> Option<Conversion> {
        let (from, to) = (self.resolve(from), self.resolve(to));
        if from == to {
            return Some(Conversion::Implicit);
        }
        if self.search(from, to, true) {
            Some(Conversion::Implicit)
        } else if self.search(from, to, false) {
            Some(Conversion::Explicit)
        } else {
            None
        }
    }

    pub fn is_assignable(&self, from: TypeId, to: TypeId) -> bool {
        self.conversion(from, to) == Some(Conversion::Implicit)
    }

    fn search(&self, from: TypeId, to: TypeId, implicit_only: bool) -> bool {
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            let entry = self.get(current);
            for edge in entry.supertypes.iter().chain(&entry.subtypes) {
                if implicit_only && edge.conversion != Conversion::Implicit {
                    continue;
                }
                let next = self.resolve(edge.other);
                if next == to {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_preregistered() {
        let table = TypeTable::new();
        assert_eq!(table.lookup(TypeScopeId::GLOBAL, "int"), Some(TypeId::INT));
        assert_eq!(table.lookup(TypeScopeId::GLOBAL, "string"), Some(TypeId::STRING));
        assert!(table.has_complete_type(TypeScopeId::GLOBAL, "double"));
        assert_eq!(table.get(TypeId::BOOL).kind, TypeKind::Primitive);
    }

    #[test]
    fn conversion_matrix() {
        let table = TypeTable::new();
        assert_eq!(table.conversion(TypeId::INT, TypeId::DOUBLE), Some(Conversion::Implicit));
        assert_eq!(table.conversion(TypeId::DOUBLE, TypeId::INT), Some(Conversion::Explicit));
        assert_eq!(table.conversion(TypeId::BOOL, TypeId::INT), Some(Conversion::Implicit));
        assert_eq!(table.conversion(TypeId::INT, TypeId::BOOL), Some(Conversion::Explicit));
        assert_eq!(table.conversion(TypeId::BOOL, TypeId::DOUBLE), Some(Conversion::Implicit));
        assert_eq!(table.conversion(TypeId::STRING, TypeId::INT), None);
    }

    #[test]
    fn redefinition_is_rejected_through_the_chain() {
        let mut table = TypeTable::new();
        let point = table.insert(TypeScopeId::GLOBAL, "Point", TypeKind::Class, None).unwrap();
        let inner = table.new_scope(TypeScopeId::GLOBAL);
        assert_eq!(
            table.insert(inner, "Point", TypeKind::Class, None),
            Err(TypeError::Redefinition("Point".into()))
        );
        assert_eq!(table.lookup(inner, "Point"), Some(point));
    }

    #[test]
    fn private_scopes_hide_nested_types() {
        let mut table = TypeTable::new();
        let private = table.new_scope(TypeScopeId::GLOBAL);
        let node = table.insert(private, "Node", TypeKind::Class, None).unwrap();
        assert_eq!(table.lookup(private, "Node"), Some(node));
        assert_eq!(table.lookup(TypeScopeId::GLOBAL, "Node"), None);
    }

    #[test]
    fn forward_declarations_complete_in_place() {
        let mut table = TypeTable::new();
        let declared = table.declare(TypeScopeId::GLOBAL, "Tree", TypeKind::Class);
        assert!(!table.has_complete_type(TypeScopeId::GLOBAL, "Tree"));
        let defined = table.insert(TypeScopeId::GLOBAL, "Tree", TypeKind::Class, None).unwrap();
        assert_eq!(declared, defined);
        assert!(table.get(defined).complete);
    }

    #[test]
    fn typedef_chains_resolve() {
        let mut table = TypeTable::new();
        let meters = table
            .insert(TypeScopeId::GLOBAL, "meters", TypeKind::Typedef, Some(TypeId::DOUBLE))
            .unwrap();
        let distance = table
            .insert(TypeScopeId::GLOBAL, "distance", TypeKind::Typedef, Some(meters))
            .unwrap();
        assert_eq!(table.resolve(distance), TypeId::DOUBLE);
        assert!(table.same(distance, TypeId::DOUBLE));
        assert_eq!(table.conversion(TypeId::INT, distance), Some(Conversion::Implicit));
    }

    #[test]
    fn typedef_needs_target_and_no_cycle() {
        let mut table = TypeTable::new();
        assert_eq!(
            table.insert(TypeScopeId::GLOBAL, "nothing", TypeKind::Typedef, None),
            Err(TypeError::MissingRedirect("nothing".into()))
        );

        let a = table.declare(TypeScopeId::GLOBAL, "A", TypeKind::Typedef);
        table
            .insert(TypeScopeId::GLOBAL, "B", TypeKind::Typedef, Some(a))
            .unwrap();
        let b = table.lookup(TypeScopeId::GLOBAL, "B").unwrap();
        assert_eq!(
            table.insert(TypeScopeId::GLOBAL, "A", TypeKind::Typedef, Some(b)),
            Err(TypeError::Cycle("A".into()))
        );
    }

    #[test]
    fn generics_are_interned() {
        let mut table = TypeTable::new();
        let a = table.insert_generic(TypeKind::Array, &[TypeId::INT]).unwrap();
        let b = table.insert_generic(TypeKind::Array, &[TypeId::INT]).unwrap();
        let c = table.insert_generic(TypeKind::Array, &[TypeId::DOUBLE]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.name(a), "Array<int>");
        assert_eq!(table.get(a).type_args, vec![TypeId::INT]);

        let f = table
            .insert_generic(TypeKind::Function, &[TypeId::INT, TypeId::DOUBLE, TypeId::BOOL])
            .unwrap();
        assert_eq!(table.name(f), "Function<(int,double)->bool>");
        assert_eq!(
            table.insert_generic(TypeKind::Class, &[]),
            Err(TypeError::NotGeneric(TypeKind::Class))
        );
    }

    #[test]
    fn user_relations_are_searched_transitively() {
        let mut table = TypeTable::new();
        let animal = table.insert(TypeScopeId::GLOBAL, "Animal", TypeKind::Class, None).unwrap();
        let dog = table.insert(TypeScopeId::GLOBAL, "Dog", TypeKind::Class, None).unwrap();
        let puppy = table.insert(TypeScopeId::GLOBAL, "Puppy", TypeKind::Class, None).unwrap();
        table.add_relation(dog, animal, Conversion::Explicit, Conversion::Implicit);
        table.add_relation(puppy, dog, Conversion::Explicit, Conversion::Implicit);

        assert!(table.is_assignable(puppy, animal));
        assert_eq!(table.conversion(animal, puppy), Some(Conversion::Explicit));
        assert_eq!(table.conversion(animal, TypeId::INT), None);
    }
}

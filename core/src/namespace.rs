//! Namespace registry and qualified identifiers.
//!
//! Namespaces form a tree rooted at [NamespaceHandle::GLOBAL]. Entries are
//! append-only; a handle stays valid for the whole compilation. Every
//! identifier the parser creates carries its namespace as part of a
//! [QualifiedIdentifier], so later phases never have to reconstruct scope
//! context from strings.

use crate::intern::{StringHandle, StringInterner};
use std::collections::HashMap;

/// Index into the namespace registry. Handle 0 is reserved for the global
/// namespace.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct NamespaceHandle(u32);

impl NamespaceHandle {
    pub const GLOBAL: NamespaceHandle = NamespaceHandle(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A namespace-qualified name: the pair that identifies every declaration,
/// template, and type in the compiler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct QualifiedIdentifier {
    pub namespace: NamespaceHandle,
    pub name: StringHandle,
}

impl QualifiedIdentifier {
    pub fn new(namespace: NamespaceHandle, name: StringHandle) -> Self {
        Self { namespace, name }
    }

    /// Render as `a::b::name` for diagnostics and mangling input.
    pub fn display(
        &self,
        registry: &NamespaceRegistry,
        interner: &StringInterner,
    ) -> String {
        let prefix = registry.qualified_name(self.namespace, interner);
        if prefix.is_empty() {
            interner.view(self.name).to_string()
        } else {
            format!("{}::{}", prefix, interner.view(self.name))
        }
    }
}

#[derive(Debug)]
struct NamespaceEntry {
    parent: NamespaceHandle,
    name: StringHandle,
}

#[derive(Debug)]
pub struct NamespaceRegistry {
    entries: Vec<NamespaceEntry>,
    children: HashMap<(NamespaceHandle, StringHandle), NamespaceHandle>,
}

impl NamespaceRegistry {
    pub fn new(interner: &mut StringInterner) -> Self {
        let root_name = interner.intern("");
        Self {
            entries: vec![NamespaceEntry {
                parent: NamespaceHandle::GLOBAL,
                name: root_name,
            }],
            children: HashMap::new(),
        }
    }

    /// Find or append the child namespace `name` under `parent`.
    pub fn get_or_create(
        &mut self,
        parent: NamespaceHandle,
        name: StringHandle,
    ) -> NamespaceHandle {
        if let Some(&existing) = self.children.get(&(parent, name)) {
            return existing;
        }
        let handle = NamespaceHandle(self.entries.len() as u32);
        self.entries.push(NamespaceEntry { parent, name });
        self.children.insert((parent, name), handle);
        handle
    }

    /// Look up an existing child without creating it.
    pub fn child(
        &self,
        parent: NamespaceHandle,
        name: StringHandle,
    ) -> Option<NamespaceHandle> {
        self.children.get(&(parent, name)).copied()
    }

    pub fn parent(&self, handle: NamespaceHandle) -> Option<NamespaceHandle> {
        if handle == NamespaceHandle::GLOBAL {
            None
        } else {
            Some(self.entries[handle.index()].parent)
        }
    }

    pub fn local_name(&self, handle: NamespaceHandle) -> StringHandle {
        self.entries[handle.index()].name
    }

    /// Number of segments between `handle` and the root. The global
    /// namespace has depth 0.
    pub fn depth(&self, handle: NamespaceHandle) -> usize {
        let mut depth = 0;
        let mut current = handle;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Whether `ancestor` encloses `handle` (a namespace encloses itself).
    pub fn is_ancestor(
        &self,
        ancestor: NamespaceHandle,
        handle: NamespaceHandle,
    ) -> bool {
        let mut current = Some(handle);
        while let Some(ns) = current {
            if ns == ancestor {
                return true;
            }
            current = self.parent(ns);
        }
        false
    }

    /// Handles from the root down to `handle`, excluding the root itself.
    pub fn path_from_root(&self, handle: NamespaceHandle) -> Vec<NamespaceHandle> {
        let mut path = Vec::new();
        let mut current = handle;
        while current != NamespaceHandle::GLOBAL {
            path.push(current);
            current = self.entries[current.index()].parent;
        }
        path.reverse();
        path
    }

    /// Fully qualified name, e.g. `outer::inner`. Empty for the root.
    pub fn qualified_name(
        &self,
        handle: NamespaceHandle,
        interner: &StringInterner,
    ) -> String {
        let mut out = String::new();
        for ns in self.path_from_root(handle) {
            if !out.is_empty() {
                out.push_str("::");
            }
            out.push_str(interner.view(self.local_name(ns)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_operations() {
        let mut interner = StringInterner::new();
        let mut registry = NamespaceRegistry::new(&mut interner);
        let outer = interner.intern("outer");
        let inner = interner.intern("inner");

        let ns_outer =
            registry.get_or_create(NamespaceHandle::GLOBAL, outer);
        let ns_inner = registry.get_or_create(ns_outer, inner);

        assert_eq!(registry.depth(NamespaceHandle::GLOBAL), 0);
        assert_eq!(registry.depth(ns_inner), 2);
        assert_eq!(registry.parent(ns_inner), Some(ns_outer));
        assert!(registry.is_ancestor(ns_outer, ns_inner));
        assert!(registry.is_ancestor(NamespaceHandle::GLOBAL, ns_inner));
        assert!(!registry.is_ancestor(ns_inner, ns_outer));
        assert_eq!(
            registry.qualified_name(ns_inner, &interner),
            "outer::inner"
        );
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut interner = StringInterner::new();
        let mut registry = NamespaceRegistry::new(&mut interner);
        let name = interner.intern("detail");
        let a = registry.get_or_create(NamespaceHandle::GLOBAL, name);
        let b = registry.get_or_create(NamespaceHandle::GLOBAL, name);
        assert_eq!(a, b);
        assert_eq!(registry.child(NamespaceHandle::GLOBAL, name), Some(a));
    }

    #[test]
    fn test_qualified_identifier_display() {
        let mut interner = StringInterner::new();
        let mut registry = NamespaceRegistry::new(&mut interner);
        let ns_name = interner.intern("math");
        let ns = registry.get_or_create(NamespaceHandle::GLOBAL, ns_name);
        let f = interner.intern("abs");
        let qid = QualifiedIdentifier::new(ns, f);
        assert_eq!(qid.display(&registry, &interner), "math::abs");

        let global = QualifiedIdentifier::new(NamespaceHandle::GLOBAL, f);
        assert_eq!(global.display(&registry, &interner), "abs");
    }
}

//! Symbol table: a stack of lexical scopes over a per-namespace global
//! map.
//!
//! Lookups return overload sets (every visible declaration sharing the
//! name); the caller disambiguates by arity and parameter types. Popping a
//! scope discards its bindings but never the declarations, which stay
//! reachable from the AST.

use crate::{
    ast::DeclId,
    intern::StringHandle,
    namespace::{NamespaceHandle, NamespaceRegistry, QualifiedIdentifier},
};
use std::collections::HashMap;

pub type OverloadSet = Vec<DeclId>;

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<StringHandle, OverloadSet>,
    /// Namespaces pulled in by `using namespace` inside this scope.
    using_namespaces: Vec<NamespaceHandle>,
}

#[derive(Debug)]
pub struct SymbolTable {
    /// Declarations addressable by qualified name, living as long as the
    /// compilation.
    globals: HashMap<QualifiedIdentifier, OverloadSet>,
    /// Aliases installed by using-declarations: name as visible in the
    /// target namespace -> original qualified name.
    aliases: HashMap<QualifiedIdentifier, QualifiedIdentifier>,
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
            aliases: HashMap::new(),
            // The translation-unit scope is always present
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop the file scope");
        self.scopes.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Register a declaration under its qualified name. Repeated inserts
    /// with the same name grow the overload set.
    pub fn insert(&mut self, qid: QualifiedIdentifier, decl: DeclId) {
        self.globals.entry(qid).or_default().push(decl);
    }

    /// Bind a name in the innermost lexical scope (locals, parameters).
    pub fn insert_local(&mut self, name: StringHandle, decl: DeclId) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .bindings
            .entry(name)
            .or_default()
            .push(decl);
    }

    /// Make `target` visible as `alias` (a using-declaration).
    pub fn insert_alias(
        &mut self,
        alias: QualifiedIdentifier,
        target: QualifiedIdentifier,
    ) {
        self.aliases.insert(alias, target);
    }

    /// Record `using namespace ns` for the current scope.
    pub fn add_using_namespace(&mut self, ns: NamespaceHandle) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .using_namespaces
            .push(ns);
    }

    /// Exact qualified lookup, following one level of using-alias.
    pub fn lookup_qualified(
        &self,
        qid: QualifiedIdentifier,
    ) -> Option<&OverloadSet> {
        if let Some(set) = self.globals.get(&qid) {
            return Some(set);
        }
        let target = self.aliases.get(&qid)?;
        self.globals.get(target)
    }

    /// Unqualified lookup: innermost lexical scope outward, then the
    /// namespace chain from `current` to the global namespace, then any
    /// `using namespace` imports in active scopes. Returns the qualified
    /// name the match was found under so callers can keep full context.
    pub fn lookup_unqualified(
        &self,
        name: StringHandle,
        current: NamespaceHandle,
        namespaces: &NamespaceRegistry,
    ) -> Option<(QualifiedIdentifier, &OverloadSet)> {
        for scope in self.scopes.iter().rev() {
            if let Some(set) = scope.bindings.get(&name) {
                let qid = QualifiedIdentifier::new(current, name);
                return Some((qid, set));
            }
        }
        let mut ns = Some(current);
        while let Some(handle) = ns {
            let qid = QualifiedIdentifier::new(handle, name);
            if let Some(set) = self.lookup_qualified(qid) {
                return Some((qid, set));
            }
            ns = namespaces.parent(handle);
        }
        for scope in self.scopes.iter().rev() {
            for &imported in &scope.using_namespaces {
                let qid = QualifiedIdentifier::new(imported, name);
                if let Some(set) = self.lookup_qualified(qid) {
                    return Some((qid, set));
                }
            }
        }
        None
    }

    /// Argument-dependent lookup for a function call: in addition to
    /// ordinary unqualified lookup, consider the namespaces that the
    /// argument types live in.
    pub fn lookup_adl(
        &self,
        name: StringHandle,
        current: NamespaceHandle,
        argument_namespaces: &[NamespaceHandle],
        namespaces: &NamespaceRegistry,
    ) -> Option<(QualifiedIdentifier, &OverloadSet)> {
        if let Some(found) = self.lookup_unqualified(name, current, namespaces)
        {
            return Some(found);
        }
        for &ns in argument_namespaces {
            let qid = QualifiedIdentifier::new(ns, name);
            if let Some(set) = self.lookup_qualified(qid) {
                return Some((qid, set));
            }
        }
        None
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
    use crate::{ast::DeclId, intern::StringInterner};

    /// Distinct placeholder decl ids for table tests; the table never
    /// dereferences them.
    fn decl(n: u32) -> DeclId {
        use crate::ast::{Ast, Decl, DeclKind};
        let mut ast = Ast::new();
        let mut interner = StringInterner::new();
        let target = QualifiedIdentifier::new(
            NamespaceHandle::GLOBAL,
            interner.intern("placeholder"),
        );
        (0..=n)
            .map(|_| {
                ast.add_decl(Decl {
                    kind: DeclKind::UsingDecl { target },
                    span: Default::default(),
                })
            })
            .last()
            .expect("at least one decl created")
    }

    #[test]
    fn test_scoped_shadowing() {
        let mut interner = StringInterner::new();
        let namespaces = NamespaceRegistry::new(&mut interner);
        let mut table = SymbolTable::new();
        let x = interner.intern("x");

        let outer = decl(0);
        let inner = decl(1);
        table.insert_local(x, outer);
        table.push_scope();
        table.insert_local(x, inner);

        let (_, set) = table
            .lookup_unqualified(x, NamespaceHandle::GLOBAL, &namespaces)
            .unwrap();
        assert_eq!(set, &vec![inner]);

        table.pop_scope();
        let (_, set) = table
            .lookup_unqualified(x, NamespaceHandle::GLOBAL, &namespaces)
            .unwrap();
        assert_eq!(set, &vec![outer]);
    }

    #[test]
    fn test_namespace_chain_lookup() {
        let mut interner = StringInterner::new();
        let mut namespaces = NamespaceRegistry::new(&mut interner);
        let mut table = SymbolTable::new();

        let ns_name = interner.intern("detail");
        let ns = namespaces.get_or_create(NamespaceHandle::GLOBAL, ns_name);
        let f = interner.intern("f");
        let d = decl(0);
        table.insert(QualifiedIdentifier::new(NamespaceHandle::GLOBAL, f), d);

        // Unqualified from inside `detail` finds the global f
        let (qid, set) = table.lookup_unqualified(f, ns, &namespaces).unwrap();
        assert_eq!(qid.namespace, NamespaceHandle::GLOBAL);
        assert_eq!(set, &vec![d]);

        // Qualified lookup into `detail` does NOT fall back to the global
        // namespace
        assert!(table
            .lookup_qualified(QualifiedIdentifier::new(ns, f))
            .is_none());
    }

    #[test]
    fn test_overload_sets_accumulate() {
        let mut interner = StringInterner::new();
        let mut table = SymbolTable::new();
        let f = interner.intern("f");
        let qid = QualifiedIdentifier::new(NamespaceHandle::GLOBAL, f);
        let a = decl(0);
        let b = decl(1);
        table.insert(qid, a);
        table.insert(qid, b);
        assert_eq!(table.lookup_qualified(qid), Some(&vec![a, b]));
    }

    #[test]
    fn test_using_declaration_alias() {
        let mut interner = StringInterner::new();
        let mut namespaces = NamespaceRegistry::new(&mut interner);
        let mut table = SymbolTable::new();

        let ns_name = interner.intern("lib");
        let ns = namespaces.get_or_create(NamespaceHandle::GLOBAL, ns_name);
        let g = interner.intern("g");
        let original = QualifiedIdentifier::new(ns, g);
        let d = decl(0);
        table.insert(original, d);

        let alias = QualifiedIdentifier::new(NamespaceHandle::GLOBAL, g);
        table.insert_alias(alias, original);
        assert_eq!(table.lookup_qualified(alias), Some(&vec![d]));
    }

    #[test]
    fn test_adl_searches_argument_namespaces() {
        let mut interner = StringInterner::new();
        let mut namespaces = NamespaceRegistry::new(&mut interner);
        let mut table = SymbolTable::new();

        let ns_name = interner.intern("math");
        let ns = namespaces.get_or_create(NamespaceHandle::GLOBAL, ns_name);
        let swap = interner.intern("swap");
        let d = decl(0);
        table.insert(QualifiedIdentifier::new(ns, swap), d);

        assert!(table
            .lookup_unqualified(swap, NamespaceHandle::GLOBAL, &namespaces)
            .is_none());
        let (qid, set) = table
            .lookup_adl(swap, NamespaceHandle::GLOBAL, &[ns], &namespaces)
            .unwrap();
        assert_eq!(qid.namespace, ns);
        assert_eq!(set, &vec![d]);
    }
}

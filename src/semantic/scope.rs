//! Symbol tables and the usage side index

use std::collections::HashMap;

use crate::ast::{FunctionSignature, TypedExpr, Variable};
use crate::diagnostics::Location;

/// What a name refers to
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Variable(Variable),
    /// Module constant; reads are replaced by its value
    Constant(Variable, TypedExpr),
    Function(FunctionSignature),
    /// Overloads generated from several `@types` headers
    Interface(Vec<FunctionSignature>),
    /// An imported module (`np` for `import numpy as np`)
    Module(String),
    /// A numeric library name imported directly (`from numpy import zeros`)
    Library(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    symbols: HashMap<String, Symbol>,
    /// Declaration order of the variables, for deterministic output
    order: Vec<String>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self { kind, symbols: HashMap::new(), order: Vec::new() }
    }
}

/// Stack of nested scopes, innermost last
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    usages: UsageIndex,
}

impl ScopeStack {
    /// A stack holding only the module scope
    pub fn new() -> Self {
        Self { scopes: vec![Scope::new(ScopeKind::Module)], usages: UsageIndex::default() }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    /// Leave the innermost scope and return its variables in declaration order
    pub fn pop(&mut self) -> Vec<Variable> {
        if self.scopes.len() == 1 {
            return Vec::new();
        }
        let Some(mut scope) = self.scopes.pop() else {
            return Vec::new();
        };
        scope
            .order
            .iter()
            .filter_map(|name| match scope.symbols.remove(name) {
                Some(Symbol::Variable(v)) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Detach every scope above the module scope, for annotating another
    /// function in the middle of this one
    pub fn suspend(&mut self) -> Vec<Scope> {
        self.scopes.split_off(1)
    }

    pub fn resume(&mut self, scopes: Vec<Scope>) {
        self.scopes.truncate(1);
        self.scopes.extend(scopes);
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current_kind(&self) -> ScopeKind {
        self.scopes.last().map(|s| s.kind).unwrap_or(ScopeKind::Module)
    }

    /// Insert into the innermost scope, shadowing outer entries
    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        let name = name.into();
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.symbols.contains_key(&name) {
                scope.order.push(name.clone());
            }
            scope.symbols.insert(name, symbol);
        }
    }

    /// Insert into the module scope
    pub fn insert_global(&mut self, name: impl Into<String>, symbol: Symbol) {
        let name = name.into();
        let scope = &mut self.scopes[0];
        if !scope.symbols.contains_key(&name) {
            scope.order.push(name.clone());
        }
        scope.symbols.insert(name, symbol);
    }

    /// Resolve a name, innermost scope first
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|s| s.symbols.get(name))
    }

    /// The variable `name`, if the name resolves to one
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        match self.lookup(name)? {
            Symbol::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Replace the declaration of a variable where it lives
    pub fn update_variable(&mut self, var: Variable) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(Symbol::Variable(existing)) = scope.symbols.get_mut(&var.name) {
                *existing = var;
                return;
            }
        }
    }

    /// Remove a variable from the innermost scope
    pub fn take_variable(&mut self, name: &str) -> Option<Variable> {
        let scope = self.scopes.last_mut()?;
        match scope.symbols.get(name) {
            Some(Symbol::Variable(_)) => {}
            _ => return None,
        }
        scope.order.retain(|n| n != name);
        match scope.symbols.remove(name) {
            Some(Symbol::Variable(v)) => Some(v),
            _ => None,
        }
    }

    pub fn record_usage(&mut self, name: &str, location: Option<Location>) {
        if let Some(location) = location {
            self.usages.record(name, location);
        }
    }

    pub fn usages(&self) -> &UsageIndex {
        &self.usages
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Where each symbol is referenced, kept beside the tree rather than as
/// back-pointers in it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageIndex {
    uses: HashMap<String, Vec<Location>>,
}

impl UsageIndex {
    pub fn record(&mut self, name: &str, location: Location) {
        self.uses.entry(name.to_string()).or_default().push(location);
    }

    /// Locations referencing `name`, in visiting order
    pub fn locations(&self, name: &str) -> &[Location] {
        self.uses.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First reference to `name`
    pub fn first(&self, name: &str) -> Option<Location> {
        self.locations(name).first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut scopes = ScopeStack::new();
        scopes.insert("x", Symbol::Variable(Variable::new("x", DataType::Integer, 8)));
        scopes.push(ScopeKind::Function);
        scopes.insert("x", Symbol::Variable(Variable::new("x", DataType::Real, 8)));
        assert_eq!(scopes.variable("x").map(|v| v.dtype.clone()), Some(DataType::Real));

        let locals = scopes.pop();
        assert_eq!(locals.len(), 1);
        assert_eq!(scopes.variable("x").map(|v| v.dtype.clone()), Some(DataType::Integer));
    }

    #[test]
    fn test_suspend_keeps_module_scope() {
        let mut scopes = ScopeStack::new();
        scopes.insert_global("np", Symbol::Module("numpy".to_string()));
        scopes.push(ScopeKind::Function);
        scopes.insert("a", Symbol::Variable(Variable::new("a", DataType::Real, 8)));

        let saved = scopes.suspend();
        assert_eq!(scopes.depth(), 1);
        assert!(scopes.lookup("a").is_none());
        assert!(scopes.lookup("np").is_some());

        scopes.resume(saved);
        assert!(scopes.variable("a").is_some());
    }

    #[test]
    fn test_usage_index() {
        let mut scopes = ScopeStack::new();
        scopes.record_usage("a", Some(Location::new(2, 5)));
        scopes.record_usage("a", Some(Location::new(4, 1)));
        scopes.record_usage("b", None);
        assert_eq!(scopes.usages().locations("a").len(), 2);
        assert_eq!(scopes.usages().first("a"), Some(Location::new(2, 5)));
        assert!(scopes.usages().locations("b").is_empty());
    }
}
